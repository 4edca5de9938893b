//! Command-line client for gRPC query services.
//!
//! Usage:
//! ```bash
//! autocli query bank balance cosmos1... uatom   # Query a balance
//! autocli q bank balance --help                  # Show the generated flags
//! autocli --descriptor-set bank.binpb q bank ... # Add a descriptor set
//! autocli --config ./autocli.toml q ...          # Use an explicit config
//! ```
//!
//! Commands are generated at startup from the `[modules]` tables of
//! `autocli.toml` and the configured descriptor sets. Logging goes to stderr
//! and is controlled with `RUST_LOG`.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use autocli::{
    Builder, CommandNode, Config, DEFAULT_NODE, DescriptorPool, FlagBinder, GrpcConnector,
    node_flag,
};
use clap::{
    Arg, ArgAction, Parser,
    error::{ContextKind, ContextValue, ErrorKind},
    value_parser,
};
use console::style;
use prost::Message as _;
use prost_types::FileDescriptorSet;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Flags that shape the command tree and so must be known before it is built.
const GLOBAL_FLAGS: [&str; 2] = ["--config", "--descriptor-set"];

const CONFIG_ARG: &str = "config";
const DESCRIPTOR_SET_ARG: &str = "descriptor-set";

/// The global flags, parsed ahead of the generated tree.
#[derive(Debug, Default, Parser)]
#[command(name = "autocli", disable_help_flag = true, disable_version_flag = true)]
struct Bootstrap {
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long = "descriptor-set")]
    descriptor_sets: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let argv: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    match run(&argv).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", style("Error:").red().bold(), render_error(&err));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
}

async fn run(argv: &[String]) -> Result<()> {
    let bootstrap = Bootstrap::try_parse_from(bootstrap_args(argv)).unwrap_or_default();

    let config = load_config(bootstrap.config.as_deref())?;
    let mut descriptor_sets = config.descriptor_sets.clone();
    descriptor_sets.extend(bootstrap.descriptor_sets);
    let pool = load_pool(&descriptor_sets)?;

    let query = build_query(&config, pool)?;
    let matches = match cli(&query).try_get_matches_from(argv) {
        Ok(matches) => matches,
        Err(err) => exit_with_parse_error(&query, &err),
    };

    let Some((_, query_matches)) = matches.subcommand() else {
        anyhow::bail!("no command given");
    };
    query
        .execute(query_matches, &mut io::stdout(), &mut io::stderr())
        .await?;
    Ok(())
}

/// Keeps the program name and the global flags with their values.
///
/// Everything after `--` is left alone.
fn bootstrap_args(argv: &[String]) -> Vec<String> {
    let mut kept = Vec::new();
    let mut iter = argv.iter();
    if let Some(program) = iter.next() {
        kept.push(program.clone());
    }

    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }
        if GLOBAL_FLAGS.contains(&arg.as_str()) {
            kept.push(arg.clone());
            kept.extend(iter.next().cloned());
        } else if GLOBAL_FLAGS
            .iter()
            .any(|flag| arg.strip_prefix(flag).is_some_and(|rest| rest.starts_with('=')))
        {
            kept.push(arg.clone());
        }
    }
    kept
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }

    match Config::resolve().context("failed to resolve config")? {
        Some((path, config)) => {
            debug!(path = %path.display(), "using config");
            Ok(config)
        }
        None => {
            debug!("no config file found");
            Ok(Config::default())
        }
    }
}

/// Reads every descriptor set and merges them into one pool.
fn load_pool(paths: &[PathBuf]) -> Result<DescriptorPool> {
    let mut sets = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read descriptor set {}", path.display()))?;
        let set = FileDescriptorSet::decode(bytes.as_slice())
            .with_context(|| format!("failed to decode descriptor set {}", path.display()))?;
        sets.push(set);
    }
    DescriptorPool::from_file_descriptor_sets(sets).context("invalid descriptor sets")
}

fn build_query(config: &Config, pool: DescriptorPool) -> Result<CommandNode> {
    let mut connector = GrpcConnector::new(config.node.as_deref().unwrap_or(DEFAULT_NODE));
    if let Some(timeout) = config.connect_timeout() {
        connector = connector.with_connect_timeout(timeout);
    }

    let binder = FlagBinder::new().with_reserved_flags([CONFIG_ARG, DESCRIPTOR_SET_ARG]);
    let builder = Builder::new(Arc::new(pool), Arc::new(connector))
        .with_binder(Arc::new(binder))
        .with_post_build_hook(|leaf| {
            leaf.add_arg(node_flag());
        });
    builder
        .build_query_command(&config.modules, BTreeMap::new())
        .context("failed to build commands")
}

fn cli(query: &CommandNode) -> clap::Command {
    clap::Command::new("autocli")
        .about("Query gRPC services from the command line")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new(CONFIG_ARG)
                .long(CONFIG_ARG)
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("Config file [default: nearest autocli.toml]"),
        )
        .arg(
            Arg::new(DESCRIPTOR_SET_ARG)
                .long(DESCRIPTOR_SET_ARG)
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Append)
                .global(true)
                .help("Serialized FileDescriptorSet to load, in addition to configured ones"),
        )
        .subcommand(query.to_clap())
}

/// Names suggested for the subcommand clap could not find.
fn suggestions(query: &CommandNode, err: &clap::Error) -> Vec<String> {
    if err.kind() != ErrorKind::InvalidSubcommand {
        return Vec::new();
    }
    match err.get(ContextKind::InvalidSubcommand) {
        Some(ContextValue::String(typed)) => query.suggestions_for(typed),
        _ => Vec::new(),
    }
}

fn exit_with_parse_error(query: &CommandNode, err: &clap::Error) -> ! {
    // Write failures are only logged; the exit code still goes out.
    if let Err(print_err) = err.print() {
        debug!(error = %print_err, "failed to write the usage error");
    }
    if let Err(write_err) = write_suggestions(&mut io::stderr(), &suggestions(query, err)) {
        debug!(error = %write_err, "failed to write suggestions");
    }
    std::process::exit(err.exit_code())
}

fn write_suggestions(out: &mut impl io::Write, suggested: &[String]) -> io::Result<()> {
    if suggested.is_empty() {
        return Ok(());
    }
    writeln!(out, "\nDid you mean this?")?;
    for name in suggested {
        writeln!(out, "\t{name}")?;
    }
    Ok(())
}

/// Joins the error chain, skipping causes already spelled out by their
/// parent.
fn render_error(err: &anyhow::Error) -> String {
    let mut text = err.to_string();
    for cause in err.chain().skip(1) {
        let cause = cause.to_string();
        if !text.contains(&cause) {
            text.push_str(": ");
            text.push_str(&cause);
        }
    }
    text
}
