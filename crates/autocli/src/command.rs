//! Build-time command tree and run-time dispatch.
//!
//! A [`CommandNode`] is the mutable representation of one command while the
//! tree is assembled. Once built, [`CommandNode::to_clap`] renders the whole
//! tree for parsing and [`CommandNode::execute`] walks the parsed
//! [`ArgMatches`] back to the matched node and runs its handler.

use std::{fmt, io::Write, sync::Arc};

use async_trait::async_trait;
use clap::{Arg, ArgMatches};
use tracing::{debug, warn};

use crate::binder::{Arity, BindingError};

/// Argument id under which every positional value of a leaf is collected.
pub const POSITIONAL_ARGS: &str = "__positional";

/// Errors raised while running a command.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum InvokeError {
    /// The connection accessor could not provide a connection.
    #[error("failed to connect: {0}")]
    Connection(String),

    /// Wrong number of positional arguments.
    #[error("{0}")]
    Arguments(String),

    /// Arguments could not be converted into the request message.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// The remote call failed.
    #[error("rpc error: code = {:?} desc = {}", .0.code(), .0.message())]
    Remote(Box<tonic::Status>),

    /// The response could not be rendered.
    #[error("failed to serialize output: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writing to the output stream failed.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    /// Error returned by a custom command handler.
    #[error(transparent)]
    Handler(Box<dyn std::error::Error + Send + Sync>),
}

impl From<tonic::Status> for InvokeError {
    fn from(status: tonic::Status) -> Self {
        Self::Remote(Box::new(status))
    }
}

/// Everything a handler gets to see about one invocation.
pub struct Invocation<'a> {
    /// Matches of the leaf command itself.
    pub matches: &'a ArgMatches,
    /// Positional values, in command-line order.
    pub args: Vec<String>,
    /// Destination for command output.
    pub out: &'a mut (dyn Write + Send),
}

/// The executable part of a leaf command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Runs the command.
    ///
    /// # Errors
    ///
    /// Any stage failure is returned unchanged; the caller decides how to
    /// present it.
    async fn run(&self, invocation: Invocation<'_>) -> Result<(), InvokeError>;
}

/// One command in the tree: a group, a leaf, or both.
#[derive(Clone)]
pub struct CommandNode {
    name: String,
    usage: Option<String>,
    about: String,
    long_about: String,
    example: String,
    aliases: Vec<String>,
    suggest_for: Vec<String>,
    deprecated: String,
    version: String,
    args: Vec<Arg>,
    children: Vec<CommandNode>,
    arity: Option<Arity>,
    handler: Option<Arc<dyn CommandHandler>>,
}

impl CommandNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            usage: None,
            about: String::new(),
            long_about: String::new(),
            example: String::new(),
            aliases: Vec::new(),
            suggest_for: Vec::new(),
            deprecated: String::new(),
            version: String::new(),
            args: Vec::new(),
            children: Vec::new(),
            arity: None,
            handler: None,
        }
    }

    #[must_use]
    pub fn with_about(mut self, about: impl Into<String>) -> Self {
        self.about = about.into();
        self
    }

    #[must_use]
    pub fn with_long_about(mut self, long_about: impl Into<String>) -> Self {
        self.long_about = long_about.into();
        self
    }

    /// Replaces the generated usage line, e.g. `balance [address] [denom]`.
    #[must_use]
    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    #[must_use]
    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = example.into();
        self
    }

    #[must_use]
    pub fn with_aliases(mut self, aliases: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Names that, when typed as an unknown subcommand, suggest this one.
    #[must_use]
    pub fn with_suggest_for(
        mut self,
        suggest_for: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggest_for = suggest_for.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the command deprecated; `notice` is printed whenever it runs.
    #[must_use]
    pub fn with_deprecated(mut self, notice: impl Into<String>) -> Self {
        self.deprecated = notice.into();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn about(&self) -> &str {
        &self.about
    }

    pub fn long_about(&self) -> &str {
        &self.long_about
    }

    pub fn usage(&self) -> Option<&str> {
        self.usage.as_deref()
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn deprecated(&self) -> &str {
        &self.deprecated
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn children(&self) -> &[CommandNode] {
        &self.children
    }

    pub fn arity(&self) -> Option<Arity> {
        self.arity
    }

    /// Whether the node has a handler of its own.
    pub fn is_runnable(&self) -> bool {
        self.handler.is_some()
    }

    pub fn set_arity(&mut self, arity: Arity) {
        self.arity = Some(arity);
    }

    pub fn set_handler(&mut self, handler: Arc<dyn CommandHandler>) {
        self.handler = Some(handler);
    }

    /// Adds an argument unless one with the same id or long name exists.
    ///
    /// Returns whether the argument was added.
    pub fn add_arg(&mut self, arg: Arg) -> bool {
        let clashes = self.args.iter().any(|existing| {
            existing.get_id() == arg.get_id()
                || (existing.get_long().is_some() && existing.get_long() == arg.get_long())
                || (existing.get_short().is_some() && existing.get_short() == arg.get_short())
        });
        if clashes {
            warn!(
                command = %self.name,
                arg = %arg.get_id(),
                "argument already defined, keeping the first"
            );
            return false;
        }
        self.args.push(arg);
        true
    }

    /// Attaches `child` unless a child with the same name exists.
    ///
    /// Returns whether the child was attached.
    pub fn add_subcommand(&mut self, child: CommandNode) -> bool {
        if self.find_subcommand(&child.name).is_some() {
            warn!(
                parent = %self.name,
                command = %child.name,
                "duplicate command name, keeping the first"
            );
            return false;
        }
        self.children.push(child);
        true
    }

    pub fn find_subcommand(&self, name: &str) -> Option<&CommandNode> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Names of the nodes below this one whose suggest-for list contains
    /// `typed`.
    pub fn suggestions_for(&self, typed: &str) -> Vec<String> {
        let mut found = Vec::new();
        for child in &self.children {
            if child.suggest_for.iter().any(|s| s == typed) {
                found.push(child.name.clone());
            }
            found.extend(child.suggestions_for(typed));
        }
        found
    }

    /// Renders this node and its descendants as a [`clap::Command`].
    pub fn to_clap(&self) -> clap::Command {
        let mut command = clap::Command::new(self.name.clone());

        if !self.about.is_empty() {
            command = command.about(self.about.clone());
        }
        if !self.long_about.is_empty() {
            command = command.long_about(self.long_about.clone());
        }
        if let Some(usage) = &self.usage {
            command = command.override_usage(usage.clone());
        }
        if !self.example.is_empty() {
            command = command.after_help(format!("Examples:\n{}", self.example));
        }
        if !self.aliases.is_empty() {
            command = command.visible_aliases(self.aliases.clone());
        }
        if !self.version.is_empty() {
            command = command.version(self.version.clone());
        }
        if !self.deprecated.is_empty() {
            command = command.hide(true);
        }

        command = command.args(self.args.iter().cloned());
        for child in &self.children {
            command = command.subcommand(child.to_clap());
        }

        if self.handler.is_none() && !self.children.is_empty() {
            command = command
                .subcommand_required(true)
                .arg_required_else_help(true);
        }
        command
    }

    /// Follows the subcommand chain in `matches` and runs the matched node.
    ///
    /// `matches` must come from parsing with [`CommandNode::to_clap`] of this
    /// node. A matched group without a handler prints its help to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Arguments`] when the positional count is wrong,
    /// [`InvokeError::Output`] when writing fails, or whatever the handler
    /// returns.
    pub async fn execute(
        &self,
        matches: &ArgMatches,
        out: &mut (dyn Write + Send),
        err: &mut (dyn Write + Send),
    ) -> Result<(), InvokeError> {
        let mut node = self;
        let mut matches = matches;
        while let Some((name, sub_matches)) = matches.subcommand() {
            let Some(child) = node.find_subcommand(name) else {
                break;
            };
            node = child;
            matches = sub_matches;
        }

        if !node.deprecated.is_empty() {
            writeln!(
                err,
                "Command {:?} is deprecated, {}",
                node.name, node.deprecated
            )?;
        }

        let Some(handler) = &node.handler else {
            write!(out, "{}", node.to_clap().render_help())?;
            return Ok(());
        };

        let args: Vec<String> = matches
            .try_get_many::<String>(POSITIONAL_ARGS)
            .ok()
            .flatten()
            .map(|values| values.cloned().collect())
            .unwrap_or_default();
        if let Some(arity) = node.arity {
            arity.validate(&args)?;
        }

        debug!(command = %node.name, args = args.len(), "running command");
        handler.run(Invocation { matches, args, out }).await
    }
}

impl fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandNode")
            .field("name", &self.name)
            .field("about", &self.about)
            .field("aliases", &self.aliases)
            .field("args", &self.args.iter().map(Arg::get_id).collect::<Vec<_>>())
            .field("children", &self.children)
            .field("runnable", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records the positional args it was run with and echoes them.
    #[derive(Default)]
    struct Echo {
        seen: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl CommandHandler for Echo {
        async fn run(&self, invocation: Invocation<'_>) -> Result<(), InvokeError> {
            writeln!(invocation.out, "{}", invocation.args.join(","))?;
            self.seen.lock().unwrap().push(invocation.args);
            Ok(())
        }
    }

    fn positional() -> Arg {
        Arg::new(POSITIONAL_ARGS)
            .num_args(0..)
            .action(clap::ArgAction::Append)
    }

    fn tree(echo: Arc<Echo>) -> CommandNode {
        let mut leaf = CommandNode::new("balance")
            .with_about("Query a balance")
            .with_aliases(["bal"])
            .with_handler(echo);
        leaf.add_arg(positional());
        leaf.set_arity(Arity::Exact(1));

        let mut old = CommandNode::new("old")
            .with_deprecated("use balance instead")
            .with_suggest_for(["blance"])
            .with_handler(Arc::new(Echo::default()));
        old.add_arg(positional());

        let mut bank = CommandNode::new("bank").with_about("Bank queries");
        bank.add_subcommand(leaf);
        bank.add_subcommand(old);

        let mut root = CommandNode::new("query").with_aliases(["q"]);
        root.add_subcommand(bank);
        root
    }

    async fn run(root: &CommandNode, argv: &[&str]) -> (Result<(), InvokeError>, String, String) {
        let matches = root.to_clap().try_get_matches_from(argv).unwrap();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = root.execute(&matches, &mut out, &mut err).await;
        (
            result,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_add_subcommand_keeps_the_first() {
        let mut root = CommandNode::new("query");

        assert!(root.add_subcommand(CommandNode::new("bank").with_about("first")));
        assert!(!root.add_subcommand(CommandNode::new("bank").with_about("second")));

        assert_eq!(root.children().len(), 1);
        assert_eq!(root.find_subcommand("bank").unwrap().about(), "first");
    }

    #[test]
    fn test_add_arg_refuses_duplicate_long_names() {
        let mut node = CommandNode::new("balance");

        assert!(node.add_arg(Arg::new("node").long("node")));
        assert!(!node.add_arg(Arg::new("other").long("node")));

        assert_eq!(node.args().len(), 1);
    }

    #[test]
    fn test_to_clap_renders_the_tree() {
        let command = tree(Arc::new(Echo::default())).to_clap();

        let bank = command.find_subcommand("bank").unwrap();
        assert!(bank.is_subcommand_required_set());
        let balance = bank.find_subcommand("balance").unwrap();
        assert_eq!(balance.get_visible_aliases().collect::<Vec<_>>(), ["bal"]);
        assert!(bank.find_subcommand("old").unwrap().is_hide_set());
    }

    #[tokio::test]
    async fn test_execute_dispatches_to_the_leaf() {
        let echo = Arc::new(Echo::default());
        let root = tree(echo.clone());

        let (result, out, err) = run(&root, &["query", "bank", "bal", "cosmos1abc"]).await;

        result.unwrap();
        assert_eq!(out, "cosmos1abc\n");
        assert!(err.is_empty());
        assert_eq!(*echo.seen.lock().unwrap(), [vec!["cosmos1abc".to_owned()]]);
    }

    #[tokio::test]
    async fn test_execute_checks_arity_before_running() {
        let echo = Arc::new(Echo::default());
        let root = tree(echo.clone());

        let (result, out, _) = run(&root, &["query", "bank", "balance", "a", "b"]).await;

        let err = result.unwrap_err();
        assert!(matches!(&err, InvokeError::Arguments(_)));
        assert_eq!(err.to_string(), "accepts 1 arg(s), received 2");
        assert!(out.is_empty());
        assert!(echo.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_warns_about_deprecated_commands() {
        let root = tree(Arc::new(Echo::default()));

        let (result, _, err) = run(&root, &["query", "bank", "old"]).await;

        result.unwrap();
        assert_eq!(
            err,
            "Command \"old\" is deprecated, use balance instead\n"
        );
    }

    #[tokio::test]
    async fn test_execute_prints_help_for_empty_groups() {
        let mut root = CommandNode::new("query");
        root.add_subcommand(CommandNode::new("empty").with_about("Nothing here"));

        let (result, out, _) = run(&root, &["query", "empty"]).await;

        result.unwrap();
        assert!(out.contains("Nothing here"));
    }

    #[test]
    fn test_suggestions_for_searches_descendants() {
        let root = tree(Arc::new(Echo::default()));

        assert_eq!(root.suggestions_for("blance"), ["old"]);
        assert!(root.suggestions_for("nothing").is_empty());
    }

    #[test]
    fn test_remote_errors_render_like_grpc() {
        let err = InvokeError::from(tonic::Status::not_found("no such account"));

        assert_eq!(
            err.to_string(),
            "rpc error: code = NotFound desc = no such account"
        );
    }
}
