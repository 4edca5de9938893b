//! Configuration file discovery and loading.
//!
//! `autocli.toml` names the descriptor sets to load, the default endpoint,
//! and the module descriptors the `query` tree is built from.
//!
//! # Resolution Algorithm
//!
//! 1. The path in `AUTOCLI_CONFIG`, when it exists
//! 2. `autocli.toml` in the current directory
//! 3. `autocli.toml` in each parent directory, walking up to the root
//! 4. `autocli/autocli.toml` under the platform config directory
//!
//! A missing file is not an error; [`Config::resolve`] returns `None`.
//!
//! # Example
//!
//! ```toml
//! descriptor_sets = ["bank.binpb"]
//! node = "localhost:9090"
//! connect_timeout_secs = 5
//!
//! [modules.bank]
//! service = "cosmos.bank.v1beta1.Query"
//! short = "Bank module queries"
//!
//! [[modules.bank.rpc_command_options]]
//! rpc_method = "Balance"
//! use = "balance [address] [denom]"
//! positional_args = [{ proto_field = "address" }, { proto_field = "denom" }]
//! ```

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::options::CommandDescriptor;

/// File name searched for in the current and parent directories.
pub const CONFIG_FILE_NAME: &str = "autocli.toml";

/// Environment variable holding an explicit config file path.
pub const CONFIG_ENV_VAR: &str = "AUTOCLI_CONFIG";

/// Errors that can occur while loading a config file.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error when reading a config file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is not valid TOML or does not match the expected shape.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file not found.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
}

/// Contents of `autocli.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Serialized `FileDescriptorSet` files. Relative paths are resolved
    /// against the directory of the config file by [`Config::load`].
    pub descriptor_sets: Vec<PathBuf>,

    /// Endpoint used when a command is run without `--node`.
    pub node: Option<String>,

    pub connect_timeout_secs: Option<u64>,

    /// Module descriptors keyed by module name.
    pub modules: BTreeMap<String, CommandDescriptor>,
}

impl Config {
    /// Loads and parses the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Err(ConfigError)` if:
    /// - The file does not exist (`NotFound`)
    /// - The file cannot be read
    /// - The file cannot be parsed as TOML
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Io(e),
        })?;

        let mut config: Config = toml::from_str(&contents)?;
        let root_dir = path.parent().unwrap_or_else(|| Path::new("."));
        for set in &mut config.descriptor_sets {
            if set.is_relative() {
                *set = root_dir.join(&*set);
            }
        }
        Ok(config)
    }

    /// Finds and loads the config file using the resolution algorithm.
    ///
    /// Returns the path the config was loaded from along with the config.
    ///
    /// # Errors
    ///
    /// Returns `Err(ConfigError)` if the current directory cannot be
    /// determined or a found config file cannot be read or parsed.
    pub fn resolve() -> Result<Option<(PathBuf, Self)>, ConfigError> {
        let env_override = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        let current = std::env::current_dir()?;
        resolve_from(
            env_override.as_deref(),
            &current,
            dirs::config_dir().as_deref(),
        )
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

fn resolve_from(
    env_override: Option<&Path>,
    start: &Path,
    config_dir: Option<&Path>,
) -> Result<Option<(PathBuf, Config)>, ConfigError> {
    if let Some(path) = env_override {
        if path.exists() {
            return load_found(path.to_path_buf());
        }
        debug!(path = %path.display(), "{CONFIG_ENV_VAR} points to a missing file, ignoring");
    }

    for dir in start.ancestors() {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.is_file() {
            return load_found(path);
        }
    }

    if let Some(path) = config_dir.map(|dir| dir.join("autocli").join(CONFIG_FILE_NAME))
        && path.is_file()
    {
        return load_found(path);
    }

    Ok(None)
}

fn load_found(path: PathBuf) -> Result<Option<(PathBuf, Config)>, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let config = Config::load(&path)?;
    Ok(Some((path, config)))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const MINIMAL: &str = r#"
        descriptor_sets = ["bank.binpb", "/abs/other.binpb"]
        node = "grpc.example.com:9090"
        connect_timeout_secs = 5

        [modules.bank]
        service = "pkg.Bank"
        short = "Bank module queries"

        [[modules.bank.rpc_command_options]]
        rpc_method = "Balance"
        use = "balance [address] [denom]"
        positional_args = [{ proto_field = "address" }, { proto_field = "denom" }]

        [modules.bank.sub_commands.v2]
        service = "pkg.v2.Bank"
    "#;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join(CONFIG_FILE_NAME);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_config_from_path() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), MINIMAL);

        let config = Config::load(&path).unwrap();

        assert_eq!(
            config.descriptor_sets,
            [temp.path().join("bank.binpb"), PathBuf::from("/abs/other.binpb")]
        );
        assert_eq!(config.node.as_deref(), Some("grpc.example.com:9090"));
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(5)));
        let bank = &config.modules["bank"];
        assert_eq!(bank.service, "pkg.Bank");
        assert_eq!(bank.rpc_command_options[0].positional_args.len(), 2);
        assert_eq!(bank.sub_commands["v2"].service, "pkg.v2.Bank");
    }

    #[test]
    fn test_empty_file_is_a_default_config() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "");

        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();

        let err = Config::load(temp.path().join("missing.toml")).unwrap_err();

        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_rejects_malformed_config() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "[modules.bank]\nservce = \"pkg.Bank\"\n");

        let err = Config::load(&path).unwrap_err();

        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_resolve_walks_up_directories() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        let path = write_config(temp.path(), MINIMAL);

        let (found, config) = resolve_from(None, &nested, None).unwrap().unwrap();

        assert_eq!(found, path);
        assert!(config.modules.contains_key("bank"));
    }

    #[test]
    fn test_resolve_prefers_closest_directory() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("project");
        fs::create_dir_all(&nested).unwrap();
        write_config(temp.path(), MINIMAL);
        let closest = write_config(&nested, "node = \"near:1\"");

        let (found, config) = resolve_from(None, &nested, None).unwrap().unwrap();

        assert_eq!(found, closest);
        assert_eq!(config.node.as_deref(), Some("near:1"));
    }

    #[test]
    fn test_env_override_wins() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), MINIMAL);
        let explicit = temp.path().join("explicit.toml");
        fs::write(&explicit, "node = \"explicit:1\"").unwrap();

        let (found, config) = resolve_from(Some(&explicit), temp.path(), None)
            .unwrap()
            .unwrap();

        assert_eq!(found, explicit);
        assert_eq!(config.node.as_deref(), Some("explicit:1"));
    }

    #[test]
    fn test_missing_env_override_falls_through() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), MINIMAL);

        let (found, _) = resolve_from(Some(&temp.path().join("nope.toml")), temp.path(), None)
            .unwrap()
            .unwrap();

        assert_eq!(found, path);
    }

    #[test]
    fn test_resolve_falls_back_to_config_dir() {
        let start = TempDir::new().unwrap();
        let config_dir = TempDir::new().unwrap();
        fs::create_dir_all(config_dir.path().join("autocli")).unwrap();
        let path = write_config(&config_dir.path().join("autocli"), "node = \"xdg:1\"");

        let (found, config) = resolve_from(None, start.path(), Some(config_dir.path()))
            .unwrap()
            .unwrap();

        assert_eq!(found, path);
        assert_eq!(config.node.as_deref(), Some("xdg:1"));
    }

    #[test]
    fn test_config_not_found_returns_none() {
        let start = TempDir::new().unwrap();
        let config_dir = TempDir::new().unwrap();

        let result = resolve_from(None, start.path(), Some(config_dir.path())).unwrap();

        assert!(result.is_none());
    }
}
