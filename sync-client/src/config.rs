//! Configuration loading for the sync engine.
//!
//! Configuration is loaded from a TOML file. Every section is optional.
//!
//! ```toml
//! [paths]
//! home = "/storage/emulated/0"     # expands `~`
//! app_private = "/data/app"         # expands `!`
//! default_directory = "~/Tandem"    # expands `*`
//!
//! [peers]
//! selection = "first"               # or "last"
//! preferred = "watch-01"
//!
//! [view]
//! listing_timeout_secs = 10
//! ```

use crate::peers::{PeerSelection, PeerStrategy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tandem_sync_core::{AliasError, PathAliases};
use tandem_sync_types::NodeId;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Path alias roots.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Peer selection.
    #[serde(default)]
    pub peers: PeersConfig,
    /// Directory view settings.
    #[serde(default)]
    pub view: ViewConfig,
}

/// Path alias roots.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Home/storage root, expands `~`.
    pub home: Option<PathBuf>,
    /// App-private directory, expands `!`.
    pub app_private: Option<PathBuf>,
    /// Default directory, expands `*`. May use `~` or `!` but not `*`.
    pub default_directory: Option<String>,
}

/// Peer selection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PeersConfig {
    /// Which connected peer to pick (default: first).
    #[serde(default = "default_selection")]
    pub selection: PeerStrategy,
    /// Peer to use whenever it is connected.
    pub preferred: Option<String>,
}

/// Directory view configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewConfig {
    /// Give up on a remote listing after this many seconds (default: wait).
    pub listing_timeout_secs: Option<u64>,
}

// Default value functions
fn default_selection() -> PeerStrategy {
    PeerStrategy::First
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            selection: default_selection(),
            preferred: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Alias table for this node.
    pub fn aliases(&self) -> Result<PathAliases, ConfigError> {
        PathAliases::new(
            self.paths.home.clone(),
            self.paths.app_private.clone(),
            self.paths.default_directory.clone(),
        )
        .map_err(|AliasError::RecursiveDefault(dir)| ConfigError::RecursiveDefault(dir))
    }

    /// Peer selection policy.
    pub fn peer_selection(&self) -> PeerSelection {
        let selection = PeerSelection::new(self.peers.selection);
        match &self.peers.preferred {
            Some(preferred) => selection.with_preferred(NodeId::new(preferred.as_str())),
            None => selection,
        }
    }

    /// Remote listing timeout, if any.
    pub fn listing_timeout(&self) -> Option<Duration> {
        self.view.listing_timeout_secs.map(Duration::from_secs)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(ConfigError::InvalidToml)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to parse configuration text.
    #[error("invalid config: {0}")]
    InvalidToml(toml::de::Error),
    /// The default directory refers to itself.
    #[error("default directory must not start with `*`: {0}")]
    RecursiveDefault(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.peers.selection, PeerStrategy::First);
        assert!(config.listing_timeout().is_none());
        assert_eq!(config.aliases().unwrap(), PathAliases::default());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[paths]
home = "/storage"
default_directory = "~/Tandem"

[peers]
selection = "last"
preferred = "watch-01"

[view]
listing_timeout_secs = 5
"#;

        let config: Config = toml.parse().unwrap();
        let aliases = config.aliases().unwrap();
        assert_eq!(aliases.expand("*/a.txt"), PathBuf::from("/storage/Tandem/a.txt"));
        assert_eq!(config.peers.selection, PeerStrategy::Last);
        assert_eq!(
            config.peer_selection().preferred,
            Some(NodeId::new("watch-01"))
        );
        assert_eq!(config.listing_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.peers.selection, PeerStrategy::First);
        assert!(config.paths.home.is_none());
    }

    #[test]
    fn recursive_default_directory_is_rejected() {
        let config: Config = "[paths]\ndefault_directory = \"*/loop\"\n".parse().unwrap();
        assert!(matches!(
            config.aliases(),
            Err(ConfigError::RecursiveDefault(_))
        ));
    }

    #[test]
    fn unknown_strategy_is_a_parse_error() {
        let result: Result<Config, _> = "[peers]\nselection = \"random\"\n".parse();
        assert!(matches!(result, Err(ConfigError::InvalidToml(_))));
    }

    #[test]
    fn from_file_reports_missing_file() {
        let result = Config::from_file(Path::new("/definitely/not/tandem.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tandem.toml");
        std::fs::write(&path, "[view]\nlisting_timeout_secs = 3\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.listing_timeout(), Some(Duration::from_secs(3)));
    }
}
