//! Logical paths and path aliases.
//!
//! Record items and destination directories are *logical* paths: they may
//! begin with an alias that each node expands in its own filesystem
//! namespace.
//!
//! | Alias | Expands to                     |
//! |-------|--------------------------------|
//! | `~`   | the node's home/storage root   |
//! | `!`   | the app-private directory      |
//! | `*`   | the configured default folder  |
//!
//! Comparison helpers treat paths case-insensitively: two entries occupy
//! the same slot in a directory listing iff their paths match ignoring case.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Alias for the home/storage root.
pub const HOME_ALIAS: char = '~';
/// Alias for the app-private directory.
pub const APP_PRIVATE_ALIAS: char = '!';
/// Alias for the default directory.
pub const DEFAULT_ALIAS: char = '*';

/// Errors building a [`PathAliases`] table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AliasError {
    /// The default directory was itself written with the default alias.
    #[error("default directory references itself: {0}")]
    RecursiveDefault(String),
}

/// Per-node alias table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathAliases {
    home: Option<PathBuf>,
    app_private: Option<PathBuf>,
    default_directory: Option<String>,
}

impl PathAliases {
    /// Build an alias table. Unset roots leave their alias unexpanded.
    pub fn new(
        home: Option<PathBuf>,
        app_private: Option<PathBuf>,
        default_directory: Option<String>,
    ) -> Result<Self, AliasError> {
        if let Some(default) = &default_directory {
            if default.starts_with(DEFAULT_ALIAS) {
                return Err(AliasError::RecursiveDefault(default.clone()));
            }
        }
        Ok(Self {
            home,
            app_private,
            default_directory,
        })
    }

    /// Expand a logical path into a local filesystem path.
    pub fn expand(&self, logical: &str) -> PathBuf {
        let mut chars = logical.chars();
        let root = match chars.next() {
            Some(HOME_ALIAS) => self.home.clone(),
            Some(APP_PRIVATE_ALIAS) => self.app_private.clone(),
            Some(DEFAULT_ALIAS) => self.default_directory.as_deref().map(|d| self.expand(d)),
            _ => None,
        };
        match root {
            Some(root) => join_relative(&root, chars.as_str()),
            None => PathBuf::from(logical),
        }
    }

    /// The local default directory, if configured.
    pub fn default_directory(&self) -> Option<PathBuf> {
        self.default_directory.as_deref().map(|d| self.expand(d))
    }

    /// Expand an optional logical directory, falling back to the default.
    pub fn expand_or_default(&self, logical: Option<&str>) -> Option<PathBuf> {
        match logical {
            Some(logical) => Some(self.expand(logical)),
            None => self.default_directory(),
        }
    }
}

fn join_relative(root: &Path, rest: &str) -> PathBuf {
    let rest = rest.trim_start_matches(['/', '\\']);
    if rest.is_empty() {
        root.to_path_buf()
    } else {
        root.join(rest)
    }
}

fn folded(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Whether two paths name the same slot, ignoring case.
pub fn same_path(a: &Path, b: &Path) -> bool {
    a == b || folded(a) == folded(b)
}

/// Order two paths ignoring case.
pub fn compare_ignore_case(a: &Path, b: &Path) -> Ordering {
    folded(a).cmp(&folded(b))
}

/// Key for hashing paths by slot.
pub fn slot_key(path: &Path) -> String {
    folded(path)
}
