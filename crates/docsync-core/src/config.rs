//! Configuration module for docsync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::newtypes::RemotePath;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for docsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Local directory mirrored with the repository.
    pub root: PathBuf,
    /// Repository folder the local root maps onto.
    pub remote_folder: String,
    /// Push local edits to the repository. When `false` the repository is
    /// authoritative and local changes are never uploaded.
    pub bidirectional: bool,
    /// Seconds between sync passes.
    pub poll_interval: u64,
    /// Upper bound of concurrently processed items.
    pub max_workers: usize,
    /// Maximum number of change-feed events requested per page.
    pub change_page_size: u32,
    /// Failure count at which an item stops being retried and is reported.
    pub failure_ceiling: u32,
    /// Timeout applied to every repository call, in seconds.
    pub request_timeout_secs: u64,
    /// Extra glob patterns excluded from synchronization.
    pub ignore: Vec<String>,
}

/// State cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite state database.
    pub path: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/docsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("docsync")
            .join("config.yaml")
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// The synchronized root with `~` expanded.
    pub fn sync_root(&self) -> PathBuf {
        expand_tilde(&self.sync.root)
    }

    /// The state database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        expand_tilde(&self.database.path)
    }
}

/// Expands a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

// ---------------------------------------------------------------------------
// Config::default()
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("Repository"),
            remote_folder: "/".to_string(),
            bidirectional: true,
            poll_interval: 30,
            max_workers: 4,
            change_page_size: 500,
            failure_ceiling: 5,
            request_timeout_secs: 60,
            ignore: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("docsync")
                .join("state.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

/// Upper bound for `sync.max_workers`.
const MAX_WORKERS: usize = 64;

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.poll_interval == 0 {
            errors.push(ValidationError {
                field: "sync.poll_interval".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.sync.max_workers == 0 || self.sync.max_workers > MAX_WORKERS {
            errors.push(ValidationError {
                field: "sync.max_workers".into(),
                message: format!("must be in range 1..={MAX_WORKERS}"),
            });
        }

        if self.sync.change_page_size == 0 {
            errors.push(ValidationError {
                field: "sync.change_page_size".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.sync.failure_ceiling == 0 {
            errors.push(ValidationError {
                field: "sync.failure_ceiling".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.sync.request_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "sync.request_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        if let Err(e) = RemotePath::new(self.sync.remote_folder.clone()) {
            errors.push(ValidationError {
                field: "sync.remote_folder".into(),
                message: e.to_string(),
            });
        }

        for pattern in &self.sync.ignore {
            if let Err(e) = glob::Pattern::new(pattern) {
                errors.push(ValidationError {
                    field: "sync.ignore".into(),
                    message: format!("invalid pattern '{pattern}': {e}"),
                });
            }
        }

        let root = self.sync_root();
        if !root.is_absolute() {
            errors.push(ValidationError {
                field: "sync.root".into(),
                message: format!("must be an absolute path: {}", root.display()),
            });
        } else if root.exists() && !root.is_dir() {
            errors.push(ValidationError {
                field: "sync.root".into(),
                message: format!("not a directory: {}", root.display()),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use docsync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .sync_root(PathBuf::from("/home/user/Repository"))
///     .sync_remote_folder("/Sites/team/documentLibrary")
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_root(mut self, root: PathBuf) -> Self {
        self.config.sync.root = root;
        self
    }

    pub fn sync_remote_folder(mut self, folder: impl Into<String>) -> Self {
        self.config.sync.remote_folder = folder.into();
        self
    }

    pub fn sync_bidirectional(mut self, bidirectional: bool) -> Self {
        self.config.sync.bidirectional = bidirectional;
        self
    }

    pub fn sync_poll_interval(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval = seconds;
        self
    }

    pub fn sync_max_workers(mut self, n: usize) -> Self {
        self.config.sync.max_workers = n;
        self
    }

    pub fn sync_change_page_size(mut self, n: u32) -> Self {
        self.config.sync.change_page_size = n;
        self
    }

    pub fn sync_failure_ceiling(mut self, n: u32) -> Self {
        self.config.sync.failure_ceiling = n;
        self
    }

    pub fn sync_request_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.sync.request_timeout_secs = seconds;
        self
    }

    pub fn sync_ignore(mut self, pattern: impl Into<String>) -> Self {
        self.config.sync.ignore.push(pattern.into());
        self
    }

    // --- database ---

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.database.path = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
