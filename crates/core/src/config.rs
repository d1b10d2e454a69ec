//! Database configuration via `chrondb.toml`
//!
//! Configuration lives in a TOML file inside the data directory. On first
//! open a commented default file is created; to change settings, edit the
//! file and reopen. Environment-specific paths (data dir, index dir) are
//! constructor arguments, not config keys, because they locate the config
//! itself.

use crate::error::{ChronError, ChronResult};
use crate::types::DEFAULT_BRANCH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "chrondb.toml";

// ============================================================================
// Sections
// ============================================================================

/// Identity recorded as committer on every commit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitterConfig {
    /// Committer name
    #[serde(default = "default_committer_name")]
    pub name: String,
    /// Committer email
    #[serde(default = "default_committer_email")]
    pub email: String,
}

fn default_committer_name() -> String {
    "ChronDB".to_string()
}

fn default_committer_email() -> String {
    "chrondb@localhost".to_string()
}

impl Default for CommitterConfig {
    fn default() -> Self {
        CommitterConfig {
            name: default_committer_name(),
            email: default_committer_email(),
        }
    }
}

impl CommitterConfig {
    /// `Name <email>` form used in commit metadata.
    pub fn signature(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

/// Remote replication settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// Remote URL (`file://`, `ssh://`, or `https://`); absent disables remotes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Push branch refs after each commit (deferred under batch scopes)
    #[serde(default)]
    pub push_enabled: bool,
    /// Also push the notes ref
    #[serde(default = "default_true")]
    pub push_notes: bool,
    /// Fetch and fast-forward on open
    #[serde(default)]
    pub pull_on_start: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            url: None,
            push_enabled: false,
            push_notes: true,
            pull_on_start: false,
        }
    }
}

/// Logging settings consumed by the facade's subscriber initialization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Minimum level: `debug`, `info`, `warn`, or `error`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Destination: `stdout` or `file`
    #[serde(default = "default_log_output")]
    pub output: String,
    /// Log file path when `output = "file"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> String {
    "stdout".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            output: default_log_output(),
            file: None,
        }
    }
}

/// Index engine tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfig {
    /// Reader pool refresh cadence in milliseconds
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Entries held by the per-branch result cache; 0 disables it
    #[serde(default = "default_result_cache_capacity")]
    pub result_cache_capacity: usize,
}

fn default_refresh_interval_ms() -> u64 {
    1000
}

fn default_result_cache_capacity() -> usize {
    256
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            refresh_interval_ms: default_refresh_interval_ms(),
            result_cache_capacity: default_result_cache_capacity(),
        }
    }
}

/// Durability tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DurabilityConfig {
    /// fsync the WAL on every append; turning this off trades the last few
    /// writes for latency on crash
    #[serde(default = "default_true")]
    pub fsync: bool,
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        DurabilityConfig { fsync: true }
    }
}

// ============================================================================
// ChronConfig
// ============================================================================

/// Complete database configuration loaded from `chrondb.toml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChronConfig {
    /// Branch used when a caller names none
    #[serde(default = "default_branch_name")]
    pub default_branch: String,
    /// Committer identity
    #[serde(default)]
    pub committer: CommitterConfig,
    /// Remote settings
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Index settings
    #[serde(default)]
    pub index: IndexConfig,
    /// Durability settings
    #[serde(default)]
    pub durability: DurabilityConfig,
}

fn default_branch_name() -> String {
    DEFAULT_BRANCH.to_string()
}

impl Default for ChronConfig {
    fn default() -> Self {
        ChronConfig {
            default_branch: default_branch_name(),
            committer: CommitterConfig::default(),
            remote: RemoteConfig::default(),
            logging: LoggingConfig::default(),
            index: IndexConfig::default(),
            durability: DurabilityConfig::default(),
        }
    }
}

impl ChronConfig {
    /// Load the config from `<data_dir>/chrondb.toml`, writing a commented
    /// default file first if none exists.
    pub fn load_or_create(data_dir: &Path) -> ChronResult<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            std::fs::write(&path, Self::default_toml())?;
            return Ok(ChronConfig::default());
        }
        let text = std::fs::read_to_string(&path)?;
        Self::parse(&text)
    }

    /// Parse TOML text into a config, validating enum-like string fields.
    pub fn parse(text: &str) -> ChronResult<Self> {
        let config: ChronConfig = toml::from_str(text)
            .map_err(|e| ChronError::invalid_input(format!("bad chrondb.toml: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ChronResult<()> {
        match self.logging.level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ChronError::invalid_input(format!(
                    "logging.level must be debug|info|warn|error, got '{}'",
                    other
                )))
            }
        }
        match self.logging.output.as_str() {
            "stdout" | "file" => {}
            other => {
                return Err(ChronError::invalid_input(format!(
                    "logging.output must be stdout|file, got '{}'",
                    other
                )))
            }
        }
        if self.logging.output == "file" && self.logging.file.is_none() {
            return Err(ChronError::invalid_input(
                "logging.output = \"file\" requires logging.file",
            ));
        }
        if self.default_branch.is_empty() {
            return Err(ChronError::invalid_input("default_branch must not be empty"));
        }
        Ok(())
    }

    /// Default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# ChronDB configuration
#
# Branch used when a caller names none.
default_branch = "main"

[committer]
name = "ChronDB"
email = "chrondb@localhost"

# [remote]
# url = "file:///var/backups/chrondb"
# push_enabled = true
# push_notes = true
# pull_on_start = false

[logging]
# level: "debug", "info", "warn", or "error"
level = "info"
# output: "stdout" or "file" (file requires `file = "/path/to/log"`)
output = "stdout"

[index]
# Reader pool refresh cadence in milliseconds.
refresh_interval_ms = 1000
# Entries held by the per-branch result cache; 0 disables it.
result_cache_capacity = 256

[durability]
# fsync the WAL on every append.
fsync = true
"#
    }
}
