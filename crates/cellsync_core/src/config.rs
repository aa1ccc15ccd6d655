//! Engine configuration.
//!
//! # Responsibility
//! - Deserialize operator-facing settings from JSON.
//! - Supply defaults for every field so an empty object is a valid config.
//!
//! # Invariants
//! - `naming.leader_group_template` contains the `{name}` placeholder.
//! - `import.delimiter` is never a line break.
//! - `sync.max_parallel_updates >= 1`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Placeholder substituted with the leader's display name.
pub const NAME_PLACEHOLDER: &str = "{name}";

const DEFAULT_LEADER_GROUP_TEMPLATE: &str = "{name} — group";
const DEFAULT_NEW_GROUP_NAME: &str = "New group";
const DEFAULT_MAX_PARALLEL_UPDATES: usize = 4;

/// Configuration loading/validation errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file cannot be read.
    Io(std::io::Error),
    /// Config text is not valid JSON for this schema.
    Parse(serde_json::Error),
    /// A field holds an out-of-range value.
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CellsyncConfig {
    pub naming: NamingConfig,
    pub import: ImportConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

impl CellsyncConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.naming.validate()?;
        self.import.validate()?;
        self.sync.validate()
    }
}

/// Group naming policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamingConfig {
    /// Auto name applied when a leader is placed; `{name}` is the leader.
    pub leader_group_template: String,
    /// Auto name for groups created without a name.
    pub new_group_name: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            leader_group_template: DEFAULT_LEADER_GROUP_TEMPLATE.to_string(),
            new_group_name: DEFAULT_NEW_GROUP_NAME.to_string(),
        }
    }
}

impl NamingConfig {
    /// Renders the auto name for a group led by `display_name`.
    pub fn leader_group_name(&self, display_name: &str) -> String {
        self.leader_group_template
            .replace(NAME_PLACEHOLDER, display_name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.leader_group_template.contains(NAME_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "naming.leader_group_template must contain `{NAME_PLACEHOLDER}`"
            )));
        }
        if self.new_group_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "naming.new_group_name must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bulk text import settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// Column delimiter; spreadsheet copy/paste uses tab.
    pub delimiter: char,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self { delimiter: '\t' }
    }
}

impl ImportConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.delimiter, '\n' | '\r') {
            return Err(ConfigError::Invalid(
                "import.delimiter must not be a line break".to_string(),
            ));
        }
        Ok(())
    }
}

/// Synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Upper bound of concurrent metadata updates.
    pub max_parallel_updates: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel_updates: DEFAULT_MAX_PARALLEL_UPDATES,
        }
    }
}

impl SyncConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_updates == 0 {
            return Err(ConfigError::Invalid(
                "sync.max_parallel_updates must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging bootstrap settings. Both fields fall back to build defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
    /// Absolute directory for rolling log files.
    pub log_dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{CellsyncConfig, ConfigError};

    #[test]
    fn empty_object_yields_defaults() {
        let config = CellsyncConfig::from_json_str("{}").expect("empty config is valid");
        assert_eq!(config, CellsyncConfig::default());
        assert_eq!(config.import.delimiter, '\t');
        assert_eq!(config.sync.max_parallel_updates, 4);
        assert_eq!(config.naming.leader_group_name("Alice"), "Alice — group");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = CellsyncConfig::from_json_str(
            r#"{"import": {"delimiter": ","}, "logging": {"level": "warn"}}"#,
        )
        .expect("partial config is valid");
        assert_eq!(config.import.delimiter, ',');
        assert_eq!(config.logging.level.as_deref(), Some("warn"));
        assert_eq!(config.naming.new_group_name, "New group");
    }

    #[test]
    fn rejects_template_without_placeholder() {
        let err = CellsyncConfig::from_json_str(
            r#"{"naming": {"leader_group_template": "Cell"}}"#,
        )
        .expect_err("template without placeholder must fail");
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("{name}")));
    }

    #[test]
    fn rejects_zero_parallelism_and_newline_delimiter() {
        let err = CellsyncConfig::from_json_str(r#"{"sync": {"max_parallel_updates": 0}}"#)
            .expect_err("zero parallelism must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CellsyncConfig::from_json_str(r#"{"import": {"delimiter": "\n"}}"#)
            .expect_err("newline delimiter must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = CellsyncConfig::from_json_str(r#"{"colour": "blue"}"#)
            .expect_err("unknown field must fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cellsync.json");
        std::fs::write(&path, r#"{"naming": {"new_group_name": "Untitled cell"}}"#)
            .expect("write config");

        let config = CellsyncConfig::load(&path).expect("config should load");
        assert_eq!(config.naming.new_group_name, "Untitled cell");

        let missing = CellsyncConfig::load(dir.path().join("missing.json"))
            .expect_err("missing file must fail");
        assert!(matches!(missing, ConfigError::Io(_)));
    }
}
