use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::notify::DEFAULT_CAPACITY;

pub const CONFIG_FILE_NAME: &str = "rosterd.toml";

/// Per-workspace settings. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RosterConfig {
    pub collection: String,
    pub order_field: String,
    pub notification_limit: usize,
    pub poll_interval_ms: u64,
}

impl Default for RosterConfig {
    fn default() -> Self {
        RosterConfig {
            collection: "students".to_string(),
            order_field: "firstName".to_string(),
            notification_limit: DEFAULT_CAPACITY,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid rosterd.toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid rosterd.toml: {0}")]
    Invalid(String),
}

impl RosterConfig {
    /// Reads `<workspace>/rosterd.toml`; a missing file means defaults.
    pub fn load(workspace: &Path) -> Result<Self, ConfigError> {
        let path = workspace.join(CONFIG_FILE_NAME);
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_string_lossy().to_string(),
                source,
            }),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: RosterConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.notification_limit == 0 {
            return Err(ConfigError::Invalid(
                "notification_limit must be at least 1".into(),
            ));
        }
        if self.collection.trim().is_empty() {
            return Err(ConfigError::Invalid("collection must not be empty".into()));
        }
        let field_ok = !self.order_field.is_empty()
            && self
                .order_field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !field_ok {
            return Err(ConfigError::Invalid(format!(
                "order_field {:?} is not a field path",
                self.order_field
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
