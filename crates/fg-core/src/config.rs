//! Engine configuration file

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::verify::Tolerances;

/// Default tracing filter of the command server
pub const DEFAULT_LOG_FILTER: &str = "fg_core=info,fg_rpc=info";

/// Engine settings, stored as RON; every field has a default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tracing filter used when `RUST_LOG` is not set
    pub log_filter: String,
    /// Tolerances used when a request does not give its own
    pub verification: Tolerances,
    /// Value of `compute` for requests that omit it
    pub compute_by_default: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            verification: Tolerances::default(),
            compute_by_default: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_ron(&content)
    }

    /// Parse configuration from RON text
    pub fn from_ron(content: &str) -> Result<Self, ConfigError> {
        ron::from_str(content).map_err(|e| ConfigError::Deserialize(e.to_string()))
    }

    /// Save configuration to a RON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io(e.to_string()))
    }
}

/// Configuration-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = EngineConfig::from_ron("(compute_by_default: false)").unwrap();
        assert!(!config.compute_by_default);
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
        assert_eq!(config.verification, Tolerances::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("featguard.ron");
        let config = EngineConfig {
            log_filter: "fg_core=debug".into(),
            verification: Tolerances { mm: 0.25, pct: 2.0 },
            compute_by_default: false,
        };
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = EngineConfig::load(dir.path().join("missing.ron")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));
        let bad = EngineConfig::from_ron("(log_filter: 3)").unwrap_err();
        assert!(matches!(bad, ConfigError::Deserialize(_)));
    }
}
