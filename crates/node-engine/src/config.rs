//! Engine configuration
//!
//! Every field has a default, so a partial (or empty) JSON document is a
//! valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::ContextConfig;
use crate::error::{NodeEngineError, Result};
use crate::validation::DEFAULT_MAX_CHAIN_DEPTH;

/// Tool simulator behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatorSettings {
    /// Sleep for the simulated latency instead of only reporting it
    pub real_latency: bool,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self { real_latency: true }
    }
}

/// Runner and context configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub context: ContextConfig,
    /// Longest chain length before a warning is emitted
    pub max_chain_depth: usize,
    /// Treat cycles as validation errors instead of warnings
    pub cycles_are_errors: bool,
    pub simulator: SimulatorSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context: ContextConfig::default(),
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            cycles_are_errors: false,
            simulator: SimulatorSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document, filling missing fields with defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| NodeEngineError::Config(format!("Invalid config JSON: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await?;
        log::info!("Loaded engine config from {}", path.display());
        Self::from_json_str(&contents)
    }

    fn check(&self) -> Result<()> {
        if self.context.byte_limit == 0 {
            return Err(NodeEngineError::Config("context.byteLimit must be greater than 0".into()));
        }
        if self.max_chain_depth == 0 {
            return Err(NodeEngineError::Config("maxChainDepth must be greater than 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.context.byte_limit, 2048);
        assert_eq!(config.max_chain_depth, 100);
        assert!(!config.cycles_are_errors);
        assert!(config.simulator.real_latency);
        assert!(config.context.secret_keys.iter().any(|k| k == "apikey"));
    }

    #[test]
    fn test_partial_document() {
        let config = EngineConfig::from_json_str(r#"{"context": {"byteLimit": 512}, "cyclesAreErrors": true}"#).unwrap();
        assert_eq!(config.context.byte_limit, 512);
        assert!(config.cycles_are_errors);
        assert!(!config.context.secret_keys.is_empty());
        assert_eq!(config.max_chain_depth, 100);
    }

    #[test]
    fn test_rejects_zero_limit() {
        let result = EngineConfig::from_json_str(r#"{"context": {"byteLimit": 0}}"#);
        assert!(matches!(result, Err(NodeEngineError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"simulator": {{"realLatency": false}}}}"#).unwrap();

        let config = tokio_test::block_on(EngineConfig::from_file(file.path())).unwrap();
        assert!(!config.simulator.real_latency);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let result = EngineConfig::from_file("/definitely/not/here.json").await;
        assert!(matches!(result, Err(NodeEngineError::Io(_))));
    }
}
