// file: src/config.rs
// description: pipeline-wide configuration with toml and environment support
// reference: https://docs.rs/config

use crate::error::{PipelineError, Result};
use crate::storage::DType;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub workspace: WorkspaceConfig,
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    /// Directory holding the storage manifest and per-dataset data files.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    /// Frames per slice for chunked access. Zero means whole-dataset chunks.
    pub chunk_size: usize,
    /// Upper bound on the bytes a single chunk may occupy in memory.
    pub memory_budget_mb: usize,
    /// Element encoding used when a module creates a dataset without
    /// specifying one.
    #[serde(default)]
    pub default_dtype: DType,
    /// Frame indices used by selection modules that do not carry their own
    /// index set.
    #[serde(default)]
    pub frame_selection: Option<Vec<usize>>,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv().ok();

        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        } else {
            builder = builder.add_source(config::File::from(Path::new("config/default.toml")));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FRAMESTACK")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            workspace: WorkspaceConfig {
                path: PathBuf::from("./workspace"),
            },
            processing: ProcessingConfig {
                chunk_size: 100,
                memory_budget_mb: 512,
                default_dtype: DType::F64,
                frame_selection: None,
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.processing.memory_budget_mb == 0 {
            return Err(PipelineError::Config(
                "memory_budget_mb must be greater than 0".to_string(),
            ));
        }

        if self.workspace.path.as_os_str().is_empty() {
            return Err(PipelineError::Config(
                "workspace.path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.processing.chunk_size, 100);
        assert_eq!(config.processing.default_dtype, DType::F64);
    }

    #[test]
    fn test_zero_memory_budget_rejected() {
        let mut config = Config::default_config();
        config.processing.memory_budget_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_workspace_rejected() {
        let mut config = Config::default_config();
        config.workspace.path = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
