// file: src/error.rs
// description: Custom error types and result type aliases
// reference: https://docs.rs/thiserror

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(
        "Non-static attribute '{key}' on dataset '{tag}' has length {len} \
         but the dataset holds {frames} frames"
    )]
    AttributeAlignment {
        tag: String,
        key: String,
        len: usize,
        frames: usize,
    },

    #[error("Protected attribute '{key}' on dataset '{tag}' already holds a different value")]
    AttributeConflict { tag: String, key: String },

    #[error("Input port references dataset '{tag}' which does not exist in storage")]
    PortBinding { tag: String },

    #[error("Module '{module}' requires input tag '{tag}' which no earlier module produces")]
    MissingInput { module: String, tag: String },

    #[error("A module named '{0}' is already registered")]
    DuplicateName(String),

    #[error("Module '{module}' failed: {message}")]
    Module { module: String, message: String },

    #[error("Recipe error: {0}")]
    Recipe(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Shorthand used by modules to signal a domain-specific failure.
    pub fn module(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Module {
            module: module.into(),
            message: message.into(),
        }
    }
}
