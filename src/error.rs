//! Error types for filter attachment and GPU resource handling.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while attaching a filter or allocating its GPU resources.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The effect source could not be parsed, validated or built.
    #[error("failed to compile effect {path:?}: {message}")]
    Compile {
        path: Option<PathBuf>,
        message: String,
    },

    /// A parameter the filter binds every frame is not exposed by the effect.
    #[error("effect does not expose parameter `{0}`")]
    MissingParameter(&'static str),

    /// A GPU object could not be created.
    #[error("GPU resource allocation failed: {0}")]
    Resource(String),

    /// No filter with this id is registered.
    #[error("unknown filter `{0}`")]
    UnknownFilter(String),

    #[error("invalid filter settings: {0}")]
    Settings(#[from] serde_yaml::Error),
}

impl FilterError {
    /// Whether this error means the filter program is unusable.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            FilterError::Compile { .. } | FilterError::MissingParameter(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
