use thiserror::Error;

/// Errors raised while validating a configuration, extracting weights or
/// running one of the feature extractors.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid configuration field `{field}`: {reason}")]
    Config { field: &'static str, reason: String },
    #[error("weight count mismatch: expected {expected} values, got {actual}")]
    Parameter { expected: usize, actual: usize },
    #[error("no parameters for layer {layer}")]
    MissingParameters { layer: usize },
    #[error("{context}: expected {expected}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        actual: Vec<usize>,
    },
    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn config(field: &'static str, reason: impl Into<String>) -> Self {
        ModelError::Config {
            field,
            reason: reason.into(),
        }
    }

    /// Name of the offending configuration field, if this is a config error.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ModelError::Config { field, .. } => Some(field),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
