use thiserror::Error;
use tinyyolo_model::ModelError;
use tinyyolo_preprocess::PreprocessError;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("no parameters loaded: call load_parameters before forward or detect")]
    NotLoaded,
    #[error("raw output grid shape mismatch: expected {expected}, got {actual:?}")]
    ShapeMismatch { expected: String, actual: Vec<usize> },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
}

impl DetectError {
    /// Name of the offending configuration/options field, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            DetectError::Model(e) => e.field(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DetectError>;
