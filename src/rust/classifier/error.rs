use ort::Error as OrtError;
use std::io;

/// Represents the different types of errors that can occur while classifying images.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// Registry construction input was malformed (duplicate or empty names)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// A persisted registry could not be trusted
    #[error("Corrupt registry data: {0}")]
    CorruptData(String),
    /// Lookup of a class name the registry does not know
    #[error("Unknown class: {0}")]
    UnknownClass(String),
    /// Lookup of an index outside of [0, N)
    #[error("Class index {index} out of range for {len} classes")]
    IndexOutOfRange { index: usize, len: usize },
    /// Model output length disagrees with the registry
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
    /// Source image could not be decoded or has no pixels
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    /// Deployment artifact could not be produced
    #[error("Export error: {0}")]
    Export(String),
    /// Error occurred while loading or running the ONNX model
    #[error("Model error: {0}")]
    Model(String),
    /// Failed to render a report image
    #[error("Render error: {0}")]
    Render(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ClassifierError {
    pub(crate) fn shape_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<OrtError> for ClassifierError {
    fn from(err: OrtError) -> Self {
        ClassifierError::Model(err.to_string())
    }
}
