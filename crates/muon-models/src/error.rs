//! Error types for model inspection

use thiserror::Error;

/// Result type alias for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors that can occur while inspecting a model
#[derive(Debug, Error)]
pub enum ModelError {
    /// Blob too small to hold a model header
    #[error("Model too small: {size} bytes")]
    TooSmall {
        /// Size of the blob
        size: usize,
    },

    /// Missing or wrong file identifier
    #[error("Not a TFLite model: bad file identifier")]
    InvalidHeader,

    /// Structurally broken FlatBuffers data
    #[error("Malformed model: {reason}")]
    Malformed {
        /// What was out of place
        reason: String,
    },

    /// Model uses a tensor element type the driver cannot size
    #[error("Unsupported tensor type: {code}")]
    UnsupportedTensorType {
        /// Raw TFLite tensor type code
        code: i8,
    },

    /// A tensor byte size overflowed the wire representation
    #[error("Tensor size out of range")]
    SizeOutOfRange,
}

impl ModelError {
    /// Create a malformed-model error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}
