//! Error types for Muon driver operations

use thiserror::Error;

/// Result type alias for Muon driver operations
pub type Result<T> = std::result::Result<T, MuonError>;

/// Errors that can occur while driving the Muon NPU
#[derive(Debug, Error)]
pub enum MuonError {
    /// Caller supplied an out-of-range or inconsistent argument
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument
        reason: String,
    },

    /// Outbound queue has insufficient room for the message
    #[error("Queue full: need {needed} bytes, {free} free")]
    NoSpace {
        /// Bytes the message requires
        needed: usize,
        /// Bytes currently free in the queue
        free: usize,
    },

    /// Inbound frame failed validation; the queue has been reset
    #[error("Invalid frame: {reason}")]
    InvalidFrame {
        /// What failed validation
        reason: String,
    },

    /// A caller-visible RPC bound elapsed without a response
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Mutex acquisition was interrupted by a caller signal
    #[error("Interrupted")]
    Interrupted,

    /// Firmware reported a fault or was declared dead by the watchdog
    #[error("Firmware fault: {reason}")]
    Faulted {
        /// Reason for the fault
        reason: String,
    },

    /// An id or memory allocation was refused
    #[error("Resource exhausted: {resource}")]
    ResourceExhausted {
        /// Which resource ran out
        resource: String,
    },

    /// Registry lookup miss on a response correlation id
    #[error("Message id not found: {id}")]
    NotFound {
        /// The id that missed
        id: u32,
    },

    /// Model could not be parsed for its dimensions
    #[error("Model error: {source}")]
    Model {
        /// Underlying parse failure
        #[from]
        source: muon_models::ModelError,
    },
}

impl MuonError {
    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create an invalid frame error
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// Create a firmware fault error
    pub fn faulted(reason: impl Into<String>) -> Self {
        Self::Faulted {
            reason: reason.into(),
        }
    }

    /// Create a resource exhaustion error
    pub fn resource_exhausted(resource: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            resource: resource.into(),
        }
    }

    /// Create a timeout error from a duration
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            duration_ms: duration.as_millis().try_into().unwrap_or(u64::MAX),
        }
    }
}
