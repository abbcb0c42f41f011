//! Error handling for the coherex library.
//!
//! This module defines the error types used throughout the coherex system.

use thiserror::Error;

/// Result type used throughout the coherex system.
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum for the coherex system.
#[derive(Error, Debug)]
pub enum Error {
    /// Hardware is unavailable
    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// Failed to initialize hardware
    #[error("Hardware initialization failed: {0}")]
    HardwareInitialization(String),

    /// Device memory could not be allocated
    #[error("Device allocation of {bytes} bytes failed: {reason}")]
    DeviceAllocation {
        /// Requested allocation size
        bytes: usize,
        /// Backend-reported reason
        reason: String,
    },

    /// A blocking host/device copy failed
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Host and device copies were both marked stale
    #[error(
        "Coherence violation: host and device copies of a {byte_size}-byte buffer are both dirty"
    )]
    CoherenceViolation {
        /// Size of the affected buffer
        byte_size: usize,
    },

    /// Queue index outside `[0, device_count)`
    #[error("Invalid queue index {index}: {count} queue(s) available")]
    InvalidQueueIndex {
        /// Requested index
        index: isize,
        /// Number of queues in the context
        count: usize,
    },

    /// Host buffer cannot hold the bytes being transferred
    #[error("Host buffer too small: need {needed} bytes, have {available} bytes")]
    HostBufferTooSmall {
        /// Bytes required by the transfer
        needed: usize,
        /// Bytes available in the host buffer
        available: usize,
    },

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid input data
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error in OpenCL operations
    #[cfg(feature = "opencl")]
    #[error("OpenCL error: {0}")]
    OpenCL(String),

    /// Thread pool error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Thread pool shutdown error
    #[error("Thread pool shutdown: {0}")]
    ThreadPoolShutdown(String),

    /// Job id was never issued by this pool
    #[error("Unknown job id {0}")]
    UnknownJob(i64),

    /// Work function panicked while running on a worker
    #[error("Job {id} panicked: {message}")]
    JobPanicked {
        /// Id of the failed job
        id: i64,
        /// Panic payload, when it was a string
        message: String,
    },

    /// Job was still pending or running when its pool was torn down
    #[error("Job {0} was abandoned by pool shutdown")]
    JobAbandoned(i64),

    /// Pool shutdown hit its deadline before all work drained
    #[error(
        "Forced shutdown: {abandoned_jobs} job(s) abandoned, {detached_threads} thread(s) detached"
    )]
    ForcedShutdown {
        /// Jobs still pending or running at the deadline
        abandoned_jobs: usize,
        /// Worker threads that did not exit in time
        detached_threads: usize,
    },

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "opencl")]
impl From<opencl3::error_codes::ClError> for Error {
    fn from(err: opencl3::error_codes::ClError) -> Self {
        Error::OpenCL(err.to_string())
    }
}

impl Error {
    /// Returns true for failures the caller cannot recover from by retrying.
    ///
    /// Accelerator failures are never retried inside this crate.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::HardwareInitialization(_)
                | Error::HardwareUnavailable(_)
                | Error::CoherenceViolation { .. }
                | Error::DeviceAllocation { .. }
                | Error::Transfer(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coherence_violation_is_fatal() {
        let err = Error::CoherenceViolation { byte_size: 16 };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("16-byte"));
    }

    #[test]
    fn test_invalid_queue_is_not_fatal() {
        let err = Error::InvalidQueueIndex { index: -1, count: 2 };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Invalid queue index -1: 2 queue(s) available");
    }
}
