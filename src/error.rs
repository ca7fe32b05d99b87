//! Error handling for the DRC engine
//!
//! Every failure the engine can report lives in [`DrcError`]. Errors that end a
//! job are recorded on the job as a [`JobError`] and only reach a caller who
//! polls for them.

use thiserror::Error;

use crate::jobs::{JobError, JobId, JobState};

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, DrcError>;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum DrcError {
    // Parameter Errors
    #[error("Invalid parameter {param}={value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    #[error("Invalid chunking: {reason}")]
    InvalidChunking { reason: String },

    // Device Errors
    #[error("Accelerator fault: {reason}")]
    DeviceFault { reason: String },

    // Polling Protocol Errors
    #[error("Unknown job: {id}")]
    UnknownJob { id: JobId },

    #[error("Job {id} is not complete (state: {state})")]
    JobNotComplete { id: JobId, state: JobState },

    #[error("Job {id} failed: {error}")]
    JobFailed { id: JobId, error: JobError },

    // Processing Errors
    #[error("Processing failure: {reason}")]
    ProcessingFailure { reason: String },

    #[error("Processing was cancelled")]
    Cancelled,

    // Audio Errors
    #[error("Invalid audio: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    // Runtime / Configuration Errors
    #[error("No async runtime available: {reason}")]
    RuntimeUnavailable { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<candle_core::Error> for DrcError {
    fn from(err: candle_core::Error) -> Self {
        DrcError::DeviceFault {
            reason: err.to_string(),
        }
    }
}

impl DrcError {
    /// Shorthand for an out-of-range parameter
    pub fn invalid_parameter(param: &str, value: f32, expected: &str) -> Self {
        DrcError::InvalidParameter {
            param: param.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            DrcError::InvalidParameter { .. } => "INVALID_PARAMETER",
            DrcError::InvalidChunking { .. } => "INVALID_CHUNKING",
            DrcError::DeviceFault { .. } => "DEVICE_FAULT",
            DrcError::UnknownJob { .. } => "UNKNOWN_JOB",
            DrcError::JobNotComplete { .. } => "JOB_NOT_COMPLETE",
            DrcError::JobFailed { .. } => "JOB_FAILED",
            DrcError::ProcessingFailure { .. } => "PROCESSING_FAILURE",
            DrcError::Cancelled => "CANCELLED",
            DrcError::InvalidAudio { .. } => "INVALID_AUDIO",
            DrcError::FileNotFound { .. } => "FILE_NOT_FOUND",
            DrcError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            DrcError::RuntimeUnavailable { .. } => "RUNTIME_UNAVAILABLE",
            DrcError::Config { .. } => "CONFIG_ERROR",
            DrcError::Io(_) => "IO_ERROR",
            DrcError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recovered locally without failing the job
    ///
    /// Only accelerator faults qualify: the dispatch layer falls back to the
    /// reference path and the job continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DrcError::DeviceFault { .. })
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            DrcError::InvalidParameter { .. } => vec![
                "threshold_db must be within -60..0 dB",
                "ratio must be within 1..20 (ratios below 1 would expand)",
                "attack_ms must be within 0.1..50 ms, release_ms within 10..500 ms",
            ],
            DrcError::DeviceFault { .. } => vec![
                "Processing continues on the reference path",
                "Lower memory_budget_bytes to shrink chunks",
            ],
            DrcError::UnknownJob { .. } => vec![
                "Check the job id returned by submit",
                "The job may already have been reclaimed",
            ],
            DrcError::JobNotComplete { .. } => vec![
                "Poll status until the job reaches Completed",
                "Use wait() to block until the job finishes",
            ],
            DrcError::JobFailed { .. } => vec!["Re-submit the audio to retry"],
            DrcError::InvalidChunking { .. } => vec![
                "chunk_duration_s must be greater than overlap_s",
                "overlap_s must be positive",
                "Raise memory_budget_bytes if chunks cannot fit",
            ],
            DrcError::FileNotFound { .. } => vec![
                "Check the file path is correct",
                "Verify the file hasn't been moved or deleted",
            ],
            DrcError::UnsupportedFormat { .. } => vec![
                "Convert the input to PCM or float WAV",
                "Supported export bit depths: 16, 24, 32",
            ],
            _ => vec![],
        }
    }
}
