//! Engine configuration
//!
//! Loaded from a JSON file when one is given; every field falls back to its
//! default, so a file only needs the keys it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::BackendPreference;
use crate::error::{DrcError, Result};

/// Default chunk length in seconds
pub const DEFAULT_CHUNK_DURATION_S: f64 = 60.0;

/// Default overlap between consecutive chunks in seconds
pub const DEFAULT_OVERLAP_S: f64 = 0.05;

/// Default per-chunk memory budget (256 MiB)
pub const DEFAULT_MEMORY_BUDGET_BYTES: usize = 256 * 1024 * 1024;

/// Default number of jobs allowed to run at once
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Target chunk length in seconds (shrunk to fit the memory budget)
    pub chunk_duration_s: f64,
    /// Frames shared by consecutive chunks, in seconds
    pub overlap_s: f64,
    /// Upper bound on the bytes one chunk may occupy on the device
    pub memory_budget_bytes: usize,
    /// Jobs running at once; further jobs wait in the queue
    pub max_concurrent_jobs: usize,
    pub backend: BackendPreference,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_duration_s: DEFAULT_CHUNK_DURATION_S,
            overlap_s: DEFAULT_OVERLAP_S,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            backend: BackendPreference::Auto,
        }
    }
}

impl EngineConfig {
    /// Load a configuration file, applying defaults for missing keys
    ///
    /// # Errors
    /// `FileNotFound`, `Io`, `Serialization` for unreadable files and
    /// `Config` if the values fail validation.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DrcError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable together
    ///
    /// # Errors
    /// `Config` naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(DrcError::Config { reason });

        if !(self.chunk_duration_s.is_finite() && self.chunk_duration_s > 0.0) {
            return fail(format!("chunk_duration_s must be positive, got {}", self.chunk_duration_s));
        }
        if !(self.overlap_s.is_finite() && self.overlap_s > 0.0) {
            return fail(format!("overlap_s must be positive, got {}", self.overlap_s));
        }
        if self.overlap_s >= self.chunk_duration_s {
            return fail(format!(
                "overlap_s ({}) must be shorter than chunk_duration_s ({})",
                self.overlap_s, self.chunk_duration_s
            ));
        }
        if self.memory_budget_bytes == 0 {
            return fail("memory_budget_bytes must be non-zero".to_string());
        }
        if self.max_concurrent_jobs == 0 {
            return fail("max_concurrent_jobs must be at least 1".to_string());
        }
        Ok(())
    }
}
