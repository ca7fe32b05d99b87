//! Device dispatch layer
//!
//! Chooses between the accelerated (candle tensor) kernel and the scalar
//! reference kernel. Both produce the same output within
//! [`PARITY_TOLERANCE`]; an accelerator fault mid-job degrades that job to the
//! reference path instead of failing it.

mod accelerated;
mod dispatch;
mod probe;

use serde::{Deserialize, Serialize};

pub use accelerated::{Accelerator, AcceleratorHandle, CandleAccelerator};
pub use dispatch::{select_backend, DeviceDispatch};
pub use probe::{accelerator_summary, AcceleratorInfo, AcceleratorKind};

/// Largest per-sample difference allowed between the two backends
pub const PARITY_TOLERANCE: f32 = 1e-4;

/// Execution path for compressor kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Accelerated,
    Reference,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Accelerated => write!(f, "accelerated"),
            Backend::Reference => write!(f, "reference"),
        }
    }
}

/// Configured backend choice, resolved once per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Accelerated when a GPU is detected, reference otherwise
    #[default]
    Auto,
    Accelerated,
    Reference,
}

impl std::str::FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "accelerated" | "gpu" => Ok(Self::Accelerated),
            "reference" | "cpu" => Ok(Self::Reference),
            other => Err(format!("unknown backend '{}' (auto, accelerated, reference)", other)),
        }
    }
}
