//! Accelerator detection
//!
//! Probes for a usable accelerator once per process and reports what it
//! found. NVIDIA memory figures come from `nvidia-smi`; candle decides whether
//! a device context can actually be opened.

use std::process::Command;
use std::sync::OnceLock;

use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Fraction of free device memory a single chunk may occupy
const VRAM_BUDGET_FRACTION: f64 = 0.25;

/// Kind of compute device backing the accelerated path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorKind {
    Cuda,
    Metal,
    /// Tensor kernels on the host CPU
    Cpu,
}

impl std::fmt::Display for AcceleratorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Metal => write!(f, "metal"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Information about a detected accelerator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceleratorInfo {
    pub kind: AcceleratorKind,
    /// Device name/model
    pub name: String,
    /// Total device memory in MB (when reported)
    pub memory_total_mb: Option<f32>,
    /// Free device memory in MB (when reported)
    pub memory_free_mb: Option<f32>,
    /// Driver version (when reported)
    pub driver_version: Option<String>,
}

impl AcceleratorInfo {
    /// Probe the system, caching the answer for the life of the process
    ///
    /// Returns `None` when no GPU device context can be opened.
    pub fn detect() -> Option<&'static AcceleratorInfo> {
        static PROBED: OnceLock<Option<AcceleratorInfo>> = OnceLock::new();
        PROBED.get_or_init(Self::probe).as_ref()
    }

    fn probe() -> Option<Self> {
        if let Ok(device) = Device::new_cuda(0) {
            debug!(cpu = device.is_cpu(), "opened CUDA device 0");
            let info = Self::detect_nvidia().unwrap_or_else(|| Self::unnamed(AcceleratorKind::Cuda));
            info!(name = %info.name, memory_free_mb = ?info.memory_free_mb, "accelerator detected");
            return Some(info);
        }
        if Device::new_metal(0).is_ok() {
            let info = Self::unnamed(AcceleratorKind::Metal);
            info!(name = %info.name, "accelerator detected");
            return Some(info);
        }
        info!("no accelerator detected, using the reference path");
        None
    }

    fn unnamed(kind: AcceleratorKind) -> Self {
        Self {
            kind,
            name: format!("{} device 0", kind),
            memory_total_mb: None,
            memory_free_mb: None,
            driver_version: None,
        }
    }

    /// Query the first NVIDIA GPU through nvidia-smi
    fn detect_nvidia() -> Option<Self> {
        let output = Command::new("nvidia-smi")
            .args([
                "--query-gpu=name,memory.total,memory.free,driver_version",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_nvidia_smi_line(stdout.lines().next()?)
    }

    /// Largest chunk, in bytes, this device should be handed
    pub fn memory_budget_bytes(&self) -> Option<usize> {
        self.memory_free_mb
            .map(|mb| (mb as f64 * 1024.0 * 1024.0 * VRAM_BUDGET_FRACTION) as usize)
    }
}

/// Parse one `name, total, free, driver` line of nvidia-smi CSV output
fn parse_nvidia_smi_line(line: &str) -> Option<AcceleratorInfo> {
    let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
    if parts.len() < 4 {
        return None;
    }

    Some(AcceleratorInfo {
        kind: AcceleratorKind::Cuda,
        name: parts[0].to_string(),
        memory_total_mb: Some(parts[1].parse().ok()?),
        memory_free_mb: Some(parts[2].parse().ok()?),
        driver_version: Some(parts[3].to_string()),
    })
}

/// Human-readable summary of accelerator status
pub fn accelerator_summary() -> String {
    match AcceleratorInfo::detect() {
        Some(acc) => {
            let mut summary = format!("Accelerator: {} ({})", acc.name, acc.kind);
            if let (Some(total), Some(free)) = (acc.memory_total_mb, acc.memory_free_mb) {
                summary.push_str(&format!(
                    "\nMemory: {:.1}GB total, {:.1}GB available",
                    total / 1024.0,
                    free / 1024.0
                ));
            }
            if let Some(driver) = &acc.driver_version {
                summary.push_str(&format!("\nDriver: {}", driver));
            }
            if let Some(budget) = acc.memory_budget_bytes() {
                summary.push_str(&format!("\nChunk budget: {} MiB", budget / (1024 * 1024)));
            }
            summary
        }
        None => "No accelerator detected. Compression runs on the reference path.".to_string(),
    }
}
