//! DRC Engine - chunked dynamic range compression with asynchronous jobs
//!
//! Long signals are compressed without ever making the caller wait:
//! 1. `submit` a decoded [`engine::AudioBuffer`] with [`dsp::CompressionParams`]
//! 2. poll `status` for progress
//! 3. fetch the `result` once the job has completed
//!
//! # Architecture
//!
//! - `dsp`: signal chunker and compressor core (envelope state carried across
//!   chunk boundaries, overlaps cross-faded on merge)
//! - `device`: accelerated (candle) and reference kernels behind one dispatcher,
//!   with per-job fallback on accelerator faults
//! - `jobs`: job records, the chunk pipeline, and the tokio-based orchestrator
//! - `engine`: the audio buffer type, level helpers, WAV I/O and test signals
//!
//! ```no_run
//! use drc_engine::dsp::CompressionParams;
//! use drc_engine::engine::signal::sine;
//! use drc_engine::jobs::JobOrchestrator;
//! use drc_engine::EngineConfig;
//!
//! # async fn run() -> drc_engine::Result<()> {
//! let engine = JobOrchestrator::new(EngineConfig::default())?;
//! let id = engine.submit(sine(1000.0, -6.0, 1.0, 48_000, 2)?, CompressionParams::default())?;
//! engine.wait(id).await?;
//! let compressed = engine.result(id)?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod device;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod jobs;

pub use config::EngineConfig;
pub use error::{DrcError, Result};
