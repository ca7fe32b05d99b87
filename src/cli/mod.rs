//! CLI Module
//!
//! Command-line front end for the compression engine. It owns everything the
//! library deliberately does not: file paths, WAV decoding and encoding, and
//! progress display.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::device::BackendPreference;
use crate::dsp::CompressionParams;

/// DRC Engine - chunked dynamic range compression
#[derive(Parser, Debug)]
#[command(name = "drc-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Execution backend: auto, accelerated, reference
    #[arg(long, global = true)]
    pub backend: Option<BackendPreference>,

    /// Chunk length in seconds
    #[arg(long, global = true)]
    pub chunk_seconds: Option<f64>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, mut config: EngineConfig) -> EngineConfig {
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(seconds) = self.chunk_seconds {
            config.chunk_duration_s = seconds;
        }
        config
    }
}

#[derive(Args, Debug, Clone, Copy)]
pub struct CompressArgs {
    /// Threshold in dBFS (-60 to 0)
    #[arg(long, default_value_t = -20.0, allow_hyphen_values = true)]
    pub threshold: f32,

    /// Compression ratio (1 to 20)
    #[arg(long, default_value_t = 4.0)]
    pub ratio: f32,

    /// Attack time in ms (0.1 to 50)
    #[arg(long, default_value_t = 5.0)]
    pub attack: f32,

    /// Release time in ms (10 to 500)
    #[arg(long, default_value_t = 50.0)]
    pub release: f32,

    /// Output bit depth: 16, 24 or 32 (float)
    #[arg(long, default_value_t = 16)]
    pub bit_depth: u16,
}

impl CompressArgs {
    pub fn params(&self) -> CompressionParams {
        CompressionParams {
            threshold_db: self.threshold,
            ratio: self.ratio,
            attack_ms: self.attack,
            release_ms: self.release,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compress a single WAV file
    #[command(name = "process")]
    Process {
        /// Input WAV file
        input: PathBuf,

        /// Output WAV file (defaults to <input>_compressed.wav)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        compress: CompressArgs,
    },

    /// Compress every WAV file under a directory
    #[command(name = "batch")]
    Batch {
        /// Directory to search recursively
        dir: PathBuf,

        /// Directory for results (defaults to next to each input)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        #[command(flatten)]
        compress: CompressArgs,
    },

    /// Report accelerator and engine status
    #[command(name = "probe")]
    Probe,
}
