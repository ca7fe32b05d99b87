//! Audio Engine Module
//!
//! Core audio types shared by every other module:
//! - Immutable audio buffer and level helpers
//! - WAV file I/O for the command-line collaborator
//! - Synthetic signals for tests and benchmarks

pub mod buffer;
pub mod io;
pub mod signal;

pub use buffer::{db_to_linear, linear_to_db, power_to_db, AudioBuffer};
pub use io::{export_audio, import_audio, ExportFormat};
