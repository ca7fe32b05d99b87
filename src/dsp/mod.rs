//! Dynamics processing
//!
//! The chunker cuts a signal into overlapping windows sized for device memory;
//! the compressor core processes one window at a time, carrying its envelope
//! state across window boundaries.

pub mod chunker;
pub mod compressor;

pub use chunker::{merge, split, split_with_plan, Chunk, ChunkPlan};
pub use compressor::{CompressionParams, CompressorCore, EnvelopeState, RMS_WINDOW_MS};
