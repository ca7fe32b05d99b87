//! Signal chunker
//!
//! Splits a decoded signal into overlapping windows that fit a memory budget
//! and stitches processed windows back together.
//!
//! ```text
//!  chunk 0  |==================|
//!  chunk 1               |==================|
//!  chunk 2                            |=========|
//!                        ^^^^^ overlap (cross-faded on merge)
//! ```
//!
//! Consecutive chunks share exactly `overlap_frames` frames. On merge the
//! incoming chunk fades in linearly across the shared region, so overlapped
//! frames are blended once and never duplicated.

use super::compressor::EnvelopeState;
use crate::engine::AudioBuffer;
use crate::error::{DrcError, Result};

/// Bytes per sample held on the accelerator (f32)
pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();

/// A contiguous window of a signal plus the envelope state it starts from
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Position of this chunk in the sequence
    pub index: usize,
    /// First frame of the chunk in the source signal
    pub offset: usize,
    /// Frames shared with the previous chunk
    pub lead_overlap: usize,
    /// Frames shared with the next chunk
    pub tail_overlap: usize,
    /// Per-channel samples
    pub samples: Vec<Vec<f32>>,
    pub sample_rate: u32,
    /// Envelope state inherited from the preceding chunk
    pub carried_state: EnvelopeState,
}

impl Chunk {
    /// Number of frames in the chunk
    pub fn len(&self) -> usize {
        self.samples.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Frame index (within the chunk) where the next chunk begins
    pub fn handoff(&self) -> usize {
        self.len().saturating_sub(self.tail_overlap)
    }

    /// Check that the chunk is safe to hand to a kernel
    ///
    /// # Errors
    /// `InvalidChunking` if channels differ in length or either overlap is
    /// longer than the chunk.
    pub fn validate(&self) -> Result<()> {
        let frames = self.len();
        if let Some(ch) = self.samples.iter().position(|ch| ch.len() != frames) {
            return Err(DrcError::InvalidChunking {
                reason: format!(
                    "chunk {} channel {} has {} frames, expected {}",
                    self.index,
                    ch,
                    self.samples[ch].len(),
                    frames
                ),
            });
        }
        if self.lead_overlap > frames || self.tail_overlap > frames {
            return Err(DrcError::InvalidChunking {
                reason: format!(
                    "chunk {} overlaps ({} lead, {} tail) exceed its {} frames",
                    self.index, self.lead_overlap, self.tail_overlap, frames
                ),
            });
        }
        Ok(())
    }

    /// Copy of this chunk carrying new samples and the state they started from
    pub fn with_samples(&self, samples: Vec<Vec<f32>>, carried_state: EnvelopeState) -> Chunk {
        Chunk {
            index: self.index,
            offset: self.offset,
            lead_overlap: self.lead_overlap,
            tail_overlap: self.tail_overlap,
            samples,
            sample_rate: self.sample_rate,
            carried_state,
        }
    }
}

/// Chunk and overlap sizes resolved to frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_frames: usize,
    pub overlap_frames: usize,
}

impl ChunkPlan {
    /// Resolve durations in seconds to frame counts
    ///
    /// # Errors
    /// `InvalidChunking` if either duration is non-positive or non-finite, if
    /// the overlap is not shorter than the chunk, or if the durations round to
    /// fewer frames than that relationship needs.
    pub fn new(chunk_duration_s: f64, overlap_s: f64, sample_rate: u32) -> Result<Self> {
        if !(chunk_duration_s.is_finite() && chunk_duration_s > 0.0) {
            return Err(DrcError::InvalidChunking {
                reason: format!("chunk duration must be positive, got {}s", chunk_duration_s),
            });
        }
        if !(overlap_s.is_finite() && overlap_s > 0.0) {
            return Err(DrcError::InvalidChunking {
                reason: format!("overlap must be positive, got {}s", overlap_s),
            });
        }
        if overlap_s >= chunk_duration_s {
            return Err(DrcError::InvalidChunking {
                reason: format!(
                    "overlap {}s must be shorter than chunk duration {}s",
                    overlap_s, chunk_duration_s
                ),
            });
        }

        let rate = sample_rate as f64;
        let plan = Self {
            chunk_frames: (chunk_duration_s * rate).round() as usize,
            overlap_frames: ((overlap_s * rate).round() as usize).max(1),
        };
        plan.check()?;
        Ok(plan)
    }

    /// Resolve durations and shrink the chunk until it fits `budget_bytes`
    ///
    /// A chunk of `chunk_frames × channels` f32 samples must fit the budget;
    /// the overlap is kept as requested.
    ///
    /// # Errors
    /// `InvalidChunking` for invalid durations, or when the budget cannot hold
    /// a chunk longer than the overlap.
    pub fn fit_to_budget(
        chunk_duration_s: f64,
        overlap_s: f64,
        sample_rate: u32,
        num_channels: usize,
        budget_bytes: usize,
    ) -> Result<Self> {
        let mut plan = Self::new(chunk_duration_s, overlap_s, sample_rate)?;
        let frame_bytes = num_channels.max(1) * BYTES_PER_SAMPLE;
        let max_frames = budget_bytes / frame_bytes;
        if plan.chunk_frames > max_frames {
            plan.chunk_frames = max_frames;
            plan.check().map_err(|_| DrcError::InvalidChunking {
                reason: format!(
                    "memory budget of {} bytes holds {} frames of {} channel(s), not more than the {}-frame overlap",
                    budget_bytes, max_frames, num_channels, plan.overlap_frames
                ),
            })?;
        }
        Ok(plan)
    }

    fn check(&self) -> Result<()> {
        if self.overlap_frames == 0 || self.chunk_frames <= self.overlap_frames {
            return Err(DrcError::InvalidChunking {
                reason: format!(
                    "chunk of {} frames cannot carry an overlap of {} frames",
                    self.chunk_frames, self.overlap_frames
                ),
            });
        }
        Ok(())
    }

    /// Frames a chunk advances past the previous one
    pub fn hop_frames(&self) -> usize {
        self.chunk_frames - self.overlap_frames
    }

    /// Number of chunks a signal of `total_frames` splits into
    pub fn chunk_count(&self, total_frames: usize) -> usize {
        if total_frames <= self.chunk_frames {
            1
        } else {
            1 + (total_frames - self.chunk_frames).div_ceil(self.hop_frames())
        }
    }
}

/// Split a buffer into overlapping chunks
///
/// # Errors
/// `InvalidChunking` if the durations are non-positive or the overlap is not
/// shorter than the chunk.
pub fn split(buffer: &AudioBuffer, chunk_duration_s: f64, overlap_s: f64) -> Result<Vec<Chunk>> {
    let plan = ChunkPlan::new(chunk_duration_s, overlap_s, buffer.sample_rate())?;
    Ok(split_with_plan(buffer, &plan))
}

/// Split a buffer according to an already validated plan
///
/// Chunks cover every frame with no gaps. The final chunk may be shorter than
/// the plan's chunk size but always extends past the previous chunk's
/// overlap. An empty buffer yields a single empty chunk.
pub fn split_with_plan(buffer: &AudioBuffer, plan: &ChunkPlan) -> Vec<Chunk> {
    let total = buffer.len();
    let mut chunks = Vec::with_capacity(plan.chunk_count(total));
    let mut start = 0;

    loop {
        let end = (start + plan.chunk_frames).min(total);
        let is_last = end >= total;
        chunks.push(Chunk {
            index: chunks.len(),
            offset: start,
            lead_overlap: if start == 0 { 0 } else { plan.overlap_frames },
            tail_overlap: if is_last { 0 } else { plan.overlap_frames },
            samples: buffer.slice_frames(start, end),
            sample_rate: buffer.sample_rate(),
            carried_state: EnvelopeState::neutral(),
        });
        if is_last {
            break;
        }
        start = end - plan.overlap_frames;
    }

    chunks
}

/// Reassemble processed chunks into one continuous buffer
///
/// Frames a chunk shares with its predecessor are cross-faded: at position
/// `k` of an `n`-frame overlap the incoming chunk weighs `(k + 1) / (n + 1)`
/// and the outgoing chunk the remainder.
///
/// # Errors
/// `InvalidChunking` if the sequence is empty, out of order, not contiguous,
/// or mixes channel counts or sample rates.
pub fn merge(chunks: &[Chunk]) -> Result<AudioBuffer> {
    let Some(first) = chunks.first() else {
        return Err(DrcError::InvalidChunking {
            reason: "nothing to merge".to_string(),
        });
    };
    let num_channels = first.num_channels();
    let sample_rate = first.sample_rate;

    let mut expected_offset = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.num_channels() != num_channels || chunk.sample_rate != sample_rate {
            return Err(DrcError::InvalidChunking {
                reason: format!("chunk {} does not match the layout of chunk 0", i),
            });
        }
        if chunk.offset != expected_offset || chunk.lead_overlap > chunk.len() {
            return Err(DrcError::InvalidChunking {
                reason: format!(
                    "chunk {} starts at frame {}, expected {}",
                    i, chunk.offset, expected_offset
                ),
            });
        }
        let end = chunk.offset + chunk.len();
        expected_offset = match chunks.get(i + 1) {
            Some(next) => end.checked_sub(next.lead_overlap).ok_or_else(|| DrcError::InvalidChunking {
                reason: format!("chunk {} overlaps past the start of the signal", i + 1),
            })?,
            None => end,
        };
    }

    let total = chunks.last().map(|c| c.offset + c.len()).unwrap_or(0);
    let mut output = vec![vec![0.0_f32; total]; num_channels];

    for chunk in chunks {
        let overlap = chunk.lead_overlap;
        for (dst, src) in output.iter_mut().zip(&chunk.samples) {
            let dst = &mut dst[chunk.offset..chunk.offset + src.len()];
            for (k, (out, &sample)) in dst.iter_mut().zip(src).enumerate() {
                if k < overlap {
                    let w = (k + 1) as f32 / (overlap + 1) as f32;
                    *out = *out * (1.0 - w) + sample * w;
                } else {
                    *out = sample;
                }
            }
        }
    }

    AudioBuffer::new(output, sample_rate)
}
