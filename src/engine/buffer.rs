//! Audio Buffer Management
//!
//! Provides the immutable audio buffer handed between callers and the job
//! orchestrator, plus the level helpers the compressor and tests rely on.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{DrcError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Floor used when converting silence to decibels
pub const MIN_LEVEL_DB: f32 = -120.0;

/// Valid sample range after gain application
pub const SAMPLE_MIN: f32 = -1.0;
pub const SAMPLE_MAX: f32 = 1.0;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns `MIN_LEVEL_DB` for zero or negative input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        MIN_LEVEL_DB
    } else {
        (20.0 * linear.log10()).max(MIN_LEVEL_DB)
    }
}

/// Convert a mean-square power value to decibels
#[inline]
pub fn power_to_db(power: f32) -> f32 {
    if power <= 0.0 {
        MIN_LEVEL_DB
    } else {
        (10.0 * power.log10()).max(MIN_LEVEL_DB)
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Immutable handle to a decoded signal
///
/// Stores audio as non-interleaved 32-bit floating point samples, one `Vec`
/// per channel. The sample storage is reference counted, so cloning a buffer
/// (for example when the orchestrator attaches it to a job) never copies audio.
///
/// # Example
/// ```
/// use drc_engine::engine::AudioBuffer;
///
/// let buffer = AudioBuffer::new(vec![vec![0.0; 48_000]; 2], 48_000).unwrap();
/// assert_eq!(buffer.num_channels(), 2);
/// assert_eq!(buffer.duration_secs(), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<Vec<Vec<f32>>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a buffer from per-channel sample vectors
    ///
    /// # Errors
    /// `InvalidAudio` if the sample rate is zero, there are no channels, or the
    /// channels differ in length.
    pub fn new(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(DrcError::InvalidAudio {
                reason: "sample rate must be positive".to_string(),
                source: None,
            });
        }
        let Some(first) = samples.first() else {
            return Err(DrcError::InvalidAudio {
                reason: "audio must have at least one channel".to_string(),
                source: None,
            });
        };
        let frames = first.len();
        if let Some((ch, data)) = samples.iter().enumerate().find(|(_, c)| c.len() != frames) {
            return Err(DrcError::InvalidAudio {
                reason: format!(
                    "channel {} has {} samples, channel 0 has {}",
                    ch,
                    data.len(),
                    frames
                ),
                source: None,
            });
        }

        Ok(Self {
            samples: Arc::new(samples),
            sample_rate,
        })
    }

    /// Create a silent buffer
    pub fn silence(num_channels: usize, num_samples: usize, sample_rate: u32) -> Result<Self> {
        Self::new(vec![vec![0.0; num_samples]; num_channels], sample_rate)
    }

    /// Create an audio buffer from interleaved sample data
    ///
    /// # Errors
    /// `InvalidAudio` if the data length is not divisible by the channel count.
    pub fn from_interleaved(interleaved: &[f32], num_channels: usize, sample_rate: u32) -> Result<Self> {
        if num_channels == 0 {
            return Err(DrcError::InvalidAudio {
                reason: "audio must have at least one channel".to_string(),
                source: None,
            });
        }
        if interleaved.len() % num_channels != 0 {
            return Err(DrcError::InvalidAudio {
                reason: format!(
                    "Interleaved data length {} is not divisible by channel count {}",
                    interleaved.len(),
                    num_channels
                ),
                source: None,
            });
        }

        let num_samples = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_samples); num_channels];
        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Self::new(samples, sample_rate)
    }

    /// Convert the buffer to interleaved format (L, R, L, R, ... for stereo)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut interleaved = Vec::with_capacity(self.num_channels() * self.len());
        for frame in 0..self.len() {
            for channel in self.samples.iter() {
                interleaved.push(channel[frame]);
            }
        }
        interleaved
    }

    /// Get the sample rate in Hz
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the number of channels
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer holds no samples
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    /// Get all channels
    #[inline]
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.samples
    }

    /// Get immutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Get a sample at the specified channel and index
    #[inline]
    pub fn get_sample(&self, channel: usize, index: usize) -> Option<f32> {
        self.samples.get(channel).and_then(|ch| ch.get(index).copied())
    }

    /// Copy a frame range of every channel
    pub(crate) fn slice_frames(&self, start: usize, end: usize) -> Vec<Vec<f32>> {
        self.samples.iter().map(|ch| ch[start..end].to_vec()).collect()
    }

    /// Peak level of one channel in dBFS
    pub fn peak_db(&self, channel: usize) -> f32 {
        let peak = self.samples[channel].iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        linear_to_db(peak)
    }

    /// RMS level of one channel in dBFS
    pub fn rms_db(&self, channel: usize) -> f32 {
        let data = &self.samples[channel];
        if data.is_empty() {
            return MIN_LEVEL_DB;
        }
        let sum_squares: f64 = data.iter().map(|&s| (s as f64) * (s as f64)).sum();
        linear_to_db((sum_squares / data.len() as f64).sqrt() as f32)
    }

    /// Largest absolute per-sample difference to another buffer
    ///
    /// Returns `None` when the shapes differ.
    pub fn max_abs_diff(&self, other: &AudioBuffer) -> Option<f32> {
        if self.num_channels() != other.num_channels() || self.len() != other.len() {
            return None;
        }
        let diff = self
            .samples
            .iter()
            .zip(other.samples.iter())
            .flat_map(|(a, b)| a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()))
            .fold(0.0_f32, f32::max);
        Some(diff)
    }

    /// SHA-256 over the sample rate, layout and raw sample bits
    ///
    /// Identical buffers always produce identical fingerprints, which makes the
    /// value suitable for reproducibility checks across runs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sample_rate.to_le_bytes());
        hasher.update((self.num_channels() as u64).to_le_bytes());
        hasher.update((self.len() as u64).to_le_bytes());
        for channel in self.samples.iter() {
            for sample in channel {
                hasher.update(sample.to_bits().to_le_bytes());
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}
