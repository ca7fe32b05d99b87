//! Compressor core
//!
//! A feed-forward, stereo-linked dynamics processor. Per frame:
//!
//! 1. Level detection: mean power across channels fed through a one-pole
//!    mean-square smoother (`RMS_WINDOW_MS`), read as dBFS.
//! 2. Gain computer: above the threshold, the target gain reduction is
//!    `(level_db - threshold_db) * (1 - 1/ratio)` dB.
//! 3. Asymmetric one-pole smoothing of the gain reduction: the attack constant
//!    while reduction grows, the release constant while it recovers.
//! 4. The linear gain is applied to every channel and the result is clipped to
//!    the valid sample range.
//!
//! Steps 1-3 are inherently sequential and shared by both backends through
//! [`CompressorCore::gain_curve`]; the reference kernel in this file does the
//! per-sample arithmetic on the host.

use serde::{Deserialize, Serialize};

use super::chunker::Chunk;
use crate::engine::buffer::{power_to_db, SAMPLE_MAX, SAMPLE_MIN};
use crate::error::{DrcError, Result};

/// Time constant of the RMS detector in milliseconds
pub const RMS_WINDOW_MS: f32 = 5.0;

/// Compression parameters with validation ranges
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionParams {
    /// Threshold level in dB (-60 to 0 dB)
    pub threshold_db: f32,
    /// Compression ratio (1.0 to 20.0, representing 1:1 to 20:1)
    pub ratio: f32,
    /// Attack time in milliseconds (0.1 to 50 ms)
    pub attack_ms: f32,
    /// Release time in milliseconds (10 to 500 ms)
    pub release_ms: f32,
}

impl Default for CompressionParams {
    fn default() -> Self {
        Self {
            threshold_db: -20.0,
            ratio: 4.0,
            attack_ms: 5.0,
            release_ms: 50.0,
        }
    }
}

impl CompressionParams {
    pub const THRESHOLD_RANGE_DB: (f32, f32) = (-60.0, 0.0);
    pub const RATIO_RANGE: (f32, f32) = (1.0, 20.0);
    pub const ATTACK_RANGE_MS: (f32, f32) = (0.1, 50.0);
    pub const RELEASE_RANGE_MS: (f32, f32) = (10.0, 500.0);

    /// Validate parameters against their declared ranges
    ///
    /// # Errors
    /// `InvalidParameter` naming the first offending field. A ratio below 1
    /// would expand rather than compress and is rejected like any other
    /// out-of-range value.
    pub fn validate(&self) -> Result<()> {
        check_range("threshold_db", self.threshold_db, Self::THRESHOLD_RANGE_DB, "dB")?;
        check_range("ratio", self.ratio, Self::RATIO_RANGE, ":1")?;
        check_range("attack_ms", self.attack_ms, Self::ATTACK_RANGE_MS, "ms")?;
        check_range("release_ms", self.release_ms, Self::RELEASE_RANGE_MS, "ms")?;
        Ok(())
    }
}

fn check_range(param: &str, value: f32, (min, max): (f32, f32), unit: &str) -> Result<()> {
    // NaN fails both comparisons, so test for membership rather than exclusion
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(DrcError::invalid_parameter(
            param,
            value,
            &format!("{} to {} {}", min, max, unit),
        ))
    }
}

/// Envelope-follower state carried from one chunk into the next
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeState {
    /// Smoothed gain reduction in dB (0 = no reduction)
    pub gain_reduction_db: f32,
    /// Running mean-square power of the RMS detector
    pub detector_power: f32,
}

impl EnvelopeState {
    /// Starting state of the first chunk: no gain reduction, silent detector
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Current linear gain multiplier
    pub fn gain(&self) -> f32 {
        gain_from_reduction(self.gain_reduction_db)
    }
}

#[inline]
fn gain_from_reduction(reduction_db: f32) -> f32 {
    10.0_f32.powf(-reduction_db / 20.0)
}

/// One-pole coefficient for a time constant at a sample rate
#[inline]
fn one_pole_coeff(time_ms: f32, sample_rate: u32) -> f32 {
    let samples = (time_ms / 1000.0) * sample_rate as f32;
    if samples > 0.0 {
        (-1.0 / samples).exp()
    } else {
        0.0
    }
}

/// Sample-rate-resolved compressor: parameters plus smoothing coefficients
#[derive(Debug, Clone, Copy)]
pub struct CompressorCore {
    params: CompressionParams,
    attack_coeff: f32,
    release_coeff: f32,
    detector_coeff: f32,
}

impl CompressorCore {
    pub fn new(params: &CompressionParams, sample_rate: u32) -> Self {
        Self {
            params: *params,
            attack_coeff: one_pole_coeff(params.attack_ms, sample_rate),
            release_coeff: one_pole_coeff(params.release_ms, sample_rate),
            detector_coeff: one_pole_coeff(RMS_WINDOW_MS, sample_rate),
        }
    }

    pub fn params(&self) -> &CompressionParams {
        &self.params
    }

    /// Static transfer curve: target gain reduction in dB for a detected level
    pub fn target_reduction_db(&self, level_db: f32) -> f32 {
        if level_db <= self.params.threshold_db {
            0.0
        } else {
            (level_db - self.params.threshold_db) * (1.0 - 1.0 / self.params.ratio)
        }
    }

    /// Run the detector and gain smoother over per-frame channel power
    ///
    /// Returns one linear gain per frame and the envelope state observed right
    /// after frame `handoff - 1`, i.e. the state the chunk starting at
    /// `handoff` must inherit. `handoff` is clamped to the frame count.
    pub fn gain_curve(
        &self,
        frame_power: &[f32],
        carried: EnvelopeState,
        handoff: usize,
    ) -> (Vec<f32>, EnvelopeState) {
        let handoff = handoff.min(frame_power.len());
        let mut state = carried;
        let mut handed_off = carried;
        let mut gains = Vec::with_capacity(frame_power.len());

        for (frame, &power) in frame_power.iter().enumerate() {
            state.detector_power =
                self.detector_coeff * state.detector_power + (1.0 - self.detector_coeff) * power;
            let target = self.target_reduction_db(power_to_db(state.detector_power));

            let coeff = if target > state.gain_reduction_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            state.gain_reduction_db = coeff * state.gain_reduction_db + (1.0 - coeff) * target;
            gains.push(gain_from_reduction(state.gain_reduction_db));

            if frame + 1 == handoff {
                handed_off = state;
            }
        }

        (gains, handed_off)
    }
}

/// Mean power across channels for every frame
pub(crate) fn frame_power(channels: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = channels.first() else {
        return Vec::new();
    };
    let frames = first.len();
    let scale = 1.0 / channels.len() as f32;
    (0..frames)
        .map(|frame| {
            let sum: f32 = channels.iter().map(|ch| ch[frame] * ch[frame]).sum();
            sum * scale
        })
        .collect()
}

/// Reference scalar kernel
///
/// Processes one chunk starting from `carried` and returns the processed chunk
/// (which records the state it started from) together with the state the next
/// chunk inherits.
pub fn process(
    chunk: &Chunk,
    params: &CompressionParams,
    carried: EnvelopeState,
) -> Result<(Chunk, EnvelopeState)> {
    chunk.validate()?;
    let core = CompressorCore::new(params, chunk.sample_rate);
    let power = frame_power(&chunk.samples);
    let (gains, next) = core.gain_curve(&power, carried, chunk.handoff());

    let samples = chunk
        .samples
        .iter()
        .map(|channel| {
            channel
                .iter()
                .zip(&gains)
                .map(|(&s, &g)| (s * g).clamp(SAMPLE_MIN, SAMPLE_MAX))
                .collect()
        })
        .collect();

    Ok((chunk.with_samples(samples, carried), next))
}
