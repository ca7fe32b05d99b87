//! Synthetic test signals
//!
//! Deterministic generators for the signal corpus used by parity and
//! regression tests: silence, sine tones at a given level, and clipped noise.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::buffer::{db_to_linear, AudioBuffer};
use crate::error::{DrcError, Result};

fn frames_for(duration_secs: f64, sample_rate: u32) -> usize {
    (duration_secs * sample_rate as f64).round() as usize
}

/// Generate a sine tone with a peak level of `level_db` dBFS on every channel
///
/// # Errors
/// `InvalidAudio` if `sample_rate` or `num_channels` is zero.
pub fn sine(
    frequency: f32,
    level_db: f32,
    duration_secs: f64,
    sample_rate: u32,
    num_channels: usize,
) -> Result<AudioBuffer> {
    let amplitude = db_to_linear(level_db);
    let angular_freq = 2.0 * std::f64::consts::PI * frequency as f64 / sample_rate as f64;
    let channel: Vec<f32> = (0..frames_for(duration_secs, sample_rate))
        .map(|i| amplitude * (angular_freq * i as f64).sin() as f32)
        .collect();

    AudioBuffer::new(vec![channel; num_channels], sample_rate)
}

/// Generate digital silence
///
/// # Errors
/// `InvalidAudio` if `sample_rate` or `num_channels` is zero.
pub fn silence(duration_secs: f64, sample_rate: u32, num_channels: usize) -> Result<AudioBuffer> {
    AudioBuffer::silence(num_channels, frames_for(duration_secs, sample_rate), sample_rate)
}

/// Generate uniform white noise driven past full scale and hard clipped
///
/// `drive` scales the noise before clipping; values above 1.0 produce runs of
/// samples pinned at ±1. The same seed always yields the same buffer.
///
/// # Errors
/// `InvalidAudio` if `sample_rate` or `num_channels` is zero.
pub fn clipped_noise(
    drive: f32,
    duration_secs: f64,
    sample_rate: u32,
    num_channels: usize,
    seed: u64,
) -> Result<AudioBuffer> {
    let mut rng = StdRng::seed_from_u64(seed);
    let frames = frames_for(duration_secs, sample_rate);
    let channels = (0..num_channels)
        .map(|_| {
            (0..frames)
                .map(|_| (rng.gen_range(-1.0_f32..1.0) * drive).clamp(-1.0, 1.0))
                .collect()
        })
        .collect();

    AudioBuffer::new(channels, sample_rate)
}

/// Concatenate buffers with identical layout end to end
///
/// Handy for building signals with abrupt level changes (quiet → loud →
/// quiet) that exercise both attack and release.
///
/// # Errors
/// `InvalidAudio` if `parts` is empty or the layouts differ.
pub fn concat(parts: &[AudioBuffer]) -> Result<AudioBuffer> {
    let Some(first) = parts.first() else {
        return Err(DrcError::InvalidAudio {
            reason: "nothing to concatenate".to_string(),
            source: None,
        });
    };
    let mut channels = vec![Vec::new(); first.num_channels()];
    for part in parts {
        if part.num_channels() != first.num_channels() || part.sample_rate() != first.sample_rate() {
            return Err(DrcError::InvalidAudio {
                reason: "concatenated parts must share channel count and sample rate".to_string(),
                source: None,
            });
        }
        for (dst, src) in channels.iter_mut().zip(part.channels()) {
            dst.extend_from_slice(src);
        }
    }
    AudioBuffer::new(channels, first.sample_rate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sine_level_and_length() {
        let tone = sine(1000.0, -6.0, 1.0, 48000, 1).unwrap();
        assert_eq!(tone.len(), 48000);
        assert_relative_eq!(tone.peak_db(0), -6.0, epsilon = 0.05);
        // RMS of a sine sits 3 dB below its peak
        assert_relative_eq!(tone.rms_db(0), -9.01, epsilon = 0.05);
    }

    #[test]
    fn test_clipped_noise_is_deterministic_and_bounded() {
        let a = clipped_noise(4.0, 0.1, 8000, 2, 7).unwrap();
        let b = clipped_noise(4.0, 0.1, 8000, 2, 7).unwrap();
        assert_eq!(a, b);
        assert!(a.channel(0).iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(a.channel(0).iter().any(|s| s.abs() == 1.0));
    }

    #[test]
    fn test_concat() {
        let joined = concat(&[
            silence(0.1, 8000, 1).unwrap(),
            sine(440.0, -3.0, 0.2, 8000, 1).unwrap(),
        ])
        .unwrap();
        assert_eq!(joined.len(), 2400);
        assert_eq!(joined.get_sample(0, 100), Some(0.0));

        let mismatched = concat(&[silence(0.1, 8000, 1).unwrap(), silence(0.1, 16000, 1).unwrap()]);
        assert!(mismatched.is_err());
    }
}
