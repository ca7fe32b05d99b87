//! Accelerated compressor kernel
//!
//! The per-frame arithmetic (channel power and gain application) runs as
//! candle tensor ops on the device. The envelope recursion is sequential and
//! stays on the host in [`CompressorCore::gain_curve`], which keeps both
//! backends on one numerical contract.

use std::sync::Arc;

use candle_core::{Device, Tensor};
use parking_lot::Mutex;

use crate::dsp::compressor::{CompressionParams, CompressorCore, EnvelopeState};
use crate::dsp::Chunk;
use crate::engine::buffer::{SAMPLE_MAX, SAMPLE_MIN};
use crate::error::Result;

/// Device context used by the accelerated path
///
/// `&mut self` reflects that kernel launches on one device context must not
/// interleave; all access goes through [`AcceleratorHandle`]'s mutex.
pub trait Accelerator: Send + 'static {
    /// Name of the device, for logs and health reports
    fn name(&self) -> String;

    /// Mean power across channels for every frame
    ///
    /// # Errors
    /// `DeviceFault` if the device rejects the work.
    fn frame_power(&mut self, channels: &[Vec<f32>]) -> Result<Vec<f32>>;

    /// Multiply every channel by the per-frame gains and clip to [-1, 1]
    ///
    /// # Errors
    /// `DeviceFault` if the device rejects the work.
    fn apply_gains(&mut self, channels: &[Vec<f32>], gains: &[f32]) -> Result<Vec<Vec<f32>>>;
}

/// Shared, exclusively-locked accelerator
#[derive(Clone)]
pub struct AcceleratorHandle(pub Arc<Mutex<dyn Accelerator>>);

impl AcceleratorHandle {
    pub fn new<A: Accelerator>(accelerator: A) -> Self {
        Self(Arc::new(Mutex::new(accelerator)))
    }

    pub fn name(&self) -> String {
        self.0.lock().name()
    }
}

impl std::fmt::Debug for AcceleratorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceleratorHandle").finish_non_exhaustive()
    }
}

/// Candle-backed accelerator
#[derive(Debug)]
pub struct CandleAccelerator {
    device: Device,
}

impl CandleAccelerator {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    /// Tensor kernels on the host CPU; always available
    pub fn cpu() -> Self {
        Self::new(Device::Cpu)
    }

    /// Open the first GPU candle can reach
    pub fn gpu() -> Option<Self> {
        Device::new_cuda(0)
            .or_else(|_| Device::new_metal(0))
            .ok()
            .map(Self::new)
    }

    fn upload(&self, channels: &[Vec<f32>]) -> Result<Tensor> {
        let frames = channels.first().map(Vec::len).unwrap_or(0);
        let flat: Vec<f32> = channels.iter().flatten().copied().collect();
        Ok(Tensor::from_vec(flat, (channels.len(), frames), &self.device)?)
    }
}

impl Accelerator for CandleAccelerator {
    fn name(&self) -> String {
        match &self.device {
            Device::Cpu => "candle-cpu".to_string(),
            other => format!("candle-{:?}", other.location()),
        }
    }

    fn frame_power(&mut self, channels: &[Vec<f32>]) -> Result<Vec<f32>> {
        if channels.is_empty() || channels[0].is_empty() {
            return Ok(Vec::new());
        }
        let scale = 1.0 / channels.len() as f64;
        let power = self.upload(channels)?.sqr()?.sum(0)?.affine(scale, 0.0)?;
        Ok(power.to_vec1::<f32>()?)
    }

    fn apply_gains(&mut self, channels: &[Vec<f32>], gains: &[f32]) -> Result<Vec<Vec<f32>>> {
        if channels.is_empty() || channels[0].is_empty() {
            return Ok(channels.to_vec());
        }
        let gains = Tensor::from_slice(gains, (1, gains.len()), &self.device)?;
        let out = self
            .upload(channels)?
            .broadcast_mul(&gains)?
            .clamp(SAMPLE_MIN, SAMPLE_MAX)?;
        Ok(out.to_vec2::<f32>()?)
    }
}

/// Process one chunk on an accelerator
///
/// Holds the accelerator lock for the whole chunk so another job's launches
/// cannot interleave with this one.
pub fn process(
    accelerator: &AcceleratorHandle,
    chunk: &Chunk,
    params: &CompressionParams,
    carried: EnvelopeState,
) -> Result<(Chunk, EnvelopeState)> {
    chunk.validate()?;
    let core = CompressorCore::new(params, chunk.sample_rate);
    let mut device = accelerator.0.lock();

    let power = device.frame_power(&chunk.samples)?;
    let (gains, next) = core.gain_curve(&power, carried, chunk.handoff());
    let samples = device.apply_gains(&chunk.samples, &gains)?;

    Ok((chunk.with_samples(samples, carried), next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::compressor;
    use crate::dsp::split;
    use crate::engine::signal::sine;
    use approx::assert_relative_eq;

    #[test]
    fn test_frame_power_matches_host() {
        let mut acc = CandleAccelerator::cpu();
        let channels = vec![vec![0.5, -1.0, 0.0], vec![0.5, 0.0, 0.25]];
        let power = acc.frame_power(&channels).unwrap();
        let expected = compressor::frame_power(&channels);

        assert_eq!(power.len(), 3);
        for (a, b) in power.iter().zip(&expected) {
            assert_relative_eq!(*a, *b, epsilon = 1e-7);
        }
        assert_relative_eq!(power[0], 0.25);
        assert_relative_eq!(power[1], 0.5);
    }

    #[test]
    fn test_apply_gains_broadcasts_and_clips() {
        let mut acc = CandleAccelerator::cpu();
        let channels = vec![vec![0.5, 0.9], vec![-0.5, -0.9]];
        let out = acc.apply_gains(&channels, &[0.5, 2.0]).unwrap();
        assert_eq!(out, vec![vec![0.25, 1.0], vec![-0.25, -1.0]]);
    }

    #[test]
    fn test_empty_input() {
        let mut acc = CandleAccelerator::cpu();
        let empty = vec![Vec::new(), Vec::new()];
        assert!(acc.frame_power(&empty).unwrap().is_empty());
        assert_eq!(acc.apply_gains(&empty, &[]).unwrap(), empty);
    }

    #[test]
    fn test_chunk_matches_reference_kernel() {
        let tone = sine(1000.0, -3.0, 0.1, 16000, 2).unwrap();
        let chunk = split(&tone, 1.0, 0.01).unwrap().remove(0);
        let params = CompressionParams::default();
        let handle = AcceleratorHandle::new(CandleAccelerator::cpu());

        let (fast, fast_state) = process(&handle, &chunk, &params, EnvelopeState::neutral()).unwrap();
        let (slow, slow_state) = compressor::process(&chunk, &params, EnvelopeState::neutral()).unwrap();

        assert_relative_eq!(fast_state.gain_reduction_db, slow_state.gain_reduction_db, epsilon = 1e-3);
        for (a, b) in fast.samples.iter().flatten().zip(slow.samples.iter().flatten()) {
            assert!((a - b).abs() <= crate::device::PARITY_TOLERANCE);
        }
        assert_eq!(handle.name(), "candle-cpu");
    }
}
