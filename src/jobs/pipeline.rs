//! Chunk → compress → merge pipeline for a single job
//!
//! Runs synchronously on a blocking worker. Chunks are processed strictly in
//! order because each one inherits the envelope state the previous one hands
//! off.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::device::{Backend, DeviceDispatch};
use crate::dsp::{merge, split_with_plan, ChunkPlan, CompressionParams, EnvelopeState};
use crate::engine::AudioBuffer;
use crate::error::{DrcError, Result};

/// Compress a whole buffer
///
/// `backend` is the job's backend cursor; it may move to `Reference` if the
/// accelerator faults. `cancel` is checked before every chunk and once more
/// after the last one; `on_chunk(chunks_done, backend)` is called after every
/// chunk.
///
/// # Errors
/// `Cancelled` if the flag was raised before a chunk or after the last one, `InvalidChunking` if
/// reassembly finds an inconsistent sequence, or any non-recoverable kernel
/// error.
pub fn run_pipeline<F>(
    input: &AudioBuffer,
    params: &CompressionParams,
    plan: &ChunkPlan,
    dispatch: &DeviceDispatch,
    backend: &mut Backend,
    cancel: &AtomicBool,
    mut on_chunk: F,
) -> Result<AudioBuffer>
where
    F: FnMut(usize, Backend),
{
    let chunks = split_with_plan(input, plan);
    let mut processed = Vec::with_capacity(chunks.len());
    let mut carried = EnvelopeState::neutral();

    for mut chunk in chunks {
        if cancel.load(Ordering::Acquire) {
            return Err(DrcError::Cancelled);
        }
        chunk.carried_state = carried;
        let (out, next) = dispatch.run(&chunk, params, carried, backend)?;
        debug!(
            chunk = chunk.index,
            frames = chunk.len(),
            backend = %backend,
            gain_reduction_db = next.gain_reduction_db,
            "chunk processed"
        );
        carried = next;
        processed.push(out);
        on_chunk(processed.len(), *backend);
    }

    if cancel.load(Ordering::Acquire) {
        return Err(DrcError::Cancelled);
    }
    merge(&processed)
}

/// Compress a buffer in one call, without cancellation or progress reporting
pub fn compress(
    input: &AudioBuffer,
    params: &CompressionParams,
    plan: &ChunkPlan,
    dispatch: &DeviceDispatch,
) -> Result<AudioBuffer> {
    params.validate()?;
    let mut backend = dispatch.backend();
    run_pipeline(input, params, plan, dispatch, &mut backend, &AtomicBool::new(false), |_, _| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signal::sine;

    #[test]
    fn test_progress_is_reported_per_chunk() {
        let tone = sine(1000.0, -6.0, 0.5, 8000, 1).unwrap();
        let plan = ChunkPlan::new(0.1, 0.01, 8000).unwrap();
        let mut seen = Vec::new();
        let mut backend = Backend::Reference;

        let out = run_pipeline(
            &tone,
            &CompressionParams::default(),
            &plan,
            &DeviceDispatch::reference(),
            &mut backend,
            &AtomicBool::new(false),
            |done, _| seen.push(done),
        )
        .unwrap();

        assert_eq!(out.len(), tone.len());
        assert_eq!(seen, (1..=plan.chunk_count(tone.len())).collect::<Vec<_>>());
    }

    #[test]
    fn test_raised_flag_stops_before_first_chunk() {
        let tone = sine(1000.0, -6.0, 0.2, 8000, 1).unwrap();
        let plan = ChunkPlan::new(0.1, 0.01, 8000).unwrap();
        let mut calls = 0;
        let err = run_pipeline(
            &tone,
            &CompressionParams::default(),
            &plan,
            &DeviceDispatch::reference(),
            &mut Backend::Reference,
            &AtomicBool::new(true),
            |_, _| calls += 1,
        )
        .unwrap_err();

        assert!(matches!(err, DrcError::Cancelled));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_flag_raised_during_last_chunk_cancels() {
        let tone = sine(1000.0, -6.0, 0.2, 8000, 1).unwrap();
        let plan = ChunkPlan::new(0.1, 0.01, 8000).unwrap();
        let total = plan.chunk_count(tone.len());
        let cancel = AtomicBool::new(false);
        let mut calls = 0;

        let err = run_pipeline(
            &tone,
            &CompressionParams::default(),
            &plan,
            &DeviceDispatch::reference(),
            &mut Backend::Reference,
            &cancel,
            |done, _| {
                calls += 1;
                if done == total {
                    cancel.store(true, Ordering::Release);
                }
            },
        )
        .unwrap_err();

        assert!(matches!(err, DrcError::Cancelled));
        assert_eq!(calls, total);
    }

    #[test]
    fn test_compress_rejects_invalid_params() {
        let tone = sine(1000.0, -6.0, 0.1, 8000, 1).unwrap();
        let plan = ChunkPlan::new(0.05, 0.01, 8000).unwrap();
        let params = CompressionParams {
            ratio: 0.5,
            ..Default::default()
        };
        assert!(compress(&tone, &params, &plan, &DeviceDispatch::reference()).is_err());
    }
}
