//! Job Lifecycle Tests
//!
//! Submit → poll → result through the orchestrator, including cancellation,
//! admission control and accelerator fault recovery.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::runtime::Handle;

use drc_engine::device::{Accelerator, AcceleratorHandle, Backend, CandleAccelerator, DeviceDispatch};
use drc_engine::dsp::CompressionParams;
use drc_engine::engine::signal::sine;
use drc_engine::engine::AudioBuffer;
use drc_engine::jobs::{CancelAck, JobErrorKind, JobId, JobOrchestrator, JobState};
use drc_engine::{DrcError, EngineConfig, Result};

/// Blocks kernel launches until opened; opens itself after a few seconds so a
/// failing test cannot hang the runtime
#[derive(Clone, Default)]
struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    fn open(&self) {
        let (lock, cvar) = &*self.0;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn pass(&self) {
        let (lock, cvar) = &*self.0;
        let guard = lock.lock().unwrap();
        let _ = cvar
            .wait_timeout_while(guard, Duration::from_secs(10), |open| !*open)
            .unwrap();
    }
}

struct GatedAccelerator {
    gate: Gate,
    inner: CandleAccelerator,
}

impl Accelerator for GatedAccelerator {
    fn name(&self) -> String {
        "gated".to_string()
    }

    fn frame_power(&mut self, channels: &[Vec<f32>]) -> Result<Vec<f32>> {
        self.gate.pass();
        self.inner.frame_power(channels)
    }

    fn apply_gains(&mut self, channels: &[Vec<f32>], gains: &[f32]) -> Result<Vec<Vec<f32>>> {
        self.inner.apply_gains(channels, gains)
    }
}

/// Accelerator that faults on its third launch
struct FlakyAccelerator {
    launches: usize,
    inner: CandleAccelerator,
}

impl Accelerator for FlakyAccelerator {
    fn name(&self) -> String {
        "flaky".to_string()
    }

    fn frame_power(&mut self, channels: &[Vec<f32>]) -> Result<Vec<f32>> {
        self.launches += 1;
        if self.launches == 3 {
            return Err(DrcError::DeviceFault {
                reason: "CUDA_ERROR_ILLEGAL_ADDRESS".to_string(),
            });
        }
        self.inner.frame_power(channels)
    }

    fn apply_gains(&mut self, channels: &[Vec<f32>], gains: &[f32]) -> Result<Vec<Vec<f32>>> {
        self.inner.apply_gains(channels, gains)
    }
}

fn config(max_concurrent_jobs: usize) -> EngineConfig {
    EngineConfig {
        chunk_duration_s: 0.25,
        overlap_s: 0.01,
        max_concurrent_jobs,
        ..Default::default()
    }
}

fn gated_engine(max_concurrent_jobs: usize) -> (JobOrchestrator, Gate) {
    gated_engine_with(config(max_concurrent_jobs))
}

fn gated_engine_with(config: EngineConfig) -> (JobOrchestrator, Gate) {
    let gate = Gate::default();
    let accelerator = GatedAccelerator {
        gate: gate.clone(),
        inner: CandleAccelerator::cpu(),
    };
    let dispatch = DeviceDispatch::with_accelerator(AcceleratorHandle::new(accelerator));
    let engine = JobOrchestrator::with_dispatch(config, dispatch, Handle::current()).unwrap();
    (engine, gate)
}

fn reference_engine() -> JobOrchestrator {
    JobOrchestrator::with_dispatch(config(2), DeviceDispatch::reference(), Handle::current()).unwrap()
}

fn test_tone() -> AudioBuffer {
    sine(1000.0, -6.0, 1.0, 44100, 2).unwrap()
}

async fn wait_for_state(engine: &JobOrchestrator, id: JobId, state: JobState) {
    for _ in 0..500 {
        if engine.status(id).unwrap().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached {}", id, state);
}

// === Happy Path ===

#[tokio::test]
async fn test_queued_running_completed() {
    let (engine, gate) = gated_engine(2);
    let input = test_tone();
    let params = CompressionParams {
        threshold_db: -20.0,
        ratio: 4.0,
        attack_ms: 5.0,
        release_ms: 50.0,
    };

    let id = engine.submit(input.clone(), params).unwrap();
    let queued = engine.status(id).unwrap();
    assert_eq!(queued.state, JobState::Queued);
    assert_eq!(queued.progress, 0.0);
    assert!(matches!(engine.result(id), Err(DrcError::JobNotComplete { state: JobState::Queued, .. })));

    wait_for_state(&engine, id, JobState::Running).await;
    let running = engine.status(id).unwrap();
    assert!(running.started_at.is_some());
    assert!(running.chunks_total >= 4);
    assert!(matches!(engine.reclaim(id), Err(DrcError::JobNotComplete { .. })));

    gate.open();
    let done = engine.wait(id).await.unwrap();
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.progress, 1.0);
    assert_eq!(done.backend, Backend::Accelerated);
    assert!(!done.degraded);
    assert!(done.error.is_none());
    assert!(done.finished_at.unwrap() >= done.started_at.unwrap());

    let result = engine.result(id).unwrap();
    assert_eq!(result.len(), input.len());
    assert_eq!(result.num_channels(), 2);
    assert!(result.rms_db(0) < input.rms_db(0) - 3.0);
    assert_eq!(done.result_fingerprint, Some(result.fingerprint()));
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let engine = reference_engine();
    let id = engine.submit(test_tone(), CompressionParams::default()).unwrap();

    let mut last = 0.0;
    loop {
        let snapshot = engine.status(id).unwrap();
        assert!(snapshot.progress >= last);
        last = snapshot.progress;
        if snapshot.state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(last, 1.0);
}

// === Polling Errors ===

#[tokio::test]
async fn test_invalid_ratio_creates_no_job() {
    let engine = reference_engine();
    let params = CompressionParams {
        ratio: 0.5,
        ..Default::default()
    };

    let err = engine.submit(test_tone(), params).unwrap_err();
    assert!(matches!(err, DrcError::InvalidParameter { ref param, .. } if param == "ratio"));
    assert!(engine.list().is_empty());
}

#[tokio::test]
async fn test_unknown_job() {
    let engine = reference_engine();
    let err = engine.status(JobId::new()).unwrap_err();
    assert_eq!(err.error_code(), "UNKNOWN_JOB");
}

// === Cancellation ===

#[tokio::test]
async fn test_cancel_running_job() {
    let (engine, gate) = gated_engine(1);
    let id = engine.submit(test_tone(), CompressionParams::default()).unwrap();
    wait_for_state(&engine, id, JobState::Running).await;

    assert_eq!(engine.cancel(id).unwrap(), CancelAck::Requested);
    gate.open();

    let done = engine.wait(id).await.unwrap();
    assert_eq!(done.state, JobState::Failed);
    assert_eq!(done.error.as_ref().map(|e| e.kind), Some(JobErrorKind::Cancelled));
    assert!(done.chunks_done < done.chunks_total);
    assert!(matches!(
        engine.result(id),
        Err(DrcError::JobFailed { ref error, .. }) if error.kind == JobErrorKind::Cancelled
    ));
}

#[tokio::test]
async fn test_cancel_during_final_chunk() {
    // the whole tone fits in one chunk, so the only chunk is also the last
    let (engine, gate) = gated_engine_with(EngineConfig {
        chunk_duration_s: 2.0,
        overlap_s: 0.01,
        max_concurrent_jobs: 1,
        ..Default::default()
    });
    let id = engine.submit(test_tone(), CompressionParams::default()).unwrap();
    wait_for_state(&engine, id, JobState::Running).await;
    assert_eq!(engine.status(id).unwrap().chunks_total, 1);

    assert_eq!(engine.cancel(id).unwrap(), CancelAck::Requested);
    gate.open();

    let done = engine.wait(id).await.unwrap();
    assert_eq!(done.state, JobState::Failed);
    assert_eq!(done.error.as_ref().map(|e| e.kind), Some(JobErrorKind::Cancelled));
    assert!(done.result_fingerprint.is_none());
    assert!(matches!(
        engine.result(id),
        Err(DrcError::JobFailed { ref error, .. }) if error.kind == JobErrorKind::Cancelled
    ));
}

#[tokio::test]
async fn test_cancel_queued_job_never_runs() {
    let (engine, gate) = gated_engine(1);
    let first = engine.submit(test_tone(), CompressionParams::default()).unwrap();
    let second = engine.submit(test_tone(), CompressionParams::default()).unwrap();
    wait_for_state(&engine, first, JobState::Running).await;

    assert_eq!(engine.cancel(second).unwrap(), CancelAck::Cancelled);
    let cancelled = engine.status(second).unwrap();
    assert_eq!(cancelled.state, JobState::Failed);
    assert!(cancelled.started_at.is_none());

    gate.open();
    assert_eq!(engine.wait(first).await.unwrap().state, JobState::Completed);
    let after = engine.status(second).unwrap();
    assert_eq!(after.state, JobState::Failed);
    assert!(after.started_at.is_none());
    assert_eq!(engine.cancel(second).unwrap(), CancelAck::AlreadyFinished);
}

// === Admission Control ===

#[tokio::test]
async fn test_second_job_waits_for_a_slot() {
    let (engine, gate) = gated_engine(1);
    let first = engine.submit(test_tone(), CompressionParams::default()).unwrap();
    let second = engine.submit(test_tone(), CompressionParams::default()).unwrap();

    wait_for_state(&engine, first, JobState::Running).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.status(second).unwrap().state, JobState::Queued);

    let health = engine.health();
    assert_eq!(health.running, 1);
    assert_eq!(health.queued, 1);
    assert_eq!(health.available_slots, 0);
    assert_eq!(health.accelerator.as_deref(), Some("gated"));

    gate.open();
    assert_eq!(engine.wait(first).await.unwrap().state, JobState::Completed);
    assert_eq!(engine.wait(second).await.unwrap().state, JobState::Completed);
    assert_eq!(engine.list().len(), 2);
}

// === Degradation ===

#[tokio::test]
async fn test_device_fault_degrades_to_reference() {
    let flaky = FlakyAccelerator {
        launches: 0,
        inner: CandleAccelerator::cpu(),
    };
    let dispatch = DeviceDispatch::with_accelerator(AcceleratorHandle::new(flaky));
    let engine = JobOrchestrator::with_dispatch(config(1), dispatch, Handle::current()).unwrap();
    let input = test_tone();

    let id = engine.submit(input.clone(), CompressionParams::default()).unwrap();
    let done = engine.wait(id).await.unwrap();

    assert_eq!(done.state, JobState::Completed);
    assert!(done.degraded);
    assert_eq!(done.backend, Backend::Reference);

    let reference = reference_engine();
    let baseline = reference.submit(input, CompressionParams::default()).unwrap();
    reference.wait(baseline).await.unwrap();

    let degraded = engine.result(id).unwrap();
    let expected = reference.result(baseline).unwrap();
    assert!(degraded.max_abs_diff(&expected).unwrap() <= drc_engine::device::PARITY_TOLERANCE);
}
