//! Asynchronous job orchestrator
//!
//! `submit` records a job and returns at once; the work runs on the tokio
//! runtime behind a semaphore that caps how many jobs run together. Callers
//! poll `status`, fetch with `result`, or await `wait` when they really do
//! want to block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use super::job::{Job, JobError, JobErrorKind, JobId, JobSnapshot, JobState};
use super::pipeline::run_pipeline;
use crate::config::EngineConfig;
use crate::device::{AcceleratorInfo, Backend, DeviceDispatch};
use crate::dsp::{ChunkPlan, CompressionParams};
use crate::engine::AudioBuffer;
use crate::error::{DrcError, Result};

/// Outcome of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAck {
    /// The job was still queued and is now Failed(Cancelled)
    Cancelled,
    /// The job is running and stops at the next chunk boundary
    Requested,
    /// The job had already finished; nothing changed
    AlreadyFinished,
}

/// Summary of engine load and backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineHealth {
    pub backend: Backend,
    pub accelerator: Option<String>,
    pub max_concurrent_jobs: usize,
    pub available_slots: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

struct JobEntry {
    job: Mutex<Job>,
    cancel: AtomicBool,
    state_tx: watch::Sender<JobState>,
}

impl JobEntry {
    fn new(job: Job) -> Self {
        let (state_tx, _) = watch::channel(job.state);
        Self {
            job: Mutex::new(job),
            cancel: AtomicBool::new(false),
            state_tx,
        }
    }

    /// Apply a change under the job lock and publish the resulting state
    fn update<T>(&self, f: impl FnOnce(&mut Job) -> T) -> T {
        let mut job = self.job.lock();
        let out = f(&mut job);
        self.state_tx.send_replace(job.state);
        out
    }
}

struct Inner {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    dispatch: Arc<DeviceDispatch>,
    config: EngineConfig,
    memory_budget_bytes: usize,
    slots: Arc<Semaphore>,
    runtime: Handle,
}

/// Tracks compression jobs and runs them off the caller's path
///
/// Cloning is cheap; clones share the same job table.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    /// Build an orchestrator on the current tokio runtime
    ///
    /// Probes the accelerator (once per process) to resolve the configured
    /// backend preference.
    ///
    /// # Errors
    /// `Config` for invalid configuration, `RuntimeUnavailable` when called
    /// outside a tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| DrcError::RuntimeUnavailable {
            reason: e.to_string(),
        })?;
        config.validate()?;
        let dispatch = DeviceDispatch::from_preference(config.backend);
        Self::with_dispatch(config, dispatch, runtime)
    }

    /// Build an orchestrator with an explicit dispatcher and runtime
    ///
    /// # Errors
    /// `Config` for invalid configuration.
    pub fn with_dispatch(config: EngineConfig, dispatch: DeviceDispatch, runtime: Handle) -> Result<Self> {
        config.validate()?;

        let probed = match dispatch.backend() {
            Backend::Accelerated => AcceleratorInfo::detect().and_then(AcceleratorInfo::memory_budget_bytes),
            Backend::Reference => None,
        };
        let memory_budget_bytes = probed
            .map(|b| b.min(config.memory_budget_bytes))
            .unwrap_or(config.memory_budget_bytes);

        info!(
            backend = %dispatch.backend(),
            max_concurrent_jobs = config.max_concurrent_jobs,
            memory_budget_bytes,
            "job orchestrator ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                slots: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
                dispatch: Arc::new(dispatch),
                memory_budget_bytes,
                config,
                runtime,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Backend new jobs start on
    pub fn backend(&self) -> Backend {
        self.inner.dispatch.backend()
    }

    /// Queue a compression job and return its id immediately
    ///
    /// # Errors
    /// `InvalidParameter` if `params` is out of range; no job is created.
    pub fn submit(&self, input: AudioBuffer, params: CompressionParams) -> Result<JobId> {
        params.validate()?;

        let job = Job::new(input, params, self.inner.dispatch.backend());
        let id = job.id;
        info!(
            job_id = %id,
            duration_secs = job.input.duration_secs(),
            channels = job.input.num_channels(),
            sample_rate = job.input.sample_rate(),
            "job queued"
        );

        let entry = Arc::new(JobEntry::new(job));
        self.inner.jobs.write().insert(id, entry.clone());
        self.inner.runtime.spawn(Inner::execute(self.inner.clone(), entry));
        Ok(id)
    }

    fn entry(&self, id: JobId) -> Result<Arc<JobEntry>> {
        self.inner
            .jobs
            .read()
            .get(&id)
            .cloned()
            .ok_or(DrcError::UnknownJob { id })
    }

    /// Current state of a job
    ///
    /// # Errors
    /// `UnknownJob` if no such job exists.
    pub fn status(&self, id: JobId) -> Result<JobSnapshot> {
        Ok(self.entry(id)?.job.lock().snapshot())
    }

    /// Output of a completed job
    ///
    /// # Errors
    /// * `UnknownJob` - no such job
    /// * `JobNotComplete` - the job is still queued or running
    /// * `JobFailed` - the job failed; carries the recorded error
    pub fn result(&self, id: JobId) -> Result<AudioBuffer> {
        let entry = self.entry(id)?;
        let job = entry.job.lock();
        match (job.state, &job.result, &job.error) {
            (JobState::Completed, Some(result), _) => Ok(result.clone()),
            (JobState::Failed, _, Some(error)) => Err(DrcError::JobFailed {
                id,
                error: error.clone(),
            }),
            (state, _, _) => Err(DrcError::JobNotComplete { id, state }),
        }
    }

    /// Cancel a job
    ///
    /// A queued job fails with `Cancelled` right away and never runs. A
    /// running job is flagged and stops before its next chunk. Finished jobs
    /// are left alone.
    ///
    /// # Errors
    /// `UnknownJob` if no such job exists.
    pub fn cancel(&self, id: JobId) -> Result<CancelAck> {
        let entry = self.entry(id)?;
        // the flag is raised under the job lock so a worker finishing its
        // last chunk either sees it or has already completed
        let ack = entry.update(|job| match job.state {
            JobState::Queued => {
                entry.cancel.store(true, Ordering::Release);
                job.fail(JobError::cancelled());
                CancelAck::Cancelled
            }
            JobState::Running => {
                entry.cancel.store(true, Ordering::Release);
                CancelAck::Requested
            }
            JobState::Completed | JobState::Failed => CancelAck::AlreadyFinished,
        });
        if ack != CancelAck::AlreadyFinished {
            warn!(job_id = %id, ack = ?ack, "job cancellation");
        }
        Ok(ack)
    }

    /// Wait until a job reaches a terminal state
    ///
    /// # Errors
    /// `UnknownJob` if no such job exists.
    pub async fn wait(&self, id: JobId) -> Result<JobSnapshot> {
        let entry = self.entry(id)?;
        let mut rx = entry.state_tx.subscribe();
        rx.wait_for(JobState::is_terminal)
            .await
            .map_err(|e| DrcError::ProcessingFailure {
                reason: format!("job {} state channel closed: {}", id, e),
            })?;
        let snapshot = entry.job.lock().snapshot();
        Ok(snapshot)
    }

    /// Snapshots of every tracked job, oldest first
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self
            .inner
            .jobs
            .read()
            .values()
            .map(|entry| entry.job.lock().snapshot())
            .collect();
        jobs.sort_by_key(|s| s.created_at);
        jobs
    }

    /// Forget a finished job and release its buffers
    ///
    /// # Errors
    /// `UnknownJob` if no such job exists, `JobNotComplete` if it is still
    /// queued or running.
    pub fn reclaim(&self, id: JobId) -> Result<JobSnapshot> {
        let mut jobs = self.inner.jobs.write();
        let entry = jobs.get(&id).ok_or(DrcError::UnknownJob { id })?;
        let snapshot = entry.job.lock().snapshot();
        if !snapshot.state.is_terminal() {
            return Err(DrcError::JobNotComplete {
                id,
                state: snapshot.state,
            });
        }
        jobs.remove(&id);
        Ok(snapshot)
    }

    pub fn health(&self) -> EngineHealth {
        let mut health = EngineHealth {
            backend: self.inner.dispatch.backend(),
            accelerator: self.inner.dispatch.accelerator_name(),
            max_concurrent_jobs: self.inner.config.max_concurrent_jobs,
            available_slots: self.inner.slots.available_permits(),
            queued: 0,
            running: 0,
            completed: 0,
            failed: 0,
        };
        for entry in self.inner.jobs.read().values() {
            match entry.job.lock().state {
                JobState::Queued => health.queued += 1,
                JobState::Running => health.running += 1,
                JobState::Completed => health.completed += 1,
                JobState::Failed => health.failed += 1,
            }
        }
        health
    }
}

impl Inner {
    async fn execute(inner: Arc<Inner>, entry: Arc<JobEntry>) {
        // a job cancelled while queued drops out without waiting for a slot
        let mut state_rx = entry.state_tx.subscribe();
        let acquired = tokio::select! {
            permit = inner.slots.clone().acquire_owned() => permit,
            _ = state_rx.wait_for(JobState::is_terminal) => return,
        };
        let Ok(_permit) = acquired else {
            entry.update(|job| job.fail(JobError::processing_failure("job scheduler shut down")));
            return;
        };

        let (id, input, params) = {
            let job = entry.job.lock();
            if job.state.is_terminal() {
                // cancelled while waiting for a slot
                return;
            }
            (job.id, job.input.clone(), job.params)
        };

        let plan = match ChunkPlan::fit_to_budget(
            inner.config.chunk_duration_s,
            inner.config.overlap_s,
            input.sample_rate(),
            input.num_channels(),
            inner.memory_budget_bytes,
        ) {
            Ok(plan) => plan,
            Err(err) => {
                error!(job_id = %id, error = %err, "cannot plan chunks");
                entry.update(|job| job.fail(JobError::from(&err)));
                return;
            }
        };
        let chunks_total = plan.chunk_count(input.len());
        if !entry.update(|job| job.start(chunks_total)) {
            return;
        }
        info!(
            job_id = %id,
            chunks = chunks_total,
            chunk_frames = plan.chunk_frames,
            backend = %inner.dispatch.backend(),
            "job started"
        );

        let worker = entry.clone();
        let dispatch = inner.dispatch.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut backend = worker.job.lock().backend;
            run_pipeline(&input, &params, &plan, &dispatch, &mut backend, &worker.cancel, |done, backend| {
                worker.update(|job| job.record_chunk(done, backend))
            })
        })
        .await;

        let error = match outcome {
            Ok(Ok(result)) => {
                let completed = entry.update(|job| {
                    if entry.cancel.load(Ordering::Acquire) {
                        job.fail(JobError::cancelled());
                        false
                    } else {
                        job.complete(result)
                    }
                });
                if !completed {
                    warn!(job_id = %id, "job cancelled after its last chunk");
                    return;
                }
                let snapshot = entry.job.lock().snapshot();
                info!(
                    job_id = %id,
                    backend = %snapshot.backend,
                    degraded = snapshot.degraded,
                    elapsed_secs = snapshot.elapsed_secs().unwrap_or_default(),
                    realtime_factor = snapshot.realtime_factor().unwrap_or_default(),
                    "job completed"
                );
                return;
            }
            Ok(Err(err)) => JobError::from(&err),
            Err(join_err) => JobError::processing_failure(format!("worker panicked: {}", join_err)),
        };

        if error.kind == JobErrorKind::Cancelled {
            warn!(job_id = %id, "job cancelled");
        } else {
            error!(job_id = %id, error = %error, "job failed");
        }
        entry.update(|job| job.fail(error));
    }
}
