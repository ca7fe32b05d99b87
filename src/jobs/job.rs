//! Job record and lifecycle state machine
//!
//! ```text
//! Queued ──► Running ──► Completed
//!    │          │
//!    └──────────┴──────► Failed
//! ```
//!
//! Completed and Failed are terminal: once a job reaches either, nothing about
//! it changes again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::Backend;
use crate::dsp::CompressionParams;
use crate::engine::AudioBuffer;
use crate::error::DrcError;

/// Opaque job identifier (UUID v4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Failed)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Why a job failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    Cancelled,
    ProcessingFailure,
    InvalidChunking,
}

/// Terminal failure recorded on a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn cancelled() -> Self {
        Self {
            kind: JobErrorKind::Cancelled,
            message: "cancelled by caller".to_string(),
        }
    }

    pub fn processing_failure(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::ProcessingFailure,
            message: message.into(),
        }
    }
}

impl From<&DrcError> for JobError {
    fn from(err: &DrcError) -> Self {
        let kind = match err {
            DrcError::Cancelled => JobErrorKind::Cancelled,
            DrcError::InvalidChunking { .. } => JobErrorKind::InvalidChunking,
            _ => JobErrorKind::ProcessingFailure,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// A tracked compression request
///
/// Only the orchestrator mutates jobs; callers see [`JobSnapshot`]s.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub input: AudioBuffer,
    pub params: CompressionParams,
    pub state: JobState,
    /// Fraction of chunks finished, never decreasing
    pub progress: f32,
    pub result: Option<AudioBuffer>,
    pub result_fingerprint: Option<String>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Backend the job ran (or finished) on
    pub backend: Backend,
    /// Set when an accelerator fault forced the reference path mid-job
    pub degraded: bool,
    pub chunks_total: usize,
    pub chunks_done: usize,
}

impl Job {
    /// Create a queued job
    pub fn new(input: AudioBuffer, params: CompressionParams, backend: Backend) -> Self {
        Self {
            id: JobId::new(),
            input,
            params,
            state: JobState::Queued,
            progress: 0.0,
            result: None,
            result_fingerprint: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            backend,
            degraded: false,
            chunks_total: 0,
            chunks_done: 0,
        }
    }

    fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        match next {
            JobState::Running => self.started_at = Some(Utc::now()),
            JobState::Completed | JobState::Failed => self.finished_at = Some(Utc::now()),
            JobState::Queued => {}
        }
        true
    }

    /// Queued → Running. Returns false if the job was not queued.
    pub fn start(&mut self, chunks_total: usize) -> bool {
        let started = self.transition(JobState::Running);
        if started {
            self.chunks_total = chunks_total;
        }
        started
    }

    /// Record a finished chunk; progress only moves forward
    pub fn record_chunk(&mut self, chunks_done: usize, backend: Backend) {
        if self.state != JobState::Running {
            return;
        }
        self.chunks_done = self.chunks_done.max(chunks_done);
        if backend != self.backend {
            self.degraded = true;
            self.backend = backend;
        }
        if self.chunks_total > 0 {
            let fraction = (self.chunks_done as f32 / self.chunks_total as f32).min(1.0);
            self.progress = self.progress.max(fraction);
        }
    }

    /// Running → Completed with the merged output
    pub fn complete(&mut self, result: AudioBuffer) -> bool {
        if !self.transition(JobState::Completed) {
            return false;
        }
        self.progress = 1.0;
        self.chunks_done = self.chunks_total;
        self.result_fingerprint = Some(result.fingerprint());
        self.result = Some(result);
        true
    }

    /// Queued/Running → Failed
    pub fn fail(&mut self, error: JobError) -> bool {
        if !self.transition(JobState::Failed) {
            return false;
        }
        self.error = Some(error);
        true
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            state: self.state,
            progress: self.progress,
            params: self.params,
            backend: self.backend,
            degraded: self.degraded,
            chunks_total: self.chunks_total,
            chunks_done: self.chunks_done,
            input_duration_secs: self.input.duration_secs(),
            sample_rate: self.input.sample_rate(),
            num_channels: self.input.num_channels(),
            result_fingerprint: self.result_fingerprint.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Observable state of a job, without sample data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: JobState,
    pub progress: f32,
    pub params: CompressionParams,
    pub backend: Backend,
    pub degraded: bool,
    pub chunks_total: usize,
    pub chunks_done: usize,
    pub input_duration_secs: f64,
    pub sample_rate: u32,
    pub num_channels: usize,
    pub result_fingerprint: Option<String>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    /// Wall-clock processing time, once the job has finished
    pub fn elapsed_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some((finished - started).num_microseconds()? as f64 / 1e6)
    }

    /// Seconds of audio processed per second of wall-clock time
    pub fn realtime_factor(&self) -> Option<f64> {
        let elapsed = self.elapsed_secs()?;
        (elapsed > 0.0).then(|| self.input_duration_secs / elapsed)
    }
}
