//! Job tracking and asynchronous execution

mod job;
mod orchestrator;
mod pipeline;

pub use job::{Job, JobError, JobErrorKind, JobId, JobSnapshot, JobState};
pub use orchestrator::{CancelAck, EngineHealth, JobOrchestrator};
pub use pipeline::{compress, run_pipeline};
