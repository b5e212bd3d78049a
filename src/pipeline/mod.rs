//! Pipelines - report generation, chat follow-ups and the workers that run them

pub mod chat;
pub mod cleanup;
pub mod queue;
pub mod report;

pub use chat::{open_turn, ChatJob, ChatOutcome, ChatPipeline, AGENT_FAILED};
pub use cleanup::{CleanupHandle, TokenCleanup};
pub use queue::{requeue_unfinished, Job, JobQueue, RequeueStats, WorkerPool, QUEUE_CAPACITY};
pub use report::{ReportPipeline, ANALYSIS_FAILED};
