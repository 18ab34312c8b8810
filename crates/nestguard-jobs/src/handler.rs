//! Job handler trait and execution context.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use nestguard_core::{Job, JobKind, JobPayload};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// Snapshot of the job being processed.
    pub job: Job,
    /// Progress callback for updating job progress.
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job: Job) -> Self {
        Self {
            job,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    /// 1-based attempt number of this execution.
    pub fn attempt(&self) -> u32 {
        self.job.attempts
    }

    pub fn payload(&self) -> &JobPayload {
        &self.job.payload
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed with an error message. Retried while attempts remain.
    Failed(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job kind this handler processes.
    fn job_kind(&self) -> JobKind;

    /// Execute the job. Side effects must tolerate re-execution.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given job kind.
    fn can_handle(&self, kind: JobKind) -> bool {
        self.job_kind() == kind
    }

    /// Time limit for one execution, given the scheduler's default.
    /// `None` lets the handler bound its own run.
    fn timeout(&self, default: Duration) -> Option<Duration> {
        Some(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nestguard_core::{BatchPayload, JobPriority, JobStatus};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn job() -> Job {
        Job {
            id: Uuid::new_v4(),
            kind: JobKind::Batch,
            priority: JobPriority::Normal,
            payload: JobPayload::Batch(BatchPayload { items: vec![] }),
            status: JobStatus::Running,
            attempts: 2,
            max_attempts: 3,
            result: None,
            last_error: None,
            source_record_id: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    #[test]
    fn test_job_context_accessors() {
        let job = job();
        let ctx = JobContext::new(job.clone());
        assert_eq!(ctx.job_id(), job.id);
        assert_eq!(ctx.attempt(), 2);
        assert_eq!(ctx.payload().kind(), JobKind::Batch);
        assert!(ctx.progress_callback.is_none());
    }

    #[test]
    fn test_progress_callback_invoked() {
        let last = Arc::new(AtomicI32::new(-1));
        let seen = last.clone();
        let ctx = JobContext::new(job()).with_progress_callback(move |percent, _| {
            seen.store(percent, Ordering::SeqCst);
        });
        ctx.report_progress(40, Some("item 2/5"));
        assert_eq!(last.load(Ordering::SeqCst), 40);
    }

    struct Plain;

    #[async_trait]
    impl JobHandler for Plain {
        fn job_kind(&self) -> JobKind {
            JobKind::Thumbnail
        }

        async fn execute(&self, _ctx: JobContext) -> JobResult {
            JobResult::Success(None)
        }
    }

    #[test]
    fn test_default_timeout_is_scheduler_default() {
        let default = Duration::from_secs(300);
        assert_eq!(Plain.timeout(default), Some(default));
        assert!(Plain.can_handle(JobKind::Thumbnail));
        assert!(!Plain.can_handle(JobKind::Batch));
    }

    #[test]
    fn test_report_progress_without_callback_is_noop() {
        let ctx = JobContext::new(job());
        ctx.report_progress(100, None);
    }
}
