//! Bounded job scheduler.
//!
//! A fixed pool of worker tasks drains one shared [`PriorityQueue`]. The job
//! table and the queue sit behind a single `std::sync::Mutex` that is never
//! held across an await; idle workers park on a [`Notify`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nestguard_core::defaults::{
    EVENT_CHANNEL_CAPACITY, JOB_MAX_ATTEMPTS, JOB_MAX_CONCURRENT, JOB_TIMEOUT_SECS,
};
use nestguard_core::{
    logging, Clock, Error, Job, JobKind, JobPriority, JobStatus, JobSubmitter, NewJob, NoopSink,
    NotificationSink, Result, SystemClock,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::queue::PriorityQueue;

/// Configuration for the job scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker tasks.
    pub max_concurrent: usize,
    /// Attempts granted to jobs that do not set their own.
    pub default_max_attempts: u32,
    /// Per-execution handler timeout in seconds, unless the handler sets its own.
    pub job_timeout_secs: u64,
    /// Maximum queued jobs; `None` is unbounded.
    pub max_pending: Option<usize>,
    /// Whether `start` spawns workers at all.
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: JOB_MAX_CONCURRENT,
            default_max_attempts: JOB_MAX_ATTEMPTS,
            job_timeout_secs: JOB_TIMEOUT_SECS,
            max_pending: None,
            enabled: true,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `3` | Worker pool size |
    /// | `JOB_DEFAULT_MAX_ATTEMPTS` | `3` | Attempts for jobs without their own cap |
    /// | `JOB_TIMEOUT_SECS` | `300` | Handler timeout per attempt |
    /// | `JOB_MAX_PENDING` | unbounded | Queue bound before `QueueFull` |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(JOB_MAX_CONCURRENT)
            .max(1);

        let default_max_attempts = std::env::var("JOB_DEFAULT_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(JOB_MAX_ATTEMPTS)
            .max(1);

        let job_timeout_secs = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_TIMEOUT_SECS);

        let max_pending = std::env::var("JOB_MAX_PENDING")
            .ok()
            .and_then(|v| v.parse::<usize>().ok());

        Self {
            max_concurrent,
            default_max_attempts,
            job_timeout_secs,
            max_pending,
            enabled,
        }
    }

    /// Set the worker pool size.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts.max(1);
        self
    }

    pub fn with_job_timeout_secs(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    /// Bound the number of queued jobs.
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = Some(max);
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Event emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    JobQueued {
        job_id: Uuid,
        kind: JobKind,
        priority: JobPriority,
    },
    JobStarted {
        job_id: Uuid,
        kind: JobKind,
        attempt: u32,
        worker_id: usize,
    },
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    /// A failed attempt was re-queued at the front of its band.
    JobRetrying {
        job_id: Uuid,
        kind: JobKind,
        attempt: u32,
        error: String,
    },
    JobCompleted { job_id: Uuid, kind: JobKind },
    JobFailed {
        job_id: Uuid,
        kind: JobKind,
        error: String,
    },
    JobCancelled { job_id: Uuid, kind: JobKind },
    WorkerStarted { worker_id: usize },
    WorkerStopped { worker_id: usize },
}

/// Criteria for [`JobScheduler::list`]. Empty matches everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub source_record_id: Option<Uuid>,
}

impl JobFilter {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_source_record(mut self, record_id: Uuid) -> Self {
        self.source_record_id = Some(record_id);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.kind.map_or(true, |k| job.kind == k)
            && self
                .source_record_id
                .map_or(true, |id| job.source_record_id == Some(id))
    }
}

/// Handle for controlling running workers.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    event_rx: broadcast::Receiver<SchedulerEvent>,
}

impl SchedulerHandle {
    /// Stop taking new work and wait for in-flight jobs to finish.
    pub async fn shutdown(self) -> Result<()> {
        // Workers that already exited have dropped their receivers.
        let _ = self.shutdown_tx.send(true);

        let mut panicked = 0usize;
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(subsystem = logging::SUBSYSTEM_JOBS, error = ?e, "Worker task panicked");
                panicked += 1;
            }
        }

        if panicked > 0 {
            return Err(Error::Internal(format!("{} worker task(s) panicked", panicked)));
        }
        Ok(())
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_rx.resubscribe()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    queue: PriorityQueue,
}

struct Shared {
    config: SchedulerConfig,
    state: Mutex<State>,
    notify: Notify,
    handlers: RwLock<HashMap<JobKind, Arc<dyn JobHandler>>>,
    event_tx: broadcast::Sender<SchedulerEvent>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    started: AtomicBool,
}

/// In-memory job scheduler. Cloning shares the same queue and job table.
#[derive(Clone)]
pub struct JobScheduler {
    shared: Arc<Shared>,
}

impl JobScheduler {
    /// Create a scheduler with no handlers and a no-op notification sink.
    pub fn new(config: SchedulerConfig) -> Self {
        SchedulerBuilder::new().with_config(config).build()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is not an error.
        let _ = self.shared.event_tx.send(event);
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Register a handler for a job kind, replacing any previous one.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        let kind = handler.job_kind();
        let mut handlers = self.shared.handlers.write().await;
        handlers.insert(kind, Arc::new(handler));
        debug!(subsystem = logging::SUBSYSTEM_JOBS, %kind, "Registered job handler");
    }

    /// Queue a job. Never blocks; fails with `QueueFull` when a pending bound
    /// is configured and reached.
    pub fn submit(&self, new_job: NewJob) -> Result<Uuid> {
        let max_attempts = match new_job.max_attempts {
            Some(0) => {
                return Err(Error::InvalidInput(
                    "max_attempts must be at least 1".into(),
                ))
            }
            Some(n) => n,
            None => self.shared.config.default_max_attempts,
        };

        let kind = new_job.kind();
        let priority = new_job.priority;
        let id = Uuid::now_v7();

        {
            let mut state = self.state();
            let pending = state.queue.len();
            if let Some(max) = self.shared.config.max_pending {
                if pending >= max {
                    warn!(
                        subsystem = logging::SUBSYSTEM_JOBS,
                        %kind,
                        pending,
                        "Rejecting job, queue full"
                    );
                    return Err(Error::QueueFull(pending));
                }
            }

            let job = Job {
                id,
                kind,
                priority,
                payload: new_job.payload,
                status: JobStatus::Pending,
                attempts: 0,
                max_attempts,
                result: None,
                last_error: None,
                source_record_id: new_job.source_record_id,
                created_at: self.shared.clock.now(),
                started_at: None,
                completed_at: None,
            };
            state.jobs.insert(id, job);
            state.queue.push_back(priority, id);
        }

        self.shared.notify.notify_one();
        self.emit(SchedulerEvent::JobQueued {
            job_id: id,
            kind,
            priority,
        });
        debug!(
            subsystem = logging::SUBSYSTEM_JOBS,
            job_id = %id,
            %kind,
            ?priority,
            max_attempts,
            "Job queued"
        );
        Ok(id)
    }

    /// Snapshot of a job.
    pub fn status(&self, id: Uuid) -> Option<Job> {
        self.state().jobs.get(&id).cloned()
    }

    /// Cancel a pending job. Running and finished jobs are left untouched.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let cancelled = {
            let mut state = self.state();
            let is_pending = matches!(
                state.jobs.get(&id).map(|job| job.status),
                Some(JobStatus::Pending)
            );
            if !is_pending {
                None
            } else {
                state.queue.remove(&id);
                let now = self.shared.clock.now();
                state.jobs.get_mut(&id).map(|job| {
                    job.status = JobStatus::Cancelled;
                    job.completed_at = Some(now);
                    job.clone()
                })
            }
        };

        match cancelled {
            Some(job) => {
                info!(
                    subsystem = logging::SUBSYSTEM_JOBS,
                    job_id = %id,
                    kind = %job.kind,
                    "Job cancelled"
                );
                self.emit(SchedulerEvent::JobCancelled {
                    job_id: id,
                    kind: job.kind,
                });
                self.shared.sink.job_finished(&job).await;
                true
            }
            None => false,
        }
    }

    /// Jobs matching the filter, oldest first.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .state()
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.created_at, job.id));
        jobs
    }

    pub fn pending_count(&self) -> usize {
        self.state().queue.len()
    }

    /// Remove a finished job from the table.
    pub fn purge(&self, id: Uuid) -> Result<()> {
        let mut state = self.state();
        match state.jobs.get(&id).map(|job| job.status) {
            None => Err(Error::NotFound(format!("job {}", id))),
            Some(status) if !status.is_terminal() => {
                Err(Error::invalid_transition(status, "purged"))
            }
            Some(_) => {
                state.jobs.remove(&id);
                Ok(())
            }
        }
    }

    /// Remove every finished job. Returns how many were removed.
    pub fn purge_finished(&self) -> usize {
        let mut state = self.state();
        let before = state.jobs.len();
        state.jobs.retain(|_, job| !job.status.is_terminal());
        let purged = before - state.jobs.len();
        if purged > 0 {
            debug!(subsystem = logging::SUBSYSTEM_JOBS, purged, "Purged finished jobs");
        }
        purged
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Spawn the worker pool and return a handle for control.
    ///
    /// Only the first call spawns workers; later calls return a handle with
    /// none.
    pub fn start(&self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let event_rx = self.shared.event_tx.subscribe();
        let mut workers = Vec::new();

        if !self.shared.config.enabled {
            info!(subsystem = logging::SUBSYSTEM_JOBS, "Job scheduler is disabled, not starting");
        } else if self.shared.started.swap(true, Ordering::SeqCst) {
            warn!(subsystem = logging::SUBSYSTEM_JOBS, "Job scheduler already started");
        } else {
            info!(
                subsystem = logging::SUBSYSTEM_JOBS,
                max_concurrent = self.shared.config.max_concurrent,
                job_timeout_secs = self.shared.config.job_timeout_secs,
                pending = self.pending_count(),
                "Job scheduler started"
            );
            for worker_id in 0..self.shared.config.max_concurrent {
                let scheduler = self.clone();
                let rx = shutdown_rx.clone();
                workers.push(tokio::spawn(async move {
                    scheduler.worker_loop(worker_id, rx).await;
                }));
            }
        }

        SchedulerHandle {
            shutdown_tx,
            workers,
            event_rx,
        }
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown_rx: watch::Receiver<bool>) {
        self.emit(SchedulerEvent::WorkerStarted { worker_id });
        debug!(subsystem = logging::SUBSYSTEM_JOBS, worker_id, "Worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.claim_next() {
                Some(job) => self.run_job(job, worker_id).await,
                None => {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = self.shared.notify.notified() => {}
                    }
                }
            }
        }

        self.emit(SchedulerEvent::WorkerStopped { worker_id });
        debug!(subsystem = logging::SUBSYSTEM_JOBS, worker_id, "Worker stopped");
    }

    /// Pop the next queued job and mark it running.
    fn claim_next(&self) -> Option<Job> {
        let mut state = self.state();
        let now = self.shared.clock.now();
        while let Some(id) = state.queue.pop() {
            if let Some(job) = state.jobs.get_mut(&id) {
                if job.status != JobStatus::Pending {
                    continue;
                }
                job.status = JobStatus::Running;
                job.attempts += 1;
                job.started_at = Some(now);
                return Some(job.clone());
            }
        }
        None
    }

    async fn run_job(&self, job: Job, worker_id: usize) {
        let start = Instant::now();
        let job_id = job.id;
        let kind = job.kind;
        let attempt = job.attempts;

        info!(
            subsystem = logging::SUBSYSTEM_JOBS,
            %job_id,
            %kind,
            attempt,
            worker_id,
            "Processing job"
        );
        self.emit(SchedulerEvent::JobStarted {
            job_id,
            kind,
            attempt,
            worker_id,
        });

        let handler = {
            let handlers = self.shared.handlers.read().await;
            handlers.get(&kind).cloned()
        };

        let result = match handler {
            Some(handler) => {
                let event_tx = self.shared.event_tx.clone();
                let ctx = JobContext::new(job).with_progress_callback(move |percent, message| {
                    let _ = event_tx.send(SchedulerEvent::JobProgress {
                        job_id,
                        percent,
                        message: message.map(String::from),
                    });
                });

                let job_timeout = handler.timeout(self.shared.config.job_timeout());
                let task = tokio::spawn(async move { handler.execute(ctx).await });
                let abort = task.abort_handle();

                let joined = match job_timeout {
                    Some(limit) => match tokio::time::timeout(limit, task).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            abort.abort();
                            warn!(
                                subsystem = logging::SUBSYSTEM_JOBS,
                                %job_id,
                                %kind,
                                "Job exceeded timeout of {}s",
                                limit.as_secs()
                            );
                            Ok(JobResult::Failed(format!(
                                "Job exceeded timeout of {}s",
                                limit.as_secs()
                            )))
                        }
                    },
                    None => task.await,
                };

                // A panicking handler fails this attempt; the worker keeps running.
                joined.unwrap_or_else(|e| {
                    error!(
                        subsystem = logging::SUBSYSTEM_JOBS,
                        %job_id,
                        %kind,
                        error = ?e,
                        "Job task panicked"
                    );
                    JobResult::Failed(format!("Job task panicked: {}", e))
                })
            }
            None => {
                warn!(subsystem = logging::SUBSYSTEM_JOBS, %kind, "No handler registered for job kind");
                JobResult::Failed(format!("No handler for job kind: {}", kind))
            }
        };

        self.finish(job_id, result, start).await;
    }

    /// Record the outcome of one attempt.
    async fn finish(&self, job_id: Uuid, result: JobResult, start: Instant) {
        let duration_ms = start.elapsed().as_millis() as u64;
        let finished = {
            let mut state = self.state();
            let now = self.shared.clock.now();
            let Some(job) = state.jobs.get_mut(&job_id) else {
                error!(subsystem = logging::SUBSYSTEM_JOBS, %job_id, "Finished job missing from table");
                return;
            };

            match result {
                JobResult::Success(data) => {
                    job.status = JobStatus::Completed;
                    job.result = data;
                    job.last_error = None;
                    job.completed_at = Some(now);
                    Finished::Terminal(job.clone())
                }
                JobResult::Failed(error) => {
                    job.last_error = Some(error.clone());
                    if job.attempts < job.max_attempts {
                        job.status = JobStatus::Pending;
                        let (priority, kind, attempt) = (job.priority, job.kind, job.attempts);
                        state.queue.push_front(priority, job_id);
                        Finished::Retry {
                            kind,
                            attempt,
                            error,
                        }
                    } else {
                        job.status = JobStatus::Failed;
                        job.completed_at = Some(now);
                        Finished::Terminal(job.clone())
                    }
                }
            }
        };

        match finished {
            Finished::Retry {
                kind,
                attempt,
                error,
            } => {
                warn!(
                    subsystem = logging::SUBSYSTEM_JOBS,
                    %job_id,
                    %kind,
                    attempt,
                    %error,
                    duration_ms,
                    "Job attempt failed, retrying"
                );
                self.shared.notify.notify_one();
                self.emit(SchedulerEvent::JobRetrying {
                    job_id,
                    kind,
                    attempt,
                    error,
                });
            }
            Finished::Terminal(job) => {
                if job.status == JobStatus::Completed {
                    info!(
                        subsystem = logging::SUBSYSTEM_JOBS,
                        %job_id,
                        kind = %job.kind,
                        attempts = job.attempts,
                        duration_ms,
                        "Job completed successfully"
                    );
                    self.emit(SchedulerEvent::JobCompleted {
                        job_id,
                        kind: job.kind,
                    });
                } else {
                    let error = job.last_error.clone().unwrap_or_default();
                    warn!(
                        subsystem = logging::SUBSYSTEM_JOBS,
                        %job_id,
                        kind = %job.kind,
                        attempts = job.attempts,
                        %error,
                        duration_ms,
                        "Job failed"
                    );
                    self.emit(SchedulerEvent::JobFailed {
                        job_id,
                        kind: job.kind,
                        error,
                    });
                }
                self.shared.sink.job_finished(&job).await;
            }
        }
    }
}

enum Finished {
    Retry {
        kind: JobKind,
        attempt: u32,
        error: String,
    },
    Terminal(Job),
}

#[async_trait]
impl JobSubmitter for JobScheduler {
    async fn submit_job(&self, job: NewJob) -> Result<Uuid> {
        self.submit(job)
    }
}

/// Builder for creating a scheduler with handlers.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    handlers: Vec<Arc<dyn JobHandler>>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            handlers: Vec::new(),
            sink: Arc::new(NoopSink),
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the scheduler configuration.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a handler.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Receive terminal job transitions.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the scheduler. Workers are not running until `start`.
    pub fn build(self) -> JobScheduler {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let handlers = self
            .handlers
            .into_iter()
            .map(|handler| (handler.job_kind(), handler))
            .collect();

        JobScheduler {
            shared: Arc::new(Shared {
                config: self.config,
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                handlers: RwLock::new(handlers),
                event_tx,
                sink: self.sink,
                clock: self.clock,
                started: AtomicBool::new(false),
            }),
        }
    }
}
