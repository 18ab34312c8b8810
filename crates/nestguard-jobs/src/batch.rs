//! Batch job handler.
//!
//! Each item is attempted independently (with its own attempt cap and
//! timeout) through a [`BatchItemExecutor`]. Item failures are collected into
//! the [`BatchSummary`]; the batch itself succeeds once every item has been
//! attempted. The per-item limits bound the whole run, so the scheduler's job
//! timeout does not apply.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, trace, warn};

use nestguard_core::defaults::{
    BATCH_ITEM_CONCURRENCY, BATCH_ITEM_MAX_ATTEMPTS, BATCH_ITEM_TIMEOUT_SECS,
};
use nestguard_core::{
    logging, BatchItem, BatchItemExecutor, BatchItemFailure, BatchSummary, JobKind, JobPayload,
};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Per-item execution limits.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub item_max_attempts: u32,
    pub item_timeout: Duration,
    pub item_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            item_max_attempts: BATCH_ITEM_MAX_ATTEMPTS,
            item_timeout: Duration::from_secs(BATCH_ITEM_TIMEOUT_SECS),
            item_concurrency: BATCH_ITEM_CONCURRENCY,
        }
    }
}

impl BatchConfig {
    pub fn with_item_max_attempts(mut self, attempts: u32) -> Self {
        self.item_max_attempts = attempts.max(1);
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn with_item_concurrency(mut self, concurrency: usize) -> Self {
        self.item_concurrency = concurrency.max(1);
        self
    }
}

pub struct BatchHandler {
    executor: Arc<dyn BatchItemExecutor>,
    config: BatchConfig,
}

impl BatchHandler {
    pub fn new(executor: Arc<dyn BatchItemExecutor>) -> Self {
        Self {
            executor,
            config: BatchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Attempt one item until it succeeds or runs out of attempts.
    async fn run_item(&self, item: &BatchItem) -> Result<(), String> {
        let mut last_error = String::new();
        for attempt in 1..=self.config.item_max_attempts {
            match tokio::time::timeout(self.config.item_timeout, self.executor.execute(item)).await
            {
                Ok(Ok(_)) => {
                    trace!(item_id = %item.item_id, attempt, "Batch item applied");
                    return Ok(());
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "item timed out after {}s",
                        self.config.item_timeout.as_secs()
                    )
                }
            }
            debug!(item_id = %item.item_id, attempt, error = %last_error, "Batch item attempt failed");
        }
        Err(last_error)
    }
}

#[async_trait]
impl JobHandler for BatchHandler {
    fn job_kind(&self) -> JobKind {
        JobKind::Batch
    }

    fn timeout(&self, _default: Duration) -> Option<Duration> {
        None
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let JobPayload::Batch(batch) = ctx.payload() else {
            return JobResult::Failed(format!(
                "batch handler cannot execute a {} payload",
                ctx.payload().kind()
            ));
        };

        let total = batch.items.len();
        let mut summary = BatchSummary {
            total,
            ..BatchSummary::default()
        };

        let mut outcomes = stream::iter(batch.items.iter().cloned().enumerate())
            .map(|(index, item)| async move {
                let outcome = self.run_item(&item).await;
                (index, item, outcome)
            })
            .buffered(self.config.item_concurrency);

        let mut done = 0usize;
        while let Some((index, item, outcome)) = outcomes.next().await {
            done += 1;
            match outcome {
                Ok(()) => summary.successful += 1,
                Err(error) => {
                    summary.failed += 1;
                    summary.failures.push(BatchItemFailure {
                        index,
                        item_id: item.item_id,
                        error,
                    });
                }
            }
            let percent = (done * 100 / total) as i32;
            ctx.report_progress(percent, Some(&format!("{}/{} items", done, total)));
        }

        if summary.has_errors() {
            warn!(
                subsystem = logging::SUBSYSTEM_JOBS,
                job_id = %ctx.job_id(),
                successful = summary.successful,
                failed = summary.failed,
                "Batch finished with item failures"
            );
        }

        match serde_json::to_value(&summary) {
            Ok(value) => JobResult::Success(Some(value)),
            Err(e) => JobResult::Failed(format!("failed to encode batch summary: {}", e)),
        }
    }
}
