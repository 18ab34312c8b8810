//! Subcommand implementations. Each returns the JSON document printed on
//! stdout.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use nestguard_core::{
    logging, AnalysisResult, BatchAction, BatchItem, BatchItemExecutor, BatchPayload,
    Configuration, Context, JobPayload, JobStatus, NewJob, NoopSink,
};
use nestguard_jobs::{BatchConfig, BatchHandler, SchedulerBuilder, SchedulerConfig, SchedulerEvent};
use nestguard_moderation::{
    plan_follow_on, ConfigurationRegistry, EvaluationRequest, InMemoryConfigStore,
    InMemoryModerationRepository, ModerationEngine, RegistryConfig,
};

async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

async fn read_config(path: &Path) -> anyhow::Result<Configuration> {
    let config: Configuration = read_json(path).await?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

pub async fn evaluate(
    context: &str,
    analysis_path: &Path,
    config_path: Option<&Path>,
    item_id: &str,
    image: &str,
) -> anyhow::Result<JsonValue> {
    let context = Context::new(context)?;
    let analysis: AnalysisResult = read_json(analysis_path).await?;

    let registry = Arc::new(ConfigurationRegistry::with_config(
        Arc::new(InMemoryConfigStore::new()),
        RegistryConfig::from_env(),
    ));
    let config = match config_path {
        Some(path) => {
            let config = read_config(path).await?;
            if config.context != context {
                bail!(
                    "configuration is for context {}, not {}",
                    config.context,
                    context
                );
            }
            Arc::new(config)
        }
        None => registry.load(&context, None).await,
    };

    let engine = ModerationEngine::new(
        registry,
        Arc::new(InMemoryModerationRepository::new()),
        Arc::new(NoopSink),
    );
    let record = engine
        .evaluate_with(&config, EvaluationRequest::new(item_id, context), Ok(analysis))
        .await?;
    let follow_on: Vec<JobPayload> = plan_follow_on(&record, &config, image)
        .into_iter()
        .map(|job| job.payload)
        .collect();

    info!(
        subsystem = logging::SUBSYSTEM_CLI,
        status = %record.status,
        score = ?record.composite_score(),
        "Evaluation finished"
    );

    Ok(json!({
        "display_score": record.score.as_ref().map(|s| s.display_score()),
        "record": record,
        "follow_on": follow_on,
    }))
}

pub fn defaults(context: &str) -> anyhow::Result<JsonValue> {
    let context = Context::new(context)?;
    Ok(serde_json::to_value(Configuration::builtin(&context))?)
}

pub async fn validate_config(path: &Path) -> anyhow::Result<JsonValue> {
    let config = read_config(path).await?;
    Ok(json!({
        "valid": true,
        "context": config.context,
        "scope_id": config.scope_id,
        "thresholds": config.thresholds,
        "enabled_components": config.enabled_components(),
        "disabled_components": config.disabled_components(),
    }))
}

/// Logs each item instead of touching storage.
struct DryRunExecutor;

#[async_trait]
impl BatchItemExecutor for DryRunExecutor {
    async fn execute(&self, item: &BatchItem) -> nestguard_core::Result<JsonValue> {
        let op = match &item.action {
            BatchAction::UpdateMetadata { fields } => {
                debug!(item_id = %item.item_id, fields = fields.len(), "Would update metadata");
                "update_metadata"
            }
            BatchAction::Relocate { destination } => {
                debug!(item_id = %item.item_id, %destination, "Would relocate");
                "relocate"
            }
            BatchAction::Delete => {
                debug!(item_id = %item.item_id, "Would delete");
                "delete"
            }
        };
        Ok(json!({ "item_id": item.item_id, "op": op, "dry_run": true }))
    }
}

pub async fn run_batch(
    path: &Path,
    item_attempts: Option<u32>,
    concurrency: Option<usize>,
) -> anyhow::Result<JsonValue> {
    let payload: BatchPayload = read_json(path).await?;

    let mut batch_config = BatchConfig::default();
    if let Some(attempts) = item_attempts {
        batch_config = batch_config.with_item_max_attempts(attempts);
    }
    if let Some(concurrency) = concurrency {
        batch_config = batch_config.with_item_concurrency(concurrency);
    }

    let scheduler = SchedulerBuilder::new()
        .with_config(SchedulerConfig::from_env().with_max_concurrent(1).with_enabled(true))
        .with_handler(BatchHandler::new(Arc::new(DryRunExecutor)).with_config(batch_config))
        .build();

    let mut events = scheduler.events();
    let job_id = scheduler.submit(NewJob::new(JobPayload::Batch(payload)))?;
    let handle = scheduler.start();

    loop {
        match events.recv().await {
            Ok(SchedulerEvent::JobProgress {
                job_id: id,
                percent,
                message,
            }) if id == job_id => {
                debug!(percent, message = message.as_deref().unwrap_or(""), "Batch progress");
            }
            Ok(SchedulerEvent::JobCompleted { job_id: id, .. })
            | Ok(SchedulerEvent::JobFailed { job_id: id, .. })
                if id == job_id =>
            {
                break
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => bail!("scheduler stopped before the batch finished"),
        }
    }
    handle.shutdown().await?;

    let Some(job) = scheduler.status(job_id) else {
        bail!("batch job {} disappeared", job_id);
    };
    if job.status != JobStatus::Completed {
        bail!(
            "batch job {}: {}",
            job.status,
            job.last_error.unwrap_or_default()
        );
    }
    Ok(json!({
        "job_id": job.id,
        "attempts": job.attempts,
        "summary": job.result,
    }))
}
