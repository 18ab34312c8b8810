//! End-to-end: moderation pipeline decisions feeding the job scheduler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tokio::time::sleep;

use nestguard_core::{
    AnalysisProvider, AnalysisRequest, AnalysisResult, Context, CropPayload, ImageOperations,
    JobKind, JobPriority, JobStatus, ModerationStatus, NoopSink, Result, ThumbnailPayload,
    WatermarkPayload,
};
use nestguard_jobs::{image_handlers, JobFilter, JobScheduler, SchedulerBuilder, SchedulerConfig};
use nestguard_moderation::{
    ConfigurationRegistry, InMemoryConfigStore, InMemoryModerationRepository, ItemSubmission,
    ModerationEngine, ModerationPipeline, RegistryConfig,
};

/// Returns a fixed analysis keyed by image name.
struct CannedAnalysis;

#[async_trait]
impl AnalysisProvider for CannedAnalysis {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        Ok(match request.image.as_str() {
            "clean.jpg" => AnalysisResult::new(),
            "borderline.jpg" => AnalysisResult::new().with_label("BREAST_EXPOSED", 80.0),
            _ => AnalysisResult::new()
                .with_label("BREAST_EXPOSED", 100.0)
                .with_label("GENITALIA_EXPOSED", 100.0),
        })
    }
}

#[derive(Default)]
struct RecordingOps {
    thumbnails: Mutex<Vec<ThumbnailPayload>>,
    watermarks: Mutex<Vec<WatermarkPayload>>,
}

#[async_trait]
impl ImageOperations for RecordingOps {
    async fn crop(&self, payload: &CropPayload) -> Result<JsonValue> {
        Ok(json!({ "image": payload.image }))
    }

    async fn watermark(&self, payload: &WatermarkPayload) -> Result<JsonValue> {
        self.watermarks.lock().await.push(payload.clone());
        Ok(json!({ "image": payload.image }))
    }

    async fn thumbnail(&self, payload: &ThumbnailPayload) -> Result<JsonValue> {
        self.thumbnails.lock().await.push(payload.clone());
        Ok(json!({ "image": payload.image }))
    }
}

fn pipeline(scheduler: &JobScheduler) -> ModerationPipeline {
    let registry = Arc::new(ConfigurationRegistry::with_config(
        Arc::new(InMemoryConfigStore::new()),
        RegistryConfig::default(),
    ));
    let engine = Arc::new(ModerationEngine::new(
        registry,
        Arc::new(InMemoryModerationRepository::new()),
        Arc::new(NoopSink),
    ));
    ModerationPipeline::new(Arc::new(CannedAnalysis), engine)
        .with_submitter(Arc::new(scheduler.clone()))
}

fn scheduler(ops: Arc<RecordingOps>) -> JobScheduler {
    let [crop, watermark, thumbnail] = image_handlers(ops);
    SchedulerBuilder::new()
        .with_config(SchedulerConfig::default().with_max_concurrent(2))
        .with_handler(crop)
        .with_handler(watermark)
        .with_handler(thumbnail)
        .build()
}

async fn wait_until_idle(scheduler: &JobScheduler) {
    for _ in 0..500 {
        let busy = scheduler
            .list(&JobFilter::default())
            .iter()
            .any(|job| !job.status.is_terminal());
        if !busy {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("scheduler did not drain");
}

#[tokio::test]
async fn test_decisions_drive_follow_on_jobs() {
    let ops = Arc::new(RecordingOps::default());
    let scheduler = scheduler(ops.clone());
    let pipeline = pipeline(&scheduler);
    let handle = scheduler.start();

    let approved = pipeline
        .process(ItemSubmission::new("a", "clean.jpg", Context::premium_gallery()))
        .await
        .unwrap();
    let flagged = pipeline
        .process(ItemSubmission::new("b", "borderline.jpg", Context::public_gallery()))
        .await
        .unwrap();
    let rejected = pipeline
        .process(ItemSubmission::new("c", "explicit.jpg", Context::public_gallery()))
        .await
        .unwrap();

    assert_eq!(approved.record.status, ModerationStatus::Approved);
    assert_eq!(flagged.record.status, ModerationStatus::Flagged);
    assert_eq!(rejected.record.status, ModerationStatus::Rejected);

    // Premium gallery watermarks approved items.
    assert_eq!(approved.jobs.len(), 2);
    assert_eq!(flagged.jobs.len(), 1);
    assert!(rejected.jobs.is_empty());

    wait_until_idle(&scheduler).await;
    handle.shutdown().await.unwrap();

    let review_job = scheduler.status(flagged.jobs[0]).unwrap();
    assert_eq!(review_job.kind, JobKind::Thumbnail);
    assert_eq!(review_job.priority, JobPriority::High);
    assert_eq!(review_job.status, JobStatus::Completed);
    assert_eq!(review_job.source_record_id, Some(flagged.record.id));

    let by_record = scheduler.list(&JobFilter::default().with_source_record(approved.record.id));
    assert_eq!(by_record.len(), 2);
    assert!(by_record.iter().all(|job| job.status == JobStatus::Completed));

    let thumbnails = ops.thumbnails.lock().await;
    assert_eq!(thumbnails.len(), 2);
    assert!(thumbnails
        .iter()
        .any(|t| t.image == "borderline.jpg" && t.blur));
    assert!(thumbnails.iter().any(|t| t.image == "clean.jpg" && !t.blur));
    assert_eq!(ops.watermarks.lock().await.len(), 1);
}

#[tokio::test]
async fn test_full_queue_does_not_change_decision() {
    let ops = Arc::new(RecordingOps::default());
    let scheduler = SchedulerBuilder::new()
        .with_config(SchedulerConfig::default().with_max_pending(0))
        .build();
    let pipeline = pipeline(&scheduler);

    let outcome = pipeline
        .process(ItemSubmission::new("a", "clean.jpg", Context::public_gallery()))
        .await
        .unwrap();

    assert_eq!(outcome.record.status, ModerationStatus::Approved);
    assert!(outcome.jobs.is_empty());
    assert!(ops.thumbnails.lock().await.is_empty());
}
