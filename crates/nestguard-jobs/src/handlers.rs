//! Image job handlers.
//!
//! Crop, watermark and thumbnail jobs are delegated to an
//! [`ImageOperations`] collaborator; these handlers only dispatch the payload
//! and translate the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use nestguard_core::{logging, ImageOperations, JobKind, JobPayload};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Handler for one image job kind.
pub struct ImageHandler {
    kind: JobKind,
    ops: Arc<dyn ImageOperations>,
}

impl ImageHandler {
    pub fn crop(ops: Arc<dyn ImageOperations>) -> Self {
        Self {
            kind: JobKind::Crop,
            ops,
        }
    }

    pub fn watermark(ops: Arc<dyn ImageOperations>) -> Self {
        Self {
            kind: JobKind::Watermark,
            ops,
        }
    }

    pub fn thumbnail(ops: Arc<dyn ImageOperations>) -> Self {
        Self {
            kind: JobKind::Thumbnail,
            ops,
        }
    }
}

/// Crop, watermark and thumbnail handlers sharing one collaborator.
pub fn image_handlers(ops: Arc<dyn ImageOperations>) -> [ImageHandler; 3] {
    [
        ImageHandler::crop(ops.clone()),
        ImageHandler::watermark(ops.clone()),
        ImageHandler::thumbnail(ops),
    ]
}

#[async_trait]
impl JobHandler for ImageHandler {
    fn job_kind(&self) -> JobKind {
        self.kind
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let result = match (self.kind, ctx.payload()) {
            (JobKind::Crop, JobPayload::Crop(payload)) => {
                if payload.region.width == 0 || payload.region.height == 0 {
                    return JobResult::Failed("crop region must have a non-zero area".into());
                }
                self.ops.crop(payload).await
            }
            (JobKind::Watermark, JobPayload::Watermark(payload)) => {
                self.ops.watermark(payload).await
            }
            (JobKind::Thumbnail, JobPayload::Thumbnail(payload)) => {
                self.ops.thumbnail(payload).await
            }
            (kind, payload) => {
                return JobResult::Failed(format!(
                    "{} handler cannot execute a {} payload",
                    kind,
                    payload.kind()
                ));
            }
        };

        match result {
            Ok(output) => {
                debug!(
                    subsystem = logging::SUBSYSTEM_JOBS,
                    job_id = %ctx.job_id(),
                    kind = %self.kind,
                    "Image operation finished"
                );
                JobResult::Success(Some(output))
            }
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nestguard_core::{
        CropPayload, CropRegion, Error, Job, JobPriority, JobStatus, Result, ThumbnailPayload,
        WatermarkPayload,
    };
    use serde_json::{json, Value as JsonValue};
    use uuid::Uuid;

    struct FakeOps;

    #[async_trait]
    impl ImageOperations for FakeOps {
        async fn crop(&self, payload: &CropPayload) -> Result<JsonValue> {
            Ok(json!({ "cropped": payload.image, "width": payload.region.width }))
        }

        async fn watermark(&self, _payload: &WatermarkPayload) -> Result<JsonValue> {
            Err(Error::JobExecution("font missing".into()))
        }

        async fn thumbnail(&self, payload: &ThumbnailPayload) -> Result<JsonValue> {
            Ok(json!({ "thumbnail": payload.image, "blur": payload.blur }))
        }
    }

    fn ctx(payload: JobPayload) -> JobContext {
        JobContext::new(Job {
            id: Uuid::new_v4(),
            kind: payload.kind(),
            priority: JobPriority::Normal,
            payload,
            status: JobStatus::Running,
            attempts: 1,
            max_attempts: 3,
            result: None,
            last_error: None,
            source_record_id: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        })
    }

    fn crop(width: u32) -> JobPayload {
        JobPayload::Crop(CropPayload {
            image: "a.jpg".into(),
            region: CropRegion {
                x: 0,
                y: 0,
                width,
                height: 10,
            },
        })
    }

    #[tokio::test]
    async fn test_crop_success() {
        let [crop_handler, _, _] = image_handlers(Arc::new(FakeOps));
        assert!(crop_handler.can_handle(JobKind::Crop));
        match crop_handler.execute(ctx(crop(64))).await {
            JobResult::Success(Some(output)) => assert_eq!(output["width"], 64),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_crop_rejects_empty_region() {
        let handler = ImageHandler::crop(Arc::new(FakeOps));
        assert!(matches!(
            handler.execute(ctx(crop(0))).await,
            JobResult::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_collaborator_error_becomes_failure() {
        let handler = ImageHandler::watermark(Arc::new(FakeOps));
        let payload = JobPayload::Watermark(WatermarkPayload {
            image: "a.jpg".into(),
            text: "(c)".into(),
            position: Default::default(),
        });
        match handler.execute(ctx(payload)).await {
            JobResult::Failed(msg) => assert!(msg.contains("font missing")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_payload_mismatch_fails() {
        let handler = ImageHandler::thumbnail(Arc::new(FakeOps));
        match handler.execute(ctx(crop(10))).await {
            JobResult::Failed(msg) => assert!(msg.contains("thumbnail handler")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
