//! Collaborator traits for the nestguard core.
//!
//! Everything outside scoring, decisions and scheduling sits behind one of
//! these traits: the analysis service, durable stores, image manipulation and
//! downstream notification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::config::Context;
use crate::error::Result;
use crate::models::{
    AnalysisRequest, AnalysisResult, Appeal, BatchItem, CropPayload, Job, ModerationRecord,
    NewJob, ThumbnailPayload, WatermarkPayload,
};

// =============================================================================
// ANALYSIS
// =============================================================================

/// Remote content analysis service.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Analyze one image. Any error is treated as "no score available".
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult>;
}

// =============================================================================
// CONFIGURATION STORE
// =============================================================================

/// Raw configuration document as held by the store.
///
/// The body is kept as JSON so that a malformed document surfaces as a
/// parse failure in the registry rather than in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConfiguration {
    pub context: Context,
    pub scope_id: Option<String>,
    pub version: u32,
    pub body: JsonValue,
    pub updated_at: DateTime<Utc>,
}

/// Durable configuration storage keyed by `(context, scope_id)`.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(
        &self,
        context: &Context,
        scope_id: Option<&str>,
    ) -> Result<Option<StoredConfiguration>>;

    async fn put(&self, config: StoredConfiguration) -> Result<()>;

    /// List stored configurations, optionally for one context.
    async fn list(&self, context: Option<&Context>) -> Result<Vec<StoredConfiguration>>;
}

// =============================================================================
// EXECUTION
// =============================================================================

/// Image manipulation collaborator used by crop/watermark/thumbnail jobs.
#[async_trait]
pub trait ImageOperations: Send + Sync {
    async fn crop(&self, payload: &CropPayload) -> Result<JsonValue>;

    async fn watermark(&self, payload: &WatermarkPayload) -> Result<JsonValue>;

    async fn thumbnail(&self, payload: &ThumbnailPayload) -> Result<JsonValue>;
}

/// Applies one batch item. Must be safe to re-run after a partial attempt.
#[async_trait]
pub trait BatchItemExecutor: Send + Sync {
    async fn execute(&self, item: &BatchItem) -> Result<JsonValue>;
}

/// Accepts follow-on work. Implemented by the job scheduler.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit_job(&self, job: NewJob) -> Result<Uuid>;
}

// =============================================================================
// PERSISTENCE / NOTIFICATION
// =============================================================================

/// Storage for moderation records and appeals.
#[async_trait]
pub trait ModerationRepository: Send + Sync {
    async fn save_record(&self, record: &ModerationRecord) -> Result<()>;

    async fn get_record(&self, id: Uuid) -> Result<Option<ModerationRecord>>;

    async fn save_appeal(&self, appeal: &Appeal) -> Result<()>;

    async fn get_appeal(&self, id: Uuid) -> Result<Option<Appeal>>;

    async fn appeals_for_record(&self, record_id: Uuid) -> Result<Vec<Appeal>>;
}

/// Receives terminal state transitions for storage and downstream display.
///
/// All methods default to no-ops.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn record_decided(&self, _record: &ModerationRecord) {}

    async fn appeal_resolved(&self, _appeal: &Appeal, _record: &ModerationRecord) {}

    async fn job_finished(&self, _job: &Job) {}
}

/// Sink that drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {}
