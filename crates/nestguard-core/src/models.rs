//! Core data models for nestguard.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::config::{Context, DetectionComponent};
use crate::defaults;

// =============================================================================
// ANALYSIS
// =============================================================================

/// Special conditions reported alongside label confidences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFlags {
    #[serde(default)]
    pub minor_detected: bool,
    #[serde(default)]
    pub child_content: bool,
    /// Named flags for custom risk multipliers.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub custom: BTreeSet<String>,
}

impl AnalysisFlags {
    pub fn has(&self, flag: &str) -> bool {
        self.custom.contains(flag)
    }
}

/// Output of the analysis collaborator for one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Detected label to confidence in `0..=100`.
    #[serde(default)]
    pub labels: BTreeMap<String, f64>,
    #[serde(default)]
    pub flags: AnalysisFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AnalysisResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>, confidence: f64) -> Self {
        self.labels.insert(label.into(), confidence);
        self
    }

    pub fn with_minor_detected(mut self) -> Self {
        self.flags.minor_detected = true;
        self
    }

    pub fn with_child_content(mut self) -> Self {
        self.flags.child_content = true;
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.custom.insert(flag.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Request handed to the analysis collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub image: String,
    pub context: Context,
    /// Detectors the collaborator should run.
    pub components: Vec<DetectionComponent>,
}

// =============================================================================
// SCORING
// =============================================================================

/// Coarse bucket of the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= defaults::RISK_LEVEL_CRITICAL {
            Self::Critical
        } else if score >= defaults::RISK_LEVEL_HIGH {
            Self::High
        } else if score >= defaults::RISK_LEVEL_MEDIUM {
            Self::Medium
        } else if score >= defaults::RISK_LEVEL_LOW {
            Self::Low
        } else {
            Self::Minimal
        }
    }
}

/// A multiplier that fired during scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedMultiplier {
    pub condition: String,
    pub factor: f64,
    pub critical: bool,
}

/// Output of the risk scoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Final score. May exceed 100 when `escalated`.
    pub composite_score: f64,
    /// Sum of label contributions before multipliers.
    pub base_score: f64,
    pub per_label_contribution: BTreeMap<String, f64>,
    pub applied_multipliers: Vec<AppliedMultiplier>,
    /// A critical multiplier fired.
    pub escalated: bool,
    pub risk_level: RiskLevel,
    pub reasoning: Vec<String>,
}

impl ScoreResult {
    /// Score on the nominal 0-100 scale for display to reviewers.
    pub fn display_score(&self) -> f64 {
        self.composite_score.min(defaults::SCORE_MAX)
    }
}

// =============================================================================
// MODERATION
// =============================================================================

/// Status of a moderation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Flagged,
    Rejected,
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Flagged => "flagged",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Why a record reached its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Not decided yet.
    Undecided,
    /// Score below the approval threshold.
    LowRisk,
    /// Score between the approval and flag thresholds.
    Borderline,
    /// Score at or above the flag threshold.
    RiskScore,
    /// Score at or above the reject threshold.
    HighRisk,
    /// A critical condition forced review or rejection.
    Escalation,
    /// No score could be computed.
    AnalysisUnavailable,
    /// A human reviewer decided.
    HumanReview,
    /// An appeal was resolved.
    Appeal,
}

/// Decision produced from a score and configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub status: ModerationStatus,
    pub review_required: bool,
    pub reason: DecisionReason,
    pub note: Option<String>,
}

/// One analyzed item's moderation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationRecord {
    pub id: Uuid,
    pub item_id: String,
    pub context: Context,
    pub scope_id: Option<String>,
    pub analysis: Option<AnalysisResult>,
    pub score: Option<ScoreResult>,
    pub status: ModerationStatus,
    pub review_required: bool,
    pub reason: DecisionReason,
    /// Diagnostic note (e.g. why analysis was missing).
    pub note: Option<String>,
    pub config_version: u32,
    pub reviewed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ModerationRecord {
    pub fn composite_score(&self) -> Option<f64> {
        self.score.as_ref().map(|s| s.composite_score)
    }
}

/// Human reviewer outcome for a flagged record or an appeal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOutcome {
    Approved,
    Rejected,
}

impl ReviewOutcome {
    pub fn status(&self) -> ModerationStatus {
        match self {
            Self::Approved => ModerationStatus::Approved,
            Self::Rejected => ModerationStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppealReason {
    FalsePositive,
    ContextMismatch,
    ConsentProvided,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppealStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppealResolution {
    pub outcome: ReviewOutcome,
    pub reviewer: String,
    pub resolved_at: DateTime<Utc>,
}

/// Request to reconsider a flagged or rejected record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appeal {
    pub id: Uuid,
    pub record_id: Uuid,
    pub reason: AppealReason,
    pub message: String,
    pub status: AppealStatus,
    pub resolution: Option<AppealResolution>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// JOBS
// =============================================================================

/// Kind of asynchronous work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Crop,
    Watermark,
    Thumbnail,
    Batch,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Crop => "crop",
            Self::Watermark => "watermark",
            Self::Thumbnail => "thumbnail",
            Self::Batch => "batch",
        };
        f.write_str(s)
    }
}

/// Scheduling priority. Declared highest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Highest first.
    pub const ORDER: [JobPriority; 3] = [JobPriority::High, JobPriority::Normal, JobPriority::Low];

    pub fn band(&self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropPayload {
    pub image: String,
    pub region: CropRegion,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkPayload {
    pub image: String,
    pub text: String,
    #[serde(default)]
    pub position: WatermarkPosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailPayload {
    pub image: String,
    pub width: u32,
    pub height: u32,
    /// Blur the thumbnail (used for review queues).
    #[serde(default)]
    pub blur: bool,
}

/// Mutation applied to one item of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchAction {
    UpdateMetadata { fields: BTreeMap<String, JsonValue> },
    Relocate { destination: String },
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub item_id: String,
    pub action: BatchAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub items: Vec<BatchItem>,
}

/// Kind-specific job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Crop(CropPayload),
    Watermark(WatermarkPayload),
    Thumbnail(ThumbnailPayload),
    Batch(BatchPayload),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Crop(_) => JobKind::Crop,
            Self::Watermark(_) => JobKind::Watermark,
            Self::Thumbnail(_) => JobKind::Thumbnail,
            Self::Batch(_) => JobKind::Batch,
        }
    }
}

/// A unit of asynchronous work tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub priority: JobPriority,
    pub payload: JobPayload,
    pub status: JobStatus,
    /// Executions started so far.
    pub attempts: u32,
    pub max_attempts: u32,
    pub result: Option<JsonValue>,
    pub last_error: Option<String>,
    /// Moderation record that requested this job, if any.
    pub source_record_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Submission request for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub payload: JobPayload,
    #[serde(default)]
    pub priority: JobPriority,
    /// Falls back to the scheduler default when unset.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub source_record_id: Option<Uuid>,
}

impl NewJob {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            payload,
            priority: JobPriority::Normal,
            max_attempts: None,
            source_record_id: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_source_record(mut self, record_id: Uuid) -> Self {
        self.source_record_id = Some(record_id);
        self
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}

/// A batch item that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemFailure {
    pub index: usize,
    pub item_id: String,
    pub error: String,
}

/// Aggregated result of a batch job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub failures: Vec<BatchItemFailure>,
}

impl BatchSummary {
    pub fn has_errors(&self) -> bool {
        self.failed > 0
    }
}
