//! Analysis → decision → follow-on jobs.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use nestguard_core::defaults::{ANALYSIS_TIMEOUT_SECS, THUMBNAIL_SIZE};
use nestguard_core::{
    logging, AnalysisProvider, AnalysisRequest, Configuration, Context, Error, JobPayload,
    JobPriority, JobSubmitter, ModerationRecord, ModerationStatus, NewJob, Result,
    ThumbnailPayload, WatermarkPayload, WatermarkPosition,
};

use crate::decision::{EvaluationRequest, ModerationEngine};

/// An uploaded item awaiting moderation.
#[derive(Debug, Clone)]
pub struct ItemSubmission {
    pub item_id: String,
    /// Image reference understood by the analysis and execution collaborators.
    pub image: String,
    pub context: Context,
    pub scope_id: Option<String>,
}

impl ItemSubmission {
    pub fn new(item_id: impl Into<String>, image: impl Into<String>, context: Context) -> Self {
        Self {
            item_id: item_id.into(),
            image: image.into(),
            context,
            scope_id: None,
        }
    }

    pub fn with_scope(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }
}

/// Result of processing one submission.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub record: ModerationRecord,
    /// Follow-on jobs that were accepted by the scheduler.
    pub jobs: Vec<Uuid>,
}

/// Follow-on work for a decided record.
///
/// Approved items get their thumbnail and watermark; flagged items get a
/// blurred thumbnail for the review queue; rejected items get nothing.
pub fn plan_follow_on(
    record: &ModerationRecord,
    config: &Configuration,
    image: &str,
) -> Vec<NewJob> {
    let post = &config.post_processing;
    let mut jobs = Vec::new();

    match record.status {
        ModerationStatus::Approved => {
            if post.thumbnail {
                jobs.push(NewJob::new(JobPayload::Thumbnail(ThumbnailPayload {
                    image: image.to_string(),
                    width: THUMBNAIL_SIZE,
                    height: THUMBNAIL_SIZE,
                    blur: false,
                })));
            }
            if post.watermark {
                jobs.push(NewJob::new(JobPayload::Watermark(WatermarkPayload {
                    image: image.to_string(),
                    text: post.watermark_text.clone(),
                    position: WatermarkPosition::BottomRight,
                })));
            }
        }
        ModerationStatus::Flagged => {
            jobs.push(
                NewJob::new(JobPayload::Thumbnail(ThumbnailPayload {
                    image: image.to_string(),
                    width: THUMBNAIL_SIZE,
                    height: THUMBNAIL_SIZE,
                    blur: true,
                }))
                .with_priority(JobPriority::High),
            );
        }
        ModerationStatus::Rejected | ModerationStatus::Pending => {}
    }

    jobs.into_iter()
        .map(|job| {
            job.with_max_attempts(post.max_attempts)
                .with_source_record(record.id)
        })
        .collect()
}

/// Runs submissions through analysis, the decision engine and the scheduler.
pub struct ModerationPipeline {
    analysis: Arc<dyn AnalysisProvider>,
    engine: Arc<ModerationEngine>,
    submitter: Option<Arc<dyn JobSubmitter>>,
    analysis_timeout: Duration,
}

impl ModerationPipeline {
    pub fn new(analysis: Arc<dyn AnalysisProvider>, engine: Arc<ModerationEngine>) -> Self {
        Self {
            analysis,
            engine,
            submitter: None,
            analysis_timeout: Duration::from_secs(ANALYSIS_TIMEOUT_SECS),
        }
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn JobSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<ModerationEngine> {
        &self.engine
    }

    #[instrument(skip(self, submission), fields(subsystem = logging::SUBSYSTEM_MODERATION, item_id = %submission.item_id))]
    pub async fn process(&self, submission: ItemSubmission) -> Result<PipelineOutcome> {
        let config = self
            .engine
            .registry()
            .load(&submission.context, submission.scope_id.as_deref())
            .await;

        let request = AnalysisRequest {
            image: submission.image.clone(),
            context: submission.context.clone(),
            components: config.enabled_components(),
        };
        let analysis =
            match tokio::time::timeout(self.analysis_timeout, self.analysis.analyze(&request))
                .await
            {
                Ok(Ok(analysis)) => Ok(analysis),
                Ok(Err(e)) => Err(Error::AnalysisUnavailable(e.to_string())),
                Err(_) => Err(Error::AnalysisUnavailable(format!(
                    "analysis timed out after {}s",
                    self.analysis_timeout.as_secs()
                ))),
            };

        let evaluation = EvaluationRequest {
            item_id: submission.item_id,
            context: submission.context,
            scope_id: submission.scope_id,
        };
        let record = self
            .engine
            .evaluate_with(&config, evaluation, analysis)
            .await?;

        let mut jobs = Vec::new();
        if let Some(submitter) = &self.submitter {
            for job in plan_follow_on(&record, &config, &submission.image) {
                let kind = job.kind();
                match submitter.submit_job(job).await {
                    Ok(job_id) => {
                        debug!(%job_id, %kind, "Follow-on job submitted");
                        jobs.push(job_id);
                    }
                    Err(e) => {
                        warn!(error = %e, %kind, record_id = %record.id, "Failed to submit follow-on job");
                    }
                }
            }
        }

        Ok(PipelineOutcome { record, jobs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nestguard_core::{DecisionReason, JobKind};

    fn record(status: ModerationStatus) -> ModerationRecord {
        let now = Utc::now();
        ModerationRecord {
            id: Uuid::now_v7(),
            item_id: "img".into(),
            context: Context::premium_gallery(),
            scope_id: None,
            analysis: None,
            score: None,
            status,
            review_required: status == ModerationStatus::Flagged,
            reason: DecisionReason::Undecided,
            note: None,
            config_version: 0,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
            decided_at: Some(now),
        }
    }

    #[test]
    fn test_approved_gets_thumbnail_and_watermark() {
        let config = Configuration::builtin(&Context::premium_gallery());
        let rec = record(ModerationStatus::Approved);
        let jobs = plan_follow_on(&rec, &config, "uploads/1.jpg");

        let kinds: Vec<JobKind> = jobs.iter().map(|j| j.kind()).collect();
        assert_eq!(kinds, vec![JobKind::Thumbnail, JobKind::Watermark]);
        assert!(jobs.iter().all(|j| j.priority == JobPriority::Normal));
        assert!(jobs.iter().all(|j| j.source_record_id == Some(rec.id)));
        assert!(jobs
            .iter()
            .all(|j| j.max_attempts == Some(config.post_processing.max_attempts)));
    }

    #[test]
    fn test_public_gallery_skips_watermark() {
        let config = Configuration::builtin(&Context::public_gallery());
        let jobs = plan_follow_on(&record(ModerationStatus::Approved), &config, "a.jpg");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind(), JobKind::Thumbnail);
    }

    #[test]
    fn test_flagged_gets_blurred_high_priority_thumbnail() {
        let config = Configuration::builtin(&Context::premium_gallery());
        let jobs = plan_follow_on(&record(ModerationStatus::Flagged), &config, "a.jpg");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].priority, JobPriority::High);
        match &jobs[0].payload {
            JobPayload::Thumbnail(t) => assert!(t.blur),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_rejected_gets_nothing() {
        let config = Configuration::builtin(&Context::premium_gallery());
        assert!(plan_follow_on(&record(ModerationStatus::Rejected), &config, "a.jpg").is_empty());
    }
}
