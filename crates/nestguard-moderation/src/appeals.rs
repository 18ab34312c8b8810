//! Appeal workflow on top of the decision engine.

use tracing::{debug, info};
use uuid::Uuid;

use nestguard_core::{
    logging, Appeal, AppealReason, AppealResolution, AppealStatus, DecisionReason, Error,
    ModerationRecord, ModerationStatus, Result, ReviewOutcome,
};

use crate::decision::ModerationEngine;

impl ModerationEngine {
    /// Open an appeal against a flagged or rejected record.
    ///
    /// A record has at most one open appeal at a time.
    pub async fn create_appeal(
        &self,
        record_id: Uuid,
        reason: AppealReason,
        message: impl Into<String>,
    ) -> Result<Appeal> {
        let _guard = self.workflow_lock.lock().await;
        let record = self.get_record(record_id).await?;
        if !matches!(
            record.status,
            ModerationStatus::Flagged | ModerationStatus::Rejected
        ) {
            return Err(Error::InvalidInput(format!(
                "cannot appeal a {} record",
                record.status
            )));
        }

        let existing = self.repository.appeals_for_record(record_id).await?;
        if existing.iter().any(|a| a.status == AppealStatus::Open) {
            return Err(Error::InvalidInput(format!(
                "record {} already has an open appeal",
                record_id
            )));
        }

        let appeal = Appeal {
            id: Uuid::now_v7(),
            record_id,
            reason,
            message: message.into(),
            status: AppealStatus::Open,
            resolution: None,
            created_at: self.clock.now(),
        };
        self.repository.save_appeal(&appeal).await?;
        info!(
            subsystem = logging::SUBSYSTEM_MODERATION,
            appeal_id = %appeal.id,
            record_id = %record_id,
            reason = ?reason,
            "Appeal opened"
        );
        Ok(appeal)
    }

    /// Resolve an appeal and apply the outcome to its record.
    ///
    /// Resolving an already-resolved appeal returns it unchanged.
    pub async fn resolve_appeal(
        &self,
        appeal_id: Uuid,
        outcome: ReviewOutcome,
        reviewer: &str,
    ) -> Result<Appeal> {
        let _guard = self.workflow_lock.lock().await;
        let mut appeal = self
            .repository
            .get_appeal(appeal_id)
            .await?
            .ok_or(Error::AppealNotFound(appeal_id))?;

        if appeal.status == AppealStatus::Resolved {
            debug!(
                subsystem = logging::SUBSYSTEM_MODERATION,
                appeal_id = %appeal_id,
                "Appeal already resolved"
            );
            return Ok(appeal);
        }

        let record = self.get_record(appeal.record_id).await?;
        let record = self
            .apply_resolution(record, outcome, reviewer, DecisionReason::Appeal)
            .await?;

        self.mark_resolved(&mut appeal, &record, outcome, reviewer)
            .await?;
        Ok(appeal)
    }

    /// Close every open appeal on a record that a reviewer just decided.
    /// Caller holds `workflow_lock`.
    pub(crate) async fn close_open_appeals(
        &self,
        record: &ModerationRecord,
        outcome: ReviewOutcome,
        reviewer: &str,
    ) -> Result<()> {
        let appeals = self.repository.appeals_for_record(record.id).await?;
        for mut appeal in appeals
            .into_iter()
            .filter(|a| a.status == AppealStatus::Open)
        {
            self.mark_resolved(&mut appeal, record, outcome, reviewer)
                .await?;
        }
        Ok(())
    }

    async fn mark_resolved(
        &self,
        appeal: &mut Appeal,
        record: &ModerationRecord,
        outcome: ReviewOutcome,
        reviewer: &str,
    ) -> Result<()> {
        appeal.status = AppealStatus::Resolved;
        appeal.resolution = Some(AppealResolution {
            outcome,
            reviewer: reviewer.to_string(),
            resolved_at: self.clock.now(),
        });
        self.repository.save_appeal(appeal).await?;
        info!(
            subsystem = logging::SUBSYSTEM_MODERATION,
            appeal_id = %appeal.id,
            record_id = %record.id,
            outcome = ?outcome,
            "Appeal resolved"
        );
        self.sink.appeal_resolved(appeal, record).await;
        Ok(())
    }

    pub async fn appeal(&self, appeal_id: Uuid) -> Result<Option<Appeal>> {
        self.repository.get_appeal(appeal_id).await
    }

    pub async fn appeals_for(&self, record_id: Uuid) -> Result<Vec<Appeal>> {
        self.repository.appeals_for_record(record_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nestguard_core::{AnalysisResult, Context};

    use crate::decision::EvaluationRequest;
    use crate::memory::{InMemoryConfigStore, InMemoryModerationRepository, RecordingSink};
    use crate::registry::{ConfigurationRegistry, RegistryConfig};

    use super::*;

    fn engine() -> (ModerationEngine, Arc<RecordingSink>) {
        let registry = Arc::new(ConfigurationRegistry::with_config(
            Arc::new(InMemoryConfigStore::new()),
            RegistryConfig::default(),
        ));
        let sink = Arc::new(RecordingSink::new());
        let engine = ModerationEngine::new(
            registry,
            Arc::new(InMemoryModerationRepository::new()),
            sink.clone(),
        );
        (engine, sink)
    }

    async fn rejected_record(engine: &ModerationEngine) -> Uuid {
        engine
            .evaluate(
                EvaluationRequest::new("img-rejected", Context::public_gallery()),
                Ok(AnalysisResult::new()
                    .with_label("GENITALIA_EXPOSED", 100.0)
                    .with_label("ANUS_EXPOSED", 100.0)),
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_appeal_overturns_rejection() {
        let (engine, sink) = engine();
        let record_id = rejected_record(&engine).await;

        let appeal = engine
            .create_appeal(record_id, AppealReason::ConsentProvided, "signed release on file")
            .await
            .unwrap();
        assert_eq!(appeal.status, AppealStatus::Open);

        let resolved = engine
            .resolve_appeal(appeal.id, ReviewOutcome::Approved, "lead-reviewer")
            .await
            .unwrap();
        assert_eq!(resolved.status, AppealStatus::Resolved);
        let resolution = resolved.resolution.clone().unwrap();
        assert_eq!(resolution.outcome, ReviewOutcome::Approved);

        let record = engine.record(record_id).await.unwrap().unwrap();
        assert_eq!(record.status, ModerationStatus::Approved);
        assert_eq!(record.reason, DecisionReason::Appeal);
        assert_eq!(sink.resolved_appeals().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resolving_twice_is_noop() {
        let (engine, sink) = engine();
        let record_id = rejected_record(&engine).await;
        let appeal = engine
            .create_appeal(record_id, AppealReason::FalsePositive, "")
            .await
            .unwrap();

        let first = engine
            .resolve_appeal(appeal.id, ReviewOutcome::Rejected, "reviewer-a")
            .await
            .unwrap();
        let record_after_first = engine.record(record_id).await.unwrap().unwrap();

        let second = engine
            .resolve_appeal(appeal.id, ReviewOutcome::Approved, "reviewer-b")
            .await
            .unwrap();
        assert_eq!(second, first);

        let record_after_second = engine.record(record_id).await.unwrap().unwrap();
        assert_eq!(record_after_second, record_after_first);
        assert_eq!(record_after_second.status, ModerationStatus::Rejected);
        assert_eq!(sink.resolved_appeals().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cannot_appeal_approved_record() {
        let (engine, _sink) = engine();
        let record = engine
            .evaluate(
                EvaluationRequest::new("img-clean", Context::public_gallery()),
                Ok(AnalysisResult::new()),
            )
            .await
            .unwrap();

        let result = engine
            .create_appeal(record.id, AppealReason::Other, "why?")
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_single_open_appeal_per_record() {
        let (engine, _sink) = engine();
        let record_id = rejected_record(&engine).await;
        engine
            .create_appeal(record_id, AppealReason::ContextMismatch, "belongs in paysite")
            .await
            .unwrap();

        let second = engine
            .create_appeal(record_id, AppealReason::Other, "again")
            .await;
        assert!(second.is_err());
        assert_eq!(engine.appeals_for(record_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_review_closes_open_appeal() {
        let (engine, sink) = engine();
        let record = engine
            .evaluate(
                EvaluationRequest::new("img-flagged", Context::public_gallery()),
                Ok(AnalysisResult::new().with_label("BREAST_EXPOSED", 80.0)),
            )
            .await
            .unwrap();
        assert_eq!(record.status, ModerationStatus::Flagged);

        let appeal = engine
            .create_appeal(record.id, AppealReason::FalsePositive, "swimwear")
            .await
            .unwrap();
        engine
            .resolve(record.id, ReviewOutcome::Approved, "moderator-1")
            .await
            .unwrap();

        let closed = engine.appeal(appeal.id).await.unwrap().unwrap();
        assert_eq!(closed.status, AppealStatus::Resolved);
        let resolution = closed.resolution.clone().unwrap();
        assert_eq!(resolution.outcome, ReviewOutcome::Approved);
        assert_eq!(resolution.reviewer, "moderator-1");
        assert_eq!(sink.resolved_appeals().await.len(), 1);

        // Resolving it afterwards is the usual no-op.
        let again = engine
            .resolve_appeal(appeal.id, ReviewOutcome::Rejected, "lead-reviewer")
            .await
            .unwrap();
        assert_eq!(again, closed);
        let record = engine.record(record.id).await.unwrap().unwrap();
        assert_eq!(record.status, ModerationStatus::Approved);
        assert_eq!(record.reason, DecisionReason::HumanReview);
    }

    #[tokio::test]
    async fn test_resolve_unknown_appeal() {
        let (engine, _sink) = engine();
        let result = engine
            .resolve_appeal(Uuid::new_v4(), ReviewOutcome::Approved, "reviewer")
            .await;
        assert!(matches!(result, Err(Error::AppealNotFound(_))));
    }
}
