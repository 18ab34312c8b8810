//! Moderation decision engine.
//!
//! Turns a composite score into a record status:
//!
//! | Score | Status | Reason |
//! |-------|--------|--------|
//! | `>= reject_above` | rejected | `high_risk` |
//! | `>= flag_above` | flagged | `risk_score` |
//! | `>= approve_below` | flagged | `borderline` |
//! | `<  approve_below` | approved | `low_risk` |
//!
//! A critical escalation or a minor/child-content flag never yields
//! `approved`; a missing score always yields `flagged`.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use nestguard_core::{
    logging, AnalysisFlags, AnalysisResult, Clock, Configuration, Context, Decision,
    DecisionReason, Error, ModerationRecord, ModerationRepository, ModerationStatus,
    NotificationSink, Result, ReviewOutcome, ScoreResult, SystemClock,
};

use crate::registry::ConfigurationRegistry;
use crate::scoring::RiskScoringEngine;

/// Decide a status from a score. Pure; escalation is already in `score`.
pub fn decide(
    score: Option<&ScoreResult>,
    config: &Configuration,
    flags: Option<&AnalysisFlags>,
) -> Decision {
    let Some(score) = score else {
        return Decision {
            status: ModerationStatus::Flagged,
            review_required: true,
            reason: DecisionReason::AnalysisUnavailable,
            note: Some("no score available; manual review required".to_string()),
        };
    };

    let thresholds = &config.thresholds;
    let value = score.composite_score;
    let critical_flag = flags.is_some_and(|f| f.minor_detected || f.child_content);
    let escalated = score.escalated || critical_flag;

    if value >= thresholds.reject_above {
        return Decision {
            status: ModerationStatus::Rejected,
            review_required: false,
            reason: if escalated {
                DecisionReason::Escalation
            } else {
                DecisionReason::HighRisk
            },
            note: None,
        };
    }

    if escalated {
        return Decision {
            status: ModerationStatus::Flagged,
            review_required: true,
            reason: DecisionReason::Escalation,
            note: Some(format!("escalation: {}", score.reasoning.join("; "))),
        };
    }

    if value >= thresholds.flag_above {
        return Decision {
            status: ModerationStatus::Flagged,
            review_required: true,
            reason: DecisionReason::RiskScore,
            note: None,
        };
    }

    // `approve_below == flag_above` collapses the band; ties flag.
    if value >= thresholds.approve_below {
        return Decision {
            status: ModerationStatus::Flagged,
            review_required: true,
            reason: DecisionReason::Borderline,
            note: None,
        };
    }

    Decision {
        status: ModerationStatus::Approved,
        review_required: false,
        reason: DecisionReason::LowRisk,
        note: None,
    }
}

/// Identifies the item being evaluated.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub item_id: String,
    pub context: Context,
    pub scope_id: Option<String>,
}

impl EvaluationRequest {
    pub fn new(item_id: impl Into<String>, context: Context) -> Self {
        Self {
            item_id: item_id.into(),
            context,
            scope_id: None,
        }
    }

    pub fn with_scope(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }
}

/// Scores analyses, records decisions and drives the review/appeal workflow.
pub struct ModerationEngine {
    pub(crate) registry: Arc<ConfigurationRegistry>,
    pub(crate) scorer: RiskScoringEngine,
    pub(crate) repository: Arc<dyn ModerationRepository>,
    pub(crate) sink: Arc<dyn NotificationSink>,
    pub(crate) clock: Arc<dyn Clock>,
    /// Serializes review and appeal transitions.
    pub(crate) workflow_lock: Mutex<()>,
}

impl ModerationEngine {
    pub fn new(
        registry: Arc<ConfigurationRegistry>,
        repository: Arc<dyn ModerationRepository>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            registry,
            scorer: RiskScoringEngine::new(),
            repository,
            sink,
            clock: Arc::new(SystemClock),
            workflow_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &Arc<ConfigurationRegistry> {
        &self.registry
    }

    /// Load configuration for the request, then evaluate.
    pub async fn evaluate(
        &self,
        request: EvaluationRequest,
        analysis: Result<AnalysisResult>,
    ) -> Result<ModerationRecord> {
        let config = self
            .registry
            .load(&request.context, request.scope_id.as_deref())
            .await;
        self.evaluate_with(&config, request, analysis).await
    }

    /// Score and decide with an already loaded configuration.
    ///
    /// An `Err` analysis is treated as "no score available".
    #[instrument(
        skip(self, config, request, analysis),
        fields(subsystem = logging::SUBSYSTEM_MODERATION, item_id = %request.item_id, context = %request.context)
    )]
    pub async fn evaluate_with(
        &self,
        config: &Configuration,
        request: EvaluationRequest,
        analysis: Result<AnalysisResult>,
    ) -> Result<ModerationRecord> {
        let now = self.clock.now();
        let (analysis, unavailable) = match analysis {
            Ok(analysis) => (Some(analysis), None),
            Err(e) => {
                warn!(error = %e, "Analysis unavailable, forcing review");
                (None, Some(e.to_string()))
            }
        };

        let score = analysis
            .as_ref()
            .map(|analysis| self.scorer.score(analysis, config));
        let decision = decide(
            score.as_ref(),
            config,
            analysis.as_ref().map(|a| &a.flags),
        );

        let note = match (decision.note, unavailable) {
            (Some(note), Some(cause)) => Some(format!("{}: {}", note, cause)),
            (note, _) => note,
        };

        let record = ModerationRecord {
            id: Uuid::now_v7(),
            item_id: request.item_id,
            context: request.context,
            scope_id: request.scope_id,
            analysis,
            score,
            status: decision.status,
            review_required: decision.review_required,
            reason: decision.reason,
            note,
            config_version: config.version,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
            decided_at: Some(now),
        };

        self.repository.save_record(&record).await?;
        info!(
            record_id = %record.id,
            status = %record.status,
            reason = ?record.reason,
            score = ?record.composite_score(),
            "Moderation decision recorded"
        );
        self.sink.record_decided(&record).await;

        Ok(record)
    }

    /// Apply a human reviewer's decision to a flagged record. Any open appeal
    /// on the record is closed with the same outcome.
    pub async fn resolve(
        &self,
        record_id: Uuid,
        outcome: ReviewOutcome,
        reviewer: &str,
    ) -> Result<ModerationRecord> {
        let _guard = self.workflow_lock.lock().await;
        let record = self.get_record(record_id).await?;
        if record.status != ModerationStatus::Flagged {
            return Err(Error::invalid_transition(record.status, outcome.status()));
        }
        let record = self
            .apply_resolution(record, outcome, reviewer, DecisionReason::HumanReview)
            .await?;
        self.close_open_appeals(&record, outcome, reviewer).await?;
        Ok(record)
    }

    /// Transition a flagged or rejected record. Caller holds `workflow_lock`.
    pub(crate) async fn apply_resolution(
        &self,
        mut record: ModerationRecord,
        outcome: ReviewOutcome,
        reviewer: &str,
        reason: DecisionReason,
    ) -> Result<ModerationRecord> {
        if reviewer.trim().is_empty() {
            return Err(Error::InvalidInput("reviewer must not be empty".into()));
        }
        if !matches!(
            record.status,
            ModerationStatus::Flagged | ModerationStatus::Rejected
        ) {
            return Err(Error::invalid_transition(record.status, outcome.status()));
        }

        let from = record.status;
        let now = self.clock.now();
        record.status = outcome.status();
        record.review_required = false;
        record.reason = reason;
        record.reviewed_by = Some(reviewer.to_string());
        record.updated_at = now;
        record.decided_at = Some(now);

        self.repository.save_record(&record).await?;
        info!(
            subsystem = logging::SUBSYSTEM_MODERATION,
            record_id = %record.id,
            %from,
            to = %record.status,
            reviewer,
            "Moderation record resolved"
        );
        self.sink.record_decided(&record).await;
        Ok(record)
    }

    pub async fn record(&self, record_id: Uuid) -> Result<Option<ModerationRecord>> {
        self.repository.get_record(record_id).await
    }

    pub(crate) async fn get_record(&self, record_id: Uuid) -> Result<ModerationRecord> {
        self.repository
            .get_record(record_id)
            .await?
            .ok_or(Error::RecordNotFound(record_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestguard_core::{RiskLevel, Thresholds};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::memory::{InMemoryConfigStore, InMemoryModerationRepository, RecordingSink};
    use crate::registry::RegistryConfig;

    fn config_with(thresholds: Thresholds) -> Configuration {
        Configuration::builtin(&Context::public_gallery()).with_thresholds(thresholds)
    }

    fn score(value: f64) -> ScoreResult {
        ScoreResult {
            composite_score: value,
            base_score: value,
            per_label_contribution: Default::default(),
            applied_multipliers: vec![],
            escalated: false,
            risk_level: RiskLevel::from_score(value),
            reasoning: vec![],
        }
    }

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

    #[test]
    fn test_decision_bands() {
        let config = config_with(Thresholds::new(20.0, 40.0, 80.0));
        let cases = [
            (0.0, ModerationStatus::Approved, DecisionReason::LowRisk),
            (19.9, ModerationStatus::Approved, DecisionReason::LowRisk),
            (20.0, ModerationStatus::Flagged, DecisionReason::Borderline),
            (39.9, ModerationStatus::Flagged, DecisionReason::Borderline),
            (40.0, ModerationStatus::Flagged, DecisionReason::RiskScore),
            (79.9, ModerationStatus::Flagged, DecisionReason::RiskScore),
            (80.0, ModerationStatus::Rejected, DecisionReason::HighRisk),
            (100.0, ModerationStatus::Rejected, DecisionReason::HighRisk),
        ];
        for (value, status, reason) in cases {
            let decision = decide(Some(&score(value)), &config, None);
            assert_eq!(decision.status, status, "score {}", value);
            assert_eq!(decision.reason, reason, "score {}", value);
            assert_eq!(
                decision.review_required,
                status == ModerationStatus::Flagged
            );
        }
    }

    #[test]
    fn test_collapsed_thresholds_flag_on_tie() {
        let config = config_with(Thresholds::new(25.0, 25.0, 80.0));
        let decision = decide(Some(&score(25.0)), &config, None);
        assert_eq!(decision.status, ModerationStatus::Flagged);
        assert!(decision.review_required);
    }

    #[test]
    fn test_missing_score_flags_with_note() {
        let config = config_with(Thresholds::new(25.0, 40.0, 80.0));
        let decision = decide(None, &config, None);
        assert_eq!(decision.status, ModerationStatus::Flagged);
        assert!(decision.review_required);
        assert_eq!(decision.reason, DecisionReason::AnalysisUnavailable);
        assert!(decision.note.is_some());
    }

    #[test]
    fn test_escalation_never_approves() {
        let config = config_with(Thresholds::new(25.0, 40.0, 80.0));
        let mut escalated = score(0.0);
        escalated.escalated = true;
        let decision = decide(Some(&escalated), &config, None);
        assert_eq!(decision.status, ModerationStatus::Flagged);
        assert_eq!(decision.reason, DecisionReason::Escalation);

        escalated.composite_score = 240.0;
        let decision = decide(Some(&escalated), &config, None);
        assert_eq!(decision.status, ModerationStatus::Rejected);
        assert_eq!(decision.reason, DecisionReason::Escalation);
    }

    #[test]
    fn test_all_zero_confidences_approved() {
        let config = Configuration::builtin(&Context::public_gallery());
        let scorer = RiskScoringEngine::new();
        let analysis = AnalysisResult::new()
            .with_label("BREAST_EXPOSED", 0.0)
            .with_label("GENITALIA_EXPOSED", 0.0)
            .with_label("FACE_DETECTED", 0.0);
        let result = scorer.score(&analysis, &config);
        assert_eq!(result.composite_score, 0.0);
        let decision = decide(Some(&result), &config, Some(&analysis.flags));
        assert_eq!(decision.status, ModerationStatus::Approved);
    }

    /// Random label confidences with the minor flag set never approve, even
    /// under a configuration that dropped the minor multiplier.
    #[test]
    fn test_minor_detected_never_approved() {
        let mut rng = StdRng::seed_from_u64(42);
        let scorer = RiskScoringEngine::new();
        let labels = [
            "BREAST_EXPOSED",
            "GENITALIA_EXPOSED",
            "BUTTOCKS_EXPOSED",
            "FACE_DETECTED",
            "UNKNOWN",
        ];
        let configs = [
            Configuration::builtin(&Context::public_gallery()),
            Configuration::builtin(&Context::private_content()),
            Configuration::builtin(&Context::paysite()).with_multipliers(vec![]),
        ];

        for _ in 0..500 {
            let mut analysis = AnalysisResult::new().with_minor_detected();
            for label in labels {
                if rng.gen_bool(0.6) {
                    analysis = analysis.with_label(label, rng.gen_range(-10.0..110.0));
                }
            }
            for config in &configs {
                let result = scorer.score(&analysis, config);
                let decision = decide(Some(&result), config, Some(&analysis.flags));
                assert_ne!(decision.status, ModerationStatus::Approved);
            }
        }
    }

    #[tokio::test]
    async fn test_scenario_breast_exposed_thresholds() {
        let scorer = RiskScoringEngine::new();
        let analysis = AnalysisResult::new().with_label("BREAST_EXPOSED", 60.0);

        let lenient = config_with(Thresholds::new(25.0, 25.0, 80.0));
        let result = scorer.score(&analysis, &lenient);
        assert_eq!(result.composite_score, 24.0);
        let decision = decide(Some(&result), &lenient, Some(&analysis.flags));
        assert_eq!(decision.status, ModerationStatus::Approved);
        assert!(!decision.review_required);

        let strict = config_with(Thresholds::new(15.0, 15.0, 80.0));
        let result = scorer.score(&analysis, &strict);
        let decision = decide(Some(&result), &strict, Some(&analysis.flags));
        assert_eq!(decision.status, ModerationStatus::Flagged);
        assert!(decision.review_required);
    }

    #[tokio::test]
    async fn test_evaluate_persists_and_notifies() {
        let (engine, sink) = engine();
        let record = engine
            .evaluate(
                EvaluationRequest::new("img-1", Context::public_gallery()),
                Ok(AnalysisResult::new()
                    .with_label("GENITALIA_EXPOSED", 100.0)
                    .with_label("BREAST_EXPOSED", 100.0)),
            )
            .await
            .unwrap();

        assert_eq!(record.status, ModerationStatus::Rejected);
        assert!(!record.review_required);
        assert_eq!(record.composite_score(), Some(100.0));
        let stored = engine.record(record.id).await.unwrap().unwrap();
        assert_eq!(stored, record);
        assert_eq!(sink.decided().await.len(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_analysis_failure_flags() {
        let (engine, _sink) = engine();
        let record = engine
            .evaluate(
                EvaluationRequest::new("img-2", Context::paysite()),
                Err(Error::AnalysisUnavailable("timeout after 30s".into())),
            )
            .await
            .unwrap();

        assert_eq!(record.status, ModerationStatus::Flagged);
        assert!(record.review_required);
        assert!(record.score.is_none());
        assert!(record.note.unwrap().contains("timeout after 30s"));
    }

    #[tokio::test]
    async fn test_resolve_flagged_record() {
        let (engine, sink) = engine();
        let record = engine
            .evaluate(
                EvaluationRequest::new("img-3", Context::public_gallery()),
                Ok(AnalysisResult::new().with_label("GENITALIA_EXPOSED", 50.0)),
            )
            .await
            .unwrap();
        assert_eq!(record.status, ModerationStatus::Flagged);

        let resolved = engine
            .resolve(record.id, ReviewOutcome::Approved, "reviewer-1")
            .await
            .unwrap();
        assert_eq!(resolved.status, ModerationStatus::Approved);
        assert!(!resolved.review_required);
        assert_eq!(resolved.reviewed_by.as_deref(), Some("reviewer-1"));
        assert_eq!(resolved.reason, DecisionReason::HumanReview);
        assert_eq!(sink.decided().await.len(), 2);

        let again = engine
            .resolve(record.id, ReviewOutcome::Rejected, "reviewer-2")
            .await;
        assert!(matches!(again, Err(Error::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_resolve_rejects_non_flagged() {
        let (engine, _sink) = engine();
        let record = engine
            .evaluate(
                EvaluationRequest::new("img-4", Context::public_gallery()),
                Ok(AnalysisResult::new()),
            )
            .await
            .unwrap();
        assert_eq!(record.status, ModerationStatus::Approved);

        let result = engine
            .resolve(record.id, ReviewOutcome::Rejected, "reviewer")
            .await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));

        let missing = engine
            .resolve(Uuid::new_v4(), ReviewOutcome::Approved, "reviewer")
            .await;
        assert!(matches!(missing, Err(Error::RecordNotFound(_))));
    }
}
