//! Risk scoring engine.
//!
//! Combines weighted label confidences into a composite score:
//!
//! 1. each scored label contributes `confidence * weight / 100`;
//! 2. contributions are summed into the base score;
//! 3. enabled multipliers whose condition matches are applied in declaration
//!    order;
//! 4. the result is clamped to `[0, 100]`, except that a critical multiplier
//!    lifts the upper bound (escalation band).
//!
//! Labels without an effective weight (unknown, or their detector toggled
//! off) contribute zero.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use nestguard_core::defaults::{CONFIDENCE_MAX, NUDITY_REASONING_CONFIDENCE, SCORE_MAX};
use nestguard_core::{
    logging, AnalysisFlags, AnalysisResult, AppliedMultiplier, Configuration, RiskCondition,
    RiskLevel, ScoreResult,
};

/// Stateless scorer; all inputs come from the analysis and configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskScoringEngine;

impl RiskScoringEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, analysis: &AnalysisResult, config: &Configuration) -> ScoreResult {
        let mut per_label_contribution = BTreeMap::new();
        let mut base_score = 0.0;
        let mut nudity_labels = Vec::new();

        for (label, raw_confidence) in &analysis.labels {
            let Some(weight) = config.effective_weight(label) else {
                trace!(label = %label, "Label not scored");
                continue;
            };
            let confidence = sanitize_confidence(*raw_confidence);
            let contribution = confidence * weight / CONFIDENCE_MAX;
            trace!(label = %label, confidence, weight, contribution, "Label contribution");

            if weight > 0.0 && confidence > NUDITY_REASONING_CONFIDENCE {
                nudity_labels.push(label.as_str());
            }
            per_label_contribution.insert(label.clone(), contribution);
            base_score += contribution;
        }

        let mut score = base_score;
        let mut applied_multipliers = Vec::new();
        let mut escalated = false;
        for multiplier in config.risk_multipliers.iter().filter(|m| m.enabled) {
            if condition_matches(&multiplier.condition, &analysis.flags) {
                score *= multiplier.factor;
                escalated |= multiplier.critical;
                applied_multipliers.push(AppliedMultiplier {
                    condition: multiplier.condition.to_string(),
                    factor: multiplier.factor,
                    critical: multiplier.critical,
                });
            }
        }

        let composite_score = if escalated {
            score.max(0.0)
        } else {
            score.clamp(0.0, SCORE_MAX)
        };

        let mut reasoning = Vec::new();
        if !nudity_labels.is_empty() {
            reasoning.push(format!("nudity_detected: {}", nudity_labels.join(", ")));
        }
        reasoning.extend(applied_multipliers.iter().map(|m| m.condition.clone()));
        let disabled = config.disabled_components();
        if !disabled.is_empty() {
            let names: Vec<&str> = disabled.iter().map(|c| c.as_str()).collect();
            reasoning.push(format!("components_disabled: {}", names.join(", ")));
        }
        if reasoning.is_empty() {
            reasoning.push("clean_content".to_string());
        }

        let risk_level = RiskLevel::from_score(composite_score);
        debug!(
            subsystem = logging::SUBSYSTEM_SCORING,
            context = %config.context,
            base_score,
            composite_score,
            escalated,
            ?risk_level,
            "Composite score computed"
        );

        ScoreResult {
            composite_score,
            base_score,
            per_label_contribution,
            applied_multipliers,
            escalated,
            risk_level,
            reasoning,
        }
    }
}

/// Out-of-range and non-finite confidences become 0; values above the
/// scale are capped.
fn sanitize_confidence(confidence: f64) -> f64 {
    if !confidence.is_finite() || confidence < 0.0 {
        0.0
    } else {
        confidence.min(CONFIDENCE_MAX)
    }
}

fn condition_matches(condition: &RiskCondition, flags: &AnalysisFlags) -> bool {
    match condition {
        RiskCondition::MinorDetected => flags.minor_detected,
        RiskCondition::ChildContent => flags.child_content,
        RiskCondition::Flag(name) => flags.has(name),
    }
}
