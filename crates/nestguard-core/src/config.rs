//! Scoring and decision configuration.
//!
//! A [`Configuration`] is keyed by `(context, scope_id)` and carries the
//! detector toggles, label weights, decision thresholds, risk multipliers and
//! post-processing policy used for one usage intent.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// CONTEXT
// =============================================================================

/// Usage-intent scope a configuration applies to.
///
/// Lowercase ASCII letters, digits, `_` and `-` only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Context(String);

impl Context {
    pub const PUBLIC_GALLERY: &'static str = "public_gallery";
    pub const PREMIUM_GALLERY: &'static str = "premium_gallery";
    pub const PRIVATE_CONTENT: &'static str = "private_content";
    pub const PAYSITE: &'static str = "paysite";

    /// Parse and validate a context name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidInput("context must not be empty".into()));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(Error::InvalidInput(format!(
                "context '{}' contains invalid characters",
                name
            )));
        }
        Ok(Self(name))
    }

    pub fn public_gallery() -> Self {
        Self(Self::PUBLIC_GALLERY.to_string())
    }

    pub fn premium_gallery() -> Self {
        Self(Self::PREMIUM_GALLERY.to_string())
    }

    pub fn private_content() -> Self {
        Self(Self::PRIVATE_CONTENT.to_string())
    }

    pub fn paysite() -> Self {
        Self(Self::PAYSITE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Context {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Context> for String {
    fn from(value: Context) -> Self {
        value.0
    }
}

impl std::str::FromStr for Context {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// =============================================================================
// DETECTION COMPONENTS
// =============================================================================

/// A detector that can be toggled per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionComponent {
    BreastDetection,
    GenitaliaDetection,
    ButtocksDetection,
    AnusDetection,
    FaceDetection,
    AgeEstimation,
    ChildContentDetection,
}

impl DetectionComponent {
    pub const ALL: [DetectionComponent; 7] = [
        DetectionComponent::BreastDetection,
        DetectionComponent::GenitaliaDetection,
        DetectionComponent::ButtocksDetection,
        DetectionComponent::AnusDetection,
        DetectionComponent::FaceDetection,
        DetectionComponent::AgeEstimation,
        DetectionComponent::ChildContentDetection,
    ];

    /// The component that produces a detection label, if known.
    pub fn for_label(label: &str) -> Option<Self> {
        match label {
            "BREAST_EXPOSED" => Some(Self::BreastDetection),
            "GENITALIA_EXPOSED" | "GENITALIA" => Some(Self::GenitaliaDetection),
            "BUTTOCKS_EXPOSED" => Some(Self::ButtocksDetection),
            "ANUS_EXPOSED" => Some(Self::AnusDetection),
            "FACE_DETECTED" => Some(Self::FaceDetection),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BreastDetection => "breast_detection",
            Self::GenitaliaDetection => "genitalia_detection",
            Self::ButtocksDetection => "buttocks_detection",
            Self::AnusDetection => "anus_detection",
            Self::FaceDetection => "face_detection",
            Self::AgeEstimation => "age_estimation",
            Self::ChildContentDetection => "child_content_detection",
        }
    }
}

impl fmt::Display for DetectionComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// THRESHOLDS
// =============================================================================

/// Decision thresholds on the composite score.
///
/// Invariant: `approve_below <= flag_above <= reject_above`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Scores strictly below this are approved.
    pub approve_below: f64,
    /// Scores at or above this are flagged for risk.
    pub flag_above: f64,
    /// Scores at or above this are rejected.
    pub reject_above: f64,
}

impl Thresholds {
    pub fn new(approve_below: f64, flag_above: f64, reject_above: f64) -> Self {
        Self {
            approve_below,
            flag_above,
            reject_above,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let all = [self.approve_below, self.flag_above, self.reject_above];
        if all.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(Error::InvalidConfiguration(
                "thresholds must be finite and non-negative".into(),
            ));
        }
        if self.approve_below > self.flag_above || self.flag_above > self.reject_above {
            return Err(Error::InvalidConfiguration(format!(
                "thresholds out of order: approve_below={} flag_above={} reject_above={}",
                self.approve_below, self.flag_above, self.reject_above
            )));
        }
        Ok(())
    }

    pub fn is_ordered(&self) -> bool {
        self.validate().is_ok()
    }
}

// =============================================================================
// RISK MULTIPLIERS
// =============================================================================

/// Trigger condition for a risk multiplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCondition {
    MinorDetected,
    ChildContent,
    /// A named custom flag reported by the analysis collaborator.
    Flag(String),
}

impl fmt::Display for RiskCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinorDetected => f.write_str("minor_detected"),
            Self::ChildContent => f.write_str("child_content"),
            Self::Flag(name) => write!(f, "flag:{}", name),
        }
    }
}

/// Factor applied to the base score when its condition matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMultiplier {
    pub condition: RiskCondition,
    pub factor: f64,
    /// Critical multipliers lift the 100 cap on the composite score.
    #[serde(default)]
    pub critical: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RiskMultiplier {
    pub fn new(condition: RiskCondition, factor: f64) -> Self {
        Self {
            condition,
            factor,
            critical: false,
            enabled: true,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// POST-PROCESSING
// =============================================================================

/// Follow-on work requested once a decision is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostProcessing {
    #[serde(default = "default_true")]
    pub thumbnail: bool,
    #[serde(default)]
    pub watermark: bool,
    #[serde(default = "default_watermark_text")]
    pub watermark_text: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_watermark_text() -> String {
    defaults::WATERMARK_TEXT.to_string()
}

fn default_max_attempts() -> u32 {
    defaults::JOB_MAX_ATTEMPTS
}

impl Default for PostProcessing {
    fn default() -> Self {
        Self {
            thumbnail: true,
            watermark: false,
            watermark_text: default_watermark_text(),
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
        }
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Complete scoring/decision configuration for one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub context: Context,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    #[serde(default)]
    pub version: u32,
    /// Missing components are enabled.
    #[serde(default)]
    pub component_toggles: BTreeMap<DetectionComponent, bool>,
    #[serde(default)]
    pub label_weights: BTreeMap<String, f64>,
    pub thresholds: Thresholds,
    /// Applied in declaration order.
    #[serde(default)]
    pub risk_multipliers: Vec<RiskMultiplier>,
    #[serde(default)]
    pub post_processing: PostProcessing,
}

impl Configuration {
    /// Built-in safe default for a context.
    pub fn builtin(context: &Context) -> Self {
        let thresholds = match context.as_str() {
            Context::PUBLIC_GALLERY => Thresholds::new(25.0, 40.0, 80.0),
            Context::PREMIUM_GALLERY => Thresholds::new(40.0, 60.0, 90.0),
            Context::PRIVATE_CONTENT => Thresholds::new(60.0, 75.0, 95.0),
            Context::PAYSITE => Thresholds::new(50.0, 70.0, 90.0),
            _ => Thresholds::new(40.0, 40.0, 80.0),
        };

        let mut component_toggles: BTreeMap<DetectionComponent, bool> =
            DetectionComponent::ALL.iter().map(|c| (*c, true)).collect();
        if context.as_str() == Context::PRIVATE_CONTENT {
            component_toggles.insert(DetectionComponent::FaceDetection, false);
        }

        let label_weights = [
            ("BREAST_EXPOSED", 40.0),
            ("GENITALIA_EXPOSED", 60.0),
            ("BUTTOCKS_EXPOSED", 30.0),
            ("ANUS_EXPOSED", 60.0),
            ("FACE_DETECTED", 0.0),
        ]
        .into_iter()
        .map(|(label, weight)| (label.to_string(), weight))
        .collect();

        let post_processing = PostProcessing {
            watermark: matches!(context.as_str(), Context::PREMIUM_GALLERY | Context::PAYSITE),
            ..PostProcessing::default()
        };

        Self {
            context: context.clone(),
            scope_id: None,
            version: defaults::DEFAULT_CONFIG_VERSION,
            component_toggles,
            label_weights,
            thresholds,
            risk_multipliers: vec![
                RiskMultiplier::new(RiskCondition::MinorDetected, defaults::MINOR_MULTIPLIER)
                    .critical(),
                RiskMultiplier::new(
                    RiskCondition::ChildContent,
                    defaults::CHILD_CONTENT_MULTIPLIER,
                )
                .critical(),
            ],
            post_processing,
        }
    }

    /// Reject configurations that must never be applied.
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;

        for (label, weight) in &self.label_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(Error::InvalidConfiguration(format!(
                    "weight for '{}' must be finite and non-negative, got {}",
                    label, weight
                )));
            }
        }

        for multiplier in &self.risk_multipliers {
            if !multiplier.factor.is_finite() || multiplier.factor <= 0.0 {
                return Err(Error::InvalidConfiguration(format!(
                    "multiplier for {} must be finite and positive, got {}",
                    multiplier.condition, multiplier.factor
                )));
            }
        }

        if self.post_processing.max_attempts == 0 {
            return Err(Error::InvalidConfiguration(
                "post_processing.max_attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }

    pub fn is_component_enabled(&self, component: DetectionComponent) -> bool {
        self.component_toggles.get(&component).copied().unwrap_or(true)
    }

    pub fn enabled_components(&self) -> Vec<DetectionComponent> {
        DetectionComponent::ALL
            .iter()
            .copied()
            .filter(|c| self.is_component_enabled(*c))
            .collect()
    }

    pub fn disabled_components(&self) -> Vec<DetectionComponent> {
        DetectionComponent::ALL
            .iter()
            .copied()
            .filter(|c| !self.is_component_enabled(*c))
            .collect()
    }

    /// Weight for a label, or `None` when the label is not scored.
    ///
    /// A label whose detector is toggled off is treated as unweighted.
    pub fn effective_weight(&self, label: &str) -> Option<f64> {
        let weight = *self.label_weights.get(label)?;
        match DetectionComponent::for_label(label) {
            Some(component) if !self.is_component_enabled(component) => None,
            _ => Some(weight),
        }
    }

    pub fn with_scope(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_weight(mut self, label: impl Into<String>, weight: f64) -> Self {
        self.label_weights.insert(label.into(), weight);
        self
    }

    pub fn with_component(mut self, component: DetectionComponent, enabled: bool) -> Self {
        self.component_toggles.insert(component, enabled);
        self
    }

    pub fn with_multipliers(mut self, multipliers: Vec<RiskMultiplier>) -> Self {
        self.risk_multipliers = multipliers;
        self
    }
}
