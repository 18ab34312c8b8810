//! # nestguard-moderation
//!
//! Configurable content-risk scoring and moderation decisions.
//!
//! This crate provides:
//! - A configuration registry with TTL caching and safe built-in defaults
//! - The risk scoring engine (weighted labels, ordered multipliers, escalation)
//! - The decision engine with human review and appeals
//! - A pipeline that enqueues follow-on jobs for decided items
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nestguard_moderation::{
//!     ConfigurationRegistry, EvaluationRequest, InMemoryConfigStore,
//!     InMemoryModerationRepository, ModerationEngine, RegistryConfig,
//! };
//! use nestguard_core::{AnalysisResult, Context, NoopSink};
//!
//! let registry = Arc::new(ConfigurationRegistry::with_config(
//!     Arc::new(InMemoryConfigStore::new()),
//!     RegistryConfig::from_env(),
//! ));
//! let engine = ModerationEngine::new(
//!     registry,
//!     Arc::new(InMemoryModerationRepository::new()),
//!     Arc::new(NoopSink),
//! );
//!
//! let analysis = AnalysisResult::new().with_label("BREAST_EXPOSED", 60.0);
//! let record = engine
//!     .evaluate(EvaluationRequest::new("img-1", Context::public_gallery()), Ok(analysis))
//!     .await?;
//! println!("{} ({:?})", record.status, record.composite_score());
//! ```

pub mod appeals;
pub mod cache;
pub mod decision;
pub mod memory;
pub mod pipeline;
pub mod registry;
pub mod scoring;

pub use cache::{CacheKey, CacheStats, ConfigCache, TtlCache};
pub use decision::{decide, EvaluationRequest, ModerationEngine};
pub use memory::{InMemoryConfigStore, InMemoryModerationRepository, RecordingSink};
pub use pipeline::{plan_follow_on, ItemSubmission, ModerationPipeline, PipelineOutcome};
pub use registry::{parse_stored, ConfigurationRegistry, RegistryConfig};
pub use scoring::RiskScoringEngine;
