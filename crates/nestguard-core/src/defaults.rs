//! Centralized default constants for nestguard.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// SCORING
// =============================================================================

/// Upper bound of the nominal score scale.
pub const SCORE_MAX: f64 = 100.0;

/// Upper bound of a single label confidence.
pub const CONFIDENCE_MAX: f64 = 100.0;

/// Multiplier applied when the analysis reports a minor.
pub const MINOR_MULTIPLIER: f64 = 10.0;

/// Multiplier applied when child-related content is described.
pub const CHILD_CONTENT_MULTIPLIER: f64 = 2.0;

/// Risk level boundaries (lower bound of each level).
pub const RISK_LEVEL_LOW: f64 = 20.0;
pub const RISK_LEVEL_MEDIUM: f64 = 40.0;
pub const RISK_LEVEL_HIGH: f64 = 60.0;
pub const RISK_LEVEL_CRITICAL: f64 = 80.0;

/// Confidence above which a weighted label is reported as nudity in reasoning.
pub const NUDITY_REASONING_CONFIDENCE: f64 = 30.0;

// =============================================================================
// CONFIGURATION REGISTRY
// =============================================================================

/// Configuration cache TTL in seconds (5 minutes).
pub const CONFIG_CACHE_TTL_SECS: u64 = 300;

/// Version number assigned to built-in default configurations.
pub const DEFAULT_CONFIG_VERSION: u32 = 0;

// =============================================================================
// ANALYSIS
// =============================================================================

/// Timeout for a single analysis collaborator call in seconds.
pub const ANALYSIS_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// POST-PROCESSING
// =============================================================================

/// Default thumbnail edge length in pixels.
pub const THUMBNAIL_SIZE: u32 = 320;

/// Default watermark text.
pub const WATERMARK_TEXT: &str = "nestguard";

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum attempts (first run included) for a job.
pub const JOB_MAX_ATTEMPTS: u32 = 3;

/// Default number of concurrent scheduler workers.
pub const JOB_MAX_CONCURRENT: usize = 3;

/// Default job execution timeout in seconds (5 minutes).
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Default per-item attempts inside a batch job.
pub const BATCH_ITEM_MAX_ATTEMPTS: u32 = 2;

/// Default per-item timeout inside a batch job in seconds.
pub const BATCH_ITEM_TIMEOUT_SECS: u64 = 60;

/// Default number of batch items processed concurrently.
pub const BATCH_ITEM_CONCURRENCY: usize = 4;

/// Default scheduler event broadcast channel capacity.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
