//! Structured logging schema for nestguard.
//!
//! Every crate tags its events with one of the subsystem values below in a
//! `subsystem` field so log aggregation can filter by origin.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, terminal state transitions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (labels, batch items) |

// ─── Subsystem values ──────────────────────────────────────────────────────

/// Configuration registry and cache.
pub const SUBSYSTEM_CONFIG: &str = "config";

/// Risk scoring.
pub const SUBSYSTEM_SCORING: &str = "scoring";

/// Moderation decisions and appeals.
pub const SUBSYSTEM_MODERATION: &str = "moderation";

/// Job scheduler and handlers.
pub const SUBSYSTEM_JOBS: &str = "jobs";

/// Command-line entry point.
pub const SUBSYSTEM_CLI: &str = "cli";

/// Log output format selector (`json` or `text`).
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
