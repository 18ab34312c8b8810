//! # nestguard-core
//!
//! Core types, traits, and abstractions for the nestguard moderation core.
//!
//! This crate provides the data model (configurations, analysis results,
//! moderation records, appeals, jobs), the shared error type, default
//! constants and the collaborator traits the other crates depend on.

pub mod clock;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
