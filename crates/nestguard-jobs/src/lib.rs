//! # nestguard-jobs
//!
//! Background job scheduling for nestguard.
//!
//! This crate provides:
//! - A priority band queue (`high > normal > low`, FIFO within a band)
//! - A bounded worker pool with per-attempt timeouts and retry limits
//! - Progress and lifecycle notifications via broadcast channels
//! - Image and batch job handlers delegating to collaborator traits
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nestguard_jobs::{BatchHandler, SchedulerBuilder, SchedulerConfig};
//!
//! let scheduler = SchedulerBuilder::new()
//!     .with_config(SchedulerConfig::from_env())
//!     .with_handler(BatchHandler::new(Arc::new(my_executor)))
//!     .build();
//!
//! let handle = scheduler.start();
//! let job_id = scheduler.submit(new_job)?;
//!
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod batch;
pub mod handler;
pub mod handlers;
pub mod queue;
pub mod scheduler;

pub use batch::{BatchConfig, BatchHandler};
pub use handler::{JobContext, JobHandler, JobResult, ProgressCallback};
pub use handlers::{image_handlers, ImageHandler};
pub use queue::PriorityQueue;
pub use scheduler::{
    JobFilter, JobScheduler, SchedulerBuilder, SchedulerConfig, SchedulerEvent, SchedulerHandle,
};
