//! mediasweep library
//!
//! Rule-driven media collection engine: evaluates rule groups against a media
//! library, keeps the matching collections in sync and cleans up their members
//! through companion services.

pub mod clients;
pub mod core;
pub mod db;

// Re-export commonly used types
pub use crate::core::{Config, EventBus, ProgressReporter, Scheduler, TaskQueue};
pub use db::DatabaseManager;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
