//! Core engine module
//!
//! This module provides the rule execution engine including:
//! - Single-flight task queue with cooperative cancellation
//! - Cron scheduling of rule groups
//! - Paginated rule evaluation and collection reconciliation
//! - Companion service actions and grace-period handling
//! - Event bus, progress reporting, configuration and logging

pub mod actions;
pub mod collection_handler;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod event_bus;
pub mod identifier;
pub mod logging;
pub mod progress;
pub mod reconciler;
pub mod rule_executor;
pub mod scheduler;
pub mod services;
pub mod task_queue;

pub use actions::{ActionHandler, ActionOutcome};
pub use collection_handler::CollectionHandler;
pub use config::Config;
pub use error::{ErrorContext, Result, SweepError};
pub use evaluation::{RuleEvaluator, RunContext};
pub use event_bus::{Event, EventBus, EventType};
pub use identifier::IdentifierResolver;
pub use logging::Logger;
pub use progress::{ProgressReporter, RuleExecutionProgress, RunState};
pub use reconciler::Reconciler;
pub use rule_executor::RuleExecutor;
pub use scheduler::Scheduler;
pub use services::CollectionService;
pub use task_queue::{EnqueueOutcome, QueueStatus, RunOutcome, TaskQueue};
