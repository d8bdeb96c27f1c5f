//! Database module
//!
//! This module provides database management functionality including:
//! - Database connection pool management
//! - Repository pattern implementations
//! - Versioned schema and data migrations
//! - Data models and the closed enums stored in them

pub mod manager;
pub mod migrations;
pub mod models;
pub mod repository;

#[cfg(test)]
pub mod fixtures;

pub use manager::DatabaseManager;
pub use models::{
    Collection, CollectionLog, CollectionMedia, Exclusion, LogCategory, MediaType, RuleAction,
    RuleGroup,
};
pub use repository::{
    CollectionLogRepository, CollectionMediaRepository, CollectionRepository,
    ExclusionRepository, Repository, RuleGroupRepository,
};
