//! Database models
//!
//! Data structures representing database tables, plus the closed enums stored in them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Item granularity of a rule group and its collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Movie,
    Show,
    Season,
    Episode,
}

impl MediaType {
    pub const ALL: [MediaType; 4] = [
        MediaType::Movie,
        MediaType::Show,
        MediaType::Season,
        MediaType::Episode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Show => "show",
            MediaType::Season => "season",
            MediaType::Episode => "episode",
        }
    }

    /// Whether items of this type are managed by the show-oriented companion service
    pub fn is_show_hierarchy(&self) -> bool {
        !matches!(self, MediaType::Movie)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "show" => Ok(MediaType::Show),
            "season" => Ok(MediaType::Season),
            "episode" => Ok(MediaType::Episode),
            other => Err(format!("unknown media type: {}", other)),
        }
    }
}

/// Cleanup directive applied to collection members once their grace period ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Delete,
    Unmonitor,
    UnmonitorDeleteAll,
    UnmonitorDeleteExisting,
    ChangeQualityProfile,
    DoNothing,
}

impl RuleAction {
    pub const ALL: [RuleAction; 6] = [
        RuleAction::Delete,
        RuleAction::Unmonitor,
        RuleAction::UnmonitorDeleteAll,
        RuleAction::UnmonitorDeleteExisting,
        RuleAction::ChangeQualityProfile,
        RuleAction::DoNothing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Delete => "delete",
            RuleAction::Unmonitor => "unmonitor",
            RuleAction::UnmonitorDeleteAll => "unmonitor_delete_all",
            RuleAction::UnmonitorDeleteExisting => "unmonitor_delete_existing",
            RuleAction::ChangeQualityProfile => "change_quality_profile",
            RuleAction::DoNothing => "do_nothing",
        }
    }

    /// Actions that remove files and therefore fall back to deleting from the media server
    pub fn deletes_files(&self) -> bool {
        matches!(
            self,
            RuleAction::Delete | RuleAction::UnmonitorDeleteAll | RuleAction::UnmonitorDeleteExisting
        )
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delete" => Ok(RuleAction::Delete),
            "unmonitor" => Ok(RuleAction::Unmonitor),
            "unmonitor_delete_all" => Ok(RuleAction::UnmonitorDeleteAll),
            "unmonitor_delete_existing" => Ok(RuleAction::UnmonitorDeleteExisting),
            "change_quality_profile" => Ok(RuleAction::ChangeQualityProfile),
            "do_nothing" => Ok(RuleAction::DoNothing),
            other => Err(format!("unknown rule action: {}", other)),
        }
    }
}

/// Category of a collection log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Collection,
    Media,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Collection => "collection",
            LogCategory::Media => "media",
        }
    }
}

impl FromStr for LogCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collection" => Ok(LogCategory::Collection),
            "media" => Ok(LogCategory::Media),
            other => Err(format!("unknown log category: {}", other)),
        }
    }
}

/// Rule group record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGroup {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Target library; an empty id is a configuration error at run time
    pub library_id: String,
    pub data_type: MediaType,
    /// Opaque predicates handed to the rules engine in order
    pub rules: Vec<serde_json::Value>,
    pub is_active: bool,
    /// Per-group cron schedule; `None` falls back to the global schedule
    pub cron_schedule: Option<String>,
    pub collection_id: i64,
}

/// Collection record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    /// Id of the materialized collection in the media server
    pub media_server_id: Option<String>,
    pub library_id: String,
    pub title: String,
    pub description: Option<String>,
    pub media_type: MediaType,
    pub is_active: bool,
    /// User-curated collection; members are never removed by reconciliation
    pub manual: bool,
    pub delete_after_days: Option<i64>,
    pub arr_action: RuleAction,
    /// Name of the bound radarr/sonarr instance
    pub companion_server: Option<String>,
    pub list_exclusions: bool,
    pub quality_profile_id: Option<i64>,
    pub replace_files_on_quality_change: bool,
    pub keep_logs_for_months: i64,
    pub last_duration_ms: Option<i64>,
    pub handled_media_amount: i64,
    pub added_at: DateTime<Utc>,
}

impl Collection {
    /// Create an empty, not yet materialized collection
    pub fn new(title: impl Into<String>, library_id: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            id: 0,
            media_server_id: None,
            library_id: library_id.into(),
            title: title.into(),
            description: None,
            media_type,
            is_active: true,
            manual: false,
            delete_after_days: None,
            arr_action: RuleAction::DoNothing,
            companion_server: None,
            list_exclusions: false,
            quality_profile_id: None,
            replace_files_on_quality_change: false,
            keep_logs_for_months: 6,
            last_duration_ms: None,
            handled_media_amount: 0,
            added_at: Utc::now(),
        }
    }
}

/// Collection membership record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMedia {
    pub id: i64,
    pub collection_id: i64,
    /// Opaque item id in the media server's id space
    pub media_server_id: String,
    /// Secondary catalog id (tmdb for movies, tvdb for shows) when known
    pub secondary_id: Option<i64>,
    pub added_at: DateTime<Utc>,
    pub is_manual: bool,
}

/// Skip directive for an item and, through parent matching, its children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub id: i64,
    pub media_server_id: String,
    pub parent: Option<String>,
    /// `None` applies to every rule group
    pub rule_group_id: Option<i64>,
    pub media_type: Option<MediaType>,
}

/// Collection audit log record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionLog {
    pub id: i64,
    pub collection_id: i64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub category: LogCategory,
    pub meta: Option<serde_json::Value>,
}
