//! Repository pattern implementation for data access layer
//!
//! Each repository wraps the shared [`DatabaseManager`] and maps rows inside the
//! blocking closure, so callers only ever see domain types.

use crate::core::error::{Result, SweepError};
use crate::db::manager::DatabaseManager;
use crate::db::models::{
    Collection, CollectionLog, CollectionMedia, Exclusion, LogCategory, MediaType, RuleGroup,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::Arc;

/// Generic repository trait for CRUD operations
#[async_trait]
pub trait Repository<T>: Send + Sync {
    /// Find an entity by its ID
    async fn find_by_id(&self, id: i64) -> Result<Option<T>>;

    /// Find all entities
    async fn find_all(&self) -> Result<Vec<T>>;

    /// Insert a new entity, returning its assigned ID
    async fn create(&self, entity: &T) -> Result<i64>;

    /// Update an existing entity
    async fn update(&self, entity: &T) -> Result<()>;

    /// Delete an entity by its ID
    async fn delete(&self, id: i64) -> Result<()>;
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

/// Read a closed enum stored as text
fn enum_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

/// Fixed-width so stored timestamps compare correctly as text
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Timestamps are written as RFC 3339; SQLite's `CURRENT_TIMESTAMP` format is accepted too
fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| conversion_error(idx, format!("invalid timestamp {}: {}", raw, e)))
}

const RULE_GROUP_COLUMNS: &str =
    "id, name, description, library_id, data_type, rules, is_active, cron_schedule, collection_id";

fn map_rule_group(row: &Row<'_>) -> rusqlite::Result<RuleGroup> {
    let rules: String = row.get(5)?;
    let rules = serde_json::from_str(&rules)
        .map_err(|e| conversion_error(5, format!("invalid rules json: {}", e)))?;

    Ok(RuleGroup {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        library_id: row.get(3)?,
        data_type: enum_column(row, 4)?,
        rules,
        is_active: row.get(6)?,
        cron_schedule: row.get(7)?,
        collection_id: row.get(8)?,
    })
}

/// Repository for rule groups
pub struct RuleGroupRepository {
    db: Arc<DatabaseManager>,
}

impl RuleGroupRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Rule groups eligible for scheduling
    pub async fn find_active(&self) -> Result<Vec<RuleGroup>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM rule_groups WHERE is_active = 1 ORDER BY id",
                        RULE_GROUP_COLUMNS
                    ))
                    .map_err(SweepError::DatabaseError)?;

                let groups = stmt
                    .query_map([], map_rule_group)
                    .map_err(SweepError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(SweepError::DatabaseError)?;

                Ok(groups)
            })
            .await
    }

    pub async fn find_by_collection(&self, collection_id: i64) -> Result<Option<RuleGroup>> {
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {} FROM rule_groups WHERE collection_id = ?",
                        RULE_GROUP_COLUMNS
                    ),
                    [collection_id],
                    map_rule_group,
                )
                .optional()
                .map_err(SweepError::DatabaseError)
            })
            .await
    }
}

#[async_trait]
impl Repository<RuleGroup> for RuleGroupRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<RuleGroup>> {
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM rule_groups WHERE id = ?", RULE_GROUP_COLUMNS),
                    [id],
                    map_rule_group,
                )
                .optional()
                .map_err(SweepError::DatabaseError)
            })
            .await
    }

    async fn find_all(&self) -> Result<Vec<RuleGroup>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn
                    .prepare(&format!("SELECT {} FROM rule_groups ORDER BY id", RULE_GROUP_COLUMNS))
                    .map_err(SweepError::DatabaseError)?;

                let groups = stmt
                    .query_map([], map_rule_group)
                    .map_err(SweepError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(SweepError::DatabaseError)?;

                Ok(groups)
            })
            .await
    }

    async fn create(&self, group: &RuleGroup) -> Result<i64> {
        let group = group.clone();
        let rules = serde_json::to_string(&group.rules)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO rule_groups (name, description, library_id, data_type, rules, is_active, cron_schedule, collection_id) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        group.name,
                        group.description,
                        group.library_id,
                        group.data_type.as_str(),
                        rules,
                        group.is_active,
                        group.cron_schedule,
                        group.collection_id,
                    ],
                )
                .map_err(SweepError::DatabaseError)?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    async fn update(&self, group: &RuleGroup) -> Result<()> {
        let group = group.clone();
        let rules = serde_json::to_string(&group.rules)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE rule_groups SET name = ?, description = ?, library_id = ?, data_type = ?, \
                     rules = ?, is_active = ?, cron_schedule = ?, collection_id = ? WHERE id = ?",
                    params![
                        group.name,
                        group.description,
                        group.library_id,
                        group.data_type.as_str(),
                        rules,
                        group.is_active,
                        group.cron_schedule,
                        group.collection_id,
                        group.id,
                    ],
                )
                .map_err(SweepError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM rule_groups WHERE id = ?", [id])
                    .map_err(SweepError::DatabaseError)?;
                Ok(())
            })
            .await
    }
}

const COLLECTION_COLUMNS: &str = "id, media_server_id, library_id, title, description, type, \
     is_active, manual, delete_after_days, arr_action, companion_server, list_exclusions, \
     quality_profile_id, replace_files_on_quality_change, keep_logs_for_months, \
     last_duration_ms, handled_media_amount, added_at";

fn map_collection(row: &Row<'_>) -> rusqlite::Result<Collection> {
    Ok(Collection {
        id: row.get(0)?,
        media_server_id: row.get(1)?,
        library_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        media_type: enum_column(row, 5)?,
        is_active: row.get(6)?,
        manual: row.get(7)?,
        delete_after_days: row.get(8)?,
        arr_action: enum_column(row, 9)?,
        companion_server: row.get(10)?,
        list_exclusions: row.get(11)?,
        quality_profile_id: row.get(12)?,
        replace_files_on_quality_change: row.get(13)?,
        keep_logs_for_months: row.get(14)?,
        last_duration_ms: row.get(15)?,
        handled_media_amount: row.get(16)?,
        added_at: timestamp_column(row, 17)?,
    })
}

/// Repository for collections
pub struct CollectionRepository {
    db: Arc<DatabaseManager>,
}

impl CollectionRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Record (or clear) the id of the materialized media-server collection
    pub async fn set_media_server_id(&self, id: i64, media_server_id: Option<String>) -> Result<()> {
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE collections SET media_server_id = ? WHERE id = ?",
                    params![media_server_id, id],
                )
                .map_err(SweepError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    /// Store run statistics after a rule group finishes
    pub async fn record_run(&self, id: i64, duration_ms: i64, handled: i64) -> Result<()> {
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE collections SET last_duration_ms = ?, \
                     handled_media_amount = handled_media_amount + ? WHERE id = ?",
                    params![duration_ms, handled, id],
                )
                .map_err(SweepError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    /// Re-type a collection whose rule group changed granularity
    ///
    /// Members of the old type are meaningless for the new one, so they go too.
    pub async fn reset_type(&self, id: i64, media_type: MediaType) -> Result<()> {
        self.db
            .transaction(move |tx| {
                tx.execute("DELETE FROM collection_media WHERE collection_id = ?", [id])
                    .map_err(SweepError::DatabaseError)?;
                tx.execute(
                    "UPDATE collections SET type = ?, media_server_id = NULL WHERE id = ?",
                    params![media_type.as_str(), id],
                )
                .map_err(SweepError::DatabaseError)?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl Repository<Collection> for CollectionRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Collection>> {
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM collections WHERE id = ?", COLLECTION_COLUMNS),
                    [id],
                    map_collection,
                )
                .optional()
                .map_err(SweepError::DatabaseError)
            })
            .await
    }

    async fn find_all(&self) -> Result<Vec<Collection>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn
                    .prepare(&format!("SELECT {} FROM collections ORDER BY id", COLLECTION_COLUMNS))
                    .map_err(SweepError::DatabaseError)?;

                let collections = stmt
                    .query_map([], map_collection)
                    .map_err(SweepError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(SweepError::DatabaseError)?;

                Ok(collections)
            })
            .await
    }

    async fn create(&self, collection: &Collection) -> Result<i64> {
        let c = collection.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO collections (media_server_id, library_id, title, description, type, \
                     is_active, manual, delete_after_days, arr_action, companion_server, list_exclusions, \
                     quality_profile_id, replace_files_on_quality_change, keep_logs_for_months, \
                     last_duration_ms, handled_media_amount, added_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        c.media_server_id,
                        c.library_id,
                        c.title,
                        c.description,
                        c.media_type.as_str(),
                        c.is_active,
                        c.manual,
                        c.delete_after_days,
                        c.arr_action.as_str(),
                        c.companion_server,
                        c.list_exclusions,
                        c.quality_profile_id,
                        c.replace_files_on_quality_change,
                        c.keep_logs_for_months,
                        c.last_duration_ms,
                        c.handled_media_amount,
                        format_timestamp(&c.added_at),
                    ],
                )
                .map_err(SweepError::DatabaseError)?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    async fn update(&self, collection: &Collection) -> Result<()> {
        let c = collection.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE collections SET media_server_id = ?, library_id = ?, title = ?, description = ?, \
                     type = ?, is_active = ?, manual = ?, delete_after_days = ?, arr_action = ?, \
                     companion_server = ?, list_exclusions = ?, quality_profile_id = ?, \
                     replace_files_on_quality_change = ?, keep_logs_for_months = ? WHERE id = ?",
                    params![
                        c.media_server_id,
                        c.library_id,
                        c.title,
                        c.description,
                        c.media_type.as_str(),
                        c.is_active,
                        c.manual,
                        c.delete_after_days,
                        c.arr_action.as_str(),
                        c.companion_server,
                        c.list_exclusions,
                        c.quality_profile_id,
                        c.replace_files_on_quality_change,
                        c.keep_logs_for_months,
                        c.id,
                    ],
                )
                .map_err(SweepError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM collections WHERE id = ?", [id])
                    .map_err(SweepError::DatabaseError)?;
                Ok(())
            })
            .await
    }
}

fn map_collection_media(row: &Row<'_>) -> rusqlite::Result<CollectionMedia> {
    Ok(CollectionMedia {
        id: row.get(0)?,
        collection_id: row.get(1)?,
        media_server_id: row.get(2)?,
        secondary_id: row.get(3)?,
        added_at: timestamp_column(row, 4)?,
        is_manual: row.get(5)?,
    })
}

/// Repository for collection membership
pub struct CollectionMediaRepository {
    db: Arc<DatabaseManager>,
}

impl CollectionMediaRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn find_by_collection(&self, collection_id: i64) -> Result<Vec<CollectionMedia>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, collection_id, media_server_id, secondary_id, added_at, is_manual \
                         FROM collection_media WHERE collection_id = ? ORDER BY id",
                    )
                    .map_err(SweepError::DatabaseError)?;

                let media = stmt
                    .query_map([collection_id], map_collection_media)
                    .map_err(SweepError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(SweepError::DatabaseError)?;

                Ok(media)
            })
            .await
    }

    /// Insert a membership row; an existing `(collection, item)` pair is left untouched
    ///
    /// Returns whether a row was inserted.
    pub async fn add(&self, media: &CollectionMedia) -> Result<bool> {
        let m = media.clone();
        self.db
            .execute(move |conn| {
                let inserted = conn
                    .execute(
                        "INSERT OR IGNORE INTO collection_media \
                         (collection_id, media_server_id, secondary_id, added_at, is_manual) \
                         VALUES (?, ?, ?, ?, ?)",
                        params![
                            m.collection_id,
                            m.media_server_id,
                            m.secondary_id,
                            format_timestamp(&m.added_at),
                            m.is_manual,
                        ],
                    )
                    .map_err(SweepError::DatabaseError)?;
                Ok(inserted > 0)
            })
            .await
    }

    /// Returns whether a row was removed
    pub async fn remove(&self, collection_id: i64, media_server_id: &str) -> Result<bool> {
        let media_server_id = media_server_id.to_string();
        self.db
            .execute(move |conn| {
                let removed = conn
                    .execute(
                        "DELETE FROM collection_media WHERE collection_id = ? AND media_server_id = ?",
                        params![collection_id, media_server_id],
                    )
                    .map_err(SweepError::DatabaseError)?;
                Ok(removed > 0)
            })
            .await
    }

    pub async fn count(&self, collection_id: i64) -> Result<i64> {
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM collection_media WHERE collection_id = ?",
                    [collection_id],
                    |row| row.get(0),
                )
                .map_err(SweepError::DatabaseError)
            })
            .await
    }
}

fn map_exclusion(row: &Row<'_>) -> rusqlite::Result<Exclusion> {
    let media_type: Option<String> = row.get(4)?;
    let media_type = media_type
        .map(|raw| raw.parse::<MediaType>().map_err(|e| conversion_error(4, e)))
        .transpose()?;

    Ok(Exclusion {
        id: row.get(0)?,
        media_server_id: row.get(1)?,
        parent: row.get(2)?,
        rule_group_id: row.get(3)?,
        media_type,
    })
}

/// Repository for exclusions
pub struct ExclusionRepository {
    db: Arc<DatabaseManager>,
}

impl ExclusionRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Global exclusions plus those bound to `rule_group_id`
    pub async fn find_for_rule_group(&self, rule_group_id: i64) -> Result<Vec<Exclusion>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, media_server_id, parent, rule_group_id, type FROM exclusions \
                         WHERE rule_group_id IS NULL OR rule_group_id = ? ORDER BY id",
                    )
                    .map_err(SweepError::DatabaseError)?;

                let exclusions = stmt
                    .query_map([rule_group_id], map_exclusion)
                    .map_err(SweepError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(SweepError::DatabaseError)?;

                Ok(exclusions)
            })
            .await
    }

    pub async fn create(&self, exclusion: &Exclusion) -> Result<i64> {
        let e = exclusion.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO exclusions (media_server_id, parent, rule_group_id, type) VALUES (?, ?, ?, ?)",
                    params![
                        e.media_server_id,
                        e.parent,
                        e.rule_group_id,
                        e.media_type.map(|t| t.as_str()),
                    ],
                )
                .map_err(SweepError::DatabaseError)?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM exclusions WHERE id = ?", [id])
                    .map_err(SweepError::DatabaseError)?;
                Ok(())
            })
            .await
    }
}

/// Repository for the per-collection audit log
pub struct CollectionLogRepository {
    db: Arc<DatabaseManager>,
}

impl CollectionLogRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn add(
        &self,
        collection_id: i64,
        message: impl Into<String>,
        category: LogCategory,
        meta: Option<serde_json::Value>,
    ) -> Result<()> {
        let message = message.into();
        let meta = meta.map(|m| m.to_string());
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO collection_logs (collection_id, timestamp, message, type, meta) \
                     VALUES (?, ?, ?, ?, ?)",
                    params![
                        collection_id,
                        format_timestamp(&Utc::now()),
                        message,
                        category.as_str(),
                        meta,
                    ],
                )
                .map_err(SweepError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    /// Newest first
    pub async fn find_by_collection(&self, collection_id: i64) -> Result<Vec<CollectionLog>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, collection_id, timestamp, message, type, meta FROM collection_logs \
                         WHERE collection_id = ? ORDER BY timestamp DESC, id DESC",
                    )
                    .map_err(SweepError::DatabaseError)?;

                let logs = stmt
                    .query_map([collection_id], |row| {
                        let meta: Option<String> = row.get(5)?;
                        Ok(CollectionLog {
                            id: row.get(0)?,
                            collection_id: row.get(1)?,
                            timestamp: timestamp_column(row, 2)?,
                            message: row.get(3)?,
                            category: enum_column(row, 4)?,
                            meta: meta.and_then(|m| serde_json::from_str(&m).ok()),
                        })
                    })
                    .map_err(SweepError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(SweepError::DatabaseError)?;

                Ok(logs)
            })
            .await
    }

    /// Delete entries older than `cutoff`, returning how many went
    pub async fn prune_older_than(&self, collection_id: i64, cutoff: DateTime<Utc>) -> Result<usize> {
        self.db
            .execute(move |conn| {
                conn.execute(
                    "DELETE FROM collection_logs WHERE collection_id = ? AND timestamp < ?",
                    params![collection_id, format_timestamp(&cutoff)],
                )
                .map_err(SweepError::DatabaseError)
            })
            .await
    }
}
