//! Database migrations
//!
//! Versioned schema and data migrations tracked in `schema_migrations`. They run
//! synchronously when the [`DatabaseManager`](super::DatabaseManager) is created,
//! before the scheduler or the queue can read a single row.

use crate::core::error::{Result, SweepError};
use rusqlite::Connection;
use tracing::{info, warn};

/// Migration version tracking table
const MIGRATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
)
"#;

/// Initial schema (version 1)
const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_server_id TEXT,
    library_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    type TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    manual INTEGER NOT NULL DEFAULT 0,
    delete_after_days INTEGER,
    arr_action TEXT NOT NULL DEFAULT 'do_nothing',
    companion_server TEXT,
    list_exclusions INTEGER NOT NULL DEFAULT 0,
    quality_profile_id INTEGER,
    replace_files_on_quality_change INTEGER NOT NULL DEFAULT 0,
    keep_logs_for_months INTEGER NOT NULL DEFAULT 6,
    last_duration_ms INTEGER,
    handled_media_amount INTEGER NOT NULL DEFAULT 0,
    added_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS rule_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    library_id TEXT NOT NULL DEFAULT '',
    data_type TEXT NOT NULL,
    rules TEXT NOT NULL DEFAULT '[]',
    is_active INTEGER NOT NULL DEFAULT 1,
    cron_schedule TEXT,
    collection_id INTEGER NOT NULL,
    FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS collection_media (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection_id INTEGER NOT NULL,
    media_server_id TEXT NOT NULL,
    secondary_id INTEGER,
    added_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    is_manual INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE,
    UNIQUE(collection_id, media_server_id)
);

CREATE TABLE IF NOT EXISTS exclusions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_server_id TEXT NOT NULL,
    parent TEXT,
    rule_group_id INTEGER,
    type TEXT,
    FOREIGN KEY (rule_group_id) REFERENCES rule_groups(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS collection_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection_id INTEGER NOT NULL,
    timestamp DATETIME NOT NULL,
    message TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT 'collection',
    meta TEXT,
    FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_rule_groups_collection ON rule_groups(collection_id);
CREATE INDEX IF NOT EXISTS idx_collection_media_collection ON collection_media(collection_id);
CREATE INDEX IF NOT EXISTS idx_exclusions_rule_group ON exclusions(rule_group_id);
CREATE INDEX IF NOT EXISTS idx_collection_logs_collection ON collection_logs(collection_id, timestamp);
"#;

/// Rewrite legacy numeric codes into their string form (version 2)
///
/// Older databases stored granularity as 1..4 and actions as 0..6 in the same
/// columns that now hold strings.
const MIGRATION_V2: &str = r#"
UPDATE collections SET type = CASE CAST(type AS TEXT)
    WHEN '1' THEN 'movie'
    WHEN '2' THEN 'show'
    WHEN '3' THEN 'season'
    WHEN '4' THEN 'episode'
    ELSE type END;

UPDATE rule_groups SET data_type = CASE CAST(data_type AS TEXT)
    WHEN '1' THEN 'movie'
    WHEN '2' THEN 'show'
    WHEN '3' THEN 'season'
    WHEN '4' THEN 'episode'
    ELSE data_type END;

UPDATE exclusions SET type = CASE CAST(type AS TEXT)
    WHEN '1' THEN 'movie'
    WHEN '2' THEN 'show'
    WHEN '3' THEN 'season'
    WHEN '4' THEN 'episode'
    ELSE type END
WHERE type IS NOT NULL;

UPDATE collections SET arr_action = CASE CAST(arr_action AS TEXT)
    WHEN '0' THEN 'delete'
    WHEN '1' THEN 'unmonitor_delete_all'
    WHEN '3' THEN 'unmonitor_delete_existing'
    WHEN '4' THEN 'unmonitor'
    WHEN '5' THEN 'do_nothing'
    WHEN '6' THEN 'change_quality_profile'
    ELSE arr_action END;
"#;

/// Retired legacy action code 2 (version 3)
///
/// The code was dropped before the string form existed and its rows were left
/// untouched by version 2. They become `do_nothing` so no file is touched on
/// an action whose meaning is unknown.
const MIGRATION_V3: &str = r#"
UPDATE collections SET arr_action = 'do_nothing'
WHERE CAST(arr_action AS TEXT) = '2';
"#;

/// Run all pending database migrations
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    info!("Running database migrations");

    conn.execute_batch(MIGRATION_TABLE)
        .map_err(SweepError::DatabaseError)?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(SweepError::DatabaseError)?;

    info!("Current database schema version: {}", current_version);

    if current_version < 1 {
        info!("Applying migration v1: Initial schema");
        apply_migration(conn, 1, MIGRATION_V1)?;
    }

    if current_version < 2 {
        info!("Applying migration v2: Legacy numeric type and action codes");
        apply_migration(conn, 2, MIGRATION_V2)?;
    }

    if current_version < 3 {
        info!("Applying migration v3: Retired action code");
        apply_migration(conn, 3, MIGRATION_V3)?;
    }

    info!("Database migrations completed successfully");
    Ok(())
}

/// Apply a single migration in its own transaction
fn apply_migration(conn: &mut Connection, version: i64, sql: &str) -> Result<()> {
    let tx = conn.transaction().map_err(SweepError::DatabaseError)?;

    tx.execute_batch(sql).map_err(|e| {
        warn!("Migration v{} failed: {}", version, e);
        SweepError::MigrationError(format!("v{}: {}", version, e))
    })?;

    tx.execute("INSERT INTO schema_migrations (version) VALUES (?)", [version])
        .map_err(SweepError::DatabaseError)?;

    tx.commit().map_err(SweepError::DatabaseError)?;

    info!("Migration v{} applied successfully", version);
    Ok(())
}
