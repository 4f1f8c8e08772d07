//! SQLite storage layer.
//!
//! One pooled database holds all state: users, classes, classification
//! rules, limits, class-to-limit mappings, limit config, activity
//! observations, date-scoped overrides and the global/per-user key-value
//! config. WAL mode plus a busy timeout covers the request-scoped
//! concurrency model; cascading mutations run in explicit transactions.

use crate::common::get_data_dir;
use crate::config;
use crate::error::Result;
use crate::models::{DEFAULT_CLASS_NAME, DEFAULT_RULE_PRIORITY};
use crate::retry::{retry_if_retryable, RetryConfig};
use chrono::Local;
use log::{info, warn};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Current schema version stamped into `schema_migrations`.
pub const SCHEMA_VERSION: u32 = 1;

pub const SCHEMA: &str = r#"
-- Users; existence provisions the total limit
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY
);

-- Activity classes; exactly one row has is_default = 1
CREATE TABLE IF NOT EXISTS classes (
    class_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    is_default INTEGER NOT NULL DEFAULT 0
);

-- Ordered regex rules; the default rule is the catch-all
CREATE TABLE IF NOT EXISTS class_rules (
    rule_id INTEGER PRIMARY KEY AUTOINCREMENT,
    class_id INTEGER NOT NULL REFERENCES classes(class_id) ON DELETE CASCADE,
    priority INTEGER NOT NULL,
    pattern TEXT NOT NULL,
    is_default INTEGER NOT NULL DEFAULT 0
);

-- Per-user budget containers; one is_total row per user
CREATE TABLE IF NOT EXISTS limits (
    limit_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    is_total INTEGER NOT NULL DEFAULT 0,
    UNIQUE(user_id, name)
);

-- Many-to-many class/limit mapping
CREATE TABLE IF NOT EXISTS class_limits (
    class_id INTEGER NOT NULL REFERENCES classes(class_id) ON DELETE CASCADE,
    limit_id INTEGER NOT NULL REFERENCES limits(limit_id) ON DELETE CASCADE,
    PRIMARY KEY (class_id, limit_id)
);

-- Key-value settings scoped to one limit
CREATE TABLE IF NOT EXISTS limit_config (
    limit_id INTEGER NOT NULL REFERENCES limits(limit_id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (limit_id, key)
);

-- Observations; class_id is deliberately outside the key so
-- reclassification updates rows in place
CREATE TABLE IF NOT EXISTS activity (
    user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    timestamp INTEGER NOT NULL,
    title TEXT NOT NULL,
    class_id INTEGER NOT NULL REFERENCES classes(class_id),
    PRIMARY KEY (user_id, timestamp, title)
);

-- Per-day manual adjustments; at most one row per (user, date, limit)
CREATE TABLE IF NOT EXISTS overrides (
    user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    limit_id INTEGER NOT NULL REFERENCES limits(limit_id) ON DELETE CASCADE,
    minutes INTEGER,
    unlocked INTEGER,
    slots TEXT,
    PRIMARY KEY (user_id, date, limit_id)
);

-- Global ('' scope) and per-user key-value config
CREATE TABLE IF NOT EXISTS config (
    scope TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (scope, key)
);

-- Indexes for the hot paths
CREATE INDEX IF NOT EXISTS idx_activity_user_ts ON activity(user_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_rules_priority ON class_rules(priority DESC, rule_id ASC);

-- Migration tracking table
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT
);

-- Meta table for storing maintenance metadata
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

pub struct Database {
    #[allow(dead_code)]
    path: PathBuf,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

pub type DbConnection = PooledConnection<SqliteConnectionManager>;

impl Database {
    /// Open (or create) the database at `db_path` and ensure schema and
    /// seed rows exist.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let app_config = config::get_config();

        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            // WAL for concurrent request handlers; FK enforcement carries
            // the cascade semantics in the schema
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "busy_timeout", app_config.database.busy_timeout_ms)?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(app_config.database.max_connections)
            .build(manager)?;

        let db = Self {
            path: db_path.to_path_buf(),
            pool: Arc::new(pool),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open the database at the default data-dir location.
    pub fn open_default() -> Result<Self> {
        let app_config = config::get_config();
        let path = get_data_dir().join(&app_config.database.path);
        Self::new(&path)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(SCHEMA)?;

        let version: Option<u32> = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_migrations (version, applied_at, description)
                     VALUES (?1, ?2, 'Initial schema')",
                    params![SCHEMA_VERSION, Local::now().to_rfc3339()],
                )?;
                info!("Created new database at schema version {}", SCHEMA_VERSION);
            }
            Some(v) if v > SCHEMA_VERSION => {
                warn!(
                    "Database schema version {} is newer than this build ({})",
                    v, SCHEMA_VERSION
                );
            }
            Some(_) => {}
        }

        self.seed_defaults(&conn)?;
        Ok(())
    }

    /// Ensure the default class and its catch-all rule exist. Idempotent;
    /// runs on every open so a damaged seed heals itself.
    fn seed_defaults(&self, conn: &Connection) -> Result<()> {
        let default_class: Option<i64> = conn
            .query_row(
                "SELECT class_id FROM classes WHERE is_default = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let class_id = match default_class {
            Some(id) => id,
            None => {
                conn.execute(
                    "INSERT INTO classes (name, is_default) VALUES (?1, 1)",
                    params![DEFAULT_CLASS_NAME],
                )?;
                let id = conn.last_insert_rowid();
                // A class created later auto-maps to every total limit; the
                // seed has to cover existing ones too
                conn.execute(
                    "INSERT OR IGNORE INTO class_limits (class_id, limit_id)
                     SELECT ?1, limit_id FROM limits WHERE is_total = 1",
                    params![id],
                )?;
                info!("Seeded default class '{}'", DEFAULT_CLASS_NAME);
                id
            }
        };

        let have_default_rule: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM class_rules WHERE is_default = 1",
                [],
                |row| Ok(row.get::<_, i64>(0)? > 0),
            )
            .unwrap_or(false);

        if !have_default_rule {
            conn.execute(
                "INSERT INTO class_rules (class_id, priority, pattern, is_default)
                 VALUES (?1, ?2, '', 1)",
                params![class_id, DEFAULT_RULE_PRIORITY],
            )?;
            info!("Seeded default catch-all classification rule");
        }

        Ok(())
    }

    /// Get a pooled connection, retrying transient pool/busy failures.
    pub fn get_connection(&self) -> Result<DbConnection> {
        let retry_config = RetryConfig::for_db_ops();
        retry_if_retryable(&retry_config, || Ok(self.pool.get()?))
    }

    /// Check if database is initialized and accessible
    pub fn is_healthy(&self) -> bool {
        if let Ok(conn) = self.get_connection() {
            conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
        } else {
            false
        }
    }
}

/// Results from database maintenance operations
#[derive(Debug)]
pub struct MaintenanceResult {
    pub checkpoint_done: bool,
    pub optimize_done: bool,
    pub vacuum_done: bool,
    pub integrity_ok: bool,
}

impl Database {
    /// Perform database maintenance: WAL checkpoint, optimize, conditional
    /// VACUUM and an integrity check.
    pub fn maintenance(&self, force_vacuum: bool) -> Result<MaintenanceResult> {
        let conn = self.get_connection()?;

        let checkpoint_result: i32 =
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| row.get(0))?;
        let checkpoint_done = checkpoint_result == 0;

        conn.execute_batch("PRAGMA optimize")?;
        let optimize_done = true;

        let vacuum_done = if force_vacuum || should_vacuum(&conn)? {
            conn.execute_batch("VACUUM")?;
            update_last_vacuum(&conn)?;
            true
        } else {
            false
        };

        let integrity_result: String =
            conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        let integrity_ok = integrity_result == "ok";

        Ok(MaintenanceResult {
            checkpoint_done,
            optimize_done,
            vacuum_done,
            integrity_ok,
        })
    }
}

/// Check if VACUUM should be performed
fn should_vacuum(conn: &Connection) -> Result<bool> {
    use chrono::Utc;

    // Vacuum if the file has grown past 10MB
    let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    let db_size_mb = (page_count * page_size) as f64 / (1024.0 * 1024.0);

    if db_size_mb > 10.0 {
        return Ok(true);
    }

    // Or if the last vacuum was more than 7 days ago
    let last_vacuum: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'last_vacuum'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(last_vacuum_str) = last_vacuum {
        if let Ok(last_vacuum_time) = chrono::DateTime::parse_from_rfc3339(&last_vacuum_str) {
            let days_since = (Utc::now() - last_vacuum_time.with_timezone(&Utc)).num_days();
            return Ok(days_since > 7);
        }
    }

    Ok(true)
}

/// Update the last_vacuum timestamp in meta table
fn update_last_vacuum(conn: &Connection) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('last_vacuum', ?1)",
        params![now],
    )?;
    Ok(())
}
