//! The limit graph and its mutations.
//!
//! Classes, classification rules, limits, class-to-limit mappings, limit
//! config, overrides and the global/per-user key-value config all live
//! here, together with the cascade rules that keep them consistent:
//!
//! - every user has exactly one total limit, created with the user;
//! - the total limit is auto-mapped to every class, current and future,
//!   as a standing rule (maintained at user creation and class creation);
//! - deleting a class reclassifies its historical activity in the same
//!   transaction;
//! - total-limit mutations are silent no-ops, default-class and
//!   default-rule mutations are errors.

use crate::classifier::{compile_pattern, Classifier};
use crate::error::{Result, WardenError};
use crate::models::{
    Class, ClassRule, Limit, LimitSnapshot, OverridePatch, OverrideRow, TOTAL_LIMIT_NAME,
};
use crate::slots::parse_slot_spec;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::{BTreeMap, HashMap};

const WEEKDAY_KEYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Create `user` if absent, provisioning its total limit and the standing
/// mapping of every existing class to it. Idempotent.
pub fn ensure_user(conn: &mut Connection, user: &str) -> Result<()> {
    let tx = conn.transaction()?;
    ensure_user_tx(&tx, user)?;
    tx.commit()?;
    Ok(())
}

pub(crate) fn ensure_user_tx(tx: &Transaction, user: &str) -> Result<()> {
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO users (user_id) VALUES (?1)",
        params![user],
    )?;
    if inserted == 0 {
        return Ok(());
    }

    tx.execute(
        "INSERT INTO limits (user_id, name, is_total) VALUES (?1, ?2, 1)",
        params![user, TOTAL_LIMIT_NAME],
    )?;
    let total_id = tx.last_insert_rowid();
    tx.execute(
        "INSERT OR IGNORE INTO class_limits (class_id, limit_id)
         SELECT class_id, ?1 FROM classes",
        params![total_id],
    )?;
    info!("Provisioned user '{}' with total limit {}", user, total_id);
    Ok(())
}

/// Remove a user and everything hanging off it: limits (with their config,
/// mappings and overrides), and activity rows.
pub fn remove_user(conn: &mut Connection, user: &str) -> Result<()> {
    let tx = conn.transaction()?;
    let removed = tx.execute("DELETE FROM users WHERE user_id = ?1", params![user])?;
    if removed == 0 {
        return Err(WardenError::unknown("user", user));
    }
    tx.execute("DELETE FROM config WHERE scope = ?1", params![user])?;
    tx.commit()?;
    info!("Removed user '{}'", user);
    Ok(())
}

pub fn list_users(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT user_id FROM users ORDER BY user_id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

fn read_class(row: &rusqlite::Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: row.get(0)?,
        name: row.get(1)?,
        is_default: row.get::<_, i64>(2)? != 0,
    })
}

pub fn get_class(conn: &Connection, class_id: i64) -> Result<Option<Class>> {
    Ok(conn
        .query_row(
            "SELECT class_id, name, is_default FROM classes WHERE class_id = ?1",
            params![class_id],
            read_class,
        )
        .optional()?)
}

/// The seeded catch-all class. Its absence is an internal-consistency
/// failure, not a user error.
pub fn default_class(conn: &Connection) -> Result<Class> {
    conn.query_row(
        "SELECT class_id, name, is_default FROM classes WHERE is_default = 1",
        [],
        read_class,
    )
    .optional()?
    .ok_or(WardenError::NoRuleMatched)
}

pub fn list_classes(conn: &Connection) -> Result<Vec<Class>> {
    let mut stmt =
        conn.prepare("SELECT class_id, name, is_default FROM classes ORDER BY class_id")?;
    let rows = stmt.query_map([], read_class)?;
    Ok(rows.collect::<rusqlite::Result<Vec<Class>>>()?)
}

/// Create a class and auto-map it to every user's total limit.
pub fn add_class(conn: &mut Connection, name: &str) -> Result<Class> {
    let tx = conn.transaction()?;
    tx.execute("INSERT INTO classes (name) VALUES (?1)", params![name])?;
    let class_id = tx.last_insert_rowid();
    // Standing rule: new classes count against every total limit
    tx.execute(
        "INSERT OR IGNORE INTO class_limits (class_id, limit_id)
         SELECT ?1, limit_id FROM limits WHERE is_total = 1",
        params![class_id],
    )?;
    tx.commit()?;
    Ok(Class {
        id: class_id,
        name: name.to_string(),
        is_default: false,
    })
}

pub fn rename_class(conn: &Connection, class_id: i64, new_name: &str) -> Result<()> {
    let class =
        get_class(conn, class_id)?.ok_or_else(|| WardenError::unknown("class", class_id))?;
    if class.is_default {
        return Err(WardenError::protected("cannot rename the default class"));
    }
    conn.execute(
        "UPDATE classes SET name = ?1 WHERE class_id = ?2",
        params![new_name, class_id],
    )?;
    Ok(())
}

/// Remove a class. Its rules and mappings cascade away, and its historical
/// activity rows are reclassified in place against the remaining rules,
/// all in one transaction.
pub fn remove_class(conn: &mut Connection, class_id: i64) -> Result<()> {
    let class =
        get_class(conn, class_id)?.ok_or_else(|| WardenError::unknown("class", class_id))?;
    if class.is_default {
        return Err(WardenError::protected("cannot remove the default class"));
    }

    let tx = conn.transaction()?;

    // Drop the class's rules first so reclassification sees the world
    // without them
    tx.execute(
        "DELETE FROM class_rules WHERE class_id = ?1",
        params![class_id],
    )?;

    let classifier = Classifier::load(&tx)?;
    let titles: Vec<String> = {
        let mut stmt =
            tx.prepare("SELECT DISTINCT title FROM activity WHERE class_id = ?1")?;
        let rows = stmt.query_map(params![class_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()?
    };
    for title in &titles {
        let new_class = classifier.classify_class(title)?;
        tx.execute(
            "UPDATE activity SET class_id = ?1 WHERE class_id = ?2 AND title = ?3",
            params![new_class, class_id, title],
        )?;
    }

    tx.execute("DELETE FROM classes WHERE class_id = ?1", params![class_id])?;
    tx.commit()?;
    info!(
        "Removed class {} ('{}'), reclassified {} distinct titles",
        class_id,
        class.name,
        titles.len()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Classification rules
// ---------------------------------------------------------------------------

fn read_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClassRule> {
    Ok(ClassRule {
        id: row.get(0)?,
        class_id: row.get(1)?,
        priority: row.get(2)?,
        pattern: row.get(3)?,
        is_default: row.get::<_, i64>(4)? != 0,
    })
}

pub fn get_rule(conn: &Connection, rule_id: i64) -> Result<Option<ClassRule>> {
    Ok(conn
        .query_row(
            "SELECT rule_id, class_id, priority, pattern, is_default
             FROM class_rules WHERE rule_id = ?1",
            params![rule_id],
            read_rule,
        )
        .optional()?)
}

pub fn list_rules(conn: &Connection) -> Result<Vec<ClassRule>> {
    let mut stmt = conn.prepare(
        "SELECT rule_id, class_id, priority, pattern, is_default
         FROM class_rules ORDER BY priority DESC, rule_id ASC",
    )?;
    let rows = stmt.query_map([], read_rule)?;
    Ok(rows.collect::<rusqlite::Result<Vec<ClassRule>>>()?)
}

/// Add a classification rule. The pattern is compiled up front so an
/// invalid regex never reaches the table.
pub fn add_rule(conn: &Connection, class_id: i64, priority: i64, pattern: &str) -> Result<ClassRule> {
    compile_pattern(pattern)?;
    if get_class(conn, class_id)?.is_none() {
        return Err(WardenError::unknown("class", class_id));
    }
    conn.execute(
        "INSERT INTO class_rules (class_id, priority, pattern) VALUES (?1, ?2, ?3)",
        params![class_id, priority, pattern],
    )?;
    Ok(ClassRule {
        id: conn.last_insert_rowid(),
        class_id,
        priority,
        pattern: pattern.to_string(),
        is_default: false,
    })
}

pub fn update_rule(conn: &Connection, rule_id: i64, priority: i64, pattern: &str) -> Result<()> {
    let rule = get_rule(conn, rule_id)?.ok_or_else(|| WardenError::unknown("rule", rule_id))?;
    if rule.is_default {
        return Err(WardenError::protected(
            "cannot alter the default classification rule",
        ));
    }
    compile_pattern(pattern)?;
    conn.execute(
        "UPDATE class_rules SET priority = ?1, pattern = ?2 WHERE rule_id = ?3",
        params![priority, pattern, rule_id],
    )?;
    Ok(())
}

pub fn remove_rule(conn: &Connection, rule_id: i64) -> Result<()> {
    let rule = get_rule(conn, rule_id)?.ok_or_else(|| WardenError::unknown("rule", rule_id))?;
    if rule.is_default {
        return Err(WardenError::protected(
            "cannot remove the default classification rule",
        ));
    }
    conn.execute(
        "DELETE FROM class_rules WHERE rule_id = ?1",
        params![rule_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

fn read_limit(row: &rusqlite::Row<'_>) -> rusqlite::Result<Limit> {
    Ok(Limit {
        id: row.get(0)?,
        user: row.get(1)?,
        name: row.get(2)?,
        is_total: row.get::<_, i64>(3)? != 0,
    })
}

pub fn get_limit(conn: &Connection, limit_id: i64) -> Result<Option<Limit>> {
    Ok(conn
        .query_row(
            "SELECT limit_id, user_id, name, is_total FROM limits WHERE limit_id = ?1",
            params![limit_id],
            read_limit,
        )
        .optional()?)
}

pub fn list_limits(conn: &Connection, user: &str) -> Result<Vec<Limit>> {
    let mut stmt = conn.prepare(
        "SELECT limit_id, user_id, name, is_total
         FROM limits WHERE user_id = ?1 ORDER BY limit_id",
    )?;
    let rows = stmt.query_map(params![user], read_limit)?;
    Ok(rows.collect::<rusqlite::Result<Vec<Limit>>>()?)
}

pub fn add_limit(conn: &Connection, user: &str, name: &str) -> Result<Limit> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM users WHERE user_id = ?1",
            params![user],
            |row| Ok(row.get::<_, i64>(0)? > 0),
        )
        .unwrap_or(false);
    if !exists {
        return Err(WardenError::unknown("user", user));
    }
    conn.execute(
        "INSERT INTO limits (user_id, name, is_total) VALUES (?1, ?2, 0)",
        params![user, name],
    )?;
    Ok(Limit {
        id: conn.last_insert_rowid(),
        user: user.to_string(),
        name: name.to_string(),
        is_total: false,
    })
}

/// Rename a limit. Renaming the total limit is a silent no-op.
pub fn rename_limit(conn: &Connection, limit_id: i64, new_name: &str) -> Result<()> {
    let limit =
        get_limit(conn, limit_id)?.ok_or_else(|| WardenError::unknown("limit", limit_id))?;
    if limit.is_total {
        debug!("Ignoring rename of total limit {}", limit_id);
        return Ok(());
    }
    conn.execute(
        "UPDATE limits SET name = ?1 WHERE limit_id = ?2",
        params![new_name, limit_id],
    )?;
    Ok(())
}

/// Remove a limit; config rows, mappings and overrides cascade away.
/// Removing the total limit is a silent no-op.
pub fn remove_limit(conn: &mut Connection, limit_id: i64) -> Result<()> {
    let limit =
        get_limit(conn, limit_id)?.ok_or_else(|| WardenError::unknown("limit", limit_id))?;
    if limit.is_total {
        debug!("Ignoring removal of total limit {}", limit_id);
        return Ok(());
    }
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM limits WHERE limit_id = ?1", params![limit_id])?;
    tx.commit()?;
    info!("Removed limit {} ('{}')", limit_id, limit.name);
    Ok(())
}

/// The user's total limit. Every provisioned user has one.
pub fn total_limit(conn: &Connection, user: &str) -> Result<Limit> {
    conn.query_row(
        "SELECT limit_id, user_id, name, is_total
         FROM limits WHERE user_id = ?1 AND is_total = 1",
        params![user],
        read_limit,
    )
    .optional()?
    .ok_or_else(|| WardenError::unknown("user", user))
}

// ---------------------------------------------------------------------------
// Class-to-limit mappings
// ---------------------------------------------------------------------------

/// Map a class to a limit. Duplicates surface as a distinguishable error;
/// edits to a total limit's auto-maintained mappings are silent no-ops.
pub fn add_mapping(conn: &Connection, class_id: i64, limit_id: i64) -> Result<()> {
    if get_class(conn, class_id)?.is_none() {
        return Err(WardenError::unknown("class", class_id));
    }
    let limit =
        get_limit(conn, limit_id)?.ok_or_else(|| WardenError::unknown("limit", limit_id))?;
    if limit.is_total {
        debug!("Ignoring manual mapping edit on total limit {}", limit_id);
        return Ok(());
    }

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO class_limits (class_id, limit_id) VALUES (?1, ?2)",
        params![class_id, limit_id],
    )?;
    if inserted == 0 {
        return Err(WardenError::DuplicateMapping { class_id, limit_id });
    }
    Ok(())
}

/// Unmap a class from a limit. Removing a mapping that does not exist is a
/// no-op; so is touching a total limit's mappings.
pub fn remove_mapping(conn: &Connection, class_id: i64, limit_id: i64) -> Result<()> {
    if let Some(limit) = get_limit(conn, limit_id)? {
        if limit.is_total {
            debug!("Ignoring manual mapping edit on total limit {}", limit_id);
            return Ok(());
        }
    }
    conn.execute(
        "DELETE FROM class_limits WHERE class_id = ?1 AND limit_id = ?2",
        params![class_id, limit_id],
    )?;
    Ok(())
}

/// Limit ids a class counts against for one user, total limit included.
pub fn limit_ids_for_class(conn: &Connection, user: &str, class_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT cl.limit_id FROM class_limits cl
         JOIN limits l ON l.limit_id = cl.limit_id
         WHERE l.user_id = ?1 AND cl.class_id = ?2
         ORDER BY cl.limit_id",
    )?;
    let rows = stmt.query_map(params![user, class_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

/// Full class → limit-ids mapping for one user.
pub fn class_limit_map(conn: &Connection, user: &str) -> Result<HashMap<i64, Vec<i64>>> {
    let mut stmt = conn.prepare(
        "SELECT cl.class_id, cl.limit_id FROM class_limits cl
         JOIN limits l ON l.limit_id = cl.limit_id
         WHERE l.user_id = ?1
         ORDER BY cl.class_id, cl.limit_id",
    )?;
    let rows = stmt.query_map(params![user], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut map: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in rows {
        let (class_id, limit_id) = row?;
        map.entry(class_id).or_default().push(limit_id);
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Limit configuration
// ---------------------------------------------------------------------------

fn validate_minutes(key: &str, value: &str) -> Result<()> {
    let minutes: i64 = value.parse().map_err(|_| {
        WardenError::config(format!("{} must be an integer, got '{}'", key, value))
    })?;
    if minutes < 0 {
        return Err(WardenError::config(format!(
            "{} must not be negative, got {}",
            key, minutes
        )));
    }
    Ok(())
}

fn validate_limit_config(key: &str, value: &str) -> Result<()> {
    match key {
        "minutes_day" | "minutes_week" => validate_minutes(key, value),
        "times" => parse_slot_spec(value).map(|_| ()),
        "locked" => match value {
            "0" | "1" | "true" | "false" => Ok(()),
            _ => Err(WardenError::config(format!(
                "locked must be a boolean, got '{}'",
                value
            ))),
        },
        _ => {
            if let Some(day) = key.strip_prefix("minutes_") {
                if WEEKDAY_KEYS.contains(&day) {
                    return validate_minutes(key, value);
                }
            }
            if let Some(day) = key.strip_prefix("times_") {
                if WEEKDAY_KEYS.contains(&day) {
                    return parse_slot_spec(value).map(|_| ());
                }
            }
            Err(WardenError::config(format!(
                "unrecognized limit config key '{}'",
                key
            )))
        }
    }
}

/// Set one limit config key. The value is validated before anything is
/// written, so an invalid slot spec or minute count never partially applies.
pub fn set_limit_config(conn: &Connection, limit_id: i64, key: &str, value: &str) -> Result<()> {
    if get_limit(conn, limit_id)?.is_none() {
        return Err(WardenError::unknown("limit", limit_id));
    }
    validate_limit_config(key, value)?;
    conn.execute(
        "INSERT INTO limit_config (limit_id, key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(limit_id, key) DO UPDATE SET value = ?3",
        params![limit_id, key, value],
    )?;
    Ok(())
}

pub fn clear_limit_config(conn: &Connection, limit_id: i64, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM limit_config WHERE limit_id = ?1 AND key = ?2",
        params![limit_id, key],
    )?;
    Ok(())
}

/// All limits of a user with their config rows. The total limit appears
/// even when it has no explicit config.
pub fn limit_snapshots(conn: &Connection, user: &str) -> Result<HashMap<i64, LimitSnapshot>> {
    let mut snapshots: HashMap<i64, LimitSnapshot> = list_limits(conn, user)?
        .into_iter()
        .map(|limit| {
            (
                limit.id,
                LimitSnapshot {
                    limit,
                    config: HashMap::new(),
                },
            )
        })
        .collect();

    let mut stmt = conn.prepare(
        "SELECT lc.limit_id, lc.key, lc.value FROM limit_config lc
         JOIN limits l ON l.limit_id = lc.limit_id
         WHERE l.user_id = ?1",
    )?;
    let rows = stmt.query_map(params![user], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    for row in rows {
        let (limit_id, key, value) = row?;
        if let Some(snapshot) = snapshots.get_mut(&limit_id) {
            snapshot.config.insert(key, value);
        }
    }

    Ok(snapshots)
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

fn read_override(row: &rusqlite::Row<'_>) -> rusqlite::Result<OverrideRow> {
    Ok(OverrideRow {
        user: row.get(0)?,
        date: row.get(1)?,
        limit_id: row.get(2)?,
        minutes: row.get(3)?,
        unlocked: row
            .get::<_, Option<i64>>(4)?
            .map(|v| v != 0),
        slots: row.get(5)?,
    })
}

pub fn get_override(
    conn: &Connection,
    user: &str,
    date: &str,
    limit_id: i64,
) -> Result<Option<OverrideRow>> {
    Ok(conn
        .query_row(
            "SELECT user_id, date, limit_id, minutes, unlocked, slots
             FROM overrides WHERE user_id = ?1 AND date = ?2 AND limit_id = ?3",
            params![user, date, limit_id],
            read_override,
        )
        .optional()?)
}

pub fn list_overrides(conn: &Connection, user: &str, date: &str) -> Result<Vec<OverrideRow>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, date, limit_id, minutes, unlocked, slots
         FROM overrides WHERE user_id = ?1 AND date = ?2 ORDER BY limit_id",
    )?;
    let rows = stmt.query_map(params![user, date], read_override)?;
    Ok(rows.collect::<rusqlite::Result<Vec<OverrideRow>>>()?)
}

/// Set override fields for (user, date, limit). Fields absent from the
/// patch keep their stored value; at most one row exists per key.
pub fn set_override(
    conn: &mut Connection,
    user: &str,
    date: &str,
    limit_id: i64,
    patch: &OverridePatch,
) -> Result<()> {
    if let Some(spec) = &patch.slots {
        // Validate up front; an empty spec is legal and means zero time
        parse_slot_spec(spec)?;
    }
    if get_limit(conn, limit_id)?.is_none() {
        return Err(WardenError::unknown("limit", limit_id));
    }

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT OR IGNORE INTO overrides (user_id, date, limit_id) VALUES (?1, ?2, ?3)",
        params![user, date, limit_id],
    )?;
    if let Some(minutes) = patch.minutes {
        tx.execute(
            "UPDATE overrides SET minutes = ?1
             WHERE user_id = ?2 AND date = ?3 AND limit_id = ?4",
            params![minutes, user, date, limit_id],
        )?;
    }
    if let Some(unlocked) = patch.unlocked {
        tx.execute(
            "UPDATE overrides SET unlocked = ?1
             WHERE user_id = ?2 AND date = ?3 AND limit_id = ?4",
            params![unlocked as i64, user, date, limit_id],
        )?;
    }
    if let Some(slots) = &patch.slots {
        tx.execute(
            "UPDATE overrides SET slots = ?1
             WHERE user_id = ?2 AND date = ?3 AND limit_id = ?4",
            params![slots, user, date, limit_id],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn clear_override(conn: &Connection, user: &str, date: &str, limit_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM overrides WHERE user_id = ?1 AND date = ?2 AND limit_id = ?3",
        params![user, date, limit_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Global / per-user key-value config
// ---------------------------------------------------------------------------

/// Scope name for global config rows.
pub const GLOBAL_SCOPE: &str = "";

pub fn set_config(conn: &Connection, scope: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO config (scope, key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(scope, key) DO UPDATE SET value = ?3",
        params![scope, key, value],
    )?;
    Ok(())
}

pub fn clear_config(conn: &Connection, scope: &str, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM config WHERE scope = ?1 AND key = ?2",
        params![scope, key],
    )?;
    Ok(())
}

/// Effective configuration for a user: global keys overridden by
/// user-scoped keys, sorted by key.
pub fn effective_config(conn: &Connection, user: &str) -> Result<BTreeMap<String, String>> {
    let mut merged = BTreeMap::new();
    let mut stmt = conn.prepare("SELECT key, value FROM config WHERE scope = ?1")?;
    // Global first so user rows overwrite on collision
    for scope in [GLOBAL_SCOPE, user] {
        let rows = stmt.query_map(params![scope], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, value) = row?;
            merged.insert(key, value);
        }
    }
    Ok(merged)
}

/// Longest billable gap between two samples for this user: the configured
/// sampling interval (user over global over app default) plus the fixed
/// grace allowance.
pub fn sample_tolerance(conn: &Connection, user: &str) -> Result<i64> {
    let app_config = crate::config::get_config();
    let interval = effective_config(conn, user)?
        .get("sample_interval")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(app_config.sampling.interval_seconds);
    Ok(interval + app_config.sampling.grace_seconds)
}

// ---------------------------------------------------------------------------
// Reclassification and pruning
// ---------------------------------------------------------------------------

/// Re-evaluate every title observed at or after `from_ts` against the
/// current rule table, updating class ids in place. Returns the number of
/// rows whose class changed.
pub fn reclassify(conn: &mut Connection, from_ts: i64) -> Result<usize> {
    let tx = conn.transaction()?;
    let classifier = Classifier::load(&tx)?;

    let titles: Vec<String> = {
        let mut stmt =
            tx.prepare("SELECT DISTINCT title FROM activity WHERE timestamp >= ?1")?;
        let rows = stmt.query_map(params![from_ts], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()?
    };

    let mut changed = 0;
    for title in &titles {
        let class_id = classifier.classify_class(title)?;
        changed += tx.execute(
            "UPDATE activity SET class_id = ?1
             WHERE title = ?2 AND timestamp >= ?3 AND class_id != ?1",
            params![class_id, title, from_ts],
        )?;
    }

    tx.commit()?;
    info!(
        "Reclassified {} rows across {} distinct titles from timestamp {}",
        changed,
        titles.len(),
        from_ts
    );
    Ok(changed)
}

/// Delete activity older than `before_ts` and overrides dated before
/// `before_date`. Returns (activity rows, override rows) removed.
pub fn prune(conn: &mut Connection, before_ts: i64, before_date: &str) -> Result<(usize, usize)> {
    let tx = conn.transaction()?;
    let activity = tx.execute(
        "DELETE FROM activity WHERE timestamp < ?1",
        params![before_ts],
    )?;
    let overrides = tx.execute(
        "DELETE FROM overrides WHERE date < ?1",
        params![before_date],
    )?;
    tx.commit()?;
    info!(
        "Pruned {} activity rows and {} overrides before {}",
        activity, overrides, before_date
    );
    Ok((activity, overrides))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::models::DEFAULT_CLASS_NAME;
    use tempfile::TempDir;

    fn setup() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn test_ensure_user_provisions_total_limit() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();

        ensure_user(&mut conn, "alice").unwrap();
        ensure_user(&mut conn, "alice").unwrap();

        let limits = list_limits(&conn, "alice").unwrap();
        assert_eq!(limits.len(), 1);
        assert!(limits[0].is_total);
        assert_eq!(limits[0].name, TOTAL_LIMIT_NAME);

        // The existing default class is already mapped
        let default = default_class(&conn).unwrap();
        let ids = limit_ids_for_class(&conn, "alice", default.id).unwrap();
        assert_eq!(ids, vec![limits[0].id]);
    }

    #[test]
    fn test_new_class_auto_maps_to_every_total_limit() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        ensure_user(&mut conn, "alice").unwrap();
        ensure_user(&mut conn, "bob").unwrap();

        let games = add_class(&mut conn, "games").unwrap();

        for user in ["alice", "bob"] {
            let total = total_limit(&conn, user).unwrap();
            let ids = limit_ids_for_class(&conn, user, games.id).unwrap();
            assert_eq!(ids, vec![total.id], "user {}", user);
        }
    }

    #[test]
    fn test_default_class_is_protected() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        let default = default_class(&conn).unwrap();

        assert!(matches!(
            rename_class(&conn, default.id, "renamed"),
            Err(WardenError::Protected(_))
        ));
        assert!(matches!(
            remove_class(&mut conn, default.id),
            Err(WardenError::Protected(_))
        ));
        // Nothing changed
        assert_eq!(default_class(&conn).unwrap().name, DEFAULT_CLASS_NAME);
    }

    #[test]
    fn test_default_rule_is_protected() {
        let (db, _dir) = setup();
        let conn = db.get_connection().unwrap();
        let rule = list_rules(&conn)
            .unwrap()
            .into_iter()
            .find(|r| r.is_default)
            .unwrap();

        assert!(matches!(
            remove_rule(&conn, rule.id),
            Err(WardenError::Protected(_))
        ));
        assert!(matches!(
            update_rule(&conn, rule.id, 5, "games"),
            Err(WardenError::Protected(_))
        ));
        assert_eq!(get_rule(&conn, rule.id).unwrap().unwrap().pattern, "");
    }

    #[test]
    fn test_add_rule_rejects_invalid_pattern() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        let games = add_class(&mut conn, "games").unwrap();

        let before = list_rules(&conn).unwrap().len();
        assert!(matches!(
            add_rule(&conn, games.id, 5, "(unclosed"),
            Err(WardenError::InvalidPattern { .. })
        ));
        assert_eq!(list_rules(&conn).unwrap().len(), before);
    }

    #[test]
    fn test_remove_class_reclassifies_activity_in_place() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        let default = default_class(&conn).unwrap();
        let catchall = add_class(&mut conn, "catchall").unwrap();
        // "()" matches everything
        add_rule(&conn, catchall.id, 10, "()").unwrap();

        crate::recorder::insert_activity(&mut conn, 1000, "alice", &["Minecraft".to_string()])
            .unwrap();
        let class_before: i64 = conn
            .query_row(
                "SELECT class_id FROM activity WHERE title = 'Minecraft'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(class_before, catchall.id);

        remove_class(&mut conn, catchall.id).unwrap();

        let class_after: i64 = conn
            .query_row(
                "SELECT class_id FROM activity WHERE title = 'Minecraft'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(class_after, default.id);

        // Subsequent classification also falls back to the default class
        let classifier = Classifier::load(&conn).unwrap();
        assert_eq!(classifier.classify_class("Minecraft").unwrap(), default.id);
    }

    #[test]
    fn test_total_limit_mutations_are_noops() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        ensure_user(&mut conn, "alice").unwrap();
        let total = total_limit(&conn, "alice").unwrap();
        let default = default_class(&conn).unwrap();

        rename_limit(&conn, total.id, "renamed").unwrap();
        remove_limit(&mut conn, total.id).unwrap();
        remove_mapping(&conn, default.id, total.id).unwrap();
        add_mapping(&conn, default.id, total.id).unwrap();

        let after = total_limit(&conn, "alice").unwrap();
        assert_eq!(after.name, TOTAL_LIMIT_NAME);
        assert_eq!(
            limit_ids_for_class(&conn, "alice", default.id).unwrap(),
            vec![total.id]
        );
    }

    #[test]
    fn test_duplicate_mapping_is_distinguishable() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        ensure_user(&mut conn, "alice").unwrap();
        let games = add_class(&mut conn, "games").unwrap();
        let limit = add_limit(&conn, "alice", "games-limit").unwrap();

        add_mapping(&conn, games.id, limit.id).unwrap();
        assert!(matches!(
            add_mapping(&conn, games.id, limit.id),
            Err(WardenError::DuplicateMapping { .. })
        ));

        // Removing twice is fine
        remove_mapping(&conn, games.id, limit.id).unwrap();
        remove_mapping(&conn, games.id, limit.id).unwrap();
    }

    #[test]
    fn test_remove_limit_cascades() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        ensure_user(&mut conn, "alice").unwrap();
        let games = add_class(&mut conn, "games").unwrap();
        let limit = add_limit(&conn, "alice", "games-limit").unwrap();
        add_mapping(&conn, games.id, limit.id).unwrap();
        set_limit_config(&conn, limit.id, "minutes_day", "30").unwrap();
        set_override(
            &mut conn,
            "alice",
            "2024-03-13",
            limit.id,
            &OverridePatch {
                minutes: Some(10),
                ..Default::default()
            },
        )
        .unwrap();

        remove_limit(&mut conn, limit.id).unwrap();

        let mappings: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM class_limits WHERE limit_id = ?1",
                params![limit.id],
                |row| row.get(0),
            )
            .unwrap();
        let configs: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM limit_config WHERE limit_id = ?1",
                params![limit.id],
                |row| row.get(0),
            )
            .unwrap();
        let overrides: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM overrides WHERE limit_id = ?1",
                params![limit.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!((mappings, configs, overrides), (0, 0, 0));
    }

    #[test]
    fn test_remove_user_cascades_everything() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        crate::recorder::insert_activity(&mut conn, 1000, "alice", &["Minecraft".to_string()])
            .unwrap();
        set_config(&conn, "alice", "sample_interval", "15").unwrap();

        remove_user(&mut conn, "alice").unwrap();

        let limits: i64 = conn
            .query_row("SELECT COUNT(*) FROM limits WHERE user_id = 'alice'", [], |r| {
                r.get(0)
            })
            .unwrap();
        let activity: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM activity WHERE user_id = 'alice'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let config: i64 = conn
            .query_row("SELECT COUNT(*) FROM config WHERE scope = 'alice'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!((limits, activity, config), (0, 0, 0));

        assert!(matches!(
            remove_user(&mut conn, "alice"),
            Err(WardenError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn test_limit_config_validation_is_atomic() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        ensure_user(&mut conn, "alice").unwrap();
        let total = total_limit(&conn, "alice").unwrap();

        assert!(set_limit_config(&conn, total.id, "minutes_day", "abc").is_err());
        assert!(set_limit_config(&conn, total.id, "minutes_day", "-3").is_err());
        assert!(set_limit_config(&conn, total.id, "times", "9-8").is_err());
        assert!(set_limit_config(&conn, total.id, "locked", "maybe").is_err());
        assert!(set_limit_config(&conn, total.id, "minutes_funday", "5").is_err());

        let snapshots = limit_snapshots(&conn, "alice").unwrap();
        assert!(snapshots[&total.id].config.is_empty());

        set_limit_config(&conn, total.id, "minutes_mon", "45").unwrap();
        set_limit_config(&conn, total.id, "times_sat", "8-9").unwrap();
        let snapshots = limit_snapshots(&conn, "alice").unwrap();
        assert_eq!(snapshots[&total.id].config["minutes_mon"], "45");
    }

    #[test]
    fn test_limit_snapshots_always_include_total() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        ensure_user(&mut conn, "alice").unwrap();

        let snapshots = limit_snapshots(&conn, "alice").unwrap();
        assert_eq!(snapshots.len(), 1);
        let snapshot = snapshots.values().next().unwrap();
        assert!(snapshot.limit.is_total);
        assert!(snapshot.config.is_empty());
    }

    #[test]
    fn test_override_updates_in_place() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        ensure_user(&mut conn, "alice").unwrap();
        let total = total_limit(&conn, "alice").unwrap();

        set_override(
            &mut conn,
            "alice",
            "2024-03-13",
            total.id,
            &OverridePatch {
                minutes: Some(30),
                ..Default::default()
            },
        )
        .unwrap();
        set_override(
            &mut conn,
            "alice",
            "2024-03-13",
            total.id,
            &OverridePatch {
                unlocked: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

        let rows = list_overrides(&conn, "alice", "2024-03-13").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].minutes, Some(30));
        assert_eq!(rows[0].unlocked, Some(true));
        assert_eq!(rows[0].slots, None);
    }

    #[test]
    fn test_override_rejects_invalid_slot_spec() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        ensure_user(&mut conn, "alice").unwrap();
        let total = total_limit(&conn, "alice").unwrap();

        let err = set_override(
            &mut conn,
            "alice",
            "2024-03-13",
            total.id,
            &OverridePatch {
                slots: Some("14-12".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid time slot: '14-12'");
        assert!(list_overrides(&conn, "alice", "2024-03-13").unwrap().is_empty());
    }

    #[test]
    fn test_effective_config_user_overrides_global() {
        let (db, _dir) = setup();
        let conn = db.get_connection().unwrap();
        set_config(&conn, GLOBAL_SCOPE, "sample_interval", "60").unwrap();
        set_config(&conn, GLOBAL_SCOPE, "idle_timeout", "300").unwrap();
        set_config(&conn, "alice", "sample_interval", "15").unwrap();

        let merged = effective_config(&conn, "alice").unwrap();
        assert_eq!(merged["sample_interval"], "15");
        assert_eq!(merged["idle_timeout"], "300");

        let other = effective_config(&conn, "bob").unwrap();
        assert_eq!(other["sample_interval"], "60");
    }

    #[test]
    fn test_sample_tolerance_uses_config_chain() {
        let (db, _dir) = setup();
        let conn = db.get_connection().unwrap();
        let grace = crate::config::get_config().sampling.grace_seconds;

        // App default
        assert_eq!(sample_tolerance(&conn, "alice").unwrap(), 60 + grace);
        // Global
        set_config(&conn, GLOBAL_SCOPE, "sample_interval", "120").unwrap();
        assert_eq!(sample_tolerance(&conn, "alice").unwrap(), 120 + grace);
        // Per-user
        set_config(&conn, "alice", "sample_interval", "10").unwrap();
        assert_eq!(sample_tolerance(&conn, "alice").unwrap(), 10 + grace);
    }

    #[test]
    fn test_reclassify_from_timestamp() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        crate::recorder::insert_activity(&mut conn, 1000, "alice", &["Minecraft".to_string()])
            .unwrap();
        crate::recorder::insert_activity(&mut conn, 2000, "alice", &["Minecraft".to_string()])
            .unwrap();

        let games = add_class(&mut conn, "games").unwrap();
        add_rule(&conn, games.id, 10, "Minecraft").unwrap();

        // Only rows at or after the cutoff are touched
        let changed = reclassify(&mut conn, 1500).unwrap();
        assert_eq!(changed, 1);

        let classes: Vec<i64> = {
            let mut stmt = conn
                .prepare("SELECT class_id FROM activity WHERE user_id = 'alice' ORDER BY timestamp")
                .unwrap();
            let rows = stmt.query_map([], |row| row.get(0)).unwrap();
            rows.collect::<rusqlite::Result<Vec<i64>>>().unwrap()
        };
        assert_ne!(classes[0], games.id);
        assert_eq!(classes[1], games.id);

        // Running again changes nothing
        assert_eq!(reclassify(&mut conn, 0).unwrap(), 1);
    }

    #[test]
    fn test_prune_removes_old_rows() {
        let (db, _dir) = setup();
        let mut conn = db.get_connection().unwrap();
        crate::recorder::insert_activity(&mut conn, 1000, "alice", &["Old".to_string()]).unwrap();
        crate::recorder::insert_activity(&mut conn, 5000, "alice", &["New".to_string()]).unwrap();
        let total = total_limit(&conn, "alice").unwrap();
        set_override(
            &mut conn,
            "alice",
            "2024-01-01",
            total.id,
            &OverridePatch {
                minutes: Some(5),
                ..Default::default()
            },
        )
        .unwrap();

        let (activity, overrides) = prune(&mut conn, 2000, "2024-02-01").unwrap();
        assert_eq!((activity, overrides), (1, 1));

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM activity", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
