//! Data types shared across the engine.

use crate::slots::Slot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the seeded default class that catches every unmatched title.
pub const DEFAULT_CLASS_NAME: &str = "other";

/// Name given to each user's auto-created total limit.
pub const TOTAL_LIMIT_NAME: &str = "total";

/// Priority of the seeded catch-all rule. Admin rules use small positive
/// integers, so this always loses every contest it shares with a real rule.
pub const DEFAULT_RULE_PRIORITY: i64 = i64::MIN;

/// Stored in place of a genuinely empty window title, so an empty title in
/// the activity table always means the close-interval sentinel.
pub const EMPTY_TITLE_PLACEHOLDER: &str = "<untitled>";

/// A named category of activity (e.g. "games").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Class {
    pub id: i64,
    pub name: String,
    pub is_default: bool,
}

/// An ordered regular expression tied to one class. Higher priority wins;
/// ties break by rule id ascending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassRule {
    pub id: i64,
    pub class_id: i64,
    pub priority: i64,
    pub pattern: String,
    pub is_default: bool,
}

/// A named per-user time budget container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Limit {
    pub id: i64,
    pub user: String,
    pub name: String,
    pub is_total: bool,
}

/// A limit together with its key-value configuration rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSnapshot {
    pub limit: Limit,
    pub config: HashMap<String, String>,
}

/// A per-user, per-date, per-limit manual adjustment. At most one row per
/// (user, date, limit); fields update in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverrideRow {
    pub user: String,
    pub date: String,
    pub limit_id: i64,
    pub minutes: Option<i64>,
    pub unlocked: Option<bool>,
    /// Day-slot spec replacing the standing `times*` computation for that
    /// date. `Some("")` means zero time; `None` means no override.
    pub slots: Option<String>,
}

/// Fields of an override to set; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct OverridePatch {
    pub minutes: Option<i64>,
    pub unlocked: Option<bool>,
    pub slots: Option<String>,
}

/// Result of classifying one title: its class and every limit the class
/// counts against for the requesting user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    pub class_id: i64,
    pub limit_ids: Vec<i64>,
}

/// Remaining time for one limit today.
///
/// `current_seconds` is what may be consumed right now (bounded by the
/// current slot, if any); `total_seconds` is what remains across the whole
/// day. Negative values mean the budget is already overspent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeLeft {
    pub locked: bool,
    pub current_seconds: i64,
    pub total_seconds: i64,
    pub current_slot: Option<Slot>,
    pub next_slot: Option<Slot>,
}

impl TimeLeft {
    /// The short-circuit result for a locked limit.
    pub fn locked() -> Self {
        TimeLeft {
            locked: true,
            current_seconds: 0,
            total_seconds: 0,
            current_slot: None,
            next_slot: None,
        }
    }
}

/// One row of the per-title usage view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TitleUsage {
    pub last_seen: i64,
    pub seconds: i64,
    pub class_name: String,
    pub title: String,
}

/// Sort order for the per-title usage view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleOrder {
    /// Total seconds descending
    BySeconds,
    /// Last-seen timestamp descending
    ByRecency,
}
