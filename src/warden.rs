//! The engine facade.
//!
//! A [`Warden`] owns the database pool and the clock and exposes one
//! method per operation: activity recording, aggregation queries,
//! time-remaining evaluation, the sync protocols and the admin mutations.
//! The CLI (or an HTTP front) is glue over this surface.

use crate::aggregator;
use crate::clock::{Clock, SystemClock};
use crate::database::{Database, MaintenanceResult};
use crate::error::Result;
use crate::evaluator;
use crate::graph;
use crate::models::{
    Class, ClassRule, Classification, Limit, LimitSnapshot, OverridePatch, OverrideRow, TimeLeft,
    TitleOrder, TitleUsage,
};
use crate::protocol;
use crate::recorder;
use crate::retry::{retry_if_retryable, RetryConfig};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

pub struct Warden {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl Warden {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Warden { db, clock }
    }

    /// Open the database at `path` with the system clock.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::new(path)?, Arc::new(SystemClock)))
    }

    /// Open the database at the configured default location.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Database::open_default()?, Arc::new(SystemClock)))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // -----------------------------------------------------------------
    // Client-facing protocols
    // -----------------------------------------------------------------

    /// Handle one client sync body: record the reported titles, then
    /// answer with every limit's remaining time and each title's limit
    /// memberships.
    pub fn handle_sync(&self, body: &str) -> Result<String> {
        let request = protocol::parse_sync_request(body)?;
        let classifications = self.insert_activity(&request.user, &request.titles)?;

        let mut time_left = self.time_left_today(&request.user)?;
        let mut limits = self.limits(&request.user)?;
        limits.sort_by_key(|l| l.id);
        let paired: Vec<(Limit, TimeLeft)> = limits
            .into_iter()
            .filter_map(|limit| time_left.remove(&limit.id).map(|left| (limit, left)))
            .collect();

        Ok(protocol::format_sync_response(&paired, &classifications))
    }

    /// Handle one config sync: the user's effective key-value config as
    /// alternating key/value lines.
    pub fn handle_config_sync(&self, user: &str) -> Result<String> {
        let conn = self.db.get_connection()?;
        let config = graph::effective_config(&conn, user)?;
        Ok(protocol::format_config_response(&config))
    }

    // -----------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------

    /// Record the titles currently open for `user` at the clock's now.
    pub fn insert_activity(&self, user: &str, titles: &[String]) -> Result<Vec<Classification>> {
        let now = self.clock.epoch();
        let retry_config = RetryConfig::for_db_ops();
        retry_if_retryable(&retry_config, || {
            let mut conn = self.db.get_connection()?;
            recorder::insert_activity(&mut conn, now, user, titles)
        })
    }

    /// Seconds spent per limit per date in `[from, to)` (epoch seconds).
    pub fn time_spent_by_limit_and_date(
        &self,
        user: &str,
        from: i64,
        to: Option<i64>,
    ) -> Result<HashMap<i64, BTreeMap<String, i64>>> {
        let conn = self.db.get_connection()?;
        aggregator::time_spent_by_limit_and_date(&conn, user, from, to)
    }

    /// Per-title usage view over `[from, to)`.
    pub fn time_spent_by_title(
        &self,
        user: &str,
        from: i64,
        to: i64,
        order: TitleOrder,
    ) -> Result<Vec<TitleUsage>> {
        let conn = self.db.get_connection()?;
        aggregator::time_spent_by_title(&conn, user, from, to, order)
    }

    /// Remaining time today for every limit of `user`.
    pub fn time_left_today(&self, user: &str) -> Result<HashMap<i64, TimeLeft>> {
        let conn = self.db.get_connection()?;
        evaluator::time_left_today_all_limits(&conn, self.clock.now(), user)
    }

    // -----------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------

    pub fn add_user(&self, user: &str) -> Result<()> {
        let mut conn = self.db.get_connection()?;
        graph::ensure_user(&mut conn, user)
    }

    pub fn remove_user(&self, user: &str) -> Result<()> {
        let mut conn = self.db.get_connection()?;
        graph::remove_user(&mut conn, user)
    }

    pub fn users(&self) -> Result<Vec<String>> {
        let conn = self.db.get_connection()?;
        graph::list_users(&conn)
    }

    // -----------------------------------------------------------------
    // Classes and classification rules
    // -----------------------------------------------------------------

    pub fn add_class(&self, name: &str) -> Result<Class> {
        let mut conn = self.db.get_connection()?;
        graph::add_class(&mut conn, name)
    }

    pub fn rename_class(&self, class_id: i64, new_name: &str) -> Result<()> {
        let conn = self.db.get_connection()?;
        graph::rename_class(&conn, class_id, new_name)
    }

    pub fn remove_class(&self, class_id: i64) -> Result<()> {
        let mut conn = self.db.get_connection()?;
        graph::remove_class(&mut conn, class_id)
    }

    pub fn classes(&self) -> Result<Vec<Class>> {
        let conn = self.db.get_connection()?;
        graph::list_classes(&conn)
    }

    pub fn add_rule(&self, class_id: i64, priority: i64, pattern: &str) -> Result<ClassRule> {
        let conn = self.db.get_connection()?;
        graph::add_rule(&conn, class_id, priority, pattern)
    }

    pub fn update_rule(&self, rule_id: i64, priority: i64, pattern: &str) -> Result<()> {
        let conn = self.db.get_connection()?;
        graph::update_rule(&conn, rule_id, priority, pattern)
    }

    pub fn remove_rule(&self, rule_id: i64) -> Result<()> {
        let conn = self.db.get_connection()?;
        graph::remove_rule(&conn, rule_id)
    }

    pub fn rules(&self) -> Result<Vec<ClassRule>> {
        let conn = self.db.get_connection()?;
        graph::list_rules(&conn)
    }

    // -----------------------------------------------------------------
    // Limits, mappings and limit config
    // -----------------------------------------------------------------

    pub fn add_limit(&self, user: &str, name: &str) -> Result<Limit> {
        let conn = self.db.get_connection()?;
        graph::add_limit(&conn, user, name)
    }

    pub fn rename_limit(&self, limit_id: i64, new_name: &str) -> Result<()> {
        let conn = self.db.get_connection()?;
        graph::rename_limit(&conn, limit_id, new_name)
    }

    pub fn remove_limit(&self, limit_id: i64) -> Result<()> {
        let mut conn = self.db.get_connection()?;
        graph::remove_limit(&mut conn, limit_id)
    }

    pub fn limits(&self, user: &str) -> Result<Vec<Limit>> {
        let conn = self.db.get_connection()?;
        graph::list_limits(&conn, user)
    }

    pub fn limit_snapshots(&self, user: &str) -> Result<HashMap<i64, LimitSnapshot>> {
        let conn = self.db.get_connection()?;
        graph::limit_snapshots(&conn, user)
    }

    pub fn add_mapping(&self, class_id: i64, limit_id: i64) -> Result<()> {
        let conn = self.db.get_connection()?;
        graph::add_mapping(&conn, class_id, limit_id)
    }

    pub fn remove_mapping(&self, class_id: i64, limit_id: i64) -> Result<()> {
        let conn = self.db.get_connection()?;
        graph::remove_mapping(&conn, class_id, limit_id)
    }

    pub fn set_limit_config(&self, limit_id: i64, key: &str, value: &str) -> Result<()> {
        let conn = self.db.get_connection()?;
        graph::set_limit_config(&conn, limit_id, key, value)
    }

    pub fn clear_limit_config(&self, limit_id: i64, key: &str) -> Result<()> {
        let conn = self.db.get_connection()?;
        graph::clear_limit_config(&conn, limit_id, key)
    }

    // -----------------------------------------------------------------
    // Overrides and key-value config
    // -----------------------------------------------------------------

    pub fn set_override(
        &self,
        user: &str,
        date: &str,
        limit_id: i64,
        patch: &OverridePatch,
    ) -> Result<()> {
        let mut conn = self.db.get_connection()?;
        graph::set_override(&mut conn, user, date, limit_id, patch)
    }

    pub fn clear_override(&self, user: &str, date: &str, limit_id: i64) -> Result<()> {
        let conn = self.db.get_connection()?;
        graph::clear_override(&conn, user, date, limit_id)
    }

    pub fn overrides(&self, user: &str, date: &str) -> Result<Vec<OverrideRow>> {
        let conn = self.db.get_connection()?;
        graph::list_overrides(&conn, user, date)
    }

    pub fn set_config(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        let conn = self.db.get_connection()?;
        graph::set_config(&conn, scope, key, value)
    }

    pub fn clear_config(&self, scope: &str, key: &str) -> Result<()> {
        let conn = self.db.get_connection()?;
        graph::clear_config(&conn, scope, key)
    }

    pub fn effective_config(&self, user: &str) -> Result<BTreeMap<String, String>> {
        let conn = self.db.get_connection()?;
        graph::effective_config(&conn, user)
    }

    // -----------------------------------------------------------------
    // Bulk operations
    // -----------------------------------------------------------------

    /// Re-evaluate titles observed in the last `days` days against the
    /// current rules. Returns the number of rows whose class changed.
    pub fn reclassify_days(&self, days: i64) -> Result<usize> {
        let from = self.clock.epoch() - days * 86_400;
        let mut conn = self.db.get_connection()?;
        graph::reclassify(&mut conn, from)
    }

    /// Delete activity and overrides older than local midnight of `date`.
    pub fn prune_before(&self, date: NaiveDate) -> Result<(usize, usize)> {
        use chrono::TimeZone;
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .and_then(|naive| chrono::Local.from_local_datetime(&naive).single())
            .map(|dt| dt.timestamp())
            .unwrap_or(0);
        let mut conn = self.db.get_connection()?;
        graph::prune(&mut conn, midnight, &date.format("%Y-%m-%d").to_string())
    }

    pub fn maintenance(&self, force_vacuum: bool) -> Result<MaintenanceResult> {
        self.db.maintenance(force_vacuum)
    }

    /// Today's date string by the warden's clock.
    pub fn today(&self) -> String {
        crate::common::date_of(&self.clock.now())
    }

    /// The warden's current epoch timestamp.
    pub fn now_epoch(&self) -> i64 {
        self.clock.epoch()
    }
}
