//! Time-remaining evaluation.
//!
//! Per limit, in strict priority order: an override's minutes beat
//! everything; otherwise a locked limit without today's unlock yields
//! zero; otherwise the minute caps (weekday over daily, shortened but
//! never extended by the weekly cap) and the day-slot restriction apply
//! independently and the more restrictive figure wins. Negative
//! remainders mean the budget is overspent and propagate unchanged.

use crate::aggregator;
use crate::common::{date_of, seconds_into_day, start_of_week, weekday_key};
use crate::error::Result;
use crate::graph;
use crate::models::{LimitSnapshot, OverrideRow, TimeLeft};
use crate::slots::{parse_slot_spec, slot_state};
use chrono::{DateTime, Local};
use rusqlite::Connection;
use std::collections::HashMap;

fn config_i64(snapshot: &LimitSnapshot, key: &str) -> Option<i64> {
    snapshot.config.get(key).and_then(|v| v.parse().ok())
}

fn config_bool(snapshot: &LimitSnapshot, key: &str) -> bool {
    matches!(snapshot.config.get(key).map(String::as_str), Some("1") | Some("true"))
}

/// Remaining time today for every limit of `user`, total limit included.
pub fn time_left_today_all_limits(
    conn: &Connection,
    now: DateTime<Local>,
    user: &str,
) -> Result<HashMap<i64, TimeLeft>> {
    let today = date_of(&now);
    let weekday = weekday_key(&now);
    let now_secs = seconds_into_day(&now);

    // One aggregation pass covers both today's and this week's spend
    let spent = aggregator::time_spent_by_limit_and_date(conn, user, start_of_week(&now), None)?;
    let snapshots = graph::limit_snapshots(conn, user)?;

    let mut result = HashMap::with_capacity(snapshots.len());
    for (limit_id, snapshot) in &snapshots {
        let over = graph::get_override(conn, user, &today, *limit_id)?;
        let spent_today = spent
            .get(limit_id)
            .and_then(|dates| dates.get(&today))
            .copied()
            .unwrap_or(0);
        let spent_week: i64 = spent
            .get(limit_id)
            .map(|dates| dates.values().sum())
            .unwrap_or(0);

        let time_left = evaluate_limit(
            snapshot,
            over.as_ref(),
            weekday,
            now_secs,
            spent_today,
            spent_week,
        )?;
        result.insert(*limit_id, time_left);
    }

    Ok(result)
}

fn evaluate_limit(
    snapshot: &LimitSnapshot,
    over: Option<&OverrideRow>,
    weekday: &str,
    now_secs: u32,
    spent_today: i64,
    spent_week: i64,
) -> Result<TimeLeft> {
    // 1. Lock gate: everything yields zero unless today is unlocked
    let unlocked_today = over.and_then(|o| o.unlocked).unwrap_or(false);
    if config_bool(snapshot, "locked") && !unlocked_today {
        return Ok(TimeLeft::locked());
    }

    // 2. Override minutes replace the whole computation for the day
    if let Some(minutes) = over.and_then(|o| o.minutes) {
        let remaining = minutes * 60 - spent_today;
        return Ok(TimeLeft {
            locked: false,
            current_seconds: remaining,
            total_seconds: remaining,
            current_slot: None,
            next_slot: None,
        });
    }

    // 3. Minute caps: weekday over daily; the weekly cap only shortens
    let day_minutes = config_i64(snapshot, &format!("minutes_{}", weekday))
        .or_else(|| config_i64(snapshot, "minutes_day"))
        .unwrap_or(0);
    let mut minute_left = day_minutes * 60 - spent_today;
    if let Some(week_minutes) = config_i64(snapshot, "minutes_week") {
        minute_left = minute_left.min(week_minutes * 60 - spent_week);
    }

    // 4. Slot restriction: override spec over weekday spec over plain
    // `times`; an override's empty spec means zero time, not no restriction
    let slot_spec = over
        .and_then(|o| o.slots.clone())
        .or_else(|| {
            snapshot
                .config
                .get(&format!("times_{}", weekday))
                .cloned()
        })
        .or_else(|| snapshot.config.get("times").cloned());

    let Some(spec) = slot_spec else {
        return Ok(TimeLeft {
            locked: false,
            current_seconds: minute_left,
            total_seconds: minute_left,
            current_slot: None,
            next_slot: None,
        });
    };

    // Specs were validated when stored; a parse failure here means the
    // table was edited behind our back and is worth surfacing
    let slots = parse_slot_spec(&spec)?;
    let state = slot_state(&slots, now_secs);

    // 5. Minutes and slots combine by minimum on both figures
    Ok(TimeLeft {
        locked: false,
        current_seconds: minute_left.min(state.current_remaining),
        total_seconds: minute_left.min(state.total_remaining),
        current_slot: state.current,
        next_slot: state.next,
    })
}
