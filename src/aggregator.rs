//! Interval reconstruction and attribution.
//!
//! Activity rows are sparse samples of "what was open right now". The
//! elapsed time between two consecutive samples is billed to whatever was
//! observed at the earlier one; a gap longer than the sampling interval
//! plus grace (machine asleep, client stopped) is zeroed rather than
//! billed. The fold runs in memory over a time-ordered cursor.

use crate::common::date_of_epoch;
use crate::error::Result;
use crate::graph;
use crate::models::{TitleOrder, TitleUsage};
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashMap};

/// One observation row in timestamp order.
struct Observation {
    timestamp: i64,
    title: String,
    class_id: i64,
}

fn fetch_observations(
    conn: &Connection,
    user: &str,
    from: i64,
    to: Option<i64>,
) -> Result<Vec<Observation>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, title, class_id FROM activity
         WHERE user_id = ?1 AND timestamp >= ?2 AND (?3 IS NULL OR timestamp < ?3)
         ORDER BY timestamp, title",
    )?;
    let rows = stmt.query_map(params![user, from, to], |row| {
        Ok(Observation {
            timestamp: row.get(0)?,
            title: row.get(1)?,
            class_id: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Walk consecutive sample timestamps, handing each non-sentinel
/// observation at the interval start to `bill` together with the interval's
/// billable duration (zero when the gap exceeded the tolerance).
fn fold_intervals<F>(observations: &[Observation], tolerance: i64, mut bill: F)
where
    F: FnMut(&Observation, i64),
{
    let mut start = 0;
    while start < observations.len() {
        let t0 = observations[start].timestamp;
        let mut end = start;
        while end < observations.len() && observations[end].timestamp == t0 {
            end += 1;
        }

        // The last sample group has no successor; its interval is open
        if end < observations.len() {
            let gap = observations[end].timestamp - t0;
            let billed = if gap > tolerance { 0 } else { gap };
            for obs in &observations[start..end] {
                // The close-interval sentinel never bills anything itself
                if !obs.title.is_empty() {
                    bill(obs, billed);
                }
            }
        }

        start = end;
    }
}

/// Seconds spent per limit per calendar date in `[from, to)`.
///
/// An empty result means nothing was observed; a populated entry with a
/// zero value means the limit was observed but billed nothing (e.g. every
/// interval exceeded the gap tolerance).
pub fn time_spent_by_limit_and_date(
    conn: &Connection,
    user: &str,
    from: i64,
    to: Option<i64>,
) -> Result<HashMap<i64, BTreeMap<String, i64>>> {
    let tolerance = graph::sample_tolerance(conn, user)?;
    let class_limits = graph::class_limit_map(conn, user)?;
    let observations = fetch_observations(conn, user, from, to)?;

    let mut spent: HashMap<i64, BTreeMap<String, i64>> = HashMap::new();
    fold_intervals(&observations, tolerance, |obs, billed| {
        let Some(limit_ids) = class_limits.get(&obs.class_id) else {
            return;
        };
        let date = date_of_epoch(obs.timestamp);
        for limit_id in limit_ids {
            *spent
                .entry(*limit_id)
                .or_default()
                .entry(date.clone())
                .or_insert(0) += billed;
        }
    });

    Ok(spent)
}

/// Total seconds spent per limit over `[from, to)`, all dates summed.
pub fn time_spent_by_limit(
    conn: &Connection,
    user: &str,
    from: i64,
    to: Option<i64>,
) -> Result<HashMap<i64, i64>> {
    Ok(time_spent_by_limit_and_date(conn, user, from, to)?
        .into_iter()
        .map(|(limit_id, dates)| (limit_id, dates.values().sum()))
        .collect())
}

/// Per-title usage in `[from, to)`: last-seen timestamp, billed seconds
/// and class name. Titles observed but not yet billable show up with zero
/// seconds; the close-interval sentinel is excluded.
pub fn time_spent_by_title(
    conn: &Connection,
    user: &str,
    from: i64,
    to: i64,
    order: TitleOrder,
) -> Result<Vec<TitleUsage>> {
    let tolerance = graph::sample_tolerance(conn, user)?;
    let observations = fetch_observations(conn, user, from, Some(to))?;

    let class_names: HashMap<i64, String> = graph::list_classes(conn)?
        .into_iter()
        .map(|class| (class.id, class.name))
        .collect();

    // Keyed by (title, class) so a reclassified title shows once per class
    let mut usage: BTreeMap<(String, i64), (i64, i64)> = BTreeMap::new();
    for obs in &observations {
        if obs.title.is_empty() {
            continue;
        }
        let entry = usage
            .entry((obs.title.clone(), obs.class_id))
            .or_insert((0, 0));
        entry.0 = entry.0.max(obs.timestamp);
    }
    fold_intervals(&observations, tolerance, |obs, billed| {
        if let Some(entry) = usage.get_mut(&(obs.title.clone(), obs.class_id)) {
            entry.1 += billed;
        }
    });

    let mut rows: Vec<TitleUsage> = usage
        .into_iter()
        .map(|((title, class_id), (last_seen, seconds))| TitleUsage {
            last_seen,
            seconds,
            class_name: class_names
                .get(&class_id)
                .cloned()
                .unwrap_or_else(|| class_id.to_string()),
            title,
        })
        .collect();

    match order {
        TitleOrder::BySeconds => {
            rows.sort_by(|a, b| {
                b.seconds
                    .cmp(&a.seconds)
                    .then(b.last_seen.cmp(&a.last_seen))
                    .then(a.title.cmp(&b.title))
            });
        }
        TitleOrder::ByRecency => {
            rows.sort_by(|a, b| {
                b.last_seen
                    .cmp(&a.last_seen)
                    .then(b.seconds.cmp(&a.seconds))
                    .then(a.title.cmp(&b.title))
            });
        }
    }

    Ok(rows)
}
