//! Activity recording.
//!
//! Each client sync appends one observation row per currently-open window
//! title, keyed by (user, timestamp, title). A retried request hits the
//! same key and only overwrites the class id, so replays never double-count
//! and always reflect the newest classification rules. An empty title list
//! writes a single sentinel row (empty title) that closes the preceding
//! interval without billing anything.

use crate::classifier::Classifier;
use crate::error::Result;
use crate::graph;
use crate::models::{Classification, EMPTY_TITLE_PLACEHOLDER};
use rusqlite::{params, Connection};

/// Record the titles currently open for `user` at `now` (epoch seconds)
/// and return each title's classification, in input order.
pub fn insert_activity(
    conn: &mut Connection,
    now: i64,
    user: &str,
    titles: &[String],
) -> Result<Vec<Classification>> {
    let tx = conn.transaction()?;
    graph::ensure_user_tx(&tx, user)?;

    if titles.is_empty() {
        // Close any open interval; the sentinel row itself bills nothing
        let default_class = graph::default_class(&tx)?;
        tx.execute(
            "INSERT INTO activity (user_id, timestamp, title, class_id)
             VALUES (?1, ?2, '', ?3)
             ON CONFLICT(user_id, timestamp, title) DO UPDATE SET class_id = ?3",
            params![user, now, default_class.id],
        )?;
        tx.commit()?;
        return Ok(Vec::new());
    }

    let classifier = Classifier::load(&tx)?;
    let mut results = Vec::with_capacity(titles.len());

    for title in titles {
        let class_id = classifier.classify_class(title)?;
        let limit_ids = graph::limit_ids_for_class(&tx, user, class_id)?;

        // A truly empty title would collide with the sentinel
        let stored = if title.is_empty() {
            EMPTY_TITLE_PLACEHOLDER
        } else {
            title.as_str()
        };
        tx.execute(
            "INSERT INTO activity (user_id, timestamp, title, class_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, timestamp, title) DO UPDATE SET class_id = ?4",
            params![user, now, stored, class_id],
        )?;

        results.push(Classification {
            class_id,
            limit_ids,
        });
    }

    tx.commit()?;
    Ok(results)
}
