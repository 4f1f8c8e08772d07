//! Client sync and config sync wire formats.
//!
//! Both protocols are line-oriented text carried in an HTTP POST body (or,
//! for the bundled CLI, stdin/stdout). Parsing and formatting live here so
//! the engine stays free of wire concerns.
//!
//! Sync request:
//! ```text
//! <user id>
//! <open window title>
//! <open window title>
//! ```
//!
//! Sync response: one line per limit
//! `limitId;locked;currentSeconds;totalSeconds;currentSlot;nextSlot;limitName`,
//! a blank separator line, then one comma-joined line of limit ids per
//! requested title, in request order.

use crate::error::{Result, WardenError};
use crate::models::{Classification, Limit, TimeLeft};
use crate::slots::Slot;
use std::collections::BTreeMap;

/// A parsed client sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub user: String,
    pub titles: Vec<String>,
}

/// Parse a sync request body: first line is the user id, every further
/// line is an open window title. No user id means the request is invalid.
pub fn parse_sync_request(body: &str) -> Result<SyncRequest> {
    let mut lines: Vec<&str> = body.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    // A trailing newline is framing, not an empty title
    if lines.last() == Some(&"") {
        lines.pop();
    }

    let mut iter = lines.into_iter();
    let user = match iter.next() {
        Some(user) if !user.is_empty() => user.to_string(),
        _ => return Err(WardenError::MalformedRequest("missing user id".to_string())),
    };

    Ok(SyncRequest {
        user,
        titles: iter.map(|l| l.to_string()).collect(),
    })
}

fn slot_field(slot: &Option<Slot>) -> String {
    slot.map(|s| s.to_string()).unwrap_or_default()
}

/// Format the sync response. `limits` must carry every limit of the user
/// with its evaluated state; `title_limits` is one classification per
/// requested title, in request order.
pub fn format_sync_response(
    limits: &[(Limit, TimeLeft)],
    title_limits: &[Classification],
) -> String {
    let mut out = String::new();

    for (limit, left) in limits {
        out.push_str(&format!(
            "{};{};{};{};{};{};{}\n",
            limit.id,
            if left.locked { 1 } else { 0 },
            left.current_seconds,
            left.total_seconds,
            slot_field(&left.current_slot),
            slot_field(&left.next_slot),
            limit.name,
        ));
    }

    out.push('\n');

    for classification in title_limits {
        let ids: Vec<String> = classification
            .limit_ids
            .iter()
            .map(|id| id.to_string())
            .collect();
        out.push_str(&ids.join(","));
        out.push('\n');
    }

    out
}

/// Format an effective configuration as alternating key/value lines,
/// sorted by key (the map's iteration order).
pub fn format_config_response(config: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in config {
        out.push_str(key);
        out.push('\n');
        out.push_str(value);
        out.push('\n');
    }
    out
}
