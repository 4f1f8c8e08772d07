//! Day-slot specifications.
//!
//! A slot spec is a comma-separated list of time ranges within one calendar
//! day, e.g. `"8-9, 12-14, 20-21:30"` or `"7:30am-9am"`. Time may only be
//! consumed inside a slot. Parsing is atomic: any invalid range rejects the
//! whole spec.

use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds in a full day; also the exclusive upper bound `24:00`.
pub const DAY_SECONDS: u32 = 86_400;

/// A contiguous time-of-day window, in seconds since local midnight.
/// `end` may be `86400` to mean 24:00 (end of day).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slot {
    pub start: u32,
    pub end: u32,
}

impl Slot {
    /// `HH:MM` rendering of a boundary, `24:00` for end-of-day.
    fn fmt_secs(secs: u32) -> String {
        format!("{:02}:{:02}", secs / 3600, (secs % 3600) / 60)
    }

    pub fn start_hhmm(&self) -> String {
        Self::fmt_secs(self.start)
    }

    pub fn end_hhmm(&self) -> String {
        Self::fmt_secs(self.end)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_hhmm(), self.end_hhmm())
    }
}

/// Remaining-time view of a slot list at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotState {
    /// The slot containing "now", if any
    pub current: Option<Slot>,
    /// The next slot starting after "now" today, if any
    pub next: Option<Slot>,
    /// Seconds until the current slot ends (0 outside all slots)
    pub current_remaining: i64,
    /// Remaining seconds across all of today's slots
    pub total_remaining: i64,
}

/// Parse one time token: `HH[:MM][am|pm]`.
///
/// Returns seconds since midnight. `is_end` permits the 24:00 boundary and
/// maps a midnight end (`12a`, `0`) to end-of-day, so full-day ranges like
/// `0-24` and `12a-12a` are representable.
fn parse_time(token: &str, is_end: bool, spec: &str) -> Result<u32> {
    let invalid = || WardenError::InvalidSlotSpec(spec.to_string());

    let token = token.trim();
    if token.is_empty() {
        return Err(invalid());
    }

    // Split off an am/pm suffix
    let lower = token.to_ascii_lowercase();
    let (digits, meridiem) = if let Some(rest) = lower.strip_suffix("am") {
        (rest, Some(false))
    } else if let Some(rest) = lower.strip_suffix("pm") {
        (rest, Some(true))
    } else if let Some(rest) = lower.strip_suffix('a') {
        (rest, Some(false))
    } else if let Some(rest) = lower.strip_suffix('p') {
        (rest, Some(true))
    } else {
        (lower.as_str(), None)
    };

    let (hour_str, minute_str) = match digits.split_once(':') {
        Some((h, m)) => (h, Some(m)),
        None => (digits, None),
    };

    let mut hour: u32 = hour_str.parse().map_err(|_| invalid())?;
    let minute: u32 = match minute_str {
        Some(m) => m.parse().map_err(|_| invalid())?,
        None => 0,
    };
    if minute > 59 {
        return Err(invalid());
    }

    match meridiem {
        Some(pm) => {
            if hour == 0 || hour > 12 {
                return Err(invalid());
            }
            if hour == 12 {
                hour = 0;
            }
            if pm {
                hour += 12;
            }
        }
        None => {
            // 24 is only valid as an exact end-of-day boundary
            if hour > 24 || (hour == 24 && minute != 0) {
                return Err(invalid());
            }
        }
    }

    let secs = hour * 3600 + minute * 60;
    if secs > DAY_SECONDS || (secs == DAY_SECONDS && !is_end) {
        return Err(invalid());
    }
    if is_end && secs == 0 {
        // Midnight as an end means end-of-day
        return Ok(DAY_SECONDS);
    }
    Ok(secs)
}

/// Parse a full day-slot specification.
///
/// Returns the slots sorted by start time. The empty spec parses to an
/// empty list, which callers treat as "zero time", not "no restriction".
pub fn parse_slot_spec(spec: &str) -> Result<Vec<Slot>> {
    let invalid = || WardenError::InvalidSlotSpec(spec.to_string());

    if spec.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut slots = Vec::new();
    for range in spec.split(',') {
        let range = range.trim();
        let (from, to) = range.split_once('-').ok_or_else(invalid)?;
        let start = parse_time(from, false, spec)?;
        let end = parse_time(to, true, spec)?;
        if end <= start {
            return Err(invalid());
        }
        slots.push(Slot { start, end });
    }

    slots.sort_by_key(|s| s.start);
    for pair in slots.windows(2) {
        if pair[1].start < pair[0].end {
            return Err(invalid());
        }
    }

    Ok(slots)
}

/// Compute the slot state at `now_secs` seconds into the day.
pub fn slot_state(slots: &[Slot], now_secs: u32) -> SlotState {
    let mut current = None;
    let mut next = None;
    let mut current_remaining = 0i64;
    let mut total_remaining = 0i64;

    for slot in slots {
        if slot.end <= now_secs {
            continue;
        }
        if slot.start <= now_secs {
            current = Some(*slot);
            current_remaining = i64::from(slot.end - now_secs);
            total_remaining += current_remaining;
        } else {
            if next.is_none() {
                next = Some(*slot);
            }
            total_remaining += i64::from(slot.end - slot.start);
        }
    }

    SlotState {
        current,
        next,
        current_remaining,
        total_remaining,
    }
}
