//! End-to-end client sync over the public API: record titles, get back
//! per-limit time remaining and per-title limit memberships.

use chrono::{DateTime, Local, TimeZone};
use std::sync::Arc;
use tempfile::TempDir;
use timewarden::{Database, FixedClock, Warden, WardenError};

fn noonish() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 3, 13, 13, 0, 0).single().unwrap()
}

fn warden_at(now: DateTime<Local>) -> (Warden, Arc<FixedClock>, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("warden.db")).unwrap();
    let clock = Arc::new(FixedClock::at(now));
    let warden = Warden::new(db, clock.clone());
    (warden, clock, dir)
}

#[test]
fn sync_provisions_user_and_reports_total_limit() {
    let (warden, _clock, _dir) = warden_at(noonish());

    let response = warden.handle_sync("alice\nMinecraft\n").unwrap();
    let lines: Vec<&str> = response.split('\n').collect();

    // One limit line, blank separator, one title line, trailing newline
    assert_eq!(lines.len(), 4);
    let fields: Vec<&str> = lines[0].split(';').collect();
    assert_eq!(fields.len(), 7);
    assert_eq!(fields[1], "0", "not locked");
    assert_eq!(fields[6], "total");
    assert_eq!(lines[1], "");
    // The title's class maps to exactly the total limit
    assert_eq!(lines[2], fields[0]);
}

#[test]
fn sync_without_titles_emits_no_title_section() {
    let (warden, _clock, _dir) = warden_at(noonish());

    let response = warden.handle_sync("alice\n").unwrap();
    let mut lines = response.split('\n');
    assert!(lines.next().unwrap().contains(";total"));
    assert_eq!(lines.next().unwrap(), "");
    assert_eq!(lines.next(), Some(""));
    assert_eq!(lines.next(), None);
}

#[test]
fn sync_bills_between_polls_and_goes_negative_on_zero_budget() {
    let (warden, clock, _dir) = warden_at(noonish());

    warden.handle_sync("alice\nMinecraft\n").unwrap();
    clock.advance(30);
    let response = warden.handle_sync("alice\nMinecraft\n").unwrap();

    // No minute budget configured: 30 seconds spent puts the total limit
    // 30 seconds over
    let fields: Vec<&str> = response.lines().next().unwrap().split(';').collect();
    assert_eq!(fields[2], "-30");
    assert_eq!(fields[3], "-30");
}

#[test]
fn sync_retry_does_not_double_bill() {
    let (warden, clock, _dir) = warden_at(noonish());

    warden.handle_sync("alice\nMinecraft\n").unwrap();
    clock.advance(30);
    warden.handle_sync("alice\nMinecraft\n").unwrap();
    // Same request again at the same instant (client retry)
    warden.handle_sync("alice\nMinecraft\n").unwrap();

    let total = warden.limits("alice").unwrap()[0].id;
    let spent = warden
        .time_spent_by_limit_and_date("alice", 0, None)
        .unwrap();
    let day_total: i64 = spent[&total].values().sum();
    assert_eq!(day_total, 30);
}

#[test]
fn sync_reports_mapped_limits_per_title() {
    let (warden, _clock, _dir) = warden_at(noonish());
    warden.add_user("alice").unwrap();

    let games = warden.add_class("games").unwrap();
    warden.add_rule(games.id, 10, "Minecraft").unwrap();
    let games_limit = warden.add_limit("alice", "games").unwrap();
    warden.add_mapping(games.id, games_limit.id).unwrap();
    let total = warden.limits("alice").unwrap()[0].id;

    let response = warden
        .handle_sync("alice\nMinecraft\nHomework.odt\n")
        .unwrap();
    let lines: Vec<&str> = response.lines().collect();

    // Two limit lines (total first by id), then the two title lines
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[2], "");
    assert_eq!(lines[3], format!("{},{}", total, games_limit.id));
    assert_eq!(lines[4], total.to_string());
}

#[test]
fn sync_slot_fields_appear_in_response() {
    let (warden, _clock, _dir) = warden_at(noonish());
    warden.add_user("alice").unwrap();
    let total = warden.limits("alice").unwrap()[0].id;
    warden.set_limit_config(total, "minutes_day", "1440").unwrap();
    warden
        .set_limit_config(total, "times", "8-9, 12-14, 20-21:30")
        .unwrap();

    let response = warden.handle_sync("alice\n").unwrap();
    let fields: Vec<&str> = response.lines().next().unwrap().split(';').collect();
    assert_eq!(fields[2], "3600");
    assert_eq!(fields[3], "9000");
    assert_eq!(fields[4], "12:00-14:00");
    assert_eq!(fields[5], "20:00-21:30");
}

#[test]
fn sync_rejects_empty_body() {
    let (warden, _clock, _dir) = warden_at(noonish());
    assert!(matches!(
        warden.handle_sync(""),
        Err(WardenError::MalformedRequest(_))
    ));
    assert!(matches!(
        warden.handle_sync("\nMinecraft\n"),
        Err(WardenError::MalformedRequest(_))
    ));
    // Nothing was provisioned by the rejected requests
    assert!(warden.users().unwrap().is_empty());
}

#[test]
fn config_sync_serves_merged_pairs() {
    let (warden, _clock, _dir) = warden_at(noonish());
    warden.set_config("", "sample_interval", "60").unwrap();
    warden.set_config("", "idle_timeout", "300").unwrap();
    warden.set_config("alice", "sample_interval", "15").unwrap();

    let response = warden.handle_config_sync("alice").unwrap();
    assert_eq!(response, "idle_timeout\n300\nsample_interval\n15\n");

    // A user with no specific rows gets the globals
    let response = warden.handle_config_sync("bob").unwrap();
    assert_eq!(response, "idle_timeout\n300\nsample_interval\n60\n");
}

#[test]
fn locked_limit_shows_in_sync_until_unlocked() {
    let (warden, _clock, _dir) = warden_at(noonish());
    warden.add_user("alice").unwrap();
    let total = warden.limits("alice").unwrap()[0].id;
    warden.set_limit_config(total, "minutes_day", "120").unwrap();
    warden.set_limit_config(total, "locked", "1").unwrap();

    let response = warden.handle_sync("alice\n").unwrap();
    assert!(response.starts_with(&format!("{};1;0;0;;;total", total)));

    warden
        .set_override(
            "alice",
            &warden.today(),
            total,
            &timewarden::OverridePatch {
                unlocked: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

    let response = warden.handle_sync("alice\n").unwrap();
    assert!(response.starts_with(&format!("{};0;7200;7200;;;total", total)));
}
