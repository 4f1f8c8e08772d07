//! # timewarden
//!
//! Per-user screen-time accounting and limit enforcement.
//!
//! A client periodically reports the window titles a user has open. The
//! engine classifies each title through ordered regular-expression rules,
//! reconstructs billed durations from the sparse sample stream, and
//! aggregates them against hierarchical, time-varying budgets ("limits"):
//! daily and per-weekday minute caps, weekly caps that can only shorten a
//! day, time-of-day slots, lock/unlock state and per-day manual overrides.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use timewarden::Warden;
//!
//! let warden = Warden::open_default().unwrap();
//! // One client sync: record what's open, get back time remaining per
//! // limit and which limits each window counts against
//! let response = warden.handle_sync("alice\nMinecraft\n").unwrap();
//! println!("{}", response);
//! ```

pub mod aggregator;
pub mod classifier;
pub mod clock;
pub mod common;
/// Configuration management module for the operator-facing TOML file
pub mod config;
/// SQLite storage layer: schema, pool, seeds, maintenance
pub mod database;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod models;
pub mod protocol;
pub mod recorder;
/// Retry logic for transient SQLITE_BUSY failures
pub mod retry;
pub mod slots;
pub mod version;
pub mod warden;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use database::Database;
pub use error::{Result, WardenError};
pub use models::{Classification, Limit, OverridePatch, TimeLeft, TitleOrder};
pub use version::version_string;
pub use warden::Warden;
