//! Error handling module for timewarden.
//!
//! This module provides a unified error type using the `thiserror` crate,
//! covering validation, storage-integrity, protected-entity and
//! internal-consistency failures across the engine.

use std::io;
use thiserror::Error;

/// Unified error type for the timewarden engine.
///
/// Validation errors (bad patterns, bad slot specs, malformed request
/// bodies) are rejected at the mutating call with no partial state change.
/// Integrity errors surface the underlying storage failure. Protected-entity
/// errors cover the default class and default classification rule; total
/// limits are handled as silent no-ops instead (see `graph`).
#[derive(Error, Debug)]
pub enum WardenError {
    /// I/O operation errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization errors (report output)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database operation errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A classification rule pattern failed to compile
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A day-slot specification failed to parse
    #[error("Invalid time slot: '{0}'")]
    InvalidSlotSpec(String),

    /// A (class, limit) mapping already exists
    #[error("Class {class_id} is already mapped to limit {limit_id}")]
    DuplicateMapping { class_id: i64, limit_id: i64 },

    /// Mutation attempted on the default class or default rule
    #[error("Protected: {0}")]
    Protected(String),

    /// A referenced class, rule, limit or user does not exist
    #[error("Unknown {kind} '{id}'")]
    UnknownEntity { kind: &'static str, id: String },

    /// Client request body could not be parsed
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// No classification rule matched a title. The default catch-all rule
    /// guarantees this cannot happen; seeing it means the rule table is
    /// corrupt and no caller can recover.
    #[error("No classification rule matched title; default rule missing or broken")]
    NoRuleMatched,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic operation errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for timewarden operations
pub type Result<T> = std::result::Result<T, WardenError>;

impl WardenError {
    /// Create an invalid-pattern error from a regex compile failure
    pub fn pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        WardenError::InvalidPattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Create an unknown-entity error
    pub fn unknown(kind: &'static str, id: impl ToString) -> Self {
        WardenError::UnknownEntity {
            kind,
            id: id.to_string(),
        }
    }

    /// Create a protected-entity error
    pub fn protected(msg: impl Into<String>) -> Self {
        WardenError::Protected(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        WardenError::Config(msg.into())
    }

    /// Create a generic other error
    pub fn other(msg: impl Into<String>) -> Self {
        WardenError::Other(msg.into())
    }
}

impl From<String> for WardenError {
    fn from(s: String) -> Self {
        WardenError::Other(s)
    }
}

impl From<&str> for WardenError {
    fn from(s: &str) -> Self {
        WardenError::Other(s.to_string())
    }
}
