//! Title classification.
//!
//! Window titles are sorted into classes by ordered regular-expression
//! rules: every rule is evaluated, the highest-priority match wins, ties
//! break by rule id ascending. The seeded catch-all rule (empty pattern,
//! minimum priority) guarantees a match for any title.
//!
//! Patterns compile as byte-level regexes with Unicode mode disabled, so
//! `.` and character classes match single bytes. The pattern language is
//! deliberately scoped to a single-byte encoding; multi-byte titles still
//! classify, they just never get multi-byte-aware character classes.

use crate::error::{Result, WardenError};
use log::error;
use regex::bytes::{Regex, RegexBuilder};
use rusqlite::Connection;

/// Compile one classification pattern with the engine's byte semantics.
///
/// Used both when validating an admin-submitted rule and when loading the
/// rule table; the two must agree or a rule could be accepted and then
/// fail at classification time.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .unicode(false)
        .build()
        .map_err(|e| WardenError::pattern(pattern, e.to_string()))
}

/// One loaded rule with its compiled regex.
pub struct CompiledRule {
    pub rule_id: i64,
    pub class_id: i64,
    pub priority: i64,
    regex: Regex,
}

/// An immutable snapshot of the rule table, ordered for classification.
///
/// Rebuild (reload) after rule or class mutations; concurrent activity
/// inserts using an older snapshot are an accepted race, resolved by
/// last-write-wins on the activity row's class id.
pub struct Classifier {
    rules: Vec<CompiledRule>,
}

impl Classifier {
    /// Load and compile all rules, ordered by priority descending then
    /// rule id ascending, so the first match during a scan is the winner.
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT rule_id, class_id, priority, pattern
             FROM class_rules
             ORDER BY priority DESC, rule_id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut rules = Vec::new();
        for row in rows {
            let (rule_id, class_id, priority, pattern) = row?;
            let regex = compile_pattern(&pattern)?;
            rules.push(CompiledRule {
                rule_id,
                class_id,
                priority,
                regex,
            });
        }

        Ok(Classifier { rules })
    }

    /// Classify one title, returning the winning rule.
    ///
    /// A miss across the whole table means the catch-all rule is gone;
    /// that is an internal-consistency failure, not a user error.
    pub fn classify(&self, title: &str) -> Result<&CompiledRule> {
        for rule in &self.rules {
            if rule.regex.is_match(title.as_bytes()) {
                return Ok(rule);
            }
        }

        error!(
            "No classification rule matched title ({} rules loaded); \
             default catch-all rule is missing or broken",
            self.rules.len()
        );
        Err(WardenError::NoRuleMatched)
    }

    /// Class id a title belongs to.
    pub fn classify_class(&self, title: &str) -> Result<i64> {
        self.classify(title).map(|rule| rule.class_id)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
