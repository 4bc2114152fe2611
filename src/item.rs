//! Work items and their identifiers.
//!
//! Identifiers are a one-minute UTC bucket (`%y%m%d%H%M`) followed by a
//! counter that restarts at zero whenever the bucket changes. A producer may
//! append a stage suffix so the item can be traced to the line it entered.

use std::fmt;

use chrono::{DateTime, Utc};

/// An opaque unit of work. Items carry nothing but their identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Item {
    id: String,
}

impl Item {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Parses an item received from a queue. Empty payloads are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self::new(trimmed))
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Generates time-bucketed identifiers. Not shared across threads: one
/// generator per producing stage.
#[derive(Debug, Default)]
pub struct ItemIdGenerator {
    last_bucket: Option<String>,
    counter: u64,
}

impl ItemIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&mut self) -> String {
        self.generate_at(Utc::now())
    }

    /// Generates an identifier as if the clock read `now`.
    pub fn generate_at(&mut self, now: DateTime<Utc>) -> String {
        let bucket = now.format("%y%m%d%H%M").to_string();
        if self.last_bucket.as_deref() != Some(bucket.as_str()) {
            self.last_bucket = Some(bucket.clone());
            self.counter = 0;
        }
        let id = format!("{bucket}{}", self.counter);
        self.counter += 1;
        id
    }

    /// Generates a new item tagged with the line suffix, if any.
    pub fn next_item(&mut self, suffix: Option<char>) -> Item {
        let mut id = self.generate();
        if let Some(c) = suffix {
            id.push(c);
        }
        Item::new(id)
    }
}

/// The line letter of a stage name, i.e. its last character (`P2-A` -> `A`).
pub fn line_suffix(stage: &str) -> Option<char> {
    stage.chars().last()
}
