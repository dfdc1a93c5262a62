//! Typed events produced at the ingestion boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a consumer (one registered chat channel).
pub type ConsumerId = u64;

/// A nation eligible for recruitment.
///
/// Identity is `name`. Entries are never mutated after creation; only their
/// membership in a queue's backlog changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub region: String,
    pub discovered_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(name: impl Into<String>, region: impl Into<String>, discovered_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            discovered_at,
        }
    }
}

/// The closed set of happenings the engine reacts to.
///
/// Anything the classifier does not recognize never becomes a `NationEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NationEvent {
    /// `@@nation@@ was founded in %%region%%.`
    Founding {
        nation: String,
        region: String,
        at: DateTime<Utc>,
    },
    /// `@@nation@@ relocated from %%from%% to %%to%%.`
    Move {
        nation: String,
        from: String,
        to: String,
        at: DateTime<Utc>,
    },
}

impl NationEvent {
    /// The canonical name of the nation the event is about.
    pub fn nation(&self) -> &str {
        match self {
            NationEvent::Founding { nation, .. } | NationEvent::Move { nation, .. } => nation,
        }
    }

    /// Replaces the event time, e.g. with the upstream timestamp of the record.
    pub fn with_time(self, time: DateTime<Utc>) -> Self {
        match self {
            NationEvent::Founding { nation, region, .. } => NationEvent::Founding { nation, region, at: time },
            NationEvent::Move { nation, from, to, .. } => NationEvent::Move { nation, from, to, at: time },
        }
    }
}

/// Canonical form of nation and region names: trimmed, lowercase, spaces as underscores.
pub fn canonicalize(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_matches_api_form() {
        assert_eq!(canonicalize("  The North Pacific "), "the_north_pacific");
        assert_eq!(canonicalize("already_fine"), "already_fine");
    }

    #[test]
    fn with_time_keeps_payload() {
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let t1 = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let ev = NationEvent::Move {
            nation: "a".into(),
            from: "b".into(),
            to: "c".into(),
            at: t0,
        };
        let moved = ev.with_time(t1);
        assert_eq!(moved.nation(), "a");
        assert!(matches!(moved, NationEvent::Move { at, .. } if at == t1));
    }
}
