//! # Recruitment Queue
//!
//! One channel's backlog of nations, newest first.
//!
//! Freshly founded nations are the most valuable targets: they are the least
//! likely to have been contacted already and the most likely to still be
//! active. Prepending on insert and dropping anything older than the
//! retention window on dequeue approximates a priority queue without keeping
//! an explicit priority.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::core::event::Entry;
use crate::error::RecruitError;

/// Default retention window for queued entries.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Entries pulled out of a backlog together with their former positions, so a
/// failed whitelist change can put them back.
pub type Displaced = Vec<(usize, Entry)>;

#[derive(Debug, Clone)]
pub struct Queue {
    whitelist: HashSet<String>,
    backlog: VecDeque<Entry>,
    last_updated: DateTime<Utc>,
    retention: Duration,
}

impl Queue {
    pub fn new<I, S>(whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_retention(whitelist, DEFAULT_RETENTION)
    }

    pub fn with_retention<I, S>(whitelist: I, retention: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whitelist: whitelist.into_iter().map(Into::into).collect(),
            backlog: VecDeque::new(),
            last_updated: Utc::now(),
            retention,
        }
    }

    /// Prepends `entry` unless its region is whitelisted or a nation with the
    /// same name is already waiting. Returns whether the backlog changed.
    ///
    /// Only the current backlog is checked; a nation that was dequeued earlier
    /// can be queued again.
    pub fn insert(&mut self, entry: Entry) -> bool {
        if self.whitelist.contains(&entry.region) {
            return false;
        }
        if self.backlog.iter().any(|e| e.name == entry.name) {
            return false;
        }
        self.backlog.push_front(entry);
        self.last_updated = Utc::now();
        true
    }

    /// Removes the entry named `name`, if present.
    pub fn remove_by_name(&mut self, name: &str) -> Option<Entry> {
        let idx = self.backlog.iter().position(|e| e.name == name)?;
        self.backlog.remove(idx)
    }

    /// Prunes, then takes up to `max_count` of the newest entries.
    ///
    /// Never returns an empty batch: an empty (or fully pruned) backlog is
    /// reported as [`RecruitError::EmptyQueue`].
    pub fn dequeue(&mut self, max_count: usize) -> Result<Vec<Entry>, RecruitError> {
        self.dequeue_at(max_count, Utc::now())
    }

    pub(crate) fn dequeue_at(&mut self, max_count: usize, now: DateTime<Utc>) -> Result<Vec<Entry>, RecruitError> {
        self.prune_at(now);
        if self.backlog.is_empty() || max_count == 0 {
            return Err(RecruitError::EmptyQueue);
        }
        let take = max_count.min(self.backlog.len());
        Ok(self.backlog.drain(..take).collect())
    }

    /// Drops entries older than the retention window. Returns how many were dropped.
    pub fn prune(&mut self) -> usize {
        self.prune_at(Utc::now())
    }

    pub(crate) fn prune_at(&mut self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.backlog.len();
        self.backlog.retain(|e| e.discovered_at > cutoff);
        before - self.backlog.len()
    }

    /// Clears the backlog. Returns how many entries were dropped.
    pub fn purge(&mut self) -> usize {
        let n = self.backlog.len();
        self.backlog.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.backlog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backlog.is_empty()
    }

    /// Names currently waiting, newest first, without dequeuing them.
    pub fn names(&self) -> Vec<String> {
        self.backlog.iter().map(|e| e.name.clone()).collect()
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn whitelist(&self) -> &HashSet<String> {
        &self.whitelist
    }

    pub fn is_whitelisted(&self, region: &str) -> bool {
        self.whitelist.contains(region)
    }

    /// Adds `region` to the whitelist. Returns `false` if it was already there.
    ///
    /// Waiting entries from that region are dropped so the backlog never holds
    /// a whitelisted region.
    pub fn add_to_whitelist(&mut self, region: &str) -> bool {
        self.whitelist_region(region).is_some()
    }

    /// Like [`Queue::add_to_whitelist`], but hands back the evicted entries.
    /// `None` if the region was already whitelisted.
    pub(crate) fn whitelist_region(&mut self, region: &str) -> Option<Displaced> {
        if !self.whitelist.insert(region.to_string()) {
            return None;
        }
        Some(self.drain_region(region))
    }

    /// Removes `region` from the whitelist. Removing a non-member is a no-op.
    pub fn remove_from_whitelist(&mut self, region: &str) -> bool {
        self.whitelist.remove(region)
    }

    /// Takes every waiting entry from `region` out of the backlog.
    pub(crate) fn drain_region(&mut self, region: &str) -> Displaced {
        let mut displaced = Vec::new();
        let mut kept = VecDeque::with_capacity(self.backlog.len());
        for (idx, entry) in self.backlog.drain(..).enumerate() {
            if entry.region == region {
                displaced.push((idx, entry));
            } else {
                kept.push_back(entry);
            }
        }
        self.backlog = kept;
        displaced
    }

    /// Puts a dequeued batch back at the head, newest first, skipping
    /// whitelisted regions and names already queued.
    pub(crate) fn requeue(&mut self, batch: Vec<Entry>) -> usize {
        let before = self.backlog.len();
        let displaced: Displaced = batch
            .into_iter()
            .filter(|e| !self.whitelist.contains(&e.region))
            .enumerate()
            .collect();
        self.restore(displaced);
        self.backlog.len() - before
    }

    /// Puts back entries taken by [`Queue::drain_region`], at their old
    /// positions where possible. Names that reappeared in the meantime are skipped.
    pub(crate) fn restore(&mut self, displaced: Displaced) {
        for (idx, entry) in displaced {
            if self.backlog.iter().any(|e| e.name == entry.name) {
                continue;
            }
            let at = idx.min(self.backlog.len());
            self.backlog.insert(at, entry);
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}
