//! # In-Memory Store
//!
//! Implements both storage traits over plain collections. Writes can be made
//! to fail on demand, which is how the rollback paths of the queue manager are
//! exercised.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ConsumerRecord, RecruiterStore, WhitelistStore};
use crate::core::{ConsumerId, Recruiter};
use crate::error::StorageError;

#[derive(Debug, Default)]
struct MemoryState {
    consumers: BTreeMap<ConsumerId, BTreeSet<String>>,
    global: BTreeSet<String>,
    recruiters: HashMap<(u64, ConsumerId), Recruiter>,
    telegrams: Vec<(u64, ConsumerId, usize)>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a channel without going through the write path.
    pub fn with_consumer<I, S>(self, id: ConsumerId, whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .consumers
            .insert(id, whitelist.into_iter().map(Into::into).collect());
        self
    }

    /// Seeds a global whitelist region without going through the write path.
    pub fn with_global_region(self, region: &str) -> Self {
        self.lock().global.insert(region.to_string());
        self
    }

    /// When set, every write fails with [`StorageError::Rejected`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn consumer_regions(&self, id: ConsumerId) -> Option<BTreeSet<String>> {
        self.lock().consumers.get(&id).cloned()
    }

    pub fn global_regions(&self) -> BTreeSet<String> {
        self.lock().global.clone()
    }

    /// Sum of recorded telegram counts for one recruiter.
    pub fn telegram_total(&self, user_id: u64, consumer: ConsumerId) -> usize {
        self.lock()
            .telegrams
            .iter()
            .filter(|(u, c, _)| *u == user_id && *c == consumer)
            .map(|(_, _, n)| n)
            .sum()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("memory store is read-only".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WhitelistStore for MemoryStore {
    async fn load_consumers(&self) -> Result<Vec<ConsumerRecord>, StorageError> {
        Ok(self
            .lock()
            .consumers
            .iter()
            .map(|(id, regions)| ConsumerRecord {
                id: *id,
                whitelist: regions.iter().cloned().collect(),
            })
            .collect())
    }

    async fn load_global_whitelist(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock().global.iter().cloned().collect())
    }

    async fn insert_consumer(&self, id: ConsumerId, whitelist: &[String]) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut state = self.lock();
        if state.consumers.contains_key(&id) {
            return Err(StorageError::Rejected(format!("channel {} already registered", id)));
        }
        state.consumers.insert(id, whitelist.iter().cloned().collect());
        Ok(())
    }

    async fn delete_consumer(&self, id: ConsumerId) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut state = self.lock();
        state.consumers.remove(&id);
        state.recruiters.retain(|(_, c), _| *c != id);
        Ok(())
    }

    async fn insert_consumer_region(&self, id: ConsumerId, region: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        match self.lock().consumers.get_mut(&id) {
            Some(regions) => {
                regions.insert(region.to_string());
                Ok(())
            }
            None => Err(StorageError::Rejected(format!("channel {} is not registered", id))),
        }
    }

    async fn delete_consumer_region(&self, id: ConsumerId, region: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        if let Some(regions) = self.lock().consumers.get_mut(&id) {
            regions.remove(region);
        }
        Ok(())
    }

    async fn insert_global_region(&self, region: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        self.lock().global.insert(region.to_string());
        Ok(())
    }

    async fn delete_global_region(&self, region: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        self.lock().global.remove(region);
        Ok(())
    }
}

#[async_trait]
impl RecruiterStore for MemoryStore {
    async fn find_recruiter(&self, user_id: u64, consumer: ConsumerId) -> Result<Option<Recruiter>, StorageError> {
        Ok(self.lock().recruiters.get(&(user_id, consumer)).cloned())
    }

    async fn upsert_recruiter(&self, recruiter: &Recruiter) -> Result<(), StorageError> {
        self.check_writable()?;
        self.lock()
            .recruiters
            .insert((recruiter.user_id, recruiter.consumer), recruiter.clone());
        Ok(())
    }

    async fn set_next_recruitment_at(
        &self,
        user_id: u64,
        consumer: ConsumerId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.check_writable()?;
        match self.lock().recruiters.get_mut(&(user_id, consumer)) {
            Some(r) => {
                r.next_recruitment_at = at;
                Ok(())
            }
            None => Err(StorageError::Rejected(format!("no recruiter {} in channel {}", user_id, consumer))),
        }
    }

    async fn record_telegrams(&self, user_id: u64, consumer: ConsumerId, count: usize) -> Result<(), StorageError> {
        self.check_writable()?;
        self.lock().telegrams.push((user_id, consumer, count));
        Ok(())
    }
}
