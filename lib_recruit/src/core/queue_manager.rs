//! # Queue Manager
//!
//! Owns every channel's [`Queue`] plus the global whitelist, and is the only
//! piece of shared mutable state between the stream task, the poller and
//! request handlers.
//!
//! ## Locking
//!
//! The map of queues sits behind a read/write lock and each queue behind its
//! own mutex, so fan-out to many queues and a dequeue on one of them only
//! contend on the queues they touch. Handles are cloned out of the map and the
//! map lock is released before any queue is locked. No lock is ever held
//! across an `.await`; storage calls happen between lock scopes.
//!
//! ## Whitelist persistence
//!
//! Whitelist mutations change memory first, then write through to the
//! [`WhitelistStore`]. If the write fails, the memory change is undone
//! (including any entries evicted by the change) and the storage error is
//! returned. Mutations that change nothing never reach storage.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::connections::WhitelistStore;
use crate::core::classifier::is_likely_puppet;
use crate::core::event::{canonicalize, ConsumerId, Entry, NationEvent};
use crate::core::queue::{Displaced, Queue, DEFAULT_RETENTION};
use crate::error::RecruitError;

type QueueHandle = Arc<Mutex<Queue>>;

pub struct QueueManager {
    queues: RwLock<HashMap<ConsumerId, QueueHandle>>,
    global_whitelist: RwLock<HashSet<String>>,
    store: Arc<dyn WhitelistStore>,
    retention: Duration,
}

impl QueueManager {
    pub fn new(store: Arc<dyn WhitelistStore>) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            global_whitelist: RwLock::new(HashSet::new()),
            store,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Retention window applied to queues created from now on.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// # Load
    ///
    /// Replaces the in-memory state with what storage holds. Called once at
    /// startup; queues start with empty backlogs.
    pub async fn load(&self) -> Result<(), RecruitError> {
        let global = self.store.load_global_whitelist().await?;
        let consumers = self.store.load_consumers().await?;

        let mut queues = HashMap::with_capacity(consumers.len());
        for record in consumers {
            let queue = Queue::with_retention(record.whitelist, self.retention);
            queues.insert(record.id, Arc::new(Mutex::new(queue)));
        }

        log::info!(
            "Loaded {} recruitment channels and {} globally whitelisted regions",
            queues.len(),
            global.len()
        );
        *self.write_global() = global.into_iter().collect();
        *self.write_queues() = queues;
        Ok(())
    }

    /// Adds regions to the global whitelist in memory only, e.g. the home
    /// region from configuration.
    pub fn seed_global_whitelist<I, S>(&self, regions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut global = self.write_global();
        for region in regions {
            let region = canonicalize(region.as_ref());
            if !region.is_empty() {
                global.insert(region);
            }
        }
    }

    /// # Dispatch
    ///
    /// Applies one classified event to every queue. Returns how many queues
    /// changed.
    ///
    /// - `Founding`: puppets and globally whitelisted regions are dropped;
    ///   otherwise the nation is offered to every queue, which applies its own
    ///   whitelist and duplicate check.
    /// - `Move`: puppets are ignored. A move into a globally whitelisted region
    ///   takes the nation out of every queue; a move into a region on a
    ///   queue's own whitelist takes it out of that queue. Moves never add.
    pub fn dispatch(&self, event: &NationEvent) -> usize {
        if is_likely_puppet(event.nation()) {
            log::trace!("Ignoring likely puppet {}", event.nation());
            return 0;
        }

        match event {
            NationEvent::Founding { nation, region, at } => {
                // held across the fan-out so a concurrent global whitelisting
                // either rejects this founding or drains it afterwards
                let global = self.read_global();
                if global.contains(region) {
                    return 0;
                }
                let entry = Entry::new(nation.as_str(), region.as_str(), *at);
                self.handles()
                    .into_iter()
                    .filter(|(_, handle)| lock_queue(handle).insert(entry.clone()))
                    .count()
            }
            NationEvent::Move { nation, to, .. } => {
                let guard = self.read_global();
                let global = guard.contains(to);
                self.handles()
                    .into_iter()
                    .filter(|(_, handle)| {
                        let mut queue = lock_queue(handle);
                        (global || queue.is_whitelisted(to)) && queue.remove_by_name(nation).is_some()
                    })
                    .count()
            }
        }
    }

    /// Registers a channel with an initial whitelist.
    pub async fn add_consumer(&self, id: ConsumerId, whitelist: Vec<String>) -> Result<(), RecruitError> {
        let whitelist: Vec<String> = whitelist
            .iter()
            .map(|r| canonicalize(r))
            .filter(|r| !r.is_empty())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        {
            let mut queues = self.write_queues();
            if queues.contains_key(&id) {
                return Err(RecruitError::ConsumerExists(id));
            }
            let queue = Queue::with_retention(whitelist.iter().cloned(), self.retention);
            queues.insert(id, Arc::new(Mutex::new(queue)));
        }

        if let Err(e) = self.store.insert_consumer(id, &whitelist).await {
            log::error!("Failed to persist channel {}: {}", id, e);
            self.write_queues().remove(&id);
            return Err(e.into());
        }

        log::info!("Channel {} registered with {} whitelisted regions", id, whitelist.len());
        Ok(())
    }

    /// Unregisters a channel, dropping its queue.
    pub async fn remove_consumer(&self, id: ConsumerId) -> Result<(), RecruitError> {
        let handle = self
            .write_queues()
            .remove(&id)
            .ok_or(RecruitError::UnknownConsumer(id))?;

        if let Err(e) = self.store.delete_consumer(id).await {
            log::error!("Failed to delete channel {}: {}", id, e);
            self.write_queues().entry(id).or_insert(handle);
            return Err(e.into());
        }

        log::info!("Channel {} unregistered", id);
        Ok(())
    }

    /// Whitelists `region` for one channel. Returns `false` if it already was.
    pub async fn add_to_consumer_whitelist(&self, id: ConsumerId, region: &str) -> Result<bool, RecruitError> {
        let region = canonical_region(region)?;
        let handle = self.handle(id)?;

        let displaced = match lock_queue(&handle).whitelist_region(&region) {
            Some(displaced) => displaced,
            None => return Ok(false),
        };

        if let Err(e) = self.store.insert_consumer_region(id, &region).await {
            log::error!("Failed to persist whitelist entry {} for channel {}: {}", region, id, e);
            let mut queue = lock_queue(&handle);
            queue.remove_from_whitelist(&region);
            queue.restore(displaced);
            return Err(e.into());
        }

        log::info!("Channel {} whitelisted {} ({} queued nations dropped)", id, region, displaced.len());
        Ok(true)
    }

    /// Removes `region` from one channel's whitelist. Returns `false` if it was not there.
    pub async fn remove_from_consumer_whitelist(&self, id: ConsumerId, region: &str) -> Result<bool, RecruitError> {
        let region = canonical_region(region)?;
        let handle = self.handle(id)?;

        if !lock_queue(&handle).remove_from_whitelist(&region) {
            return Ok(false);
        }

        if let Err(e) = self.store.delete_consumer_region(id, &region).await {
            log::error!("Failed to delete whitelist entry {} for channel {}: {}", region, id, e);
            lock_queue(&handle).add_to_whitelist(&region);
            return Err(e.into());
        }

        log::info!("Channel {} removed {} from its whitelist", id, region);
        Ok(true)
    }

    /// Whitelists `region` for every channel. Nations from that region already
    /// queued anywhere are dropped. Returns `false` if it already was.
    pub async fn add_global_whitelist(&self, region: &str) -> Result<bool, RecruitError> {
        let region = canonical_region(region)?;

        if !self.write_global().insert(region.clone()) {
            return Ok(false);
        }

        let mut evicted: Vec<(QueueHandle, Displaced)> = Vec::new();
        for (_, handle) in self.handles() {
            let displaced = lock_queue(&handle).drain_region(&region);
            if !displaced.is_empty() {
                evicted.push((handle, displaced));
            }
        }

        if let Err(e) = self.store.insert_global_region(&region).await {
            log::error!("Failed to persist global whitelist entry {}: {}", region, e);
            self.write_global().remove(&region);
            for (handle, displaced) in evicted {
                lock_queue(&handle).restore(displaced);
            }
            return Err(e.into());
        }

        log::info!("Globally whitelisted {}", region);
        Ok(true)
    }

    /// Removes `region` from the global whitelist. Returns `false` if it was not there.
    pub async fn remove_global_whitelist(&self, region: &str) -> Result<bool, RecruitError> {
        let region = canonical_region(region)?;

        if !self.write_global().remove(&region) {
            return Ok(false);
        }

        if let Err(e) = self.store.delete_global_region(&region).await {
            log::error!("Failed to delete global whitelist entry {}: {}", region, e);
            self.write_global().insert(region);
            return Err(e.into());
        }

        log::info!("Removed {} from the global whitelist", region);
        Ok(true)
    }

    /// Takes up to `max_count` of the newest entries from a channel's queue.
    pub fn dequeue_for(&self, id: ConsumerId, max_count: usize) -> Result<Vec<Entry>, RecruitError> {
        let handle = self.handle(id)?;
        let batch = lock_queue(&handle).dequeue(max_count)?;
        Ok(batch)
    }

    /// Puts an undelivered batch back at the head of a channel's queue, in
    /// the order [`QueueManager::dequeue_for`] returned it. Entries whose region
    /// has since been whitelisted, or whose name is queued again, are dropped.
    /// Returns how many were put back.
    pub fn requeue(&self, id: ConsumerId, batch: Vec<Entry>) -> Result<usize, RecruitError> {
        let handle = self.handle(id)?;
        let global = self.read_global();
        let batch = batch.into_iter().filter(|e| !global.contains(&e.region)).collect();
        let requeued = lock_queue(&handle).requeue(batch);
        Ok(requeued)
    }

    pub fn queue_size(&self, id: ConsumerId) -> Result<usize, RecruitError> {
        Ok(lock_queue(&self.handle(id)?).len())
    }

    /// Names waiting in a channel's queue, newest first.
    pub fn queued_names(&self, id: ConsumerId) -> Result<Vec<String>, RecruitError> {
        Ok(lock_queue(&self.handle(id)?).names())
    }

    pub fn purge(&self, id: ConsumerId) -> Result<usize, RecruitError> {
        Ok(lock_queue(&self.handle(id)?).purge())
    }

    pub fn last_updated(&self, id: ConsumerId) -> Result<DateTime<Utc>, RecruitError> {
        Ok(lock_queue(&self.handle(id)?).last_updated())
    }

    /// A channel's whitelist, sorted.
    pub fn consumer_whitelist(&self, id: ConsumerId) -> Result<Vec<String>, RecruitError> {
        let handle = self.handle(id)?;
        let mut regions: Vec<String> = lock_queue(&handle).whitelist().iter().cloned().collect();
        regions.sort();
        Ok(regions)
    }

    /// The global whitelist, sorted.
    pub fn global_whitelist(&self) -> Vec<String> {
        let mut regions: Vec<String> = self.read_global().iter().cloned().collect();
        regions.sort();
        regions
    }

    pub fn consumer_ids(&self) -> Vec<ConsumerId> {
        let mut ids: Vec<ConsumerId> = self.read_queues().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Backlog size per channel, sorted by channel id.
    pub fn sizes(&self) -> Vec<(ConsumerId, usize)> {
        let mut sizes: Vec<(ConsumerId, usize)> = self
            .handles()
            .into_iter()
            .map(|(id, handle)| (id, lock_queue(&handle).len()))
            .collect();
        sizes.sort_unstable_by_key(|(id, _)| *id);
        sizes
    }

    /// Prunes every queue. Returns how many entries were dropped in total.
    pub fn prune_all(&self) -> usize {
        self.handles()
            .into_iter()
            .map(|(_, handle)| lock_queue(&handle).prune())
            .sum()
    }

    fn handle(&self, id: ConsumerId) -> Result<QueueHandle, RecruitError> {
        self.read_queues()
            .get(&id)
            .cloned()
            .ok_or(RecruitError::UnknownConsumer(id))
    }

    fn handles(&self) -> Vec<(ConsumerId, QueueHandle)> {
        self.read_queues()
            .iter()
            .map(|(id, handle)| (*id, Arc::clone(handle)))
            .collect()
    }

    fn read_queues(&self) -> RwLockReadGuard<'_, HashMap<ConsumerId, QueueHandle>> {
        self.queues.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_queues(&self) -> RwLockWriteGuard<'_, HashMap<ConsumerId, QueueHandle>> {
        self.queues.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_global(&self) -> RwLockReadGuard<'_, HashSet<String>> {
        self.global_whitelist.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_global(&self) -> RwLockWriteGuard<'_, HashSet<String>> {
        self.global_whitelist.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock_queue(handle: &QueueHandle) -> MutexGuard<'_, Queue> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

fn canonical_region(region: &str) -> Result<String, RecruitError> {
    let region = canonicalize(region);
    if region.is_empty() {
        return Err(RecruitError::EmptyRegion);
    }
    Ok(region)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::MemoryStore;
    use crate::error::StorageError;

    fn founding(nation: &str, region: &str) -> NationEvent {
        NationEvent::Founding {
            nation: nation.into(),
            region: region.into(),
            at: Utc::now(),
        }
    }

    fn moved(nation: &str, to: &str) -> NationEvent {
        NationEvent::Move {
            nation: nation.into(),
            from: "somewhere".into(),
            to: to.into(),
            at: Utc::now(),
        }
    }

    async fn manager_with(store: Arc<MemoryStore>) -> QueueManager {
        let manager = QueueManager::new(store);
        manager.load().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn load_restores_channels_and_whitelists() {
        let store = Arc::new(
            MemoryStore::new()
                .with_consumer(1, ["lazarus"])
                .with_consumer(2, Vec::<String>::new())
                .with_global_region("europeia"),
        );
        let manager = manager_with(store).await;
        assert_eq!(manager.consumer_ids(), vec![1, 2]);
        assert_eq!(manager.consumer_whitelist(1).unwrap(), vec!["lazarus".to_string()]);
        assert_eq!(manager.global_whitelist(), vec!["europeia".to_string()]);
    }

    #[tokio::test]
    async fn founding_fans_out_respecting_whitelists() {
        let store = Arc::new(
            MemoryStore::new()
                .with_consumer(1, ["lazarus"])
                .with_consumer(2, Vec::<String>::new())
                .with_global_region("europeia"),
        );
        let manager = manager_with(store).await;

        assert_eq!(manager.dispatch(&founding("alpha", "lazarus")), 1);
        assert_eq!(manager.dispatch(&founding("beta", "europeia")), 0);
        assert_eq!(manager.dispatch(&founding("gamma", "balder")), 2);

        assert_eq!(manager.queued_names(1).unwrap(), vec!["gamma".to_string()]);
        assert_eq!(manager.queued_names(2).unwrap(), vec!["gamma".to_string(), "alpha".to_string()]);
    }

    #[tokio::test]
    async fn puppets_are_never_dispatched() {
        let store = Arc::new(MemoryStore::new().with_consumer(1, Vec::<String>::new()));
        let manager = manager_with(store).await;

        for name in ["12345_farm", "farm_999", "storage_xiv"] {
            assert_eq!(manager.dispatch(&founding(name, "balder")), 0);
        }
        assert!(matches!(manager.dequeue_for(1, 8), Err(RecruitError::EmptyQueue)));
    }

    #[tokio::test]
    async fn move_into_global_whitelist_removes_everywhere() {
        let store = Arc::new(
            MemoryStore::new()
                .with_consumer(1, Vec::<String>::new())
                .with_consumer(2, ["lazarus"])
                .with_global_region("europeia"),
        );
        let manager = manager_with(store).await;
        manager.dispatch(&founding("wanderer", "balder"));
        assert_eq!(manager.sizes(), vec![(1, 1), (2, 1)]);

        assert_eq!(manager.dispatch(&moved("wanderer", "europeia")), 2);
        assert_eq!(manager.sizes(), vec![(1, 0), (2, 0)]);
    }

    #[tokio::test]
    async fn move_into_local_whitelist_removes_only_there_and_never_adds() {
        let store = Arc::new(
            MemoryStore::new()
                .with_consumer(1, Vec::<String>::new())
                .with_consumer(2, ["lazarus"]),
        );
        let manager = manager_with(store).await;
        manager.dispatch(&founding("wanderer", "balder"));

        assert_eq!(manager.dispatch(&moved("wanderer", "lazarus")), 1);
        assert_eq!(manager.sizes(), vec![(1, 1), (2, 0)]);

        // moving back out does not requeue
        assert_eq!(manager.dispatch(&moved("wanderer", "balder")), 0);
        assert_eq!(manager.sizes(), vec![(1, 1), (2, 0)]);
    }

    #[tokio::test]
    async fn consumer_lifecycle_is_persisted() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(Arc::clone(&store)).await;

        manager
            .add_consumer(9, vec!["The North Pacific".into(), "".into()])
            .await
            .unwrap();
        assert!(matches!(
            manager.add_consumer(9, vec![]).await,
            Err(RecruitError::ConsumerExists(9))
        ));
        assert_eq!(
            store.consumer_regions(9).unwrap().into_iter().collect::<Vec<_>>(),
            vec!["the_north_pacific".to_string()]
        );

        manager.remove_consumer(9).await.unwrap();
        assert!(store.consumer_regions(9).is_none());
        assert!(matches!(manager.queue_size(9), Err(RecruitError::UnknownConsumer(9))));
        assert!(matches!(
            manager.remove_consumer(9).await,
            Err(RecruitError::UnknownConsumer(9))
        ));
    }

    #[tokio::test]
    async fn failed_consumer_insert_leaves_no_queue() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(Arc::clone(&store)).await;
        store.set_fail_writes(true);

        assert!(matches!(
            manager.add_consumer(3, vec![]).await,
            Err(RecruitError::Storage(StorageError::Rejected(_)))
        ));
        assert!(manager.consumer_ids().is_empty());
    }

    #[tokio::test]
    async fn local_whitelist_add_rolls_back_on_storage_failure() {
        let store = Arc::new(MemoryStore::new().with_consumer(1, Vec::<String>::new()));
        let manager = manager_with(Arc::clone(&store)).await;
        manager.dispatch(&founding("a", "lazarus"));
        manager.dispatch(&founding("b", "balder"));
        manager.dispatch(&founding("c", "lazarus"));

        store.set_fail_writes(true);
        assert!(matches!(
            manager.add_to_consumer_whitelist(1, "lazarus").await,
            Err(RecruitError::Storage(_))
        ));
        assert!(manager.consumer_whitelist(1).unwrap().is_empty());
        assert_eq!(
            manager.queued_names(1).unwrap(),
            vec!["c".to_string(), "b".to_string(), "a".to_string()]
        );

        store.set_fail_writes(false);
        assert!(manager.add_to_consumer_whitelist(1, "Lazarus").await.unwrap());
        assert!(!manager.add_to_consumer_whitelist(1, "lazarus").await.unwrap());
        assert_eq!(manager.queued_names(1).unwrap(), vec!["b".to_string()]);
        assert!(store.consumer_regions(1).unwrap().contains("lazarus"));
    }

    #[tokio::test]
    async fn local_whitelist_remove_rolls_back_on_storage_failure() {
        let store = Arc::new(MemoryStore::new().with_consumer(1, ["lazarus"]));
        let manager = manager_with(Arc::clone(&store)).await;

        store.set_fail_writes(true);
        assert!(manager.remove_from_consumer_whitelist(1, "lazarus").await.is_err());
        assert_eq!(manager.consumer_whitelist(1).unwrap(), vec!["lazarus".to_string()]);

        // no-op removal never touches storage, so it succeeds even now
        assert!(!manager.remove_from_consumer_whitelist(1, "balder").await.unwrap());
    }

    #[tokio::test]
    async fn global_whitelist_add_evicts_and_rolls_back() {
        let store = Arc::new(
            MemoryStore::new()
                .with_consumer(1, Vec::<String>::new())
                .with_consumer(2, Vec::<String>::new()),
        );
        let manager = manager_with(Arc::clone(&store)).await;
        manager.dispatch(&founding("a", "lazarus"));
        manager.dispatch(&founding("b", "balder"));

        store.set_fail_writes(true);
        assert!(manager.add_global_whitelist("lazarus").await.is_err());
        assert!(manager.global_whitelist().is_empty());
        assert_eq!(manager.sizes(), vec![(1, 2), (2, 2)]);

        store.set_fail_writes(false);
        assert!(manager.add_global_whitelist("lazarus").await.unwrap());
        assert_eq!(manager.sizes(), vec![(1, 1), (2, 1)]);
        assert!(store.global_regions().contains("lazarus"));

        assert!(manager.remove_global_whitelist("lazarus").await.unwrap());
        assert!(!manager.remove_global_whitelist("lazarus").await.unwrap());
        assert!(store.global_regions().is_empty());
    }

    #[tokio::test]
    async fn empty_region_is_rejected() {
        let store = Arc::new(MemoryStore::new().with_consumer(1, Vec::<String>::new()));
        let manager = manager_with(store).await;
        assert!(matches!(
            manager.add_to_consumer_whitelist(1, "   ").await,
            Err(RecruitError::EmptyRegion)
        ));
        assert!(matches!(manager.add_global_whitelist("").await, Err(RecruitError::EmptyRegion)));
    }

    #[tokio::test]
    async fn seeded_regions_are_memory_only() {
        let store = Arc::new(MemoryStore::new().with_consumer(1, Vec::<String>::new()));
        let manager = manager_with(Arc::clone(&store)).await;
        manager.seed_global_whitelist(["Europeia"]);
        assert_eq!(manager.global_whitelist(), vec!["europeia".to_string()]);
        assert!(store.global_regions().is_empty());
        assert_eq!(manager.dispatch(&founding("a", "europeia")), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatch_and_dequeue_deliver_each_name_once() {
        let store = Arc::new(MemoryStore::new().with_consumer(1, Vec::<String>::new()));
        let manager = Arc::new(manager_with(store).await);

        let mut producers = Vec::new();
        for worker in 0..4 {
            let manager = Arc::clone(&manager);
            producers.push(tokio::spawn(async move {
                for n in 0..50 {
                    manager.dispatch(&founding(&format!("nation_{}_x{}x", worker, n), "balder"));
                    tokio::task::yield_now().await;
                }
            }));
        }

        let consumer = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..200 {
                    if let Ok(batch) = manager.dequeue_for(1, 3) {
                        seen.extend(batch.into_iter().map(|e| e.name));
                    }
                    tokio::task::yield_now().await;
                }
                seen
            })
        };

        for p in producers {
            p.await.unwrap();
        }
        let mut seen = consumer.await.unwrap();
        while let Ok(batch) = manager.dequeue_for(1, 8) {
            seen.extend(batch.into_iter().map(|e| e.name));
        }

        let unique: HashSet<_> = seen.iter().cloned().collect();
        assert_eq!(seen.len(), 200);
        assert_eq!(unique.len(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn global_whitelisting_during_dispatch_leaves_no_stragglers() {
        let store = Arc::new(
            MemoryStore::new()
                .with_consumer(1, Vec::<String>::new())
                .with_consumer(2, Vec::<String>::new()),
        );
        let manager = Arc::new(manager_with(store).await);

        let mut producers = Vec::new();
        for worker in 0..3 {
            let manager = Arc::clone(&manager);
            producers.push(tokio::spawn(async move {
                for n in 0..200 {
                    manager.dispatch(&founding(&format!("settler_{}_x{}x", worker, n), "lazarus"));
                    if n % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }

        tokio::task::yield_now().await;
        assert!(manager.add_global_whitelist("lazarus").await.unwrap());
        for p in producers {
            p.await.unwrap();
        }

        assert_eq!(manager.sizes(), vec![(1, 0), (2, 0)]);
    }

    #[tokio::test]
    async fn requeue_skips_newly_whitelisted_regions() {
        let store = Arc::new(MemoryStore::new().with_consumer(1, Vec::<String>::new()));
        let manager = manager_with(store).await;
        manager.dispatch(&founding("a", "balder"));
        manager.dispatch(&founding("b", "lazarus"));
        manager.dispatch(&founding("c", "balder"));

        let batch = manager.dequeue_for(1, 8).unwrap();
        manager.add_global_whitelist("lazarus").await.unwrap();
        assert_eq!(manager.requeue(1, batch).unwrap(), 2);
        assert_eq!(manager.queued_names(1).unwrap(), vec!["c".to_string(), "a".to_string()]);
        assert!(matches!(manager.requeue(7, vec![]), Err(RecruitError::UnknownConsumer(7))));
    }
}
