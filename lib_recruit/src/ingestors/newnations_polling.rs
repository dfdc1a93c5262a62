//! # New Nations Polling Ingestor
//!
//! Self-scheduling companion to the happenings stream. Every `polling_rate`
//! it asks the API for `newnationdetails` and dispatches foundings it has not
//! seen yet, so queues keep filling while the stream is reconnecting.
//!
//! Scheduling:
//! - success: sleep `polling_rate`
//! - `RateLimited`: sleep for the advertised wait
//! - anything else: sleep `retry_delay`

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::core::classifier::is_likely_puppet;
use crate::core::event::NationEvent;
use crate::core::queue_manager::QueueManager;
use crate::error::RequestError;
use crate::retrieve::{NewNation, NsClient};

/// Shortest sleep between two polls, whatever the configuration or server say.
pub const MIN_POLL_DELAY: Duration = Duration::from_millis(10);

pub struct NewNationsPoller {
    client: Arc<NsClient>,
    manager: Arc<QueueManager>,
    polling_rate: Duration,
    retry_delay: Duration,
    last_seen: Mutex<Option<DateTime<Utc>>>,
}

impl NewNationsPoller {
    pub fn new(client: Arc<NsClient>, manager: Arc<QueueManager>, polling_rate: Duration) -> Self {
        Self {
            client,
            manager,
            polling_rate: polling_rate.max(MIN_POLL_DELAY),
            retry_delay: Duration::from_secs(60),
            last_seen: Mutex::new(None),
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay.max(MIN_POLL_DELAY);
        self
    }

    /// Founding time of the newest nation dispatched so far.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        *self.lock_seen()
    }

    /// Main execution loop.
    pub async fn run(&self, shutdown: CancellationToken) {
        log::info!("New nations poller started ({}s interval).", self.polling_rate.as_secs());

        while !shutdown.is_cancelled() {
            let delay = match self.poll_once().await {
                Ok(n) => {
                    log::debug!("New nations poll dispatched {} foundings", n);
                    self.polling_rate
                }
                Err(RequestError::RateLimited { retry_after }) => {
                    log::warn!("New nations poll throttled; waiting {}s", retry_after.as_secs());
                    retry_after.max(MIN_POLL_DELAY)
                }
                Err(e) => {
                    log::error!("New nations poll failed: {}. Retrying in {}s...", e, self.retry_delay.as_secs());
                    self.retry_delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        log::info!("New nations poller stopped.");
    }

    /// One poll. Returns how many foundings were dispatched.
    pub async fn poll_once(&self) -> Result<usize, RequestError> {
        let nations = self.client.new_nations().await?;
        Ok(self.ingest(nations))
    }

    /// Dispatches `nations` (oldest first) that are newer than anything seen
    /// before and do not look like puppets. Only foundings that landed in at
    /// least one queue are counted.
    pub(crate) fn ingest(&self, nations: Vec<NewNation>) -> usize {
        let mut last_seen = self.lock_seen();
        let mut dispatched = 0;

        for nation in nations {
            if last_seen.is_some_and(|seen| nation.founded_at <= seen) {
                continue;
            }
            *last_seen = Some(last_seen.map_or(nation.founded_at, |seen| seen.max(nation.founded_at)));

            if is_likely_puppet(&nation.name) {
                continue;
            }
            let queued = self.manager.dispatch(&NationEvent::Founding {
                nation: nation.name,
                region: nation.region,
                at: nation.founded_at,
            });
            if queued > 0 {
                dispatched += 1;
            }
        }
        dispatched
    }

    fn lock_seen(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::MemoryStore;
    use crate::retrieve::NsClientConfig;
    use url::Url;

    async fn poller() -> (NewNationsPoller, Arc<QueueManager>) {
        let store = Arc::new(MemoryStore::new().with_consumer(1, Vec::<String>::new()));
        let manager = Arc::new(QueueManager::new(store));
        manager.load().await.unwrap();
        let client = NsClient::new(NsClientConfig::new(Url::parse("http://127.0.0.1:9/").unwrap(), "tests")).unwrap();
        let poller = NewNationsPoller::new(Arc::new(client), Arc::clone(&manager), Duration::from_secs(30));
        (poller, manager)
    }

    fn nation(name: &str, secs_ago: i64) -> NewNation {
        NewNation {
            name: name.into(),
            region: "balder".into(),
            founded_at: Utc::now() - chrono::Duration::seconds(secs_ago),
        }
    }

    #[tokio::test]
    async fn skips_already_seen_and_puppets() {
        let (poller, manager) = poller().await;

        let first = vec![nation("old_land", 60), nation("farm_123", 50), nation("new_land", 40)];
        assert_eq!(poller.ingest(first.clone()), 2);
        assert_eq!(manager.queue_size(1).unwrap(), 2);

        // the same page again plus one newer founding
        let mut second = first;
        second.push(nation("newest_land", 10));
        assert_eq!(poller.ingest(second), 1);
        assert_eq!(
            manager.queued_names(1).unwrap(),
            vec!["newest_land".to_string(), "new_land".to_string(), "old_land".to_string()]
        );
    }

    #[tokio::test]
    async fn puppet_still_advances_watermark() {
        let (poller, _) = poller().await;
        let puppet = nation("farm_123", 5);
        let at = puppet.founded_at;
        assert_eq!(poller.ingest(vec![puppet]), 0);
        assert_eq!(poller.last_seen(), Some(at));
    }

    #[tokio::test]
    async fn whitelisted_foundings_are_not_counted() {
        let (poller, manager) = poller().await;
        manager.seed_global_whitelist(["europeia"]);

        let mut home = nation("home_grown", 20);
        home.region = "europeia".into();
        let at = home.founded_at;
        assert_eq!(poller.ingest(vec![nation("outsider", 30), home]), 1);
        assert_eq!(manager.queued_names(1).unwrap(), vec!["outsider".to_string()]);
        assert_eq!(poller.last_seen(), Some(at));
    }

    #[tokio::test]
    async fn zero_intervals_are_floored() {
        let (poller, manager) = poller().await;
        let poller = NewNationsPoller::new(Arc::clone(&poller.client), manager, Duration::ZERO).with_retry_delay(Duration::ZERO);
        assert_eq!(poller.polling_rate, MIN_POLL_DELAY);
        assert_eq!(poller.retry_delay, MIN_POLL_DELAY);
    }
}
