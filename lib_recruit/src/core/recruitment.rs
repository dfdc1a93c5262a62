//! # Recruitment Desk
//!
//! The consumer-facing flow on top of the queues: recruiters register a nation
//! per channel, then pull batches subject to their cooldown.
//!
//! Recruitments by the same user in the same channel are serialized, so the
//! cooldown check and the cooldown write cannot interleave. A batch whose
//! cooldown could not be persisted goes back to the queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connections::RecruiterStore;
use crate::core::cooldown::{check_eligible, CooldownPolicy};
use crate::core::event::{canonicalize, ConsumerId, Entry};
use crate::core::queue_manager::QueueManager;
use crate::error::RecruitError;
use crate::retrieve::NsClient;

/// Default number of nations handed out per recruitment.
pub const DEFAULT_BATCH: usize = 8;

/// A user registered to recruit in one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recruiter {
    pub user_id: u64,
    pub consumer: ConsumerId,
    pub nation: String,
    pub founded_at: DateTime<Utc>,
    pub next_recruitment_at: DateTime<Utc>,
}

/// Result of a successful recruitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecruitOutcome {
    pub entries: Vec<Entry>,
    pub cooldown: Duration,
    pub next_recruitment_at: DateTime<Utc>,
}

pub struct RecruitmentDesk {
    queues: Arc<QueueManager>,
    recruiters: Arc<dyn RecruiterStore>,
    client: Arc<NsClient>,
    policy: CooldownPolicy,
    in_flight: Mutex<HashMap<(u64, ConsumerId), Arc<tokio::sync::Mutex<()>>>>,
}

impl RecruitmentDesk {
    pub fn new(
        queues: Arc<QueueManager>,
        recruiters: Arc<dyn RecruiterStore>,
        client: Arc<NsClient>,
        policy: CooldownPolicy,
    ) -> Self {
        Self {
            queues,
            recruiters,
            client,
            policy,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn recruiter_lock(&self, user_id: u64, consumer: ConsumerId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // entries nobody else holds are dropped as we go
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry((user_id, consumer)).or_default())
    }

    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }

    /// # Register Recruiter
    ///
    /// Looks up the founding time of `nation` and stores the recruiter. A
    /// re-registration keeps the pending cooldown.
    ///
    /// # Errors
    /// - [`RecruitError::UnknownConsumer`] if the channel is not registered.
    /// - [`RecruitError::NationNotFound`] if the API has no such nation.
    /// - `Request`/`Storage` failures from the lookup or the write.
    pub async fn register_recruiter(
        &self,
        user_id: u64,
        consumer: ConsumerId,
        nation: &str,
    ) -> Result<Recruiter, RecruitError> {
        self.queues.queue_size(consumer)?;

        let nation = canonicalize(nation);
        let founded_at = self
            .client
            .nation_founded_at(&nation)
            .await?
            .ok_or_else(|| RecruitError::NationNotFound(nation.clone()))?;

        let next_recruitment_at = self
            .recruiters
            .find_recruiter(user_id, consumer)
            .await?
            .map(|r| r.next_recruitment_at)
            .unwrap_or_else(Utc::now);

        let recruiter = Recruiter {
            user_id,
            consumer,
            nation,
            founded_at,
            next_recruitment_at,
        };
        self.recruiters.upsert_recruiter(&recruiter).await?;

        log::info!(
            "User {} registered {} (founded {}) in channel {}",
            user_id,
            recruiter.nation,
            founded_at,
            consumer
        );
        Ok(recruiter)
    }

    /// # Recruit
    ///
    /// Hands out up to `count` nations and starts the recruiter's cooldown.
    /// The cooldown is charged for the entries actually returned.
    pub async fn recruit(&self, user_id: u64, consumer: ConsumerId, count: usize) -> Result<RecruitOutcome, RecruitError> {
        self.recruit_at(user_id, consumer, count, Utc::now()).await
    }

    pub(crate) async fn recruit_at(
        &self,
        user_id: u64,
        consumer: ConsumerId,
        count: usize,
        now: DateTime<Utc>,
    ) -> Result<RecruitOutcome, RecruitError> {
        let lock = self.recruiter_lock(user_id, consumer);
        let _guard = lock.lock().await;

        let recruiter = self
            .recruiters
            .find_recruiter(user_id, consumer)
            .await?
            .ok_or(RecruitError::NotRegistered { user: user_id, consumer })?;

        check_eligible(recruiter.next_recruitment_at, now)?;

        let entries = self.queues.dequeue_for(consumer, count)?;
        let (next_recruitment_at, cooldown) = self.policy.next_eligible_at(recruiter.founded_at, entries.len(), now);

        if let Err(e) = self
            .recruiters
            .set_next_recruitment_at(user_id, consumer, next_recruitment_at)
            .await
        {
            log::error!("Failed to store cooldown for user {} in channel {}: {}", user_id, consumer, e);
            self.give_back(consumer, entries);
            return Err(e.into());
        }
        if let Err(e) = self.recruiters.record_telegrams(user_id, consumer, entries.len()).await {
            log::error!("Failed to record telegrams for user {} in channel {}: {}", user_id, consumer, e);
            if let Err(undo) = self
                .recruiters
                .set_next_recruitment_at(user_id, consumer, recruiter.next_recruitment_at)
                .await
            {
                log::warn!("Could not restore cooldown for user {}: {}", user_id, undo);
            }
            self.give_back(consumer, entries);
            return Err(e.into());
        }

        log::info!(
            "{} took {} nations from channel {}; next allowed in {}s",
            recruiter.nation,
            entries.len(),
            consumer,
            cooldown.as_secs()
        );
        Ok(RecruitOutcome {
            entries,
            cooldown,
            next_recruitment_at,
        })
    }

    fn give_back(&self, consumer: ConsumerId, entries: Vec<Entry>) {
        let taken = entries.len();
        match self.queues.requeue(consumer, entries) {
            Ok(restored) => log::info!("Returned {} of {} nations to channel {}", restored, taken, consumer),
            Err(e) => log::warn!("Could not return {} nations to channel {}: {}", taken, consumer, e),
        }
    }
}
