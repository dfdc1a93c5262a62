//! # Connections Module
//!
//! Persistent state lives outside the process: registered channels with their
//! whitelists, the global whitelist, and recruiter rows. The engine only sees
//! the two narrow traits below; backends decide the schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::{ConsumerId, Recruiter};
use crate::error::StorageError;

/// In-memory backend for tests and database-less runs.
pub mod memory;

/// PostgreSQL backend on a `deadpool_postgres` pool.
#[cfg(feature = "postgres")]
pub mod db_postgres;

pub use memory::MemoryStore;

#[cfg(feature = "postgres")]
pub use db_postgres::PgStore;

/// A registered channel as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    pub id: ConsumerId,
    pub whitelist: Vec<String>,
}

/// Channel registrations and whitelist rows.
///
/// Membership must round-trip exactly: whatever regions were written for a
/// channel are the regions `load_consumers` returns for it.
#[async_trait]
pub trait WhitelistStore: Send + Sync {
    async fn load_consumers(&self) -> Result<Vec<ConsumerRecord>, StorageError>;
    async fn load_global_whitelist(&self) -> Result<Vec<String>, StorageError>;

    async fn insert_consumer(&self, id: ConsumerId, whitelist: &[String]) -> Result<(), StorageError>;
    async fn delete_consumer(&self, id: ConsumerId) -> Result<(), StorageError>;

    async fn insert_consumer_region(&self, id: ConsumerId, region: &str) -> Result<(), StorageError>;
    async fn delete_consumer_region(&self, id: ConsumerId, region: &str) -> Result<(), StorageError>;

    async fn insert_global_region(&self, region: &str) -> Result<(), StorageError>;
    async fn delete_global_region(&self, region: &str) -> Result<(), StorageError>;
}

/// Recruiter registrations and their cooldown state.
#[async_trait]
pub trait RecruiterStore: Send + Sync {
    async fn find_recruiter(&self, user_id: u64, consumer: ConsumerId) -> Result<Option<Recruiter>, StorageError>;
    async fn upsert_recruiter(&self, recruiter: &Recruiter) -> Result<(), StorageError>;
    async fn set_next_recruitment_at(
        &self,
        user_id: u64,
        consumer: ConsumerId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    /// Appends one row to the telegram log used for activity reports.
    async fn record_telegrams(&self, user_id: u64, consumer: ConsumerId, count: usize) -> Result<(), StorageError>;
}
