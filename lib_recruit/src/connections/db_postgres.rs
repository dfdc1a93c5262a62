//! # PostgreSQL Store
//!
//! Both storage traits over a `deadpool_postgres` pool. Ids are stored as
//! `BIGINT`; timestamps as `TIMESTAMPTZ`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use super::{ConsumerRecord, RecruiterStore, WhitelistStore};
use crate::core::{ConsumerId, Recruiter};
use crate::error::StorageError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS recruitment_channels (
    channel_id  BIGINT PRIMARY KEY,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE IF NOT EXISTS exceptions (
    channel_id  BIGINT NOT NULL REFERENCES recruitment_channels(channel_id) ON DELETE CASCADE,
    region      TEXT NOT NULL,
    PRIMARY KEY (channel_id, region)
);
CREATE TABLE IF NOT EXISTS global_exceptions (
    region      TEXT PRIMARY KEY
);
CREATE TABLE IF NOT EXISTS recruiters (
    user_id             BIGINT NOT NULL,
    channel_id          BIGINT NOT NULL REFERENCES recruitment_channels(channel_id) ON DELETE CASCADE,
    nation              TEXT NOT NULL,
    founded_at          TIMESTAMPTZ NOT NULL,
    next_recruitment_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (user_id, channel_id)
);
CREATE TABLE IF NOT EXISTS telegrams (
    id           BIGSERIAL PRIMARY KEY,
    user_id      BIGINT NOT NULL,
    channel_id   BIGINT NOT NULL,
    nation_count INTEGER NOT NULL,
    sent_at      TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Builds a pool for `database_url`. No connection is made until first use.
    pub fn connect(database_url: &str) -> Result<Self, StorageError> {
        let mut pg_pool_config = DeadpoolConfig::new();
        pg_pool_config.url = Some(database_url.to_string());
        pg_pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = pg_pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::ConnectionError(format!("Failed to create database pool: {}", e)))?;
        Ok(Self { pool })
    }

    /// Creates the tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        log::info!("Database schema is up to date.");
        Ok(())
    }

    /// Checks the health of the database connection by running a simple query.
    pub async fn ping(&self) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

fn db_id(id: u64) -> i64 {
    id as i64
}

#[async_trait]
impl WhitelistStore for PgStore {
    async fn load_consumers(&self) -> Result<Vec<ConsumerRecord>, StorageError> {
        let client = self.pool.get().await?;
        let mut consumers: BTreeMap<i64, Vec<String>> = client
            .query("SELECT channel_id FROM recruitment_channels", &[])
            .await?
            .iter()
            .map(|row| (row.get::<_, i64>(0), Vec::new()))
            .collect();

        for row in client.query("SELECT channel_id, region FROM exceptions", &[]).await? {
            if let Some(regions) = consumers.get_mut(&row.get::<_, i64>(0)) {
                regions.push(row.get(1));
            }
        }

        Ok(consumers
            .into_iter()
            .map(|(id, whitelist)| ConsumerRecord {
                id: id as ConsumerId,
                whitelist,
            })
            .collect())
    }

    async fn load_global_whitelist(&self) -> Result<Vec<String>, StorageError> {
        let client = self.pool.get().await?;
        let rows = client.query("SELECT region FROM global_exceptions", &[]).await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn insert_consumer(&self, id: ConsumerId, whitelist: &[String]) -> Result<(), StorageError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let inserted = tx
            .execute(
                "INSERT INTO recruitment_channels (channel_id) VALUES ($1) ON CONFLICT DO NOTHING",
                &[&db_id(id)],
            )
            .await?;
        if inserted == 0 {
            return Err(StorageError::Rejected(format!("channel {} already registered", id)));
        }
        for region in whitelist {
            tx.execute(
                "INSERT INTO exceptions (channel_id, region) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&db_id(id), region],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_consumer(&self, id: ConsumerId) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM recruitment_channels WHERE channel_id = $1", &[&db_id(id)])
            .await?;
        Ok(())
    }

    async fn insert_consumer_region(&self, id: ConsumerId, region: &str) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO exceptions (channel_id, region) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&db_id(id), &region],
            )
            .await?;
        Ok(())
    }

    async fn delete_consumer_region(&self, id: ConsumerId, region: &str) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM exceptions WHERE channel_id = $1 AND region = $2",
                &[&db_id(id), &region],
            )
            .await?;
        Ok(())
    }

    async fn insert_global_region(&self, region: &str) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO global_exceptions (region) VALUES ($1) ON CONFLICT DO NOTHING",
                &[&region],
            )
            .await?;
        Ok(())
    }

    async fn delete_global_region(&self, region: &str) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM global_exceptions WHERE region = $1", &[&region])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RecruiterStore for PgStore {
    async fn find_recruiter(&self, user_id: u64, consumer: ConsumerId) -> Result<Option<Recruiter>, StorageError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT nation, founded_at, next_recruitment_at FROM recruiters \
                 WHERE user_id = $1 AND channel_id = $2",
                &[&db_id(user_id), &db_id(consumer)],
            )
            .await?;

        Ok(row.map(|row| Recruiter {
            user_id,
            consumer,
            nation: row.get(0),
            founded_at: row.get(1),
            next_recruitment_at: row.get(2),
        }))
    }

    async fn upsert_recruiter(&self, recruiter: &Recruiter) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO recruiters (user_id, channel_id, nation, founded_at, next_recruitment_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (user_id, channel_id) DO UPDATE SET \
                 nation = EXCLUDED.nation, founded_at = EXCLUDED.founded_at, \
                 next_recruitment_at = EXCLUDED.next_recruitment_at",
                &[
                    &db_id(recruiter.user_id),
                    &db_id(recruiter.consumer),
                    &recruiter.nation,
                    &recruiter.founded_at,
                    &recruiter.next_recruitment_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn set_next_recruitment_at(
        &self,
        user_id: u64,
        consumer: ConsumerId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE recruiters SET next_recruitment_at = $3 WHERE user_id = $1 AND channel_id = $2",
                &[&db_id(user_id), &db_id(consumer), &at],
            )
            .await?;
        if updated == 0 {
            return Err(StorageError::Rejected(format!(
                "no recruiter {} in channel {}",
                user_id, consumer
            )));
        }
        Ok(())
    }

    async fn record_telegrams(&self, user_id: u64, consumer: ConsumerId, count: usize) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        let count = i32::try_from(count).unwrap_or(i32::MAX);
        client
            .execute(
                "INSERT INTO telegrams (user_id, channel_id, nation_count) VALUES ($1, $2, $3)",
                &[&db_id(user_id), &db_id(consumer), &count],
            )
            .await?;
        Ok(())
    }
}
