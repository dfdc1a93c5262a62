//! Error types shared across the crate.

use std::time::Duration;

use thiserror::Error;

use crate::core::ConsumerId;

/// Failures reported by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to get a database connection: {0}")]
    ConnectionError(String),
    #[error("Query execution failed: {0}")]
    QueryError(String),
    #[error("Storage rejected the write: {0}")]
    Rejected(String),
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StorageError {
    fn from(e: tokio_postgres::Error) -> Self {
        StorageError::QueryError(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for StorageError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StorageError::ConnectionError(e.to_string())
    }
}

/// Failures of the rate-limited API client.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The local window or the server bucket is exhausted. Nothing was sent.
    #[error("Too many requests; resets in {:.2} seconds", retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    #[error("Upstream returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Everything the consumer-facing operations can fail with.
#[derive(Debug, Error)]
pub enum RecruitError {
    #[error("Recruitment queue is empty")]
    EmptyQueue,

    #[error("Last recruitment was too recent; resets in {:.2} seconds", retry_after.as_secs_f64())]
    TooSoon { retry_after: Duration },

    #[error("Channel {0} is not registered for recruitment")]
    UnknownConsumer(ConsumerId),

    #[error("Channel {0} is already registered")]
    ConsumerExists(ConsumerId),

    #[error("User {user} has not registered as a recruiter in channel {consumer}")]
    NotRegistered { user: u64, consumer: ConsumerId },

    #[error("{0} does not exist")]
    NationNotFound(String),

    #[error("Region name cannot be empty")]
    EmptyRegion,

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RecruitError {
    /// The advisory wait attached to throttling errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RecruitError::TooSoon { retry_after }
            | RecruitError::Request(RequestError::RateLimited { retry_after }) => Some(*retry_after),
            _ => None,
        }
    }
}
