//! # lib_recruit
//!
//! Engine behind the recruitment server. It listens to the NationStates
//! happenings feed, keeps one queue of freshly founded nations per registered
//! channel, and throttles both the upstream API usage and how often a
//! recruiter may drain a queue.
//!
//! The layout mirrors the data flow:
//!
//! - **`ingestors`**: the SSE happenings consumer and the `newnationdetails` poller.
//! - **`core`**: event classification, queues, the queue manager, cooldowns and
//!   the recruitment flow that ties them together.
//! - **`retrieve`**: the rate-limited API client.
//! - **`connections`**: storage traits and their Postgres / in-memory backends.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod connections;
pub mod core;
pub mod error;
pub mod ingestors;
pub mod retrieve;

// Re-export the types the server wires together.
pub use crate::core::{
    classify, is_likely_puppet, ConsumerId, CooldownPolicy, Entry, NationEvent, Queue,
    QueueManager, RecruitOutcome, Recruiter, RecruitmentDesk,
};
pub use crate::error::{RecruitError, RequestError, StorageError};
pub use crate::ingestors::{HappeningsConfig, HappeningsIngestor, NewNationsPoller, StreamState};
pub use crate::retrieve::{NsClient, RateLimiter, ShardDocument};
