//! # Data Ingestors Module
//!
//! Sources of new nations. Both ingestors turn upstream data into
//! `NationEvent`s and hand them to the `QueueManager`; neither holds queue
//! state of its own.
//!
//! ## Contained Modules:
//! - **`happenings_sse`**: the resumable server-sent happenings stream.
//! - **`newnations_polling`**: a self-scheduling poller of the
//!   `newnationdetails` shard.
//! - **`sse`**: the `text/event-stream` decoder used by the stream.

/// Resumable SSE consumer of founding and move happenings.
pub mod happenings_sse;
/// Periodic `newnationdetails` lookup.
pub mod newnations_polling;
/// Incremental event-stream decoder.
pub mod sse;

// --- Public API Re-exports ---
pub use happenings_sse::{HappeningsConfig, HappeningsIngestor, StreamState};
pub use newnations_polling::NewNationsPoller;
pub use sse::{SseDecoder, SseRecord};
