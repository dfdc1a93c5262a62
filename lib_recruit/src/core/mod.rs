//! # Core Engine Module
//!
//! Everything between "a line of text arrived from the feed" and "a recruiter
//! received a batch of nations" lives here.
//!
//! ## Core Components:
//!
//! - **`event`**: the closed set of typed events and the `Entry` record that
//!   queues hold.
//! - **`classifier`**: turns raw happening text into a `NationEvent` and flags
//!   auto-generated puppet names.
//! - **`queue`**: a single channel's newest-first backlog with its own region
//!   whitelist and retention window.
//! - **`queue_manager`**: owns every queue, the global whitelist, and the
//!   storage-backed whitelist mutations. It is the only shared mutable state
//!   between the stream task and request handling.
//! - **`cooldown`**: the age-based throttle on how often a recruiter may dequeue.
//! - **`recruitment`**: the registration and recruit flow built on the above.

/// Fixed-grammar parsing of happening text and puppet detection.
pub mod classifier;
/// Age-decaying per-entry cooldown.
pub mod cooldown;
/// Typed events and queue entries.
pub mod event;
/// A single channel's backlog.
pub mod queue;
/// Owner of all queues and whitelists.
pub mod queue_manager;
/// Recruiter registration and the recruit flow.
pub mod recruitment;

// --- Public API Re-exports ---
pub use classifier::{classify, is_likely_puppet};
pub use cooldown::CooldownPolicy;
pub use event::{canonicalize, ConsumerId, Entry, NationEvent};
pub use queue::Queue;
pub use queue_manager::QueueManager;
pub use recruitment::{RecruitOutcome, Recruiter, RecruitmentDesk};
