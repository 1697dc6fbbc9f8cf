//! # Client Engine Module
//!
//! The client half of the topic pipeline. A caller subscribes through the
//! `SubscriptionRegistry`, which sends requests over the shared `Multiplexer`
//! connection. Responses are dispatched back by job id into the registry's
//! topic cache, and every change pokes the `UpdateScheduler`, which turns
//! bursts of changes into a bounded number of flushes.
//!
//! ## Core Components:
//!
//! - **`multiplexer`**: one persistent WebSocket carrying many correlated
//!   requests and subscriptions, with connectivity events and auto-reconnect.
//! - **`registry`**: active subscriptions, the ordered topic list and the
//!   latest-payload cache with tombstone handling.
//! - **`scheduler`**: the dual-timer coalescing scheduler.
//! - **`deferred`**: the cancellable delayed task both scheduler timers use.

/// Cancellable delayed tasks on the tokio timer.
pub mod deferred;
/// Request/response correlation over one WebSocket connection.
pub mod multiplexer;
/// Subscriptions, ordered topic list and latest-value cache.
pub mod registry;
/// Burst-coalescing flush scheduler.
pub mod scheduler;

// --- Public API Re-exports ---
pub use deferred::Deferred;
pub use multiplexer::{
    ConnectionEvent, JobCallback, JobId, Multiplexer, MultiplexerConfig, RequestTransport,
};
pub use registry::{DataCallback, SubscriptionRegistry, TOPICS_PER_PAGE};
pub use scheduler::{SchedulerConfig, UpdateScheduler};
