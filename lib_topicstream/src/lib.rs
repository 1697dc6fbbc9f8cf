//! # lib_topicstream
//!
//! Real-time topic subscription pipeline shared by the `servers` and `cli`
//! crates.
//!
//! ## Modules:
//!
//! - **`matcher`**: hierarchical topic filter matching (`+`/`*` and `#`).
//! - **`client`** (feature `client`): the multiplexed WebSocket transport, the
//!   subscription registry with its latest-value cache, and the update
//!   scheduler that coalesces change notifications.
//! - **`bridge`** (feature `bridge`): the `StreamAdapter` that maps the CPD
//!   streaming gRPC service onto the same subscription model and emits
//!   envelopes to an injected output sink.
//! - **`error`**: the crate-wide `TopicStreamError`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod matcher;

#[cfg(feature = "client")]
pub mod client;

#[cfg(feature = "bridge")]
pub mod bridge;

// --- Public API Re-exports ---
pub use error::{Result, TopicStreamError};
pub use matcher::matches;
