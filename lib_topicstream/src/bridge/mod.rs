//! # CPD Bridge Module
//!
//! Server-side peer of the client engine: maps the CPD streaming gRPC service
//! onto subscribe/unsubscribe/topic operations and forwards stream deltas as
//! envelopes to an injected sink.
//!
//! ## Core Components:
//!
//! - **`adapter`**: the `StreamAdapter`, one per logical CPD connection.
//! - **`rpc`**: the `CpdRpc` seam and its tonic implementation.
//! - **`proto`**: hand-written `prost` messages of the service.
//! - **`envelope`**: envelope types and the `OutputSink` trait.

pub mod adapter;
pub mod envelope;
pub mod proto;
pub mod rpc;

// --- Public API Re-exports ---
pub use adapter::{LatestDataQuery, StreamAdapter};
pub use envelope::{Envelope, LogLevel, OutputSink, Payload, SharedSink};
pub use rpc::{CpdConnector, CpdRpc, PublishMethod, SubscriptionStream, TonicConnector, TonicCpdClient};
