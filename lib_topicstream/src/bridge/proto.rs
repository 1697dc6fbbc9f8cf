//! # CPD Protobuf Messages
//!
//! Rust representations of the `core.cpd_adapter.cpd` service messages,
//! written by hand with `prost` so no `protoc` run is needed at build time.
//! The schema is kept in `proto/cpd.proto` for reference.
//!
//! Every message also derives `serde`, using the service's camelCase field
//! names, so the bridge server can map wire parameters straight onto them.

use prost::Message;
use serde::{Deserialize, Serialize};

/// Default pattern of `browseTopicNames`.
pub const DEFAULT_BROWSE_PATTERN: &str = "sw.*";
/// Default result limit of `browseTopicNames`.
pub const DEFAULT_BROWSE_LIMIT: i32 = 100;

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default)]
pub struct PingRequest {
    #[prost(string, tag = "1")]
    pub msg: String,
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default)]
pub struct PingReply {
    #[prost(string, tag = "1")]
    pub msg: String,
}

/// Query of `browseTopicNames`.
///
/// Deserializing an empty object yields the service defaults (`sw.*`, 100),
/// unlike `prost`'s zeroed `Default`.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseTopicNamesRequest {
    #[prost(string, tag = "1")]
    #[serde(default = "default_browse_pattern")]
    pub topic_pattern: String,

    /// Maximum number of names returned.
    #[prost(int32, tag = "2")]
    #[serde(default = "default_browse_limit")]
    pub limit: i32,

    /// Name to start browsing from, for paging through large namespaces.
    #[prost(string, tag = "3")]
    #[serde(default)]
    pub begin_topic_name: String,

    #[prost(bool, tag = "4")]
    #[serde(default)]
    pub reverse: bool,
}

fn default_browse_pattern() -> String {
    DEFAULT_BROWSE_PATTERN.to_string()
}

fn default_browse_limit() -> i32 {
    DEFAULT_BROWSE_LIMIT
}

impl BrowseTopicNamesRequest {
    /// A query with the service defaults.
    pub fn with_defaults() -> Self {
        Self {
            topic_pattern: default_browse_pattern(),
            limit: DEFAULT_BROWSE_LIMIT,
            begin_topic_name: String::new(),
            reverse: false,
        }
    }
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrowseTopicNamesReply {
    #[prost(string, repeated, tag = "1")]
    pub topic_names: Vec<String>,
}

/// One topic and its current payload.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicData {
    #[prost(string, tag = "1")]
    pub topic: String,

    #[prost(string, tag = "2")]
    pub data: String,
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleGetLatestDataRequest {
    #[prost(string, repeated, tag = "1")]
    pub topicpattern: Vec<String>,
}

/// Structured topic selection: include patterns minus exclude patterns.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterDef {
    #[prost(string, repeated, tag = "1")]
    pub topicpattern: Vec<String>,

    #[prost(string, repeated, tag = "2")]
    pub excludepattern: Vec<String>,
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetLatestDataRequest {
    #[prost(message, optional, tag = "1")]
    pub filter_def: Option<FilterDef>,
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LatestDataReply {
    #[prost(message, repeated, tag = "1")]
    pub topic_data: Vec<TopicData>,
}

/// Delivery options of a structured subscription.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubsConfig {
    /// Minimum spacing between two deliveries of the same topic.
    #[prost(uint32, tag = "1")]
    pub min_interval_ms: u32,

    /// Deliver the current values right after subscribing.
    #[prost(bool, tag = "2")]
    pub send_initial: bool,
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleSubscribeRequest {
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(string, repeated, tag = "2")]
    pub topicpattern: Vec<String>,
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubscribeRequest {
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(message, optional, tag = "2")]
    pub filter_def: Option<FilterDef>,

    #[prost(message, optional, tag = "3")]
    pub subs_config: Option<SubsConfig>,
}

/// One delta of a subscription stream.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubscribeReply {
    #[prost(message, repeated, tag = "1")]
    pub topic_data: Vec<TopicData>,
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default)]
pub struct UnsubscribeRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

/// Payload of every publish-family call. `data` is always text on the wire.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishRequest {
    #[prost(string, tag = "1")]
    pub topic: String,

    #[prost(string, tag = "2")]
    pub data: String,
}

/// Empty acknowledgement.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct Ack {}
