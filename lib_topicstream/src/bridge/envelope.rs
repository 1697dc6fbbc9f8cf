//! Envelopes emitted by the `StreamAdapter` and the sink they are emitted to.
//!
//! Serialized shapes:
//!
//! ```text
//! {"type":"data","data":{"payload":{"type":"topicChange","subscriptionId":"7","topics":[{"topic":"a","data":"1"}]}}}
//! {"type":"log","data":{"message":"CPD stream 7 ended","type":"info"}}
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::bridge::proto::TopicData;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Envelope {
    Data(DataEvent),
    Log(LogEvent),
}

impl Envelope {
    pub fn topic_change(subscription_id: &str, topics: Vec<TopicData>) -> Self {
        Envelope::Data(DataEvent {
            payload: Payload::TopicChange {
                subscription_id: subscription_id.to_string(),
                topics,
            },
        })
    }

    pub fn info(message: impl Into<String>) -> Self {
        Envelope::Log(LogEvent {
            message: message.into(),
            level: LogLevel::Info,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Log(LogEvent {
            message: message.into(),
            level: LogLevel::Error,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEvent {
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Payload {
    TopicChange {
        #[serde(rename = "subscriptionId")]
        subscription_id: String,
        topics: Vec<TopicData>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub message: String,
    #[serde(rename = "type")]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

/// Destination of adapter envelopes. Must not block.
pub trait OutputSink: Send + Sync {
    fn emit(&self, envelope: Envelope);
}

pub type SharedSink = Arc<dyn OutputSink>;

impl OutputSink for mpsc::UnboundedSender<Envelope> {
    fn emit(&self, envelope: Envelope) {
        if self.send(envelope).is_err() {
            log::debug!("Envelope dropped: receiver closed");
        }
    }
}

impl OutputSink for broadcast::Sender<Envelope> {
    fn emit(&self, envelope: Envelope) {
        // No receivers is not an error for a broadcast.
        let _ = self.send(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_change_shape() {
        let envelope = Envelope::topic_change(
            "7",
            vec![TopicData {
                topic: "sw.a".into(),
                data: "1".into(),
            }],
        );
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "type": "data",
                "data": {"payload": {
                    "type": "topicChange",
                    "subscriptionId": "7",
                    "topics": [{"topic": "sw.a", "data": "1"}]
                }}
            })
        );
    }

    #[test]
    fn test_log_shape() {
        assert_eq!(
            serde_json::to_value(Envelope::error("boom")).unwrap(),
            json!({"type": "log", "data": {"message": "boom", "type": "error"}})
        );
    }

    #[tokio::test]
    async fn test_mpsc_sink_forwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: SharedSink = Arc::new(tx);
        sink.emit(Envelope::info("hello"));
        assert_eq!(rx.recv().await, Some(Envelope::info("hello")));
    }
}
