use lib_topicstream::bridge::proto::{FilterDef, SubsConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Client request frame: `{method, parameter, id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireRequest {
    pub method: String,
    #[serde(default)]
    pub parameter: Value,
    pub id: u64,
}

/// Server frame: `{id, result}`. Subscription deltas and call replies share it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireResponse {
    pub id: u64,
    pub result: Value,
}

impl WireResponse {
    pub fn success(id: u64, mut fields: Value) -> Self {
        if let Value::Object(map) = &mut fields {
            map.insert("success".to_string(), Value::Bool(true));
        } else {
            fields = json!({ "success": true });
        }
        Self { id, result: fields }
    }

    pub fn failure(id: u64, error: impl ToString) -> Self {
        Self {
            id,
            result: json!({ "success": false, "error": error.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeParams {
    pub filter: String,
    #[serde(default)]
    pub subsconfig: Option<SubsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimpleSubscribeParams {
    pub topicpattern: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsubscribeParams {
    #[serde(rename = "jobId")]
    pub job_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingParams {
    #[serde(default = "default_ping")]
    pub msg: String,
}

fn default_ping() -> String {
    "ping".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LatestDataParams {
    pub topic_patterns: Option<Vec<String>>,
    pub filter_def: Option<FilterDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishParams {
    pub topic: String,
    #[serde(default)]
    pub data: Value,
}

/// Decodes a request parameter; a missing parameter reads as `{}`.
pub fn params<T: DeserializeOwned>(parameter: Value) -> serde_json::Result<T> {
    match parameter {
        Value::Null => serde_json::from_value(json!({})),
        other => serde_json::from_value(other),
    }
}
