//! # Subscription Registry
//!
//! Tracks the active subscriptions of one client, a deduplicated and ordered
//! list of every topic seen, and the latest payload per topic.
//!
//! ## Topic ordering
//! The topic list is kept sorted by string length, then lexicographically, so
//! shallow topics come first in paged views.
//!
//! ## Tombstones
//! A payload that is `null`, `""` or the literal string `"null"` means the
//! topic was decommissioned: it is removed from the list and the cache. The
//! subscriber's own callback still sees the tombstone.
//!
//! ## Staleness
//! Every cached topic carries a counter that `tick()` increments and a new
//! payload resets, letting a polling caller tell how long data has been stable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::multiplexer::{JobCallback, JobId, RequestTransport};
use crate::error::{Result, TopicStreamError};
use crate::matcher;

/// Page size of `get_topic_paged`.
pub const TOPICS_PER_PAGE: usize = 14;

/// Per-subscription callback. `None` is a null tombstone.
pub type DataCallback = Arc<dyn Fn(Option<&str>) + Send + Sync>;

/// Global "something changed" callback, typically `UpdateScheduler::update`.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Delivery payload of a subscription job.
#[derive(Debug, Clone, Deserialize)]
struct TopicUpdate {
    topic: String,
    #[serde(default)]
    data: Value,
}

struct Subscription {
    filter: String,
    config: Value,
    on_data: Option<DataCallback>,
}

struct TopicEntry {
    payload: String,
    stale_ticks: u64,
}

#[derive(Default)]
struct RegistryState {
    subs: HashMap<JobId, Subscription>,
    topics: Vec<String>,
    cache: HashMap<String, TopicEntry>,
}

impl RegistryState {
    fn upsert_topic(&mut self, topic: &str, payload: String) {
        if let Err(pos) = self.topics.binary_search_by(|t| topic_order(t, topic)) {
            self.topics.insert(pos, topic.to_string());
        }
        self.cache.insert(
            topic.to_string(),
            TopicEntry {
                payload,
                stale_ticks: 0,
            },
        );
    }

    fn remove_topic(&mut self, topic: &str) {
        if let Ok(pos) = self.topics.binary_search_by(|t| topic_order(t, topic)) {
            self.topics.remove(pos);
        }
        self.cache.remove(topic);
    }
}

/// Length first, then lexicographic.
fn topic_order(a: &str, b: &str) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// True for the payloads that decommission a topic.
pub fn is_tombstone(data: Option<&str>) -> bool {
    matches!(data, None | Some("") | Some("null"))
}

fn payload_text(data: Value) -> Option<String> {
    match data {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

struct RegistryInner {
    transport: Arc<dyn RequestTransport>,
    state: Mutex<RegistryState>,
    on_any_data: Mutex<Option<ChangeCallback>>,
}

impl RegistryInner {
    fn on_job_data(&self, job_id: JobId, result: Value) {
        let update: TopicUpdate = match serde_json::from_value(result) {
            Ok(update) => update,
            Err(e) => {
                log::warn!(
                    "{}",
                    TopicStreamError::MalformedMessage(format!("job {}: {}", job_id, e))
                );
                return;
            }
        };

        let data = payload_text(update.data);
        let tombstone = is_tombstone(data.as_deref());

        let on_data = {
            let mut state = self.state.lock().expect("Registry lock poisoned");
            match (&data, tombstone) {
                (Some(payload), false) => state.upsert_topic(&update.topic, payload.clone()),
                _ => {
                    log::info!("Decommissioned, removed topic={}", update.topic);
                    state.remove_topic(&update.topic);
                }
            }
            state.subs.get(&job_id).and_then(|s| s.on_data.clone())
        };

        if let Some(cb) = on_data {
            cb(data.as_deref());
        }

        let changed = self
            .on_any_data
            .lock()
            .expect("Registry lock poisoned")
            .clone();
        if let Some(cb) = changed {
            cb();
        }
    }
}

/// Subscription bookkeeping and topic cache for one client connection.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new(transport: Arc<dyn RequestTransport>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                state: Mutex::new(RegistryState::default()),
                on_any_data: Mutex::new(None),
            }),
        }
    }

    /// Registers the single global change callback, replacing any previous one.
    pub fn set_on_any_data<F>(&self, cb: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.on_any_data.lock().expect("Registry lock poisoned") = Some(Arc::new(cb));
    }

    /// Subscribes to `filter`. An empty filter is a no-op returning `Ok(None)`.
    ///
    /// # Errors
    /// Returns `TransportDisconnected` when the socket is not open.
    pub fn add_subscription(
        &self,
        filter: &str,
        config: Value,
        on_data: Option<DataCallback>,
    ) -> Result<Option<JobId>> {
        if filter.is_empty() {
            return Ok(None);
        }

        // Held across the send so an immediate response cannot miss the entry.
        let mut state = self.inner.state.lock().expect("Registry lock poisoned");
        let job_id = self.send_subscribe(filter, &config)?;
        state.subs.insert(
            job_id,
            Subscription {
                filter: filter.to_string(),
                config,
                on_data,
            },
        );
        log::debug!("Subscribed filter={} as job {}", filter, job_id);
        Ok(Some(job_id))
    }

    /// Removes a subscription locally, tells the remote side, and forgets its job.
    ///
    /// Local cleanup happens whatever the outcome of the unsubscribe send.
    pub fn remove_subscription(&self, job_id: JobId) {
        self.inner
            .state
            .lock()
            .expect("Registry lock poisoned")
            .subs
            .remove(&job_id);

        if let Err(e) =
            self.inner
                .transport
                .send_request("unsubscribe", json!({ "jobId": job_id }), None)
        {
            log::warn!("Unsubscribe for job {} not sent: {}", job_id, e);
        }
        self.inner.transport.clear_task_job(job_id);
    }

    /// Removes every subscription and empties the topic list and cache.
    pub fn remove_all_subscriptions(&self) {
        for job_id in self.subscription_ids() {
            self.remove_subscription(job_id);
        }
        let mut state = self.inner.state.lock().expect("Registry lock poisoned");
        state.topics.clear();
        state.cache.clear();
    }

    /// Re-issues every stored subscription under a fresh job id, e.g. after
    /// the transport reconnected. Returns the `old -> new` id mapping.
    ///
    /// Subscriptions that could not be re-sent keep their old id.
    pub fn resubscribe_all(&self) -> Result<HashMap<JobId, JobId>> {
        let mut state = self.inner.state.lock().expect("Registry lock poisoned");
        let mut remapped = HashMap::new();
        let mut first_error = None;

        let old: Vec<(JobId, Subscription)> = state.subs.drain().collect();
        for (old_id, sub) in old {
            self.inner.transport.clear_task_job(old_id);
            match self.send_subscribe(&sub.filter, &sub.config) {
                Ok(new_id) => {
                    remapped.insert(old_id, new_id);
                    state.subs.insert(new_id, sub);
                }
                Err(e) => {
                    state.subs.insert(old_id, sub);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(remapped),
        }
    }

    /// Applies one delivery `{topic, data}` for `job_id`.
    pub fn on_job_data(&self, job_id: JobId, result: Value) {
        self.inner.on_job_data(job_id, result);
    }

    /// One page of `TOPICS_PER_PAGE` topics, in list order.
    pub fn get_topic_paged(&self, page_index: usize) -> Vec<String> {
        let state = self.inner.state.lock().expect("Registry lock poisoned");
        state
            .topics
            .iter()
            .skip(page_index.saturating_mul(TOPICS_PER_PAGE))
            .take(TOPICS_PER_PAGE)
            .cloned()
            .collect()
    }

    pub fn get_topic_data(&self, topic: &str) -> Option<String> {
        let state = self.inner.state.lock().expect("Registry lock poisoned");
        state.cache.get(topic).map(|entry| entry.payload.clone())
    }

    /// Ages every topic by one tick and returns the smallest counter afterwards.
    pub fn tick(&self) -> Option<u64> {
        let mut state = self.inner.state.lock().expect("Registry lock poisoned");
        state
            .cache
            .values_mut()
            .map(|entry| {
                entry.stale_ticks += 1;
                entry.stale_ticks
            })
            .min()
    }

    /// Topics in list order that satisfy `filter`.
    pub fn topics_matching(&self, filter: &str, delimiter: &str) -> Vec<String> {
        let state = self.inner.state.lock().expect("Registry lock poisoned");
        state
            .topics
            .iter()
            .filter(|topic| matcher::matches(filter, topic, delimiter))
            .cloned()
            .collect()
    }

    pub fn topic_count(&self) -> usize {
        self.inner.state.lock().expect("Registry lock poisoned").topics.len()
    }

    pub fn page_count(&self) -> usize {
        self.topic_count().div_ceil(TOPICS_PER_PAGE)
    }

    /// Job ids of the active subscriptions, ascending.
    pub fn subscription_ids(&self) -> Vec<JobId> {
        let state = self.inner.state.lock().expect("Registry lock poisoned");
        let mut ids: Vec<JobId> = state.subs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn send_subscribe(&self, filter: &str, config: &Value) -> Result<JobId> {
        self.inner.transport.send_request(
            "subscribe",
            json!({ "filter": filter, "subsconfig": config }),
            Some(self.job_handler()),
        )
    }

    /// The transport holds this callback, so it only keeps a weak reference.
    fn job_handler(&self) -> JobCallback {
        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        Arc::new(move |job_id: JobId, result: Value| {
            if let Some(inner) = weak.upgrade() {
                inner.on_job_data(job_id, result);
            }
        })
    }
}
