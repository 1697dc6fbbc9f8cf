//! # Stream Adapter
//!
//! Bridges the CPD streaming gRPC service into the subscription model. Unary
//! calls are plain async methods returning the decoded reply. Subscriptions
//! open a server stream keyed by a caller-supplied id; each stream is pumped
//! by its own tokio task into the injected `OutputSink`:
//!
//! - every delta becomes a `topicChange` data envelope tagged with the id;
//! - a stream error becomes an `error` log envelope, the stream is dropped and
//!   never retried;
//! - the end of a stream becomes an `info` log envelope.
//!
//! Each stream has its own `CancellationToken`. Reusing a live id cancels the
//! previous stream before the new one is registered, and a generation number
//! keeps a finishing old pump from deregistering its replacement. A
//! connection epoch, bumped on every connect and disconnect, drops streams
//! whose subscribe call was still in flight when the connection changed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bridge::envelope::{Envelope, SharedSink};
use crate::bridge::proto::{
    BrowseTopicNamesReply, BrowseTopicNamesRequest, FilterDef, GetLatestDataRequest, PingReply,
    PingRequest, PublishRequest, SimpleGetLatestDataRequest, SimpleSubscribeRequest, SubsConfig,
    SubscribeRequest, TopicData, UnsubscribeRequest,
};
use crate::bridge::rpc::{CpdConnector, CpdRpc, PublishMethod, SubscriptionStream, TonicConnector};
use crate::error::{Result, TopicStreamError};

/// Selection for `get_latest_data`.
#[derive(Debug, Clone, PartialEq)]
pub enum LatestDataQuery {
    /// Flat pattern list, served by `simpleGetLatestData`.
    Patterns(Vec<String>),
    /// Structured filter, served by `getLatestData`.
    Filter(FilterDef),
}

struct StreamHandle {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct AdapterState {
    client: Option<Arc<dyn CpdRpc>>,
    streams: HashMap<String, StreamHandle>,
    next_generation: u64,
    epoch: u64,
}

impl AdapterState {
    fn cancel_stream(&mut self, id: &str) -> bool {
        match self.streams.remove(id) {
            Some(handle) => {
                handle.token.cancel();
                true
            }
            None => false,
        }
    }
}

/// CPD bridge for one logical connection. Clones share the same state.
#[derive(Clone)]
pub struct StreamAdapter {
    connector: Arc<dyn CpdConnector>,
    sink: SharedSink,
    state: Arc<Mutex<AdapterState>>,
}

impl StreamAdapter {
    /// Adapter using the tonic transport.
    pub fn new(sink: SharedSink) -> Self {
        Self::with_connector(Arc::new(TonicConnector), sink)
    }

    pub fn with_connector(connector: Arc<dyn CpdConnector>, sink: SharedSink) -> Self {
        Self {
            connector,
            sink,
            state: Arc::new(Mutex::new(AdapterState::default())),
        }
    }

    /// Builds the client for `address`.
    ///
    /// An empty address is accepted and leaves the adapter uninitialized, so a
    /// connection can be declared before its endpoint is known. Connecting an
    /// initialized adapter first tears down the previous client and streams.
    pub async fn connect(&self, address: &str, use_tls: bool) -> Result<()> {
        if address.is_empty() {
            log::info!("CPD address missing; adapter ready for later init");
            return Ok(());
        }
        if self.is_initialized() {
            self.disconnect();
        }

        let client: Arc<dyn CpdRpc> = Arc::from(self.connector.connect(address, use_tls)?);
        {
            let mut state = self.lock();
            state.epoch += 1;
            state.client = Some(client);
        }
        log::info!("CPD adapter initialized for {}", address);
        Ok(())
    }

    /// Cancels every stream and drops the client. Idempotent.
    pub fn disconnect(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        let cancelled = state.streams.len();
        for (_, handle) in state.streams.drain() {
            handle.token.cancel();
        }
        if state.client.take().is_some() || cancelled > 0 {
            log::info!("CPD adapter disconnected, {} stream(s) cancelled", cancelled);
        }
    }

    pub async fn ping(&self, msg: &str) -> Result<PingReply> {
        let client = self.client()?;
        Ok(client
            .ping(PingRequest {
                msg: msg.to_string(),
            })
            .await?)
    }

    pub async fn browse_topics(&self, query: BrowseTopicNamesRequest) -> Result<BrowseTopicNamesReply> {
        let client = self.client()?;
        Ok(client.browse_topic_names(query).await?)
    }

    pub async fn get_latest_data(&self, query: LatestDataQuery) -> Result<Vec<TopicData>> {
        let client = self.client()?;
        let reply = match query {
            LatestDataQuery::Patterns(topicpattern) => {
                client
                    .simple_get_latest_data(SimpleGetLatestDataRequest { topicpattern })
                    .await?
            }
            LatestDataQuery::Filter(filter_def) => {
                client
                    .get_latest_data(GetLatestDataRequest {
                        filter_def: Some(filter_def),
                    })
                    .await?
            }
        };
        Ok(reply.topic_data)
    }

    /// Opens a stream over a flat pattern list.
    pub async fn simple_subscribe(&self, id: &str, topic_patterns: Vec<String>) -> Result<()> {
        let (client, epoch) = self.client_at_epoch()?;
        if id.is_empty() || topic_patterns.is_empty() {
            return Err(TopicStreamError::InvalidArgument(
                "simpleSubscribe requires id and topicPatterns".into(),
            ));
        }

        self.cancel_stream(id);
        let stream = client
            .simple_subscribe(SimpleSubscribeRequest {
                id: id.to_string(),
                topicpattern: topic_patterns,
            })
            .await?;
        self.register_stream(id, stream, epoch)
    }

    /// Opens a stream over a structured filter with delivery options.
    pub async fn subscribe(&self, id: &str, filter_def: FilterDef, config: SubsConfig) -> Result<()> {
        let (client, epoch) = self.client_at_epoch()?;
        if id.is_empty() {
            return Err(TopicStreamError::InvalidArgument("subscribe requires id".into()));
        }

        self.cancel_stream(id);
        let stream = client
            .subscribe(SubscribeRequest {
                id: id.to_string(),
                filter_def: Some(filter_def),
                subs_config: Some(config),
            })
            .await?;
        self.register_stream(id, stream, epoch)
    }

    /// Ends the remote subscription `id`.
    ///
    /// The local stream is cancelled and forgotten whatever the RPC outcome;
    /// an RPC error is still returned.
    pub async fn unsubscribe(&self, id: &str) -> Result<()> {
        let client = self.client()?;
        if id.is_empty() {
            return Err(TopicStreamError::InvalidArgument("unsubscribe requires id".into()));
        }

        let outcome = client.unsubscribe(UnsubscribeRequest { id: id.to_string() }).await;
        if self.cancel_stream(id) {
            log::debug!("CPD stream {} cancelled by unsubscribe", id);
        }
        outcome?;
        Ok(())
    }

    pub async fn publish(&self, topic: &str, data: &Value) -> Result<()> {
        self.publish_like(PublishMethod::Publish, topic, data).await
    }

    pub async fn publish_update(&self, topic: &str, data: &Value) -> Result<()> {
        self.publish_like(PublishMethod::PublishUpdate, topic, data).await
    }

    pub async fn delta_publish(&self, topic: &str, data: &Value) -> Result<()> {
        self.publish_like(PublishMethod::DeltaPublish, topic, data).await
    }

    pub async fn publish_delta_to_delta(&self, topic: &str, data: &Value) -> Result<()> {
        self.publish_like(PublishMethod::PublishDeltaToDelta, topic, data).await
    }

    pub async fn publish_delta_to_full(&self, topic: &str, data: &Value) -> Result<()> {
        self.publish_like(PublishMethod::PublishDeltaToFull, topic, data).await
    }

    pub async fn publish_full_to_delta(&self, topic: &str, data: &Value) -> Result<()> {
        self.publish_like(PublishMethod::PublishFullToDelta, topic, data).await
    }

    pub async fn send_topic(&self, topic: &str, data: &Value) -> Result<()> {
        self.publish_like(PublishMethod::SendTopic, topic, data).await
    }

    /// Shared body of the publish family. Non-string `data` goes out as JSON text.
    pub async fn publish_like(&self, method: PublishMethod, topic: &str, data: &Value) -> Result<()> {
        let client = self.client()?;
        if topic.is_empty() {
            return Err(TopicStreamError::InvalidArgument("topic required".into()));
        }

        let data = match data {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other)?,
        };
        client
            .publish(
                method,
                PublishRequest {
                    topic: topic.to_string(),
                    data,
                },
            )
            .await?;
        Ok(())
    }

    /// Ids of the streams currently open, sorted.
    pub fn active_streams(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().streams.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().client.is_some()
    }

    fn client(&self) -> Result<Arc<dyn CpdRpc>> {
        self.lock()
            .client
            .clone()
            .ok_or(TopicStreamError::ConnectionUnavailable)
    }

    fn client_at_epoch(&self) -> Result<(Arc<dyn CpdRpc>, u64)> {
        let state = self.lock();
        let client = state
            .client
            .clone()
            .ok_or(TopicStreamError::ConnectionUnavailable)?;
        Ok((client, state.epoch))
    }

    fn cancel_stream(&self, id: &str) -> bool {
        self.lock().cancel_stream(id)
    }

    /// Starts pumping `stream` unless the connection changed since `epoch`.
    fn register_stream(&self, id: &str, stream: SubscriptionStream, epoch: u64) -> Result<()> {
        let token = CancellationToken::new();
        let generation = {
            let mut state = self.lock();
            if state.client.is_none() || state.epoch != epoch {
                token.cancel();
                log::info!("CPD stream {} dropped, connection changed while subscribing", id);
                return Err(TopicStreamError::ConnectionUnavailable);
            }
            state.next_generation += 1;
            let generation = state.next_generation;
            // A concurrent subscribe may have registered the id meanwhile.
            state.cancel_stream(id);
            state.streams.insert(
                id.to_string(),
                StreamHandle {
                    generation,
                    token: token.clone(),
                },
            );
            generation
        };

        log::info!("CPD stream {} opened", id);
        tokio::spawn(pump_stream(
            Arc::clone(&self.sink),
            Arc::clone(&self.state),
            id.to_string(),
            generation,
            token,
            stream,
        ));
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AdapterState> {
        self.state.lock().expect("Adapter lock poisoned")
    }
}

async fn pump_stream(
    sink: SharedSink,
    state: Arc<Mutex<AdapterState>>,
    id: String,
    generation: u64,
    token: CancellationToken,
    mut stream: SubscriptionStream,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                log::debug!("CPD stream {} cancelled", id);
                return;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(reply)) => sink.emit(Envelope::topic_change(&id, reply.topic_data)),
            Some(Err(status)) => {
                let err = TopicStreamError::StreamFailure {
                    id: id.clone(),
                    reason: status.message().to_string(),
                };
                log::error!("{}", err);
                deregister(&state, &id, generation);
                sink.emit(Envelope::error(format!(
                    "CPD stream {} error: {}",
                    id,
                    status.message()
                )));
                return;
            }
            None => {
                log::info!("CPD stream {} ended", id);
                deregister(&state, &id, generation);
                sink.emit(Envelope::info(format!("CPD stream {} ended", id)));
                return;
            }
        }
    }
}

/// Removes `id` only if it still refers to this pump's stream.
fn deregister(state: &Mutex<AdapterState>, id: &str, generation: u64) {
    let mut state = state.lock().expect("Adapter lock poisoned");
    if state.streams.get(id).is_some_and(|h| h.generation == generation) {
        state.streams.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::envelope::{LogLevel, Payload};
    use crate::bridge::proto::{Ack, LatestDataReply, SubscribeReply};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc};
    use tokio::time::timeout;
    use tonic::Status;

    type StreamItem = std::result::Result<SubscribeReply, Status>;

    #[derive(Default)]
    struct MockShared {
        calls: Mutex<Vec<String>>,
        published: Mutex<Vec<(PublishMethod, PublishRequest)>>,
        streams: Mutex<HashMap<String, mpsc::UnboundedSender<StreamItem>>>,
        fail_unsubscribe: bool,
        subscribe_gate: Option<Arc<Notify>>,
    }

    impl MockShared {
        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn open(&self, id: &str) -> SubscriptionStream {
            let (tx, rx) = mpsc::unbounded_channel();
            self.streams.lock().unwrap().insert(id.to_string(), tx);
            futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()
        }

        fn sender(&self, id: &str) -> mpsc::UnboundedSender<StreamItem> {
            self.streams.lock().unwrap()[id].clone()
        }

        fn take_sender(&self, id: &str) -> mpsc::UnboundedSender<StreamItem> {
            self.streams.lock().unwrap().remove(id).unwrap()
        }
    }

    struct MockRpc(Arc<MockShared>);

    #[async_trait]
    impl CpdRpc for MockRpc {
        async fn ping(&self, req: PingRequest) -> std::result::Result<PingReply, Status> {
            self.0.record("ping");
            Ok(PingReply { msg: req.msg })
        }

        async fn browse_topic_names(
            &self,
            req: BrowseTopicNamesRequest,
        ) -> std::result::Result<BrowseTopicNamesReply, Status> {
            self.0.record("browseTopicNames");
            Ok(BrowseTopicNamesReply {
                topic_names: vec![req.topic_pattern],
            })
        }

        async fn simple_get_latest_data(
            &self,
            req: SimpleGetLatestDataRequest,
        ) -> std::result::Result<LatestDataReply, Status> {
            self.0.record("simpleGetLatestData");
            Ok(LatestDataReply {
                topic_data: req
                    .topicpattern
                    .into_iter()
                    .map(|topic| TopicData {
                        topic,
                        data: "v".into(),
                    })
                    .collect(),
            })
        }

        async fn get_latest_data(
            &self,
            _req: GetLatestDataRequest,
        ) -> std::result::Result<LatestDataReply, Status> {
            self.0.record("getLatestData");
            Ok(LatestDataReply::default())
        }

        async fn simple_subscribe(
            &self,
            req: SimpleSubscribeRequest,
        ) -> std::result::Result<SubscriptionStream, Status> {
            self.0.record("simpleSubscribe");
            if let Some(gate) = &self.0.subscribe_gate {
                gate.notified().await;
            }
            Ok(self.0.open(&req.id))
        }

        async fn subscribe(
            &self,
            req: SubscribeRequest,
        ) -> std::result::Result<SubscriptionStream, Status> {
            self.0.record("subscribe");
            Ok(self.0.open(&req.id))
        }

        async fn unsubscribe(&self, _req: UnsubscribeRequest) -> std::result::Result<Ack, Status> {
            self.0.record("unsubscribe");
            if self.0.fail_unsubscribe {
                return Err(Status::unavailable("cpd down"));
            }
            Ok(Ack {})
        }

        async fn publish(
            &self,
            method: PublishMethod,
            req: PublishRequest,
        ) -> std::result::Result<Ack, Status> {
            self.0.published.lock().unwrap().push((method, req));
            Ok(Ack {})
        }
    }

    struct MockConnector(Arc<MockShared>);

    impl CpdConnector for MockConnector {
        fn connect(&self, _address: &str, _use_tls: bool) -> Result<Box<dyn CpdRpc>> {
            Ok(Box::new(MockRpc(Arc::clone(&self.0))))
        }
    }

    async fn setup(
        shared: MockShared,
    ) -> (
        StreamAdapter,
        Arc<MockShared>,
        mpsc::UnboundedReceiver<Envelope>,
    ) {
        let shared = Arc::new(shared);
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter =
            StreamAdapter::with_connector(Arc::new(MockConnector(Arc::clone(&shared))), Arc::new(tx));
        adapter.connect("cpd:5000", false).await.unwrap();
        (adapter, shared, rx)
    }

    async fn next_envelope(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no envelope in time")
            .expect("sink closed")
    }

    fn reply(topic: &str, data: &str) -> StreamItem {
        Ok(SubscribeReply {
            topic_data: vec![TopicData {
                topic: topic.into(),
                data: data.into(),
            }],
        })
    }

    #[tokio::test]
    async fn test_empty_address_leaves_adapter_uninitialized() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let adapter = StreamAdapter::with_connector(
            Arc::new(MockConnector(Arc::new(MockShared::default()))),
            Arc::new(tx),
        );

        adapter.connect("", false).await.unwrap();
        assert!(!adapter.is_initialized());
        assert!(matches!(
            adapter.ping("hi").await,
            Err(TopicStreamError::ConnectionUnavailable)
        ));
        assert!(matches!(
            adapter.publish("t", &json!("x")).await,
            Err(TopicStreamError::ConnectionUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_unary_calls() {
        let (adapter, shared, _rx) = setup(MockShared::default()).await;

        assert_eq!(adapter.ping("hello").await.unwrap().msg, "hello");
        let browsed = adapter
            .browse_topics(BrowseTopicNamesRequest::with_defaults())
            .await
            .unwrap();
        assert_eq!(browsed.topic_names, vec!["sw.*"]);

        let data = adapter
            .get_latest_data(LatestDataQuery::Patterns(vec!["sw.a".into()]))
            .await
            .unwrap();
        assert_eq!(data[0].topic, "sw.a");
        adapter
            .get_latest_data(LatestDataQuery::Filter(FilterDef::default()))
            .await
            .unwrap();

        assert_eq!(
            *shared.calls.lock().unwrap(),
            vec!["ping", "browseTopicNames", "simpleGetLatestData", "getLatestData"]
        );
    }

    #[tokio::test]
    async fn test_stream_data_and_end_reach_sink() {
        let (adapter, shared, mut rx) = setup(MockShared::default()).await;
        adapter
            .simple_subscribe("7", vec!["sw.#".into()])
            .await
            .unwrap();
        assert_eq!(adapter.active_streams(), vec!["7"]);

        shared.sender("7").send(reply("sw.a", "1")).unwrap();
        match next_envelope(&mut rx).await {
            Envelope::Data(event) => {
                let Payload::TopicChange {
                    subscription_id,
                    topics,
                } = event.payload;
                assert_eq!(subscription_id, "7");
                assert_eq!(topics[0].topic, "sw.a");
                assert_eq!(topics[0].data, "1");
            }
            other => panic!("unexpected envelope {:?}", other),
        }

        drop(shared.take_sender("7"));
        assert_eq!(next_envelope(&mut rx).await, Envelope::info("CPD stream 7 ended"));
        assert!(adapter.active_streams().is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_logs_and_deregisters() {
        let (adapter, shared, mut rx) = setup(MockShared::default()).await;
        adapter
            .subscribe("s1", FilterDef::default(), SubsConfig::default())
            .await
            .unwrap();

        shared.sender("s1").send(Err(Status::internal("broken"))).unwrap();
        match next_envelope(&mut rx).await {
            Envelope::Log(log) => {
                assert_eq!(log.level, LogLevel::Error);
                assert!(log.message.contains("broken"));
            }
            other => panic!("unexpected envelope {:?}", other),
        }
        assert!(adapter.active_streams().is_empty());
    }

    #[tokio::test]
    async fn test_reusing_id_cancels_previous_stream() {
        let (adapter, shared, mut rx) = setup(MockShared::default()).await;
        adapter.simple_subscribe("7", vec!["a".into()]).await.unwrap();
        let first = shared.sender("7");

        adapter.simple_subscribe("7", vec!["b".into()]).await.unwrap();
        timeout(Duration::from_secs(2), first.closed())
            .await
            .expect("first stream not cancelled");

        shared.sender("7").send(reply("b", "2")).unwrap();
        match next_envelope(&mut rx).await {
            Envelope::Data(event) => {
                let Payload::TopicChange { topics, .. } = event.payload;
                assert_eq!(topics[0].topic, "b");
            }
            other => panic!("unexpected envelope {:?}", other),
        }
        assert_eq!(adapter.active_streams(), vec!["7"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_cleans_up_even_when_rpc_fails() {
        let (adapter, shared, _rx) = setup(MockShared {
            fail_unsubscribe: true,
            ..MockShared::default()
        })
        .await;
        adapter.simple_subscribe("7", vec!["a".into()]).await.unwrap();
        let stream = shared.sender("7");

        let err = adapter.unsubscribe("7").await.unwrap_err();
        assert!(matches!(err, TopicStreamError::RemoteCallFailure(_)));
        assert!(adapter.active_streams().is_empty());
        timeout(Duration::from_secs(2), stream.closed())
            .await
            .expect("stream not cancelled");
    }

    #[tokio::test]
    async fn test_argument_validation() {
        let (adapter, _shared, _rx) = setup(MockShared::default()).await;

        for result in [
            adapter.simple_subscribe("", vec!["a".into()]).await,
            adapter.simple_subscribe("7", vec![]).await,
            adapter
                .subscribe("", FilterDef::default(), SubsConfig::default())
                .await,
            adapter.unsubscribe("").await,
            adapter.publish("", &json!("x")).await,
        ] {
            assert!(matches!(result, Err(TopicStreamError::InvalidArgument(_))));
        }
    }

    #[tokio::test]
    async fn test_publish_family_serializes_non_string_data() {
        let (adapter, shared, _rx) = setup(MockShared::default()).await;

        adapter.publish("t", &json!("plain")).await.unwrap();
        adapter.delta_publish("t", &json!({"v": 1})).await.unwrap();
        adapter.send_topic("t", &json!(42)).await.unwrap();

        let published = shared.published.lock().unwrap();
        assert_eq!(published[0].0, PublishMethod::Publish);
        assert_eq!(published[0].1.data, "plain");
        assert_eq!(published[1].0, PublishMethod::DeltaPublish);
        assert_eq!(published[1].1.data, r#"{"v":1}"#);
        assert_eq!(published[2].0, PublishMethod::SendTopic);
        assert_eq!(published[2].1.data, "42");
    }

    #[tokio::test]
    async fn test_disconnect_cancels_all_and_is_idempotent() {
        let (adapter, shared, _rx) = setup(MockShared::default()).await;
        adapter.simple_subscribe("a", vec!["a".into()]).await.unwrap();
        adapter.simple_subscribe("b", vec!["b".into()]).await.unwrap();
        let (a, b) = (shared.sender("a"), shared.sender("b"));

        adapter.disconnect();
        adapter.disconnect();

        assert!(!adapter.is_initialized());
        assert!(adapter.active_streams().is_empty());
        for stream in [a, b] {
            timeout(Duration::from_secs(2), stream.closed())
                .await
                .expect("stream not cancelled");
        }
        assert!(matches!(
            adapter.ping("x").await,
            Err(TopicStreamError::ConnectionUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_during_subscribe_drops_late_stream() {
        let gate = Arc::new(Notify::new());
        let (adapter, shared, mut rx) = setup(MockShared {
            subscribe_gate: Some(Arc::clone(&gate)),
            ..MockShared::default()
        })
        .await;

        let pending = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.simple_subscribe("7", vec!["sw.#".into()]).await })
        };
        timeout(Duration::from_secs(2), async {
            while shared.calls.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscribe never reached the remote");

        adapter.disconnect();
        gate.notify_one();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(TopicStreamError::ConnectionUnavailable)));
        assert!(!adapter.is_initialized());
        assert!(adapter.active_streams().is_empty());

        // The late stream was dropped, so the remote side sees it closed.
        let stream = shared.sender("7");
        timeout(Duration::from_secs(2), stream.closed())
            .await
            .expect("late stream still open");
        assert!(stream.send(reply("sw.a", "1")).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconnect_during_subscribe_drops_late_stream() {
        let gate = Arc::new(Notify::new());
        let (adapter, shared, _rx) = setup(MockShared {
            subscribe_gate: Some(Arc::clone(&gate)),
            ..MockShared::default()
        })
        .await;

        let pending = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.simple_subscribe("7", vec!["sw.#".into()]).await })
        };
        timeout(Duration::from_secs(2), async {
            while shared.calls.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscribe never reached the remote");

        adapter.connect("cpd:5001", false).await.unwrap();
        gate.notify_one();

        assert!(matches!(
            pending.await.unwrap(),
            Err(TopicStreamError::ConnectionUnavailable)
        ));
        assert!(adapter.is_initialized());
        assert!(adapter.active_streams().is_empty());
    }
}
