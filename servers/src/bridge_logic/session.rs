//! One client WebSocket session: decodes wire requests, drives a dedicated
//! `StreamAdapter`, and turns adapter envelopes back into `{id, result}`
//! frames. Requests are handled in arrival order by a single worker task so
//! a `subscribe` always completes before a later `unsubscribe` of the same job.

use crate::bridge_logic::config::BridgeSettings;
use crate::bridge_logic::model::{
    LatestDataParams, PingParams, PublishParams, SimpleSubscribeParams, SubscribeParams,
    UnsubscribeParams, WireRequest, WireResponse, params,
};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use lib_topicstream::bridge::proto::{BrowseTopicNamesRequest, FilterDef};
use lib_topicstream::bridge::{Envelope, LatestDataQuery, LogLevel, Payload, PublishMethod, StreamAdapter};
use lib_topicstream::TopicStreamError;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

pub async fn handle_socket(socket: WebSocket, settings: Arc<BridgeSettings>) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    log::info!("Client {} connected", client_id);

    let (envelope_tx, mut envelope_rx) = mpsc::unbounded_channel::<Envelope>();
    let adapter = StreamAdapter::new(Arc::new(envelope_tx));
    if let Err(e) = adapter.connect(&settings.cpd_address, settings.cpd_use_tls).await {
        log::error!("Client {}: CPD connect failed: {}", client_id, e);
    }

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<WireResponse>();
    let (request_tx, request_rx) = mpsc::unbounded_channel::<WireRequest>();
    let worker = tokio::spawn(request_worker(adapter.clone(), request_rx, reply_tx));

    let (mut sender, mut receiver) = socket.split();

    loop {
        let outgoing: Vec<WireResponse> = tokio::select! {
            // Handle incoming messages from the client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WireRequest>(&text) {
                            Ok(request) => {
                                if request_tx.send(request).is_err() {
                                    break;
                                }
                            }
                            Err(e) => log::warn!("Client {}: malformed request: {}", client_id, e),
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        log::warn!("Client {}: socket error: {}", client_id, e);
                        break;
                    }
                    Some(Ok(_)) => continue,
                }
            }
            Some(envelope) = envelope_rx.recv() => frames_from_envelope(client_id, envelope),
            Some(reply) = reply_rx.recv() => vec![reply],
        };

        let mut closed = false;
        for frame in outgoing {
            match serde_json::to_string(&frame) {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        closed = true;
                        break;
                    }
                }
                Err(e) => log::error!("Client {}: frame not serializable: {}", client_id, e),
            }
        }
        if closed {
            break;
        }
    }

    worker.abort();
    adapter.disconnect();
    log::info!("Client {} disconnected", client_id);
}

async fn request_worker(
    adapter: StreamAdapter,
    mut requests: mpsc::UnboundedReceiver<WireRequest>,
    replies: mpsc::UnboundedSender<WireResponse>,
) {
    while let Some(request) = requests.recv().await {
        if let Some(reply) = dispatch_request(&adapter, request).await {
            if replies.send(reply).is_err() {
                break;
            }
        }
    }
}

/// Runs one wire request against the adapter.
///
/// Subscriptions answer through their stream deltas and `unsubscribe` is
/// fire-and-forget, so those only reply on failure or not at all.
pub async fn dispatch_request(adapter: &StreamAdapter, request: WireRequest) -> Option<WireResponse> {
    let WireRequest { method, parameter, id } = request;

    match run_request(adapter, &method, parameter, id).await {
        Ok(reply) => reply,
        Err(e) => {
            log::warn!("Request {} ({}) failed: {}", id, method, e);
            Some(WireResponse::failure(id, e))
        }
    }
}

async fn run_request(
    adapter: &StreamAdapter,
    method: &str,
    parameter: serde_json::Value,
    id: u64,
) -> Result<Option<WireResponse>, TopicStreamError> {
    match method {
        "subscribe" => {
            let p: SubscribeParams = params(parameter)?;
            let filter_def = FilterDef {
                topicpattern: vec![p.filter],
                excludepattern: Vec::new(),
            };
            adapter
                .subscribe(&id.to_string(), filter_def, p.subsconfig.unwrap_or_default())
                .await?;
            Ok(None)
        }
        "simpleSubscribe" => {
            let p: SimpleSubscribeParams = params(parameter)?;
            adapter.simple_subscribe(&id.to_string(), p.topicpattern).await?;
            Ok(None)
        }
        "unsubscribe" => {
            let p: UnsubscribeParams = params(parameter)?;
            if let Err(e) = adapter.unsubscribe(&p.job_id.to_string()).await {
                log::warn!("Unsubscribe of job {} reported: {}", p.job_id, e);
            }
            Ok(None)
        }
        "ping" => {
            let p: PingParams = params(parameter)?;
            let reply = adapter.ping(&p.msg).await?;
            Ok(Some(WireResponse::success(id, json!({ "data": reply }))))
        }
        "browseTopicNames" => {
            let query: BrowseTopicNamesRequest = params(parameter)?;
            let reply = adapter.browse_topics(query).await?;
            Ok(Some(WireResponse::success(id, json!({ "topicNames": reply.topic_names }))))
        }
        "getLatestData" => {
            let p: LatestDataParams = params(parameter)?;
            let query = match p.topic_patterns {
                Some(patterns) => LatestDataQuery::Patterns(patterns),
                None => LatestDataQuery::Filter(p.filter_def.unwrap_or_default()),
            };
            let data = adapter.get_latest_data(query).await?;
            Ok(Some(WireResponse::success(id, json!({ "data": data }))))
        }
        other => match PublishMethod::from_rpc_name(other) {
            Some(publish) => {
                let p: PublishParams = params(parameter)?;
                adapter.publish_like(publish, &p.topic, &p.data).await?;
                Ok(Some(WireResponse::success(id, json!({}))))
            }
            None => Err(TopicStreamError::InvalidArgument(format!("Unknown method: {}", other))),
        },
    }
}

/// Re-encodes an adapter envelope as wire frames, one per topic.
///
/// Log envelopes stay in the server log. A subscription id that is not a
/// job number cannot be routed and is dropped.
pub fn frames_from_envelope(client_id: usize, envelope: Envelope) -> Vec<WireResponse> {
    match envelope {
        Envelope::Data(event) => {
            let Payload::TopicChange { subscription_id, topics } = event.payload;
            let Ok(job_id) = subscription_id.parse::<u64>() else {
                log::warn!("Client {}: unroutable subscription id {}", client_id, subscription_id);
                return Vec::new();
            };
            topics
                .into_iter()
                .map(|t| WireResponse {
                    id: job_id,
                    result: json!({ "topic": t.topic, "data": t.data }),
                })
                .collect()
        }
        Envelope::Log(event) => {
            match event.level {
                LogLevel::Info => log::info!("Client {}: {}", client_id, event.message),
                LogLevel::Error => log::error!("Client {}: {}", client_id, event.message),
            }
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::stream::BoxStream;
    use lib_topicstream::bridge::proto::{
        Ack, BrowseTopicNamesReply, GetLatestDataRequest, LatestDataReply, PingReply, PingRequest,
        PublishRequest, SimpleGetLatestDataRequest, SimpleSubscribeRequest, SubsConfig,
        SubscribeReply, SubscribeRequest, TopicData, UnsubscribeRequest,
    };
    use lib_topicstream::bridge::{CpdConnector, CpdRpc, SubscriptionStream};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;
    use tonic::Status;

    type StreamItem = Result<SubscribeReply, Status>;

    /// What the in-memory CPD service was asked to do.
    #[derive(Default)]
    struct Received {
        subscribe: Vec<SubscribeRequest>,
        simple_subscribe: Vec<SimpleSubscribeRequest>,
        unsubscribe: Vec<String>,
        simple_latest: Vec<Vec<String>>,
        latest: Vec<GetLatestDataRequest>,
        browse: Vec<BrowseTopicNamesRequest>,
        published: Vec<(PublishMethod, PublishRequest)>,
        streams: HashMap<String, mpsc::UnboundedSender<StreamItem>>,
    }

    #[derive(Clone, Default)]
    struct FakeCpd(Arc<Mutex<Received>>);

    impl FakeCpd {
        fn received(&self) -> std::sync::MutexGuard<'_, Received> {
            self.0.lock().unwrap()
        }

        fn open(&self, id: &str) -> SubscriptionStream {
            let (tx, rx) = mpsc::unbounded_channel();
            self.received().streams.insert(id.to_string(), tx);
            let stream: BoxStream<'static, StreamItem> =
                Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                }));
            stream
        }
    }

    #[async_trait]
    impl CpdRpc for FakeCpd {
        async fn ping(&self, req: PingRequest) -> Result<PingReply, Status> {
            Ok(PingReply { msg: format!("pong {}", req.msg) })
        }

        async fn browse_topic_names(
            &self,
            req: BrowseTopicNamesRequest,
        ) -> Result<BrowseTopicNamesReply, Status> {
            let names = vec![format!("{}.one", req.topic_pattern)];
            self.received().browse.push(req);
            Ok(BrowseTopicNamesReply { topic_names: names })
        }

        async fn simple_get_latest_data(
            &self,
            req: SimpleGetLatestDataRequest,
        ) -> Result<LatestDataReply, Status> {
            self.received().simple_latest.push(req.topicpattern.clone());
            Ok(LatestDataReply {
                topic_data: req
                    .topicpattern
                    .into_iter()
                    .map(|topic| TopicData { topic, data: "latest".into() })
                    .collect(),
            })
        }

        async fn get_latest_data(&self, req: GetLatestDataRequest) -> Result<LatestDataReply, Status> {
            self.received().latest.push(req);
            Ok(LatestDataReply {
                topic_data: vec![TopicData { topic: "sw.f".into(), data: "filtered".into() }],
            })
        }

        async fn simple_subscribe(&self, req: SimpleSubscribeRequest) -> Result<SubscriptionStream, Status> {
            let stream = self.open(&req.id);
            self.received().simple_subscribe.push(req);
            Ok(stream)
        }

        async fn subscribe(&self, req: SubscribeRequest) -> Result<SubscriptionStream, Status> {
            let stream = self.open(&req.id);
            self.received().subscribe.push(req);
            Ok(stream)
        }

        async fn unsubscribe(&self, req: UnsubscribeRequest) -> Result<Ack, Status> {
            self.received().unsubscribe.push(req.id);
            Ok(Ack {})
        }

        async fn publish(&self, method: PublishMethod, req: PublishRequest) -> Result<Ack, Status> {
            self.received().published.push((method, req));
            Ok(Ack {})
        }
    }

    impl CpdConnector for FakeCpd {
        fn connect(&self, _address: &str, _use_tls: bool) -> lib_topicstream::Result<Box<dyn CpdRpc>> {
            Ok(Box::new(self.clone()))
        }
    }

    async fn connected_adapter() -> (StreamAdapter, FakeCpd, mpsc::UnboundedReceiver<Envelope>) {
        let cpd = FakeCpd::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = StreamAdapter::with_connector(Arc::new(cpd.clone()), Arc::new(tx));
        adapter.connect("cpd:5000", false).await.unwrap();
        (adapter, cpd, rx)
    }

    fn request(method: &str, parameter: serde_json::Value, id: u64) -> WireRequest {
        WireRequest {
            method: method.to_string(),
            parameter,
            id,
        }
    }

    #[test]
    fn test_topic_change_becomes_one_frame_per_topic() {
        let envelope = Envelope::topic_change(
            "12",
            vec![
                TopicData { topic: "sw.a".into(), data: "1".into() },
                TopicData { topic: "sw.b".into(), data: "".into() },
            ],
        );
        let frames = frames_from_envelope(1, envelope);
        assert_eq!(
            frames,
            vec![
                WireResponse { id: 12, result: json!({"topic": "sw.a", "data": "1"}) },
                WireResponse { id: 12, result: json!({"topic": "sw.b", "data": ""}) },
            ]
        );
    }

    #[test]
    fn test_log_and_unroutable_envelopes_are_not_forwarded() {
        assert!(frames_from_envelope(1, Envelope::info("CPD stream 3 ended")).is_empty());
        assert!(frames_from_envelope(1, Envelope::topic_change("abc", vec![])).is_empty());
    }

    #[tokio::test]
    async fn test_uninitialized_adapter_replies_with_failure() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let adapter = StreamAdapter::new(Arc::new(tx));

        let reply = dispatch_request(&adapter, request("ping", json!({"msg": "hi"}), 4))
            .await
            .unwrap();
        assert_eq!(reply.id, 4);
        assert_eq!(reply.result["success"], false);
        assert!(reply.result["error"].as_str().unwrap().contains("not initialized"));

        let reply = dispatch_request(&adapter, request("publish", json!({"topic": "t", "data": 1}), 5))
            .await
            .unwrap();
        assert_eq!(reply.result["success"], false);
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_params() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let adapter = StreamAdapter::new(Arc::new(tx));

        let reply = dispatch_request(&adapter, request("frobnicate", json!({}), 1)).await.unwrap();
        assert!(reply.result["error"].as_str().unwrap().contains("Unknown method"));

        let reply = dispatch_request(&adapter, request("subscribe", json!({"nofilter": 1}), 2))
            .await
            .unwrap();
        assert_eq!(reply.result["success"], false);
    }

    #[tokio::test]
    async fn test_unsubscribe_never_replies() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let adapter = StreamAdapter::new(Arc::new(tx));
        assert!(dispatch_request(&adapter, request("unsubscribe", json!({"jobId": 9}), 10))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_subscribe_maps_filter_and_job_id() {
        let (adapter, cpd, mut envelopes) = connected_adapter().await;

        let reply = dispatch_request(
            &adapter,
            request("subscribe", json!({"filter": "sw.#", "subsconfig": {"sendInitial": true}}), 12),
        )
        .await;
        assert!(reply.is_none());
        assert_eq!(adapter.active_streams(), vec!["12"]);
        {
            let received = cpd.received();
            let sent = &received.subscribe[0];
            assert_eq!(sent.id, "12");
            assert_eq!(
                sent.filter_def,
                Some(FilterDef { topicpattern: vec!["sw.#".into()], excludepattern: vec![] })
            );
            assert_eq!(
                sent.subs_config,
                Some(SubsConfig { min_interval_ms: 0, send_initial: true })
            );
        }

        let stream = cpd.received().streams["12"].clone();
        stream
            .send(Ok(SubscribeReply {
                topic_data: vec![TopicData { topic: "sw.a".into(), data: "1".into() }],
            }))
            .unwrap();
        let envelope = timeout(Duration::from_secs(2), envelopes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            frames_from_envelope(1, envelope),
            vec![WireResponse { id: 12, result: json!({"topic": "sw.a", "data": "1"}) }]
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_cancels_the_job_stream() {
        let (adapter, cpd, _envelopes) = connected_adapter().await;
        dispatch_request(&adapter, request("subscribe", json!({"filter": "a"}), 12)).await;
        dispatch_request(&adapter, request("simpleSubscribe", json!({"topicpattern": ["b", "c"]}), 13)).await;
        assert_eq!(adapter.active_streams(), vec!["12", "13"]);
        assert_eq!(cpd.received().simple_subscribe[0].topicpattern, vec!["b", "c"]);

        let stream = cpd.received().streams["12"].clone();
        let reply = dispatch_request(&adapter, request("unsubscribe", json!({"jobId": 12}), 20)).await;
        assert!(reply.is_none());
        assert_eq!(cpd.received().unsubscribe, vec!["12"]);
        assert_eq!(adapter.active_streams(), vec!["13"]);
        timeout(Duration::from_secs(2), stream.closed())
            .await
            .expect("job stream not cancelled");
    }

    #[tokio::test]
    async fn test_get_latest_data_patterns_or_filter() {
        let (adapter, cpd, _envelopes) = connected_adapter().await;

        let reply = dispatch_request(&adapter, request("getLatestData", json!({"topicPatterns": ["sw.a"]}), 1))
            .await
            .unwrap();
        assert_eq!(
            reply,
            WireResponse {
                id: 1,
                result: json!({"success": true, "data": [{"topic": "sw.a", "data": "latest"}]}),
            }
        );

        let reply = dispatch_request(
            &adapter,
            request(
                "getLatestData",
                json!({"filterDef": {"topicpattern": ["sw.#"], "excludepattern": ["sw.x"]}}),
                2,
            ),
        )
        .await
        .unwrap();
        assert_eq!(reply.result["data"][0]["data"], "filtered");

        let received = cpd.received();
        assert_eq!(received.simple_latest, vec![vec!["sw.a".to_string()]]);
        assert_eq!(
            received.latest[0].filter_def,
            Some(FilterDef { topicpattern: vec!["sw.#".into()], excludepattern: vec!["sw.x".into()] })
        );
    }

    #[tokio::test]
    async fn test_ping_and_browse_reply_shapes() {
        let (adapter, cpd, _envelopes) = connected_adapter().await;

        let reply = dispatch_request(&adapter, request("ping", json!({"msg": "hi"}), 3)).await.unwrap();
        assert_eq!(reply.result, json!({"success": true, "data": {"msg": "pong hi"}}));

        let reply = dispatch_request(&adapter, request("browseTopicNames", json!({}), 4)).await.unwrap();
        assert_eq!(reply.result, json!({"success": true, "topicNames": ["sw.*.one"]}));
        let browse = &cpd.received().browse[0];
        assert_eq!(browse.limit, 100);
    }

    #[tokio::test]
    async fn test_publish_family_replies_success() {
        let (adapter, cpd, _envelopes) = connected_adapter().await;

        for (i, method) in PublishMethod::ALL.into_iter().enumerate() {
            let id = i as u64 + 100;
            let reply = dispatch_request(
                &adapter,
                request(method.rpc_name(), json!({"topic": "sw.t", "data": {"v": 1}}), id),
            )
            .await
            .unwrap();
            assert_eq!(reply, WireResponse { id, result: json!({"success": true}) });
        }

        let received = cpd.received();
        let methods: Vec<PublishMethod> = received.published.iter().map(|(m, _)| *m).collect();
        assert_eq!(methods, PublishMethod::ALL.to_vec());
        assert!(received
            .published
            .iter()
            .all(|(_, req)| req.topic == "sw.t" && req.data == r#"{"v":1}"#));
    }
}
