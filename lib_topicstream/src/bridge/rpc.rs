//! # CPD RPC Client
//!
//! The `CpdRpc` trait is the seam between the `StreamAdapter` and the remote
//! service. `TonicCpdClient` implements it over a `tonic` channel using the
//! generic `tonic::client::Grpc` with a `prost` codec, one static path per
//! method of the `core.cpd_adapter.cpd` service.
//!
//! `CpdConnector` builds clients from an address, so tests can swap the whole
//! remote side for an in-memory mock.

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status};

use crate::bridge::proto::{
    Ack, BrowseTopicNamesReply, BrowseTopicNamesRequest, GetLatestDataRequest, LatestDataReply,
    PingReply, PingRequest, PublishRequest, SimpleGetLatestDataRequest, SimpleSubscribeRequest,
    SubscribeReply, SubscribeRequest, UnsubscribeRequest,
};
use crate::error::{Result, TopicStreamError};

/// Server-streamed deltas of one subscription.
pub type SubscriptionStream = BoxStream<'static, std::result::Result<SubscribeReply, Status>>;

/// The unary publish-family methods. They share one request shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishMethod {
    Publish,
    PublishUpdate,
    DeltaPublish,
    PublishDeltaToDelta,
    PublishDeltaToFull,
    PublishFullToDelta,
    SendTopic,
}

impl PublishMethod {
    pub const ALL: [PublishMethod; 7] = [
        PublishMethod::Publish,
        PublishMethod::PublishUpdate,
        PublishMethod::DeltaPublish,
        PublishMethod::PublishDeltaToDelta,
        PublishMethod::PublishDeltaToFull,
        PublishMethod::PublishFullToDelta,
        PublishMethod::SendTopic,
    ];

    /// Method name as exposed by the service.
    pub fn rpc_name(self) -> &'static str {
        match self {
            PublishMethod::Publish => "publish",
            PublishMethod::PublishUpdate => "publishUpdate",
            PublishMethod::DeltaPublish => "deltaPublish",
            PublishMethod::PublishDeltaToDelta => "publishDeltaToDelta",
            PublishMethod::PublishDeltaToFull => "publishDeltaToFull",
            PublishMethod::PublishFullToDelta => "publishFullToDelta",
            PublishMethod::SendTopic => "sendTopic",
        }
    }

    pub fn from_rpc_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.rpc_name() == name)
    }

    fn path(self) -> PathAndQuery {
        match self {
            PublishMethod::Publish => PathAndQuery::from_static("/core.cpd_adapter.cpd/publish"),
            PublishMethod::PublishUpdate => {
                PathAndQuery::from_static("/core.cpd_adapter.cpd/publishUpdate")
            }
            PublishMethod::DeltaPublish => {
                PathAndQuery::from_static("/core.cpd_adapter.cpd/deltaPublish")
            }
            PublishMethod::PublishDeltaToDelta => {
                PathAndQuery::from_static("/core.cpd_adapter.cpd/publishDeltaToDelta")
            }
            PublishMethod::PublishDeltaToFull => {
                PathAndQuery::from_static("/core.cpd_adapter.cpd/publishDeltaToFull")
            }
            PublishMethod::PublishFullToDelta => {
                PathAndQuery::from_static("/core.cpd_adapter.cpd/publishFullToDelta")
            }
            PublishMethod::SendTopic => PathAndQuery::from_static("/core.cpd_adapter.cpd/sendTopic"),
        }
    }
}

/// Remote operations of the CPD service.
#[async_trait]
pub trait CpdRpc: Send + Sync {
    async fn ping(&self, req: PingRequest) -> std::result::Result<PingReply, Status>;

    async fn browse_topic_names(
        &self,
        req: BrowseTopicNamesRequest,
    ) -> std::result::Result<BrowseTopicNamesReply, Status>;

    async fn simple_get_latest_data(
        &self,
        req: SimpleGetLatestDataRequest,
    ) -> std::result::Result<LatestDataReply, Status>;

    async fn get_latest_data(
        &self,
        req: GetLatestDataRequest,
    ) -> std::result::Result<LatestDataReply, Status>;

    async fn simple_subscribe(
        &self,
        req: SimpleSubscribeRequest,
    ) -> std::result::Result<SubscriptionStream, Status>;

    async fn subscribe(
        &self,
        req: SubscribeRequest,
    ) -> std::result::Result<SubscriptionStream, Status>;

    async fn unsubscribe(&self, req: UnsubscribeRequest) -> std::result::Result<Ack, Status>;

    async fn publish(
        &self,
        method: PublishMethod,
        req: PublishRequest,
    ) -> std::result::Result<Ack, Status>;
}

/// Builds a `CpdRpc` client for an address.
pub trait CpdConnector: Send + Sync {
    fn connect(&self, address: &str, use_tls: bool) -> Result<Box<dyn CpdRpc>>;
}

/// Default connector producing `TonicCpdClient`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TonicConnector;

impl CpdConnector for TonicConnector {
    fn connect(&self, address: &str, use_tls: bool) -> Result<Box<dyn CpdRpc>> {
        Ok(Box::new(TonicCpdClient::connect_lazy(address, use_tls)?))
    }
}

/// `CpdRpc` over a lazily connected tonic channel.
#[derive(Debug, Clone)]
pub struct TonicCpdClient {
    inner: tonic::client::Grpc<Channel>,
}

impl TonicCpdClient {
    /// Builds the channel without dialing; the first call connects.
    ///
    /// A bare `host:port` gets an `https://` or `http://` scheme depending on
    /// `use_tls`. Must be called from within a tokio runtime.
    pub fn connect_lazy(address: &str, use_tls: bool) -> Result<Self> {
        let uri = endpoint_uri(address, use_tls);
        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| TopicStreamError::Connect(format!("{}: {}", uri, e)))?;

        if use_tls {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| TopicStreamError::Connect(format!("TLS setup for {}: {}", uri, e)))?;
        }

        log::info!("CPD channel prepared for {} (tls={})", uri, use_tls);
        Ok(Self {
            inner: tonic::client::Grpc::new(endpoint.connect_lazy()),
        })
    }

    async fn unary<Req, Resp>(
        &self,
        req: Req,
        path: PathAndQuery,
    ) -> std::result::Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.inner.clone();
        grpc.ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {}", e)))?;
        let codec = tonic_prost::ProstCodec::default();
        let response = grpc.unary(Request::new(req), path, codec).await?;
        Ok(response.into_inner())
    }

    async fn server_streaming<Req>(
        &self,
        req: Req,
        path: PathAndQuery,
    ) -> std::result::Result<SubscriptionStream, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
    {
        let mut grpc = self.inner.clone();
        grpc.ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {}", e)))?;
        let codec = tonic_prost::ProstCodec::<Req, SubscribeReply>::default();
        let response = grpc.server_streaming(Request::new(req), path, codec).await?;
        Ok(response.into_inner().boxed())
    }
}

#[async_trait]
impl CpdRpc for TonicCpdClient {
    async fn ping(&self, req: PingRequest) -> std::result::Result<PingReply, Status> {
        self.unary(req, PathAndQuery::from_static("/core.cpd_adapter.cpd/ping"))
            .await
    }

    async fn browse_topic_names(
        &self,
        req: BrowseTopicNamesRequest,
    ) -> std::result::Result<BrowseTopicNamesReply, Status> {
        self.unary(
            req,
            PathAndQuery::from_static("/core.cpd_adapter.cpd/browseTopicNames"),
        )
        .await
    }

    async fn simple_get_latest_data(
        &self,
        req: SimpleGetLatestDataRequest,
    ) -> std::result::Result<LatestDataReply, Status> {
        self.unary(
            req,
            PathAndQuery::from_static("/core.cpd_adapter.cpd/simpleGetLatestData"),
        )
        .await
    }

    async fn get_latest_data(
        &self,
        req: GetLatestDataRequest,
    ) -> std::result::Result<LatestDataReply, Status> {
        self.unary(
            req,
            PathAndQuery::from_static("/core.cpd_adapter.cpd/getLatestData"),
        )
        .await
    }

    async fn simple_subscribe(
        &self,
        req: SimpleSubscribeRequest,
    ) -> std::result::Result<SubscriptionStream, Status> {
        self.server_streaming(
            req,
            PathAndQuery::from_static("/core.cpd_adapter.cpd/simpleSubscribe"),
        )
        .await
    }

    async fn subscribe(
        &self,
        req: SubscribeRequest,
    ) -> std::result::Result<SubscriptionStream, Status> {
        self.server_streaming(req, PathAndQuery::from_static("/core.cpd_adapter.cpd/subscribe"))
            .await
    }

    async fn unsubscribe(&self, req: UnsubscribeRequest) -> std::result::Result<Ack, Status> {
        self.unary(
            req,
            PathAndQuery::from_static("/core.cpd_adapter.cpd/unsubscribe"),
        )
        .await
    }

    async fn publish(
        &self,
        method: PublishMethod,
        req: PublishRequest,
    ) -> std::result::Result<Ack, Status> {
        self.unary(req, method.path()).await
    }
}

fn endpoint_uri(address: &str, use_tls: bool) -> String {
    if address.contains("://") {
        address.to_string()
    } else if use_tls {
        format!("https://{}", address)
    } else {
        format!("http://{}", address)
    }
}
