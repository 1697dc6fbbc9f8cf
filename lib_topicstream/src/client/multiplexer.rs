//! # Transport Multiplexer
//!
//! Owns one persistent WebSocket connection and correlates many concurrent
//! requests and subscriptions over it.
//!
//! ## Protocol:
//! - Outbound text frame: `{"method": .., "parameter": .., "id": <job id>}`.
//! - Inbound text frame: `{"id": <job id>, "result": ..}`.
//!
//! Job ids come from a process-lifetime counter and are never reused, not even
//! across reconnects, so a late response can never be mistaken for another
//! job's. A response whose job has no callback (already unsubscribed, or sent
//! fire-and-forget) is dropped silently.
//!
//! ## Connection lifecycle:
//! A background task runs the connect/read/write loop. Every successful open
//! emits `ConnectionEvent::Connected`. Losing an open socket, or failing the
//! very first dial, emits `ConnectionEvent::Disconnected`; further failed dials
//! while the peer stays down are only logged. After a close the task waits
//! `reconnect_delay` before dialing again. Previously active subscriptions are
//! NOT re-established by the transport; listen for `Connected` and re-issue
//! them at a higher layer.
//!
//! There is no request timeout: a request whose response never arrives keeps
//! its callback registered until `clear_task_job` is called.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TopicStreamError};

/// Identifier correlating one request or subscription with its responses.
pub type JobId = u64;

/// Invoked with `(job id, result)` for every response to a job.
pub type JobCallback = Arc<dyn Fn(JobId, Value) + Send + Sync>;

/// Connectivity changes, broadcast to every listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

/// The seam between the registry and the wire.
///
/// `Multiplexer` is the production implementation; the registry only needs
/// these two operations.
pub trait RequestTransport: Send + Sync {
    /// Sends a request and returns its job id. `callback` receives every
    /// response carrying that id until `clear_task_job` is called.
    fn send_request(
        &self,
        method: &str,
        parameter: Value,
        callback: Option<JobCallback>,
    ) -> Result<JobId>;

    /// Forgets the callback for `job_id`. Later responses are dropped.
    fn clear_task_job(&self, job_id: JobId);
}

/// Configuration for the multiplexed connection.
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// WebSocket endpoint, e.g. `ws://host:9010/ws`.
    pub url: String,
    /// Pause between a close and the next connect attempt.
    pub reconnect_delay: Duration,
    /// How often `connect()` polls the ready state.
    pub ready_poll_interval: Duration,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9010/ws".to_string(),
            reconnect_delay: Duration::from_secs(1),
            ready_poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    method: &'a str,
    parameter: &'a Value,
    id: JobId,
}

#[derive(Deserialize)]
struct InboundFrame {
    id: JobId,
    #[serde(default)]
    result: Value,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct MuxInner {
    config: MultiplexerConfig,
    next_job: AtomicU64,
    tasks: Mutex<HashMap<JobId, JobCallback>>,
    /// Sender into the live socket's write half; `None` while disconnected.
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    open: AtomicBool,
    /// Set once `Disconnected` has been announced for the current outage.
    down_reported: AtomicBool,
    started: AtomicBool,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
}

impl MuxInner {
    /// Connect, serve, wait, repeat, until shutdown.
    async fn run(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            log::info!("Connecting to {}", self.config.url);
            match connect_async(self.config.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    log::info!("Connected to {}", self.config.url);
                    self.serve(ws_stream).await;
                }
                Err(e) => {
                    log::error!("Failed to connect to {}: {}", self.config.url, e);
                    self.mark_closed();
                }
            }

            log::info!(
                "Socket is closed. Reconnect will be attempted in {} ms.",
                self.config.reconnect_delay.as_millis()
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(self.config.reconnect_delay) => {}
            }
        }
        log::info!("Multiplexer loop for {} stopped", self.config.url);
    }

    /// Pumps one open socket until it closes or errors.
    async fn serve(&self, ws_stream: WsStream) {
        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        *self.outbound.lock().expect("Multiplexer lock poisoned") = Some(tx);
        self.open.store(true, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Connected);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.close().await;
                    break;
                }
                Some(msg) = rx.recv() => {
                    if let Err(e) = write.send(msg).await {
                        log::error!("Socket write failed: {}", e);
                        break;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => self.on_frame(text.as_str()),
                        Some(Ok(WsMessage::Binary(bin))) => match std::str::from_utf8(&bin) {
                            Ok(text) => self.on_frame(text),
                            Err(_) => log::warn!("Dropping non UTF-8 binary frame ({} bytes)", bin.len()),
                        },
                        Some(Ok(WsMessage::Close(frame))) => {
                            log::info!("Socket closed by remote: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::error!("Socket encountered error: {}. Closing socket", e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        self.mark_closed();
    }

    fn mark_closed(&self) {
        *self.outbound.lock().expect("Multiplexer lock poisoned") = None;
        let was_open = self.open.swap(false, Ordering::SeqCst);
        let already_reported = self.down_reported.swap(true, Ordering::SeqCst);
        if was_open || !already_reported {
            let _ = self.events.send(ConnectionEvent::Disconnected);
        }
    }

    fn on_frame(&self, text: &str) {
        match self.dispatch(text) {
            Ok(()) => {}
            Err(TopicStreamError::UnknownJob(id)) => {
                log::trace!("No task for job {}, response dropped", id);
            }
            Err(e) => log::warn!("Dropping inbound frame: {}", e),
        }
    }

    fn dispatch(&self, text: &str) -> Result<()> {
        let frame: InboundFrame = serde_json::from_str(text)
            .map_err(|e| TopicStreamError::MalformedMessage(e.to_string()))?;

        // Clone the callback out so it runs without the table locked.
        let callback = self
            .tasks
            .lock()
            .expect("Multiplexer lock poisoned")
            .get(&frame.id)
            .cloned()
            .ok_or(TopicStreamError::UnknownJob(frame.id))?;

        callback(frame.id, frame.result);
        Ok(())
    }
}

/// Handle to the multiplexed connection. Clones share the same socket,
/// job counter and callback table.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MuxInner>,
}

impl Multiplexer {
    pub fn new(config: MultiplexerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MuxInner {
                config,
                next_job: AtomicU64::new(0),
                tasks: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                open: AtomicBool::new(false),
                down_reported: AtomicBool::new(false),
                started: AtomicBool::new(false),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Starts the connection loop (once) and resolves when the socket is open.
    ///
    /// The ready state is polled rather than taken from the `Connected` event,
    /// so a caller that races the open still sees it.
    pub async fn connect(&self) -> Result<()> {
        if !self.inner.started.swap(true, Ordering::SeqCst) {
            tokio::spawn(Arc::clone(&self.inner).run());
        }

        let mut ticker = interval(self.inner.config.ready_poll_interval);
        loop {
            if self.is_open() {
                return Ok(());
            }
            if self.inner.shutdown.is_cancelled() {
                return Err(TopicStreamError::TransportDisconnected);
            }
            ticker.tick().await;
        }
    }

    /// Stops the connection loop and closes the socket. No reconnect follows.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Subscribes to `Connected`/`Disconnected` events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Number of jobs that still have a callback registered.
    pub fn pending_jobs(&self) -> usize {
        self.inner.tasks.lock().expect("Multiplexer lock poisoned").len()
    }
}

impl RequestTransport for Multiplexer {
    fn send_request(
        &self,
        method: &str,
        parameter: Value,
        callback: Option<JobCallback>,
    ) -> Result<JobId> {
        let outbound = self.inner.outbound.lock().expect("Multiplexer lock poisoned");
        let sender = outbound
            .as_ref()
            .ok_or(TopicStreamError::TransportDisconnected)?;

        let job_id = self.inner.next_job.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&OutboundFrame {
            method,
            parameter: &parameter,
            id: job_id,
        })?;

        if let Some(cb) = callback {
            self.inner
                .tasks
                .lock()
                .expect("Multiplexer lock poisoned")
                .insert(job_id, cb);
        }

        if sender.send(WsMessage::Text(text.into())).is_err() {
            self.clear_task_job(job_id);
            return Err(TopicStreamError::TransportDisconnected);
        }

        log::debug!("Sent {} request as job {}", method, job_id);
        Ok(job_id)
    }

    fn clear_task_job(&self, job_id: JobId) {
        self.inner
            .tasks
            .lock()
            .expect("Multiplexer lock poisoned")
            .remove(&job_id);
    }
}
