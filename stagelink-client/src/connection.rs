//! Connection manager owning the control socket.
//!
//! The [`Client`] is the single owner of the device socket. It provides:
//!
//! - Automatic reconnection with a fixed delay, retrying indefinitely
//! - Subscription replay followed by disconnect-buffer flush on every connect
//! - Request/response correlation with a per-request timeout
//! - Heartbeat exchange and liveness-forced reconnects
//!
//! Inbound frames are routed by a single discriminant: frames echoing a
//! request identifier resolve pending requests, everything else is dispatched
//! to the event handler registered for its kind.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use stagelink_core::error::{CommandError, NetworkError};

use crate::config::ClientConfig;
use crate::correlator::RequestCorrelator;
use crate::dispatcher::EventDispatcher;
use crate::heartbeat::HeartbeatMonitor;
use crate::protocol::{self, kind, Frame, SubscribeBody};
use crate::registry::SubscriptionRegistry;
use crate::state::ConnectionState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Capacity of the per-connection outbound queue.
const OUTBOUND_QUEUE_SIZE: usize = 100;

/// Control client for a StageLink processor.
///
/// Cheap to clone; clones share the same connection, subscriptions, and
/// pending requests.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a client for the device described by `config`.
    ///
    /// No connection is attempted until [`connect`](Self::connect) is called.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new(ClientInner {
            config,
            correlator: RequestCorrelator::new(),
            dispatcher: EventDispatcher::new(),
            registry: SubscriptionRegistry::new(),
            heartbeat: Arc::new(HeartbeatMonitor::new()),
            buffer: Mutex::new(VecDeque::new()),
            outbound: RwLock::new(None),
            shutdown_signal: Mutex::new(None),
            state_tx,
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });

        // Liveness is plain event handling: the inbound heartbeat kind
        // stamps the monitor through the ordinary dispatch path.
        let monitor = Arc::clone(&inner.heartbeat);
        inner
            .dispatcher
            .set_handler(kind::HEARTBEAT, Arc::new(move |_| monitor.stamp()));

        Self { inner }
    }

    /// Starts the connection supervisor.
    ///
    /// The supervisor owns the socket for the life of the client: it
    /// connects, replays subscriptions, flushes the disconnect buffer, and on
    /// any error or close schedules exactly one reconnect attempt after the
    /// configured delay, indefinitely. Calling `connect` while the
    /// supervisor is already running (or after [`close`](Self::close)) is a
    /// no-op.
    pub fn connect(&self) {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            warn!("connect() called after close(); ignoring");
            return;
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("connect() while already running; ignoring");
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            ClientInner::supervise(inner).await;
        });
    }

    /// Shuts the client down.
    ///
    /// Tears down the active connection (if any) and stops reconnecting.
    /// Requests still pending fail by their ordinary timeout.
    pub async fn close(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let signal = { self.inner.shutdown_signal.lock().take() };
        if let Some(tx) = signal {
            let _ = tx.send(()).await;
        } else if !self.inner.running.load(Ordering::SeqCst) {
            self.inner.set_state(ConnectionState::Closed);
        }
    }

    /// Returns true if the control socket is currently open.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Returns a watch of connection state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Sends a frame without awaiting a response.
    ///
    /// While disconnected, non-subscription frames are appended to the
    /// disconnect buffer and flushed in order on the next connect;
    /// subscription frames are dropped, since the registry replays them
    /// anyway.
    pub fn send(&self, frame: &Frame, subscription: bool) -> Result<(), NetworkError> {
        let text = frame.encode()?;
        self.inner.send_text(text, subscription);
        Ok(())
    }

    /// Sends a request and awaits the correlated response.
    ///
    /// Resolves with the response payload decoded as `Resp`, or fails with
    /// the device's stated failure reason, or with a timeout if no response
    /// arrives within the configured request timeout.
    pub async fn send_with_response<Req, Resp>(
        &self,
        request_kind: &str,
        request: &Req,
        subscription: bool,
    ) -> Result<Resp, CommandError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let request_id = protocol::request_id();
        let frame =
            Frame::request(request_kind, &request_id, request).map_err(CommandError::Transport)?;
        let text = frame.encode().map_err(CommandError::Transport)?;

        let rx = self.inner.correlator.register(&request_id);
        self.inner.send_text(text, subscription);

        match timeout(self.inner.config.request_timeout(), rx).await {
            Ok(Ok(result)) => result.and_then(|frame| frame.decode_payload()),
            Ok(Err(_)) => Err(CommandError::Transport(NetworkError::ConnectionClosed {
                reason: "request abandoned".to_string(),
            })),
            Err(_) => {
                self.inner.correlator.abandon(&request_id);
                debug!(request_id = %request_id, kind = %request_kind, "Request timed out");
                Err(CommandError::Timeout {
                    timeout_ms: self.inner.config.request_timeout_ms,
                })
            }
        }
    }

    /// Subscribes to a pushed event stream.
    ///
    /// Registers `handler` for `response_kind`, records the subscription
    /// payload for replay on every reconnect, and sends it immediately if
    /// connected. Subscribing again under the same response kind replaces
    /// both the handler and the recorded payload.
    pub fn subscribe<F>(
        &self,
        request_kind: &str,
        response_kind: &str,
        handler: F,
    ) -> Result<(), NetworkError>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.subscribe_inner(request_kind, response_kind, None, handler)
    }

    /// Subscribes to a polling-style event stream updated every `every`.
    pub fn subscribe_with_interval<F>(
        &self,
        request_kind: &str,
        response_kind: &str,
        every: Duration,
        handler: F,
    ) -> Result<(), NetworkError>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.subscribe_inner(request_kind, response_kind, Some(every), handler)
    }

    fn subscribe_inner<F>(
        &self,
        request_kind: &str,
        response_kind: &str,
        every: Option<Duration>,
        handler: F,
    ) -> Result<(), NetworkError>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.inner
            .dispatcher
            .set_handler(response_kind, Arc::new(handler));

        let body = SubscribeBody {
            keep_alive_ms: 0,
            response_tag: self.inner.config.response_tag.clone(),
            data_every_ms: every.map(|d| d.as_millis() as u64),
        };
        let text = Frame::subscription(request_kind, &body).encode()?;
        self.inner.registry.record(response_kind, text.clone());
        self.inner.send_text(text, true);
        Ok(())
    }

    /// Registers `handler` for inbound events of `kind`, replacing any
    /// existing handler for that kind.
    pub fn add_event_handler<F>(&self, kind: &str, handler: F)
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_handler(kind, Arc::new(handler));
    }
}

/// An outbound message queued on the active connection.
struct Outbound {
    text: String,
    subscription: bool,
}

struct ClientInner {
    config: ClientConfig,
    correlator: RequestCorrelator,
    dispatcher: EventDispatcher,
    registry: SubscriptionRegistry,
    heartbeat: Arc<HeartbeatMonitor>,
    /// Non-subscription messages awaiting the next connection, FIFO.
    buffer: Mutex<VecDeque<String>>,
    /// Sender into the active connection's outbound queue, if connected.
    outbound: RwLock<Option<mpsc::Sender<Outbound>>>,
    /// Signal tearing down the active connection without reconnecting.
    shutdown_signal: Mutex<Option<mpsc::Sender<()>>>,
    state_tx: watch::Sender<ConnectionState>,
    running: AtomicBool,
    shutdown: AtomicBool,
}

impl ClientInner {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(state = %state, "Connection state changed");
                *current = state;
                true
            }
        });
    }

    fn send_text(&self, text: String, subscription: bool) {
        let sender = self.outbound.read().clone();
        if let Some(tx) = sender {
            match tx.try_send(Outbound { text, subscription }) {
                Ok(()) => {}
                Err(
                    mpsc::error::TrySendError::Full(outbound)
                    | mpsc::error::TrySendError::Closed(outbound),
                ) => {
                    self.queue_or_drop(outbound.text, outbound.subscription);
                }
            }
        } else {
            self.queue_or_drop(text, subscription);
        }
    }

    fn queue_or_drop(&self, text: String, subscription: bool) {
        if subscription {
            // Already recorded in the registry; the next connect replays it.
            debug!("Dropping subscription send while disconnected");
        } else {
            self.buffer.lock().push_back(text);
        }
    }

    async fn supervise(inner: Arc<Self>) {
        loop {
            if inner.shutdown.load(Ordering::SeqCst) {
                break;
            }
            inner.set_state(ConnectionState::Connecting);

            let url = inner.config.url();
            match timeout(inner.config.connect_timeout(), connect_async(url.as_str())).await {
                Ok(Ok((stream, _))) => {
                    info!(host = %inner.config.host, port = inner.config.port, "Control socket connected");
                    let reason = inner.drive(stream).await;
                    if matches!(reason, DisconnectReason::Shutdown) {
                        break;
                    }
                    warn!(reason = %reason, "Control socket disconnected");
                }
                Ok(Err(e)) => {
                    let err = NetworkError::ConnectionFailed {
                        reason: e.to_string(),
                    };
                    warn!(error = %err, recoverable = err.is_recoverable(), "Connection attempt failed");
                }
                Err(_) => {
                    let err = NetworkError::Timeout {
                        timeout_ms: inner.config.connect_timeout_ms,
                    };
                    warn!(error = %err, "Connection attempt timed out");
                }
            }

            inner.set_state(ConnectionState::Disconnected);
            if inner.shutdown.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(inner.config.reconnect_delay()).await;
        }
        inner.set_state(ConnectionState::Closed);
        info!("Control client shut down");
    }

    /// Runs one connection to completion and returns why it ended.
    async fn drive(&self, stream: WsStream) -> DisconnectReason {
        let (mut sink, mut source) = stream.split();

        let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE_SIZE);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.outbound.write() = Some(send_tx);
        *self.shutdown_signal.lock() = Some(shutdown_tx);

        self.heartbeat.reset();
        self.set_state(ConnectionState::Connected);

        let reason = self
            .run_connection(&mut sink, &mut source, &mut send_rx, &mut shutdown_rx)
            .await;

        // Stop accepting new outbound traffic, then preserve anything still
        // queued for the next connection. Queued subscription frames are
        // dropped here for the same reason they are dropped while
        // disconnected: the registry replays them.
        *self.outbound.write() = None;
        *self.shutdown_signal.lock() = None;
        send_rx.close();
        {
            let mut buffer = self.buffer.lock();
            while let Ok(outbound) = send_rx.try_recv() {
                if !outbound.subscription {
                    buffer.push_back(outbound.text);
                }
            }
        }

        reason
    }

    async fn run_connection(
        &self,
        sink: &mut WsSink,
        source: &mut WsSource,
        send_rx: &mut mpsc::Receiver<Outbound>,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> DisconnectReason {
        // Every recorded subscription is resent verbatim, in registration
        // order, before the disconnect buffer is flushed.
        for payload in self.registry.payloads() {
            if let Err(e) = sink.send(Message::Text(payload)).await {
                // The registry keeps the record; the next connect retries.
                warn!(error = %e, "Failed to replay subscription");
                return DisconnectReason::SendFailed(e.to_string());
            }
        }

        let drained: Vec<String> = self.buffer.lock().drain(..).collect();
        let mut drained = drained.into_iter();
        while let Some(text) = drained.next() {
            if let Err(e) = sink.send(Message::Text(text.clone())).await {
                warn!(error = %e, "Failed to flush disconnect buffer");
                // Keep the unsent tail, in order, ahead of anything queued
                // since the drain.
                let mut buffer = self.buffer.lock();
                let mut kept: VecDeque<String> =
                    std::iter::once(text).chain(drained).collect();
                kept.extend(buffer.drain(..));
                *buffer = kept;
                return DisconnectReason::SendFailed(e.to_string());
            }
        }

        let mut heartbeat = interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Shutdown signal received");
                    let _ = sink.close().await;
                    return DisconnectReason::Shutdown;
                }

                Some(outbound) = send_rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(outbound.text.clone())).await {
                        error!(error = %e, "Failed to send message");
                        if !outbound.subscription {
                            self.buffer.lock().push_front(outbound.text);
                        }
                        return DisconnectReason::SendFailed(e.to_string());
                    }
                }

                message = source.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Binary(_))) => {
                            debug!("Ignoring binary frame");
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = sink.send(Message::Pong(data)).await {
                                warn!(error = %e, "Failed to send pong");
                            }
                        }
                        Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                            info!(reason = %reason, "Device closed the connection");
                            return DisconnectReason::ServerClosed;
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Socket error");
                            return DisconnectReason::StreamError(e.to_string());
                        }
                        None => return DisconnectReason::StreamEnded,
                    }
                }

                _ = heartbeat.tick() => {
                    if let Err(e) = sink.send(Message::Text(protocol::HEARTBEAT_TEXT.to_string())).await {
                        warn!(error = %e, "Failed to send heartbeat");
                        return DisconnectReason::SendFailed(e.to_string());
                    }
                    if self.heartbeat.expired(self.config.heartbeat_timeout()) {
                        error!(
                            silent_ms = self.heartbeat.elapsed().as_millis() as u64,
                            "No heartbeat from device; forcing reconnect"
                        );
                        let _ = sink.close().await;
                        return DisconnectReason::HeartbeatTimeout;
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };
        // Identifier presence is the sole dispatch discriminant: frames
        // echoing a request id are responses, everything else is an event.
        if frame.is_response() {
            self.correlator.complete(frame);
        } else {
            self.dispatcher.dispatch(&frame);
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DisconnectReason {
    Shutdown,
    ServerClosed,
    StreamEnded,
    StreamError(String),
    SendFailed(String),
    HeartbeatTimeout,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shutdown => write!(f, "shutdown requested"),
            Self::ServerClosed => write!(f, "device closed the connection"),
            Self::StreamEnded => write!(f, "stream ended"),
            Self::StreamError(e) => write!(f, "socket error: {e}"),
            Self::SendFailed(e) => write!(f, "send failed: {e}"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn test_config(port: u16) -> ClientConfig {
        ClientConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .reconnect_delay(Duration::from_millis(50))
            .request_timeout(Duration::from_secs(5))
            .build()
    }

    async fn bind_device() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    async fn wait_for_state(client: &Client, target: ConnectionState) {
        let mut states = client.state_changes();
        let wait = async {
            while client.state() != target {
                states.changed().await.unwrap();
            }
        };
        timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for state {target}"));
    }

    fn decode(text: &str) -> Frame {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn test_request_resolves_with_response_payload() {
        let (listener, port) = bind_device().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let frame = decode(&text);
                    if let Some(id) = frame.request_id.clone() {
                        let mut reply = Frame::event("valueResult").into_ok_response(id);
                        reply.payload.insert("value".to_string(), Value::from(42));
                        ws.send(Message::Text(reply.encode().unwrap())).await.unwrap();
                    }
                }
            }
        });

        let client = Client::new(test_config(port));
        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;

        #[derive(Debug, PartialEq, Deserialize)]
        struct ValuePayload {
            value: u32,
        }

        let response: ValuePayload = client
            .send_with_response("valueGet", &(), false)
            .await
            .unwrap();
        assert_eq!(response, ValuePayload { value: 42 });
        assert_eq!(client.inner.correlator.pending_len(), 0);

        client.close().await;
    }

    #[tokio::test]
    async fn test_rejected_request_carries_fail_reason() {
        let (listener, port) = bind_device().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let frame = decode(&text);
                    if let Some(id) = frame.request_id.clone() {
                        let reply =
                            Frame::event("valueResult").into_failed_response(id, "no such control");
                        ws.send(Message::Text(reply.encode().unwrap())).await.unwrap();
                    }
                }
            }
        });

        let client = Client::new(test_config(port));
        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;

        let result: Result<Value, _> = client.send_with_response("valueGet", &(), false).await;
        assert_eq!(
            result,
            Err(CommandError::Rejected {
                reason: "no such control".to_string()
            })
        );

        client.close().await;
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_request_and_drops_late_response() {
        let (listener, port) = bind_device().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let frame = decode(&text);
                    if let Some(id) = frame.request_id.clone() {
                        // Answer well after the client has given up.
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        let reply = Frame::event("valueResult").into_ok_response(id);
                        ws.send(Message::Text(reply.encode().unwrap())).await.unwrap();
                    }
                }
            }
        });

        let config = ClientConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .request_timeout(Duration::from_millis(100))
            .build();
        let client = Client::new(config);
        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;

        let result: Result<Value, _> = client.send_with_response("valueGet", &(), false).await;
        assert_eq!(result, Err(CommandError::Timeout { timeout_ms: 100 }));
        assert_eq!(client.inner.correlator.pending_len(), 0);

        // The late response is dropped, not resolved.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(client.inner.correlator.pending_len(), 0);
        assert!(client.connected());

        client.close().await;
    }

    #[tokio::test]
    async fn test_distinct_requests_resolve_out_of_order() {
        let (listener, port) = bind_device().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut held: Option<String> = None;
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let frame = decode(&text);
                    let Some(id) = frame.request_id.clone() else {
                        continue;
                    };
                    if frame.kind == "first" {
                        // Hold the first answer until the second request.
                        held = Some(id);
                    } else {
                        let mut reply = Frame::event("result").into_ok_response(id);
                        reply
                            .payload
                            .insert("which".to_string(), Value::from("second"));
                        ws.send(Message::Text(reply.encode().unwrap())).await.unwrap();
                        if let Some(first_id) = held.take() {
                            let mut reply = Frame::event("result").into_ok_response(first_id);
                            reply
                                .payload
                                .insert("which".to_string(), Value::from("first"));
                            ws.send(Message::Text(reply.encode().unwrap())).await.unwrap();
                        }
                    }
                }
            }
        });

        let client = Client::new(test_config(port));
        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;

        #[derive(Debug, Deserialize)]
        struct Which {
            which: String,
        }

        let first = client.send_with_response::<(), Which>("first", &(), false);
        let second = client.send_with_response::<(), Which>("second", &(), false);
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap().which, "first");
        assert_eq!(second.unwrap().which, "second");

        client.close().await;
    }

    #[tokio::test]
    async fn test_reconnect_replays_subscriptions_before_buffered_sends() {
        let (listener, port) = bind_device().await;
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Frame>();

        tokio::spawn(async move {
            // First connection: wait for the subscription, then drop.
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    if decode(&text).kind == "meterSubscribe" {
                        break;
                    }
                }
            }
            drop(ws);

            // Second connection: record every non-heartbeat frame.
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let frame = decode(&text);
                    if frame.kind != kind::HEARTBEAT {
                        frames_tx.send(frame).unwrap();
                    }
                }
            }
        });

        let client = Client::new(test_config(port));
        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;

        client
            .subscribe("meterSubscribe", "meterUpdate", |_| {})
            .unwrap();

        wait_for_state(&client, ConnectionState::Disconnected).await;

        // Queued while disconnected; must follow the replayed subscription.
        client.send(&Frame::event("volumeSet"), false).unwrap();
        client.send(&Frame::event("muteSet"), false).unwrap();

        wait_for_state(&client, ConnectionState::Connected).await;

        let replayed = frames_rx.recv().await.unwrap();
        assert_eq!(replayed.kind, "meterSubscribe");
        assert_eq!(replayed.payload.get("keepAliveMs"), Some(&Value::from(0)));

        assert_eq!(frames_rx.recv().await.unwrap().kind, "volumeSet");
        assert_eq!(frames_rx.recv().await.unwrap().kind, "muteSet");

        client.close().await;
    }

    #[tokio::test]
    async fn test_subscription_while_disconnected_is_replayed_not_buffered() {
        let (listener, port) = bind_device().await;
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Frame>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let frame = decode(&text);
                    if frame.kind != kind::HEARTBEAT {
                        frames_tx.send(frame).unwrap();
                    }
                }
            }
        });

        let client = Client::new(test_config(port));

        // Subscribed before any connection exists: recorded, not buffered.
        client
            .subscribe("buttonSubscribe", "buttonUpdate", |_| {})
            .unwrap();
        assert_eq!(client.inner.registry.len(), 1);
        assert!(client.inner.buffer.lock().is_empty());

        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;
        client.send(&Frame::event("marker"), false).unwrap();

        // Exactly one replayed subscription, then the marker.
        assert_eq!(frames_rx.recv().await.unwrap().kind, "buttonSubscribe");
        assert_eq!(frames_rx.recv().await.unwrap().kind, "marker");

        client.close().await;
    }

    #[tokio::test]
    async fn test_events_route_to_registered_handler() {
        let (listener, port) = bind_device().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut push = Frame::event("levelUpdate");
            push.payload.insert("level".to_string(), Value::from(-12));
            ws.send(Message::Text(push.encode().unwrap())).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let client = Client::new(test_config(port));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Frame>();
        client.add_event_handler("levelUpdate", move |frame| {
            let _ = events_tx.send(frame.clone());
        });
        client.connect();

        let event = timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, "levelUpdate");
        assert_eq!(event.payload.get("level"), Some(&Value::from(-12)));

        client.close().await;
    }

    #[tokio::test]
    async fn test_missing_heartbeats_force_reconnect() {
        let (listener, port) = bind_device().await;
        let connections = Arc::new(AtomicUsize::new(0));

        let accepted = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    // Swallow everything; never answer heartbeats.
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });

        let config = ClientConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .heartbeat_interval(Duration::from_millis(30))
            .heartbeat_timeout(Duration::from_millis(80))
            .reconnect_delay(Duration::from_millis(30))
            .build();
        let client = Client::new(config);
        client.connect();

        wait_for_state(&client, ConnectionState::Connected).await;
        wait_for_state(&client, ConnectionState::Disconnected).await;
        wait_for_state(&client, ConnectionState::Connected).await;

        assert!(connections.load(Ordering::SeqCst) >= 2);
        client.close().await;
    }

    #[tokio::test]
    async fn test_answered_heartbeats_keep_the_connection() {
        let (listener, port) = bind_device().await;
        let connections = Arc::new(AtomicUsize::new(0));

        let accepted = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(message)) = ws.next().await {
                        if let Message::Text(text) = message {
                            if decode(&text).kind == kind::HEARTBEAT {
                                ws.send(Message::Text(
                                    protocol::HEARTBEAT_TEXT.to_string(),
                                ))
                                .await
                                .unwrap();
                            }
                        }
                    }
                });
            }
        });

        let config = ClientConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .heartbeat_interval(Duration::from_millis(20))
            .heartbeat_timeout(Duration::from_millis(100))
            .build();
        let client = Client::new(config);
        client.connect();

        wait_for_state(&client, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(client.connected());
        assert_eq!(connections.load(Ordering::SeqCst), 1);
        client.close().await;
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (listener, port) = bind_device().await;
        let connections = Arc::new(AtomicUsize::new(0));

        let accepted = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });

        let client = Client::new(test_config(port));
        client.connect();
        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;
        client.connect();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(connections.load(Ordering::SeqCst), 1);

        client.close().await;
    }

    #[tokio::test]
    async fn test_close_reaches_terminal_state() {
        let (listener, port) = bind_device().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let client = Client::new(test_config(port));
        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;

        client.close().await;
        wait_for_state(&client, ConnectionState::Closed).await;
        assert!(!client.connected());

        // connect() after close() must not resurrect the supervisor.
        client.connect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.state(), ConnectionState::Closed);
    }
}
