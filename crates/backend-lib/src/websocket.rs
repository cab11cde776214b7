// ==================
// crates/backend-lib/src/websocket.rs
// ==================
//! Connection supervisor for the metrics stream.
//!
//! Every accepted socket walks the same path:
//!
//! ```text
//! Accepting -> Authenticating -> Relaying -> Closing -> Closed
//!                     \____________________/
//!                       auth failure (1008)
//! ```
//!
//! Nothing that happens on a connection escapes this module. Auth failures,
//! upstream errors and even panics inside the relay are turned into a close
//! frame and a log line; the subscription is released on every path.
//!
//! Once authenticated, the client's half of the socket is only watched for
//! disconnects. Data frames the client sends after the handshake are ignored.
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use dashboard_common::MetricType;
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use metrics::gauge;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::{HandshakeReader, PresentedCredentials};
use crate::error::RelayError;
use crate::relay::{ChannelRelay, FrameSink, RelayOutcome};
use crate::telemetry::{WS_ACTIVE, WS_AUTH_FAILED};
use crate::AppState;

/// Upstream sequence ended
pub const NORMAL_CLOSURE: u16 = 1000;
/// Server is shutting down
pub const GOING_AWAY: u16 = 1001;
/// Upstream failure or unexpected error
pub const INTERNAL_ERROR: u16 = 1011;
/// Client could not keep up with the stream
pub const TRY_AGAIN_LATER: u16 = 1013;

/// Lifecycle of one streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepting,
    Authenticating,
    Relaying,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Accepting, Authenticating)
                | (Authenticating, Relaying)
                | (Authenticating, Closing)
                | (Relaying, Closing)
                | (Closing, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Accepting => "accepting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Relaying => "relaying",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Streaming connections of the process and the token that ends them all
#[derive(Clone, Default)]
pub struct Connections {
    pub tracker: TaskTracker,
    pub shutdown: CancellationToken,
}

impl Connections {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    /// Number of connections still running
    pub fn open(&self) -> usize {
        self.tracker.len()
    }
}

/// What the upgrade request carried
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub metric_type: MetricType,
    pub presented: PresentedCredentials,
}

/// Write half of a socket, closed at most once.
///
/// The close frame gets the same time bound as data frames; a client that
/// stopped reading has its socket dropped instead.
pub struct WsSink<S> {
    inner: S,
    closed: bool,
    peer_closed: Arc<AtomicBool>,
    close_timeout: Duration,
}

impl<S> WsSink<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: fmt::Display,
{
    pub fn new(inner: S, peer_closed: Arc<AtomicBool>, close_timeout: Duration) -> Self {
        Self {
            inner,
            closed: false,
            peer_closed,
            close_timeout,
        }
    }

    /// Send a close frame if the connection is still open. Later calls, and
    /// calls after the client went away, do nothing.
    pub async fn close(&mut self, code: u16, reason: &str) {
        if !self.is_open() {
            tracing::trace!(code, "connection already closed, skipping close frame");
            return;
        }
        self.closed = true;

        let frame = CloseFrame {
            code,
            reason: Utf8Bytes::from(reason.to_string()),
        };
        match tokio::time::timeout(self.close_timeout, self.inner.send(Message::Close(Some(frame)))).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => tracing::debug!(code, error = %e, "close frame not delivered"),
            Err(_) => tracing::warn!(
                code,
                timeout_ms = self.close_timeout.as_millis() as u64,
                "client not reading, dropping socket without close frame"
            ),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: fmt::Display,
{
    fn is_open(&self) -> bool {
        !self.closed && !self.peer_closed.load(Ordering::SeqCst)
    }

    async fn send_text(&mut self, payload: String) -> Result<(), RelayError> {
        if !self.is_open() {
            return Err(RelayError::ClientDisconnected);
        }
        match self.inner.send(Message::Text(payload.into())).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "write to client failed");
                self.closed = true;
                Err(RelayError::ClientDisconnected)
            },
        }
    }
}

/// Reads the one handshake frame, bounded by a timeout
pub struct WsHandshakeReader<'a, St> {
    stream: &'a mut St,
    timeout: Duration,
    peer_closed: Arc<AtomicBool>,
}

impl<'a, St> WsHandshakeReader<'a, St> {
    pub fn new(stream: &'a mut St, timeout: Duration, peer_closed: Arc<AtomicBool>) -> Self {
        Self {
            stream,
            timeout,
            peer_closed,
        }
    }
}

#[async_trait]
impl<St, E> HandshakeReader for WsHandshakeReader<'_, St>
where
    St: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: fmt::Display + Send,
{
    async fn read_frame(&mut self) -> Option<String> {
        let timeout = self.timeout;
        let read = async {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => return Some(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(bytes))) => return String::from_utf8(bytes.to_vec()).ok(),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => {
                        self.peer_closed.store(true, Ordering::SeqCst);
                        return None;
                    },
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "client stream failed during handshake");
                        self.peer_closed.store(true, Ordering::SeqCst);
                        return None;
                    },
                }
            }
        };

        match tokio::time::timeout(timeout, read).await {
            Ok(frame) => frame,
            Err(_) => {
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "no handshake frame");
                None
            },
        }
    }
}

/// Keeps `ws.active` in step with running connections, even on abort
struct ActiveConnection;

impl ActiveConnection {
    fn open() -> Self {
        gauge!(WS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        gauge!(WS_ACTIVE).decrement(1.0);
    }
}

struct Session {
    state: ConnectionState,
}

impl Session {
    fn new() -> Self {
        Self {
            state: ConnectionState::Accepting,
        }
    }

    fn advance(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        tracing::trace!(from = %self.state, to = %next, "connection state");
        self.state = next;
    }
}

/// Run one accepted connection to completion.
pub async fn supervise(socket: WebSocket, state: AppState, request: ConnectionRequest) {
    let span = tracing::info_span!(
        "ws_connection",
        conn_id = %Uuid::new_v4(),
        metric_type = %request.metric_type,
    );
    run(socket, state, request).instrument(span).await;
}

async fn run(socket: WebSocket, state: AppState, request: ConnectionRequest) {
    let _active = ActiveConnection::open();
    let mut session = Session::new();
    session.advance(ConnectionState::Authenticating);

    let (sink, mut stream) = socket.split();
    let peer_closed = Arc::new(AtomicBool::new(false));
    let mut sink = WsSink::new(sink, peer_closed.clone(), state.settings.send_timeout());

    let negotiated = {
        let mut reader =
            WsHandshakeReader::new(&mut stream, state.settings.handshake_timeout(), peer_closed.clone());
        state.negotiator.negotiate(request.presented, &mut reader).await
    };

    let auth = match negotiated {
        Ok(auth) => auth,
        Err(failure) => {
            metrics::counter!(WS_AUTH_FAILED).increment(1);
            tracing::warn!(code = failure.code, reason = %failure.reason, "authentication failed");
            session.advance(ConnectionState::Closing);
            sink.close(failure.code, &failure.reason).await;
            session.advance(ConnectionState::Closed);
            return;
        },
    };

    session.advance(ConnectionState::Relaying);
    tracing::info!(
        subject = %auth.identity.subject,
        source = ?auth.source,
        "connection authenticated"
    );

    let cancel = state.connections.shutdown.child_token();
    let watcher = tokio::spawn(watch_peer(stream, peer_closed.clone(), cancel.clone()));

    let relay = ChannelRelay::new(state.backbone.clone(), state.settings.send_timeout());
    let channel = request.metric_type.channel();
    let outcome = AssertUnwindSafe(relay.relay(&channel, &mut sink, &cancel))
        .catch_unwind()
        .await;

    cancel.cancel();
    if let Err(e) = watcher.await {
        tracing::debug!(error = %e, "peer watcher ended abnormally");
    }

    session.advance(ConnectionState::Closing);
    let client_gone = peer_closed.load(Ordering::SeqCst);
    let close = match outcome {
        Ok(Ok(RelayOutcome::SinkClosed | RelayOutcome::Cancelled)) if client_gone => {
            tracing::info!("client disconnected");
            None
        },
        Ok(Ok(RelayOutcome::SinkClosed)) => {
            tracing::info!("client disconnected");
            None
        },
        Ok(Ok(RelayOutcome::Cancelled)) => {
            tracing::info!("closing connection for shutdown");
            Some((GOING_AWAY, "Server shutting down"))
        },
        Ok(Ok(RelayOutcome::Stalled)) => Some((TRY_AGAIN_LATER, "Client too slow")),
        Ok(Ok(RelayOutcome::UpstreamEnded)) => {
            tracing::info!("upstream ended");
            Some((NORMAL_CLOSURE, "Stream ended"))
        },
        Ok(Err(RelayError::ClientDisconnected)) => {
            tracing::info!("client disconnected");
            None
        },
        Ok(Err(e @ RelayError::UpstreamUnavailable(_))) => {
            tracing::error!(error = %e, %channel, "upstream unavailable");
            Some((INTERNAL_ERROR, "Upstream unavailable"))
        },
        Ok(Err(e)) => {
            tracing::error!(error = %e, %channel, "relay failed");
            Some((INTERNAL_ERROR, "Unexpected error"))
        },
        Err(panic) => {
            tracing::error!(panic = %panic_message(panic.as_ref()), %channel, "relay panicked");
            Some((INTERNAL_ERROR, "Unexpected error"))
        },
    };

    if let Some((code, reason)) = close {
        sink.close(code, reason).await;
    }
    session.advance(ConnectionState::Closed);
}

/// Drain the client's half after the handshake, flagging when it goes away
async fn watch_peer<St, E>(mut stream: St, peer_closed: Arc<AtomicBool>, cancel: CancellationToken)
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(?frame, "client sent close");
                break;
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {},
            Some(Ok(_)) => tracing::debug!("ignoring client frame after handshake"),
            Some(Err(e)) => {
                tracing::debug!(error = %e, "client stream failed");
                break;
            },
            None => break,
        }
    }
    peer_closed.store(true, Ordering::SeqCst);
    cancel.cancel();
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
