//! Transport channel: connection lifecycle, send retry, reconnect policy.
//!
//! ## Lifecycle
//!
//! ```text
//! connect() ──▸ Connecting ──▸ Open ──▸ (abnormal close) ──▸ Disconnected
//!                  │                                             │
//!                  └── open failed ──▸ Disconnected              │
//!                             ▲                                  │
//!                             └────── reconnect after delay ─────┘
//! ```
//!
//! Every close schedules exactly one reconnect attempt after a fixed delay,
//! indefinitely — no exponential growth, no attempt cap. A generation
//! counter ties each socket task to the connect() call that spawned it, so
//! a stale task observing its own teardown cannot clobber a successor's
//! state.
//!
//! ## Send discipline
//!
//! `send` while Open transmits in call order. While closed it parks the
//! frame, kicks a connect, and arms one retry timer. Reopening first
//! flushes the parked frames in order and cancels the timer; the timer
//! firing first surfaces each parked frame as [`ChannelEvent::SendFailed`].
//! Either way a frame is attempted at most twice and duplicated never.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{ChannelEvent, ConnectionState, Frame};
use crate::config::ChatConfig;

/// Capacity of the writer queue and the event broadcast ring.
const QUEUE_CAPACITY: usize = 256;

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    WsMessage,
>;
type WsSource = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ── Configuration ─────────────────────────────────────────────────

/// Timing and endpoint parameters for the channel.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket endpoint URL.
    pub endpoint: String,
    /// Fixed delay before each scheduled reconnect attempt.
    pub reconnect_delay: Duration,
    /// Delay before the single retry of a send issued while closed.
    pub send_retry_delay: Duration,
}

impl From<&ChatConfig> for TransportConfig {
    fn from(config: &ChatConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            reconnect_delay: config.reconnect_delay(),
            send_retry_delay: config.send_retry_delay(),
        }
    }
}

// ── Channel internals ─────────────────────────────────────────────

/// The owned connection slot. State, writer handle, and generation move
/// together under one lock so observers never see them disagree.
struct ConnSlot {
    state: ConnectionState,
    writer: Option<mpsc::Sender<Frame>>,
    generation: u64,
}

/// Frames parked while the channel is closed, plus their single retry timer.
#[derive(Default)]
struct PendingSends {
    frames: Vec<Frame>,
    retry: Option<JoinHandle<()>>,
}

struct ChannelInner {
    config: TransportConfig,
    conn: Mutex<ConnSlot>,
    pending: Mutex<PendingSends>,
    events: broadcast::Sender<ChannelEvent>,
    shutdown: AtomicBool,
}

/// Handle to the transport channel. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct TransportChannel {
    inner: Arc<ChannelInner>,
}

impl TransportChannel {
    pub fn new(config: TransportConfig) -> Self {
        let (events, _) = broadcast::channel(QUEUE_CAPACITY);
        Self {
            inner: Arc::new(ChannelInner {
                config,
                conn: Mutex::new(ConnSlot {
                    state: ConnectionState::Disconnected,
                    writer: None,
                    generation: 0,
                }),
                pending: Mutex::new(PendingSends::default()),
                events,
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to the channel's event stream. Each subscriber receives
    /// every event independently.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.conn.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.inner.conn.lock().state == ConnectionState::Open
    }

    /// Begin opening a connection. No-op while one is already Connecting or
    /// Open — two simultaneous sockets can never exist.
    pub fn connect(&self) {
        begin_connect(&self.inner);
    }

    /// Best-effort send: transmit if Open, otherwise hand the frame back.
    /// Used by the live-audio path, where a stale chunk is worse than a
    /// dropped one.
    pub fn try_send(&self, frame: Frame) -> Result<(), Frame> {
        try_send_inner(&self.inner, frame)
    }

    /// Send a frame. Never returns an error: while Open this transmits in
    /// call order; while closed the frame is parked, a connect is kicked,
    /// and exactly one deferred retry is armed. Terminal failure surfaces
    /// as [`ChannelEvent::SendFailed`].
    pub fn send(&self, frame: Frame) {
        let frame = match try_send_inner(&self.inner, frame) {
            Ok(()) => return,
            Err(frame) => frame,
        };

        tracing::warn!(
            kind = frame.kind(),
            bytes = frame.len(),
            "transport not open; parking frame and scheduling one retry"
        );
        begin_connect(&self.inner);

        let mut pending = self.inner.pending.lock();
        pending.frames.push(frame);
        if pending.retry.is_none() {
            let inner = Arc::clone(&self.inner);
            pending.retry = Some(tokio::spawn(async move {
                tokio::time::sleep(inner.config.send_retry_delay).await;
                let frames = {
                    let mut pending = inner.pending.lock();
                    pending.retry = None;
                    std::mem::take(&mut pending.frames)
                };
                for frame in frames {
                    if let Err(frame) = try_send_inner(&inner, frame) {
                        tracing::warn!(
                            kind = frame.kind(),
                            bytes = frame.len(),
                            "send retry failed; surfacing to subscribers"
                        );
                        let _ = inner.events.send(ChannelEvent::SendFailed(frame));
                    }
                }
            }));
        }
    }

    /// Graceful shutdown: close the socket and stop the reconnect cycle.
    /// Parked frames are discarded.
    pub fn close(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        {
            let mut pending = self.inner.pending.lock();
            if let Some(timer) = pending.retry.take() {
                timer.abort();
            }
            pending.frames.clear();
        }
        let mut slot = self.inner.conn.lock();
        if slot.state == ConnectionState::Open {
            slot.state = ConnectionState::Closing;
        }
        // Dropping the writer handle lets the writer task send a Close
        // frame and end; the reader observes the close and tears down.
        slot.writer = None;
    }
}

// ── Connection driving ────────────────────────────────────────────

fn begin_connect(inner: &Arc<ChannelInner>) {
    if inner.shutdown.load(Ordering::SeqCst) {
        return;
    }
    let generation = {
        let mut slot = inner.conn.lock();
        match slot.state {
            ConnectionState::Connecting | ConnectionState::Open => return,
            ConnectionState::Disconnected | ConnectionState::Closing => {}
        }
        slot.state = ConnectionState::Connecting;
        slot.generation += 1;
        slot.generation
    };
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        run_connection(inner, generation).await;
    });
}

/// Schedule the one reconnect attempt that follows a close or failed open.
fn schedule_reconnect(inner: &Arc<ChannelInner>) {
    if inner.shutdown.load(Ordering::SeqCst) {
        return;
    }
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(inner.config.reconnect_delay).await;
        begin_connect(&inner);
    });
}

fn try_send_inner(inner: &ChannelInner, frame: Frame) -> Result<(), Frame> {
    let writer = inner.conn.lock().writer.clone();
    match writer {
        Some(tx) => tx.try_send(frame).map_err(|e| e.into_inner()),
        None => Err(frame),
    }
}

/// Flush frames parked while closed, in their original send order, and
/// cancel the pending retry timer so nothing is sent twice.
fn flush_pending(inner: &Arc<ChannelInner>) {
    let frames = {
        let mut pending = inner.pending.lock();
        if let Some(timer) = pending.retry.take() {
            timer.abort();
        }
        std::mem::take(&mut pending.frames)
    };
    for frame in frames {
        if let Err(frame) = try_send_inner(inner, frame) {
            let _ = inner.events.send(ChannelEvent::SendFailed(frame));
        }
    }
}

async fn run_connection(inner: Arc<ChannelInner>, generation: u64) {
    let ws = match connect_async(&inner.config.endpoint).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            tracing::warn!(
                endpoint = %inner.config.endpoint,
                error = %e,
                "connection attempt failed"
            );
            let current = {
                let mut slot = inner.conn.lock();
                if slot.generation == generation {
                    slot.state = ConnectionState::Disconnected;
                    true
                } else {
                    false
                }
            };
            if current {
                schedule_reconnect(&inner);
            }
            return;
        }
    };

    let (sink, source) = ws.split();
    let (writer_tx, writer_rx) = mpsc::channel::<Frame>(QUEUE_CAPACITY);

    {
        let mut slot = inner.conn.lock();
        if slot.generation != generation || inner.shutdown.load(Ordering::SeqCst) {
            // Superseded while the handshake was in flight; discard the
            // socket without touching the successor's state.
            drop(slot);
            tokio::spawn(close_quietly(sink));
            return;
        }
        slot.state = ConnectionState::Open;
        slot.writer = Some(writer_tx);
    }

    tracing::info!(endpoint = %inner.config.endpoint, "transport connected");
    let _ = inner.events.send(ChannelEvent::Connected);
    flush_pending(&inner);

    tokio::spawn(writer_loop(sink, writer_rx));
    reader_loop(&inner, generation, source).await;
}

async fn close_quietly(mut sink: WsSink) {
    let _ = sink.send(WsMessage::Close(None)).await;
}

/// Writer: drains the frame queue into the socket in order. Ends when the
/// queue closes (graceful shutdown, with a Close frame) or the socket
/// rejects a write (the reader will observe the failure).
async fn writer_loop(mut sink: WsSink, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let message = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(bytes) => WsMessage::Binary(bytes.into()),
        };
        if sink.send(message).await.is_err() {
            return;
        }
    }
    let _ = sink.send(WsMessage::Close(None)).await;
}

/// Reader: classifies each inbound frame by payload kind and publishes it
/// as exactly one event. On close or error, tears down the slot and
/// schedules the next reconnect.
async fn reader_loop(inner: &Arc<ChannelInner>, generation: u64, mut source: WsSource) {
    while let Some(result) = source.next().await {
        match result {
            Ok(WsMessage::Text(text)) => {
                let _ = inner.events.send(ChannelEvent::Text(text.as_str().to_owned()));
            }
            Ok(WsMessage::Binary(bytes)) => {
                let _ = inner.events.send(ChannelEvent::Binary(bytes.to_vec()));
            }
            Ok(WsMessage::Close(frame)) => {
                tracing::info!(close_frame = ?frame, "peer closed the connection");
                break;
            }
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {
                // Handled by tungstenite automatically
            }
            Err(e) => {
                tracing::warn!(error = %e, "websocket read error");
                break;
            }
        }
    }

    let current = {
        let mut slot = inner.conn.lock();
        if slot.generation == generation {
            slot.state = ConnectionState::Disconnected;
            slot.writer = None;
            true
        } else {
            false
        }
    };
    if current {
        let _ = inner.events.send(ChannelEvent::Disconnected);
        schedule_reconnect(inner);
    }
}

// ── Tests ──────────────────────────────────────────────────────────
