use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::{IncomingMessage, TransportContext};
use crate::config::Config;

const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Per-connection bounds: message size, and how long a silent peer may keep
/// its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsLimits {
    pub max_message_bytes: usize,
    /// `None` disables keepalive pings.
    pub ping_interval: Option<Duration>,
    pub ping_timeout: Duration,
}

impl WsLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_message_bytes: config.ws_max_message_bytes,
            ping_interval: (config.ws_ping_interval_ms > 0)
                .then(|| Duration::from_millis(config.ws_ping_interval_ms)),
            ping_timeout: Duration::from_millis(config.ws_ping_timeout_ms),
        }
    }

    fn socket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_bytes);
        config.max_frame_size = Some(self.max_message_bytes);
        config
    }
}

/// The WebSocket server, running its own single-threaded event loop on a
/// dedicated OS thread.
pub struct WsListener {
    shutdown: Option<oneshot::Sender<()>>,
    finished: Option<oneshot::Receiver<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WsListener {
    /// Returns the listener and a receiver that fires once the loop accepts
    /// connections. It errors if the loop died before getting there.
    pub fn spawn(
        listener: std::net::TcpListener,
        ctx: Arc<TransportContext>,
        limits: WsLimits,
        drain_timeout: Duration,
    ) -> io::Result<(Self, oneshot::Receiver<()>)> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name("ws-listener".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => {
                        runtime.block_on(run_event_loop(
                            listener,
                            ctx,
                            limits,
                            ready_tx,
                            shutdown_rx,
                            drain_timeout,
                        ));
                        runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
                    }
                    Err(err) => error!("Failed to build WebSocket event loop: {err}"),
                }
                let _ = finished_tx.send(());
            })?;

        Ok((
            Self {
                shutdown: Some(shutdown_tx),
                finished: Some(finished_rx),
                thread: Some(thread),
            },
            ready_rx,
        ))
    }

    /// Stops accepting, cancels every connection task and joins the thread,
    /// each step bounded by `timeout`.
    pub async fn shutdown(mut self, timeout: Duration) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        if let Some(finished) = self.finished.take() {
            let bound = timeout + RUNTIME_SHUTDOWN_GRACE + timeout;
            if tokio::time::timeout(bound, finished).await.is_err() {
                warn!("WebSocket loop did not stop within {:?}; detaching thread", bound);
                return;
            }
        }

        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => debug!("WebSocket thread joined"),
                Ok(Err(_)) => error!("WebSocket thread panicked"),
                Err(err) => warn!("Failed to join WebSocket thread: {err}"),
            }
        }
    }
}

async fn run_event_loop(
    listener: std::net::TcpListener,
    ctx: Arc<TransportContext>,
    limits: WsLimits,
    ready: oneshot::Sender<()>,
    mut shutdown: oneshot::Receiver<()>,
    drain_timeout: Duration,
) {
    let listener = match into_tokio_listener(listener) {
        Ok(listener) => listener,
        Err(err) => {
            error!("WebSocket listener unusable: {err}");
            return;
        }
    };
    let _ = ready.send(());
    match listener.local_addr() {
        Ok(addr) => info!("🔌 WebSocket listening on ws://{}", addr),
        Err(_) => info!("🔌 WebSocket listening on port {}", ctx.endpoints.ws_port),
    }

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(handle_connection(stream, peer, Arc::clone(&ctx), limits));
                }
                Err(err) => {
                    warn!("WebSocket accept failed: {err}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(err) = finished {
                    if err.is_panic() {
                        error!("WebSocket connection task panicked");
                    }
                }
            }
        }
    }

    drop(listener);
    let open = connections.len();
    connections.abort_all();
    let drained = tokio::time::timeout(drain_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    match drained {
        Ok(()) => debug!("Cancelled {open} WebSocket connection task(s)"),
        Err(_) => warn!("WebSocket tasks still running after {:?}", drain_timeout),
    }
}

fn into_tokio_listener(listener: std::net::TcpListener) -> io::Result<TcpListener> {
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

/// Counts a connected phone; the disconnect side runs even when the task is
/// aborted during shutdown.
struct ClientPresence {
    ctx: Arc<TransportContext>,
}

impl ClientPresence {
    fn enter(ctx: Arc<TransportContext>) -> Self {
        let count = ctx.client_connected();
        ctx.notifier.notify(
            "Phone connected",
            &format!(
                "clients: {count} (HTTP:{} WS:{})",
                ctx.endpoints.http_port, ctx.endpoints.ws_port
            ),
        );
        Self { ctx }
    }
}

impl Drop for ClientPresence {
    fn drop(&mut self) {
        let count = self.ctx.client_disconnected();
        self.ctx
            .notifier
            .notify("Phone disconnected", &format!("clients: {count}"));
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<TransportContext>,
    limits: WsLimits,
) {
    let socket =
        match tokio_tungstenite::accept_async_with_config(stream, Some(limits.socket_config()))
            .await
        {
            Ok(socket) => socket,
            Err(err) => {
                debug!("WebSocket handshake with {peer} failed: {err}");
                return;
            }
        };

    let _presence = ClientPresence::enter(Arc::clone(&ctx));
    let (mut sink, mut frames) = socket.split();

    let mut keepalive = limits.ping_interval.map(|every| {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let text = tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Pong(_))) => {
                    pong_deadline = None;
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    debug!("WebSocket {peer} closed: {err}");
                    break;
                }
            },
            _ = next_tick(&mut keepalive) => {
                if pong_deadline.is_none() {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                    pong_deadline = Some(Instant::now() + limits.ping_timeout);
                }
                continue;
            }
            _ = sleep_until(pong_deadline) => {
                info!("WebSocket {peer} stopped answering pings; closing");
                break;
            }
        };

        let Some(message) = IncomingMessage::from_frame(&text) else {
            continue;
        };
        info!("📨 {peer} {:?}: {}", message.kind, message.text);

        let Some(reply) = ctx.route(message).await else {
            continue;
        };
        let json = match serde_json::to_string(&reply) {
            Ok(json) => json,
            Err(err) => {
                warn!("Failed to encode command result: {err}");
                continue;
            }
        };
        if let Err(err) = sink.send(Message::Text(json)).await {
            debug!("WebSocket {peer} went away before reply: {err}");
            break;
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
