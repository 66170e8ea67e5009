//! Service lifecycle: port selection, listener startup and bounded shutdown.

use std::io;
use std::net::{IpAddr, Ipv4Addr, TcpListener, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigManager};
use crate::executor::CommandExecutor;
use crate::notify::Notifier;
use crate::service::InputDispatcher;
use crate::status::{ServiceSnapshot, StatusWriter};
use crate::transport::http::HttpListener;
use crate::transport::ws::{WsLimits, WsListener};
use crate::transport::{Endpoints, TransportContext};

const WS_READY_TIMEOUT: Duration = Duration::from_secs(3);
const LISTENER_STOP_TIMEOUT: Duration = Duration::from_secs(3);

const BUILTIN_INDEX_PAGE: &str = include_str!("../assets/index.html");

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no free port after {attempts} attempts starting at {start}")]
    PortExhaustion { start: u16, attempts: u16 },

    #[error("listener I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("listener failed to start: {0}")]
    ListenerFailed(String),
}

/// Ports and URL are zero/empty whenever `running` is false.
#[derive(Default)]
pub struct ServiceState {
    pub running: bool,
    pub http_port: u16,
    pub ws_port: u16,
    pub url: String,
    listeners: Option<Listeners>,
}

struct Listeners {
    http: HttpListener,
    ws: WsListener,
}

impl ServiceState {
    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            running: self.running,
            http_port: self.http_port,
            ws_port: self.ws_port,
            url: self.url.clone(),
        }
    }

    fn reset(&mut self) {
        self.running = false;
        self.http_port = 0;
        self.ws_port = 0;
        self.url.clear();
        self.listeners = None;
    }
}

/// Starts and stops both listeners. Cheap to clone; every clone drives the
/// same state, and `start`/`stop` are idempotent.
#[derive(Clone)]
pub struct ServiceController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ConfigManager,
    dispatcher: InputDispatcher,
    executor: CommandExecutor,
    notifier: Arc<dyn Notifier>,
    status: Option<StatusWriter>,
    state: Mutex<ServiceState>,
}

impl ServiceController {
    pub fn new(
        config: ConfigManager,
        dispatcher: InputDispatcher,
        notifier: Arc<dyn Notifier>,
        status: Option<StatusWriter>,
    ) -> Self {
        let executor = CommandExecutor::new(config.clone());
        Self {
            inner: Arc::new(ControllerInner {
                config,
                dispatcher,
                executor,
                notifier,
                status,
                state: Mutex::new(ServiceState::default()),
            }),
        }
    }

    pub async fn snapshot(&self) -> ServiceSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.running
    }

    pub async fn start(&self) -> Result<ServiceSnapshot, ServiceError> {
        let mut state = self.inner.state.lock().await;
        if state.running {
            debug!("Service already running");
            return Ok(state.snapshot());
        }

        let config = self.inner.config.get();
        let (http_socket, http_port) =
            bind_first_free(&config.bind_host, config.http_port, config.port_attempts)?;
        let (ws_socket, ws_port) =
            bind_first_free(&config.bind_host, config.ws_port, config.port_attempts)?;

        let host = resolve_advertised_host(&config);
        let url = connection_url(&host, http_port, ws_port);
        let ctx = Arc::new(TransportContext::new(
            Endpoints {
                http_port,
                ws_port,
                url: url.clone(),
            },
            self.inner.dispatcher.clone(),
            self.inner.executor.clone(),
            Arc::clone(&self.inner.notifier),
            load_index_page(&config),
        ));

        let http = HttpListener::spawn(http_socket, Arc::clone(&ctx))?;
        let limits = WsLimits::from_config(&config);
        let (ws, ready) = match WsListener::spawn(ws_socket, ctx, limits, LISTENER_STOP_TIMEOUT) {
            Ok(spawned) => spawned,
            Err(err) => {
                http.shutdown(LISTENER_STOP_TIMEOUT).await;
                return Err(err.into());
            }
        };

        match tokio::time::timeout(WS_READY_TIMEOUT, ready).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                http.shutdown(LISTENER_STOP_TIMEOUT).await;
                ws.shutdown(LISTENER_STOP_TIMEOUT).await;
                return Err(ServiceError::ListenerFailed(
                    "WebSocket event loop exited before accepting connections".to_string(),
                ));
            }
            Err(_) => warn!(
                "WebSocket listener not ready after {:?}; continuing",
                WS_READY_TIMEOUT
            ),
        }

        state.running = true;
        state.http_port = http_port;
        state.ws_port = ws_port;
        state.url = url.clone();
        state.listeners = Some(Listeners { http, ws });
        let snapshot = state.snapshot();
        drop(state);

        info!("✅ Service running: {}", url);
        self.inner.notifier.notify(
            "Service started",
            &format!("Open {url} on your phone (HTTP:{http_port} WS:{ws_port})"),
        );
        if let Some(status) = &self.inner.status {
            if let Err(err) = status.write(&snapshot) {
                warn!("Failed to write service status: {err:#}");
            }
        }

        Ok(snapshot)
    }

    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.running {
            debug!("Service not running");
            return;
        }

        state.running = false;
        if let Some(listeners) = state.listeners.take() {
            listeners.http.shutdown(LISTENER_STOP_TIMEOUT).await;
            listeners.ws.shutdown(LISTENER_STOP_TIMEOUT).await;
        }
        state.reset();
        drop(state);

        info!("🛑 Service stopped");
        self.inner
            .notifier
            .notify("Service stopped", "Phones can no longer send input");
        if let Some(status) = &self.inner.status {
            if let Err(err) = status.clear() {
                warn!("Failed to clear service status: {err:#}");
            }
        }
    }
}

/// Binds `start`, `start + 1`, … and returns the first listener that binds,
/// still open, together with its port.
pub fn bind_first_free(
    host: &str,
    start: u16,
    attempts: u16,
) -> Result<(TcpListener, u16), ServiceError> {
    for offset in 0..attempts {
        let Some(port) = start.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((host, port)) {
            Ok(listener) => {
                // Port 0 asks the OS for an ephemeral port.
                let bound = listener.local_addr()?.port();
                if offset > 0 {
                    info!("Port {start} busy; using {bound}");
                }
                return Ok((listener, bound));
            }
            Err(err) => debug!("Port {port} unavailable: {err}"),
        }
    }

    Err(ServiceError::PortExhaustion { start, attempts })
}

pub fn connection_url(host: &str, http_port: u16, ws_port: u16) -> String {
    format!("http://{host}:{http_port}?ws={ws_port}")
}

/// The configured host, else the address of the outbound route, else loopback.
pub fn resolve_advertised_host(config: &Config) -> String {
    if let Some(host) = config
        .advertised_host
        .as_deref()
        .map(str::trim)
        .filter(|host| !host.is_empty())
    {
        return host.to_string();
    }

    match outbound_ip() {
        Ok(ip) if !ip.is_unspecified() => ip.to_string(),
        Ok(_) => Ipv4Addr::LOCALHOST.to_string(),
        Err(err) => {
            debug!("LAN address detection failed: {err}");
            Ipv4Addr::LOCALHOST.to_string()
        }
    }
}

// Connecting a UDP socket sends nothing; it only selects a route.
fn outbound_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(("8.8.8.8", 80))?;
    Ok(socket.local_addr()?.ip())
}

fn load_index_page(config: &Config) -> Arc<str> {
    let Some(path) = config.index_path.as_deref() else {
        return Arc::from(BUILTIN_INDEX_PAGE);
    };
    match std::fs::read_to_string(path) {
        Ok(page) => Arc::from(page),
        Err(err) => {
            warn!("Failed to read index page {path}: {err}; using built-in page");
            Arc::from(BUILTIN_INDEX_PAGE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupied_range_is_exhaustion() {
        let held = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = held.local_addr().unwrap().port();

        match bind_first_free("127.0.0.1", port, 1) {
            Err(ServiceError::PortExhaustion { start, attempts }) => {
                assert_eq!(start, port);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected exhaustion, got {:?}", other.map(|(_, p)| p)),
        }
    }

    #[test]
    fn probing_stops_at_the_top_of_the_port_range() {
        let result = bind_first_free("127.0.0.1", u16::MAX, 0);
        assert!(matches!(result, Err(ServiceError::PortExhaustion { .. })));
    }

    #[test]
    fn configured_host_wins() {
        let config = Config {
            advertised_host: Some(" 192.168.1.20 ".into()),
            ..Config::default()
        };
        assert_eq!(resolve_advertised_host(&config), "192.168.1.20");
        assert_eq!(
            connection_url("192.168.1.20", 8081, 8765),
            "http://192.168.1.20:8081?ws=8765"
        );
    }

    #[test]
    fn missing_index_override_falls_back() {
        let config = Config {
            index_path: Some("/nonexistent/lanvoice/index.html".into()),
            ..Config::default()
        };
        assert_eq!(&*load_index_page(&config), BUILTIN_INDEX_PAGE);
    }
}
