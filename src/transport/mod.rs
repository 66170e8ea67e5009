//! HTTP and WebSocket ingestion. Both transports reduce client messages to an
//! [`IncomingMessage`] and hand them to [`TransportContext::route`].

pub mod http;
pub mod message;
pub mod ws;

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::executor::{outcome_fields, CommandExecutor};
use crate::notify::Notifier;
use crate::service::InputDispatcher;

pub use message::{CmdResultFrame, IncomingMessage, MessageKind, SendPayload};

/// Where phones reach this desktop for the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoints {
    pub http_port: u16,
    pub ws_port: u16,
    pub url: String,
}

pub struct TransportContext {
    pub endpoints: Endpoints,
    pub dispatcher: InputDispatcher,
    pub executor: CommandExecutor,
    pub notifier: Arc<dyn Notifier>,
    pub index_page: Arc<str>,
    clients: AtomicUsize,
}

impl TransportContext {
    pub fn new(
        endpoints: Endpoints,
        dispatcher: InputDispatcher,
        executor: CommandExecutor,
        notifier: Arc<dyn Notifier>,
        index_page: Arc<str>,
    ) -> Self {
        Self {
            endpoints,
            dispatcher,
            executor,
            notifier,
            index_page,
            clients: AtomicUsize::new(0),
        }
    }

    fn client_connected(&self) -> usize {
        self.clients.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn client_disconnected(&self) -> usize {
        self.clients.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    /// Text goes through the input dispatcher and yields no reply; commands
    /// run their program and yield a `cmd_result`.
    pub async fn route(&self, message: IncomingMessage) -> Option<CmdResultFrame> {
        match message.kind {
            MessageKind::Cmd => {
                let text = message.text.trim().to_string();
                let result = self.executor.execute(&text).await;
                let (ok, message) = outcome_fields(&result);
                Some(CmdResultFrame::new(text, ok, message))
            }
            MessageKind::Text => {
                let outcome = self.dispatcher.dispatch(message.text).await;
                debug!("Text message outcome: {:?}", outcome);
                None
            }
        }
    }
}
