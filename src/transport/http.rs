use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{IncomingMessage, SendPayload, TransportContext};

pub fn router(ctx: Arc<TransportContext>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/config", get(config))
        .route("/health", get(health))
        .route("/send", post(send))
        .with_state(ctx)
}

async fn index(State(ctx): State<Arc<TransportContext>>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        ctx.index_page.to_string(),
    )
}

async fn config(State(ctx): State<Arc<TransportContext>>) -> Json<Value> {
    let endpoints = &ctx.endpoints;
    Json(json!({
        "ws_port": endpoints.ws_port,
        "http_port": endpoints.http_port,
        "url": endpoints.url,
    }))
}

async fn health(State(ctx): State<Arc<TransportContext>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "ws_port": ctx.endpoints.ws_port,
        "http_port": ctx.endpoints.http_port,
    }))
}

async fn send(State(ctx): State<Arc<TransportContext>>, request: Request) -> Response {
    let message = read_payload(request).await.into_message();
    let text = message.text.trim().to_string();
    if text.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "message": "empty" })),
        )
            .into_response();
    }

    debug!("📨 HTTP {:?}: {}", message.kind, text);
    let message = IncomingMessage {
        kind: message.kind,
        text,
    };

    match ctx.route(message).await {
        Some(frame) => Json(frame).into_response(),
        None => Json(json!({ "ok": true })).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct FormPayload {
    #[serde(rename = "type")]
    kind: Option<String>,
    string: Option<String>,
}

/// JSON, urlencoded or multipart form; anything unreadable becomes an empty
/// payload.
async fn read_payload(request: Request) -> SendPayload {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        return match Multipart::from_request(request, &()).await {
            Ok(multipart) => read_multipart(multipart).await,
            Err(err) => {
                debug!("Unreadable multipart body: {err}");
                SendPayload::default()
            }
        };
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        return match Form::<FormPayload>::from_request(request, &()).await {
            Ok(Form(form)) => SendPayload {
                kind: form.kind,
                string: form.string.map(Value::String),
            },
            Err(err) => {
                debug!("Unreadable form body: {err}");
                SendPayload::default()
            }
        };
    }

    match Bytes::from_request(request, &()).await {
        Ok(body) => serde_json::from_slice(&body).unwrap_or_default(),
        Err(err) => {
            debug!("Unreadable request body: {err}");
            SendPayload::default()
        }
    }
}

/// Reads the `type` and `string` fields; other fields are skipped.
async fn read_multipart(mut multipart: Multipart) -> SendPayload {
    let mut payload = SendPayload::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                debug!("Unreadable multipart field: {err}");
                return SendPayload::default();
            }
        };
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name != "type" && name != "string" {
            continue;
        }
        let value = match field.text().await {
            Ok(value) => value,
            Err(err) => {
                debug!("Unreadable multipart field {name}: {err}");
                return SendPayload::default();
            }
        };
        if name == "type" {
            payload.kind = Some(value);
        } else {
            payload.string = Some(Value::String(value));
        }
    }
    payload
}

/// The HTTP server task and the signal that stops it.
pub struct HttpListener {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<io::Result<()>>,
}

impl HttpListener {
    /// Must be called from inside a tokio runtime.
    pub fn spawn(listener: std::net::TcpListener, ctx: Arc<TransportContext>) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let listener = tokio::net::TcpListener::from_std(listener)?;
        let addr = listener.local_addr()?;
        let app = router(ctx);
        let (shutdown, stop_requested) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            info!("🌐 HTTP listening on http://{}", addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_requested.await;
                })
                .await
        });

        Ok(Self {
            shutdown: Some(shutdown),
            task,
        })
    }

    pub async fn shutdown(mut self, grace: Duration) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(Ok(()))) => debug!("HTTP listener stopped"),
            Ok(Ok(Err(err))) => warn!("HTTP listener exited with error: {err}"),
            Ok(Err(err)) => warn!("HTTP listener task failed: {err}"),
            Err(_) => {
                warn!("HTTP listener did not stop within {:?}; aborting", grace);
                self.task.abort();
            }
        }
    }
}
