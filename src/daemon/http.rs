//! Optional HTTP surface mirroring the socket methods.
//!
//! | Route         | Socket method  |
//! |---------------|----------------|
//! | `POST /speak` | `speak`        |
//! | `GET /status` | `status`       |
//! | `GET /queue`  | `queue_status` |
//!
//! Every body is `{success, message, data}`.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::core::DaemonState;
use crate::error::SpeakError;
use crate::pipeline::SpeakRequest;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    pub data: Option<Value>,
}

impl Envelope {
    fn ok(message: impl Into<String>, data: impl Serialize) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: serde_json::to_value(data).ok(),
        })
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid or missing API key")]
    Unauthorized,

    #[error(transparent)]
    Speak(#[from] SpeakError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Speak(err) => match err {
                SpeakError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                SpeakError::NotFound(_) => StatusCode::NOT_FOUND,
                SpeakError::Auth(_) | SpeakError::Api { .. } => StatusCode::BAD_GATEWAY,
                SpeakError::Playback(_) | SpeakError::Io(_) => {
                    error!(error = %err, "speak request failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        };
        let body = Json(Envelope {
            success: false,
            message: self.to_string(),
            data: None,
        });
        (status, body).into_response()
    }
}

#[derive(Clone)]
struct HttpState {
    daemon: Arc<DaemonState>,
    api_key: Option<Arc<str>>,
}

/// Build the router. `api_key`, when set, is required on every request.
pub fn router(daemon: Arc<DaemonState>, api_key: Option<String>) -> Router {
    let state = HttpState {
        daemon,
        api_key: api_key.filter(|k| !k.is_empty()).map(Arc::from),
    };

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.to_str().is_ok_and(is_local_origin)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(API_KEY_HEADER),
        ]);

    Router::new()
        .route("/speak", post(speak))
        .route("/status", get(status))
        .route("/queue", get(queue))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve in the background.
pub async fn spawn(
    daemon: Arc<DaemonState>,
    addr: SocketAddr,
    api_key: Option<String>,
) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding HTTP listener on {addr}"))?;
    let auth = api_key.is_some();
    let app = router(daemon, api_key);
    info!(%addr, auth, "HTTP API listening");
    Ok(tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "HTTP server stopped");
        }
    }))
}

async fn speak(
    State(state): State<HttpState>,
    payload: Result<Json<SpeakRequest>, JsonRejection>,
) -> Result<Json<Envelope>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    let queued = request.queue;
    let result = state.daemon.submit(request).await?;
    let message = if queued {
        "Speech queued"
    } else {
        "Speech completed"
    };
    Ok(Envelope::ok(message, result))
}

async fn status(State(state): State<HttpState>) -> Json<Envelope> {
    Envelope::ok("Daemon running", state.daemon.status())
}

async fn queue(State(state): State<HttpState>) -> Json<Envelope> {
    Envelope::ok("Queue status", state.daemon.queue_status())
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key);
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn require_api_key(
    State(state): State<HttpState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }
    if let Some(expected) = &state.api_key
        && presented_key(request.headers()) != Some(expected.as_ref())
    {
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let value = HeaderValue::from_str(&request_id).ok();
    if let Some(v) = &value {
        request.headers_mut().insert("x-request-id", v.clone());
    }
    let mut response = next.run(request).await;
    if let Some(v) = value {
        response.headers_mut().insert("x-request-id", v);
    }
    response
}

/// `http(s)://` origins on localhost, loopback, private or link-local hosts.
pub fn is_local_origin(origin: &str) -> bool {
    let Ok(url) = url::Url::parse(origin) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    match url.host() {
        Some(url::Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Some(url::Host::Ipv4(ip)) => is_local_ip(IpAddr::V4(ip)),
        Some(url::Host::Ipv6(ip)) => is_local_ip(IpAddr::V6(ip)),
        None => false,
    }
}

fn is_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_local_ip(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}
