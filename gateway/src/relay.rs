use crate::errors::RelayError;
use axum::{
    body::{Body, Bytes},
    extract::{rejection::QueryRejection, Query, RawQuery, State},
    http::{header, HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RelayState {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    client: reqwest::Client,
    upstream_url: String,
    script_path: PathBuf,
}

impl RelayState {
    pub fn new(
        upstream_url: &str,
        script_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                upstream_url: upstream_url.trim_end_matches('/').to_string(),
                script_path: script_path.into(),
            }),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MacQuery {
    mac_address: Option<String>,
}

pub fn create_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/canaryPerformanceFromPi", post(relay_performance))
        .route("/canaryConfig", get(relay_config))
        .route("/canaryConfig/resetFlag", post(relay_reset_flag))
        .route("/getCanaryScript", get(download_script))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn relay_performance(
    State(state): State<RelayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mac = mac_from_body(&body);
    info!("Received performance data (MAC: {})", mac);

    forward(&state, Method::POST, "/api/canaryPerformanceFromPi", None, &headers, body)
        .await
        .unwrap_or_else(|e| {
            error!("Error forwarding performance data (MAC: {}): {}", mac, e);
            e.into_response()
        })
}

async fn relay_config(
    State(state): State<RelayState>,
    params: Result<Query<MacQuery>, QueryRejection>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let mac = params
        .ok()
        .and_then(|Query(q)| q.mac_address)
        .unwrap_or_else(|| "unknown".to_string());
    if mac == "unknown" {
        warn!("Missing MAC address in canaryConfig request");
    }
    info!("Received canaryConfig request (MAC: {})", mac);

    forward(
        &state,
        Method::GET,
        "/api/canaryConfig",
        query.as_deref(),
        &headers,
        Bytes::new(),
    )
    .await
    .unwrap_or_else(|e| {
        error!("Error forwarding canaryConfig request (MAC: {}): {}", mac, e);
        e.into_response()
    })
}

async fn relay_reset_flag(
    State(state): State<RelayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mac = mac_from_body(&body);
    info!("Received resetFlag request (MAC: {})", mac);

    forward(&state, Method::POST, "/api/canaryConfig/resetFlag", None, &headers, body)
        .await
        .unwrap_or_else(|e| {
            error!("Error forwarding resetFlag request (MAC: {}): {}", mac, e);
            e.into_response()
        })
}

async fn download_script(State(state): State<RelayState>) -> Result<Response, RelayError> {
    let path = &state.inner.script_path;
    info!("Serving update script from {}", path.display());

    let file = tokio::fs::File::open(path).await.map_err(|e| {
        error!("Error sending update script {}: {}", path.display(), e);
        RelayError::Script(e)
    })?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        error!("Error sending update script {}: not a regular file", path.display());
        return Err(RelayError::Script(std::io::Error::other(format!(
            "{} is not a regular file",
            path.display()
        ))));
    }
    let length = metadata.len();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("RaspberryCode.zip");

    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (header::CONTENT_LENGTH, length.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// Sends the request upstream and mirrors status, body and content type.
async fn forward(
    state: &RelayState,
    method: Method,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    let mut url = format!("{}{}", state.inner.upstream_url, path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }

    let mut request = state.inner.client.request(method, &url);
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        request = request.header(header::CONTENT_TYPE, content_type.clone());
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let upstream = request.send().await?;
    let status = upstream.status();
    let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
    let bytes = upstream.bytes().await?;

    let mut response = (status, bytes).into_response();
    match content_type {
        Some(content_type) => {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        None => {
            response.headers_mut().remove(header::CONTENT_TYPE);
        }
    }
    Ok(response)
}

/// MAC address from a JSON body, for log context only.
fn mac_from_body(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("mac_address")?.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}
