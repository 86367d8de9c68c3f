use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::TryStreamExt;
use reqwest::Client;
use url::Url;

use crate::error::{ProxyError, ProxyResult};
use crate::models::redact_url;
use crate::services::hls::RedirectTarget;
use crate::services::metrics;
use crate::AppState;

/// Client headers passed on to media origins
const FORWARDED_REQUEST_HEADERS: [&str; 3] = ["range", "accept", "user-agent"];

/// Connection-scoped headers never copied from the upstream response
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.contains(&name) || name.starts_with("proxy-")
}

fn upstream_get(client: &Client, url: &str, headers: &HeaderMap) -> reqwest::RequestBuilder {
    let mut request = client.get(url);
    for name in FORWARDED_REQUEST_HEADERS {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            request = request.header(name, value);
        }
    }
    request
}

/// Copy upstream headers, joining repeated values with ", "
fn copy_headers(upstream: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in upstream.keys() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        let joined = upstream
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");

        // reqwest and axum depend on different `http` majors
        match (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_str(&joined),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::debug!(header = name.as_str(), "skipping unrepresentable header"),
        }
    }
    headers
}

fn status_of(upstream: &reqwest::Response) -> StatusCode {
    StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY)
}

/// Status, headers and an unbuffered body straight from upstream
fn passthrough(upstream: reqwest::Response) -> Response {
    let status = status_of(&upstream);
    let headers = copy_headers(upstream.headers());

    // reqwest errors embed the upstream URL
    let body = upstream.bytes_stream().inspect_err(|e| {
        tracing::warn!(timeout = e.is_timeout(), "upstream stream interrupted");
    });

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Relay a media request. Identifiers ending in `.m3u8` take the
/// redirect-aware HLS path.
pub async fn relay(
    state: &AppState,
    upstream_url: &str,
    id: &str,
    headers: &HeaderMap,
    kind: &'static str,
) -> ProxyResult<Response> {
    if id.ends_with(".m3u8") {
        metrics::RELAY_REQUESTS.with_label_values(&["hls"]).inc();
        return hls_manifest(state, upstream_url, id, headers).await;
    }

    metrics::RELAY_REQUESTS.with_label_values(&[kind]).inc();
    stream(state, upstream_url, headers).await
}

/// Direct streaming copy
pub async fn stream(state: &AppState, upstream_url: &str, headers: &HeaderMap) -> ProxyResult<Response> {
    tracing::debug!(upstream = %state.redacted(upstream_url), "relaying stream");

    let upstream = upstream_get(&state.relay_client, upstream_url, headers)
        .send()
        .await?;
    Ok(passthrough(upstream))
}

async fn hls_manifest(
    state: &AppState,
    upstream_url: &str,
    id: &str,
    headers: &HeaderMap,
) -> ProxyResult<Response> {
    let upstream = upstream_get(&state.hls_client, upstream_url, headers)
        .send()
        .await?;

    if upstream.status() != reqwest::StatusCode::FOUND {
        return Ok(passthrough(upstream));
    }

    let location = upstream
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ProxyError::RedirectResolution("302 without Location".into()))?;
    let location = Url::parse(upstream_url)
        .and_then(|base| base.join(location))
        .map_err(|e| ProxyError::RedirectResolution(e.to_string()))?;

    if !location.as_str().contains(id) {
        return Err(ProxyError::RedirectResolution(format!(
            "redirect does not target stream {}",
            id
        )));
    }

    let target = RedirectTarget::from_location(&location, Utc::now())
        .ok_or_else(|| ProxyError::RedirectResolution("redirect without host".into()))?;
    state.hls.remember(id.trim_end_matches(".m3u8"), target).await;

    let manifest = upstream_get(&state.relay_client, location.as_str(), headers)
        .send()
        .await?;
    let content_type = manifest
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/vnd.apple.mpegurl")
        .to_string();
    let body = manifest.text().await?;

    tracing::info!(
        id,
        origin = %redact_url(location.as_str(), &state.upstream_secrets()),
        "HLS manifest redirected"
    );

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        state.rewriter.swap_text_credentials(&body),
    )
        .into_response())
}
