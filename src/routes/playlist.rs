use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::error::{ProxyError, ProxyResult};
use crate::routes::params::RequestParams;
use crate::routes::{proxy, xtream};
use crate::services::xtream::forwarded_query;
use crate::AppState;

/// Playlist download with the configured file name
pub fn attachment(file_name: &str, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response()
}

/// GET|POST /{m3u_file_name}
///
/// Serves the playlist materialized at startup, or the Xtream `get.php`
/// flow when the configured M3U URL is the panel's own `get.php`.
pub async fn get_m3u(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ProxyResult<Response> {
    let mut params = RequestParams::from_parts(query.as_deref(), &body);
    state.auth.check_params(&params.map())?;

    if state.xtream_alias {
        params.merge_missing(forwarded_query(&state.config.m3u_url));
        return xtream::xtream_playlist(&state, &params, &headers).await;
    }

    let key = state
        .plain_playlist_key
        .as_deref()
        .ok_or_else(|| ProxyError::Internal("no playlist configured".into()))?;
    let (meta, _) = state
        .cache
        .fetch(key)
        .await
        .ok_or_else(|| ProxyError::Internal("startup playlist missing from cache".into()))?;
    let bytes = state.cache.read_blob(&meta).await?;

    Ok(attachment(&state.config.m3u_file_name, bytes))
}

/// Split `/{token}/{user}/{password}/{index}[/{basename}]`
fn track_path(path: &str) -> Option<(&str, &str, &str, &str, Option<&str>)> {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        [token, user, password, index] => Some((*token, *user, *password, *index, None)),
        [token, user, password, index, base] => Some((*token, *user, *password, *index, Some(*base))),
        _ => None,
    }
}

fn decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Fallback: relay a rewritten playlist track
pub async fn track_relay(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> ProxyResult<Response> {
    let Some((token, user, password, index, base)) = track_path(uri.path()) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    if token != state.routes.token() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    state
        .auth
        .check(Some(decode(user).as_str()), Some(decode(password).as_str()))?;

    let route = index
        .parse::<usize>()
        .ok()
        .and_then(|index| state.routes.lookup(index, base));
    let Some(route) = route else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    tracing::debug!(track = %route.name, "relaying playlist track");
    proxy::relay(&state, &route.upstream_uri, base.unwrap_or_default(), &headers, "track").await
}
