//! Xtream Codes facade
//!
//! Serves the panel endpoints Xtream-aware players expect, authenticated
//! against the proxy credentials and forwarded to the upstream panel with
//! its own credentials.

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::error::{ProxyError, ProxyResult};
use crate::routes::params::{self, RequestParams};
use crate::routes::playlist::attachment;
use crate::routes::proxy;
use crate::services::cache::Built;
use crate::services::materializer::materialize;
use crate::services::rewrite::RewriteMode;
use crate::services::xtream::catalogue::generate_live_playlist;
use crate::services::xtream::{dispatch, ProxyIdentity, XtreamAction, XtreamClient};
use crate::AppState;

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok())
}

fn panel(state: &AppState) -> ProxyResult<&XtreamClient> {
    state
        .xtream
        .as_ref()
        .ok_or_else(|| ProxyError::Internal("Xtream panel not configured".into()))
}

/// Build or serve from cache the Xtream playlist for the forwarded query
pub async fn xtream_playlist(
    state: &Arc<AppState>,
    params: &RequestParams,
    headers: &HeaderMap,
) -> ProxyResult<Response> {
    let client = panel(state)?.with_user_agent(user_agent(headers));
    let forwarded = params.forwarded();

    let bytes = if state.config.xtream_api_get {
        let output = forwarded
            .iter()
            .rev()
            .find(|(k, _)| k == "output")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        let key = format!("apiget:{}", output);
        let state = Arc::clone(state);

        state
            .cache
            .clone()
            .get_or_build(&key, move || async move {
                let config = &state.config;
                let playlist = generate_live_playlist(
                    &client,
                    &config.xtream_base_url,
                    &config.xtream_user.escape_for_path(),
                    &config.xtream_password.escape_for_path(),
                    &output,
                )
                .await?;
                Ok::<_, anyhow::Error>(build(&state, &playlist))
            })
            .await?
    } else {
        let upstream = client.get_php_url(&forwarded)?;
        let key = upstream.to_string();
        let state = Arc::clone(state);

        state
            .cache
            .clone()
            .get_or_build(&key, move || async move {
                let playlist = state.parser.parse_source(upstream.as_str()).await?;
                Ok::<_, anyhow::Error>(build(&state, &playlist))
            })
            .await?
    };

    Ok(attachment(&state.config.m3u_file_name, bytes))
}

fn build(state: &AppState, playlist: &crate::models::Playlist) -> Built {
    let materialized = materialize(
        playlist,
        RewriteMode::Xtream,
        &state.config.group_filter,
        &state.rewriter,
    );
    Built {
        track_count: materialized.entries.len(),
        bytes: materialized.bytes,
    }
}

/// GET|POST /get.php
pub async fn get_php(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ProxyResult<Response> {
    let params = RequestParams::from_parts(query.as_deref(), &body);
    state.auth.check_params(&params.map())?;
    xtream_playlist(&state, &params, &headers).await
}

async fn player_api(
    state: &AppState,
    params: &std::collections::HashMap<String, String>,
    headers: &HeaderMap,
) -> ProxyResult<Response> {
    let action = XtreamAction::from_params(params)?;
    let client = panel(state)?.with_user_agent(user_agent(headers));
    let value = dispatch(&action, &client, &ProxyIdentity::from_config(&state.config)).await?;
    Ok(Json(value).into_response())
}

/// GET /player_api.php
pub async fn player_api_get(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ProxyResult<Response> {
    let params = RequestParams::from_parts(query.as_deref(), &[]).map();
    state.auth.check_params(&params)?;
    player_api(&state, &params, &headers).await
}

/// POST /player_api.php, credentials in the URL-encoded body
pub async fn player_api_post(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ProxyResult<Response> {
    let body_params = state.auth.check_body(&body)?;
    let params = params::with_body(query.as_deref(), body_params);
    player_api(&state, &params, &headers).await
}

/// GET /xmltv.php
pub async fn xmltv(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ProxyResult<Response> {
    let params = RequestParams::from_parts(query.as_deref(), &[]).map();
    state.auth.check_params(&params)?;

    let client = panel(&state)?.with_user_agent(user_agent(&headers));
    let body = client.get_xmltv().await?;
    Ok(([(header::CONTENT_TYPE, "application/xml")], body).into_response())
}

async fn media(
    state: &AppState,
    kind: &'static str,
    (username, password, id): (String, String, String),
    headers: &HeaderMap,
) -> ProxyResult<Response> {
    state.auth.check(Some(username.as_str()), Some(password.as_str()))?;
    let path_kind = if kind == "stream" { "" } else { kind };
    let upstream = state.rewriter.xtream_media_url(path_kind, &id);
    proxy::relay(state, &upstream, &id, headers, kind).await
}

/// GET /:username/:password/:id
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(parts): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ProxyResult<Response> {
    media(&state, "stream", parts, &headers).await
}

/// GET /live/:username/:password/:id
pub async fn live(
    State(state): State<Arc<AppState>>,
    Path(parts): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ProxyResult<Response> {
    media(&state, "live", parts, &headers).await
}

/// GET /movie/:username/:password/:id
pub async fn movie(
    State(state): State<Arc<AppState>>,
    Path(parts): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ProxyResult<Response> {
    media(&state, "movie", parts, &headers).await
}

/// GET /series/:username/:password/:id
pub async fn series(
    State(state): State<Arc<AppState>>,
    Path(parts): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ProxyResult<Response> {
    media(&state, "series", parts, &headers).await
}

/// GET /hlsr/:token/:username/:password/:channel/:hash/:chunk
pub async fn hlsr(
    State(state): State<Arc<AppState>>,
    Path((token, username, password, channel, hash, chunk)): Path<(String, String, String, String, String, String)>,
    headers: HeaderMap,
) -> ProxyResult<Response> {
    state.auth.check(Some(username.as_str()), Some(password.as_str()))?;

    let target = state
        .hls
        .resolve(&channel)
        .await
        .ok_or_else(|| ProxyError::RedirectNotFound(channel.clone()))?;
    let upstream = state
        .rewriter
        .hls_chunk_url(&target.origin(), &token, &channel, &hash, &chunk);

    crate::services::metrics::RELAY_REQUESTS
        .with_label_values(&["hlsr"])
        .inc();
    proxy::stream(&state, &upstream, &headers).await
}
