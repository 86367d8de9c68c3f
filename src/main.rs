mod config;
mod error;
mod models;
mod routes;
mod services;

use anyhow::Context;
use axum::{
    routing::get,
    Router,
};
use chrono::Utc;
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::models::{redact_url, Credential};
use crate::services::{
    auth::AuthGate,
    cache::{Built, PlaylistCache},
    cleanup::{start_cleanup_task, CleanupConfig},
    hls::HlsRedirectTable,
    m3u_parser::M3UParser,
    materializer::materialize,
    rewrite::{RewriteMode, UrlRewriter},
    route_table::RouteTable,
    xtream::{is_xtream_alias, XtreamClient},
};

/// Playlist fetch attempts after the first one
const PLAYLIST_FETCH_RETRIES: u32 = 3;

/// Application state shared across handlers
pub struct AppState {
    pub config: Arc<Config>,
    pub rewriter: UrlRewriter,
    pub auth: AuthGate,
    pub cache: PlaylistCache,
    pub routes: RouteTable,
    pub hls: HlsRedirectTable,
    pub parser: M3UParser,
    pub xtream: Option<XtreamClient>,
    /// Follows redirects, no total timeout, no transparent decompression
    pub relay_client: Client,
    /// Same as `relay_client` without redirect following
    pub hls_client: Client,
    /// Cache key of the playlist materialized at startup
    pub plain_playlist_key: Option<String>,
    /// `/{m3u_file_name}` serves the Xtream `get.php` flow
    pub xtream_alias: bool,
    pub start_time: Instant,
}

/// First group of a random v4 UUID unless a custom id is configured
fn anti_collision_token(config: &Config) -> String {
    if !config.custom_id.is_empty() {
        return config.custom_id.clone();
    }
    uuid::Uuid::new_v4()
        .to_string()
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

impl AppState {
    /// Build clients and shared tables, then materialize the startup playlist
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

        let api_client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(Duration::from_millis(config.upstream_timeout_ms))
            .user_agent(config.user_agent.as_str())
            .build()
            .context("failed to build upstream API client")?;
        let relay_client = Client::builder()
            .connect_timeout(connect_timeout)
            .no_gzip()
            .build()
            .context("failed to build relay client")?;
        let hls_client = Client::builder()
            .connect_timeout(connect_timeout)
            .no_gzip()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build HLS client")?;

        let token = anti_collision_token(&config);
        let rewriter = UrlRewriter::new(&config, token.clone());
        let auth = AuthGate::new(config.user.clone(), config.password.clone());

        let cache = PlaylistCache::new(&config.cache_dir, config.cache_expiration_hours).await?;
        tracing::info!("Playlist cache initialized: {}", config.cache_dir.display());
        let hls = HlsRedirectTable::new(config.hls_redirect_capacity, cache.max_age());
        let parser = M3UParser::new(api_client.clone(), PLAYLIST_FETCH_RETRIES);

        let xtream = config.xtream_enabled().then(|| {
            XtreamClient::new(
                api_client.clone(),
                &config.xtream_base_url,
                config.xtream_user.clone(),
                config.xtream_password.clone(),
            )
        });
        let xtream_alias = config.xtream_enabled()
            && is_xtream_alias(
                &config.m3u_url,
                &config.xtream_base_url,
                &config.xtream_user,
                &config.xtream_password,
            );

        let mut routes = RouteTable::empty(token.clone());
        let mut plain_playlist_key = None;

        if !config.m3u_url.is_empty() && !xtream_alias {
            let key = format!("m3u:{}", config.m3u_url);
            let playlist = parser
                .parse_source(&config.m3u_url)
                .await
                .context("failed to load the upstream playlist")?;
            let materialized = materialize(
                &playlist,
                RewriteMode::Playlist,
                &config.group_filter,
                &rewriter,
            );
            routes = RouteTable::build(token.clone(), &materialized.entries);

            let built = Built {
                track_count: materialized.entries.len(),
                bytes: materialized.bytes,
            };
            cache.store_at(&key, &built, Utc::now()).await?;
            tracing::info!(
                tracks = playlist.len(),
                served = built.track_count,
                routes = routes.len(),
                "startup playlist materialized"
            );
            plain_playlist_key = Some(key);
        } else if xtream_alias {
            tracing::info!("M3U URL is the Xtream panel's get.php, serving it through the Xtream flow");
        }

        Ok(Self {
            config: Arc::new(config),
            rewriter,
            auth,
            cache,
            routes,
            hls,
            parser,
            xtream,
            relay_client,
            hls_client,
            plain_playlist_key,
            xtream_alias,
            start_time: Instant::now(),
        })
    }

    pub fn mode(&self) -> &'static str {
        match (self.plain_playlist_key.is_some(), self.xtream.is_some()) {
            (true, true) => "m3u+xtream",
            (false, true) => "xtream",
            (true, false) => "m3u",
            (false, false) => "idle",
        }
    }

    pub fn upstream_secrets(&self) -> Vec<&Credential> {
        vec![&self.config.xtream_user, &self.config.xtream_password]
    }

    /// Upstream URL safe for logs
    pub fn redacted(&self, url: &str) -> String {
        redact_url(url, &self.upstream_secrets())
    }
}

/// Router with the operational endpoints at the root and the proxied
/// surface under the optional custom prefix
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut proxied: Router<Arc<AppState>> = Router::new();

    if state.plain_playlist_key.is_some() || state.xtream_alias {
        let path = format!("/{}", state.config.m3u_file_name.trim_start_matches('/'));
        proxied = proxied.route(
            &path,
            get(routes::playlist::get_m3u).post(routes::playlist::get_m3u),
        );
    }

    if state.xtream.is_some() {
        proxied = proxied
            .route(
                "/get.php",
                get(routes::xtream::get_php).post(routes::xtream::get_php),
            )
            .route(
                "/player_api.php",
                get(routes::xtream::player_api_get).post(routes::xtream::player_api_post),
            )
            .route("/xmltv.php", get(routes::xtream::xmltv))
            .route("/:username/:password/:id", get(routes::xtream::stream))
            .route("/live/:username/:password/:id", get(routes::xtream::live))
            .route("/movie/:username/:password/:id", get(routes::xtream::movie))
            .route("/series/:username/:password/:id", get(routes::xtream::series))
            .route(
                "/hlsr/:token/:username/:password/:channel/:hash/:chunk",
                get(routes::xtream::hlsr),
            );
    }

    // Rewritten playlist tracks are looked up in the route table
    let proxied = proxied.fallback(routes::playlist::track_relay);

    let app = Router::new()
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/ready", get(routes::health::ready))
        .route("/live", get(routes::health::live));

    let prefix = state.config.endpoint_prefix();
    let app = if prefix.is_empty() {
        app.merge(proxied)
    } else {
        app.nest(&prefix, proxied)
    };

    app.layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iptv_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env();
    let port = config.port;

    tracing::info!("Starting IPTV Proxy v{}", env!("CARGO_PKG_VERSION"));
    if config.has_empty_credentials() {
        tracing::warn!("Proxy user or password is empty, clients authenticate with empty values");
    }

    let state = Arc::new(AppState::new(config).await?);
    tracing::info!(
        mode = state.mode(),
        advertised = %format!("{}://{}:{}", state.config.scheme(), state.config.hostname, state.config.advertised_port),
        "Proxy ready"
    );

    // Start cleanup task (runs in background)
    let cleanup = CleanupConfig {
        interval_secs: state.config.cleanup_interval_secs,
        pinned_keys: state.plain_playlist_key.iter().cloned().collect(),
    };
    tokio::spawn(start_cleanup_task(state.cache.clone(), state.hls.clone(), cleanup));

    let app = build_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
