use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

lazy_static! {
    /// Relayed upstream requests by kind (track, live, movie, series, hls, hlsr)
    pub static ref RELAY_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "iptv_proxy_relay_requests_total",
        "Media requests relayed to upstream origins",
        &["kind"]
    )
    .unwrap();

    pub static ref PLAYLIST_CACHE: IntCounterVec = register_int_counter_vec!(
        "iptv_proxy_playlist_cache_total",
        "Playlist cache lookups by result",
        &["result"]
    )
    .unwrap();

    pub static ref AUTH_FAILURES: IntCounterVec = register_int_counter_vec!(
        "iptv_proxy_auth_failures_total",
        "Rejected requests by reason",
        &["reason"]
    )
    .unwrap();

    pub static ref DROPPED_TRACKS: IntCounter = register_int_counter!(
        "iptv_proxy_dropped_tracks_total",
        "Tracks dropped because their URI could not be parsed or rewritten"
    )
    .unwrap();
}
