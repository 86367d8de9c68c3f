pub mod auth;
pub mod cache;
pub mod cleanup;
pub mod hls;
pub mod m3u_parser;
pub mod materializer;
pub mod metrics;
pub mod rewrite;
pub mod route_table;
pub mod xtream;
