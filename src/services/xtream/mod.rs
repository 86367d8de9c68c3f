//! Xtream Codes Integration
//!
//! The proxy speaks the Xtream dialect on both sides:
//!
//! - **Client**: calls the upstream panel's Player API v2
//! - **Detection**: recognizes `get.php` playlist URLs served by a panel
//! - **Catalogue**: builds a live playlist from the API
//! - **Dispatcher**: maps inbound `player_api.php` actions onto the client
//!
//! Xtream M3U URLs typically follow this pattern:
//! ```text
//! http://server:port/get.php?username=X&password=Y&type=m3u_plus&output=ts
//! ```

pub mod catalogue;
pub mod client;
pub mod detector;
pub mod dispatcher;
pub mod types;

// Re-exports for convenience
pub use client::{XtreamClient, XtreamError};
pub use detector::{extract_credentials, forwarded_query, is_xtream_alias};
pub use dispatcher::{dispatch, ProxyIdentity, XtreamAction};
pub use types::{XtreamCategory, XtreamCredentials, XtreamLiveStream};
