pub mod credential;
pub mod playlist;

pub use credential::{redact_url, Credential};
pub use playlist::{CacheMeta, Playlist, Tag, Track};
