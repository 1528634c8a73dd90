/// Data entities for tracks, artists and users
pub mod entities;
/// Error types and result aliases
pub mod errors;
/// Local storage using `DuckDB`
pub mod local_storage;
/// Spotify API client
pub mod spotify;

pub use local_storage::LocalStorage;
pub use spotify::{MusicApi, SpotifyClient};
