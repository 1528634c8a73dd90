//! Tunestats - personal Spotify listening stats
//!
//! Takes periodic snapshots of a user's top tracks and artists for the three Spotify
//! timeframes, keeps their ranking history in a local `DuckDB` database and serves
//! it as a server rendered dashboard plus a small JSON API.

/// Entity cache in front of the batch lookup endpoints
pub mod cache;
/// Client modules for interacting with external services and local storage
pub mod clients;
pub mod config;
/// HTTP routes and server
pub mod http;
pub mod refresher;
/// Stats queries over stored snapshots
pub mod stats;
/// Client side entity store with fetch-once semantics
pub mod store;
/// HTML rendering of the dashboard
pub mod ui;
