//! Normalized in-process state backing the dashboard.
//!
//! Entities live once in the [`EntityStore`] keyed by Spotify id; per-user stats only hold ids.
//! Every change goes through [`Action`]s applied by [`State::reduce`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error};
use tokio::sync::RwLock;

use crate::clients::{
    MusicApi,
    entities::{Artist, TimeFrames, Track},
    errors::Result,
};
use crate::stats::{ArtistStats, StatsService, UserStatsResponse};

#[derive(Debug, Default, Clone)]
pub struct EntityStore {
    pub tracks: HashMap<String, Track>,
    pub artists: HashMap<String, Artist>,
}

#[derive(Debug, Default, Clone)]
pub struct UserStats {
    pub last_update_time: Option<DateTime<Utc>>,
    pub tracks: Option<TimeFrames<String>>,
    pub artists: Option<TimeFrames<String>>,
    pub artist_stats: HashMap<String, ArtistStats>,
}

impl UserStats {
    /// Both rankings are present, so the aggregate view can render.
    pub fn is_loaded(&self) -> bool {
        self.tracks.is_some() && self.artists.is_some()
    }
}

#[derive(Debug, Default, Clone)]
pub struct State {
    pub entity_store: EntityStore,
    pub user_stats: HashMap<String, UserStats>,
}

#[derive(Debug)]
pub enum Action {
    AddTracks(HashMap<String, Track>),
    AddArtists(HashMap<String, Artist>),
    AddUserStats {
        username: String,
        stats: UserStats,
    },
    AddArtistStats {
        username: String,
        artist_id: String,
        stats: ArtistStats,
    },
    /// Drops a user's cached stats so the next visit fetches them again.
    ClearUserStats(String),
}

impl State {
    pub fn reduce(&mut self, action: Action) {
        match action {
            Action::AddTracks(tracks) => self.entity_store.tracks.extend(tracks),
            Action::AddArtists(artists) => self.entity_store.artists.extend(artists),
            Action::AddUserStats { username, stats } => {
                // Keep artist stats fetched before the rankings arrived
                let previous = self.user_stats.remove(&username);
                let mut stats = stats;
                if let Some(previous) = previous {
                    for (id, artist_stats) in previous.artist_stats {
                        stats.artist_stats.entry(id).or_insert(artist_stats);
                    }
                }
                self.user_stats.insert(username, stats);
            }
            Action::AddArtistStats {
                username,
                artist_id,
                stats,
            } => {
                self.user_stats
                    .entry(username)
                    .or_default()
                    .artist_stats
                    .insert(artist_id, stats);
            }
            Action::ClearUserStats(username) => {
                self.user_stats.remove(&username);
            }
        }
    }

    pub fn user(&self, username: &str) -> Option<&UserStats> {
        self.user_stats.get(username)
    }

    /// Resolves ranked ids to artists, skipping (and logging) ids without metadata.
    pub fn ranked_artists(&self, ids: &[String]) -> Vec<&Artist> {
        ids.iter()
            .filter_map(|id| {
                let artist = self.entity_store.artists.get(id);
                if artist.is_none() {
                    error!("No artist metadata for artist {id}");
                }
                artist
            })
            .collect()
    }

    pub fn ranked_tracks(&self, ids: &[String]) -> Vec<&Track> {
        ids.iter()
            .filter_map(|id| {
                let track = self.entity_store.tracks.get(id);
                if track.is_none() {
                    error!("No track metadata for track {id}");
                }
                track
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct Store {
    state: RwLock<State>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn dispatch(&self, action: Action) {
        self.state.write().await.reduce(action);
    }

    /// Runs `f` against the current state under a read lock.
    pub async fn select<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&*self.state.read().await)
    }
}

/// A stats response split into entity maps and per-timeframe id lists.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub tracks: HashMap<String, Track>,
    pub artists: HashMap<String, Artist>,
    pub stats: UserStats,
}

pub fn normalize(response: UserStatsResponse) -> Normalized {
    let tracks: HashMap<String, Track> = response
        .tracks
        .iter()
        .flat_map(|(_, tracks)| tracks.iter())
        .map(|track| (track.id.clone(), track.clone()))
        .collect();
    let artists: HashMap<String, Artist> = response
        .artists
        .iter()
        .flat_map(|(_, artists)| artists.iter())
        .map(|artist| (artist.id.clone(), artist.clone()))
        .collect();

    Normalized {
        tracks,
        artists,
        stats: UserStats {
            last_update_time: Some(response.last_update_time),
            tracks: Some(response.tracks.map(|track| track.id)),
            artists: Some(response.artists.map(|artist| artist.id)),
            artist_stats: HashMap::new(),
        },
    }
}

/// Where the store gets stats from when it doesn't have them yet.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_user_stats(&self, username: &str) -> Result<UserStatsResponse>;

    async fn fetch_artist_stats(&self, username: &str, artist_id: &str) -> Result<ArtistStats>;
}

#[async_trait]
impl<A: MusicApi + ?Sized + 'static> StatsSource for StatsService<A> {
    async fn fetch_user_stats(&self, username: &str) -> Result<UserStatsResponse> {
        self.user_stats(username).await
    }

    async fn fetch_artist_stats(&self, username: &str, artist_id: &str) -> Result<ArtistStats> {
        self.artist_stats(username, artist_id).await
    }
}

/// Fetches and stores a user's stats unless the store already has them.
///
/// Returns whether a fetch happened.
pub async fn ensure_user_stats<S: StatsSource + ?Sized>(
    store: &Store,
    source: &S,
    username: &str,
) -> Result<bool> {
    if store
        .select(|state| state.user(username).is_some_and(UserStats::is_loaded))
        .await
    {
        return Ok(false);
    }

    debug!("No stats for {username} in the store, fetching ...");
    let Normalized {
        tracks,
        artists,
        stats,
    } = normalize(source.fetch_user_stats(username).await?);
    store.dispatch(Action::AddTracks(tracks)).await;
    store.dispatch(Action::AddArtists(artists)).await;
    store
        .dispatch(Action::AddUserStats {
            username: username.to_string(),
            stats,
        })
        .await;
    Ok(true)
}

/// Same fetch-once behavior for a single artist's stats.
pub async fn ensure_artist_stats<S: StatsSource + ?Sized>(
    store: &Store,
    source: &S,
    username: &str,
    artist_id: &str,
) -> Result<bool> {
    let present = store
        .select(|state| {
            state
                .user(username)
                .is_some_and(|user| user.artist_stats.contains_key(artist_id))
        })
        .await;
    if present {
        return Ok(false);
    }

    let stats = source.fetch_artist_stats(username, artist_id).await?;
    store
        .dispatch(Action::AddArtists(HashMap::from([(
            stats.artist.id.clone(),
            stats.artist.clone(),
        )])))
        .await;
    store
        .dispatch(Action::AddTracks(
            stats
                .top_tracks
                .iter()
                .flat_map(|(_, tracks)| tracks.iter())
                .map(|t| (t.id.clone(), t.clone()))
                .collect(),
        ))
        .await;
    store
        .dispatch(Action::AddArtistStats {
            username: username.to_string(),
            artist_id: artist_id.to_string(),
            stats,
        })
        .await;
    Ok(true)
}
