//! Refreshing and serving per-user listening stats.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::cache;
use crate::clients::{
    LocalStorage, MusicApi,
    entities::{Artist, EntityKind, TimeFrames, Track, User},
    errors::{Error, Result},
    local_storage::RankPoint,
    spotify::{self, ENTITY_FETCH_COUNT},
};

/// Hydrated stats for a user's latest snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatsResponse {
    pub last_update_time: DateTime<Utc>,
    pub tracks: TimeFrames<Track>,
    pub artists: TimeFrames<Artist>,
}

/// A single artist as seen in a user's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtistStats {
    pub artist: Artist,
    pub rank_history: TimeFrames<RankPoint>,
    /// The user's current top tracks featuring the artist, per timeframe.
    pub top_tracks: TimeFrames<Track>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenreStats {
    pub genre: String,
    pub artists: TimeFrames<Artist>,
}

pub struct StatsService<A: MusicApi + ?Sized> {
    storage: Arc<LocalStorage>,
    api: Arc<A>,
}

impl<A: MusicApi + ?Sized> Clone for StatsService<A> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            api: self.api.clone(),
        }
    }
}

impl<A: MusicApi + ?Sized> StatsService<A> {
    pub fn new(storage: Arc<LocalStorage>, api: Arc<A>) -> Self {
        StatsService { storage, api }
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    async fn user(&self, username: &str) -> Result<User> {
        self.storage
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| Error::UserNotFound(username.to_string()))
    }

    /// Refreshes the user's token when it has expired, persisting the new one.
    async fn ensure_fresh_token(&self, mut user: User) -> Result<User> {
        if user.token.is_expired(Utc::now()) {
            debug!("Token for {} expired, refreshing ...", user.username);
            let token = self.api.refresh_user_token(&user.token).await?;
            self.storage.update_user_token(user.id, &token).await?;
            user.token = token;
        }
        Ok(user)
    }

    /// Pulls the user's current top items from Spotify and stores them as a new snapshot.
    pub async fn refresh_user(&self, username: &str) -> Result<()> {
        let user = self.user(username).await?;
        self.refresh(user).await
    }

    pub async fn refresh(&self, user: User) -> Result<()> {
        info!("Refreshing stats for user {} ...", user.username);
        let user = self.ensure_fresh_token(user).await?;
        let snapshot = spotify::fetch_cur_stats(self.api.as_ref(), &user.token).await?;
        self.storage.store_stats_snapshot(&user, &snapshot).await?;

        // Top items come back fully populated, so there's no reason to fetch them again later
        for (_, tracks) in snapshot.tracks.iter() {
            cache::warm(self.storage(), EntityKind::Track, tracks, |t| t.id.as_str()).await?;
        }
        for (_, artists) in snapshot.artists.iter() {
            cache::warm(self.storage(), EntityKind::Artist, artists, |a| a.id.as_str()).await?;
        }
        info!("Stored new stats snapshot for user {}", user.username);
        Ok(())
    }

    /// Stats from the user's latest snapshot; takes one first if none exists yet.
    pub async fn user_stats(&self, username: &str) -> Result<UserStatsResponse> {
        let user = self.user(username).await?;
        let track_ids = match self
            .storage
            .latest_snapshot_ids(user.id, EntityKind::Track)
            .await?
        {
            Some(ids) => ids,
            None => {
                self.refresh(user.clone()).await?;
                self.storage
                    .latest_snapshot_ids(user.id, EntityKind::Track)
                    .await?
                    .ok_or_else(|| Error::NoStats(username.to_string()))?
            }
        };
        let (_, artist_ids) = self
            .storage
            .latest_snapshot_ids(user.id, EntityKind::Artist)
            .await?
            .unwrap_or_default();
        let (last_update_time, track_ids) = track_ids;

        Ok(UserStatsResponse {
            last_update_time,
            tracks: self.hydrate_tracks(track_ids).await?,
            artists: self.hydrate_artists(artist_ids).await?,
        })
    }

    async fn hydrate_tracks(&self, ids: TimeFrames<String>) -> Result<TimeFrames<Track>> {
        let mut out = TimeFrames::default();
        for (tf, ids) in ids.into_iter_frames() {
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            *out.get_mut(tf) = cache::fetch_tracks(self.storage(), self.api(), &refs).await?;
        }
        Ok(out)
    }

    async fn hydrate_artists(&self, ids: TimeFrames<String>) -> Result<TimeFrames<Artist>> {
        let mut out = TimeFrames::default();
        for (tf, ids) in ids.into_iter_frames() {
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            *out.get_mut(tf) = cache::fetch_artists(self.storage(), self.api(), &refs).await?;
        }
        Ok(out)
    }

    pub async fn artist_stats(&self, username: &str, artist_id: &str) -> Result<ArtistStats> {
        let user = self.user(username).await?;
        let artist = cache::fetch_artists(self.storage(), self.api(), &[artist_id])
            .await?
            .pop()
            .ok_or_else(|| Error::MissingEntity {
                kind: EntityKind::Artist.as_str(),
                id: artist_id.to_string(),
            })?;
        let rank_history = self.storage.artist_rank_history(user.id, artist_id).await?;

        let top_tracks = match self
            .storage
            .latest_snapshot_ids(user.id, EntityKind::Track)
            .await?
        {
            Some((_, ids)) => {
                let tracks = self.hydrate_tracks(ids).await?;
                tracks.map_frames(|tracks| {
                    tracks
                        .into_iter()
                        .filter(|t| t.artists.iter().any(|a| a.id == artist_id))
                        .collect()
                })
            }
            None => TimeFrames::default(),
        };

        Ok(ArtistStats {
            artist,
            rank_history,
            top_tracks,
        })
    }

    pub async fn genre_stats(&self, username: &str, genre: &str) -> Result<GenreStats> {
        let user = self.user(username).await?;
        let (_, artist_ids) = self
            .storage
            .latest_snapshot_ids(user.id, EntityKind::Artist)
            .await?
            .ok_or_else(|| Error::NoStats(username.to_string()))?;

        let all_ids: Vec<String> = artist_ids
            .iter()
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let genres = self.storage.artist_genres(&all_ids).await?;
        let in_genre = artist_ids.map_frames(|ids| {
            ids.into_iter()
                .filter(|id| genres.get(id).is_some_and(|g| g.iter().any(|g| g == genre)))
                .collect()
        });
        if in_genre.is_empty() {
            warn!("User {username} has no top artists in genre \"{genre}\"");
        }

        Ok(GenreStats {
            genre: genre.to_string(),
            artists: self.hydrate_artists(in_genre).await?,
        })
    }

    /// Genre weights for the treemap: an artist at rank `r` adds `ENTITY_FETCH_COUNT - r` to each
    /// of its genres, summed over all timeframes.
    pub async fn genre_weights(&self, username: &str) -> Result<BTreeMap<String, u32>> {
        let user = self.user(username).await?;
        let (_, artist_ids) = self
            .storage
            .latest_snapshot_ids(user.id, EntityKind::Artist)
            .await?
            .ok_or_else(|| Error::NoStats(username.to_string()))?;

        let all_ids: Vec<String> = artist_ids
            .iter()
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let genres = self.storage.artist_genres(&all_ids).await?;
        Ok(genre_weights(&artist_ids, |id| {
            genres.get(id).map(Vec::as_slice).unwrap_or_default()
        }))
    }
}

/// Sums rank-based weights per genre over every timeframe.
pub fn genre_weights<'a>(
    artist_ids: &TimeFrames<String>,
    genres_of: impl Fn(&str) -> &'a [String],
) -> BTreeMap<String, u32> {
    let mut weights = BTreeMap::new();
    for (_, ids) in artist_ids.iter() {
        for (rank, id) in ids.iter().enumerate() {
            let rank = u32::try_from(rank).unwrap_or(u32::MAX);
            let weight = ENTITY_FETCH_COUNT.saturating_sub(rank);
            for genre in genres_of(id) {
                *weights.entry(genre.clone()).or_insert(0) += weight;
            }
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration;

    use super::*;
    use crate::clients::entities::{Album, Timeframe, UserProfile, UserToken};

    /// Spotify stand-in that records which access token each top list request used.
    #[derive(Default)]
    struct FakeApi {
        empty_history: bool,
        top_requests: AtomicUsize,
        seen_tokens: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn record(&self, token: &UserToken) {
            self.top_requests.fetch_add(1, Ordering::SeqCst);
            self.seen_tokens
                .lock()
                .unwrap()
                .push(token.access_token.clone());
        }
    }

    fn artist(id: &str) -> Artist {
        Artist {
            id: id.into(),
            name: format!("Artist {id}"),
            uri: format!("spotify:artist:{id}"),
            genres: vec!["art pop".into()],
            images: vec![],
            popularity: 1,
            followers: 1,
        }
    }

    fn track(id: &str) -> Track {
        Track {
            id: id.into(),
            name: format!("Track {id}"),
            uri: format!("spotify:track:{id}"),
            album: Album {
                id: None,
                name: "Album".into(),
                images: vec![],
                artists: vec![],
            },
            artists: vec![],
            preview_url: None,
            popularity: 1,
        }
    }

    #[async_trait]
    impl MusicApi for FakeApi {
        async fn top_artists(&self, token: &UserToken, _: Timeframe) -> Result<Vec<Artist>> {
            self.record(token);
            Ok(if self.empty_history { vec![] } else { vec![artist("a1")] })
        }

        async fn top_tracks(&self, token: &UserToken, _: Timeframe) -> Result<Vec<Track>> {
            self.record(token);
            Ok(if self.empty_history { vec![] } else { vec![track("t1")] })
        }

        async fn artists(&self, ids: &[&str]) -> Result<Vec<Artist>> {
            Ok(ids.iter().map(|id| artist(id)).collect())
        }

        async fn tracks(&self, ids: &[&str]) -> Result<Vec<Track>> {
            Ok(ids.iter().map(|id| track(id)).collect())
        }

        async fn user_profile(&self, _: &UserToken) -> Result<UserProfile> {
            Err(Error::MissingToken)
        }

        // Spotify didn't rotate the refresh token
        async fn refresh_user_token(&self, _: &UserToken) -> Result<UserToken> {
            Ok(UserToken {
                access_token: "renewed".into(),
                refresh_token: None,
                expires_at: Some(Utc::now() + Duration::hours(1)),
            })
        }

        fn authorize_url(&self, _: &str) -> Result<String> {
            Err(Error::MissingToken)
        }

        async fn exchange_code(&self, _: &str) -> Result<UserToken> {
            Err(Error::MissingToken)
        }
    }

    async fn service(
        api: FakeApi,
        username: &str,
        expires_in: Duration,
    ) -> (tempfile::TempDir, StatsService<FakeApi>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::open(&dir.path().join("test.duckdb"))
            .await
            .unwrap();
        storage.init_db().await.unwrap();
        storage
            .upsert_user(
                &UserProfile {
                    spotify_id: username.into(),
                    display_name: None,
                },
                &UserToken {
                    access_token: "original".into(),
                    refresh_token: Some("refresh".into()),
                    expires_at: Some(Utc::now() + expires_in),
                },
            )
            .await
            .unwrap();
        (dir, StatsService::new(Arc::new(storage), Arc::new(api)))
    }

    #[tokio::test]
    async fn empty_history_is_served_without_refetching() {
        let api = FakeApi {
            empty_history: true,
            ..FakeApi::default()
        };
        let (_dir, stats) = service(api, "newbie", Duration::hours(1)).await;

        for _ in 0..3 {
            let response = stats.user_stats("newbie").await.unwrap();
            assert!(response.tracks.is_empty());
            assert!(response.artists.is_empty());
        }
        // Only the first visit takes a snapshot
        assert_eq!(stats.api().top_requests.load(Ordering::SeqCst), 6);
        assert!(stats.genre_weights("newbie").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_token_is_renewed_before_snapshot() {
        let (_dir, stats) = service(FakeApi::default(), "fan", Duration::hours(-1)).await;

        stats.refresh_user("fan").await.unwrap();

        let seen = stats.api().seen_tokens.lock().unwrap().clone();
        assert_eq!(seen.len(), 6);
        assert!(seen.iter().all(|token| token == "renewed"));

        let user = stats
            .storage()
            .get_user_by_username("fan")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.token.access_token, "renewed");
        assert_eq!(user.token.refresh_token.as_deref(), Some("refresh"));
        assert!(!user.token.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn valid_token_is_used_as_is() {
        let (_dir, stats) = service(FakeApi::default(), "fan", Duration::hours(1)).await;

        let response = stats.user_stats("fan").await.unwrap();
        assert_eq!(response.tracks.short[0].id, "t1");
        assert!(
            stats
                .api()
                .seen_tokens
                .lock()
                .unwrap()
                .iter()
                .all(|token| token == "original")
        );
    }

    #[test]
    fn weights_favor_higher_ranks() {
        let mut ids = TimeFrames::default();
        ids.add_item(Timeframe::Short, "a".to_string());
        ids.add_item(Timeframe::Short, "b".to_string());
        ids.add_item(Timeframe::Long, "b".to_string());

        let genres: HashMap<&str, Vec<String>> = HashMap::from([
            ("a", vec!["art pop".to_string()]),
            ("b", vec!["art pop".to_string(), "chillwave".to_string()]),
        ]);
        let weights = genre_weights(&ids, |id| {
            genres.get(id).map(Vec::as_slice).unwrap_or_default()
        });

        assert_eq!(weights["art pop"], 50 + 49 + 50);
        assert_eq!(weights["chillwave"], 49 + 50);
    }

    #[test]
    fn artists_without_genres_add_nothing() {
        let mut ids = TimeFrames::default();
        ids.add_item(Timeframe::Medium, "x".to_string());
        let weights = genre_weights(&ids, |_| &[]);
        assert!(weights.is_empty());
    }
}
