use futures::stream::{StreamExt, iter};
use log::{debug, info, warn};

use crate::clients::{MusicApi, errors::Result};
use crate::stats::StatsService;

/// Outcome of refreshing every known user.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

// Takes a new stats snapshot for every user
pub struct Refresher<A: MusicApi + ?Sized> {
    stats: StatsService<A>,
    concurrency: usize,
}

impl<A: MusicApi + ?Sized> Refresher<A> {
    pub fn new(stats: StatsService<A>, concurrency: usize) -> Self {
        Refresher {
            stats,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn refresh_all(&self) -> Result<RefreshSummary> {
        info!("Starting refresh of all users ...");
        let users = self.stats.storage().list_users().await?;
        debug!("Found {} users", users.len());

        if users.is_empty() {
            info!("No users to refresh.");
            return Ok(RefreshSummary::default());
        }

        let stats = &self.stats;
        let results = iter(users)
            .map(|user| async move {
                let username = user.username.clone();
                (username, stats.refresh(user).await)
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        // One user's failure (e.g. revoked access) shouldn't stop the others
        let mut summary = RefreshSummary::default();
        for (username, res) in results {
            match res {
                Ok(()) => summary.refreshed.push(username),
                Err(e) => {
                    warn!("Error refreshing user {username}: {e:?}");
                    summary.failed.push(username);
                }
            }
        }
        summary.refreshed.sort();
        summary.failed.sort();

        info!(
            "Refresh completed. Refreshed: {}, failed: {}",
            summary.refreshed.len(),
            summary.failed.len()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    use super::*;
    use crate::clients::{
        LocalStorage,
        entities::{Album, Artist, Timeframe, Track, UserProfile, UserToken},
        errors::Error,
    };

    struct FakeApi;

    #[async_trait]
    impl MusicApi for FakeApi {
        async fn top_artists(&self, _: &UserToken, _: Timeframe) -> Result<Vec<Artist>> {
            Ok(vec![Artist {
                id: "a1".into(),
                name: "Artist".into(),
                uri: "spotify:artist:a1".into(),
                genres: vec!["chillwave".into()],
                images: vec![],
                popularity: 1,
                followers: 1,
            }])
        }

        async fn top_tracks(&self, _: &UserToken, _: Timeframe) -> Result<Vec<Track>> {
            Ok(vec![Track {
                id: "t1".into(),
                name: "Track".into(),
                uri: "spotify:track:t1".into(),
                album: Album {
                    id: None,
                    name: "Album".into(),
                    images: vec![],
                    artists: vec![],
                },
                artists: vec![],
                preview_url: None,
                popularity: 1,
            }])
        }

        async fn artists(&self, _: &[&str]) -> Result<Vec<Artist>> {
            Ok(vec![])
        }

        async fn tracks(&self, _: &[&str]) -> Result<Vec<Track>> {
            Ok(vec![])
        }

        async fn user_profile(&self, _: &UserToken) -> Result<UserProfile> {
            Err(Error::MissingToken)
        }

        // Simulates revoked access
        async fn refresh_user_token(&self, _: &UserToken) -> Result<UserToken> {
            Err(Error::MissingToken)
        }

        fn authorize_url(&self, _: &str) -> Result<String> {
            Err(Error::MissingToken)
        }

        async fn exchange_code(&self, _: &str) -> Result<UserToken> {
            Err(Error::MissingToken)
        }
    }

    fn token(expires_in: Duration) -> UserToken {
        UserToken {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            expires_at: Some(Utc::now() + expires_in),
        }
    }

    fn profile(id: &str) -> UserProfile {
        UserProfile {
            spotify_id: id.into(),
            display_name: None,
        }
    }

    #[tokio::test]
    async fn failures_dont_stop_other_users() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::open(&dir.path().join("test.duckdb"))
            .await
            .unwrap();
        storage.init_db().await.unwrap();
        storage
            .upsert_user(&profile("fresh"), &token(Duration::hours(1)))
            .await
            .unwrap();
        storage
            .upsert_user(&profile("stale"), &token(Duration::hours(-1)))
            .await
            .unwrap();

        let stats = StatsService::new(Arc::new(storage), Arc::new(FakeApi));
        let summary = Refresher::new(stats, 2).refresh_all().await.unwrap();

        assert_eq!(summary.refreshed, vec!["fresh".to_string()]);
        assert_eq!(summary.failed, vec!["stale".to_string()]);
    }

    #[tokio::test]
    async fn no_users_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::open(&dir.path().join("test.duckdb"))
            .await
            .unwrap();
        storage.init_db().await.unwrap();

        let stats = StatsService::new(Arc::new(storage), Arc::new(FakeApi));
        let summary = Refresher::new(stats, 4).refresh_all().await.unwrap();
        assert_eq!(summary, RefreshSummary::default());
    }
}
