use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::clients::{
    LocalStorage, SpotifyClient,
    errors::{Error, Result},
};
use crate::ui::cards::default_preferred_genres;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:4000";
/// Users refreshed at once by `refresh-all` and the server's periodic refresh.
pub const DEFAULT_REFRESH_CONCURRENCY: usize = 4;
/// Minutes between the server's refreshes of every user.
pub const DEFAULT_REFRESH_INTERVAL_MINS: u64 = 6 * 60;

// Configuration for the app
pub struct Config {
    pub spotify: Arc<SpotifyClient>,
    pub storage: Arc<LocalStorage>,
    pub bind_addr: SocketAddr,
    pub preferred_genres: HashSet<String>,
    pub refresh_concurrency: usize,
    /// `None` disables the server's periodic refresh.
    pub refresh_interval: Option<Duration>,
}

#[derive(Default)]
pub struct ConfigBuilder {
    spotify: Option<SpotifyClient>,
    storage: Option<LocalStorage>,
    db_path: Option<PathBuf>,
    bind_addr: Option<SocketAddr>,
    preferred_genres: Option<HashSet<String>>,
    refresh_concurrency: Option<usize>,
    refresh_interval: Option<Option<Duration>>,
}

/// Comma separated list, blanks dropped.
fn parse_genres(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Minutes, `0` turning the periodic refresh off.
fn parse_refresh_interval(raw: &str) -> Result<Option<Duration>> {
    let mins: u64 = raw.trim().parse().map_err(|e| {
        Error::ConfigurationError(format!("Invalid TUNESTATS_REFRESH_INTERVAL_MINS: {e}"))
    })?;
    Ok((mins > 0).then(|| Duration::from_secs(mins * 60)))
}

/// Opens the database at `db_path`, else at `TUNESTATS_DB_PATH`, else at the default location.
///
/// Needs no Spotify credentials, so `init-db` can run on its own.
pub async fn open_storage(db_path: Option<PathBuf>) -> Result<LocalStorage> {
    let _ = dotenvy::dotenv();
    match db_path {
        Some(path) => LocalStorage::open(&path).await,
        None => match std::env::var("TUNESTATS_DB_PATH") {
            Ok(path) => LocalStorage::open(&PathBuf::from(path)).await,
            Err(_) => LocalStorage::try_default().await,
        },
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spotify(mut self, spotify: SpotifyClient) -> Self {
        self.spotify = Some(spotify);
        self
    }

    pub fn storage(mut self, storage: LocalStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn db_path(mut self, path: PathBuf) -> Self {
        self.db_path = Some(path);
        self
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    pub fn refresh_concurrency(mut self, concurrency: usize) -> Self {
        self.refresh_concurrency = Some(concurrency);
        self
    }

    pub fn preferred_genres(mut self, genres: HashSet<String>) -> Self {
        self.preferred_genres = Some(genres);
        self
    }

    /// `None` disables the periodic refresh.
    pub fn refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Fills everything not set explicitly from the environment (`.env` included), falling back
    /// to defaults.
    pub async fn build(self) -> Result<Config> {
        let _ = dotenvy::dotenv();

        let spotify = match self.spotify {
            Some(s) => s,
            None => SpotifyClient::try_default()?,
        };
        let storage = match self.storage {
            Some(s) => s,
            None => open_storage(self.db_path).await?,
        };
        let bind_addr = match self.bind_addr {
            Some(addr) => addr,
            None => std::env::var("TUNESTATS_BIND")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
                .parse()
                .map_err(|e| Error::ConfigurationError(format!("Invalid TUNESTATS_BIND: {e}")))?,
        };
        let preferred_genres = match self.preferred_genres {
            Some(g) => g,
            None => std::env::var("TUNESTATS_PREFERRED_GENRES")
                .map(|raw| parse_genres(&raw))
                .unwrap_or_else(|_| default_preferred_genres()),
        };
        debug!("Preferred genres: {preferred_genres:?}");
        let refresh_interval = match self.refresh_interval {
            Some(interval) => interval,
            None => match std::env::var("TUNESTATS_REFRESH_INTERVAL_MINS") {
                Ok(raw) => parse_refresh_interval(&raw)?,
                Err(_) => Some(Duration::from_secs(DEFAULT_REFRESH_INTERVAL_MINS * 60)),
            },
        };

        Ok(Config {
            spotify: Arc::new(spotify),
            storage: Arc::new(storage),
            bind_addr,
            preferred_genres,
            refresh_concurrency: self
                .refresh_concurrency
                .unwrap_or(DEFAULT_REFRESH_CONCURRENCY)
                .max(1),
            refresh_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rspotify::{Credentials, OAuth};

    #[test]
    fn refresh_interval_zero_disables() {
        assert_eq!(parse_refresh_interval("0").unwrap(), None);
        assert_eq!(
            parse_refresh_interval(" 30 ").unwrap(),
            Some(Duration::from_secs(30 * 60))
        );
        assert!(parse_refresh_interval("soon").is_err());
    }

    #[tokio::test]
    async fn explicit_settings_win() {
        let dir = tempfile::tempdir().unwrap();
        let genres = HashSet::from(["shoegaze".to_string()]);
        let config = ConfigBuilder::new()
            .spotify(SpotifyClient::new(
                Credentials::new("id", "secret"),
                OAuth::default(),
            ))
            .db_path(dir.path().join("config.duckdb"))
            .bind_addr("127.0.0.1:4321".parse().unwrap())
            .preferred_genres(genres.clone())
            .refresh_interval(None)
            .refresh_concurrency(0)
            .build()
            .await
            .unwrap();

        assert_eq!(config.preferred_genres, genres);
        assert_eq!(config.bind_addr.port(), 4321);
        assert_eq!(config.refresh_interval, None);
        assert_eq!(config.refresh_concurrency, 1);
    }

    #[tokio::test]
    async fn storage_opens_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(Some(dir.path().join("init.duckdb")))
            .await
            .unwrap();
        storage.init_db().await.unwrap();
        assert!(storage.list_users().await.unwrap().is_empty());
    }

    #[test]
    fn genres_from_env_format() {
        let genres = parse_genres(" Art Pop, ,chillwave,");
        assert_eq!(genres.len(), 2);
        assert!(genres.contains("art pop"));
        assert!(genres.contains("chillwave"));
    }
}
