use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_duckdb::ClientBuilder;
use async_duckdb::duckdb::{self, OptionalExt, params, params_from_iter};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, error};
use serde::{Serialize, de::DeserializeOwned};

use crate::clients::entities::{
    EntityKind, StatsSnapshot, TimeFrames, Timeframe, User, UserProfile, UserToken,
};
use crate::clients::errors::{Error, Result};

enum Table {
    Users,
    Snapshots,
    SpotifyItems,
    ArtistRankSnapshots,
    TrackRankSnapshots,
    ArtistsGenres,
    TracksArtists,
    EntityCache,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Snapshots => "stats_snapshots",
            Table::SpotifyItems => "spotify_items",
            Table::ArtistRankSnapshots => "artist_rank_snapshots",
            Table::TrackRankSnapshots => "track_rank_snapshots",
            Table::ArtistsGenres => "artists_genres",
            Table::TracksArtists => "tracks_artists",
            Table::EntityCache => "entity_cache",
        }
    }

    fn rank_table(kind: EntityKind) -> Table {
        match kind {
            EntityKind::Artist => Table::ArtistRankSnapshots,
            EntityKind::Track => Table::TrackRankSnapshots,
        }
    }
}

/// One point in an artist's ranking history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RankPoint {
    pub update_time: DateTime<Utc>,
    pub ranking: u16,
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn rank_rows(frames: TimeFrames<&String>, mapping: &HashMap<String, i32>) -> Vec<(i32, i32, i32)> {
    frames
        .into_iter_frames()
        .flat_map(|(tf, ids)| {
            ids.into_iter()
                .enumerate()
                .map(move |(ranking, id)| (tf, ranking, id))
        })
        .filter_map(|(tf, ranking, id)| {
            let ranking = i32::try_from(ranking).ok()?;
            mapping
                .get(id)
                .map(|mapped| (*mapped, i32::from(tf.id()), ranking))
        })
        .collect()
}

type UserRow = (i64, String, String, String, Option<String>, Option<i64>, i64, i64);

fn user_from_row(row: UserRow) -> User {
    let (id, spotify_id, username, access_token, refresh_token, expires_at, created, updated) = row;
    User {
        id,
        spotify_id,
        username,
        token: UserToken {
            access_token,
            refresh_token,
            expires_at: expires_at.map(from_millis),
        },
        creation_time: from_millis(created),
        last_update_time: from_millis(updated),
    }
}

pub struct LocalStorage {
    client: async_duckdb::Client,
}

impl LocalStorage {
    pub fn new(client: async_duckdb::Client) -> Self {
        LocalStorage { client }
    }

    pub async fn init_db(&self) -> Result<()> {
        // Create necessary tables that tunestats will use
        let table_query = format!(
            "
            CREATE SEQUENCE IF NOT EXISTS user_id_sequence START 1;
            CREATE SEQUENCE IF NOT EXISTS item_id_sequence START 1;
            CREATE TABLE IF NOT EXISTS {users} (
                id BIGINT PRIMARY KEY DEFAULT nextval('user_id_sequence'),
                spotify_id TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL UNIQUE,
                token TEXT NOT NULL,
                refresh_token TEXT,
                token_expires_at BIGINT,
                creation_time BIGINT NOT NULL,
                last_update_time BIGINT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {snapshots} (
                user_id BIGINT NOT NULL,
                update_time BIGINT NOT NULL,
                PRIMARY KEY (user_id, update_time)
            );
            CREATE TABLE IF NOT EXISTS {items} (
                id INTEGER PRIMARY KEY DEFAULT nextval('item_id_sequence'),
                spotify_id TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS {artist_ranks} (
                user_id BIGINT NOT NULL,
                update_time BIGINT NOT NULL,
                mapped_spotify_id INTEGER NOT NULL,
                timeframe TINYINT NOT NULL,
                ranking SMALLINT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {track_ranks} (
                user_id BIGINT NOT NULL,
                update_time BIGINT NOT NULL,
                mapped_spotify_id INTEGER NOT NULL,
                timeframe TINYINT NOT NULL,
                ranking SMALLINT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {genres} (
                artist_id INTEGER NOT NULL,
                genre TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {tracks_artists} (
                track_id INTEGER NOT NULL,
                artist_id INTEGER NOT NULL,
                PRIMARY KEY (track_id, artist_id)
            );
            CREATE TABLE IF NOT EXISTS {cache} (
                kind TEXT NOT NULL,
                spotify_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (kind, spotify_id)
            );
        ",
            users = Table::Users.as_str(),
            snapshots = Table::Snapshots.as_str(),
            items = Table::SpotifyItems.as_str(),
            artist_ranks = Table::ArtistRankSnapshots.as_str(),
            track_ranks = Table::TrackRankSnapshots.as_str(),
            genres = Table::ArtistsGenres.as_str(),
            tracks_artists = Table::TracksArtists.as_str(),
            cache = Table::EntityCache.as_str(),
        );
        self.client
            .conn(move |conn| conn.execute_batch(&table_query))
            .await?;

        debug!("Successfully initialized local storage database");
        Ok(())
    }

    pub async fn open(db_path: &Path) -> Result<Self> {
        let client: async_duckdb::Client = ClientBuilder::new().path(db_path).open().await?;
        debug!("Opened local storage database at {db_path:?}");
        Ok(LocalStorage { client })
    }

    pub async fn try_default() -> Result<Self> {
        Self::open(&Self::default_path()).await
    }

    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp")) // Fallback to /tmp if cache directory can't be determined
            .join(".tunestats_db.duckdb")
    }

    /// Inserts a user or, if one with the same Spotify id exists, refreshes their token.
    ///
    /// Usernames are Spotify user ids; display names are neither unique nor URL safe.
    pub async fn upsert_user(&self, profile: &UserProfile, token: &UserToken) -> Result<User> {
        let now = to_millis(Utc::now());
        let spotify_id = profile.spotify_id.clone();
        let username = profile.spotify_id.clone();
        let token = token.clone();
        let query = format!(
            "INSERT INTO {users} (spotify_id, username, token, refresh_token, token_expires_at, creation_time, last_update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (spotify_id) DO UPDATE SET
                username = excluded.username,
                token = excluded.token,
                refresh_token = COALESCE(excluded.refresh_token, {users}.refresh_token),
                token_expires_at = excluded.token_expires_at;",
            users = Table::Users.as_str()
        );

        self.client
            .conn(move |conn| {
                conn.execute(
                    &query,
                    params![
                        spotify_id,
                        username,
                        token.access_token,
                        token.refresh_token,
                        token.expires_at.map(to_millis),
                        now
                    ],
                )
            })
            .await?;

        let user = self
            .get_user_by_spotify_id(&profile.spotify_id)
            .await?
            .ok_or_else(|| Error::UserNotFound(profile.spotify_id.clone()))?;
        debug!("Upserted user {} (id {})", user.username, user.id);
        Ok(user)
    }

    async fn get_user_where(&self, column: &'static str, value: &str) -> Result<Option<User>> {
        let query = format!(
            "SELECT id, spotify_id, username, token, refresh_token, token_expires_at, creation_time, last_update_time
             FROM {} WHERE {column} = ?1 LIMIT 1;",
            Table::Users.as_str()
        );
        let value = value.to_string();

        let row: Option<UserRow> = self
            .client
            .conn(move |conn| {
                conn.query_row(&query, [value], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                })
                .optional()
            })
            .await?;

        Ok(row.map(user_from_row))
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.get_user_where("username", username).await
    }

    pub async fn get_user_by_spotify_id(&self, spotify_id: &str) -> Result<Option<User>> {
        self.get_user_where("spotify_id", spotify_id).await
    }

    /// All users, least recently updated first.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let query = format!(
            "SELECT id, spotify_id, username, token, refresh_token, token_expires_at, creation_time, last_update_time
             FROM {} ORDER BY last_update_time, id;",
            Table::Users.as_str()
        );

        let rows: Vec<UserRow> = self
            .client
            .conn(move |conn| {
                let mut stmt = conn.prepare(&query)?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                })?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
            })
            .await?;

        Ok(rows.into_iter().map(user_from_row).collect())
    }

    pub async fn update_user_token(&self, user_id: i64, token: &UserToken) -> Result<()> {
        let query = format!(
            "UPDATE {} SET token = ?1, refresh_token = COALESCE(?2, refresh_token), token_expires_at = ?3 WHERE id = ?4;",
            Table::Users.as_str()
        );
        let token = token.clone();

        self.client
            .conn(move |conn| {
                conn.execute(
                    &query,
                    params![
                        token.access_token,
                        token.refresh_token,
                        token.expires_at.map(to_millis),
                        user_id
                    ],
                )
            })
            .await?;

        debug!("Updated access token for user {user_id}");
        Ok(())
    }

    pub async fn update_user_last_updated(
        &self,
        user_id: i64,
        update_time: DateTime<Utc>,
    ) -> Result<usize> {
        let query = format!(
            "UPDATE {} SET last_update_time = ?1 WHERE id = ?2;",
            Table::Users.as_str()
        );
        let millis = to_millis(update_time);

        let updated = self
            .client
            .conn(move |conn| conn.execute(&query, params![millis, user_id]))
            .await?;
        Ok(updated)
    }

    /// Maps Spotify ids to internal integer ids, allocating ids for the ones not seen before.
    pub async fn retrieve_mapped_spotify_ids<'a>(
        &self,
        spotify_ids: impl Iterator<Item = &'a String>,
    ) -> Result<HashMap<String, i32>> {
        let mut ids: Vec<String> = spotify_ids.cloned().collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let insert_query = format!(
            "INSERT INTO {} (spotify_id) VALUES (?1) ON CONFLICT DO NOTHING;",
            Table::SpotifyItems.as_str()
        );
        let select_query = format!(
            "SELECT spotify_id, id FROM {} WHERE spotify_id IN ({});",
            Table::SpotifyItems.as_str(),
            placeholders(ids.len())
        );

        let mapping = self
            .client
            .conn(move |conn| {
                {
                    let mut insert = conn.prepare(&insert_query)?;
                    for id in &ids {
                        insert.execute([id])?;
                    }
                }
                let mut stmt = conn.prepare(&select_query)?;
                let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)?))
                })?;
                rows.collect::<std::result::Result<HashMap<_, _>, _>>()
            })
            .await?;

        Ok(mapping)
    }

    /// Records the snapshot and stores rank rows for every timeframe along with the track/artist
    /// and artist/genre mappings, then bumps the user's last update time.
    ///
    /// A snapshot with empty top lists is still recorded, so it reads back as empty rankings.
    pub async fn store_stats_snapshot(&self, user: &User, stats: &StatsSnapshot) -> Result<()> {
        let update_time = to_millis(stats.last_update_time);
        let user_id = user.id;

        let genres_by_artist_id = stats.genres_by_artist_id();
        // Also map every artist referenced from track metadata
        let artist_spotify_ids: Vec<String> = genres_by_artist_id
            .keys()
            .cloned()
            .chain(stats.tracks.iter().flat_map(|(_, tracks)| {
                tracks
                    .iter()
                    .flat_map(|track| track.artists.iter().map(|a| a.id.clone()))
            }))
            .collect();
        let mapped_artist_ids = self
            .retrieve_mapped_spotify_ids(artist_spotify_ids.iter())
            .await?;

        let track_spotify_ids: Vec<String> = stats
            .tracks
            .iter()
            .flat_map(|(_, tracks)| tracks.iter().map(|track| track.id.clone()))
            .collect();
        let mapped_track_ids = self
            .retrieve_mapped_spotify_ids(track_spotify_ids.iter())
            .await?;

        let artist_rows = rank_rows(
            TimeFrames {
                short: stats.artists.short.iter().map(|a| &a.id).collect(),
                medium: stats.artists.medium.iter().map(|a| &a.id).collect(),
                long: stats.artists.long.iter().map(|a| &a.id).collect(),
            },
            &mapped_artist_ids,
        );
        let track_rows = rank_rows(
            TimeFrames {
                short: stats.tracks.short.iter().map(|t| &t.id).collect(),
                medium: stats.tracks.medium.iter().map(|t| &t.id).collect(),
                long: stats.tracks.long.iter().map(|t| &t.id).collect(),
            },
            &mapped_track_ids,
        );

        // Create track/artist mapping entries for each (track, artist) pair
        let mapped_artists = &mapped_artist_ids;
        let track_artist_pairs: Vec<(i32, i32)> = stats
            .tracks
            .iter()
            .flat_map(|(_, tracks)| tracks.iter())
            .flat_map(|track| {
                let track_id = mapped_track_ids.get(&track.id).copied();
                track.artists.iter().filter_map(move |artist| {
                    Some((track_id?, *mapped_artists.get(&artist.id)?))
                })
            })
            .collect();

        let mut artist_genre_pairs: Vec<(i32, String)> = genres_by_artist_id
            .iter()
            .filter_map(|(id, genres)| mapped_artist_ids.get(id).map(|mapped| (*mapped, genres)))
            .flat_map(|(mapped, genres)| genres.iter().map(move |g| (mapped, g.clone())))
            .collect();
        artist_genre_pairs.sort_unstable();
        artist_genre_pairs.dedup();
        let genre_artist_ids: Vec<i32> = genres_by_artist_id
            .keys()
            .filter_map(|id| mapped_artist_ids.get(id).copied())
            .collect();

        let snapshots = Table::Snapshots.as_str();
        let artist_ranks = Table::ArtistRankSnapshots.as_str();
        let track_ranks = Table::TrackRankSnapshots.as_str();
        let tracks_artists = Table::TracksArtists.as_str();
        let genres = Table::ArtistsGenres.as_str();

        let res = self
            .client
            .conn(move |conn| {
                conn.execute_batch("BEGIN TRANSACTION;")?;
                let result = (|| -> duckdb::Result<()> {
                    conn.execute(
                        &format!(
                            "INSERT OR IGNORE INTO {snapshots} (user_id, update_time) VALUES (?1, ?2);"
                        ),
                        params![user_id, update_time],
                    )?;
                    for (table, rows) in [(artist_ranks, &artist_rows), (track_ranks, &track_rows)] {
                        // Two snapshots within the same millisecond share one timestamp
                        conn.execute(
                            &format!("DELETE FROM {table} WHERE user_id = ?1 AND update_time = ?2;"),
                            params![user_id, update_time],
                        )?;
                        let mut stmt = conn.prepare(&format!(
                            "INSERT INTO {table} (user_id, update_time, mapped_spotify_id, timeframe, ranking) VALUES (?1, ?2, ?3, ?4, ?5);"
                        ))?;
                        for (mapped, tf, ranking) in rows {
                            stmt.execute(params![user_id, update_time, mapped, tf, ranking])?;
                        }
                    }

                    let mut stmt = conn.prepare(&format!(
                        "INSERT OR IGNORE INTO {tracks_artists} (track_id, artist_id) VALUES (?1, ?2);"
                    ))?;
                    for (track_id, artist_id) in &track_artist_pairs {
                        stmt.execute(params![track_id, artist_id])?;
                    }

                    // Replace genres of every artist in this snapshot so stale genres don't linger
                    if !genre_artist_ids.is_empty() {
                        conn.execute(
                            &format!(
                                "DELETE FROM {genres} WHERE artist_id IN ({});",
                                placeholders(genre_artist_ids.len())
                            ),
                            params_from_iter(genre_artist_ids.iter()),
                        )?;
                    }
                    let mut stmt = conn.prepare(&format!(
                        "INSERT INTO {genres} (artist_id, genre) VALUES (?1, ?2);"
                    ))?;
                    for (artist_id, genre) in &artist_genre_pairs {
                        stmt.execute(params![artist_id, genre])?;
                    }
                    Ok(())
                })();

                match result {
                    Ok(()) => conn.execute_batch("COMMIT;"),
                    Err(e) => {
                        conn.execute_batch("ROLLBACK;")?;
                        Err(e)
                    }
                }
            })
            .await;

        if let Err(e) = res {
            error!("Error storing stats snapshot for user {user_id}: {e:?}");
            return Err(Error::StorageError(e));
        }

        // Update the user to have a last update time that matches all of the new updates
        let updated_row_count = self
            .update_user_last_updated(user_id, stats.last_update_time)
            .await?;
        if updated_row_count != 1 {
            error!(
                "Updated {updated_row_count} rows when setting last update time, but should have updated 1."
            );
        }

        debug!("Stored stats snapshot for user {user_id}");
        Ok(())
    }

    /// Spotify ids of the user's most recent snapshot, ordered by ranking within each timeframe.
    ///
    /// `None` only when no snapshot was ever taken; a snapshot of empty top lists gives empty
    /// timeframes.
    pub async fn latest_snapshot_ids(
        &self,
        user_id: i64,
        kind: EntityKind,
    ) -> Result<Option<(DateTime<Utc>, TimeFrames<String>)>> {
        let latest_query = format!(
            "SELECT MAX(update_time) FROM {} WHERE user_id = ?1;",
            Table::Snapshots.as_str()
        );
        let rank_query = format!(
            "SELECT s.timeframe, i.spotify_id
             FROM {table} s JOIN {items} i ON i.id = s.mapped_spotify_id
             WHERE s.user_id = ?1 AND s.update_time = ?2
             ORDER BY s.timeframe, s.ranking;",
            table = Table::rank_table(kind).as_str(),
            items = Table::SpotifyItems.as_str()
        );

        let latest = self
            .client
            .conn(move |conn| -> duckdb::Result<Option<(i64, Vec<(i8, String)>)>> {
                let Some(update_time) = conn.query_row(&latest_query, [user_id], |row| {
                    row.get::<_, Option<i64>>(0)
                })?
                else {
                    return Ok(None);
                };

                let mut stmt = conn.prepare(&rank_query)?;
                let rows = stmt.query_map(params![user_id, update_time], |row| {
                    Ok((row.get::<_, i8>(0)?, row.get::<_, String>(1)?))
                })?;
                let rows = rows.collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Some((update_time, rows)))
            })
            .await?;

        let Some((update_time, rows)) = latest else {
            return Ok(None);
        };
        let mut frames = TimeFrames::default();
        for (tf, id) in rows {
            let tf = u8::try_from(tf)
                .map_err(|_| Error::InvalidTimeframe(tf.to_string()))
                .and_then(Timeframe::from_id)?;
            frames.add_item(tf, id);
        }
        Ok(Some((from_millis(update_time), frames)))
    }

    /// Every recorded ranking of the artist for the user, oldest first.
    pub async fn artist_rank_history(
        &self,
        user_id: i64,
        artist_id: &str,
    ) -> Result<TimeFrames<RankPoint>> {
        let query = format!(
            "SELECT s.update_time, s.timeframe, s.ranking
             FROM {ranks} s JOIN {items} i ON i.id = s.mapped_spotify_id
             WHERE s.user_id = ?1 AND i.spotify_id = ?2
             ORDER BY s.update_time;",
            ranks = Table::ArtistRankSnapshots.as_str(),
            items = Table::SpotifyItems.as_str()
        );
        let artist_id = artist_id.to_string();

        let rows = self
            .client
            .conn(move |conn| {
                let mut stmt = conn.prepare(&query)?;
                let rows = stmt.query_map(params![user_id, artist_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i8>(1)?,
                        row.get::<_, i16>(2)?,
                    ))
                })?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
            })
            .await?;

        let mut history = TimeFrames::default();
        for (update_time, tf, ranking) in rows {
            let tf = u8::try_from(tf)
                .map_err(|_| Error::InvalidTimeframe(tf.to_string()))
                .and_then(Timeframe::from_id)?;
            history.add_item(
                tf,
                RankPoint {
                    update_time: from_millis(update_time),
                    ranking: u16::try_from(ranking).unwrap_or_default(),
                },
            );
        }
        Ok(history)
    }

    /// Genres recorded for each of the given artists. Artists without genres are absent.
    pub async fn artist_genres(&self, artist_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        if artist_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = format!(
            "SELECT i.spotify_id, g.genre
             FROM {genres} g JOIN {items} i ON i.id = g.artist_id
             WHERE i.spotify_id IN ({})
             ORDER BY i.spotify_id, g.genre;",
            placeholders(artist_ids.len()),
            genres = Table::ArtistsGenres.as_str(),
            items = Table::SpotifyItems.as_str()
        );
        let ids = artist_ids.to_vec();

        let rows = self
            .client
            .conn(move |conn| {
                let mut stmt = conn.prepare(&query)?;
                let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
            })
            .await?;

        let mut genres: HashMap<String, Vec<String>> = HashMap::new();
        for (id, genre) in rows {
            genres.entry(id).or_default().push(genre);
        }
        Ok(genres)
    }

    /// Spotify ids of the artists credited on a track.
    pub async fn track_artist_ids(&self, track_id: &str) -> Result<Vec<String>> {
        let query = format!(
            "SELECT a.spotify_id
             FROM {pairs} p
             JOIN {items} t ON t.id = p.track_id
             JOIN {items} a ON a.id = p.artist_id
             WHERE t.spotify_id = ?1
             ORDER BY a.spotify_id;",
            pairs = Table::TracksArtists.as_str(),
            items = Table::SpotifyItems.as_str()
        );
        let track_id = track_id.to_string();

        let ids = self
            .client
            .conn(move |conn| {
                let mut stmt = conn.prepare(&query)?;
                let rows = stmt.query_map([track_id], |row| row.get::<_, String>(0))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
            })
            .await?;
        Ok(ids)
    }

    /// Looks up cached entities; the result has one slot per requested id.
    pub async fn get_cache_items<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        ids: &[&str],
    ) -> Result<Vec<Option<T>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT spotify_id, payload FROM {} WHERE kind = ? AND spotify_id IN ({});",
            Table::EntityCache.as_str(),
            placeholders(ids.len())
        );
        let mut args: Vec<String> = Vec::with_capacity(ids.len() + 1);
        args.push(kind.as_str().to_string());
        args.extend(ids.iter().map(|id| (*id).to_string()));

        let mut payloads = self
            .client
            .conn(move |conn| {
                let mut stmt = conn.prepare(&query)?;
                let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                rows.collect::<std::result::Result<HashMap<_, _>, _>>()
            })
            .await?;

        ids.iter()
            .map(|id| match payloads.remove(*id) {
                Some(payload) => serde_json::from_str(&payload).map(Some).map_err(|err| {
                    error!("Error deserializing cached {} {id}: {err:?}", kind.as_str());
                    Error::from(err)
                }),
                None => Ok(None),
            })
            .collect()
    }

    pub async fn set_cache_items<T: Serialize>(
        &self,
        kind: EntityKind,
        items: &[(&str, &T)],
    ) -> Result<()> {
        let rows = items
            .iter()
            .map(|(id, item)| Ok(((*id).to_string(), serde_json::to_string(item)?)))
            .collect::<Result<Vec<_>>>()?;
        if rows.is_empty() {
            return Ok(());
        }
        let query = format!(
            "INSERT OR REPLACE INTO {} (kind, spotify_id, payload) VALUES (?1, ?2, ?3);",
            Table::EntityCache.as_str()
        );
        let kind = kind.as_str();
        let count = rows.len();

        self.client
            .conn(move |conn| {
                let mut stmt = conn.prepare(&query)?;
                for (id, payload) in &rows {
                    stmt.execute(params![kind, id, payload])?;
                }
                Ok(())
            })
            .await?;

        debug!("Cached {count} {kind} entries");
        Ok(())
    }
}
