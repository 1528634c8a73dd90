use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rspotify::model::{FullArtist, FullTrack, SimplifiedAlbum, SimplifiedArtist};
use rspotify::prelude::Id;
use serde::{Deserialize, Serialize};

use crate::clients::errors::Error;

/// Ranking window used by Spotify's top items endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    #[default]
    Short,
    Medium,
    Long,
}

impl Timeframe {
    /// All timeframes in display order.
    pub const ALL: [Timeframe; 3] = [Timeframe::Short, Timeframe::Medium, Timeframe::Long];

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Short => "short",
            Timeframe::Medium => "medium",
            Timeframe::Long => "long",
        }
    }

    /// Numeric id used in the rank snapshot tables.
    pub fn id(self) -> u8 {
        match self {
            Timeframe::Short => 0,
            Timeframe::Medium => 1,
            Timeframe::Long => 2,
        }
    }

    pub fn from_id(id: u8) -> Result<Self, Error> {
        match id {
            0 => Ok(Timeframe::Short),
            1 => Ok(Timeframe::Medium),
            2 => Ok(Timeframe::Long),
            other => Err(Error::InvalidTimeframe(other.to_string())),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" => Ok(Timeframe::Short),
            "medium" => Ok(Timeframe::Medium),
            "long" => Ok(Timeframe::Long),
            other => Err(Error::InvalidTimeframe(other.to_string())),
        }
    }
}

/// One list of items per timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeFrames<T> {
    pub short: Vec<T>,
    pub medium: Vec<T>,
    pub long: Vec<T>,
}

impl<T> Default for TimeFrames<T> {
    fn default() -> Self {
        Self {
            short: Vec::new(),
            medium: Vec::new(),
            long: Vec::new(),
        }
    }
}

impl<T> TimeFrames<T> {
    pub fn get(&self, timeframe: Timeframe) -> &[T] {
        match timeframe {
            Timeframe::Short => &self.short,
            Timeframe::Medium => &self.medium,
            Timeframe::Long => &self.long,
        }
    }

    pub fn get_mut(&mut self, timeframe: Timeframe) -> &mut Vec<T> {
        match timeframe {
            Timeframe::Short => &mut self.short,
            Timeframe::Medium => &mut self.medium,
            Timeframe::Long => &mut self.long,
        }
    }

    pub fn add_item(&mut self, timeframe: Timeframe, item: T) {
        self.get_mut(timeframe).push(item);
    }

    /// Iterates `(timeframe, items)` pairs in display order.
    pub fn iter(&self) -> impl Iterator<Item = (Timeframe, &[T])> {
        Timeframe::ALL.into_iter().map(move |tf| (tf, self.get(tf)))
    }

    pub fn into_iter_frames(self) -> impl Iterator<Item = (Timeframe, Vec<T>)> {
        [
            (Timeframe::Short, self.short),
            (Timeframe::Medium, self.medium),
            (Timeframe::Long, self.long),
        ]
        .into_iter()
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> TimeFrames<U> {
        TimeFrames {
            short: self.short.into_iter().map(&mut f).collect(),
            medium: self.medium.into_iter().map(&mut f).collect(),
            long: self.long.into_iter().map(&mut f).collect(),
        }
    }

    /// Applies `f` to each timeframe's whole list.
    pub fn map_frames<U>(self, mut f: impl FnMut(Vec<T>) -> Vec<U>) -> TimeFrames<U> {
        TimeFrames {
            short: f(self.short),
            medium: f(self.medium),
            long: f(self.long),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.short.is_empty() && self.medium.is_empty() && self.long.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl From<rspotify::model::Image> for Image {
    fn from(img: rspotify::model::Image) -> Self {
        Image {
            url: img.url,
            width: img.width,
            height: img.height,
        }
    }
}

/// Artist as embedded in track and album payloads; carries no genres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
    pub uri: String,
}

impl ArtistRef {
    fn from_simplified(artist: SimplifiedArtist) -> Option<Self> {
        let id = artist.id?;
        Some(ArtistRef {
            id: id.id().to_string(),
            uri: id.uri(),
            name: artist.name,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: Option<String>,
    pub name: String,
    pub images: Vec<Image>,
    pub artists: Vec<ArtistRef>,
}

impl From<SimplifiedAlbum> for Album {
    fn from(album: SimplifiedAlbum) -> Self {
        Album {
            id: album.id.map(|id| id.id().to_string()),
            name: album.name,
            images: album.images.into_iter().map(Image::from).collect(),
            artists: album
                .artists
                .into_iter()
                .filter_map(ArtistRef::from_simplified)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub uri: String,
    pub genres: Vec<String>,
    pub images: Vec<Image>,
    pub popularity: u32,
    pub followers: u32,
}

impl Artist {
    /// URL of the first (largest) image, if Spotify returned any.
    pub fn image_url(&self) -> Option<&str> {
        self.images.first().map(|img| img.url.as_str())
    }
}

impl From<FullArtist> for Artist {
    fn from(artist: FullArtist) -> Self {
        Artist {
            id: artist.id.id().to_string(),
            uri: artist.id.uri(),
            name: artist.name,
            genres: artist.genres,
            images: artist.images.into_iter().map(Image::from).collect(),
            popularity: artist.popularity,
            followers: artist.followers.total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub uri: String,
    pub album: Album,
    pub artists: Vec<ArtistRef>,
    pub preview_url: Option<String>,
    pub popularity: u32,
}

impl Track {
    pub fn image_url(&self) -> Option<&str> {
        self.album.images.first().map(|img| img.url.as_str())
    }

    /// Local files have no Spotify id and can't be ranked or cached.
    pub fn try_from_full(track: FullTrack) -> Option<Self> {
        let id = track.id?;
        Some(Track {
            id: id.id().to_string(),
            uri: id.uri(),
            name: track.name,
            album: Album::from(track.album),
            artists: track
                .artists
                .into_iter()
                .filter_map(ArtistRef::from_simplified)
                .collect(),
            preview_url: track.preview_url,
            popularity: track.popularity,
        })
    }
}

/// Spotify profile of the user who authorized the app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub spotify_id: String,
    pub display_name: Option<String>,
}

/// OAuth credentials for a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub spotify_id: String,
    pub username: String,
    pub token: UserToken,
    pub creation_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

/// A user's top tracks and artists as fetched at `last_update_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub last_update_time: DateTime<Utc>,
    pub tracks: TimeFrames<Track>,
    pub artists: TimeFrames<Artist>,
}

impl StatsSnapshot {
    pub fn new(last_update_time: DateTime<Utc>) -> Self {
        Self {
            last_update_time,
            tracks: TimeFrames::default(),
            artists: TimeFrames::default(),
        }
    }

    /// Genres for every ranked artist, keyed by Spotify id.
    pub fn genres_by_artist_id(&self) -> HashMap<String, Vec<String>> {
        self.artists
            .iter()
            .flat_map(|(_, artists)| artists.iter())
            .map(|artist| (artist.id.clone(), artist.genres.clone()))
            .collect()
    }
}

/// Kind of entity held in the metadata cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Artist,
    Track,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Artist => "artist",
            EntityKind::Track => "track",
        }
    }
}
