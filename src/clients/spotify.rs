use async_trait::async_trait;
use chrono::Utc;
use futures::future::try_join_all;
use log::{debug, info};
use rspotify::{
    AuthCodeSpotify, ClientCredsSpotify, Config, Credentials, OAuth, Token,
    model::{ArtistId, TimeRange, TrackId},
    prelude::*,
    scopes,
};

use crate::clients::{
    entities::{Artist, StatsSnapshot, Timeframe, Track, UserProfile, UserToken},
    errors::{Error, Result},
};

/// Number of top items requested per timeframe.
pub const ENTITY_FETCH_COUNT: u32 = 50;
/// Spotify's limit for the batch artists/tracks endpoints.
pub const MAX_BATCH_ENTITY_COUNT: usize = 50;

impl From<Timeframe> for TimeRange {
    fn from(tf: Timeframe) -> TimeRange {
        match tf {
            Timeframe::Short => TimeRange::ShortTerm,
            Timeframe::Medium => TimeRange::MediumTerm,
            Timeframe::Long => TimeRange::LongTerm,
        }
    }
}

impl From<Token> for UserToken {
    fn from(token: Token) -> UserToken {
        UserToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_at,
        }
    }
}

impl From<&UserToken> for Token {
    fn from(token: &UserToken) -> Token {
        Token {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token.expires_at,
            ..Default::default()
        }
    }
}

/// Everything the stats service needs from the music API.
#[async_trait]
pub trait MusicApi: Send + Sync {
    async fn top_artists(&self, token: &UserToken, timeframe: Timeframe) -> Result<Vec<Artist>>;

    async fn top_tracks(&self, token: &UserToken, timeframe: Timeframe) -> Result<Vec<Track>>;

    /// Fetches at most `MAX_BATCH_ENTITY_COUNT` artists, in the order of `ids`.
    async fn artists(&self, ids: &[&str]) -> Result<Vec<Artist>>;

    /// Fetches at most `MAX_BATCH_ENTITY_COUNT` tracks, in the order of `ids`.
    async fn tracks(&self, ids: &[&str]) -> Result<Vec<Track>>;

    async fn user_profile(&self, token: &UserToken) -> Result<UserProfile>;

    /// Exchanges a refresh token for a new access token.
    async fn refresh_user_token(&self, token: &UserToken) -> Result<UserToken>;

    /// URL the user is sent to in order to grant access. `state` is echoed back to the callback.
    fn authorize_url(&self, state: &str) -> Result<String>;

    /// Trades the code from the OAuth callback for a user token.
    async fn exchange_code(&self, code: &str) -> Result<UserToken>;
}

pub struct SpotifyClient {
    creds: Credentials,
    oauth: OAuth,
    // Client-credentials flow, used for metadata lookups that aren't tied to a user
    app: ClientCredsSpotify,
}

impl SpotifyClient {
    pub fn new(creds: Credentials, oauth: OAuth) -> Self {
        let app = ClientCredsSpotify::with_config(
            creds.clone(),
            Config {
                token_refreshing: true,
                ..Default::default()
            },
        );
        SpotifyClient { creds, oauth, app }
    }

    // Create a SpotifyClient from environment variables or raise a configuration error
    pub fn try_default() -> Result<Self> {
        let creds = Credentials::from_env()
            .ok_or_else(|| Error::ConfigurationError("Missing Spotify credentials, set RSPOTIFY_CLIENT_ID and RSPOTIFY_CLIENT_SECRET.".into()))?;
        let oauth = OAuth::from_env(scopes!("user-top-read", "user-read-recently-played"))
            .ok_or_else(|| Error::ConfigurationError("Missing Spotify OAuth configuration, set RSPOTIFY_REDIRECT_URI.".into()))?;

        Ok(Self::new(creds, oauth))
    }

    /// Requests the app token used for batch lookups.
    pub async fn authorize_app(&self) -> Result<()> {
        debug!("Requesting Spotify client credentials token ...");
        self.app.request_token().await?;
        Ok(())
    }

    fn user_client(&self, token: &UserToken) -> AuthCodeSpotify {
        AuthCodeSpotify::from_token_with_config(
            Token::from(token),
            self.creds.clone(),
            self.oauth.clone(),
            Config {
                token_refreshing: false,
                ..Default::default()
            },
        )
    }
}

async fn read_token(spotify: &AuthCodeSpotify) -> Result<UserToken> {
    let guard = spotify.token.lock().await.map_err(|_| Error::MissingToken)?;
    guard.clone().map(UserToken::from).ok_or(Error::MissingToken)
}

#[async_trait]
impl MusicApi for SpotifyClient {
    async fn top_artists(&self, token: &UserToken, timeframe: Timeframe) -> Result<Vec<Artist>> {
        let page = self
            .user_client(token)
            .current_user_top_artists_manual(Some(timeframe.into()), Some(ENTITY_FETCH_COUNT), None)
            .await?;
        Ok(page.items.into_iter().map(Artist::from).collect())
    }

    async fn top_tracks(&self, token: &UserToken, timeframe: Timeframe) -> Result<Vec<Track>> {
        let page = self
            .user_client(token)
            .current_user_top_tracks_manual(Some(timeframe.into()), Some(ENTITY_FETCH_COUNT), None)
            .await?;
        Ok(page.items.into_iter().filter_map(Track::try_from_full).collect())
    }

    async fn artists(&self, ids: &[&str]) -> Result<Vec<Artist>> {
        let ids = ids
            .iter()
            .map(|id| ArtistId::from_id(*id))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let artists = self.app.artists(ids).await?;
        Ok(artists.into_iter().map(Artist::from).collect())
    }

    async fn tracks(&self, ids: &[&str]) -> Result<Vec<Track>> {
        let ids = ids
            .iter()
            .map(|id| TrackId::from_id(*id))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let tracks = self.app.tracks(ids, None).await?;
        Ok(tracks.into_iter().filter_map(Track::try_from_full).collect())
    }

    async fn user_profile(&self, token: &UserToken) -> Result<UserProfile> {
        let user = self.user_client(token).me().await?;
        Ok(UserProfile {
            spotify_id: user.id.id().to_string(),
            display_name: user.display_name,
        })
    }

    async fn refresh_user_token(&self, token: &UserToken) -> Result<UserToken> {
        if token.refresh_token.is_none() {
            return Err(Error::MissingToken);
        }
        let spotify = self.user_client(token);
        spotify.refresh_token().await?;
        let refreshed = read_token(&spotify).await?;
        debug!("Refreshed user access token");
        Ok(UserToken {
            // Spotify doesn't always rotate the refresh token
            refresh_token: refreshed.refresh_token.or_else(|| token.refresh_token.clone()),
            ..refreshed
        })
    }

    fn authorize_url(&self, state: &str) -> Result<String> {
        let mut oauth = self.oauth.clone();
        oauth.state = state.to_string();
        let spotify = AuthCodeSpotify::new(self.creds.clone(), oauth);
        Ok(spotify.get_authorize_url(false)?)
    }

    async fn exchange_code(&self, code: &str) -> Result<UserToken> {
        let spotify = AuthCodeSpotify::new(self.creds.clone(), self.oauth.clone());
        spotify.request_token(code).await?;
        let token = read_token(&spotify).await?;
        debug!("Exchanged authorization code for a user token");
        Ok(token)
    }
}

/// Fetches the user's current top tracks and artists for every timeframe.
///
/// All six requests (two entity kinds times three timeframes) run concurrently; ranking is the
/// position in each response.
pub async fn fetch_cur_stats<A: MusicApi + ?Sized>(
    api: &A,
    token: &UserToken,
) -> Result<StatsSnapshot> {
    info!("Kicking off 6 top items requests ...");
    let track_requests = Timeframe::ALL
        .into_iter()
        .map(|tf| async move { api.top_tracks(token, tf).await.map(|tracks| (tf, tracks)) });
    let artist_requests = Timeframe::ALL
        .into_iter()
        .map(|tf| async move { api.top_artists(token, tf).await.map(|artists| (tf, artists)) });

    let (tracks, artists) =
        futures::try_join!(try_join_all(track_requests), try_join_all(artist_requests))?;

    let mut snapshot = StatsSnapshot::new(Utc::now());
    for (tf, items) in tracks {
        for track in items {
            snapshot.tracks.add_item(tf, track);
        }
    }
    for (tf, items) in artists {
        for artist in items {
            snapshot.artists.add_item(tf, artist);
        }
    }
    debug!(
        "Fetched {} top tracks and {} top artists",
        snapshot.tracks.iter().map(|(_, t)| t.len()).sum::<usize>(),
        snapshot.artists.iter().map(|(_, a)| a.len()).sum::<usize>()
    );
    Ok(snapshot)
}
