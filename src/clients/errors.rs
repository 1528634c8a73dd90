use rspotify::ClientError;
use rspotify::model::IdError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Spotify error: {0}")]
    SpotifyError(#[from] ClientError),

    #[error("Invalid Spotify id: {0}")]
    InvalidSpotifyId(#[from] IdError),

    #[error("Spotify returned no token")]
    MissingToken,

    #[error("Storage error: {0}")]
    StorageError(#[from] async_duckdb::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("No user with username \"{0}\"")]
    UserNotFound(String),

    #[error("No stats recorded for user \"{0}\"")]
    NoStats(String),

    #[error("No metadata for {kind} {id}")]
    MissingEntity { kind: &'static str, id: String },

    #[error("Invalid timeframe: \"{0}\"")]
    InvalidTimeframe(String),

    #[error("Invalid or expired OAuth state")]
    InvalidOAuthState,
}

impl Error {
    /// Whether the error was caused by the caller rather than by us or Spotify.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidSpotifyId(_) | Error::InvalidTimeframe(_) | Error::InvalidOAuthState
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::UserNotFound(_) | Error::NoStats(_) | Error::MissingEntity { .. }
        )
    }
}

impl From<std::env::VarError> for Error {
    fn from(err: std::env::VarError) -> Self {
        Error::ConfigurationError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::ConfigurationError(err.to_string())
    }
}
