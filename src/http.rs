//! HTTP surface: the HTML dashboard, a JSON API and the Spotify OAuth flow.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use log::{error, info, warn};
use rand::{Rng, distr::Alphanumeric};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::clients::{
    MusicApi,
    errors::{Error, Result},
};
use crate::config::Config;
use crate::refresher::{RefreshSummary, Refresher};
use crate::stats::StatsService;
use crate::store::{self, Action, Store};
use crate::ui::html::escape;
use crate::ui::{PageContext, StatsRoute, ViewQuery, stats_page};

/// How long a `state` handed out by `/authorize` can be used in the callback.
pub const OAUTH_STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// OAuth `state` values handed out by `/authorize`, each usable once before it expires.
#[derive(Debug)]
pub struct PendingStates {
    ttl: Duration,
    issued: HashMap<String, Instant>,
}

impl PendingStates {
    pub fn new(ttl: Duration) -> Self {
        PendingStates {
            ttl,
            issued: HashMap::new(),
        }
    }

    pub fn insert(&mut self, state: String, now: Instant) {
        self.prune(now);
        self.issued.insert(state, now);
    }

    /// Consumes `state`, returning whether it was issued and hasn't expired.
    pub fn take(&mut self, state: &str, now: Instant) -> bool {
        self.prune(now);
        self.issued.remove(state).is_some()
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.issued
            .retain(|_, issued| now.saturating_duration_since(*issued) < ttl);
    }
}

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub stats: StatsService<dyn MusicApi>,
    pub store: Arc<Store>,
    pub preferred_genres: Arc<HashSet<String>>,
    pending_states: Arc<Mutex<PendingStates>>,
}

impl AppState {
    pub fn new(stats: StatsService<dyn MusicApi>, preferred_genres: HashSet<String>) -> Self {
        Self {
            stats,
            store: Arc::new(Store::new()),
            preferred_genres: Arc::new(preferred_genres),
            pending_states: Arc::new(Mutex::new(PendingStates::new(OAUTH_STATE_TTL))),
        }
    }

    /// Number of OAuth states waiting for their callback.
    pub async fn pending_state_count(&self) -> usize {
        self.pending_states.lock().await.len()
    }

    /// Takes a new snapshot for every user and drops the refreshed users' stats from the
    /// store, so the dashboard shows the new snapshot on the next visit.
    pub async fn refresh_all(&self, concurrency: usize) -> Result<RefreshSummary> {
        let summary = Refresher::new(self.stats.clone(), concurrency)
            .refresh_all()
            .await?;
        for username in &summary.refreshed {
            self.store
                .dispatch(Action::ClearUserStats(username.clone()))
                .await;
        }
        Ok(summary)
    }
}

fn status_for(err: &Error) -> StatusCode {
    if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Error from a JSON endpoint.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {:?}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Error from an HTML page.
pub struct PageError(Error);

impl From<Error> for PageError {
    fn from(err: Error) -> Self {
        PageError(err)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Page failed to render: {:?}", self.0);
        }
        let body = format!(
            r#"<!DOCTYPE html><html lang="en"><head><meta charset="UTF-8"><title>Error</title></head><body><main class="error"><h2>{}</h2><p>{}</p><a href="/">Home</a></main></body></html>"#,
            status,
            escape(&self.0.to_string())
        );
        (status, Html(body)).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let pages = Router::new()
        .route("/", get(index_page))
        .route("/stats/{username}", get(aggregate_page))
        .route("/stats/{username}/", get(aggregate_page))
        .route("/stats/{username}/artist/{artist_id}/", get(artist_page))
        .route("/stats/{username}/genre/{genre}/", get(genre_page));

    let api = Router::new()
        .route("/api/stats/{username}", get(user_stats))
        .route("/api/stats/{username}/artist/{artist_id}", get(artist_stats))
        .route("/api/stats/{username}/genre/{genre}", get(genre_stats))
        .route("/api/stats/{username}/genres", get(genre_weights))
        .route("/api/stats/{username}/refresh", post(refresh_user));

    let auth = Router::new()
        .route("/authorize", get(authorize))
        .route("/callback", get(callback));

    Router::new()
        .merge(pages)
        .merge(api)
        .merge(auth)
        .with_state(state)
}

async fn render(
    state: &AppState,
    username: &str,
    route: StatsRoute,
    query: &ViewQuery,
) -> Result<Html<String>> {
    store::ensure_user_stats(&state.store, &state.stats, username).await?;
    if let StatsRoute::Artist(artist_id) = &route {
        store::ensure_artist_stats(&state.store, &state.stats, username, artist_id).await?;
    }

    let ctx = PageContext {
        username,
        route: &route,
        query,
        preferred_genres: &state.preferred_genres,
    };
    Ok(Html(
        state.store.select(|store| stats_page(&ctx, store)).await,
    ))
}

async fn index_page() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>tunestats</title></head>
<body>
<main>
<h1>tunestats</h1>
<p>Personal Spotify listening stats: your top tracks, artists and genres over time.</p>
<a href="/authorize">Connect with Spotify</a>
</main>
</body>
</html>"#,
    )
}

async fn aggregate_page(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<ViewQuery>,
) -> std::result::Result<Html<String>, PageError> {
    Ok(render(&state, &username, StatsRoute::Aggregate, &query).await?)
}

async fn artist_page(
    State(state): State<AppState>,
    Path((username, artist_id)): Path<(String, String)>,
    Query(query): Query<ViewQuery>,
) -> std::result::Result<Html<String>, PageError> {
    Ok(render(&state, &username, StatsRoute::Artist(artist_id), &query).await?)
}

async fn genre_page(
    State(state): State<AppState>,
    Path((username, genre)): Path<(String, String)>,
    Query(query): Query<ViewQuery>,
) -> std::result::Result<Html<String>, PageError> {
    Ok(render(&state, &username, StatsRoute::Genre(genre), &query).await?)
}

async fn user_stats(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    Ok(Json(state.stats.user_stats(&username).await?))
}

async fn artist_stats(
    State(state): State<AppState>,
    Path((username, artist_id)): Path<(String, String)>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    Ok(Json(state.stats.artist_stats(&username, &artist_id).await?))
}

async fn genre_stats(
    State(state): State<AppState>,
    Path((username, genre)): Path<(String, String)>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    Ok(Json(state.stats.genre_stats(&username, &genre).await?))
}

async fn genre_weights(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    Ok(Json(state.stats.genre_weights(&username).await?))
}

async fn refresh_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    state.stats.refresh_user(&username).await?;
    // The next page view picks up the new snapshot
    state.store.dispatch(Action::ClearUserStats(username)).await;
    Ok(StatusCode::NO_CONTENT)
}

fn random_state() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

async fn authorize(
    State(state): State<AppState>,
) -> std::result::Result<Redirect, PageError> {
    let oauth_state = random_state();
    let url = state.stats.api().authorize_url(&oauth_state)?;
    state
        .pending_states
        .lock()
        .await
        .insert(oauth_state, Instant::now());
    Ok(Redirect::to(&url))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> std::result::Result<Redirect, PageError> {
    let known_state = match &query.state {
        Some(s) => state.pending_states.lock().await.take(s, Instant::now()),
        None => false,
    };
    if !known_state {
        return Err(Error::InvalidOAuthState.into());
    }
    if let Some(err) = query.error {
        warn!("User denied Spotify authorization: {err}");
        return Ok(Redirect::to("/"));
    }
    let code = query.code.ok_or(Error::InvalidOAuthState)?;

    let api = state.stats.api();
    let token = api.exchange_code(&code).await?;
    let profile = api.user_profile(&token).await?;
    let user = state.stats.storage().upsert_user(&profile, &token).await?;
    info!("User {} authorized", user.username);

    let username = user.username.clone();
    // The stats page takes a snapshot itself if this one fails
    if let Err(e) = state.stats.refresh(user).await {
        warn!("Initial refresh for {username} failed: {e:?}");
    }
    state
        .store
        .dispatch(Action::ClearUserStats(username.clone()))
        .await;

    Ok(Redirect::to(&StatsRoute::Aggregate.path(&username)))
}

/// Refreshes every user each `period`, starting one period after startup.
fn spawn_periodic_refresh(state: AppState, period: Duration, concurrency: usize) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match state.refresh_all(concurrency).await {
                Ok(summary) if !summary.failed.is_empty() => {
                    warn!("Periodic refresh failed for: {}", summary.failed.join(", "));
                }
                Ok(_) => {}
                Err(e) => error!("Periodic refresh failed: {e:?}"),
            }
        }
    });
}

/// Runs the HTTP server until it fails.
pub async fn serve(config: Config) -> Result<()> {
    config.spotify.authorize_app().await?;
    let api: Arc<dyn MusicApi> = config.spotify.clone();
    let stats = StatsService::new(config.storage.clone(), api);
    let state = AppState::new(stats, config.preferred_genres);

    match config.refresh_interval {
        Some(period) => {
            info!("Refreshing all users every {}s", period.as_secs());
            spawn_periodic_refresh(state.clone(), period, config.refresh_concurrency);
        }
        None => info!("Periodic refresh disabled"),
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_single_use() {
        let mut states = PendingStates::new(OAUTH_STATE_TTL);
        let now = Instant::now();
        states.insert("abc".into(), now);
        assert!(states.take("abc", now));
        assert!(!states.take("abc", now));
        assert!(!states.take("never-issued", now));
    }

    #[test]
    fn aged_states_are_rejected() {
        let mut states = PendingStates::new(OAUTH_STATE_TTL);
        let issued = Instant::now();
        states.insert("old".into(), issued);
        states.insert("fresh".into(), issued + Duration::from_secs(9 * 60));

        let later = issued + OAUTH_STATE_TTL + Duration::from_secs(1);
        assert!(!states.take("old", later));
        assert!(states.take("fresh", later));
    }

    #[test]
    fn abandoned_states_are_pruned() {
        let mut states = PendingStates::new(OAUTH_STATE_TTL);
        let start = Instant::now();
        for i in 0..1000 {
            states.insert(format!("state-{i}"), start);
        }
        assert_eq!(states.len(), 1000);

        states.insert("late".into(), start + OAUTH_STATE_TTL);
        assert_eq!(states.len(), 1);
    }

    #[test]
    fn errors_map_to_statuses() {
        assert_eq!(
            status_for(&Error::UserNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_for(&Error::InvalidOAuthState), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&Error::ConfigurationError("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
