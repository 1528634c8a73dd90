//! The stats page and its sub-views, rendered from a snapshot of the store.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::clients::entities::{TimeFrames, Timeframe};
use crate::stats::genre_weights;
use crate::store::{State, UserStats};
use crate::ui::cards::{
    ArtistCardProps, GridProps, TrackCardProps, artist_card, build_artist_stats_url,
    build_genre_stats_url, image_box_grid, timeframe_selector, track_card,
};
use crate::ui::html::{escape, link};
use crate::ui::playback::{PLAYBACK_SCRIPT, PlaybackState};

/// Cards shown per grid before "Show More".
pub const INITIAL_GRID_ITEMS: usize = 10;
/// Genres shown in the top genres block.
pub const TOP_GENRE_COUNT: usize = 20;

const TRACKS_GRID: &str = "tracks";
const ARTISTS_GRID: &str = "artists";

/// Which sub-view of a user's stats is being shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsRoute {
    Aggregate,
    Artist(String),
    Genre(String),
}

impl StatsRoute {
    pub fn path(&self, username: &str) -> String {
        match self {
            StatsRoute::Aggregate => format!("/stats/{}/", urlencoding::encode(username)),
            StatsRoute::Artist(id) => build_artist_stats_url(username, id),
            StatsRoute::Genre(genre) => build_genre_stats_url(username, genre),
        }
    }
}

/// View state carried in the query string so every interaction is a plain link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracks_timeframe: Option<Timeframe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artists_timeframe: Option<Timeframe>,
    /// Comma separated names of expanded grids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playing: Option<String>,
}

impl ViewQuery {
    pub fn timeframe(&self, grid: &str) -> Timeframe {
        match grid {
            ARTISTS_GRID => self.artists_timeframe,
            _ => self.tracks_timeframe,
        }
        .unwrap_or_default()
    }

    pub fn with_timeframe(&self, grid: &str, timeframe: Timeframe) -> Self {
        let mut next = self.clone();
        match grid {
            ARTISTS_GRID => next.artists_timeframe = Some(timeframe),
            _ => next.tracks_timeframe = Some(timeframe),
        }
        next
    }

    pub fn is_expanded(&self, grid: &str) -> bool {
        self.expanded
            .as_deref()
            .is_some_and(|expanded| expanded.split(',').any(|g| g == grid))
    }

    pub fn with_expanded(&self, grid: &str) -> Self {
        let mut next = self.clone();
        if !self.is_expanded(grid) {
            next.expanded = Some(match self.expanded.as_deref() {
                Some(existing) if !existing.is_empty() => format!("{existing},{grid}"),
                _ => grid.to_string(),
            });
        }
        next
    }

    pub fn playback(&self) -> PlaybackState {
        PlaybackState::new(self.playing.clone())
    }

    pub fn with_playback(&self, playback: &PlaybackState) -> Self {
        Self {
            playing: playback.current().map(String::from),
            ..self.clone()
        }
    }

    /// `base` with this query appended.
    pub fn href(&self, base: &str) -> String {
        match serde_urlencoded::to_string(self) {
            Ok(qs) if !qs.is_empty() => format!("{base}?{qs}"),
            _ => base.to_string(),
        }
    }
}

pub struct PageContext<'a> {
    pub username: &'a str,
    pub route: &'a StatsRoute,
    pub query: &'a ViewQuery,
    pub preferred_genres: &'a HashSet<String>,
}

impl PageContext<'_> {
    fn base(&self) -> String {
        self.route.path(self.username)
    }

    fn href(&self, query: &ViewQuery) -> String {
        query.href(&self.base())
    }
}

const STYLE: &str = r"<style>
body { font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; background-color: #1a1a1a; color: #e0e0e0; margin: 0; padding: 20px; }
a { color: #4a9eff; }
.headline { font-size: 26px; }
.image-box-grid { display: flex; flex-wrap: wrap; gap: 10px; }
.image-box { width: 180px; }
.image-container { width: 180px; height: 180px; object-fit: cover; }
.image-box-content { position: relative; }
.play-pause-button-wrapper { position: absolute; right: 6px; top: 4px; cursor: pointer; text-decoration: none; }
.show-more { display: block; margin: 10px 0 20px; cursor: pointer; }
.genre-treemap { display: flex; flex-wrap: wrap; gap: 4px; }
.genre-treemap a { background: #2a2a2a; padding: 8px; color: #e0e0e0; text-decoration: none; }
.loading { color: #888; }
</style>";

pub fn loading() -> String {
    r#"<div class="loading">Loading...</div>"#.to_string()
}

fn document(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{}</title>
{STYLE}
</head>
<body>
{body}
{PLAYBACK_SCRIPT}
</body>
</html>"#,
        escape(title)
    )
}

/// Full page for `/stats/{username}/...`.
pub fn stats_page(ctx: &PageContext<'_>, state: &State) -> String {
    let headline = format!(
        r#"<span class="headline">User stats for {}</span>"#,
        link(
            &StatsRoute::Aggregate.path(ctx.username),
            &format!(r#"<span class="username">{}</span>"#, escape(ctx.username))
        )
    );

    let content = match state.user(ctx.username) {
        Some(stats) if stats.is_loaded() => stats_content(ctx, state, stats),
        _ => format!("<br><br>{}", loading()),
    };

    document(
        &format!("User stats for {}", ctx.username),
        &format!(r#"<main class="stats">{headline}{content}</main>"#),
    )
}

/// Picks the sub-view from the route: artist detail, then genre detail, else the aggregate view.
pub fn stats_content(ctx: &PageContext<'_>, state: &State, stats: &UserStats) -> String {
    match ctx.route {
        StatsRoute::Artist(artist_id) => artist_details(ctx, state, stats, artist_id),
        StatsRoute::Genre(genre) => genre_details(ctx, state, stats, genre),
        StatsRoute::Aggregate => stats_details(ctx, state, stats),
    }
}

fn track_grid(
    ctx: &PageContext<'_>,
    state: &State,
    title: &str,
    grid: &str,
    track_ids: &TimeFrames<String>,
) -> String {
    let timeframe = ctx.query.timeframe(grid);
    let show_more_href = ctx.href(&ctx.query.with_expanded(grid));
    let props = GridProps {
        title,
        timeframe,
        expanded: ctx.query.is_expanded(grid),
        initial_items: INITIAL_GRID_ITEMS,
        max_items: track_ids.get(timeframe).len(),
        show_more_href: &show_more_href,
    };
    let playback = ctx.query.playback();

    image_box_grid(
        &props,
        |tf| ctx.href(&ctx.query.with_timeframe(grid, tf)),
        |i, tf| {
            let track_id = track_ids.get(tf).get(i)?;
            let track = state.ranked_tracks(std::slice::from_ref(track_id)).pop()?;
            Some(track_card(
                &TrackCardProps::from(track),
                Some(ctx.username),
                &playback,
                |next| ctx.href(&ctx.query.with_playback(next)),
            ))
        },
    )
}

fn artist_grid(
    ctx: &PageContext<'_>,
    state: &State,
    title: &str,
    artist_ids: &TimeFrames<String>,
) -> String {
    let timeframe = ctx.query.timeframe(ARTISTS_GRID);
    let show_more_href = ctx.href(&ctx.query.with_expanded(ARTISTS_GRID));
    let props = GridProps {
        title,
        timeframe,
        expanded: ctx.query.is_expanded(ARTISTS_GRID),
        initial_items: INITIAL_GRID_ITEMS,
        max_items: artist_ids.get(timeframe).len(),
        show_more_href: &show_more_href,
    };

    image_box_grid(
        &props,
        |tf| ctx.href(&ctx.query.with_timeframe(ARTISTS_GRID, tf)),
        |i, tf| {
            let artist_id = artist_ids.get(tf).get(i)?;
            let artist = state.ranked_artists(std::slice::from_ref(artist_id)).pop()?;
            Some(artist_card(
                &ArtistCardProps::from(artist),
                Some(ctx.username),
                ctx.preferred_genres,
            ))
        },
    )
}

/// Genres of the user's top artists, heaviest first, sized by weight.
fn top_genres(ctx: &PageContext<'_>, state: &State, artist_ids: &TimeFrames<String>) -> String {
    let weights = genre_weights(artist_ids, |id| {
        state
            .entity_store
            .artists
            .get(id)
            .map(|artist| artist.genres.as_slice())
            .unwrap_or_default()
    });
    let mut weights: Vec<(String, u32)> = weights.into_iter().collect();
    weights.sort_by(|(a_genre, a), (b_genre, b)| b.cmp(a).then_with(|| a_genre.cmp(b_genre)));

    let mut out = String::from(
        r#"<h3 class="image-box-grid-title">Top Genres</h3><div class="genre-treemap">"#,
    );
    for (genre, weight) in weights.into_iter().take(TOP_GENRE_COUNT) {
        out.push_str(&format!(
            r#"<a href="{}" style="flex-grow: {weight}">{}</a>"#,
            escape(&build_genre_stats_url(ctx.username, &genre)),
            escape(&genre)
        ));
    }
    out.push_str("</div>");
    out
}

fn stats_details(ctx: &PageContext<'_>, state: &State, stats: &UserStats) -> String {
    let (Some(track_ids), Some(artist_ids)) = (&stats.tracks, &stats.artists) else {
        return loading();
    };

    format!(
        r#"<div class="details">{}{}{}</div>"#,
        track_grid(ctx, state, "Tracks", TRACKS_GRID, track_ids),
        artist_grid(ctx, state, "Artists", artist_ids),
        top_genres(ctx, state, artist_ids)
    )
}

fn artist_details(
    ctx: &PageContext<'_>,
    state: &State,
    stats: &UserStats,
    artist_id: &str,
) -> String {
    let Some(artist_stats) = stats.artist_stats.get(artist_id) else {
        return loading();
    };

    let mut history = String::from(r#"<table class="rank-history"><tr><th>Timeframe</th><th>Updated</th><th>Rank</th></tr>"#);
    for (tf, points) in artist_stats.rank_history.iter() {
        for point in points {
            history.push_str(&format!(
                "<tr><td>{tf}</td><td>{}</td><td>{}</td></tr>",
                point.update_time.format("%Y-%m-%d %H:%M"),
                point.ranking + 1
            ));
        }
    }
    history.push_str("</table>");

    let track_ids = artist_stats
        .top_tracks
        .clone()
        .map(|track| track.id);

    format!(
        r#"<div class="artist-stats">{}<h3>Ranking History</h3>{history}{}</div>"#,
        artist_card(
            &ArtistCardProps::from(&artist_stats.artist),
            Some(ctx.username),
            ctx.preferred_genres
        ),
        track_grid(ctx, state, "Top Tracks", TRACKS_GRID, &track_ids)
    )
}

fn genre_details(ctx: &PageContext<'_>, state: &State, stats: &UserStats, genre: &str) -> String {
    let Some(artist_ids) = &stats.artists else {
        return loading();
    };
    let in_genre = artist_ids.clone().map_frames(|ids| {
        ids.into_iter()
            .filter(|id| {
                state
                    .entity_store
                    .artists
                    .get(id)
                    .is_some_and(|artist| artist.genres.iter().any(|g| g == genre))
            })
            .collect()
    });

    let timeframe = ctx.query.timeframe(ARTISTS_GRID);
    let selector = timeframe_selector(timeframe, |tf| {
        ctx.href(&ctx.query.with_timeframe(ARTISTS_GRID, tf))
    });
    let cards: String = state
        .ranked_artists(in_genre.get(timeframe))
        .into_iter()
        .map(|artist| {
            artist_card(
                &ArtistCardProps::from(artist),
                Some(ctx.username),
                ctx.preferred_genres,
            )
        })
        .collect();
    let cards = if cards.is_empty() {
        format!("<p>No top artists in {} for this timeframe.</p>", escape(genre))
    } else {
        cards
    };

    format!(
        r#"<div class="genre-stats"><h3 class="image-box-grid-title">Top {} Artists</h3>{selector}<div class="image-box-grid">{cards}</div></div>"#,
        escape(genre)
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clients::entities::{Album, Artist, Track};
    use crate::clients::local_storage::RankPoint;
    use crate::stats::ArtistStats;
    use crate::store::Action;
    use crate::ui::cards::default_preferred_genres;

    fn artist(id: &str, genres: &[&str]) -> Artist {
        Artist {
            id: id.into(),
            name: format!("Artist {id}"),
            uri: format!("spotify:artist:{id}"),
            genres: genres.iter().map(|g| (*g).to_string()).collect(),
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
            preview_url: Some(format!("http://p/{id}.mp3")),
            popularity: 1,
        }
    }

    fn loaded_state() -> State {
        let mut state = State::default();
        let track_ids: Vec<String> = (0..12).map(|i| format!("t{i}")).collect();
        state.reduce(Action::AddTracks(
            track_ids.iter().map(|id| (id.clone(), track(id))).collect(),
        ));
        state.reduce(Action::AddArtists(HashMap::from([
            ("a1".to_string(), artist("a1", &["art pop", "rock"])),
            ("a2".to_string(), artist("a2", &["rock"])),
        ])));
        state.reduce(Action::AddUserStats {
            username: "ameo".into(),
            stats: UserStats {
                last_update_time: Some(Utc::now()),
                tracks: Some(TimeFrames {
                    short: track_ids.clone(),
                    medium: vec!["t3".into()],
                    long: vec![],
                }),
                artists: Some(TimeFrames {
                    short: vec!["a1".into(), "a2".into(), "missing".into()],
                    medium: vec!["a2".into()],
                    long: vec![],
                }),
                artist_stats: HashMap::new(),
            },
        });
        state
    }

    fn render(route: StatsRoute, query: ViewQuery, state: &State) -> String {
        let preferred = default_preferred_genres();
        stats_page(
            &PageContext {
                username: "ameo",
                route: &route,
                query: &query,
                preferred_genres: &preferred,
            },
            state,
        )
    }

    #[test]
    fn loading_until_stats_arrive() {
        let html = render(StatsRoute::Aggregate, ViewQuery::default(), &State::default());
        assert!(html.contains("User stats for"));
        assert!(html.contains("Loading..."));
        assert!(!html.contains("image-box-grid"));
    }

    #[test]
    fn aggregate_view_pages_tracks() {
        let state = loaded_state();
        let html = render(StatsRoute::Aggregate, ViewQuery::default(), &state);
        assert!(html.contains("Track t9"));
        assert!(!html.contains("Track t10"));
        assert!(html.contains(r#"href="/stats/ameo/?expanded=tracks">Show More"#));
        assert!(html.contains("Top Genres"));
        assert!(html.contains(
            r#"<a href="/stats/ameo/genre/rock/" style="flex-grow: 149">rock</a>"#
        ));
        // a1 and a2 are ranked; "missing" has no metadata and is skipped
        assert!(html.contains("Artist a2"));

        let expanded = ViewQuery {
            expanded: Some("tracks".into()),
            ..Default::default()
        };
        let html = render(StatsRoute::Aggregate, expanded, &state);
        assert!(html.contains("Track t11"));
    }

    #[test]
    fn timeframe_switches_grid() {
        let state = loaded_state();
        let query = ViewQuery {
            tracks_timeframe: Some(Timeframe::Medium),
            ..Default::default()
        };
        let html = render(StatsRoute::Aggregate, query, &state);
        assert!(html.contains("Track t3"));
        assert!(!html.contains("Track t0"));
    }

    #[test]
    fn genre_view_filters_artists() {
        let state = loaded_state();
        let html = render(StatsRoute::Genre("art pop".into()), ViewQuery::default(), &state);
        assert!(html.contains("Top art pop Artists"));
        assert!(html.contains("Artist a1"));
        assert!(!html.contains("Artist a2"));
    }

    #[test]
    fn artist_view_waits_for_artist_stats() {
        let mut state = loaded_state();
        let html = render(StatsRoute::Artist("a1".into()), ViewQuery::default(), &state);
        assert!(html.contains("Loading..."));

        state.reduce(Action::AddArtistStats {
            username: "ameo".into(),
            artist_id: "a1".into(),
            stats: ArtistStats {
                artist: artist("a1", &["art pop"]),
                rank_history: TimeFrames {
                    short: vec![RankPoint {
                        update_time: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 0).unwrap(),
                        ranking: 2,
                    }],
                    medium: vec![],
                    long: vec![],
                },
                top_tracks: TimeFrames {
                    short: vec![track("t2")],
                    medium: vec![],
                    long: vec![],
                },
            },
        });
        let html = render(StatsRoute::Artist("a1".into()), ViewQuery::default(), &state);
        assert!(html.contains("Ranking History"));
        assert!(html.contains("<tr><td>short</td><td>2024-01-02 03:04</td><td>3</td></tr>"));
        assert!(html.contains("Track t2"));
        assert!(!html.contains("Track t3"));
    }

    #[test]
    fn query_round_trips_through_links() {
        let query = ViewQuery::default()
            .with_timeframe("artists", Timeframe::Long)
            .with_expanded("tracks")
            .with_expanded("artists")
            .with_expanded("tracks");
        assert_eq!(query.expanded.as_deref(), Some("tracks,artists"));
        let href = query.href("/stats/ameo/");
        assert_eq!(
            href,
            "/stats/ameo/?artists_timeframe=long&expanded=tracks%2Cartists"
        );
        assert_eq!(ViewQuery::default().href("/x/"), "/x/");
    }
}
