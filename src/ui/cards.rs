//! Presentational building blocks: image boxes, track/artist cards, timeframe selector and the
//! paginated card grid. Every function returns an HTML fragment.

use std::collections::HashSet;

use crate::clients::entities::{Artist, ArtistRef, Timeframe, Track};
use crate::ui::html::{a_new_tab, escape, join_fragments, link, truncate_with_ellipsis};
use crate::ui::playback::{PREVIEW_VOLUME, PlaybackState};

// TODO: derive the preferred genres from the user's own top genres instead of a fixed list
pub const DEFAULT_PREFERRED_GENRES: [&str; 7] = [
    "vapor twitch",
    "vapor soul",
    "art pop",
    "indie pop",
    "indietronica",
    "folk-pop",
    "chillwave",
];

/// Genres shown on an artist card.
pub const MAX_CARD_GENRES: usize = 6;
pub const MAX_TITLE_LEN: usize = 50;

pub fn default_preferred_genres() -> HashSet<String> {
    DEFAULT_PREFERRED_GENRES
        .iter()
        .map(|g| (*g).to_string())
        .collect()
}

pub fn build_artist_stats_url(username: &str, artist_id: &str) -> String {
    format!(
        "/stats/{}/artist/{}/",
        urlencoding::encode(username),
        urlencoding::encode(artist_id)
    )
}

pub fn build_genre_stats_url(username: &str, genre: &str) -> String {
    format!(
        "/stats/{}/genre/{}/",
        urlencoding::encode(username),
        urlencoding::encode(genre)
    )
}

/// Everynoise's map page for a genre.
pub fn genre_map_url(genre: &str) -> String {
    format!("http://everynoise.com/engenremap-{}.html", genre.replace(' ', ""))
}

pub fn image_box(image_src: &str, img_alt: &str, link_to: Option<&str>, children: &str) -> String {
    let image = format!(
        r#"<img alt="{}" src="{}" class="image-container">"#,
        escape(img_alt),
        escape(image_src)
    );
    let image = match link_to {
        Some(to) => link(to, &image),
        None => image,
    };

    format!(
        r#"<div class="image-box"><div class="track">{image}<div class="image-box-content">{children}</div></div></div>"#
    )
}

/// Artist name linking to their stats page, or plain text when no user is in context.
fn artist_stats_link(username: Option<&str>, artist_id: &str, name: &str) -> String {
    match username {
        Some(username) => link(&build_artist_stats_url(username, artist_id), &escape(name)),
        None => escape(name),
    }
}

pub struct TrackCardProps<'a> {
    pub title: &'a str,
    pub artists: &'a [ArtistRef],
    pub preview_url: Option<&'a str>,
    pub album: &'a str,
    pub image_src: &'a str,
}

impl<'a> From<&'a Track> for TrackCardProps<'a> {
    fn from(track: &'a Track) -> Self {
        TrackCardProps {
            title: &track.name,
            // Album artists, matching how the album art is credited
            artists: if track.album.artists.is_empty() {
                &track.artists
            } else {
                &track.album.artists
            },
            preview_url: track.preview_url.as_deref(),
            album: &track.album.name,
            image_src: track.image_url().unwrap_or_default(),
        }
    }
}

/// `toggle_href` maps the playback state after a click to the URL the button links to.
pub fn track_card(
    props: &TrackCardProps<'_>,
    username: Option<&str>,
    playback: &PlaybackState,
    toggle_href: impl Fn(&PlaybackState) -> String,
) -> String {
    let is_playing = playback.is_playing(props.preview_url);
    let artist_names = join_fragments(props.artists.iter().map(|a| a.name.clone()), ", ");
    let img_alt = format!(
        "Album art for {} on {} by {}",
        props.title, props.album, artist_names
    );
    let artist_links = join_fragments(
        props
            .artists
            .iter()
            .map(|a| artist_stats_link(username, &a.id, &a.name)),
        ", ",
    );

    let (audio, button) = match props.preview_url {
        Some(url) => (
            format!(
                r#"<audio preload="none" src="{}" data-volume="{PREVIEW_VOLUME}"{}></audio>"#,
                escape(url),
                if is_playing { " autoplay" } else { "" }
            ),
            format!(
                r#"<a class="play-pause-button-wrapper" href="{}">{}</a>"#,
                escape(&toggle_href(&playback.toggled(url))),
                if is_playing { "❚❚" } else { "▶" }
            ),
        ),
        None => (String::new(), r#"<div class="play-pause-button-wrapper"></div>"#.to_string()),
    };

    let children = format!(
        r#"<div class="card-data"><div>{}</div><span style="z-index: 2">{artist_links}</span>{audio}</div>{button}"#,
        escape(&truncate_with_ellipsis(props.title, MAX_TITLE_LEN))
    );
    image_box(props.image_src, &img_alt, None, &children)
}

/// Preferred genres first so they don't get trimmed, then the rest, capped at
/// `MAX_CARD_GENRES`. Relative order within each group is kept.
pub fn trim_genres<'a>(genres: &'a [String], preferred: &HashSet<String>) -> Vec<&'a str> {
    let (preferred, other): (Vec<&String>, Vec<&String>) =
        genres.iter().partition(|g| preferred.contains(*g));
    preferred
        .into_iter()
        .chain(other)
        .take(MAX_CARD_GENRES)
        .map(String::as_str)
        .collect()
}

fn genre_link(genre: &str) -> String {
    a_new_tab(&genre_map_url(genre), genre, "color: white; font-size: 11px")
}

pub struct ArtistCardProps<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub genres: &'a [String],
    pub image_src: &'a str,
    pub uri: &'a str,
}

impl<'a> From<&'a Artist> for ArtistCardProps<'a> {
    fn from(artist: &'a Artist) -> Self {
        ArtistCardProps {
            id: &artist.id,
            name: &artist.name,
            genres: &artist.genres,
            image_src: artist.image_url().unwrap_or_default(),
            uri: &artist.uri,
        }
    }
}

pub fn artist_card(
    props: &ArtistCardProps<'_>,
    username: Option<&str>,
    preferred_genres: &HashSet<String>,
) -> String {
    let genres = join_fragments(
        trim_genres(props.genres, preferred_genres)
            .into_iter()
            .map(genre_link),
        ", ",
    );
    let link_to = username.map(|username| build_artist_stats_url(username, props.id));

    let children = format!(
        r#"<div class="card-data" data-uri="{}"><div>{}</div><div class="genres" style="line-height: 1em; display: -webkit-box; -webkit-line-clamp: 3; -webkit-box-orient: vertical; overflow: hidden">{genres}</div></div>"#,
        escape(props.uri),
        artist_stats_link(username, props.id, props.name)
    );
    image_box(props.image_src, props.name, link_to.as_deref(), &children)
}

/// All timeframes separated by bullets; the current one is bold, the others link to `link_for`.
pub fn timeframe_selector(current: Timeframe, link_for: impl Fn(Timeframe) -> String) -> String {
    let frames = Timeframe::ALL.into_iter().map(|frame| {
        if frame == current {
            format!(
                r#"<span style="text-decoration: underline; font-weight: bold; font-size: 22px">{frame}</span>"#
            )
        } else {
            format!(
                r#"<a style="text-decoration: underline; cursor: pointer" href="{}">{frame}</a>"#,
                escape(&link_for(frame))
            )
        }
    });
    format!(
        r#"<div class="timeframe-selector">Timeframe: {}</div>"#,
        join_fragments(frames, " \u{2022} ")
    )
}

pub struct GridProps<'a> {
    pub title: &'a str,
    pub timeframe: Timeframe,
    pub expanded: bool,
    pub initial_items: usize,
    pub max_items: usize,
    /// Link for the "Show More" button.
    pub show_more_href: &'a str,
}

impl GridProps<'_> {
    /// How many item slots are rendered.
    pub fn item_count(&self) -> usize {
        if self.expanded {
            self.max_items
        } else {
            self.initial_items
        }
    }
}

/// Renders slots `0..item_count` through `render_item`; slots it returns `None` for are left out.
pub fn image_box_grid(
    props: &GridProps<'_>,
    timeframe_href: impl Fn(Timeframe) -> String,
    mut render_item: impl FnMut(usize, Timeframe) -> Option<String>,
) -> String {
    let items: String = (0..props.item_count())
        .filter_map(|i| render_item(i, props.timeframe))
        .collect();
    let show_more = if props.expanded {
        String::new()
    } else {
        format!(
            r#"<a class="show-more" href="{}">Show More</a>"#,
            escape(props.show_more_href)
        )
    };

    format!(
        r#"<h3 class="image-box-grid-title">{}</h3>{}<div class="image-box-grid">{items}</div>{show_more}"#,
        escape(props.title),
        timeframe_selector(props.timeframe, timeframe_href)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::entities::{Album, Image};

    fn genres(names: &[&str]) -> Vec<String> {
        names.iter().map(|g| (*g).to_string()).collect()
    }

    fn track(preview: Option<&str>) -> Track {
        Track {
            id: "t1".into(),
            name: "Dreams".into(),
            uri: "spotify:track:t1".into(),
            album: Album {
                id: Some("al1".into()),
                name: "Rumours".into(),
                images: vec![Image {
                    url: "http://img/1.jpg".into(),
                    width: None,
                    height: None,
                }],
                artists: vec![
                    ArtistRef {
                        id: "a1".into(),
                        name: "Fleetwood Mac".into(),
                        uri: "spotify:artist:a1".into(),
                    },
                    ArtistRef {
                        id: "a2".into(),
                        name: "Stevie".into(),
                        uri: "spotify:artist:a2".into(),
                    },
                ],
            },
            artists: vec![],
            preview_url: preview.map(String::from),
            popularity: 80,
        }
    }

    #[test]
    fn preferred_genres_come_first() {
        let preferred = default_preferred_genres();
        let all = genres(&[
            "rock", "metal", "chillwave", "jazz", "blues", "punk", "emo", "art pop",
        ]);
        assert_eq!(
            trim_genres(&all, &preferred),
            vec!["chillwave", "art pop", "rock", "metal", "jazz", "blues"]
        );
    }

    #[test]
    fn few_genres_are_kept() {
        let preferred = default_preferred_genres();
        let all = genres(&["rock", "indie pop"]);
        assert_eq!(trim_genres(&all, &preferred), vec!["indie pop", "rock"]);
    }

    #[test]
    fn genre_links_drop_spaces() {
        assert_eq!(
            genre_map_url("vapor twitch"),
            "http://everynoise.com/engenremap-vaportwitch.html"
        );
    }

    #[test]
    fn artist_stats_url() {
        assert_eq!(build_artist_stats_url("ameo", "abc"), "/stats/ameo/artist/abc/");
        assert_eq!(build_genre_stats_url("ameo", "art pop"), "/stats/ameo/genre/art%20pop/");
    }

    #[test]
    fn track_card_contents() {
        let track = track(Some("http://p/1.mp3"));
        let html = track_card(
            &TrackCardProps::from(&track),
            Some("ameo"),
            &PlaybackState::default(),
            |next| format!("?playing={}", next.current().unwrap_or_default()),
        );
        assert!(html.contains("Album art for Dreams on Rumours by Fleetwood Mac, Stevie"));
        assert!(html.contains(r#"<a href="/stats/ameo/artist/a1/">Fleetwood Mac</a>, "#));
        assert!(html.contains(r#"<audio preload="none" src="http://p/1.mp3""#));
        assert!(html.contains(r#"href="?playing=http://p/1.mp3">▶"#));
        assert!(!html.contains("autoplay"));
    }

    #[test]
    fn playing_track_card_pauses_on_click() {
        let track = track(Some("http://p/1.mp3"));
        let playback = PlaybackState::new(Some("http://p/1.mp3".into()));
        let html = track_card(&TrackCardProps::from(&track), None, &playback, |next| {
            format!("?playing={}", next.current().unwrap_or_default())
        });
        assert!(html.contains("autoplay"));
        assert!(html.contains(r#"href="?playing=">❚❚"#));
        // No user in context, so artists aren't links
        assert!(!html.contains("/artist/"));
    }

    #[test]
    fn no_preview_no_button() {
        let track = track(None);
        let html = track_card(
            &TrackCardProps::from(&track),
            None,
            &PlaybackState::default(),
            |_| String::new(),
        );
        assert!(!html.contains("<audio"));
        assert!(!html.contains("▶"));
    }

    #[test]
    fn selector_marks_current_timeframe() {
        let html = timeframe_selector(Timeframe::Medium, |tf| format!("?tf={tf}"));
        assert!(html.contains("font-weight: bold; font-size: 22px\">medium</span>"));
        assert!(html.contains(r#"href="?tf=short">short</a> • "#));
        assert!(html.contains(r#"href="?tf=long">long</a>"#));
    }

    #[test]
    fn grid_renders_initial_items_until_expanded() {
        let mut props = GridProps {
            title: "Tracks",
            timeframe: Timeframe::Short,
            expanded: false,
            initial_items: 2,
            max_items: 4,
            show_more_href: "?expanded=tracks",
        };
        let render = |i: usize, _tf: Timeframe| (i != 1).then(|| format!("<i>{i}</i>"));

        let html = image_box_grid(&props, |_| String::new(), render);
        assert!(html.contains("<i>0</i>"));
        assert!(!html.contains("<i>1</i>"));
        assert!(!html.contains("<i>2</i>"));
        assert!(html.contains("Show More"));

        props.expanded = true;
        let html = image_box_grid(&props, |_| String::new(), render);
        assert!(html.contains("<i>3</i>"));
        assert!(!html.contains("Show More"));
    }
}
