/// Track/artist cards, timeframe selector and card grid
pub mod cards;
/// HTML escaping and small markup helpers
pub mod html;
/// Stats page and its sub-views
pub mod pages;
/// Single-preview playback state
pub mod playback;

pub use pages::{PageContext, StatsRoute, ViewQuery, stats_page};
