/// Volume previews are played at.
pub const PREVIEW_VOLUME: f32 = 0.2;

/// Which track preview is playing. At most one plays at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackState {
    playing: Option<String>,
}

impl PlaybackState {
    pub fn new(playing: Option<String>) -> Self {
        Self {
            playing: playing.filter(|url| !url.is_empty()),
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.playing.as_deref()
    }

    /// Tracks without a preview are never playing.
    pub fn is_playing(&self, preview_url: Option<&str>) -> bool {
        matches!((preview_url, self.current()), (Some(url), Some(cur)) if url == cur)
    }

    /// Plays `preview_url`, or stops it if it's the one already playing.
    pub fn toggle(&mut self, preview_url: &str) {
        if self.is_playing(Some(preview_url)) {
            self.playing = None;
        } else {
            self.playing = Some(preview_url.to_string());
        }
    }

    /// The playing preview reached its end.
    pub fn ended(&mut self) {
        self.playing = None;
    }

    /// State after clicking the play/pause button of `preview_url`.
    pub fn toggled(&self, preview_url: &str) -> Self {
        let mut next = self.clone();
        next.toggle(preview_url);
        next
    }
}

/// Keeps a single `<audio>` element playing in the browser and mirrors [`PlaybackState`].
pub const PLAYBACK_SCRIPT: &str = r#"<script>
document.addEventListener('click', function (evt) {
  var button = evt.target.closest('.play-pause-button-wrapper');
  if (!button) { return; }
  var audio = button.parentElement.querySelector('audio');
  if (!audio) { return; }
  evt.preventDefault();
  document.querySelectorAll('audio').forEach(function (other) {
    if (other !== audio) { other.pause(); }
  });
  audio.volume = parseFloat(audio.dataset.volume || '1');
  audio.onended = function () { button.textContent = '▶'; };
  if (audio.paused) { audio.play(); button.textContent = '❚❚'; } else { audio.pause(); button.textContent = '▶'; }
  document.querySelectorAll('.play-pause-button-wrapper').forEach(function (other) {
    if (other !== button && other.textContent) { other.textContent = '▶'; }
  });
});
</script>"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_preview_plays() {
        let mut state = PlaybackState::default();
        state.toggle("a.mp3");
        assert!(state.is_playing(Some("a.mp3")));

        state.toggle("b.mp3");
        assert!(!state.is_playing(Some("a.mp3")));
        assert!(state.is_playing(Some("b.mp3")));

        state.toggle("b.mp3");
        assert_eq!(state.current(), None);
    }

    #[test]
    fn ended_stops_playback() {
        let mut state = PlaybackState::new(Some("a.mp3".into()));
        state.ended();
        assert!(!state.is_playing(Some("a.mp3")));
    }

    #[test]
    fn missing_preview_never_plays() {
        let state = PlaybackState::new(Some(String::new()));
        assert_eq!(state.current(), None);
        assert!(!state.is_playing(None));
    }

    #[test]
    fn toggled_leaves_original_alone() {
        let state = PlaybackState::new(Some("a.mp3".into()));
        assert_eq!(state.toggled("a.mp3").current(), None);
        assert_eq!(state.current(), Some("a.mp3"));
    }
}
