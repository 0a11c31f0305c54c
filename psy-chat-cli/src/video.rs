use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::accessory::Accessory;

/// How long the clip plays after each submitted message.
pub const PLAYBACK_WINDOW: Duration = Duration::from_secs(5);

/// Preview clip shown while the user chats.
///
/// Every submit shows the preview, starts playback and arms its own pause
/// timer. Whichever timer expires first pauses the clip, whatever its length.
#[derive(Debug, Default)]
pub struct VideoCue {
    gallery: Vec<String>,
    source: Option<String>,
    visible: bool,
    playing: bool,
    pause_at: VecDeque<Instant>,
}

impl VideoCue {
    pub fn new(gallery: Vec<String>) -> Self {
        Self {
            source: gallery.first().cloned(),
            gallery,
            ..Self::default()
        }
    }

    /// Picks a gallery entry by its 1-based position.
    pub fn select_thumbnail(&mut self, position: usize) -> Option<&str> {
        let source = self.gallery.get(position.checked_sub(1)?)?.clone();
        self.set_source(source);
        self.source.as_deref()
    }

    pub fn load_file(&mut self, path: &str) -> Result<()> {
        if !Path::new(path).is_file() {
            bail!("no such video file: {}", path);
        }
        self.set_source(path.to_string());
        Ok(())
    }

    fn set_source(&mut self, source: String) {
        self.source = Some(source);
        self.visible = true;
        self.playing = false;
    }

    pub fn play(&mut self, now: Instant) {
        self.visible = true;
        self.playing = self.source.is_some();
        self.pause_at.push_back(now + PLAYBACK_WINDOW);
    }

    pub fn tick(&mut self, now: Instant) {
        let mut expired = false;
        while self.pause_at.front().is_some_and(|deadline| *deadline <= now) {
            self.pause_at.pop_front();
            expired = true;
        }
        if expired {
            self.playing = false;
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    fn describe_gallery(&self) -> String {
        if self.gallery.is_empty() {
            return "The gallery is empty; load a clip with /video <path>.".to_string();
        }
        self.gallery
            .iter()
            .enumerate()
            .map(|(i, clip)| format!("{}. {}", i + 1, clip))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Accessory for VideoCue {
    fn on_submit(&mut self, now: Instant) {
        self.play(now);
    }

    fn on_tick(&mut self, now: Instant) {
        self.tick(now);
    }

    fn handle_command(&mut self, command: &str, arg: &str) -> Option<String> {
        match command {
            "video" => Some(match self.load_file(arg) {
                Ok(()) => format!("Video set to {}.", arg),
                Err(e) => e.to_string(),
            }),
            "thumb" => Some(match arg
                .parse::<usize>()
                .ok()
                .and_then(|n| self.select_thumbnail(n).map(str::to_string))
            {
                Some(source) => format!("Video set to {}.", source),
                None => format!("No thumbnail '{}'.\n{}", arg, self.describe_gallery()),
            }),
            "thumbs" => Some(self.describe_gallery()),
            _ => None,
        }
    }

    fn status(&self) -> Option<String> {
        if !self.is_visible() {
            return None;
        }
        Some(match (self.source(), self.is_playing()) {
            (Some(source), true) => format!("▶ {}", source),
            (Some(source), false) => format!("⏸ {}", source),
            (None, _) => "no clip selected".to_string(),
        })
    }
}
