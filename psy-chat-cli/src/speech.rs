//! Reads AI replies aloud.
//!
//! [`Speaker`] keeps the voice list for one language and one gender, and always
//! cancels the current utterance before starting the next. With no matching
//! voice it stays silent instead of falling back to an engine default.
//! [`EspeakEngine`] is the concrete backend, driving the `espeak-ng` binary.
//! Voice lists come from [`watch_voices`], which polls the binary on a
//! background task so the UI loop never waits on it.

use anyhow::{Context, Result};
use std::fmt;
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::accessory::Accessory;

/// How often the engine is asked for its voice list.
pub const VOICE_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub const NO_VOICES_LABEL: &str = "Нет голосов для этого пола";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            other => Err(format!("unknown gender '{}', expected male or female", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// Identifier handed back to the engine when speaking.
    pub id: String,
    pub name: String,
    pub lang: String,
    /// Gender as reported by the engine, if it reports one.
    pub gender: Option<Gender>,
}

impl Voice {
    pub fn gender(&self) -> Gender {
        match self.gender {
            Some(gender) => gender,
            None => guess_gender(&self.name),
        }
    }

    /// Compares primary language subtags, so `ru` matches `ru-RU`.
    pub fn speaks(&self, lang: &str) -> bool {
        primary_subtag(&self.lang).eq_ignore_ascii_case(primary_subtag(lang))
    }
}

fn primary_subtag(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}

/// Name-based guess used when the engine gives no gender.
pub fn guess_gender(name: &str) -> Gender {
    let name = name.to_lowercase();
    if name.contains("female") || name.contains("женский") || name.contains("anna") {
        Gender::Female
    } else {
        Gender::Male
    }
}

pub trait SpeechEngine: Send {
    /// Stops the current utterance, if any.
    fn cancel(&mut self);
    fn speak(&mut self, text: &str, voice: &Voice) -> Result<()>;
}

pub struct Speaker<E> {
    engine: E,
    voices: watch::Receiver<Vec<Voice>>,
    lang: String,
    gender: Gender,
    /// Everything the engine reported on the last poll.
    known: Vec<Voice>,
    /// Voices matching both language and gender.
    options: Vec<Voice>,
    selected: Option<String>,
}

impl<E: SpeechEngine> Speaker<E> {
    pub fn new(
        engine: E,
        mut voices: watch::Receiver<Vec<Voice>>,
        lang: impl Into<String>,
        gender: Gender,
    ) -> Self {
        let known = voices.borrow_and_update().clone();
        let mut speaker = Self {
            engine,
            voices,
            lang: lang.into(),
            gender,
            known,
            options: Vec::new(),
            selected: None,
        };
        speaker.rebuild_options();
        speaker
    }

    /// Takes the latest published voice list; rebuilds only if it changed.
    pub fn refresh_if_changed(&mut self) -> bool {
        if !self.voices.has_changed().unwrap_or(false) {
            return false;
        }
        let voices = self.voices.borrow_and_update().clone();
        if voices == self.known {
            return false;
        }
        debug!(count = voices.len(), "voice list changed");
        self.known = voices;
        self.rebuild_options();
        true
    }

    fn rebuild_options(&mut self) {
        self.options = self
            .known
            .iter()
            .filter(|v| v.speaks(&self.lang) && v.gender() == self.gender)
            .cloned()
            .collect();

        let still_offered = self
            .selected
            .as_ref()
            .is_some_and(|name| self.options.iter().any(|v| &v.name == name));
        if !still_offered {
            self.selected = self.options.first().map(|v| v.name.clone());
        }
    }

    pub fn set_gender(&mut self, gender: Gender) {
        self.gender = gender;
        self.rebuild_options();
    }

    pub fn gender(&self) -> Gender {
        self.gender
    }

    /// Selects a voice among the current options by exact name.
    pub fn select_voice(&mut self, name: &str) -> bool {
        if self.options.iter().any(|v| v.name == name) {
            self.selected = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn options(&self) -> &[Voice] {
        &self.options
    }

    pub fn selected_voice(&self) -> Option<&Voice> {
        let name = self.selected.as_ref()?;
        self.options.iter().find(|v| &v.name == name)
    }

    pub fn speak(&mut self, text: &str) {
        self.engine.cancel();
        if text.is_empty() {
            return;
        }
        let Some(voice) = self.selected_voice().cloned() else {
            debug!("no voice selected, staying silent");
            return;
        };
        if let Err(e) = self.engine.speak(text, &voice) {
            warn!("Failed to speak with voice {}: {:#}", voice.name, e);
        }
    }

    fn describe_options(&self) -> String {
        if self.options().is_empty() {
            return NO_VOICES_LABEL.to_string();
        }
        self.options()
            .iter()
            .map(|v| {
                if Some(&v.name) == self.selected.as_ref() {
                    format!("* {}", v.name)
                } else {
                    format!("  {}", v.name)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<E: SpeechEngine> Accessory for Speaker<E> {
    fn on_ai_message(&mut self, text: &str) {
        self.speak(text);
    }

    fn on_tick(&mut self, _now: Instant) {
        self.refresh_if_changed();
    }

    fn handle_command(&mut self, command: &str, arg: &str) -> Option<String> {
        match command {
            "gender" => Some(match arg.parse::<Gender>() {
                Ok(gender) => {
                    self.set_gender(gender);
                    format!("Voice gender set to {}.\n{}", gender, self.describe_options())
                }
                Err(e) => e,
            }),
            "voice" => Some(if self.select_voice(arg) {
                format!("Voice set to {}.", arg)
            } else {
                format!("No {} voice named '{}'.", self.gender(), arg)
            }),
            "voices" => Some(self.describe_options()),
            _ => None,
        }
    }

    fn status(&self) -> Option<String> {
        Some(match self.selected_voice() {
            Some(voice) => format!("🔊 {} ({})", voice.name, self.gender()),
            None => format!("🔇 {}", NO_VOICES_LABEL),
        })
    }
}

/// Speech through the `espeak-ng` command line tool.
pub struct EspeakEngine {
    program: String,
    child: Option<Child>,
}

impl EspeakEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            child: None,
        }
    }
}

impl SpeechEngine for EspeakEngine {
    fn cancel(&mut self) {
        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                info!("cancelling current utterance");
                let _ = child.kill();
            }
            let _ = child.wait();
        }
    }

    fn speak(&mut self, text: &str, voice: &Voice) -> Result<()> {
        let child = Command::new(&self.program)
            .args(["-v", &voice.id, "--", text])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;
        self.child = Some(child);
        Ok(())
    }
}

impl Drop for EspeakEngine {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Runs `<program> --voices`. A missing binary yields no voices.
pub async fn list_espeak_voices(program: &str) -> Vec<Voice> {
    match tokio::process::Command::new(program).arg("--voices").output().await {
        Ok(output) => parse_espeak_voices(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            warn!("Failed to list voices with {}: {}", program, e);
            Vec::new()
        }
    }
}

/// Polls `program` for voices every `interval` and publishes the list when
/// it changes. Stops once every receiver is gone.
pub fn watch_voices(program: String, interval: Duration) -> watch::Receiver<Vec<Voice>> {
    let (tx, rx) = watch::channel(Vec::new());
    tokio::spawn(async move {
        loop {
            let voices = list_espeak_voices(&program).await;
            tx.send_if_modified(|current| {
                if *current == voices {
                    return false;
                }
                *current = voices;
                true
            });
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tx.closed() => break,
            }
        }
    });
    rx
}

/// Parses the table printed by `espeak-ng --voices`:
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  ru              --/M      Russian            zle/ru
/// ```
pub fn parse_espeak_voices(table: &str) -> Vec<Voice> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return None;
            }
            let gender = match fields[2].rsplit('/').next() {
                Some("F") => Some(Gender::Female),
                Some("M") => Some(Gender::Male),
                _ => None,
            };
            Some(Voice {
                id: fields[4].to_string(),
                name: fields[3].to_string(),
                lang: fields[1].to_string(),
                gender,
            })
        })
        .collect()
}
