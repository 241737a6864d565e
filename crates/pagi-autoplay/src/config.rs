//! Auto-play configuration loaded from TOML and environment.
//!
//! The simulation loop never caches settings across a suspension point: it holds a
//! [`SettingsHandle`] and takes a fresh snapshot whenever it needs a value, so a live
//! change to `reading_speed` or `playback_mode` applies on the next step.

use crate::error::{AutoplayError, AutoplayResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// How each finished exchange is narrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Speak both sides through the TTS pipeline.
    #[default]
    Audio,
    /// Read-along word highlighting, no audio.
    Highlight,
    /// No automatic narration; wait a reading-time delay instead.
    Manual,
}

impl PlaybackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackMode::Audio => "audio",
            PlaybackMode::Highlight => "highlight",
            PlaybackMode::Manual => "manual",
        }
    }
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaybackMode {
    type Err = AutoplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("audio") {
            Ok(PlaybackMode::Audio)
        } else if s.eq_ignore_ascii_case("highlight") {
            Ok(PlaybackMode::Highlight)
        } else if s.eq_ignore_ascii_case("manual") {
            Ok(PlaybackMode::Manual)
        } else {
            Err(AutoplayError::invalid(
                "playback_mode",
                format!("expected audio | highlight | manual, got {:?}", s),
            ))
        }
    }
}

fn default_max_cycles() -> u32 {
    5
}

fn default_delay_multiplier() -> f64 {
    1.0
}

fn default_reading_speed() -> u32 {
    200
}

fn default_poll_interval_ms() -> u64 {
    150
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_reply_timeout_ms() -> u64 {
    30_000
}

fn default_inter_cycle_delay_ms() -> u64 {
    1_200
}

fn default_manual_ms_per_word() -> u64 {
    300
}

fn default_audio_item_delay_ms() -> u64 {
    400
}

/// Settings consumed by the simulation loop and the playback engines.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | PAGI_AUTOPLAY_MAX_CYCLES | 5 | Exchanges per run before the loop stops itself. |
/// | PAGI_AUTOPLAY_PLAYBACK_MODE | audio | "audio" \| "highlight" \| "manual". |
/// | PAGI_AUTOPLAY_DELAY_MULTIPLIER | 1.0 | Scales the manual-mode reading delay. |
/// | PAGI_AUTOPLAY_READING_SPEED | 200 | Highlight pace in words per minute. |
/// | PAGI_AUTOPLAY_SKIP_TYPING | false | Set the generated text at once instead of typing it. |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoplayConfig {
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    #[serde(default)]
    pub playback_mode: PlaybackMode,
    #[serde(default = "default_delay_multiplier")]
    pub delay_multiplier: f64,
    /// Words per minute.
    #[serde(default = "default_reading_speed")]
    pub reading_speed: u32,
    /// Pause/cancel polling period for every wait point.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause after submitting so the responder can pick the message up.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Upper bound on the wait for party B, measured from phase entry.
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    #[serde(default = "default_inter_cycle_delay_ms")]
    pub inter_cycle_delay_ms: u64,
    #[serde(default = "default_manual_ms_per_word")]
    pub manual_ms_per_word: u64,
    /// Gap between items of one audio batch.
    #[serde(default = "default_audio_item_delay_ms")]
    pub audio_item_delay_ms: u64,
    #[serde(default)]
    pub skip_typing_effect: bool,
}

impl Default for AutoplayConfig {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            playback_mode: PlaybackMode::default(),
            delay_multiplier: default_delay_multiplier(),
            reading_speed: default_reading_speed(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
            inter_cycle_delay_ms: default_inter_cycle_delay_ms(),
            manual_ms_per_word: default_manual_ms_per_word(),
            audio_item_delay_ms: default_audio_item_delay_ms(),
            skip_typing_effect: false,
        }
    }
}

impl AutoplayConfig {
    /// Load config from file and environment. Precedence: `PAGI_AUTOPLAY__*` env >
    /// file at `PAGI_AUTOPLAY_CONFIG` (or `config/autoplay.toml`) > defaults.
    pub fn load() -> AutoplayResult<Self> {
        let path = std::env::var("PAGI_AUTOPLAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/autoplay.toml"));
        Self::load_from(&path)
    }

    /// Same as [`AutoplayConfig::load`] with an explicit file path. A missing file is not an error.
    pub fn load_from(path: &Path) -> AutoplayResult<Self> {
        let builder = config::Config::builder()
            .set_default("max_cycles", default_max_cycles() as i64)?
            .set_default("playback_mode", PlaybackMode::default().as_str())?
            .set_default("reading_speed", default_reading_speed() as i64)?;

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("PAGI_AUTOPLAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load flat toggles from environment. Unset or unparsable => defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_cycles: env_parse("PAGI_AUTOPLAY_MAX_CYCLES", defaults.max_cycles),
            playback_mode: env_parse("PAGI_AUTOPLAY_PLAYBACK_MODE", defaults.playback_mode),
            delay_multiplier: env_parse("PAGI_AUTOPLAY_DELAY_MULTIPLIER", defaults.delay_multiplier),
            reading_speed: env_parse("PAGI_AUTOPLAY_READING_SPEED", defaults.reading_speed),
            skip_typing_effect: env_bool("PAGI_AUTOPLAY_SKIP_TYPING", defaults.skip_typing_effect),
            ..defaults
        }
    }

    /// Parse a TOML document (e.g. a settings export) into a validated config.
    pub fn from_toml_str(s: &str) -> AutoplayResult<Self> {
        let cfg: Self = toml::from_str(s).map_err(|e| AutoplayError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> AutoplayResult<()> {
        if self.max_cycles == 0 {
            return Err(AutoplayError::invalid("max_cycles", "must be at least 1"));
        }
        if self.reading_speed == 0 {
            return Err(AutoplayError::invalid("reading_speed", "must be at least 1 wpm"));
        }
        if !self.delay_multiplier.is_finite() || self.delay_multiplier < 0.0 {
            return Err(AutoplayError::invalid(
                "delay_multiplier",
                format!("must be a finite non-negative number, got {}", self.delay_multiplier),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(AutoplayError::invalid("poll_interval_ms", "must be positive"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn inter_cycle_delay(&self) -> Duration {
        Duration::from_millis(self.inter_cycle_delay_ms)
    }

    pub fn audio_item_delay(&self) -> Duration {
        Duration::from_millis(self.audio_item_delay_ms)
    }

    /// Reading time for a manual-mode pause: words × ms-per-word × multiplier, never under one second.
    pub fn manual_delay_for(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count() as f64;
        let ms = words * self.manual_ms_per_word as f64 * self.delay_multiplier;
        Duration::from_millis((ms.round() as u64).max(MIN_MANUAL_DELAY_MS))
    }
}

/// Floor for the manual-mode reading delay.
pub const MIN_MANUAL_DELAY_MS: u64 = 1_000;

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v.trim().eq_ignore_ascii_case("true") || (v.trim().is_empty() && default),
        Err(_) => default,
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Shared, live view of the settings. Clones share one config; readers always see the latest write.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<AutoplayConfig>>,
}

impl SettingsHandle {
    pub fn new(config: AutoplayConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> AutoplayConfig {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn reading_speed(&self) -> u32 {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .reading_speed
    }

    pub fn playback_mode(&self) -> PlaybackMode {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .playback_mode
    }

    /// Apply an edit. The result is validated; an invalid edit is rolled back.
    pub fn update<F>(&self, edit: F) -> AutoplayResult<()>
    where
        F: FnOnce(&mut AutoplayConfig),
    {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = guard.clone();
        edit(&mut next);
        next.validate()?;
        *guard = next;
        Ok(())
    }
}
