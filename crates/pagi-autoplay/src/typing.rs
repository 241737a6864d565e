//! **TypingEffect** - reveal generated text into an input field one character at a time.
//!
//! Cancellation leaves the partially typed prefix in the sink; nothing is rolled back.

use crate::config::AutoplayConfig;
use crate::signal::{checkpoint, StopSignal};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Destination for typed text (an input field, a state slot, a test buffer).
pub trait TextSink: Send + Sync {
    /// Replace the visible text.
    fn set_text(&self, text: &str);
}

/// Looped sound played while characters are appearing (e.g. key clicks).
pub trait TypingCue: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

/// Timing for the typing effect.
#[derive(Debug, Clone)]
pub struct TypingConfig {
    pub min_char_delay: Duration,
    pub max_char_delay: Duration,
    /// Set the whole text at once.
    pub skip_effect: bool,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            min_char_delay: Duration::from_millis(30),
            max_char_delay: Duration::from_millis(80),
            skip_effect: false,
        }
    }
}

impl TypingConfig {
    /// Default character timing with `skip_typing_effect` applied.
    pub fn from_settings(config: &AutoplayConfig) -> Self {
        Self {
            skip_effect: config.skip_typing_effect,
            ..Self::default()
        }
    }
}

/// Stops the cue on every exit path, including cancellation and drop of the typing future.
struct CueGuard<'a> {
    cue: Option<&'a dyn TypingCue>,
    playing: bool,
}

impl<'a> CueGuard<'a> {
    fn start(cue: Option<&'a dyn TypingCue>) -> Self {
        let mut guard = Self { cue, playing: false };
        guard.resume();
        guard
    }

    fn resume(&mut self) {
        if let (Some(cue), false) = (self.cue, self.playing) {
            cue.start();
            self.playing = true;
        }
    }

    fn pause(&mut self) {
        if let (Some(cue), true) = (self.cue, self.playing) {
            cue.stop();
            self.playing = false;
        }
    }
}

impl Drop for CueGuard<'_> {
    fn drop(&mut self) {
        self.pause();
    }
}

/// Simulates a person typing into a [`TextSink`].
pub struct TypingEffect {
    config: TypingConfig,
    sink: Arc<dyn TextSink>,
    cue: Option<Arc<dyn TypingCue>>,
}

impl TypingEffect {
    pub fn new(config: TypingConfig, sink: Arc<dyn TextSink>) -> Self {
        Self {
            config,
            sink,
            cue: None,
        }
    }

    pub fn with_cue(mut self, cue: Arc<dyn TypingCue>) -> Self {
        self.cue = Some(cue);
        self
    }

    pub fn set_skip_effect(&mut self, skip: bool) {
        self.config.skip_effect = skip;
    }

    /// Type `text` into the sink. Returns `true` when the full text was typed,
    /// `false` if `signal` asked to stop first.
    pub async fn type_text<S: StopSignal + ?Sized>(&self, text: &str, signal: &S) -> bool {
        if self.config.skip_effect {
            self.sink.set_text(text);
            return true;
        }
        if signal.should_stop() {
            return false;
        }

        let mut cue = CueGuard::start(self.cue.as_deref());
        let mut typed = String::with_capacity(text.len());
        self.sink.set_text("");

        for (i, ch) in text.chars().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.next_delay()).await;
            }
            if signal.is_paused() {
                cue.pause();
                if !checkpoint(signal).await {
                    debug!(typed = typed.len(), "Typing cancelled while paused");
                    return false;
                }
                cue.resume();
            }
            if signal.should_stop() {
                debug!(typed = typed.len(), "Typing cancelled");
                return false;
            }
            typed.push(ch);
            self.sink.set_text(&typed);
        }

        true
    }

    fn next_delay(&self) -> Duration {
        let min = self.config.min_char_delay;
        let max = self.config.max_char_delay.max(min);
        if min == max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}
