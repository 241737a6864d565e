//! **WordHighlighter** - read-along cursor that walks a text word by word.
//!
//! Token indices refer to [`tokenize`] output, which keeps whitespace runs as
//! their own tokens so a renderer can rebuild the text exactly. Whitespace tokens
//! never receive the cursor.

use crate::config::SettingsHandle;
use crate::signal::{checkpoint, sleep, StopSignal};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Minimum time a word stays highlighted regardless of WPM.
pub const DEFAULT_WORD_FLOOR: Duration = Duration::from_millis(100);

/// Receives the highlighted token index (`None` = nothing highlighted).
pub trait WordCursor: Send + Sync {
    fn set_index(&self, index: Option<usize>);
}

impl WordCursor for watch::Sender<Option<usize>> {
    fn set_index(&self, index: Option<usize>) {
        self.send_replace(index);
    }
}

/// Live words-per-minute source, read once per word.
pub trait ReadingPace: Send + Sync {
    fn wpm(&self) -> u32;
}

impl ReadingPace for u32 {
    fn wpm(&self) -> u32 {
        *self
    }
}

impl ReadingPace for AtomicU32 {
    fn wpm(&self) -> u32 {
        self.load(Ordering::Acquire)
    }
}

impl<P: ReadingPace + ?Sized> ReadingPace for Arc<P> {
    fn wpm(&self) -> u32 {
        (**self).wpm()
    }
}

impl ReadingPace for SettingsHandle {
    fn wpm(&self) -> u32 {
        self.reading_speed()
    }
}

/// Split into alternating runs of whitespace and non-whitespace.
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_space: Option<bool> = None;

    for (i, ch) in text.char_indices() {
        let space = ch.is_whitespace();
        match in_space {
            Some(prev) if prev != space => {
                tokens.push(&text[start..i]);
                start = i;
            }
            _ => {}
        }
        in_space = Some(space);
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

/// Delay for one word: `max(floor, 60000 / wpm)`. A zero WPM is treated as 1.
pub fn word_delay(wpm: u32, floor: Duration) -> Duration {
    let per_word = Duration::from_millis(60_000 / u64::from(wpm.max(1)));
    per_word.max(floor)
}

/// Advances a [`WordCursor`] through a text at reading pace.
#[derive(Debug, Clone)]
pub struct WordHighlighter {
    floor: Duration,
}

impl Default for WordHighlighter {
    fn default() -> Self {
        Self {
            floor: DEFAULT_WORD_FLOOR,
        }
    }
}

impl WordHighlighter {
    pub fn new(floor: Duration) -> Self {
        Self { floor }
    }

    /// Highlight each word of `text` in order. The pace is re-read from `pace`
    /// before every word. The cursor ends at `None` whether the walk completes
    /// (returns `true`) or is stopped (returns `false`).
    pub async fn highlight<P, S>(
        &self,
        text: &str,
        pace: &P,
        cursor: &dyn WordCursor,
        signal: &S,
    ) -> bool
    where
        P: ReadingPace + ?Sized,
        S: StopSignal + ?Sized,
    {
        let completed = self.walk(text, pace, cursor, signal).await;
        cursor.set_index(None);
        completed
    }

    async fn walk<P, S>(&self, text: &str, pace: &P, cursor: &dyn WordCursor, signal: &S) -> bool
    where
        P: ReadingPace + ?Sized,
        S: StopSignal + ?Sized,
    {
        for (index, token) in tokenize(text).into_iter().enumerate() {
            if token.trim().is_empty() {
                continue;
            }
            if !checkpoint(signal).await {
                return false;
            }
            cursor.set_index(Some(index));
            if !sleep(signal, word_delay(pace.wpm(), self.floor)).await {
                return false;
            }
        }
        true
    }
}
