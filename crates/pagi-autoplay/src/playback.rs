//! **PlaybackController** - one call surface for audio, read-along highlight and manual modes.
//!
//! The controller owns the two cursors the UI renders from: the key of the item
//! currently playing and the highlighted word index. Every write to either cursor
//! is gated by the generation ticket of the request that issued it, so after
//! `stop()` a late timer or speech callback from the old request is dropped and
//! cannot overwrite the state of the request that replaced it.

use crate::audio::{AudioCallbacks, ItemHook, PlayOptions, PlaybackHook, PlaybackItem, SequentialAudioPlayer};
use crate::config::{AutoplayConfig, PlaybackMode};
use crate::highlight::{ReadingPace, WordCursor, WordHighlighter};
use crate::token::{GenerationToken, Ticket};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Caller hooks for one `play_sequence` / `play_item` request.
#[derive(Clone, Default)]
pub struct PlaybackCallbacks {
    pub on_item_start: ItemHook,
    pub on_item_end: ItemHook,
    /// Fired once when the request ran to the end without being superseded.
    pub on_complete: PlaybackHook,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackOptions {
    pub delay_between: Duration,
    /// Supersede whatever is playing before starting.
    pub cancel: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            delay_between: Duration::from_millis(400),
            cancel: true,
        }
    }
}

impl PlaybackOptions {
    /// Superseding playback with the configured gap between items.
    pub fn from_settings(config: &AutoplayConfig) -> Self {
        Self {
            delay_between: config.audio_item_delay(),
            cancel: true,
        }
    }
}

/// Highlight cursor writes that are dropped once `ticket` is stale.
struct GuardedCursor<'a> {
    ticket: &'a Ticket,
    target: &'a watch::Sender<Option<usize>>,
}

impl WordCursor for GuardedCursor<'_> {
    fn set_index(&self, index: Option<usize>) {
        if self.ticket.is_current() {
            self.target.send_replace(index);
        }
    }
}

/// Clears both cursors when a request ends or its future is dropped,
/// unless a newer request already owns them.
struct CursorReset<'a> {
    ticket: &'a Ticket,
    key: &'a watch::Sender<Option<String>>,
    index: &'a watch::Sender<Option<usize>>,
}

impl Drop for CursorReset<'_> {
    fn drop(&mut self) {
        if self.ticket.is_current() {
            self.key.send_replace(None);
            self.index.send_replace(None);
        }
    }
}

fn publish_key(ticket: &Ticket, target: &watch::Sender<Option<String>>, key: Option<String>) {
    if ticket.is_current() {
        target.send_replace(key);
    }
}

pub struct PlaybackController {
    audio: Arc<SequentialAudioPlayer>,
    highlighter: WordHighlighter,
    pace: Arc<dyn ReadingPace>,
    generation: GenerationToken,
    current_key: Arc<watch::Sender<Option<String>>>,
    highlight_index: Arc<watch::Sender<Option<usize>>>,
}

impl PlaybackController {
    pub fn new(audio: Arc<SequentialAudioPlayer>, pace: Arc<dyn ReadingPace>) -> Self {
        Self::with_highlighter(audio, pace, WordHighlighter::default())
    }

    pub fn with_highlighter(
        audio: Arc<SequentialAudioPlayer>,
        pace: Arc<dyn ReadingPace>,
        highlighter: WordHighlighter,
    ) -> Self {
        let (current_key, _) = watch::channel(None);
        let (highlight_index, _) = watch::channel(None);
        Self {
            audio,
            highlighter,
            pace,
            generation: GenerationToken::new(),
            current_key: Arc::new(current_key),
            highlight_index: Arc::new(highlight_index),
        }
    }

    pub fn current_key(&self) -> Option<String> {
        self.current_key.borrow().clone()
    }

    pub fn highlight_index(&self) -> Option<usize> {
        *self.highlight_index.borrow()
    }

    pub fn subscribe_key(&self) -> watch::Receiver<Option<String>> {
        self.current_key.subscribe()
    }

    pub fn subscribe_index(&self) -> watch::Receiver<Option<usize>> {
        self.highlight_index.subscribe()
    }

    pub fn audio(&self) -> &Arc<SequentialAudioPlayer> {
        &self.audio
    }

    /// Narrate a batch according to `mode`. `Manual` does nothing.
    pub async fn play_sequence(
        &self,
        items: Vec<PlaybackItem>,
        mode: PlaybackMode,
        callbacks: PlaybackCallbacks,
        options: PlaybackOptions,
    ) {
        match mode {
            PlaybackMode::Manual => {
                debug!(items = items.len(), "Manual mode: automatic playback suppressed");
            }
            PlaybackMode::Audio => {
                let ticket = self.begin(options.cancel);
                let _reset = self.cursor_reset(&ticket);
                self.run_audio(items, &ticket, callbacks, options).await;
            }
            PlaybackMode::Highlight => {
                let ticket = self.begin(options.cancel);
                let _reset = self.cursor_reset(&ticket);
                self.run_highlight(items, &ticket, callbacks, options).await;
            }
        }
    }

    /// Click-to-play for one item. Highlight mode highlights; audio and manual modes speak,
    /// since manual only suppresses automatic sequencing.
    pub async fn play_item(
        &self,
        item: PlaybackItem,
        mode: PlaybackMode,
        callbacks: PlaybackCallbacks,
        options: PlaybackOptions,
    ) {
        let mode = match mode {
            PlaybackMode::Highlight => PlaybackMode::Highlight,
            PlaybackMode::Audio | PlaybackMode::Manual => PlaybackMode::Audio,
        };
        self.play_sequence(vec![item], mode, callbacks, options).await;
    }

    /// Stop everything and clear both cursors. Safe when idle.
    pub fn stop(&self) {
        self.generation.invalidate();
        self.current_key.send_replace(None);
        self.highlight_index.send_replace(None);
        self.audio.cancel();
    }

    fn cursor_reset<'a>(&'a self, ticket: &'a Ticket) -> CursorReset<'a> {
        CursorReset {
            ticket,
            key: &self.current_key,
            index: &self.highlight_index,
        }
    }

    fn begin(&self, cancel: bool) -> Ticket {
        if cancel {
            self.stop();
        }
        self.generation.ticket()
    }

    async fn run_audio(
        &self,
        items: Vec<PlaybackItem>,
        ticket: &Ticket,
        callbacks: PlaybackCallbacks,
        options: PlaybackOptions,
    ) {
        let on_item_start: ItemHook = {
            let ticket = ticket.clone();
            let key = Arc::clone(&self.current_key);
            let user = callbacks.on_item_start.clone();
            Some(Arc::new(move |item: &PlaybackItem| {
                publish_key(&ticket, &key, Some(item.key.clone()));
                if ticket.is_current() {
                    if let Some(cb) = &user {
                        cb(item);
                    }
                }
            }))
        };
        let on_item_end: ItemHook = {
            let ticket = ticket.clone();
            let key = Arc::clone(&self.current_key);
            let user = callbacks.on_item_end.clone();
            Some(Arc::new(move |item: &PlaybackItem| {
                publish_key(&ticket, &key, None);
                if ticket.is_current() {
                    if let Some(cb) = &user {
                        cb(item);
                    }
                }
            }))
        };

        self.audio
            .play_sequentially(
                items,
                options.delay_between,
                AudioCallbacks {
                    on_item_start,
                    on_item_end,
                },
                PlayOptions { cancel: false },
            )
            .await;

        self.finish(ticket, &callbacks);
    }

    async fn run_highlight(
        &self,
        items: Vec<PlaybackItem>,
        ticket: &Ticket,
        callbacks: PlaybackCallbacks,
        options: PlaybackOptions,
    ) {
        let cursor = GuardedCursor {
            ticket,
            target: &self.highlight_index,
        };

        for (i, item) in items.iter().enumerate() {
            if i > 0 && !options.delay_between.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(options.delay_between) => {}
                    _ = ticket.invalidated() => {}
                }
            }
            if ticket.is_stale() {
                return;
            }

            publish_key(ticket, &self.current_key, Some(item.key.clone()));
            if let Some(cb) = &callbacks.on_item_start {
                cb(item);
            }

            // Racing the invalidation resolves the highlight wait as soon as stop() is called.
            let completed = tokio::select! {
                done = self.highlighter.highlight(&item.text, &*self.pace, &cursor, ticket) => done,
                _ = ticket.invalidated() => false,
            };
            if !completed || ticket.is_stale() {
                return;
            }

            publish_key(ticket, &self.current_key, None);
            if let Some(cb) = &callbacks.on_item_end {
                cb(item);
            }
        }

        self.finish(ticket, &callbacks);
    }

    fn finish(&self, ticket: &Ticket, callbacks: &PlaybackCallbacks) {
        if ticket.is_stale() {
            return;
        }
        publish_key(ticket, &self.current_key, None);
        if let Some(cb) = &callbacks.on_complete {
            cb();
        }
    }
}
