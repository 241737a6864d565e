//! **SequentialAudioPlayer** - speak a batch of `(text, language)` items strictly one at a time.
//!
//! Batches are queued behind a fair `tokio::sync::Mutex`, so overlapping calls never
//! interleave. Every batch captures a generation ticket when it is enqueued; a batch
//! whose ticket went stale while it waited is dropped without firing any callback.
//! `cancel()` is the kill-switch: it invalidates queued and running batches, stops the
//! speech backend and releases the item currently being awaited.

use crate::error::AutoplayResult;
use crate::token::{GenerationToken, Ticket};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Speech backend (browser TTS, a provider stream, a rodio sink...).
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Speak `text` in `lang`, resolving when the utterance has finished.
    async fn speak(&self, text: &str, lang: &str) -> AutoplayResult<()>;

    /// Silence the current utterance. Must be safe to call when nothing is playing.
    fn stop(&self);
}

/// One unit of narratable content. `key` correlates it with the "currently playing" UI state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackItem {
    pub text: String,
    pub lang: String,
    pub key: String,
}

impl PlaybackItem {
    pub fn new(text: impl Into<String>, lang: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            lang: lang.into(),
            key: key.into(),
        }
    }
}

/// Hook fired around a whole batch (e.g. to mute the microphone while speaking).
pub type PlaybackHook = Option<Arc<dyn Fn() + Send + Sync>>;

/// Hook fired around one item.
pub type ItemHook = Option<Arc<dyn Fn(&PlaybackItem) + Send + Sync>>;

/// Player-wide hooks: `on_playback_start` before the first item of an accepted batch,
/// `on_playback_end` after its last item or on cancellation. Exactly once each per batch.
#[derive(Clone, Default)]
pub struct PlayerHooks {
    pub on_playback_start: PlaybackHook,
    pub on_playback_end: PlaybackHook,
}

/// Per-call item hooks.
#[derive(Clone, Default)]
pub struct AudioCallbacks {
    pub on_item_start: ItemHook,
    pub on_item_end: ItemHook,
}

#[derive(Debug, Clone, Copy)]
pub struct PlayOptions {
    /// Cancel whatever is playing or queued before enqueuing this batch.
    pub cancel: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self { cancel: true }
    }
}

fn fire(hook: &PlaybackHook) {
    if let Some(cb) = hook {
        cb();
    }
}

fn fire_item(hook: &ItemHook, item: &PlaybackItem) {
    if let Some(cb) = hook {
        cb(item);
    }
}

/// Ends an accepted batch on every exit path. A batch whose future is dropped
/// mid-item also silences the backend and releases the awaited item.
struct BatchGuard<'a> {
    player: &'a SequentialAudioPlayer,
    finished: bool,
}

impl<'a> BatchGuard<'a> {
    fn begin(player: &'a SequentialAudioPlayer) -> Self {
        player.playing.store(true, Ordering::Release);
        fire(&player.hooks.on_playback_start);
        Self {
            player,
            finished: false,
        }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Audio batch dropped mid-playback");
            self.player.speech.stop();
        }
        self.player.complete_pending();
        self.player.playing.store(false, Ordering::Release);
        fire(&self.player.hooks.on_playback_end);
    }
}

pub struct SequentialAudioPlayer {
    speech: Arc<dyn SpeechOutput>,
    generation: GenerationToken,
    queue: tokio::sync::Mutex<()>,
    /// Completion for the item being awaited; taken exactly once by whoever finishes it.
    pending: Mutex<Option<oneshot::Sender<()>>>,
    hooks: PlayerHooks,
    playing: AtomicBool,
}

impl SequentialAudioPlayer {
    pub fn new(speech: Arc<dyn SpeechOutput>) -> Self {
        Self::with_hooks(speech, PlayerHooks::default())
    }

    pub fn with_hooks(speech: Arc<dyn SpeechOutput>, hooks: PlayerHooks) -> Self {
        Self {
            speech,
            generation: GenerationToken::new(),
            queue: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            hooks,
            playing: AtomicBool::new(false),
        }
    }

    /// True while an accepted batch is in progress.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Play `items` in order with `delay_between` after each item but the last.
    ///
    /// Resolves when the batch finished, was cancelled, or was skipped as stale.
    /// Speech errors are logged and the batch moves on to the next item.
    pub async fn play_sequentially(
        &self,
        items: Vec<PlaybackItem>,
        delay_between: Duration,
        callbacks: AudioCallbacks,
        options: PlayOptions,
    ) {
        if options.cancel {
            self.cancel();
        }
        let ticket = self.generation.ticket();

        let _turn = self.queue.lock().await;
        if ticket.is_stale() {
            debug!(generation = ticket.generation(), "Skipping stale audio batch");
            return;
        }
        if items.is_empty() {
            return;
        }

        debug!(generation = ticket.generation(), items = items.len(), "Audio batch started");
        let mut batch = BatchGuard::begin(self);

        for (i, item) in items.iter().enumerate() {
            if i > 0 && !delay_between.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay_between) => {}
                    _ = ticket.invalidated() => {}
                }
            }
            if ticket.is_stale() {
                debug!(generation = ticket.generation(), remaining = items.len() - i, "Audio batch cancelled");
                break;
            }

            fire_item(&callbacks.on_item_start, item);
            self.play_item(item, &ticket).await;
            fire_item(&callbacks.on_item_end, item);
        }

        batch.finished = true;
    }

    async fn play_item(&self, item: &PlaybackItem, ticket: &Ticket) {
        let (done_tx, done_rx) = oneshot::channel();
        self.set_pending(done_tx);
        // A cancel between the loop's check and set_pending found no pending slot.
        if ticket.is_stale() {
            self.complete_pending();
            return;
        }

        tokio::select! {
            result = self.speech.speak(&item.text, &item.lang) => {
                if let Err(e) = result {
                    warn!(key = %item.key, lang = %item.lang, "Speech failed, continuing with next item: {}", e);
                }
                self.complete_pending();
            }
            _ = done_rx => {
                debug!(key = %item.key, "Item released by cancel");
            }
        }
    }

    /// Invalidate every queued and running batch, stop speech and release the awaited item.
    pub fn cancel(&self) {
        self.generation.invalidate();
        self.speech.stop();
        self.complete_pending();
    }

    fn set_pending(&self, done: oneshot::Sender<()>) {
        *self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(done);
    }

    fn complete_pending(&self) {
        let done = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(done) = done {
            let _ = done.send(());
        }
    }
}
