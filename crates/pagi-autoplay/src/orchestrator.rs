//! Simulation Orchestrator - the auto-play conversation loop
//!
//! Drives an unattended exchange between party A (the simulated human) and party B
//! (the assistant) through an injected [`SimulationDelegate`]:
//!
//! ```text
//! ┌────────────┐   ┌────────┐   ┌────────────┐   ┌──────────────────┐   ┌─────────────┐
//! │ Generating │ → │ Typing │ → │ Submitting │ → │ WaitingResponse  │ → │  Narration  │ ─┐
//! └────────────┘   └────────┘   └────────────┘   └──────────────────┘   │ audio /     │  │
//!       ↑                                                               │ highlight / │  │
//!       └──────────────────────── next cycle (until max_cycles) ────────│ delay       │ ←┘
//!                                                                       └─────────────┘
//! ```
//!
//! Every await point races the run's cancellation ticket, and every phase boundary
//! waits out a pause. Any failed step ends the whole run; nothing is retried.

use crate::config::{PlaybackMode, SettingsHandle};
use crate::highlight::WordCursor;
use crate::signal::{checkpoint, sleep, PauseFlag, RunSignal, StopSignal};
use crate::token::{GenerationToken, Ticket};
use crate::typing::TextSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Language code -> translated text.
pub type Translations = HashMap<String, String>;

/// The two sides of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Simulated human side.
    PartyA,
    /// Assistant side.
    PartyB,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::PartyA => f.write_str("party_a"),
            Role::PartyB => f.write_str("party_b"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationExchange {
    pub role: Role,
    pub content: String,
}

/// What the input pipeline reports after submitting party A's message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub text: String,
    #[serde(default)]
    pub translations: Translations,
}

/// Party B's finished reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub response: String,
    #[serde(default)]
    pub translations: Translations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Generating,
    Typing,
    Submitting,
    WaitingResponse,
    PlayingAudio,
    Highlighting,
    Delay,
}

/// Observable state of the simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub is_running: bool,
    pub is_paused: bool,
    pub phase: Phase,
    pub cycle_count: u32,
    pub typing_text: String,
    pub highlighted_word_index: Option<usize>,
    pub highlight_target: Option<Role>,
}

impl SimulationState {
    /// Back to idle, keeping whatever text was typed so far.
    fn reset_to_idle(&mut self) {
        self.is_running = false;
        self.is_paused = false;
        self.phase = Phase::Idle;
        self.highlighted_word_index = None;
        self.highlight_target = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// No next message could be generated.
    GenerationFailed,
    /// The typing step reported it did not finish.
    TypingCancelled,
    /// Party B stayed busy past the reply timeout.
    ReplyTimeout,
    /// Party B finished without producing a reply.
    ReplyMissing,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { cycles: u32 },
    Aborted(AbortReason),
    Cancelled,
}

/// Events emitted by the orchestrator
#[derive(Debug, Clone)]
pub enum SimulationEvent {
    Started {
        timestamp: DateTime<Utc>,
    },
    PhaseChanged {
        phase: Phase,
        cycle: u32,
    },
    CycleCompleted {
        cycle: u32,
        timestamp: DateTime<Utc>,
    },
    Paused {
        timestamp: DateTime<Utc>,
    },
    Resumed {
        timestamp: DateTime<Utc>,
    },
    Finished {
        outcome: RunOutcome,
        timestamp: DateTime<Utc>,
    },
}

/// Primitives the loop drives. Provider errors are reported as `None` / `false`.
#[async_trait]
pub trait SimulationDelegate: Send + Sync {
    async fn predict_next_message(
        &self,
        history: &[ConversationExchange],
        summary: Option<&str>,
    ) -> Option<String>;

    /// Type `text` into the input. `false` means typing did not finish.
    async fn type_message(&self, text: &str) -> bool;

    async fn submit_message(&self) -> Option<Submission>;

    async fn wait_for_party_b_response(&self) -> Option<Reply>;

    async fn play_party_a_audio(&self, text: &str, translations: &Translations);

    async fn play_party_b_audio(&self, text: &str, translations: &Translations);

    async fn highlight_text(&self, text: &str, role: Role, wpm: u32);

    async fn wait_with_countdown(&self, role: Role, duration: Duration);

    async fn add_to_history(&self, role: Role, content: &str);

    /// Party B is still generating its reply.
    fn is_responding(&self) -> bool {
        false
    }

    /// Party B's reply is still being translated.
    fn is_translating(&self) -> bool {
        false
    }

    /// Unlock audio output before the first narration. Called once per `start()`.
    async fn warmup_audio(&self) {}
}

/// Handles shared between the orchestrator and its delegate.
///
/// Build these first, hand the signal source and sinks to the delegate, then build
/// the orchestrator from the same controls.
#[derive(Clone)]
pub struct RunControls {
    run: GenerationToken,
    pause: PauseFlag,
    state: Arc<watch::Sender<SimulationState>>,
    settings: SettingsHandle,
}

impl RunControls {
    pub fn new(settings: SettingsHandle) -> Self {
        let (state, _) = watch::channel(SimulationState::default());
        Self {
            run: GenerationToken::new(),
            pause: PauseFlag::new(),
            state: Arc::new(state),
            settings,
        }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Stop/pause signal bound to the run that is active right now. Stops once that run ends.
    pub fn signal(&self) -> RunSignal {
        RunSignal::new(
            self.run.ticket(),
            self.pause.clone(),
            self.settings.snapshot().poll_interval(),
        )
    }

    /// Sink that mirrors typed text into `SimulationState::typing_text`.
    pub fn typing_sink(&self) -> Arc<dyn TextSink> {
        Arc::new(StateTextSink {
            state: Arc::clone(&self.state),
        })
    }

    /// Cursor that mirrors highlighting into `SimulationState::highlighted_word_index`.
    pub fn highlight_cursor(&self) -> Arc<dyn WordCursor> {
        Arc::new(StateWordCursor {
            state: Arc::clone(&self.state),
        })
    }
}

struct StateTextSink {
    state: Arc<watch::Sender<SimulationState>>,
}

impl TextSink for StateTextSink {
    fn set_text(&self, text: &str) {
        self.state.send_if_modified(|s| {
            if s.typing_text == text {
                return false;
            }
            s.typing_text.clear();
            s.typing_text.push_str(text);
            true
        });
    }
}

struct StateWordCursor {
    state: Arc<watch::Sender<SimulationState>>,
}

impl WordCursor for StateWordCursor {
    fn set_index(&self, index: Option<usize>) {
        self.state.send_if_modified(|s| {
            let changed = s.highlighted_word_index != index;
            s.highlighted_word_index = index;
            changed
        });
    }
}

const EVENT_CHANNEL_SIZE: usize = 64;

enum ReplyWait {
    Ready,
    TimedOut,
    Cancelled,
}

struct Inner {
    delegate: Arc<dyn SimulationDelegate>,
    controls: RunControls,
    /// Serializes start/stop/pause transitions and the loop's state writes.
    control: Mutex<()>,
    events: broadcast::Sender<SimulationEvent>,
    history: Mutex<Vec<ConversationExchange>>,
    summary: Mutex<Option<String>>,
    task: Mutex<Option<JoinHandle<RunOutcome>>>,
    host_visible: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The auto-play state machine. Clones share one orchestrator.
#[derive(Clone)]
pub struct SimulationOrchestrator {
    inner: Arc<Inner>,
}

impl SimulationOrchestrator {
    pub fn new(delegate: Arc<dyn SimulationDelegate>, settings: SettingsHandle) -> Self {
        Self::with_controls(delegate, RunControls::new(settings))
    }

    pub fn with_controls(delegate: Arc<dyn SimulationDelegate>, controls: RunControls) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(Inner {
                delegate,
                controls,
                control: Mutex::new(()),
                events,
                history: Mutex::new(Vec::new()),
                summary: Mutex::new(None),
                task: Mutex::new(None),
                host_visible: AtomicBool::new(true),
            }),
        }
    }

    pub fn state(&self) -> SimulationState {
        self.inner.controls.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SimulationState> {
        self.inner.controls.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SimulationEvent> {
        self.inner.events.subscribe()
    }

    pub fn controls(&self) -> &RunControls {
        &self.inner.controls
    }

    pub fn run_signal(&self) -> RunSignal {
        self.inner.controls.signal()
    }

    pub fn typing_sink(&self) -> Arc<dyn TextSink> {
        self.inner.controls.typing_sink()
    }

    pub fn history(&self) -> Vec<ConversationExchange> {
        lock(&self.inner.history).clone()
    }

    pub fn clear_history(&self) {
        lock(&self.inner.history).clear();
    }

    /// Conversation summary passed to `predict_next_message`.
    pub fn set_summary(&self, summary: Option<String>) {
        *lock(&self.inner.summary) = summary;
    }

    /// Begin a run on the tokio runtime. Returns `false` if one is already running.
    pub fn start(&self) -> bool {
        let ticket = {
            let _guard = lock(&self.inner.control);
            if self.inner.controls.state.borrow().is_running {
                return false;
            }
            let ticket = self.inner.controls.run.advance();
            self.inner.controls.pause.set(false);
            self.inner.controls.state.send_modify(|s| {
                *s = SimulationState {
                    is_running: true,
                    ..SimulationState::default()
                };
            });
            ticket
        };

        info!(
            target: "pagi::autoplay",
            run = ticket.generation(),
            max_cycles = self.inner.controls.settings.snapshot().max_cycles,
            "Simulation started"
        );
        self.inner.emit(SimulationEvent::Started { timestamp: Utc::now() });

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            // Let watchers observe the running state before any work begins.
            tokio::task::yield_now().await;
            inner.delegate.warmup_audio().await;
            let outcome = inner.run_loop(&ticket).await;
            inner.finish(&ticket, outcome);
            outcome
        });
        *lock(&self.inner.task) = Some(handle);
        true
    }

    /// Ask the loop to hold at its next wait point. No-op unless running.
    pub fn pause(&self) {
        let _guard = lock(&self.inner.control);
        let changed = self.inner.controls.state.send_if_modified(|s| {
            if !s.is_running || s.is_paused {
                return false;
            }
            s.is_paused = true;
            true
        });
        if changed {
            self.inner.controls.pause.set(true);
            info!(target: "pagi::autoplay", "Simulation paused");
            self.inner.emit(SimulationEvent::Paused { timestamp: Utc::now() });
        }
    }

    pub fn resume(&self) {
        let _guard = lock(&self.inner.control);
        let changed = self.inner.controls.state.send_if_modified(|s| {
            if !s.is_running || !s.is_paused {
                return false;
            }
            s.is_paused = false;
            true
        });
        if changed {
            self.inner.controls.pause.set(false);
            info!(target: "pagi::autoplay", "Simulation resumed");
            self.inner.emit(SimulationEvent::Resumed { timestamp: Utc::now() });
        }
    }

    /// Cancel the run. State is idle when this returns; the loop task exits at its next await point.
    pub fn stop(&self) {
        let was_running = {
            let _guard = lock(&self.inner.control);
            self.inner.controls.run.invalidate();
            self.inner.controls.pause.set(false);
            let was_running = self.inner.controls.state.borrow().is_running;
            if was_running {
                self.inner.controls.state.send_modify(SimulationState::reset_to_idle);
            }
            was_running
        };
        if was_running {
            info!(target: "pagi::autoplay", "Simulation stopped");
            self.inner.emit(SimulationEvent::Finished {
                outcome: RunOutcome::Cancelled,
                timestamp: Utc::now(),
            });
        }
    }

    /// Start if idle, resume if paused, pause if running.
    pub fn toggle(&self) {
        let state = self.state();
        if !state.is_running {
            self.start();
        } else if state.is_paused {
            self.resume();
        } else {
            self.pause();
        }
    }

    /// Report host visibility. Going hidden while running stops the run.
    pub fn set_host_visible(&self, visible: bool) {
        self.inner.host_visible.store(visible, Ordering::Release);
        if !visible && self.state().is_running {
            warn!(target: "pagi::autoplay", "Host hidden; stopping simulation");
            self.stop();
        }
    }

    pub fn is_host_visible(&self) -> bool {
        self.inner.host_visible.load(Ordering::Acquire)
    }

    /// Wait for the most recently started loop task. `None` if there is none or it panicked.
    pub async fn join(&self) -> Option<RunOutcome> {
        let handle = lock(&self.inner.task).take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(target: "pagi::autoplay", "Simulation task failed: {}", e);
                None
            }
        }
    }
}

impl Inner {
    fn emit(&self, event: SimulationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Apply `edit` to the state only while `ticket` still owns the run.
    fn update(&self, ticket: &Ticket, edit: impl FnOnce(&mut SimulationState)) -> bool {
        let _guard = lock(&self.control);
        if ticket.is_stale() {
            return false;
        }
        self.controls.state.send_modify(edit);
        true
    }

    fn set_phase(&self, ticket: &Ticket, phase: Phase) {
        let mut cycle = 0;
        if self.update(ticket, |s| {
            s.phase = phase;
            cycle = s.cycle_count;
        }) {
            debug!(target: "pagi::autoplay", ?phase, cycle, "Phase changed");
            self.emit(SimulationEvent::PhaseChanged { phase, cycle });
        }
    }

    fn set_highlight_target(&self, ticket: &Ticket, target: Option<Role>) {
        self.update(ticket, |s| s.highlight_target = target);
    }

    /// Record an exchange while `ticket` still owns the run. `false` means the run was stopped.
    fn push_history(&self, ticket: &Ticket, role: Role, content: &str) -> bool {
        let _guard = lock(&self.control);
        if ticket.is_stale() {
            return false;
        }
        lock(&self.history).push(ConversationExchange {
            role,
            content: content.to_string(),
        });
        true
    }

    /// Natural end of a run. A stale ticket means `stop()` already reset the state.
    fn finish(&self, ticket: &Ticket, outcome: RunOutcome) {
        {
            let _guard = lock(&self.control);
            if ticket.is_stale() {
                return;
            }
            // Retire the run so signals handed to the delegate report stop.
            self.controls.run.invalidate();
            self.controls.pause.set(false);
            self.controls.state.send_modify(SimulationState::reset_to_idle);
        }
        match outcome {
            RunOutcome::Completed { cycles } => {
                info!(target: "pagi::autoplay", cycles, "Simulation completed");
            }
            RunOutcome::Aborted(reason) => {
                warn!(target: "pagi::autoplay", ?reason, "Simulation aborted");
            }
            RunOutcome::Cancelled => {
                info!(target: "pagi::autoplay", "Simulation cancelled");
            }
        }
        self.emit(SimulationEvent::Finished {
            outcome,
            timestamp: Utc::now(),
        });
    }

    /// Run `fut` unless the run is cancelled first. `None` means cancelled.
    async fn guard<F: Future>(ticket: &Ticket, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = ticket.invalidated() => None,
            out = fut => Some(out),
        }
    }

    async fn run_loop(&self, ticket: &Ticket) -> RunOutcome {
        let signal = RunSignal::new(
            ticket.clone(),
            self.controls.pause.clone(),
            self.controls.settings.snapshot().poll_interval(),
        );

        loop {
            match self.run_cycle(ticket, &signal).await {
                Ok(()) => {}
                Err(outcome) => return outcome,
            }

            let mut cycle = 0;
            if !self.update(ticket, |s| {
                s.cycle_count += 1;
                cycle = s.cycle_count;
            }) {
                return RunOutcome::Cancelled;
            }
            info!(target: "pagi::autoplay", cycle, "Cycle completed");
            self.emit(SimulationEvent::CycleCompleted {
                cycle,
                timestamp: Utc::now(),
            });

            let settings = self.controls.settings.snapshot();
            if cycle >= settings.max_cycles {
                return RunOutcome::Completed { cycles: cycle };
            }

            self.set_phase(ticket, Phase::Delay);
            if !sleep(&signal, settings.inter_cycle_delay()).await {
                return RunOutcome::Cancelled;
            }
        }
    }

    /// One generate → type → submit → reply → narrate pass. `Err` ends the run.
    async fn run_cycle(&self, ticket: &Ticket, signal: &RunSignal) -> Result<(), RunOutcome> {
        let cancelled = || RunOutcome::Cancelled;

        // 1. Generate party A's next message.
        if !checkpoint(signal).await {
            return Err(cancelled());
        }
        self.set_phase(ticket, Phase::Generating);
        let history = lock(&self.history).clone();
        let summary = lock(&self.summary).clone();
        let message = Self::guard(
            ticket,
            self.delegate.predict_next_message(&history, summary.as_deref()),
        )
        .await
        .ok_or_else(cancelled)?;
        let message = match message {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Err(RunOutcome::Aborted(AbortReason::GenerationFailed)),
        };
        debug!(target: "pagi::autoplay", chars = message.len(), "Generated next message");

        // 2. Type it.
        if !checkpoint(signal).await {
            return Err(cancelled());
        }
        self.set_phase(ticket, Phase::Typing);
        let typed = Self::guard(ticket, self.delegate.type_message(&message))
            .await
            .ok_or_else(cancelled)?;
        if !typed {
            if ticket.is_stale() {
                return Err(cancelled());
            }
            return Err(RunOutcome::Aborted(AbortReason::TypingCancelled));
        }

        // 3. Submit.
        if !checkpoint(signal).await {
            return Err(cancelled());
        }
        self.set_phase(ticket, Phase::Submitting);
        Self::guard(ticket, self.delegate.add_to_history(Role::PartyA, &message))
            .await
            .ok_or_else(cancelled)?;
        if !self.push_history(ticket, Role::PartyA, &message) {
            return Err(cancelled());
        }
        let submission = Self::guard(ticket, self.delegate.submit_message())
            .await
            .ok_or_else(cancelled)?;
        let (spoken_a, translations_a) = match submission {
            Some(sub) if !sub.text.trim().is_empty() => (sub.text, sub.translations),
            Some(sub) => (message.clone(), sub.translations),
            None => (message.clone(), Translations::new()),
        };
        if !sleep(signal, self.controls.settings.snapshot().settle_delay()).await {
            return Err(cancelled());
        }

        // 4. Wait for party B.
        self.set_phase(ticket, Phase::WaitingResponse);
        match self.wait_for_idle_responder(signal).await {
            ReplyWait::Ready => {
                if !checkpoint(signal).await {
                    return Err(cancelled());
                }
            }
            ReplyWait::Cancelled => return Err(cancelled()),
            ReplyWait::TimedOut => return Err(RunOutcome::Aborted(AbortReason::ReplyTimeout)),
        }
        let reply = Self::guard(ticket, self.delegate.wait_for_party_b_response())
            .await
            .ok_or_else(cancelled)?
            .ok_or(RunOutcome::Aborted(AbortReason::ReplyMissing))?;
        if !self.push_history(ticket, Role::PartyB, &reply.response) {
            return Err(cancelled());
        }

        // 5. Narrate.
        if !checkpoint(signal).await {
            return Err(cancelled());
        }
        let settings = self.controls.settings.snapshot();
        match settings.playback_mode {
            PlaybackMode::Audio => {
                self.set_phase(ticket, Phase::PlayingAudio);
                self.set_highlight_target(ticket, Some(Role::PartyA));
                Self::guard(ticket, self.delegate.play_party_a_audio(&spoken_a, &translations_a))
                    .await
                    .ok_or_else(cancelled)?;
                if !checkpoint(signal).await {
                    return Err(cancelled());
                }
                self.set_highlight_target(ticket, Some(Role::PartyB));
                Self::guard(
                    ticket,
                    self.delegate.play_party_b_audio(&reply.response, &reply.translations),
                )
                .await
                .ok_or_else(cancelled)?;
            }
            PlaybackMode::Highlight => {
                self.set_phase(ticket, Phase::Highlighting);
                self.set_highlight_target(ticket, Some(Role::PartyA));
                let wpm = self.controls.settings.reading_speed();
                Self::guard(ticket, self.delegate.highlight_text(&spoken_a, Role::PartyA, wpm))
                    .await
                    .ok_or_else(cancelled)?;
                if !checkpoint(signal).await {
                    return Err(cancelled());
                }
                self.set_highlight_target(ticket, Some(Role::PartyB));
                let wpm = self.controls.settings.reading_speed();
                Self::guard(
                    ticket,
                    self.delegate.highlight_text(&reply.response, Role::PartyB, wpm),
                )
                .await
                .ok_or_else(cancelled)?;
            }
            PlaybackMode::Manual => {
                self.set_phase(ticket, Phase::Delay);
                let delay = settings.manual_delay_for(&reply.response);
                debug!(target: "pagi::autoplay", delay_ms = delay.as_millis() as u64, "Manual reading delay");
                Self::guard(ticket, self.delegate.wait_with_countdown(Role::PartyB, delay))
                    .await
                    .ok_or_else(cancelled)?;
            }
        }
        self.set_highlight_target(ticket, None);
        Ok(())
    }

    /// Poll the responder's busy flags until both clear. The timeout runs from phase entry.
    async fn wait_for_idle_responder(&self, signal: &RunSignal) -> ReplyWait {
        let timeout = self.controls.settings.snapshot().reply_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            if signal.should_stop() {
                return ReplyWait::Cancelled;
            }
            if !self.delegate.is_responding() && !self.delegate.is_translating() {
                return ReplyWait::Ready;
            }
            if Instant::now() >= deadline {
                warn!(
                    target: "pagi::autoplay",
                    timeout_ms = timeout.as_millis() as u64,
                    "Party B did not finish in time"
                );
                return ReplyWait::TimedOut;
            }
            tokio::time::sleep(signal.poll_interval()).await;
        }
    }
}
