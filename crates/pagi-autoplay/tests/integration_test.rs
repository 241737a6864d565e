//! Integration tests for the auto-play simulation loop
//!
//! All tests run on paused tokio time, so the multi-second reading delays and the
//! reply timeout elapse instantly.

use async_trait::async_trait;
use pagi_autoplay::{
    sleep, AbortReason, AutoplayConfig, AutoplayResult, ConversationExchange, Phase,
    PlaybackCallbacks, PlaybackController, PlaybackHook, PlaybackItem, PlaybackMode,
    PlaybackOptions, PlayerHooks, Reply,
    Role, RunControls, RunOutcome, SequentialAudioPlayer, SettingsHandle, SimulationDelegate,
    SimulationEvent, SimulationOrchestrator, SpeechOutput, Submission, Translations,
    TypingConfig, TypingEffect, WordHighlighter,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Records spoken utterances; each takes `speak_ms` (200ms unless changed).
struct RecordingSpeech {
    spoken: Mutex<Vec<(String, String)>>,
    speak_ms: AtomicU64,
    stops: AtomicUsize,
}

impl Default for RecordingSpeech {
    fn default() -> Self {
        Self {
            spoken: Mutex::new(Vec::new()),
            speak_ms: AtomicU64::new(200),
            stops: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SpeechOutput for RecordingSpeech {
    async fn speak(&self, text: &str, lang: &str) -> AutoplayResult<()> {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), lang.to_string()));
        tokio::time::sleep(Duration::from_millis(self.speak_ms.load(Ordering::SeqCst))).await;
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Delegate with canned party A lines and party B replies, built on the crate's own
/// typing, highlight and playback primitives.
struct ScriptedDelegate {
    controls: RunControls,
    typing: TypingEffect,
    highlighter: WordHighlighter,
    playback: PlaybackController,
    speech: Arc<RecordingSpeech>,
    playback_ends: Arc<AtomicUsize>,
    message: Option<String>,
    reply: Option<Reply>,
    always_busy: AtomicBool,
    /// Party B stays busy this long after each submit.
    reply_delay: Mutex<Duration>,
    busy_until: Mutex<Option<Instant>>,
    host_history: Mutex<Vec<(Role, String)>>,
    countdowns: Mutex<Vec<(Role, Duration)>>,
    highlights: Mutex<Vec<(Role, u32)>>,
}

impl ScriptedDelegate {
    fn new(controls: &RunControls, message: Option<&str>, reply: Option<&str>) -> Self {
        let speech = Arc::new(RecordingSpeech::default());
        let playback_ends = Arc::new(AtomicUsize::new(0));
        let ends = Arc::clone(&playback_ends);
        let on_playback_end: PlaybackHook = Some(Arc::new(move || {
            ends.fetch_add(1, Ordering::SeqCst);
        }));
        let player = Arc::new(SequentialAudioPlayer::with_hooks(
            speech.clone(),
            PlayerHooks {
                on_playback_start: None,
                on_playback_end,
            },
        ));
        Self {
            controls: controls.clone(),
            typing: TypingEffect::new(
                TypingConfig::from_settings(&controls.settings().snapshot()),
                controls.typing_sink(),
            ),
            highlighter: WordHighlighter::default(),
            playback: PlaybackController::new(player, Arc::new(controls.settings().clone())),
            speech,
            playback_ends,
            message: message.map(str::to_string),
            reply: reply.map(|text| Reply {
                response: text.to_string(),
                translations: Translations::from([("es".to_string(), format!("{} (es)", text))]),
            }),
            always_busy: AtomicBool::new(false),
            reply_delay: Mutex::new(Duration::ZERO),
            busy_until: Mutex::new(None),
            host_history: Mutex::new(Vec::new()),
            countdowns: Mutex::new(Vec::new()),
            highlights: Mutex::new(Vec::new()),
        }
    }

    async fn narrate(&self, key: &str, text: &str, translations: &Translations) {
        let mut items = vec![PlaybackItem::new(text, "en", format!("{}-en", key))];
        let mut langs: Vec<_> = translations.iter().collect();
        langs.sort();
        for (lang, translated) in langs {
            items.push(PlaybackItem::new(translated.as_str(), lang.as_str(), format!("{}-{}", key, lang)));
        }
        self.playback
            .play_sequence(
                items,
                PlaybackMode::Audio,
                PlaybackCallbacks::default(),
                PlaybackOptions::from_settings(&self.controls.settings().snapshot()),
            )
            .await;
    }
}

#[async_trait]
impl SimulationDelegate for ScriptedDelegate {
    async fn predict_next_message(
        &self,
        _history: &[ConversationExchange],
        _summary: Option<&str>,
    ) -> Option<String> {
        self.message.clone()
    }

    async fn type_message(&self, text: &str) -> bool {
        self.typing.type_text(text, &self.controls.signal()).await
    }

    async fn submit_message(&self) -> Option<Submission> {
        let delay = *self.reply_delay.lock().unwrap();
        *self.busy_until.lock().unwrap() = Some(Instant::now() + delay);
        Some(Submission {
            text: self.message.clone().unwrap_or_default(),
            translations: Translations::new(),
        })
    }

    async fn wait_for_party_b_response(&self) -> Option<Reply> {
        self.reply.clone()
    }

    async fn play_party_a_audio(&self, text: &str, translations: &Translations) {
        self.narrate("a", text, translations).await;
    }

    async fn play_party_b_audio(&self, text: &str, translations: &Translations) {
        self.narrate("b", text, translations).await;
    }

    async fn highlight_text(&self, text: &str, role: Role, wpm: u32) {
        self.highlights.lock().unwrap().push((role, wpm));
        let cursor = self.controls.highlight_cursor();
        self.highlighter
            .highlight(text, &wpm, cursor.as_ref(), &self.controls.signal())
            .await;
    }

    async fn wait_with_countdown(&self, role: Role, duration: Duration) {
        self.countdowns.lock().unwrap().push((role, duration));
        sleep(&self.controls.signal(), duration).await;
    }

    async fn add_to_history(&self, role: Role, content: &str) {
        self.host_history
            .lock()
            .unwrap()
            .push((role, content.to_string()));
    }

    fn is_responding(&self) -> bool {
        let busy = self
            .busy_until
            .lock()
            .unwrap()
            .map_or(false, |until| Instant::now() < until);
        busy || self.always_busy.load(Ordering::SeqCst)
    }
}

fn setup(
    config: AutoplayConfig,
    message: Option<&str>,
    reply: Option<&str>,
) -> (SimulationOrchestrator, Arc<ScriptedDelegate>) {
    init_tracing();
    let controls = RunControls::new(SettingsHandle::new(config));
    let delegate = Arc::new(ScriptedDelegate::new(&controls, message, reply));
    let orchestrator = SimulationOrchestrator::with_controls(delegate.clone(), controls);
    (orchestrator, delegate)
}

fn manual(max_cycles: u32) -> AutoplayConfig {
    AutoplayConfig {
        max_cycles,
        playback_mode: PlaybackMode::Manual,
        ..Default::default()
    }
}

fn exchange(role: Role, content: &str) -> ConversationExchange {
    ConversationExchange {
        role,
        content: content.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_manual_cycle() {
    let (orchestrator, delegate) = setup(manual(1), Some("hello"), Some("hi"));

    assert!(orchestrator.start());
    assert_eq!(orchestrator.join().await, Some(RunOutcome::Completed { cycles: 1 }));

    assert_eq!(
        orchestrator.history(),
        vec![exchange(Role::PartyA, "hello"), exchange(Role::PartyB, "hi")]
    );
    let state = orchestrator.state();
    assert!(!state.is_running);
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.cycle_count, 1);
    assert_eq!(state.typing_text, "hello");

    assert_eq!(
        *delegate.host_history.lock().unwrap(),
        vec![(Role::PartyA, "hello".to_string())]
    );
    // one word at 300ms/word stays under the 1s floor
    assert_eq!(
        *delegate.countdowns.lock().unwrap(),
        vec![(Role::PartyB, Duration::from_millis(1_000))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_runs_exactly_max_cycles() {
    let (orchestrator, _delegate) = setup(manual(2), Some("hello"), Some("hi"));
    let mut events = orchestrator.subscribe_events();

    orchestrator.start();
    assert_eq!(orchestrator.join().await, Some(RunOutcome::Completed { cycles: 2 }));

    let history = orchestrator.history();
    assert_eq!(history.iter().filter(|e| e.role == Role::PartyA).count(), 2);
    assert_eq!(history.iter().filter(|e| e.role == Role::PartyB).count(), 2);
    assert!(!orchestrator.state().is_running);

    let mut cycles = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SimulationEvent::CycleCompleted { cycle, .. } = event {
            cycles.push(cycle);
        }
    }
    assert_eq!(cycles, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_typing() {
    let message = "the quick brown fox jumps over the lazy dog";
    let (orchestrator, _delegate) = setup(manual(3), Some(message), Some("ok"));
    let mut state_rx = orchestrator.subscribe_state();

    orchestrator.start();
    state_rx
        .wait_for(|s| s.phase == Phase::Typing && s.typing_text.len() >= 5)
        .await
        .unwrap();

    orchestrator.stop();
    let state = orchestrator.state();
    assert!(!state.is_running);
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(orchestrator.join().await, Some(RunOutcome::Cancelled));

    // partial text stays; no further characters after stop
    let partial = orchestrator.state().typing_text;
    assert!(message.starts_with(&partial));
    assert!(partial.len() < message.len());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(orchestrator.state().typing_text, partial);
    assert_eq!(orchestrator.history(), Vec::new());

    // a fresh start clears the typed text
    assert!(orchestrator.start());
    let state = orchestrator.state();
    assert!(state.is_running);
    assert_eq!(state.typing_text, "");
    assert_eq!(state.cycle_count, 0);
    orchestrator.stop();
    assert_eq!(orchestrator.join().await, Some(RunOutcome::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_reply_timeout_aborts_run() {
    let (orchestrator, delegate) = setup(manual(3), Some("hello"), Some("hi"));
    delegate.always_busy.store(true, Ordering::SeqCst);

    let started = Instant::now();
    orchestrator.start();
    assert_eq!(
        orchestrator.join().await,
        Some(RunOutcome::Aborted(AbortReason::ReplyTimeout))
    );
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(orchestrator.history(), vec![exchange(Role::PartyA, "hello")]);
    assert!(!orchestrator.state().is_running);
}

#[tokio::test(start_paused = true)]
async fn test_missing_message_or_reply_aborts() {
    let (orchestrator, _delegate) = setup(manual(3), None, Some("hi"));
    orchestrator.start();
    assert_eq!(
        orchestrator.join().await,
        Some(RunOutcome::Aborted(AbortReason::GenerationFailed))
    );
    assert!(orchestrator.history().is_empty());

    let (orchestrator, _delegate) = setup(manual(3), Some("hello"), None);
    orchestrator.start();
    assert_eq!(
        orchestrator.join().await,
        Some(RunOutcome::Aborted(AbortReason::ReplyMissing))
    );
    assert_eq!(orchestrator.history(), vec![exchange(Role::PartyA, "hello")]);
}

#[tokio::test(start_paused = true)]
async fn test_pause_holds_the_loop() {
    let (orchestrator, _delegate) = setup(manual(1), Some("hello"), Some("hi"));
    let mut state_rx = orchestrator.subscribe_state();

    orchestrator.start();
    state_rx.wait_for(|s| s.phase == Phase::Submitting).await.unwrap();
    orchestrator.pause();
    assert!(orchestrator.state().is_paused);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let state = orchestrator.state();
    assert!(state.is_running && state.is_paused);
    assert_eq!(state.phase, Phase::Submitting);
    assert_eq!(state.cycle_count, 0);

    orchestrator.resume();
    assert_eq!(orchestrator.join().await, Some(RunOutcome::Completed { cycles: 1 }));
}

#[tokio::test(start_paused = true)]
async fn test_hidden_host_stops_run() {
    let (orchestrator, _delegate) = setup(manual(3), Some("hello there"), Some("hi"));
    let mut state_rx = orchestrator.subscribe_state();

    orchestrator.start();
    state_rx.wait_for(|s| s.phase == Phase::Typing).await.unwrap();
    orchestrator.set_host_visible(false);

    assert!(!orchestrator.is_host_visible());
    assert!(!orchestrator.state().is_running);
    assert_eq!(orchestrator.join().await, Some(RunOutcome::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_audio_mode_narrates_both_parties_in_order() {
    let config = AutoplayConfig {
        max_cycles: 1,
        playback_mode: PlaybackMode::Audio,
        ..Default::default()
    };
    let (orchestrator, delegate) = setup(config, Some("hello"), Some("hi"));
    let mut state_rx = orchestrator.subscribe_state();

    orchestrator.start();
    state_rx
        .wait_for(|s| s.highlight_target == Some(Role::PartyB))
        .await
        .unwrap();
    assert_eq!(orchestrator.state().phase, Phase::PlayingAudio);
    assert_eq!(orchestrator.join().await, Some(RunOutcome::Completed { cycles: 1 }));

    let spoken = delegate.speech.spoken.lock().unwrap().clone();
    assert_eq!(
        spoken,
        vec![
            ("hello".to_string(), "en".to_string()),
            ("hi".to_string(), "en".to_string()),
            ("hi (es)".to_string(), "es".to_string()),
        ]
    );
    assert_eq!(orchestrator.state().highlight_target, None);
}

#[tokio::test(start_paused = true)]
async fn test_highlight_mode_reads_live_speed() {
    let config = AutoplayConfig {
        max_cycles: 1,
        playback_mode: PlaybackMode::Highlight,
        ..Default::default()
    };
    let (orchestrator, delegate) = setup(config, Some("hello there"), Some("hi"));
    orchestrator
        .controls()
        .settings()
        .update(|c| c.reading_speed = 240)
        .unwrap();

    orchestrator.start();
    assert_eq!(orchestrator.join().await, Some(RunOutcome::Completed { cycles: 1 }));

    assert_eq!(
        *delegate.highlights.lock().unwrap(),
        vec![(Role::PartyA, 240), (Role::PartyB, 240)]
    );
    assert_eq!(orchestrator.state().highlighted_word_index, None);
}

#[tokio::test(start_paused = true)]
async fn test_skip_typing_sets_text_at_once() {
    let config = AutoplayConfig {
        skip_typing_effect: true,
        ..manual(1)
    };
    let (orchestrator, _delegate) = setup(config, Some("no typing animation here"), Some("ok"));
    let mut state_rx = orchestrator.subscribe_state();

    orchestrator.start();
    let state = state_rx
        .wait_for(|s| !s.typing_text.is_empty())
        .await
        .unwrap()
        .clone();
    assert_eq!(state.typing_text, "no typing animation here");
    assert_eq!(orchestrator.join().await, Some(RunOutcome::Completed { cycles: 1 }));
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_ignores_stale_loop() {
    let (orchestrator, _delegate) = setup(manual(1), Some("hello"), Some("hi"));
    let mut state_rx = orchestrator.subscribe_state();

    orchestrator.start();
    state_rx.wait_for(|s| s.phase == Phase::Submitting).await.unwrap();
    orchestrator.stop();
    orchestrator.clear_history();

    assert!(orchestrator.start());
    assert_eq!(orchestrator.join().await, Some(RunOutcome::Completed { cycles: 1 }));
    assert_eq!(
        orchestrator.history(),
        vec![exchange(Role::PartyA, "hello"), exchange(Role::PartyB, "hi")]
    );
    assert_eq!(orchestrator.state().cycle_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_audio_ends_playback() {
    let config = AutoplayConfig {
        max_cycles: 1,
        playback_mode: PlaybackMode::Audio,
        ..Default::default()
    };
    let (orchestrator, delegate) = setup(config, Some("hello"), Some("hi"));
    delegate.speech.speak_ms.store(5_000, Ordering::SeqCst);
    let mut state_rx = orchestrator.subscribe_state();

    orchestrator.start();
    state_rx
        .wait_for(|s| s.highlight_target == Some(Role::PartyA))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(delegate.playback.audio().is_playing());
    assert_eq!(delegate.playback.current_key().as_deref(), Some("a-en"));
    let stops = delegate.speech.stops.load(Ordering::SeqCst);

    orchestrator.stop();
    assert_eq!(orchestrator.join().await, Some(RunOutcome::Cancelled));

    assert!(!delegate.playback.audio().is_playing());
    assert_eq!(delegate.playback_ends.load(Ordering::SeqCst), 1);
    assert_eq!(delegate.speech.stops.load(Ordering::SeqCst), stops + 1);
    assert_eq!(delegate.playback.current_key(), None);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(
        *delegate.speech.spoken.lock().unwrap(),
        vec![("hello".to_string(), "en".to_string())]
    );
    assert_eq!(delegate.playback_ends.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pause_while_waiting_for_reply() {
    let (orchestrator, delegate) = setup(manual(1), Some("hello"), Some("hi"));
    *delegate.reply_delay.lock().unwrap() = Duration::from_secs(3);
    let mut state_rx = orchestrator.subscribe_state();

    orchestrator.start();
    state_rx
        .wait_for(|s| s.phase == Phase::WaitingResponse)
        .await
        .unwrap();
    orchestrator.pause();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let state = orchestrator.state();
    assert!(state.is_paused);
    assert_eq!(state.phase, Phase::WaitingResponse);
    assert_eq!(orchestrator.history(), vec![exchange(Role::PartyA, "hello")]);

    orchestrator.resume();
    assert_eq!(orchestrator.join().await, Some(RunOutcome::Completed { cycles: 1 }));
    assert_eq!(
        orchestrator.history(),
        vec![exchange(Role::PartyA, "hello"), exchange(Role::PartyB, "hi")]
    );
}
