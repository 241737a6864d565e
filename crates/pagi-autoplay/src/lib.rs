//! # PAGI Autoplay - Unattended Conversation Simulation
//!
//! Runs a scripted back-and-forth between a simulated user (party A) and the
//! assistant (party B), narrating each exchange with speech, read-along word
//! highlighting, or a plain reading pause.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Simulation Orchestrator                     │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │  Generate    │→ │ TypingEffect │→ │ Submit/Reply │       │
//! │  │  (delegate)  │  │  (jittered)  │  │  (polling)   │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │                                             ↓               │
//! │  ┌──────────────────────────────────────────────────┐       │
//! │  │               Playback Controller                │       │
//! │  │  SequentialAudioPlayer  │   WordHighlighter      │       │
//! │  └──────────────────────────────────────────────────┘       │
//! │        ↑ stop/pause: GenerationToken + PauseFlag            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod highlight;
pub mod orchestrator;
pub mod playback;
pub mod signal;
pub mod token;
pub mod typing;

pub use audio::{
    AudioCallbacks, ItemHook, PlayOptions, PlaybackHook, PlaybackItem, PlayerHooks,
    SequentialAudioPlayer, SpeechOutput,
};
pub use config::{AutoplayConfig, PlaybackMode, SettingsHandle};
pub use error::{AutoplayError, AutoplayResult};
pub use highlight::{tokenize, word_delay, ReadingPace, WordCursor, WordHighlighter};
pub use orchestrator::{
    AbortReason, ConversationExchange, Phase, Reply, Role, RunControls, RunOutcome,
    SimulationDelegate, SimulationEvent, SimulationOrchestrator, SimulationState, Submission,
    Translations,
};
pub use playback::{PlaybackCallbacks, PlaybackController, PlaybackOptions};
pub use signal::{checkpoint, sleep, NeverStop, PauseFlag, RunSignal, StopSignal};
pub use token::{GenerationToken, Ticket};
pub use typing::{TextSink, TypingConfig, TypingCue, TypingEffect};

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
