//! Example: Auto-play Simulation
//!
//! Runs a short scripted conversation in the terminal. Party A's lines are typed
//! out character by character, party B's replies are "read along" word by word.
//!
//! Settings come from `config/autoplay.toml` (if present) and `PAGI_AUTOPLAY__*`
//! environment variables, e.g. `PAGI_AUTOPLAY__PLAYBACK_MODE=manual`.

use async_trait::async_trait;
use pagi_autoplay::{
    sleep, tokenize, AutoplayConfig, ConversationExchange, Reply, Role, RunControls,
    SettingsHandle, SimulationDelegate, SimulationEvent, SimulationOrchestrator, Submission,
    TextSink, Translations, TypingConfig, TypingEffect, WordCursor, WordHighlighter,
};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

const SCRIPT: &[(&str, &str)] = &[
    ("What's the weather like in Lisbon today?", "Sunny and about 24 degrees, with a light breeze from the west."),
    ("Should I bring a jacket for tonight?", "A light one is a good idea; it drops to around 16 degrees after sunset."),
    ("Thanks! Any restaurant you'd suggest?", "Try a tasca in Alfama for grilled sardines and fado."),
];

/// Prints the typed line in place.
struct TerminalInput;

impl TextSink for TerminalInput {
    fn set_text(&self, text: &str) {
        print!("\r> {}", text);
        let _ = std::io::stdout().flush();
    }
}

/// Brackets the highlighted word of the line being read.
struct TerminalReader {
    tokens: Mutex<Vec<String>>,
}

impl WordCursor for TerminalReader {
    fn set_index(&self, index: Option<usize>) {
        let tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        let line: String = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| if Some(i) == index { format!("[{}]", t) } else { t.clone() })
            .collect();
        print!("\r\x1b[2K  {}", line);
        let _ = std::io::stdout().flush();
    }
}

struct DemoDelegate {
    controls: RunControls,
    typing: TypingEffect,
    reader: Arc<TerminalReader>,
    highlighter: WordHighlighter,
    turn: Mutex<usize>,
}

impl DemoDelegate {
    fn line(&self) -> Option<(&'static str, &'static str)> {
        let turn = *self.turn.lock().unwrap_or_else(|p| p.into_inner());
        SCRIPT.get(turn % SCRIPT.len()).copied()
    }
}

#[async_trait]
impl SimulationDelegate for DemoDelegate {
    async fn predict_next_message(&self, _: &[ConversationExchange], _: Option<&str>) -> Option<String> {
        self.line().map(|(a, _)| a.to_string())
    }

    async fn type_message(&self, text: &str) -> bool {
        let typed = self.typing.type_text(text, &self.controls.signal()).await;
        println!();
        typed
    }

    async fn submit_message(&self) -> Option<Submission> {
        None
    }

    async fn wait_for_party_b_response(&self) -> Option<Reply> {
        let reply = self.line().map(|(_, b)| Reply {
            response: b.to_string(),
            translations: Translations::new(),
        });
        *self.turn.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        reply
    }

    async fn play_party_a_audio(&self, text: &str, _: &Translations) {
        info!("(speaking) {}", text);
    }

    async fn play_party_b_audio(&self, text: &str, _: &Translations) {
        info!("(speaking) {}", text);
    }

    async fn highlight_text(&self, text: &str, role: Role, wpm: u32) {
        if role == Role::PartyA {
            return;
        }
        *self.reader.tokens.lock().unwrap_or_else(|p| p.into_inner()) =
            tokenize(text).into_iter().map(str::to_string).collect();
        self.highlighter
            .highlight(text, &wpm, self.reader.as_ref(), &self.controls.signal())
            .await;
        println!("\r\x1b[2K  {}", text);
    }

    async fn wait_with_countdown(&self, role: Role, duration: Duration) {
        info!(%role, secs = duration.as_secs_f32(), "Reading pause");
        sleep(&self.controls.signal(), duration).await;
    }

    async fn add_to_history(&self, _: Role, _: &str) {}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    pagi_autoplay::init_tracing();

    info!("🎬 PAGI Autoplay Demo");
    info!("=====================");

    let config = AutoplayConfig::load()?;
    info!(
        mode = %config.playback_mode,
        max_cycles = config.max_cycles,
        "Loaded settings"
    );

    let typing = TypingConfig::from_settings(&config);
    let controls = RunControls::new(SettingsHandle::new(config));
    let delegate = Arc::new(DemoDelegate {
        typing: TypingEffect::new(typing, Arc::new(TerminalInput)),
        reader: Arc::new(TerminalReader {
            tokens: Mutex::new(Vec::new()),
        }),
        highlighter: WordHighlighter::default(),
        turn: Mutex::new(0),
        controls: controls.clone(),
    });
    let orchestrator = SimulationOrchestrator::with_controls(delegate, controls);

    let mut events = orchestrator.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SimulationEvent::CycleCompleted { cycle, .. } => info!("✅ Cycle {} complete", cycle),
                SimulationEvent::Finished { outcome, .. } => info!(?outcome, "🏁 Finished"),
                _ => {}
            }
        }
    });

    orchestrator.start();

    tokio::select! {
        outcome = orchestrator.join() => {
            info!(?outcome, "Simulation ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, stopping");
            orchestrator.stop();
        }
    }

    info!("History: {} exchanges", orchestrator.history().len());
    Ok(())
}
