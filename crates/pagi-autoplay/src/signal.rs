//! Cooperative pause/stop signalling shared by the typing, highlighting and
//! simulation loops.
//!
//! Long-running loops call [`checkpoint`] at every iteration boundary (each
//! character, each word, each poll tick) and use [`sleep`] for their pacing
//! delays, so a stop request is honoured within one poll interval.

use crate::token::Ticket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default pause polling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Something a long-running loop consults to decide whether to keep going.
pub trait StopSignal: Send + Sync {
    /// The loop must exit.
    fn should_stop(&self) -> bool;

    /// The loop must hold its position until resumed.
    fn is_paused(&self) -> bool {
        false
    }

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }
}

impl StopSignal for Ticket {
    fn should_stop(&self) -> bool {
        self.is_stale()
    }
}

impl<S: StopSignal + ?Sized> StopSignal for Arc<S> {
    fn should_stop(&self) -> bool {
        (**self).should_stop()
    }

    fn is_paused(&self) -> bool {
        (**self).is_paused()
    }

    fn poll_interval(&self) -> Duration {
        (**self).poll_interval()
    }
}

/// A signal that never stops or pauses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverStop;

impl StopSignal for NeverStop {
    fn should_stop(&self) -> bool {
        false
    }
}

/// Pause flag shared between a controller and the loops it drives.
#[derive(Debug, Clone, Default)]
pub struct PauseFlag {
    paused: Arc<AtomicBool>,
}

impl PauseFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn get(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

/// Stop/pause signal for one simulation run: stopped once the run's ticket goes stale.
#[derive(Debug, Clone)]
pub struct RunSignal {
    ticket: Ticket,
    pause: PauseFlag,
    poll_interval: Duration,
}

impl RunSignal {
    pub fn new(ticket: Ticket, pause: PauseFlag, poll_interval: Duration) -> Self {
        Self {
            ticket,
            pause,
            poll_interval,
        }
    }

    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }
}

impl StopSignal for RunSignal {
    fn should_stop(&self) -> bool {
        self.ticket.is_stale()
    }

    fn is_paused(&self) -> bool {
        self.pause.get()
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Wait out a pause, then report whether the caller may continue.
///
/// Returns `false` as soon as the signal asks to stop, including while paused.
pub async fn checkpoint<S: StopSignal + ?Sized>(signal: &S) -> bool {
    loop {
        if signal.should_stop() {
            return false;
        }
        if !signal.is_paused() {
            return true;
        }
        tokio::time::sleep(signal.poll_interval()).await;
    }
}

/// Sleep for `duration`, slicing the wait into poll intervals.
///
/// Time spent paused does not count toward `duration`. Returns `false` if the
/// signal asked to stop before the full duration elapsed.
pub async fn sleep<S: StopSignal + ?Sized>(signal: &S, duration: Duration) -> bool {
    let mut remaining = duration;
    loop {
        if !checkpoint(signal).await {
            return false;
        }
        if remaining.is_zero() {
            return true;
        }
        let slice = remaining.min(signal.poll_interval());
        let started = Instant::now();
        tokio::time::sleep(slice).await;
        remaining = remaining.saturating_sub(started.elapsed().max(slice));
    }
}
