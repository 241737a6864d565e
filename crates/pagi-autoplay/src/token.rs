//! Generation counter used to invalidate stale async continuations.
//!
//! Each cancelable engine owns one [`GenerationToken`]. Work that may outlive a
//! `stop()` captures a [`Ticket`] when it is issued and checks
//! [`Ticket::is_current`] before it touches shared state or fires a callback.
//! Bumping the generation is the only cancellation primitive; nothing is preempted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Shared {
    generation: AtomicU64,
    changed: Notify,
}

/// Monotonic generation counter. Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct GenerationToken {
    shared: Arc<Shared>,
}

impl GenerationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation value.
    pub fn current(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Capture the live generation.
    pub fn ticket(&self) -> Ticket {
        Ticket {
            issued: self.current(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Invalidate every outstanding ticket and return a ticket for the new generation.
    pub fn advance(&self) -> Ticket {
        let issued = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.changed.notify_waiters();
        Ticket {
            issued,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Invalidate every outstanding ticket.
    pub fn invalidate(&self) {
        self.advance();
    }
}

/// A generation value captured at issue time.
#[derive(Debug, Clone)]
pub struct Ticket {
    issued: u64,
    shared: Arc<Shared>,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.issued
    }

    /// True while no newer generation has been started.
    pub fn is_current(&self) -> bool {
        self.shared.generation.load(Ordering::Acquire) == self.issued
    }

    pub fn is_stale(&self) -> bool {
        !self.is_current()
    }

    /// Resolves once this ticket is stale. Returns immediately if it already is.
    pub async fn invalidated(&self) {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            // Register before checking so an advance between the check and the await is not missed.
            notified.as_mut().enable();
            if self.is_stale() {
                return;
            }
            notified.await;
        }
    }
}
