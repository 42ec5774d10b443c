use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Highest difficulty a SHA-256 hex digest can satisfy
pub const MAX_DIFFICULTY: u32 = 64;

/// How many nonces are tried between checks of a [`MiningControl`]
pub const CHECK_INTERVAL: u64 = 4096;

/// Whether `hash` starts with at least `difficulty` zero hex characters
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Why a mining loop stopped before finding a valid nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    Cancelled,
    TimedOut,
}

/// External brake on the proof-of-work loop.
///
/// Clones share the same cancellation flag, so a caller can keep one clone
/// and hand another to the miner.
#[derive(Debug, Clone, Default)]
pub struct MiningControl {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl MiningControl {
    /// A control that never interrupts unless [`MiningControl::cancel`] is called
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A control that gives up once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        MiningControl {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            Some(timeout) => Self::with_timeout(timeout),
            None => Self::unbounded(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn interruption(&self) -> Option<Interruption> {
        if self.is_cancelled() {
            return Some(Interruption::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interruption::TimedOut),
            _ => None,
        }
    }
}
