//! Delayed-playback scheduling.
//!
//! At most one sweep trigger may be outstanding per sonifier instance: every
//! new image cancels the previous trigger before scheduling or executing its
//! own work, which eliminates races between a late-firing old sweep and a
//! newly requested one.

use std::time::Duration;

use crate::timer::{DelayTimer, TimerToken};

/// Owns the sweep-delay timer and the single outstanding trigger token.
pub struct PlaybackScheduler {
    timer: Box<dyn DelayTimer>,
    pending: Option<TimerToken>,
}

impl PlaybackScheduler {
    pub fn new(timer: Box<dyn DelayTimer>) -> Self {
        Self {
            timer,
            pending: None,
        }
    }

    /// Cancels the outstanding trigger, if any. Tokens that already fired
    /// are ignored by the timer.
    pub fn cancel_pending(&mut self) {
        if let Some(token) = self.pending.take() {
            self.timer.cancel(token);
        }
    }

    /// Arms a new trigger, cancelling the previous one first.
    pub fn schedule_once(&mut self, delay: Duration, callback: Box<dyn FnOnce() + Send>) {
        self.cancel_pending();
        self.pending = Some(self.timer.schedule_once(delay, callback));
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("pending", &self.pending)
            .finish()
    }
}
