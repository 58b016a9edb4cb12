//! Cancellable single-shot timers.
//!
//! The delayed-sweep trigger is injected as a [`DelayTimer`] capability so
//! the playback scheduler does not depend on any particular host event loop.
//! [`ThreadTimer`] is the shipped implementation; tests drive scheduling
//! deterministically through `ManualTimer`.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Identifies one scheduled callback for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// One-shot, cancellable timer capability.
pub trait DelayTimer: Send {
    /// Runs `callback` once after `delay`, unless cancelled first.
    fn schedule_once(
        &mut self,
        delay: Duration,
        callback: Box<dyn FnOnce() + Send>,
    ) -> TimerToken;

    /// Cancels a scheduled callback. Unknown or already-fired tokens are
    /// ignored.
    fn cancel(&mut self, token: TimerToken);
}

struct CancelSignal {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

/// Timer that parks one thread per scheduled callback.
pub struct ThreadTimer {
    next_token: u64,
    pending: Arc<Mutex<HashMap<u64, Arc<CancelSignal>>>>,
}

impl ThreadTimer {
    pub fn new() -> Self {
        Self {
            next_token: 0,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for ThreadTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayTimer for ThreadTimer {
    fn schedule_once(
        &mut self,
        delay: Duration,
        callback: Box<dyn FnOnce() + Send>,
    ) -> TimerToken {
        let token = self.next_token;
        self.next_token += 1;

        let signal = Arc::new(CancelSignal {
            cancelled: Mutex::new(false),
            condvar: Condvar::new(),
        });
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(token, Arc::clone(&signal));
        }

        let pending = Arc::clone(&self.pending);
        let _ = thread::Builder::new()
            .name("sonifier-timer".into())
            .spawn(move || {
                let fire = match signal.cancelled.lock() {
                    Ok(guard) => match signal
                        .condvar
                        .wait_timeout_while(guard, delay, |cancelled| !*cancelled)
                    {
                        Ok((guard, result)) => result.timed_out() && !*guard,
                        Err(_) => false,
                    },
                    Err(_) => false,
                };
                if let Ok(mut pending) = pending.lock() {
                    pending.remove(&token);
                }
                if fire {
                    callback();
                }
            });

        TimerToken(token)
    }

    fn cancel(&mut self, token: TimerToken) {
        let signal = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&token.0),
            Err(_) => None,
        };
        if let Some(signal) = signal {
            if let Ok(mut cancelled) = signal.cancelled.lock() {
                *cancelled = true;
            }
            signal.condvar.notify_all();
        }
    }
}

#[cfg(test)]
pub(crate) use manual::{ManualHandle, ManualTimer};
