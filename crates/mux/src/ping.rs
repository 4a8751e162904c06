//! Liveness probes and RTT measurement (`spec.md` §4.7). The ping book maps
//! an in-flight nonce to a one-shot notifier the waiting caller blocks on;
//! `Session::ping` and the background keep-alive loop are the only callers.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

enum Outcome {
    Rtt(Duration),
    Dead,
}

struct Slot {
    sent_at: Instant,
    outcome: Mutex<Option<Outcome>>,
    cv: Condvar,
}

/// Map `nonce -> response notifier and send time`. Entries are removed as
/// soon as they're resolved, by whichever side (responder or timeout)
/// resolves them first.
#[derive(Default)]
pub(crate) struct PingBook {
    slots: Mutex<HashMap<u32, Arc<Slot>>>,
}

impl PingBook {
    /// Allocates a fresh, currently-unused nonzero nonce and registers a
    /// slot for it. Retries on collision (`spec.md` §9 Open Question c).
    fn register(&self) -> (u32, Arc<Slot>) {
        loop {
            let candidate: u32 = rand::random();
            if candidate == 0 {
                continue;
            }
            let mut slots = self.slots.lock().unwrap();
            if slots.contains_key(&candidate) {
                continue;
            }
            let slot = Arc::new(Slot {
                sent_at: Instant::now(),
                outcome: Mutex::new(None),
                cv: Condvar::new(),
            });
            slots.insert(candidate, slot.clone());
            return (candidate, slot);
        }
    }

    /// A `PING` with the `ACK` flag arrived for `nonce`. Unknown nonces
    /// (stale timeout, or a nonce from some other session entirely) are
    /// silently dropped, per spec.
    pub(crate) fn complete(&self, nonce: u32) {
        let slot = self.slots.lock().unwrap().remove(&nonce);
        if let Some(slot) = slot {
            let rtt = slot.sent_at.elapsed();
            *slot.outcome.lock().unwrap() = Some(Outcome::Rtt(rtt));
            slot.cv.notify_all();
        }
    }

    fn drop_nonce(&self, nonce: u32) {
        self.slots.lock().unwrap().remove(&nonce);
    }

    /// The session died with every ping still in flight unanswered: wake
    /// every waiter with `ErrSessionShutdown`.
    pub(crate) fn fail_all(&self) {
        let slots = std::mem::take(&mut *self.slots.lock().unwrap());
        for slot in slots.values() {
            *slot.outcome.lock().unwrap() = Some(Outcome::Dead);
            slot.cv.notify_all();
        }
    }
}

/// Allocates a nonce, submits a `PING` with `SYN` via `submit`, and blocks
/// for the peer's `ACK` (or `timeout`). `submit` is generic so this
/// function has no dependency on `SessionShared` itself.
pub(crate) fn ping_and_wait(
    book: &PingBook,
    timeout: Duration,
    submit: impl FnOnce(u32),
) -> Result<Duration> {
    let (nonce, slot) = book.register();
    submit(nonce);

    let deadline = Instant::now() + timeout;
    let mut guard = slot.outcome.lock().unwrap();
    loop {
        if let Some(outcome) = guard.take() {
            return match outcome {
                Outcome::Rtt(d) => Ok(d),
                Outcome::Dead => Err(Error::SessionShutdown),
            };
        }
        let now = Instant::now();
        if now >= deadline {
            book.drop_nonce(nonce);
            return Err(Error::Timeout);
        }
        let (g, timed_out) = slot.cv.wait_timeout(guard, deadline - now).unwrap();
        guard = g;
        if timed_out.timed_out() && guard.is_none() {
            book.drop_nonce(nonce);
            return Err(Error::Timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_nonce_completion_is_a_no_op() {
        let book = PingBook::default();
        book.complete(12345);
    }

    #[test]
    fn resolved_ping_returns_rtt() {
        let book = Arc::new(PingBook::default());
        let book2 = book.clone();
        let handle = std::thread::spawn(move || {
            ping_and_wait(&book2, Duration::from_secs(5), |nonce| {
                let book3 = book2.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    book3.complete(nonce);
                });
            })
        });
        let rtt = handle.join().unwrap().unwrap();
        assert!(rtt >= Duration::from_millis(5));
    }

    #[test]
    fn unanswered_ping_times_out() {
        let book = PingBook::default();
        let err = ping_and_wait(&book, Duration::from_millis(5), |_| {});
        assert!(matches!(err, Err(Error::Timeout)));
    }
}
