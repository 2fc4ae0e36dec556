//! One-shot completion signal for short-lived sub-requests.
//!
//! A `Completion` is completed exactly once; later completers lose. Waiters
//! must not hold the device mutex while blocking here (the dispatch worker
//! needs it to deliver the completion), which is what the device's
//! `block_on` helper enforces.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

struct Slot<T> {
    done: bool,
    value: Option<T>,
}

/// One-shot result slot with a blocking wait.
pub(crate) struct Completion<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot {
                done: false,
                value: None,
            }),
            cond: Condvar::new(),
        }
    }
}

impl<T> Completion<T> {
    /// Complete with `value`. Returns `false` if already completed, in which
    /// case `value` is dropped; first completer wins.
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.lock();
        if slot.done {
            return false;
        }
        slot.done = true;
        slot.value = Some(value);
        self.cond.notify_all();
        true
    }

    /// Whether a completer has already run.
    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Block up to `timeout` for the value. `None` means the deadline passed
    /// without a completion.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        while !slot.done {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
        slot.value.take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_completer_wins() {
        let comp = Completion::default();
        assert!(comp.complete(1));
        assert!(!comp.complete(2));
        assert_eq!(comp.wait_timeout(Duration::from_millis(1)), Some(1));
    }

    #[test]
    fn wait_times_out_without_completion() {
        let comp: Completion<u32> = Completion::default();
        assert_eq!(comp.wait_timeout(Duration::from_millis(10)), None);
        assert!(!comp.is_done());
    }

    #[test]
    fn cross_thread_completion_wakes_waiter() {
        let comp = Arc::new(Completion::default());
        let completer = Arc::clone(&comp);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            completer.complete("done");
        });
        assert_eq!(comp.wait_timeout(Duration::from_secs(2)), Some("done"));
        handle.join().unwrap();
    }
}
