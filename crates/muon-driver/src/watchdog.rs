//! Firmware liveness watchdog.
//!
//! A reference counter paired with a one-shot deadline. Every in-flight
//! request that expects a response contributes one unit; while the count is
//! non-zero a deadline is armed `timeout` into the future and pushed forward
//! on every inc/dec. If the deadline passes, the registered callback runs on
//! the watchdog's own worker thread, which is allowed to take the device
//! mutex (the timer state lock is released first).

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct WatchdogState {
    refcount: u32,
    deadline: Option<Instant>,
    callback: Option<Callback>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<WatchdogState>,
    cond: Condvar,
    timeout: Duration,
}

/// Reference-counted firmware silence timer.
pub struct Watchdog {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("timeout", &self.shared.timeout)
            .finish()
    }
}

impl Watchdog {
    /// Create a watchdog with the given silence threshold and start its
    /// worker thread. No callback is armed yet; see [`Self::set_callback`].
    pub fn new(timeout: Duration) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(WatchdogState::default()),
            cond: Condvar::new(),
            timeout,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("muon-watchdog".into())
            .spawn(move || run_worker(&worker_shared))
            .ok();
        if worker.is_none() {
            tracing::error!("Wdog: failed to spawn worker thread; timeouts disabled");
        }

        Self { shared, worker }
    }

    /// Register the expiry callback. Replaces any previous one.
    pub fn set_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.lock().callback = Some(Arc::new(callback));
    }

    /// The configured silence threshold.
    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    /// Account one more pending reply and extend the deadline.
    pub fn inc(&self) {
        let mut state = self.lock();
        state.refcount += 1;
        state.deadline = Some(Instant::now() + self.shared.timeout);
        tracing::debug!("Wdog: inc, refcount={}", state.refcount);
        self.shared.cond.notify_all();
    }

    /// Account one reply received. Cancels the deadline at zero, otherwise
    /// extends it.
    pub fn dec(&self) {
        let mut state = self.lock();
        state.refcount = state.refcount.saturating_sub(1);
        if state.refcount == 0 {
            tracing::debug!("Wdog: cancel, no pending replies");
            state.deadline = None;
        } else {
            state.deadline = Some(Instant::now() + self.shared.timeout);
        }
        self.shared.cond.notify_all();
    }

    /// Drop all accounting and cancel the deadline. Used around a firmware
    /// reset, which re-establishes accounting via replayed requests.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.refcount = 0;
        state.deadline = None;
        self.shared.cond.notify_all();
    }

    /// Current reference count. Exposed for tests and diagnostics.
    pub fn refcount(&self) -> u32 {
        self.lock().refcount
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WatchdogState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.lock().shutdown = true;
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(shared: &Shared) {
    let mut state = shared
        .state
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    loop {
        if state.shutdown {
            return;
        }

        match state.deadline {
            None => {
                state = shared
                    .cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(deadline) => {
                let now = Instant::now();
                if now < deadline {
                    let (guard, _timed_out) = shared
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                    continue;
                }

                // Expired: disarm, then run the callback without the state
                // lock so it can take the device mutex.
                state.deadline = None;
                let refcount = state.refcount;
                let callback = state.callback.clone();
                drop(state);

                tracing::warn!("Wdog: firmware silence timeout, refcount={refcount}");
                if let Some(callback) = callback {
                    callback();
                }

                state = shared
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}
