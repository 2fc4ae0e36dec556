//! One in-flight inference execution.
//!
//! An inference is created with a network, IFM/OFM buffer lists and PMU
//! configuration, registered under a correlation id and sent. The caller gets
//! a handle immediately and observes completion through `wait`/`poll`. The
//! status moves monotonically from `Running` to exactly one terminal state;
//! `done` is a separate latch that waiters must observe before trusting the
//! status.

use crate::buffer::Buffer;
use crate::error::{MuonError, Result};
use crate::mailbox::Mailbox;
use crate::network::Network;
use muon_proto::{FirmwareStatus, InferenceRsp, PMU_EVENTS};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Host-visible inference status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceStatus {
    /// Completed successfully; OFM windows and PMU results are valid.
    Ok,
    /// Failed, was never enqueued, or died with the firmware.
    Error,
    /// Accepted by the firmware and executing.
    Running,
    /// Refused by the firmware before execution.
    Rejected,
    /// Stopped before completion.
    Aborted,
    /// Cancellation requested, acknowledgement pending.
    Aborting,
}

impl InferenceStatus {
    /// Whether this is a terminal state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::Error | Self::Rejected | Self::Aborted)
    }
}

/// PMU configuration sent with an inference request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PmuConfig {
    /// Event ids for the four PMU counters; zero disables a counter.
    pub events: [u8; PMU_EVENTS],
    /// Whether to run the cycle counter.
    pub cycle_counter: bool,
}

/// Outcome of [`Inference::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// `done` was observed; the status is terminal.
    Ready,
    /// The timeout elapsed first. The inference keeps running; the caller
    /// may wait again or cancel.
    TimedOut,
}

#[derive(Debug)]
struct InferenceState {
    status: InferenceStatus,
    done: bool,
    /// A request is in flight and the watchdog holds a unit for it.
    pending: bool,
    pmu_event_config: [u8; PMU_EVENTS],
    pmu_event_count: [u32; PMU_EVENTS],
    cycle_count: u64,
}

/// An inference execution tracked by the device.
#[derive(Debug)]
pub struct Inference {
    net: Arc<Network>,
    ifm: Vec<Arc<Buffer>>,
    ofm: Vec<Arc<Buffer>>,
    pmu: PmuConfig,
    state: Mutex<InferenceState>,
    cond: Condvar,
}

impl Inference {
    pub(crate) fn new(
        net: Arc<Network>,
        ifm: Vec<Arc<Buffer>>,
        ofm: Vec<Arc<Buffer>>,
        pmu: PmuConfig,
    ) -> Self {
        Self {
            net,
            ifm,
            ofm,
            pmu,
            // Error until the request is successfully enqueued.
            state: Mutex::new(InferenceState {
                status: InferenceStatus::Error,
                done: false,
                pending: false,
                pmu_event_config: pmu.events,
                pmu_event_count: [0; PMU_EVENTS],
                cycle_count: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Current status. `Running`/`Aborting` readings are transient; consult
    /// [`Self::poll`] for the latch.
    pub fn status(&self) -> InferenceStatus {
        self.lock().status
    }

    /// Whether the inference has reached a terminal state. This is the
    /// poll-readable condition of the handle.
    pub fn poll(&self) -> bool {
        self.lock().done
    }

    /// Block until `done` or the timeout elapses. `None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let mut state = self.lock();
        match timeout {
            None => {
                while !state.done {
                    state = self
                        .cond
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                WaitOutcome::Ready
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !state.done {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                }
                WaitOutcome::Ready
            }
        }
    }

    /// PMU event counts, valid once the inference completed successfully.
    pub fn pmu_counters(&self) -> Option<[u32; PMU_EVENTS]> {
        let state = self.lock();
        (state.done && state.status == InferenceStatus::Ok).then_some(state.pmu_event_count)
    }

    /// Cycle counter value, valid once the inference completed successfully.
    pub fn cycle_counter(&self) -> Option<u64> {
        let state = self.lock();
        (state.done && state.status == InferenceStatus::Ok).then_some(state.cycle_count)
    }

    /// PMU event ids as echoed by the firmware.
    pub fn pmu_event_config(&self) -> [u8; PMU_EVENTS] {
        self.lock().pmu_event_config
    }

    /// Network this inference runs.
    pub fn network(&self) -> &Arc<Network> {
        &self.net
    }

    /// Enqueue the request under `id`. On success the status advances to
    /// `Running`.
    pub(crate) fn send(&self, id: u32, mbox: &mut Mailbox) -> Result<()> {
        mbox.inference_request(id, &self.ifm, &self.ofm, self.net.wire_ref(), self.pmu)?;
        let mut state = self.lock();
        state.status = InferenceStatus::Running;
        state.pending = true;
        Ok(())
    }

    /// Apply an `INFERENCE_RSP`. Called with the device mutex held.
    pub(crate) fn complete(&self, rsp: &InferenceRsp) {
        let mut state = self.lock();
        if state.done {
            // Lost the race against cancellation or failure; first terminal
            // state wins.
            return;
        }

        state.pending = false;

        let next = if state.status == InferenceStatus::Aborting {
            // The firmware acknowledged or outran a cancellation; either way
            // the output is not to be trusted.
            InferenceStatus::Aborted
        } else {
            match FirmwareStatus::from_wire(rsp.status) {
                Some(FirmwareStatus::Ok) => self.apply_success(&mut state, rsp),
                Some(FirmwareStatus::Rejected) => InferenceStatus::Rejected,
                Some(FirmwareStatus::Aborted | FirmwareStatus::Aborting) => {
                    InferenceStatus::Aborted
                }
                _ => InferenceStatus::Error,
            }
        };
        state.status = next;
        state.done = true;
        tracing::debug!("Inference done. status={:?}", state.status);
        self.cond.notify_all();
    }

    fn apply_success(&self, state: &mut InferenceState, rsp: &InferenceRsp) -> InferenceStatus {
        let count = rsp.ofm_count as usize;
        if count > self.ofm.len() {
            tracing::warn!(
                "Inference response reports {count} OFMs, host attached {}",
                self.ofm.len()
            );
            return InferenceStatus::Error;
        }

        // Append the produced bytes to each OFM window.
        for (buf, &produced) in self.ofm.iter().zip(&rsp.ofm_size[..count]) {
            if let Err(e) = buf.extend(produced) {
                tracing::warn!("OFM window update failed: {e}");
                return InferenceStatus::Error;
            }
        }

        state.pmu_event_config = rsp.pmu_event_config;
        state.pmu_event_count = rsp.pmu_event_count;
        state.cycle_count = rsp.pmu_cycle_counter_count;
        InferenceStatus::Ok
    }

    /// Firmware declared dead. Terminal state depends on whether a
    /// cancellation was already in progress.
    pub(crate) fn mark_failed(&self) {
        let mut state = self.lock();
        if state.done {
            return;
        }
        state.pending = false;
        state.status = if state.status == InferenceStatus::Aborting {
            InferenceStatus::Aborted
        } else {
            InferenceStatus::Error
        };
        state.done = true;
        self.cond.notify_all();
    }

    /// Replay after a firmware reset: re-enqueue the same request under the
    /// same id.
    ///
    /// # Errors
    ///
    /// An inference that was being cancelled is not replayed; the caller
    /// fails it instead.
    pub(crate) fn resend(&self, id: u32, mbox: &mut Mailbox) -> Result<()> {
        {
            let mut state = self.lock();
            if state.done {
                return Ok(());
            }
            if state.status == InferenceStatus::Aborting {
                return Err(MuonError::faulted("inference aborting across reset"));
            }
            state.pending = false;
        }
        self.send(id, mbox)
    }

    /// Flag the start of a cancellation. Returns `false` when the inference
    /// already reached a terminal state.
    pub(crate) fn begin_abort(&self) -> bool {
        let mut state = self.lock();
        if state.done {
            return false;
        }
        state.status = InferenceStatus::Aborting;
        true
    }

    /// Whether a finished inference counts as successfully cancelled: done
    /// without producing a successful result.
    pub(crate) fn abort_outcome(&self) -> bool {
        let state = self.lock();
        state.done && state.status != InferenceStatus::Ok
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InferenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
