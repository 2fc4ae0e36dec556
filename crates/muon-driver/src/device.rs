//! Top-level device: owns the mailbox engine, the watchdog and the firmware
//! reset line, and serializes all state behind one mutex.
//!
//! Control flow: an operation takes the device mutex, registers a pending
//! message, writes it to the outbound queue and releases the mutex before
//! blocking on the reply. Doorbell notifications drain the inbound queue on
//! a worker that takes the same mutex; each frame is correlated by id and
//! applied to its waiter.

use crate::buffer::{Allocator, Buffer};
use crate::cancel::CancelRequest;
use crate::capabilities::{CapabilitiesRequest, DeviceCapabilities};
use crate::completion::Completion;
use crate::error::{MuonError, Result};
use crate::inference::{Inference, InferenceStatus, PmuConfig, WaitOutcome};
use crate::mailbox::{Doorbell, Mailbox, PendingMsg};
use crate::network::{Network, NetworkSource};
use crate::network_info::{NetworkInfo, NetworkInfoRequest};
use crate::queue::RingQueue;
use crate::watchdog::Watchdog;
use muon_proto::{
    CancelInferenceRsp, CapabilitiesRsp, ErrMsg, FrameHeader, InferenceRsp, MsgType,
    NetworkInfoRsp, NetworkRef, VersionRsp, MAX_FEATURE_MAPS, MAX_PAYLOAD, PMU_EVENTS,
    VERSION_MAJOR, VERSION_MINOR,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Firmware reset line, provided by the platform integration.
pub trait Reset: Send + Sync {
    /// Hold the firmware core in reset.
    ///
    /// # Errors
    ///
    /// Propagates the reset controller's failure.
    fn assert_reset(&self) -> Result<()>;

    /// Release the firmware core from reset.
    ///
    /// # Errors
    ///
    /// Propagates the reset controller's failure.
    fn deassert(&self) -> Result<()>;
}

/// Timeouts the device instance is constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Firmware silence threshold.
    pub watchdog_timeout: Duration,
    /// Caller-visible capabilities RPC bound.
    pub capabilities_timeout: Duration,
    /// Caller-visible cancel RPC bound.
    pub cancel_timeout: Duration,
    /// Caller-visible network-info RPC bound.
    pub network_info_timeout: Duration,
    /// Wait for a valid queue header after reset deassert.
    pub firmware_boot_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: Duration::from_millis(3000),
            capabilities_timeout: Duration::from_millis(2000),
            cancel_timeout: Duration::from_millis(2000),
            network_info_timeout: Duration::from_millis(3000),
            firmware_boot_timeout: Duration::from_millis(1000),
        }
    }
}

/// How a network is created.
pub enum NetworkCreate {
    /// Host buffer whose window holds a TFLite model.
    Buffer(Arc<Buffer>),
    /// Firmware-resident model index.
    FirmwareIndex(u32),
}

/// Arguments for creating an inference.
pub struct InferenceArgs {
    /// Network to execute.
    pub network: Arc<Network>,
    /// Input feature map buffers, at most 16.
    pub ifm: Vec<Arc<Buffer>>,
    /// Output feature map buffers, at most 16.
    pub ofm: Vec<Arc<Buffer>>,
    /// PMU configuration.
    pub pmu: PmuConfig,
}

pub(crate) struct DeviceState {
    pub mailbox: Mailbox,
}

pub(crate) struct DeviceInner {
    config: DeviceConfig,
    state: Mutex<DeviceState>,
    watchdog: Arc<Watchdog>,
    reset: Box<dyn Reset>,
    allocator: Arc<dyn Allocator>,
}

/// One Muon NPU instance.
///
/// Cheap to clone; all clones share the same underlying device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Bring up a device over an established queue pair.
    ///
    /// `tx` is the host-to-firmware queue, `rx` the reverse direction. The
    /// platform shim wires the firmware-to-host doorbell to
    /// [`Self::process_incoming`].
    pub fn new(
        tx: RingQueue,
        rx: RingQueue,
        doorbell: Arc<dyn Doorbell>,
        reset: Box<dyn Reset>,
        allocator: Arc<dyn Allocator>,
        config: DeviceConfig,
    ) -> Self {
        let watchdog = Arc::new(Watchdog::new(config.watchdog_timeout));
        let mailbox = Mailbox::new(tx, rx, doorbell, Arc::clone(&watchdog));

        let inner = Arc::new(DeviceInner {
            config,
            state: Mutex::new(DeviceState { mailbox }),
            watchdog,
            reset,
            allocator,
        });

        let weak: Weak<DeviceInner> = Arc::downgrade(&inner);
        inner.watchdog.set_callback(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_watchdog_timeout();
            }
        });

        tracing::info!("Muon device created");
        Self { inner }
    }

    /// Timeouts this instance runs with.
    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    /// Send a liveness probe to the firmware.
    ///
    /// # Errors
    ///
    /// Returns `NoSpace` when the outbound queue is full.
    pub fn ping(&self) -> Result<()> {
        self.inner.lock_state().mailbox.ping()
    }

    /// Ask the firmware for its protocol version; the reply is logged when
    /// it arrives.
    ///
    /// # Errors
    ///
    /// Returns `NoSpace` when the outbound queue is full.
    pub fn version_request(&self) -> Result<()> {
        self.inner.lock_state().mailbox.version_request()
    }

    /// Query hardware capabilities. Blocks up to the configured bound.
    ///
    /// # Errors
    ///
    /// `Timeout` when no reply arrives in time, `Faulted` when the firmware
    /// died while the query was outstanding.
    pub fn capabilities(&self) -> Result<DeviceCapabilities> {
        let inner = &self.inner;
        let mut state = inner.lock_state();

        let request = Arc::new(CapabilitiesRequest::new());
        let id = state
            .mailbox
            .registry
            .register(PendingMsg::Capabilities(Arc::clone(&request)))?;

        if let Err(e) = state.mailbox.capabilities_request(id) {
            state.mailbox.registry.deregister(id);
            return Err(e);
        }
        tracing::debug!("Capabilities request. id={id}");

        let (mut state, outcome) = inner.block_on(
            state,
            request.completion(),
            inner.config.capabilities_timeout,
        );
        state.mailbox.registry.deregister(id);
        drop(state);

        outcome.unwrap_or_else(|| Err(MuonError::timeout(inner.config.capabilities_timeout)))
    }

    /// Allocate a DMA buffer of `capacity` bytes. The returned handle is the
    /// strong root: the region is freed when the last clone drops.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for zero capacity, `ResourceExhausted` on allocator
    /// refusal.
    pub fn buffer_create(&self, capacity: u32) -> Result<Arc<Buffer>> {
        Buffer::new(self.inner.allocator.as_ref(), capacity).map(Arc::new)
    }

    /// Bind a network. Buffer-backed networks parse the model on the host;
    /// index-backed ones ask the firmware for the dimensions and block until
    /// it answers.
    ///
    /// # Errors
    ///
    /// Model parse failures for buffer-backed networks; `Timeout`/`Faulted`
    /// from the firmware query for index-backed ones.
    pub fn network_create(&self, create: NetworkCreate) -> Result<Arc<Network>> {
        match create {
            NetworkCreate::Buffer(buffer) => Network::from_buffer(buffer).map(Arc::new),
            NetworkCreate::FirmwareIndex(index) => {
                let info = self.inner.network_info_rpc(NetworkRef::Index(index))?;
                Ok(Arc::new(Network::from_firmware_info(index, &info)))
            }
        }
    }

    /// Describe a network. Index-backed networks are re-queried from the
    /// firmware; buffer-backed ones answer from the dimensions cached at
    /// creation.
    ///
    /// # Errors
    ///
    /// `Timeout`/`Faulted` from the firmware query for index-backed
    /// networks.
    pub fn network_info(&self, network: &Network) -> Result<NetworkInfo> {
        match network.source() {
            NetworkSource::Index(_) => self.inner.network_info_rpc(network.wire_ref()),
            NetworkSource::Buffer(_) => Ok(NetworkInfo {
                description: String::new(),
                ifm_sizes: network.ifm_dims().to_vec(),
                ofm_sizes: network.ofm_dims().to_vec(),
            }),
        }
    }

    /// Create an inference and send its request. Returns a handle
    /// immediately; completion is observed via `wait`/`poll` on the handle.
    ///
    /// If the request cannot be enqueued the handle is still returned, with
    /// the inference already in its terminal `Error` state.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for more than 16 IFMs or OFMs,
    /// `ResourceExhausted` when no correlation id is free.
    pub fn inference_create(&self, args: InferenceArgs) -> Result<InferenceHandle> {
        if args.ifm.len() > MAX_FEATURE_MAPS {
            return Err(MuonError::invalid_argument(format!(
                "ifm count {} above {MAX_FEATURE_MAPS}",
                args.ifm.len()
            )));
        }
        if args.ofm.len() > MAX_FEATURE_MAPS {
            return Err(MuonError::invalid_argument(format!(
                "ofm count {} above {MAX_FEATURE_MAPS}",
                args.ofm.len()
            )));
        }

        let mut state = self.inner.lock_state();

        let inference = Arc::new(Inference::new(args.network, args.ifm, args.ofm, args.pmu));
        let id = state
            .mailbox
            .registry
            .register(PendingMsg::Inference(Arc::clone(&inference)))?;

        if let Err(e) = inference.send(id, &mut state.mailbox) {
            // The handle still exists; the caller observes the terminal
            // Error state through it.
            tracing::warn!("Inference send failed. id={id}: {e}");
            inference.mark_failed();
        } else {
            tracing::debug!("Inference create. id={id}");
        }
        drop(state);

        Ok(InferenceHandle {
            inner: Arc::clone(&self.inner),
            inference,
            id,
        })
    }

    /// Drain the inbound queue. Called by the platform shim on every
    /// firmware-to-host doorbell notification.
    pub fn process_incoming(&self) {
        let mut state = self.inner.lock_state();
        loop {
            let mut scratch = [0u8; MAX_PAYLOAD];
            match state.mailbox.read_msg(&mut scratch) {
                Ok(None) => break,
                Ok(Some((header, length))) => {
                    if let Err(e) =
                        DeviceInner::dispatch(&mut state, header, &scratch[..length])
                    {
                        tracing::warn!("Dropping inbound queue: {e}");
                        state.mailbox.reset_rx();
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Dropping inbound queue: {e}");
                    state.mailbox.reset_rx();
                    break;
                }
            }
        }
    }

    /// Counters useful for diagnosing a wedged device.
    pub fn diagnostics(&self) -> DeviceDiagnostics {
        let state = self.inner.lock_state();
        DeviceDiagnostics {
            outstanding_messages: state.mailbox.registry.len(),
            watchdog_refcount: self.inner.watchdog.refcount(),
            ping_count: state.mailbox.ping_count,
        }
    }
}

/// Snapshot of the device's in-flight bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDiagnostics {
    /// Messages registered and awaiting a response.
    pub outstanding_messages: usize,
    /// Watchdog units currently held.
    pub watchdog_refcount: u32,
    /// Pings sent minus pongs received.
    pub ping_count: i32,
}

impl DeviceInner {
    fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the device mutex, block on `completion`, then reacquire.
    /// Every sub-request suspends through here so the dispatch worker can
    /// deliver the completion.
    fn block_on<'a, T>(
        &'a self,
        guard: MutexGuard<'a, DeviceState>,
        completion: &Completion<T>,
        timeout: Duration,
    ) -> (MutexGuard<'a, DeviceState>, Option<T>) {
        drop(guard);
        let value = completion.wait_timeout(timeout);
        (self.lock_state(), value)
    }

    fn network_info_rpc(&self, network: NetworkRef) -> Result<NetworkInfo> {
        let mut state = self.lock_state();

        let request = Arc::new(NetworkInfoRequest::new(network));
        let id = state
            .mailbox
            .registry
            .register(PendingMsg::NetworkInfo(Arc::clone(&request)))?;

        if let Err(e) = state.mailbox.network_info_request(id, network) {
            state.mailbox.registry.deregister(id);
            return Err(e);
        }
        tracing::debug!("Network info request. id={id}");

        let (mut state, outcome) =
            self.block_on(state, request.completion(), self.config.network_info_timeout);
        state.mailbox.registry.deregister(id);
        drop(state);

        outcome.unwrap_or_else(|| Err(MuonError::timeout(self.config.network_info_timeout)))
    }

    fn cancel_inference(&self, inference: &Arc<Inference>, inference_id: u32) -> Result<bool> {
        let mut state = self.lock_state();

        if !inference.begin_abort() {
            // Already terminal: completing before the cancel counts as a
            // successful cancellation.
            return Ok(true);
        }

        let request = Arc::new(CancelRequest::new(Arc::clone(inference)));
        let id = state
            .mailbox
            .registry
            .register(PendingMsg::Cancel(Arc::clone(&request)))?;

        if let Err(e) = state.mailbox.cancel_inference(id, inference_id) {
            state.mailbox.registry.deregister(id);
            return Err(e);
        }
        tracing::debug!("Cancel inference. id={id}, target={inference_id}");

        let (mut state, outcome) =
            self.block_on(state, request.completion(), self.config.cancel_timeout);
        state.mailbox.registry.deregister(id);
        drop(state);

        outcome.unwrap_or_else(|| Err(MuonError::timeout(self.config.cancel_timeout)))
    }

    /// Route one validated frame. An error here makes the caller reset the
    /// inbound queue and stop draining.
    fn dispatch(state: &mut DeviceState, header: FrameHeader, payload: &[u8]) -> Result<()> {
        let Some(msg_type) = MsgType::from_wire(header.msg_type) else {
            return Err(MuonError::invalid_frame(format!(
                "unsupported message type {}",
                header.msg_type
            )));
        };

        match msg_type {
            MsgType::Ping => {
                tracing::debug!("Msg: Ping");
                if let Err(e) = state.mailbox.pong() {
                    tracing::warn!("Failed to answer ping: {e}");
                }
            }
            MsgType::Pong => {
                tracing::debug!("Msg: Pong");
            }
            MsgType::Err => {
                let err = ErrMsg::decode(payload)
                    .map_err(|e| MuonError::invalid_frame(e.to_string()))?;
                tracing::error!(
                    "Firmware error. type={}, msg={}",
                    err.err_type,
                    err.message()
                );
                return Err(MuonError::faulted(err.message()));
            }
            MsgType::VersionRsp => {
                let version = VersionRsp::decode(payload)
                    .map_err(|e| MuonError::invalid_frame(e.to_string()))?;
                if version.major != VERSION_MAJOR || version.minor != VERSION_MINOR {
                    tracing::warn!(
                        "Firmware protocol version mismatch: firmware {}.{}.{}, driver {VERSION_MAJOR}.{VERSION_MINOR}",
                        version.major,
                        version.minor,
                        version.patch
                    );
                } else {
                    tracing::info!(
                        "Firmware protocol version {}.{}.{}",
                        version.major,
                        version.minor,
                        version.patch
                    );
                }
            }
            MsgType::CapabilitiesRsp => {
                let rsp = CapabilitiesRsp::decode(payload)
                    .map_err(|e| MuonError::invalid_frame(e.to_string()))?;
                match Self::find(state, rsp.user_arg) {
                    Some(PendingMsg::Capabilities(req)) => req.apply_rsp(&rsp),
                    Some(_) => tracing::warn!("Capabilities rsp for non-capabilities msg"),
                    None => {}
                }
            }
            MsgType::NetworkInfoRsp => {
                let rsp = NetworkInfoRsp::decode(payload)
                    .map_err(|e| MuonError::invalid_frame(e.to_string()))?;
                match Self::find(state, rsp.user_arg) {
                    Some(PendingMsg::NetworkInfo(req)) => req.apply_rsp(&rsp),
                    Some(_) => tracing::warn!("Network info rsp for non-network-info msg"),
                    None => {}
                }
            }
            MsgType::InferenceRsp => {
                let rsp = InferenceRsp::decode(payload)
                    .map_err(|e| MuonError::invalid_frame(e.to_string()))?;
                match Self::find(state, rsp.user_arg) {
                    Some(PendingMsg::Inference(inference)) => inference.complete(&rsp),
                    Some(_) => tracing::warn!("Inference rsp for non-inference msg"),
                    None => {}
                }
            }
            MsgType::CancelInferenceRsp => {
                let rsp = CancelInferenceRsp::decode(payload)
                    .map_err(|e| MuonError::invalid_frame(e.to_string()))?;
                match Self::find(state, rsp.user_arg) {
                    Some(PendingMsg::Cancel(req)) => req.apply_rsp(&rsp),
                    Some(_) => tracing::warn!("Cancel rsp for non-cancel msg"),
                    None => {}
                }
            }
            // Request-direction traffic should never reach the host.
            MsgType::VersionReq
            | MsgType::CapabilitiesReq
            | MsgType::InferenceReq
            | MsgType::NetworkInfoReq
            | MsgType::CancelInferenceReq => {
                tracing::warn!("Msg: Unexpected request type {msg_type:?}");
            }
        }

        Ok(())
    }

    /// Correlate a response to its pending entry. A miss is logged and
    /// swallowed: the owner was closed before the reply arrived.
    fn find(state: &DeviceState, user_arg: u64) -> Option<PendingMsg> {
        let id = match u32::try_from(user_arg) {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!("Response user_arg {user_arg:#x} out of id range");
                return None;
            }
        };
        let entry = state.mailbox.registry.find(id).cloned();
        if entry.is_none() {
            tracing::warn!("Response for unknown msg id={id}");
        }
        entry
    }

    /// Watchdog expiry policy: probe once with a ping, then declare the
    /// firmware dead and run the reset-and-replay sequence.
    fn on_watchdog_timeout(&self) {
        let mut state = self.lock_state();

        if state.mailbox.ping_count < 1 {
            tracing::warn!("Watchdog timeout, probing firmware with ping");
            if let Err(e) = state.mailbox.ping() {
                tracing::warn!("Probe ping failed: {e}");
            }
            return;
        }

        tracing::error!("Firmware unresponsive, restarting");
        if let Err(e) = self.firmware_reset_locked(&mut state) {
            tracing::error!("Firmware restart failed: {e}");
            state.mailbox.fail_all();
            self.watchdog.reset();
        }
    }

    /// The reset fence: every outstanding message is either replayed after a
    /// successful restart or failed by the caller of this function.
    fn firmware_reset_locked(&self, state: &mut DeviceState) -> Result<()> {
        self.reset.assert_reset()?;
        state.mailbox.prepare_reboot();
        self.reset.deassert()?;

        // Bounded spin: the boot window is short and there is no blocking
        // primitive on a bare shared-memory header.
        let deadline = Instant::now() + self.config.firmware_boot_timeout;
        while !state.mailbox.firmware_booted() {
            if Instant::now() >= deadline {
                return Err(MuonError::timeout(self.config.firmware_boot_timeout));
            }
            std::thread::yield_now();
        }

        state.mailbox.ping_count = 0;
        self.watchdog.reset();
        state.mailbox.ping()?;
        state.mailbox.resend_all();

        tracing::info!("Firmware restarted, outstanding messages replayed");
        Ok(())
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        // Nothing to send a response to anymore.
        self.lock_state().mailbox.fail_all();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.inner.config)
            .finish()
    }
}

/// User-space handle to one inference. Dropping the handle deregisters the
/// inference; a response arriving afterwards misses the registry and is
/// discarded.
pub struct InferenceHandle {
    inner: Arc<DeviceInner>,
    inference: Arc<Inference>,
    id: u32,
}

impl InferenceHandle {
    /// Current status snapshot.
    pub fn status(&self) -> InferenceStatus {
        self.inference.status()
    }

    /// Whether the inference has reached a terminal state (the poll-readable
    /// condition).
    pub fn poll(&self) -> bool {
        self.inference.poll()
    }

    /// Block until completion or timeout; `None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.inference.wait(timeout)
    }

    /// Ask the firmware to abort this inference and block for the outcome.
    /// Returns `true` when the firmware acknowledged the cancellation or the
    /// inference had already completed.
    ///
    /// # Errors
    ///
    /// `Timeout` when the cancel reply never arrives, `Faulted` when the
    /// firmware died during the exchange.
    pub fn cancel(&self) -> Result<bool> {
        self.inner.cancel_inference(&self.inference, self.id)
    }

    /// PMU event counts, valid after a successful completion.
    pub fn pmu_counters(&self) -> Option<[u32; PMU_EVENTS]> {
        self.inference.pmu_counters()
    }

    /// Cycle counter, valid after a successful completion.
    pub fn cycle_counter(&self) -> Option<u64> {
        self.inference.cycle_counter()
    }

    /// PMU event ids echoed by the firmware.
    pub fn pmu_event_config(&self) -> [u8; PMU_EVENTS] {
        self.inference.pmu_event_config()
    }

    /// Correlation id the inference is registered under.
    pub const fn correlation_id(&self) -> u32 {
        self.id
    }

    /// The underlying inference object.
    pub fn inference(&self) -> &Arc<Inference> {
        &self.inference
    }
}

impl Drop for InferenceHandle {
    fn drop(&mut self) {
        let mut state = self.inner.lock_state();
        state.mailbox.registry.deregister(self.id);
        tracing::debug!("Inference release. id={}", self.id);
    }
}

impl std::fmt::Debug for InferenceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceHandle")
            .field("id", &self.id)
            .field("status", &self.inference.status())
            .finish()
    }
}
