//! Inference cancellation RPC.
//!
//! Constructed only from the cancel path of an inference handle. The target
//! inference is kept alive for the duration through the `Arc` held here; the
//! completion carries whether the firmware acknowledged the abort.

use crate::completion::Completion;
use crate::error::{MuonError, Result};
use crate::inference::Inference;
use muon_proto::{CancelInferenceRsp, FirmwareStatus};
use std::sync::Arc;

/// Pending cancellation control block.
pub(crate) struct CancelRequest {
    target: Arc<Inference>,
    completion: Completion<Result<bool>>,
}

impl CancelRequest {
    pub fn new(target: Arc<Inference>) -> Self {
        Self {
            target,
            completion: Completion::default(),
        }
    }

    /// Apply the firmware's reply: `Ok` status means the abort took effect.
    pub fn apply_rsp(&self, rsp: &CancelInferenceRsp) {
        let cancelled = FirmwareStatus::from_wire(rsp.status) == Some(FirmwareStatus::Ok);
        self.completion.complete(Ok(cancelled));
    }

    /// Firmware died before replying.
    pub fn fail(&self) {
        self.completion
            .complete(Err(MuonError::faulted("firmware died during cancel")));
    }

    /// Resolve from the target's state instead of a reply. Used after a
    /// firmware reset, which settles the target's fate without a
    /// `CANCEL_INFERENCE_RSP` ever arriving.
    pub fn complete_from_target(&self) {
        self.completion.complete(Ok(self.target.abort_outcome()));
    }

    pub fn completion(&self) -> &Completion<Result<bool>> {
        &self.completion
    }
}
