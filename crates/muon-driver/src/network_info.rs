//! Model dimension query.
//!
//! Used synchronously while constructing an index-backed network, and by the
//! network-info operation on a handle. Shares the registry and the
//! release-wait-reacquire shape with the other sub-requests.

use crate::completion::Completion;
use crate::error::{MuonError, Result};
use muon_proto::{FirmwareStatus, NetworkInfoRsp, NetworkRef, MAX_FEATURE_MAPS};

/// Firmware's description of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Human-readable model name, bounded at 32 bytes on the wire.
    pub description: String,
    /// Input feature map sizes in bytes.
    pub ifm_sizes: Vec<u32>,
    /// Output feature map sizes in bytes.
    pub ofm_sizes: Vec<u32>,
}

/// Pending model dimension query control block.
pub(crate) struct NetworkInfoRequest {
    network: NetworkRef,
    completion: Completion<Result<NetworkInfo>>,
}

impl NetworkInfoRequest {
    pub fn new(network: NetworkRef) -> Self {
        Self {
            network,
            completion: Completion::default(),
        }
    }

    /// The model reference to send (and resend) with.
    pub fn network(&self) -> NetworkRef {
        self.network
    }

    /// Apply the firmware's reply.
    pub fn apply_rsp(&self, rsp: &NetworkInfoRsp) {
        let outcome = Self::unpack(rsp);
        self.completion.complete(outcome);
    }

    fn unpack(rsp: &NetworkInfoRsp) -> Result<NetworkInfo> {
        if FirmwareStatus::from_wire(rsp.status) != Some(FirmwareStatus::Ok) {
            return Err(MuonError::faulted(format!(
                "network info rejected, status={}",
                rsp.status
            )));
        }

        let ifm_count = rsp.ifm_count as usize;
        let ofm_count = rsp.ofm_count as usize;
        if ifm_count > MAX_FEATURE_MAPS || ofm_count > MAX_FEATURE_MAPS {
            return Err(MuonError::faulted(format!(
                "network info counts out of range: ifm={ifm_count}, ofm={ofm_count}"
            )));
        }

        Ok(NetworkInfo {
            description: rsp.description(),
            ifm_sizes: rsp.ifm_size[..ifm_count].to_vec(),
            ofm_sizes: rsp.ofm_size[..ofm_count].to_vec(),
        })
    }

    /// Firmware died before replying.
    pub fn fail(&self) {
        self.completion
            .complete(Err(MuonError::faulted("firmware died during query")));
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    pub fn completion(&self) -> &Completion<Result<NetworkInfo>> {
        &self.completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsp(ifm_count: u32, ofm_count: u32, status: u32) -> NetworkInfoRsp {
        let mut rsp = NetworkInfoRsp {
            ifm_count,
            ofm_count,
            status,
            ..NetworkInfoRsp::default()
        };
        rsp.desc[..4].copy_from_slice(b"test");
        for i in 0..MAX_FEATURE_MAPS {
            rsp.ifm_size[i] = 100 + i as u32;
            rsp.ofm_size[i] = 200 + i as u32;
        }
        rsp
    }

    #[test]
    fn ok_rsp_unpacks_counts() {
        let req = NetworkInfoRequest::new(NetworkRef::Index(0));
        req.apply_rsp(&rsp(2, 1, FirmwareStatus::Ok as u32));
        let info = req
            .completion()
            .wait_timeout(std::time::Duration::from_millis(1))
            .unwrap()
            .unwrap();
        assert_eq!(info.description, "test");
        assert_eq!(info.ifm_sizes, vec![100, 101]);
        assert_eq!(info.ofm_sizes, vec![200]);
    }

    #[test]
    fn firmware_error_status_fails_request() {
        let req = NetworkInfoRequest::new(NetworkRef::Index(0));
        req.apply_rsp(&rsp(1, 1, FirmwareStatus::Error as u32));
        let outcome = req
            .completion()
            .wait_timeout(std::time::Duration::from_millis(1))
            .unwrap();
        assert!(matches!(outcome, Err(MuonError::Faulted { .. })));
    }

    #[test]
    fn oversized_counts_fail_request() {
        let req = NetworkInfoRequest::new(NetworkRef::Index(0));
        req.apply_rsp(&rsp(17, 1, FirmwareStatus::Ok as u32));
        let outcome = req
            .completion()
            .wait_timeout(std::time::Duration::from_millis(1))
            .unwrap();
        assert!(matches!(outcome, Err(MuonError::Faulted { .. })));
    }
}
