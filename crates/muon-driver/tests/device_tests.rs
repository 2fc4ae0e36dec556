//! End-to-end protocol tests against the fake firmware rig.

mod common;

use common::{load_model_buffer, Rig};
use muon_driver::{
    DeviceConfig, InferenceArgs, InferenceStatus, MuonError, NetworkCreate, PmuConfig,
    WaitOutcome,
};
use muon_models::test_model;
use muon_proto::{
    CancelInferenceReq, CancelInferenceRsp, CapabilitiesReq, CapabilitiesRsp, FirmwareStatus,
    InferenceReq, InferenceRsp, MsgType, NetworkInfoReq, NetworkInfoRsp, NetworkRef, VersionRsp,
};
use std::time::Duration;

fn encode<F: Fn(&mut Vec<u8>)>(f: F) -> Vec<u8> {
    let mut buf = Vec::new();
    f(&mut buf);
    buf
}

#[test]
fn capabilities_round_trip() {
    let rig = Rig::with_defaults();

    std::thread::scope(|scope| {
        let device = rig.device.clone();
        let caller = scope.spawn(move || device.capabilities());

        let payload = rig
            .fw
            .recv_expect(MsgType::CapabilitiesReq, Duration::from_secs(2));
        let req = CapabilitiesReq::decode(&payload).unwrap();

        let rsp = CapabilitiesRsp {
            user_arg: req.user_arg,
            version_status: 1,
            version_minor: 0,
            version_major: 1,
            product_major: 1,
            arch_patch_rev: 0,
            arch_minor_rev: 0,
            arch_major_rev: 1,
            driver_patch_rev: 0,
            driver_minor_rev: 0,
            driver_major_rev: 1,
            macs_per_cc: 8,
            cmd_stream_version: 0,
            custom_dma: 0,
        };
        rig.fw
            .send(MsgType::CapabilitiesRsp, &encode(|b| rsp.encode(b)));
        rig.device.process_incoming();

        let caps = caller.join().unwrap().unwrap();
        assert_eq!(caps.hw_id.version_status, 1);
        assert_eq!(caps.hw_id.version_major, 1);
        assert_eq!(caps.hw_id.version_minor, 0);
        assert_eq!(caps.hw_id.product_major, 1);
        assert_eq!(caps.hw_id.arch_major_rev, 1);
        assert_eq!(caps.hw_cfg.macs_per_cc, 8);
        assert_eq!(caps.hw_cfg.cmd_stream_version, 0);
        assert!(!caps.hw_cfg.custom_dma);
        assert_eq!(caps.driver.major, 1);
    });

    let diag = rig.device.diagnostics();
    assert_eq!(diag.outstanding_messages, 0, "registry entry removed");
    assert_eq!(diag.watchdog_refcount, 0, "watchdog count unchanged");
}

#[test]
fn capabilities_times_out_without_firmware() {
    let rig = Rig::new(DeviceConfig {
        watchdog_timeout: Duration::from_secs(60),
        capabilities_timeout: Duration::from_millis(50),
        ..DeviceConfig::default()
    });

    let err = rig.device.capabilities().unwrap_err();
    assert!(matches!(err, MuonError::Timeout { duration_ms: 50 }));
    assert_eq!(rig.device.diagnostics().outstanding_messages, 0);

    // A response arriving after the caller gave up misses the registry and
    // is swallowed.
    let payload = rig
        .fw
        .recv_expect(MsgType::CapabilitiesReq, Duration::from_secs(2));
    let req = CapabilitiesReq::decode(&payload).unwrap();
    let rsp = CapabilitiesRsp {
        user_arg: req.user_arg,
        ..CapabilitiesRsp::default()
    };
    rig.fw
        .send(MsgType::CapabilitiesRsp, &encode(|b| rsp.encode(b)));
    rig.device.process_incoming();
    assert_eq!(rig.device.diagnostics().outstanding_messages, 0);
}

#[test]
fn successful_inference_on_buffer_backed_network() {
    let rig = Rig::with_defaults();
    let device = &rig.device;

    let model = test_model::single_subgraph(&[1024], &[4096]);
    let model_buffer = load_model_buffer(device, &model);
    let network = device
        .network_create(NetworkCreate::Buffer(model_buffer))
        .unwrap();
    assert_eq!(network.ifm_dims(), &[1024]);
    assert_eq!(network.ofm_dims(), &[4096]);

    let ifm = device.buffer_create(1024).unwrap();
    ifm.set_window(0, 1024).unwrap();
    let ofm = device.buffer_create(4096).unwrap();

    let handle = device
        .inference_create(InferenceArgs {
            network,
            ifm: vec![ifm.clone()],
            ofm: vec![ofm.clone()],
            pmu: PmuConfig::default(),
        })
        .unwrap();
    assert_eq!(handle.status(), InferenceStatus::Running);
    assert!(!handle.poll());
    assert_eq!(device.diagnostics().watchdog_refcount, 1);

    // The wire request carries the window for IFMs and the remaining
    // capacity for OFMs.
    let payload = rig
        .fw
        .recv_expect(MsgType::InferenceReq, Duration::from_secs(2));
    let req = InferenceReq::decode(&payload).unwrap();
    assert_eq!(req.user_arg, u64::from(handle.correlation_id()));
    assert_eq!(req.ifm_count, 1);
    assert_eq!(req.ifm[0].size, 1024);
    assert_eq!(req.ofm_count, 1);
    assert_eq!(req.ofm[0].size, 4096);
    assert!(matches!(req.network, NetworkRef::Buffer(b) if b.size == model.len() as u32));

    let mut rsp = InferenceRsp {
        user_arg: req.user_arg,
        ofm_count: 1,
        status: FirmwareStatus::Ok as u32,
        pmu_cycle_counter_count: 1234,
        ..InferenceRsp::default()
    };
    rsp.ofm_size[0] = 2048;
    rig.fw.send(MsgType::InferenceRsp, &encode(|b| rsp.encode(b)));
    rig.device.process_incoming();

    assert_eq!(handle.wait(Some(Duration::from_secs(1))), WaitOutcome::Ready);
    assert!(handle.poll());
    assert_eq!(handle.status(), InferenceStatus::Ok);
    assert_eq!(ofm.window().offset, 0);
    assert_eq!(ofm.window().size, 2048);
    assert_eq!(handle.cycle_counter(), Some(1234));
    assert_eq!(device.diagnostics().watchdog_refcount, 0);
}

#[test]
fn rejected_inference_leaves_ofm_untouched() {
    let rig = Rig::with_defaults();
    let device = &rig.device;

    let model = test_model::single_subgraph(&[64], &[64]);
    let network = device
        .network_create(NetworkCreate::Buffer(load_model_buffer(device, &model)))
        .unwrap();
    let ofm = device.buffer_create(4096).unwrap();

    let handle = device
        .inference_create(InferenceArgs {
            network,
            ifm: vec![],
            ofm: vec![ofm.clone()],
            pmu: PmuConfig::default(),
        })
        .unwrap();

    let payload = rig
        .fw
        .recv_expect(MsgType::InferenceReq, Duration::from_secs(2));
    let req = InferenceReq::decode(&payload).unwrap();

    let rsp = InferenceRsp {
        user_arg: req.user_arg,
        status: FirmwareStatus::Rejected as u32,
        ..InferenceRsp::default()
    };
    rig.fw.send(MsgType::InferenceRsp, &encode(|b| rsp.encode(b)));
    rig.device.process_incoming();

    assert_eq!(handle.wait(Some(Duration::from_secs(1))), WaitOutcome::Ready);
    assert_eq!(handle.status(), InferenceStatus::Rejected);
    assert_eq!(ofm.window().size, 0);
}

#[test]
fn cancellation_aborts_a_running_inference() {
    let rig = Rig::with_defaults();
    let device = &rig.device;

    let model = test_model::single_subgraph(&[16], &[16]);
    let network = device
        .network_create(NetworkCreate::Buffer(load_model_buffer(device, &model)))
        .unwrap();
    let handle = device
        .inference_create(InferenceArgs {
            network,
            ifm: vec![],
            ofm: vec![],
            pmu: PmuConfig::default(),
        })
        .unwrap();
    let inference_id = handle.correlation_id();

    let _ = rig
        .fw
        .recv_expect(MsgType::InferenceReq, Duration::from_secs(2));

    std::thread::scope(|scope| {
        let canceller = scope.spawn(|| handle.cancel());

        let payload = rig
            .fw
            .recv_expect(MsgType::CancelInferenceReq, Duration::from_secs(2));
        let req = CancelInferenceReq::decode(&payload).unwrap();
        assert_eq!(req.inference_handle, u64::from(inference_id));

        let rsp = CancelInferenceRsp {
            user_arg: req.user_arg,
            status: FirmwareStatus::Ok as u32,
        };
        rig.fw
            .send(MsgType::CancelInferenceRsp, &encode(|b| rsp.encode(b)));
        rig.device.process_incoming();

        assert!(canceller.join().unwrap().unwrap(), "firmware acknowledged");
    });

    assert_eq!(handle.status(), InferenceStatus::Aborting);

    // The aborted inference response follows.
    let rsp = InferenceRsp {
        user_arg: u64::from(inference_id),
        status: FirmwareStatus::Aborted as u32,
        ..InferenceRsp::default()
    };
    rig.fw.send(MsgType::InferenceRsp, &encode(|b| rsp.encode(b)));
    rig.device.process_incoming();

    assert_eq!(handle.wait(Some(Duration::from_secs(1))), WaitOutcome::Ready);
    assert_eq!(handle.status(), InferenceStatus::Aborted);
}

#[test]
fn cancel_of_finished_inference_reports_success_without_rpc() {
    let rig = Rig::with_defaults();
    let device = &rig.device;

    let model = test_model::single_subgraph(&[16], &[16]);
    let network = device
        .network_create(NetworkCreate::Buffer(load_model_buffer(device, &model)))
        .unwrap();
    let handle = device
        .inference_create(InferenceArgs {
            network,
            ifm: vec![],
            ofm: vec![],
            pmu: PmuConfig::default(),
        })
        .unwrap();

    let payload = rig
        .fw
        .recv_expect(MsgType::InferenceReq, Duration::from_secs(2));
    let req = InferenceReq::decode(&payload).unwrap();
    let rsp = InferenceRsp {
        user_arg: req.user_arg,
        status: FirmwareStatus::Ok as u32,
        ..InferenceRsp::default()
    };
    rig.fw.send(MsgType::InferenceRsp, &encode(|b| rsp.encode(b)));
    rig.device.process_incoming();
    assert_eq!(handle.wait(Some(Duration::from_secs(1))), WaitOutcome::Ready);

    // Completed prior to the cancel: success, and no CANCEL_INFERENCE_REQ
    // goes out.
    assert!(handle.cancel().unwrap());
    assert!(rig.fw.try_recv().is_none());
}

#[test]
fn index_backed_network_queries_firmware() {
    let rig = Rig::with_defaults();

    std::thread::scope(|scope| {
        let device = rig.device.clone();
        let creator = scope.spawn(move || device.network_create(NetworkCreate::FirmwareIndex(3)));

        let payload = rig
            .fw
            .recv_expect(MsgType::NetworkInfoReq, Duration::from_secs(2));
        let req = NetworkInfoReq::decode(&payload).unwrap();
        assert!(matches!(req.network, NetworkRef::Index(3)));

        let mut rsp = NetworkInfoRsp {
            user_arg: req.user_arg,
            ifm_count: 1,
            ofm_count: 1,
            status: FirmwareStatus::Ok as u32,
            ..NetworkInfoRsp::default()
        };
        rsp.desc[..8].copy_from_slice(b"keyword8");
        rsp.ifm_size[0] = 49 * 10;
        rsp.ofm_size[0] = 12;
        rig.fw
            .send(MsgType::NetworkInfoRsp, &encode(|b| rsp.encode(b)));
        rig.device.process_incoming();

        let network = creator.join().unwrap().unwrap();
        assert_eq!(network.ifm_dims(), &[490]);
        assert_eq!(network.ofm_dims(), &[12]);
        assert_eq!(network.description(), Some("keyword8"));
    });

    assert_eq!(rig.device.diagnostics().outstanding_messages, 0);
}

#[test]
fn version_mismatch_is_logged_not_fatal() {
    let rig = Rig::with_defaults();
    let device = &rig.device;

    let model = test_model::single_subgraph(&[16], &[16]);
    let network = device
        .network_create(NetworkCreate::Buffer(load_model_buffer(device, &model)))
        .unwrap();
    let handle = device
        .inference_create(InferenceArgs {
            network,
            ifm: vec![],
            ofm: vec![],
            pmu: PmuConfig::default(),
        })
        .unwrap();

    let payload = rig
        .fw
        .recv_expect(MsgType::InferenceReq, Duration::from_secs(2));
    let req = InferenceReq::decode(&payload).unwrap();

    // Mismatching firmware version: warning only, nothing fails.
    let version = VersionRsp {
        major: 9,
        minor: 9,
        patch: 0,
        reserved: 0,
    };
    rig.fw
        .send(MsgType::VersionRsp, &encode(|b| version.encode(b)));
    rig.device.process_incoming();

    assert_eq!(handle.status(), InferenceStatus::Running);
    assert!(!handle.poll());

    let rsp = InferenceRsp {
        user_arg: req.user_arg,
        status: FirmwareStatus::Ok as u32,
        ..InferenceRsp::default()
    };
    rig.fw.send(MsgType::InferenceRsp, &encode(|b| rsp.encode(b)));
    rig.device.process_incoming();
    assert_eq!(handle.status(), InferenceStatus::Ok);
}

#[test]
fn empty_feature_map_lists_are_accepted() {
    let rig = Rig::with_defaults();
    let device = &rig.device;

    let model = test_model::single_subgraph(&[16], &[16]);
    let network = device
        .network_create(NetworkCreate::Buffer(load_model_buffer(device, &model)))
        .unwrap();
    let handle = device
        .inference_create(InferenceArgs {
            network,
            ifm: vec![],
            ofm: vec![],
            pmu: PmuConfig::default(),
        })
        .unwrap();

    let payload = rig
        .fw
        .recv_expect(MsgType::InferenceReq, Duration::from_secs(2));
    let req = InferenceReq::decode(&payload).unwrap();
    assert_eq!(req.ifm_count, 0);
    assert_eq!(req.ofm_count, 0);
    assert_eq!(handle.status(), InferenceStatus::Running);
}

#[test]
fn oversized_feature_map_lists_are_rejected() {
    let rig = Rig::with_defaults();
    let device = &rig.device;

    let model = test_model::single_subgraph(&[16], &[16]);
    let network = device
        .network_create(NetworkCreate::Buffer(load_model_buffer(device, &model)))
        .unwrap();

    let buffers: Vec<_> = (0..17)
        .map(|_| device.buffer_create(64).unwrap())
        .collect();

    let err = device
        .inference_create(InferenceArgs {
            network,
            ifm: buffers.clone(),
            ofm: vec![],
            pmu: PmuConfig::default(),
        })
        .unwrap_err();
    assert!(matches!(err, MuonError::InvalidArgument { .. }));
}

#[test]
fn full_outbound_queue_reports_no_space() {
    let rig = Rig::with_defaults();

    // Nothing drains the queue, so pings eventually stop fitting.
    let err = loop {
        if let Err(e) = rig.device.ping() {
            break e;
        }
    };
    assert!(matches!(err, MuonError::NoSpace { .. }));
}

#[test]
fn pmu_configuration_round_trips() {
    let rig = Rig::with_defaults();
    let device = &rig.device;

    let model = test_model::single_subgraph(&[16], &[16]);
    let network = device
        .network_create(NetworkCreate::Buffer(load_model_buffer(device, &model)))
        .unwrap();
    let handle = device
        .inference_create(InferenceArgs {
            network,
            ifm: vec![],
            ofm: vec![],
            pmu: PmuConfig {
                events: [3, 4, 5, 6],
                cycle_counter: true,
            },
        })
        .unwrap();

    let payload = rig
        .fw
        .recv_expect(MsgType::InferenceReq, Duration::from_secs(2));
    let req = InferenceReq::decode(&payload).unwrap();
    assert_eq!(req.pmu_event_config, [3, 4, 5, 6]);
    assert_eq!(req.pmu_cycle_counter_enable, 1);

    let rsp = InferenceRsp {
        user_arg: req.user_arg,
        status: FirmwareStatus::Ok as u32,
        pmu_event_config: [3, 4, 5, 6],
        pmu_event_count: [30, 40, 50, 60],
        pmu_cycle_counter_enable: 1,
        pmu_cycle_counter_count: 777,
        ..InferenceRsp::default()
    };
    rig.fw.send(MsgType::InferenceRsp, &encode(|b| rsp.encode(b)));
    rig.device.process_incoming();

    assert_eq!(handle.wait(None), WaitOutcome::Ready);
    assert_eq!(handle.pmu_counters(), Some([30, 40, 50, 60]));
    assert_eq!(handle.pmu_event_config(), [3, 4, 5, 6]);
    assert_eq!(handle.cycle_counter(), Some(777));
}

#[test]
fn firmware_ping_is_answered_with_pong() {
    let rig = Rig::with_defaults();

    rig.fw.send(MsgType::Ping, &[]);
    rig.device.process_incoming();

    let payload = rig.fw.recv_expect(MsgType::Pong, Duration::from_secs(1));
    assert!(payload.is_empty());
}
