//! Fault-recovery tests: malformed frames, firmware error reports, watchdog
//! probing and the reset-and-replay sequence.

mod common;

use common::{load_model_buffer, Rig};
use muon_driver::{
    DeviceConfig, InferenceArgs, InferenceStatus, NetworkCreate, PmuConfig, WaitOutcome,
};
use muon_models::test_model;
use muon_proto::{
    ErrMsg, FirmwareStatus, InferenceReq, InferenceRsp, MsgType, ERR_MSG_LEN,
};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

fn encode<F: Fn(&mut Vec<u8>)>(f: F) -> Vec<u8> {
    let mut buf = Vec::new();
    f(&mut buf);
    buf
}

fn running_inference(rig: &Rig) -> (muon_driver::InferenceHandle, u64) {
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
    (handle, req.user_arg)
}

#[test]
fn bad_magic_resets_queue_without_failing_requests() {
    let rig = Rig::with_defaults();
    let (handle, user_arg) = running_inference(&rig);

    // A corrupted frame drops the inbound queue but fails no request.
    rig.fw.send_bad_magic();
    rig.device.process_incoming();
    assert_eq!(handle.status(), InferenceStatus::Running);

    // The transport keeps working afterwards.
    let rsp = InferenceRsp {
        user_arg,
        status: FirmwareStatus::Ok as u32,
        ..InferenceRsp::default()
    };
    rig.fw.send(MsgType::InferenceRsp, &encode(|b| rsp.encode(b)));
    rig.device.process_incoming();
    assert_eq!(handle.wait(Some(Duration::from_secs(1))), WaitOutcome::Ready);
    assert_eq!(handle.status(), InferenceStatus::Ok);
}

#[test]
fn frames_behind_a_corrupt_one_are_dropped() {
    let rig = Rig::with_defaults();
    let (handle, user_arg) = running_inference(&rig);

    rig.fw.send_bad_magic();
    let rsp = InferenceRsp {
        user_arg,
        status: FirmwareStatus::Ok as u32,
        ..InferenceRsp::default()
    };
    // Queued behind the corrupt frame, so the reset discards it.
    rig.fw.send(MsgType::InferenceRsp, &encode(|b| rsp.encode(b)));
    rig.device.process_incoming();

    assert_eq!(handle.status(), InferenceStatus::Running);
    assert_eq!(
        handle.wait(Some(Duration::from_millis(50))),
        WaitOutcome::TimedOut
    );
}

#[test]
fn firmware_error_frame_is_logged_and_queue_reset() {
    let rig = Rig::with_defaults();
    let (handle, _user_arg) = running_inference(&rig);

    let mut err = ErrMsg {
        err_type: 1,
        msg: [0; ERR_MSG_LEN],
    };
    err.msg[..9].copy_from_slice(b"hw lockup");
    rig.fw.send(MsgType::Err, &encode(|b| err.encode(b)));
    rig.device.process_incoming();

    // No request is failed solely because of the error report; the watchdog
    // decides on firmware death.
    assert_eq!(handle.status(), InferenceStatus::Running);
}

#[test]
fn silent_firmware_is_probed_then_reset_and_requests_replayed() {
    let rig = Rig::new(DeviceConfig {
        watchdog_timeout: Duration::from_millis(100),
        firmware_boot_timeout: Duration::from_millis(500),
        ..DeviceConfig::default()
    });
    let (handle, user_arg) = running_inference(&rig);

    // First expiry: a probing ping, unanswered.
    let probe = rig.fw.recv_expect(MsgType::Ping, Duration::from_secs(2));
    assert!(probe.is_empty());
    assert_eq!(rig.reset.asserts.load(Ordering::SeqCst), 0);

    // Second expiry: firmware declared dead, reset runs.
    let deadline = Instant::now() + Duration::from_secs(2);
    while rig.reset.deasserts.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "reset never ran");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(rig.reset.asserts.load(Ordering::SeqCst), 1);

    // After the restart the engine pings and replays the inference under
    // the same correlation id.
    let _ = rig.fw.recv_expect(MsgType::Ping, Duration::from_secs(2));
    rig.fw.send(MsgType::Pong, &[]);

    let payload = rig
        .fw
        .recv_expect(MsgType::InferenceReq, Duration::from_secs(2));
    let req = InferenceReq::decode(&payload).unwrap();
    assert_eq!(req.user_arg, user_arg, "replayed with the same id");
    assert_eq!(handle.status(), InferenceStatus::Running);

    let rsp = InferenceRsp {
        user_arg,
        status: FirmwareStatus::Ok as u32,
        ..InferenceRsp::default()
    };
    rig.fw.send(MsgType::InferenceRsp, &encode(|b| rsp.encode(b)));
    rig.device.process_incoming();

    assert_eq!(handle.wait(Some(Duration::from_secs(1))), WaitOutcome::Ready);
    assert_eq!(handle.status(), InferenceStatus::Ok);
}

#[test]
fn failed_restart_fails_outstanding_requests() {
    let rig = Rig::new(DeviceConfig {
        watchdog_timeout: Duration::from_millis(80),
        firmware_boot_timeout: Duration::from_millis(100),
        ..DeviceConfig::default()
    });
    rig.reset.fail_deassert.store(true, Ordering::SeqCst);

    let (handle, _user_arg) = running_inference(&rig);

    // Probe ping, then a reset attempt that fails on the stuck line; every
    // outstanding request is failed.
    let deadline = Instant::now() + Duration::from_secs(3);
    while !handle.poll() {
        assert!(Instant::now() < deadline, "inference never failed");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(handle.status(), InferenceStatus::Error);
    assert!(rig.reset.deasserts.load(Ordering::SeqCst) >= 1);
}

#[test]
fn dropped_handle_discards_late_response() {
    let rig = Rig::with_defaults();
    let (handle, user_arg) = running_inference(&rig);
    assert_eq!(rig.device.diagnostics().outstanding_messages, 1);

    drop(handle);
    assert_eq!(rig.device.diagnostics().outstanding_messages, 0);

    // The late response misses the registry and is discarded; the watchdog
    // unit is still released by the read path.
    let rsp = InferenceRsp {
        user_arg,
        status: FirmwareStatus::Ok as u32,
        ..InferenceRsp::default()
    };
    rig.fw.send(MsgType::InferenceRsp, &encode(|b| rsp.encode(b)));
    rig.device.process_incoming();
    assert_eq!(rig.device.diagnostics().watchdog_refcount, 0);
}
