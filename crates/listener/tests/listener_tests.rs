//! Integration tests for discovery, attachment, completion and teardown
//!
//! Everything runs against the simulated host; no hardware is touched.

use listener::config::ListenerConfig;
use listener::descriptors::{AltSetting, CLASS_HID, InterfaceSnapshot};
use listener::test_utils::{
    DispatchStep, HostCall, MockDevice, MockHost, ReportLog, candidate, endpoint, hid_interface,
    mouse_device,
};
use listener::usb::TransferStatus;
use listener::{
    DeviceEnumerator, EventLoop, ListenerCommand, ListenerError, ListenerEvent, Session,
    SessionOptions, ShutdownSignal, StopReason, create_listener_bridge,
};
use rusb::TransferType;

mod discovery {
    use super::*;

    #[test]
    fn test_candidate_iff_boot_mouse_with_interrupt_in() {
        let classes = [CLASS_HID, 0x08];
        let subclasses = [0u8, 1];
        let protocols = [0u8, 1, 2];
        let endpoints = [
            (0x81u8, TransferType::Interrupt),
            (0x01, TransferType::Interrupt),
            (0x81, TransferType::Bulk),
            (0x81, TransferType::Isochronous),
        ];

        for &class in &classes {
            for &sub in &subclasses {
                for &proto in &protocols {
                    for &(address, kind) in &endpoints {
                        let interface = InterfaceSnapshot {
                            number: 0,
                            settings: vec![AltSetting {
                                setting_number: 0,
                                class_code: class,
                                sub_class_code: sub,
                                protocol_code: proto,
                                endpoints: vec![endpoint(address, kind)],
                            }],
                        };
                        let mut host =
                            MockHost::new(vec![MockDevice::new(0x1111, 0x2222, vec![interface])]);

                        let expected = class == CLASS_HID
                            && sub == 1
                            && proto == 2
                            && address & 0x80 != 0
                            && kind == TransferType::Interrupt;
                        let found = DeviceEnumerator::discover(&mut host);
                        assert_eq!(
                            !found.is_empty(),
                            expected,
                            "class={:#x} sub={} proto={} ep={:#x} {:?}",
                            class,
                            sub,
                            proto,
                            address,
                            kind
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_two_qualifying_endpoints_yield_two_candidates() {
        let mut host = MockHost::new(vec![mouse_device(0x046d, 0xc077, &[0x81, 0x82])]);
        let found = DeviceEnumerator::discover(&mut host);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].vendor_id, found[1].vendor_id);
        assert_eq!(found[0].product_id, found[1].product_id);
        assert_ne!(found[0].endpoint_address, found[1].endpoint_address);
    }

    #[test]
    fn test_alternate_settings_are_scanned() {
        let interface = InterfaceSnapshot {
            number: 2,
            settings: vec![
                AltSetting {
                    setting_number: 0,
                    class_code: CLASS_HID,
                    sub_class_code: 0,
                    protocol_code: 0,
                    endpoints: vec![endpoint(0x83, TransferType::Interrupt)],
                },
                AltSetting {
                    setting_number: 1,
                    class_code: CLASS_HID,
                    sub_class_code: 1,
                    protocol_code: 2,
                    endpoints: vec![endpoint(0x84, TransferType::Interrupt)],
                },
            ],
        };
        let mut host = MockHost::new(vec![MockDevice::new(0x1234, 0x5678, vec![interface])]);
        assert_eq!(
            DeviceEnumerator::discover(&mut host),
            vec![candidate(0x1234, 0x5678, 0x84)]
        );
    }

    #[test]
    fn test_combo_device_yields_only_mouse_interface() {
        let device = MockDevice::new(
            0x046d,
            0xc52b,
            vec![
                hid_interface(0, 1, 1, vec![endpoint(0x81, TransferType::Interrupt)]),
                hid_interface(1, 1, 2, vec![endpoint(0x82, TransferType::Interrupt)]),
                hid_interface(2, 0, 0, vec![endpoint(0x83, TransferType::Interrupt)]),
            ],
        );
        let mut host = MockHost::new(vec![device]);
        assert_eq!(
            DeviceEnumerator::discover(&mut host),
            vec![candidate(0x046d, 0xc52b, 0x82)]
        );
    }
}

mod attachment {
    use super::*;

    #[test]
    fn test_endpoint_missing_from_active_config_rolls_back() {
        let device = mouse_device(0x046d, 0xc077, &[0x81]).with_active_config(vec![
            hid_interface(0, 1, 2, vec![endpoint(0x82, TransferType::Interrupt)]),
        ]);
        let host = MockHost::new(vec![device]);
        let mut session = Session::new(host.clone(), ReportLog::new(), SessionOptions::default());

        let err = session
            .attach(&candidate(0x046d, 0xc077, 0x81))
            .unwrap_err();

        assert_eq!(
            err,
            ListenerError::InterfaceNotFound {
                vendor_id: 0x046d,
                product_id: 0xc077,
                endpoint: 0x81,
            }
        );
        assert_eq!(host.open_handles(), 0);
        assert_eq!(host.claimed_interfaces(), 0);
        assert_eq!(host.live_transfers(), 0);
        assert_eq!(host.count_calls(|c| matches!(c, HostCall::Claim(..))), 0);
    }

    #[test]
    fn test_every_failure_branch_leaves_nothing_behind() {
        let failures: Vec<Box<dyn Fn(&MockHost)>> = vec![
            Box::new(|h| h.fail_open(rusb::Error::Access)),
            Box::new(|h| h.fail_active_config(rusb::Error::Io)),
            Box::new(|h| h.fail_claim(rusb::Error::Busy)),
            Box::new(|h| h.fail_alloc(rusb::Error::NoMem)),
            Box::new(|h| h.fail_submit(rusb::Error::NoDevice)),
        ];

        for inject in failures {
            let host = MockHost::new(vec![mouse_device(0x046d, 0xc077, &[0x81])]);
            inject(&host);
            let mut session =
                Session::new(host.clone(), ReportLog::new(), SessionOptions::default());

            assert!(session.attach(&candidate(0x046d, 0xc077, 0x81)).is_err());
            assert!(session.outstanding().is_empty());
            assert_eq!(host.open_handles(), 0);
            assert_eq!(host.claimed_interfaces(), 0);
            assert_eq!(host.live_transfers(), 0);
        }
    }

    #[test]
    fn test_interface_claimed_is_the_one_owning_endpoint() {
        let device = MockDevice::new(
            0x046d,
            0xc52b,
            vec![
                hid_interface(0, 1, 1, vec![endpoint(0x81, TransferType::Interrupt)]),
                hid_interface(1, 1, 2, vec![endpoint(0x82, TransferType::Interrupt)]),
            ],
        );
        let host = MockHost::new(vec![device]);
        let mut session = Session::new(host.clone(), ReportLog::new(), SessionOptions::default());

        session.start().unwrap();
        assert_eq!(
            host.count_calls(|c| matches!(c, HostCall::Claim(_, 1))),
            1
        );
    }
}

mod completions {
    use super::*;

    fn listening_session() -> (MockHost, ReportLog, Session<MockHost>) {
        let host = MockHost::new(vec![mouse_device(0x046d, 0xc077, &[0x81])]);
        let log = ReportLog::new();
        let mut session = Session::new(host.clone(), log.clone(), SessionOptions::default());
        assert_eq!(
            session.start().unwrap(),
            vec![candidate(0x046d, 0xc077, 0x81)]
        );
        (host, log, session)
    }

    #[test]
    fn test_scenario_four_byte_report_then_resubmit() {
        let (host, log, mut session) = listening_session();
        let id = host.transfer_ids()[0];
        let submits = || host.count_calls(|c| *c == HostCall::Submit(id));
        assert_eq!(submits(), 1);

        host.push_report(id, &[0x00, 0x01, 0xFF, 0x00]);
        assert_eq!(session.dispatch().unwrap(), 1);

        assert_eq!(log.reports(), vec![vec![0x00, 0x01, 0xFF, 0x00]]);
        assert_eq!(
            log.entries()[0].0,
            candidate(0x046d, 0xc077, 0x81)
        );
        assert_eq!(submits(), 2);
        assert_eq!(host.armed_transfers(), 1);
    }

    #[test]
    fn test_callback_sees_only_actual_length() {
        let (host, log, mut session) = listening_session();
        let id = host.transfer_ids()[0];

        host.push_report(id, &[1, 2, 3, 4, 5, 6]);
        host.push_report(id, &[9, 9]);
        session.dispatch().unwrap();
        session.dispatch().unwrap();

        // Second report is shorter; stale bytes of the first must not leak
        assert_eq!(log.reports(), vec![vec![1, 2, 3, 4, 5, 6], vec![9, 9]]);
    }

    #[test]
    fn test_failure_status_never_resubmits_or_reports() {
        for status in [
            TransferStatus::Error,
            TransferStatus::TimedOut,
            TransferStatus::Stall,
            TransferStatus::NoDevice,
            TransferStatus::Overflow,
            TransferStatus::Cancelled,
        ] {
            let (host, log, mut session) = listening_session();
            let id = host.transfer_ids()[0];

            host.push_status(id, status);
            session.dispatch().unwrap();

            assert!(log.is_empty(), "{:?} reached the callback", status);
            assert_eq!(host.count_calls(|c| *c == HostCall::Submit(id)), 1);
            assert_eq!(session.outstanding().len(), 1);
        }
    }

    #[test]
    fn test_resubmission_failure_retires_and_reports() {
        let host = MockHost::new(vec![mouse_device(0x046d, 0xc077, &[0x81])]);
        let (bridge, worker) = create_listener_bridge();
        let log = ReportLog::new();
        let mut session = Session::new(host.clone(), log.clone(), SessionOptions::default())
            .with_events(worker.event_sink());
        session.start().unwrap();
        let id = host.transfer_ids()[0];

        host.push_report(id, &[0x07]);
        host.fail_submit(rusb::Error::NoDevice);
        session.dispatch().unwrap();

        assert_eq!(log.reports(), vec![vec![0x07]]);
        assert!(session.outstanding().is_empty());
        assert_eq!(host.open_handles(), 0);

        let mut saw_retirement = false;
        while let Some(event) = bridge.try_recv_event() {
            if let ListenerEvent::ResubmissionFailed { error, .. } = event {
                assert_eq!(error, rusb::Error::NoDevice);
                saw_retirement = true;
            }
        }
        assert!(saw_retirement);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn test_teardown_cancels_everything_before_release() {
        let host = MockHost::new(vec![
            mouse_device(0x046d, 0xc077, &[0x81]),
            mouse_device(0x093a, 0x2510, &[0x81]),
        ]);
        let options = SessionOptions {
            strategy: listener::SelectionStrategy::All,
            ..Default::default()
        };
        let mut session = Session::new(host.clone(), ReportLog::new(), options);
        session.start().unwrap();
        let ids = host.transfer_ids();
        assert_eq!(ids.len(), 2);

        drop(session);

        let calls = host.calls();
        let last_cancel = calls
            .iter()
            .rposition(|c| matches!(c, HostCall::Cancel(_)))
            .unwrap();
        let first_free = calls
            .iter()
            .position(|c| matches!(c, HostCall::Free(_)))
            .unwrap();
        assert!(last_cancel < first_free);
        for id in ids {
            assert!(calls.contains(&HostCall::Cancel(id)));
            assert!(calls.contains(&HostCall::Free(id)));
        }
        assert_eq!(host.freed_while_armed(), 0);
        assert_eq!(host.closed_with_live_transfers(), 0);
        assert_eq!(host.live_transfers(), 0);
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn test_minimal_teardown_deadline_never_frees_pending_transfers() {
        assert!(ListenerConfig::from_toml("[listener]\nteardown_timeout_ms = 0\n").is_err());

        let config = ListenerConfig::from_toml("[listener]\nteardown_timeout_ms = 1\n").unwrap();
        let host = MockHost::new(vec![mouse_device(0x046d, 0xc077, &[0x81])]);
        let mut session =
            Session::new(host.clone(), ReportLog::new(), config.session_options().unwrap());
        session.start().unwrap();

        session.teardown();

        assert_eq!(host.freed_while_armed(), 0);
        assert_eq!(host.closed_with_live_transfers(), 0);
        assert_eq!(host.live_transfers(), 0);
    }

    #[test]
    fn test_listen_until_dispatch_failure() {
        let host = MockHost::new(vec![mouse_device(0x046d, 0xc077, &[0x81])]);
        let log = ReportLog::new();
        let mut session = Session::new(host.clone(), log.clone(), SessionOptions::default());

        // Transfer ids are allocated from 1
        let id = listener::usb::TransferId(1);
        host.push_report(id, &[0x01, 0x02, 0x03]);
        host.push_step(DispatchStep::Idle);
        host.push_dispatch_error(rusb::Error::Io);

        let reason = session.listen(ShutdownSignal::never()).unwrap();
        assert_eq!(reason, StopReason::Dispatch(rusb::Error::Io));
        assert_eq!(log.reports(), vec![vec![0x01, 0x02, 0x03]]);
        assert!(session.outstanding().is_empty());
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn test_listen_without_mouse_fails() {
        let host = MockHost::new(vec![]);
        let mut session = Session::new(host, ReportLog::new(), SessionOptions::default());
        assert_eq!(
            session.listen(ShutdownSignal::never()),
            Err(ListenerError::NoListenableDevice)
        );
    }

    #[tokio::test]
    async fn test_cooperative_shutdown() {
        let host = MockHost::new(vec![mouse_device(0x046d, 0xc077, &[0x81])]);
        let (bridge, worker) = create_listener_bridge();
        let mut session = Session::new(host.clone(), ReportLog::new(), SessionOptions::default())
            .with_events(worker.event_sink());
        session.start().unwrap();

        let mut event_loop = EventLoop::new(worker.shutdown_signal());
        assert!(event_loop.step(&mut session).is_none());

        bridge.send_command(ListenerCommand::Shutdown).await.unwrap();
        assert_eq!(event_loop.step(&mut session), Some(StopReason::Shutdown));
        assert_eq!(event_loop.iterations(), 1);

        session.teardown();
        assert_eq!(host.live_transfers(), 0);
    }
}
