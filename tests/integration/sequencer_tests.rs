//! Association and secure-channel bring-up against the recording mocks.

use std::net::{IpAddr, SocketAddr};

use securelink::app::events::BootstrapEvent;
use securelink::app::model::SecurityMode;
use securelink::app::service::{Sequencer, http_probe_request};
use securelink::error::{BootstrapError, Status};
use securelink::fsm::StateId;

use crate::mock_ports::*;

fn is_channel_call(call: &Call) -> bool {
    matches!(
        call,
        Call::SetCa { .. } | Call::Open | Call::ChannelConnect { .. } | Call::Send(_) | Call::Recv(_)
    )
}

// ── Discovery ────────────────────────────────────────────────

#[test]
fn scan_is_capped_at_fifteen_when_twenty_are_visible() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let link = MockLink::new(log.clone()).with_visible(20);
    let mut seq = Sequencer::new(&config, &creds, link, MockChannel::new(log.clone())).unwrap();
    let mut sink = RecordingSink::new();

    seq.bring_up(&mut sink).unwrap();

    let calls = log.borrow();
    assert_eq!(calls[0], Call::Scan { capacity: 0 });
    assert_eq!(calls[1], Call::Scan { capacity: 15 });
    assert_eq!(
        calls[2],
        Call::LinkConnect {
            ssid: "IoT_Test".into(),
            passphrase: "MQTT_TLS_TEST_2022".into(),
            security: SecurityMode::WpaWpa2,
        }
    );
    assert_eq!(sink.count(|e| matches!(e, BootstrapEvent::AccessPoint(_))), 15);
    assert_eq!(
        sink.count(|e| matches!(
            e,
            BootstrapEvent::ScanCompleted {
                visible: 20,
                reported: 15
            }
        )),
        1
    );
}

#[test]
fn scan_below_cap_lists_every_network() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let link = MockLink::new(log.clone()).with_visible(4);
    let mut seq = Sequencer::new(&config, &creds, link, MockChannel::new(log.clone())).unwrap();

    let records = seq.discover(&mut RecordingSink::new()).unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].ssid.as_str(), "AP-0");
    assert_eq!(log.borrow()[1], Call::Scan { capacity: 4 });
}

#[test]
fn shrinking_second_scan_is_accepted() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut link = MockLink::new(log.clone()).with_visible(10);
    link.listed = Some(6);
    let mut seq = Sequencer::new(&config, &creds, link, MockChannel::new(log.clone())).unwrap();
    let mut sink = RecordingSink::new();

    let records = seq.discover(&mut sink).unwrap();
    assert_eq!(records.len(), 6);
    assert_eq!(seq.state(), StateId::Init);
    assert_eq!(
        sink.count(|e| matches!(
            e,
            BootstrapEvent::ScanCompleted {
                visible: 10,
                reported: 6
            }
        )),
        1
    );
}

#[test]
fn empty_scan_skips_listing_and_still_associates() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let link = MockLink::new(log.clone()).with_visible(0);
    let mut seq = Sequencer::new(&config, &creds, link, MockChannel::new(log.clone())).unwrap();

    seq.bring_up(&mut RecordingSink::new()).unwrap();
    assert_eq!(count(&log, |c| matches!(c, Call::Scan { .. })), 1);
    assert_eq!(seq.state(), StateId::SecureUp);
}

#[test]
fn empty_scan_fails_when_configured() {
    let log = call_log();
    let mut config = config();
    config.fail_on_empty_scan = true;
    let creds = credentials();
    let link = MockLink::new(log.clone()).with_visible(0);
    let mut seq = Sequencer::new(&config, &creds, link, MockChannel::new(log.clone())).unwrap();

    let err = seq.bring_up(&mut RecordingSink::new()).unwrap_err();
    assert_eq!(err, BootstrapError::LinkFailure(Status::NO_SSID));
    assert_eq!(seq.state(), StateId::Failed);
    assert_eq!(count(&log, |c| matches!(c, Call::LinkConnect { .. })), 0);
}

#[test]
fn scan_error_is_reported_but_not_fatal() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut link = MockLink::new(log.clone());
    link.scan_error = Some(Status::DEVICE_ERROR);
    let mut seq = Sequencer::new(&config, &creds, link, MockChannel::new(log.clone())).unwrap();
    let mut sink = RecordingSink::new();

    seq.bring_up(&mut sink).unwrap();
    assert_eq!(
        sink.count(|e| matches!(e, BootstrapEvent::ScanFailed(s) if *s == Status::DEVICE_ERROR)),
        1
    );
    assert_eq!(seq.state(), StateId::SecureUp);
}

#[test]
fn scan_can_be_disabled() {
    let log = call_log();
    let mut config = config();
    config.scan_enabled = false;
    let creds = credentials();
    let link = MockLink::new(log.clone());
    let mut seq = Sequencer::new(&config, &creds, link, MockChannel::new(log.clone())).unwrap();

    seq.bring_up(&mut RecordingSink::new()).unwrap();
    assert_eq!(count(&log, |c| matches!(c, Call::Scan { .. })), 0);
}

// ── Association ──────────────────────────────────────────────

#[test]
fn link_failure_never_touches_the_channel() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut link = MockLink::new(log.clone());
    link.connect_result = Err(Status::AUTH_FAILURE);
    let mut seq = Sequencer::new(&config, &creds, link, MockChannel::new(log.clone())).unwrap();
    let mut sink = RecordingSink::new();

    let err = seq.bring_up(&mut sink).unwrap_err();
    assert_eq!(err, BootstrapError::LinkFailure(Status::AUTH_FAILURE));
    assert_eq!(seq.state(), StateId::Failed);
    assert_eq!(seq.failure(), Some(err));
    assert_eq!(count(&log, is_channel_call), 0);
    assert_eq!(sink.states(), vec![StateId::Failed]);
    assert_eq!(sink.count(|e| matches!(e, BootstrapEvent::Failed(_))), 1);
}

#[test]
fn associate_reports_addressing() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();
    let mut sink = RecordingSink::new();

    let info = seq.associate(&mut sink).unwrap();
    assert_eq!(info.mac, MOCK_MAC);
    assert_eq!(info.ip, Some(IpAddr::from([10, 0, 0, 2])));
    assert_eq!(info.gateway, Some(IpAddr::from([10, 0, 0, 1])));
    assert_eq!(info.rssi, Some(-48));
    assert_eq!(seq.link_info(), Some(info));
    assert_eq!(seq.state(), StateId::LinkUp);
    assert_eq!(sink.states(), vec![StateId::LinkUp]);
}

// ── Secure channel ───────────────────────────────────────────

#[test]
fn certificate_rejection_stops_before_open() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut channel = MockChannel::new(log.clone());
    channel.ca_result = Err(Status(5));
    let mut seq = Sequencer::new(&config, &creds, MockLink::new(log.clone()), channel).unwrap();

    let err = seq.bring_up(&mut RecordingSink::new()).unwrap_err();
    assert_eq!(err, BootstrapError::CertificateFailure(Status(5)));
    assert_eq!(count(&log, |c| matches!(c, Call::Open)), 0);
    assert_eq!(count(&log, |c| matches!(c, Call::ChannelConnect { .. })), 0);
    assert_eq!(seq.state(), StateId::Failed);
}

#[test]
fn certificate_install_passes_the_whole_chain() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();

    seq.bring_up(&mut RecordingSink::new()).unwrap();
    assert_eq!(
        count(&log, |c| *c == Call::SetCa { len: ONE_CERT.len() }),
        1
    );
}

#[test]
fn open_failure_is_distinct_from_connect_failure() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut channel = MockChannel::new(log.clone());
    channel.open_result = Err(Status::NO_SOCKET);
    let mut seq = Sequencer::new(&config, &creds, MockLink::new(log.clone()), channel).unwrap();

    let err = seq.bring_up(&mut RecordingSink::new()).unwrap_err();
    assert_eq!(err, BootstrapError::ChannelOpenFailure(Status::NO_SOCKET));
    assert_eq!(count(&log, |c| matches!(c, Call::Resolve(_))), 0);
}

#[test]
fn resolution_failure_is_not_a_certificate_failure() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut link = MockLink::new(log.clone());
    link.resolve_result = Err(Status::DNS_FAILURE);
    let mut seq = Sequencer::new(&config, &creds, link, MockChannel::new(log.clone())).unwrap();

    let err = seq.bring_up(&mut RecordingSink::new()).unwrap_err();
    assert_eq!(err, BootstrapError::ResolutionFailure(Status::DNS_FAILURE));
    assert_eq!(count(&log, |c| matches!(c, Call::ChannelConnect { .. })), 0);
}

#[test]
fn channel_connects_to_broker_with_host_as_server_name() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();

    let peer = seq.bring_up(&mut RecordingSink::new()).unwrap();
    let expected = SocketAddr::new(IpAddr::from(BROKER_IP), 8883);
    assert_eq!(peer, expected);
    assert_eq!(seq.peer(), Some(expected));
    assert_eq!(count(&log, |c| *c == Call::Resolve("test.mosquitto.org".into())), 1);
    assert_eq!(count(&log, |c| *c == Call::Resolve("os.mbed.com".into())), 0);
    assert_eq!(
        count(&log, |c| *c
            == Call::ChannelConnect {
                peer: expected,
                server_name: "test.mosquitto.org".into()
            }),
        1
    );
}

#[test]
fn connect_is_retried_exactly_once() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let channel = MockChannel::new(log.clone()).failing_connects(&[Err(Status::CONNECTION_TIMEOUT)]);
    let mut seq = Sequencer::new(&config, &creds, MockLink::new(log.clone()), channel).unwrap();
    let mut sink = RecordingSink::new();

    seq.bring_up(&mut sink).unwrap();
    assert_eq!(count(&log, |c| matches!(c, Call::ChannelConnect { .. })), 2);
    assert_eq!(sink.count(|e| matches!(e, BootstrapEvent::ChannelRetry(_))), 1);
    assert_eq!(seq.state(), StateId::SecureUp);
}

#[test]
fn second_connect_failure_is_fatal() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let channel = MockChannel::new(log.clone())
        .failing_connects(&[Err(Status::CONNECTION_TIMEOUT), Err(Status::AUTH_FAILURE)]);
    let mut seq = Sequencer::new(&config, &creds, MockLink::new(log.clone()), channel).unwrap();

    let err = seq.bring_up(&mut RecordingSink::new()).unwrap_err();
    assert_eq!(err, BootstrapError::ChannelConnectFailure(Status::AUTH_FAILURE));
    assert_eq!(count(&log, |c| matches!(c, Call::ChannelConnect { .. })), 2);
    assert_eq!(seq.state(), StateId::Failed);
}

#[test]
fn retry_can_be_disabled() {
    let log = call_log();
    let mut config = config();
    config.retry_channel_connect = false;
    let creds = credentials();
    let channel = MockChannel::new(log.clone()).failing_connects(&[Err(Status::CONNECTION_TIMEOUT)]);
    let mut seq = Sequencer::new(&config, &creds, MockLink::new(log.clone()), channel).unwrap();

    let err = seq.bring_up(&mut RecordingSink::new()).unwrap_err();
    assert_eq!(err, BootstrapError::ChannelConnectFailure(Status::CONNECTION_TIMEOUT));
    assert_eq!(count(&log, |c| matches!(c, Call::ChannelConnect { .. })), 1);
}

#[test]
fn happy_path_walks_states_in_order() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();
    let mut sink = RecordingSink::new();

    seq.bring_up(&mut sink).unwrap();
    assert_eq!(sink.states(), vec![StateId::LinkUp, StateId::SecureUp]);
    assert!(seq.channel().is_some_and(|c| c.connected));
}

// ── Ordering guards ──────────────────────────────────────────

#[test]
fn channel_before_link_is_out_of_sequence() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();

    let err = seq.establish_channel(&mut RecordingSink::new()).unwrap_err();
    assert_eq!(
        err,
        BootstrapError::OutOfSequence {
            expected: StateId::LinkUp,
            actual: StateId::Init
        }
    );
    // Sequencing errors are not collaborator failures.
    assert_eq!(seq.state(), StateId::Init);
    assert!(log.borrow().is_empty());
}

#[test]
fn failed_sequencer_refuses_further_steps() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut link = MockLink::new(log.clone());
    link.connect_result = Err(Status::NO_SSID);
    let mut seq = Sequencer::new(&config, &creds, link, MockChannel::new(log.clone())).unwrap();
    let mut sink = RecordingSink::new();

    seq.associate(&mut sink).unwrap_err();
    let err = seq.associate(&mut sink).unwrap_err();
    assert!(matches!(err, BootstrapError::OutOfSequence { .. }));
    assert_eq!(seq.failure(), Some(BootstrapError::LinkFailure(Status::NO_SSID)));
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let log = call_log();
    let mut config = config();
    config.publish_interval_ms = 0;
    let creds = credentials();
    let result = Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()));
    assert!(matches!(result, Err(BootstrapError::Config(_))));
}

// ── HTTPS check ──────────────────────────────────────────

#[test]
fn https_check_runs_on_its_own_channel() {
    let log = call_log();
    let check_log = call_log();
    let config = config();
    let creds = credentials();
    let mut seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();
    let mut sink = RecordingSink::new();
    seq.bring_up(&mut sink).unwrap();

    let check = config.https_check.as_ref().unwrap();
    let request = http_probe_request(&check.host);
    let mut response = [0u8; 256];
    let n = seq
        .probe(MockChannel::new(check_log.clone()), request.as_bytes(), &mut response, &mut sink)
        .unwrap();
    assert!(response[..n].starts_with(b"HTTP/1.1 200 OK"));
    assert_eq!(seq.state(), StateId::SecureUp);

    // The broker channel carries no HTTP traffic and stays open.
    assert_eq!(count(&log, |c| matches!(c, Call::Send(_) | Call::Recv(_) | Call::Close)), 0);
    assert!(seq.channel().unwrap().connected);

    let expected = SocketAddr::new(IpAddr::from(BROKER_IP), 443);
    assert_eq!(count(&log, |c| *c == Call::Resolve("os.mbed.com".into())), 1);
    assert_eq!(
        *check_log.borrow(),
        vec![
            Call::SetCa { len: ONE_CERT.len() },
            Call::Open,
            Call::ChannelConnect {
                peer: expected,
                server_name: "os.mbed.com".into()
            },
            Call::Send(request.len()),
            Call::Recv(256),
            Call::Close,
        ]
    );
}

#[test]
fn https_check_without_endpoint_is_a_config_error() {
    let log = call_log();
    let mut config = config();
    config.https_check = None;
    let creds = credentials();
    let mut seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();
    let mut sink = RecordingSink::new();
    seq.bring_up(&mut sink).unwrap();

    let check_log = call_log();
    let mut response = [0u8; 16];
    let result = seq.probe(MockChannel::new(check_log.clone()), b"x", &mut response, &mut sink);
    assert!(matches!(result, Err(BootstrapError::Config(_))));
    assert!(check_log.borrow().is_empty());
    assert_eq!(seq.state(), StateId::SecureUp);
}

#[test]
fn https_check_recv_failure_fails_the_sequencer() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();
    let mut sink = RecordingSink::new();
    seq.bring_up(&mut sink).unwrap();

    let check_log = call_log();
    let mut check = MockChannel::new(check_log.clone());
    check.recv_result = Some(Status::CONNECTION_TIMEOUT);
    let mut response = [0u8; 64];
    let err = seq.probe(check, b"GET /\r\n\r\n", &mut response, &mut sink).unwrap_err();
    assert_eq!(
        err,
        BootstrapError::ChannelIoFailure {
            operation: "channel.recv",
            status: Status::CONNECTION_TIMEOUT
        }
    );
    assert_eq!(seq.state(), StateId::Failed);
    // The check channel is still closed on the way out.
    assert_eq!(check_log.borrow().last(), Some(&Call::Close));
}

#[test]
fn https_check_clamps_overreported_receive_count() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();
    let mut sink = RecordingSink::new();
    seq.bring_up(&mut sink).unwrap();

    let mut check = MockChannel::new(call_log());
    check.recv_overreport = 100;
    let mut response = [0u8; 16];
    let n = seq.probe(check, b"GET /\r\n\r\n", &mut response, &mut sink).unwrap();
    assert_eq!(n, response.len());
    assert_eq!(
        sink.count(|e| matches!(e, BootstrapEvent::ProbeExchanged { received: 16, .. })),
        1
    );
    assert_eq!(seq.state(), StateId::SecureUp);
}

#[test]
fn https_check_before_channel_is_out_of_sequence() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();
    let mut response = [0u8; 16];
    assert!(matches!(
        seq.probe(MockChannel::new(log.clone()), b"x", &mut response, &mut RecordingSink::new()),
        Err(BootstrapError::OutOfSequence { .. })
    ));
}

// ── Shutdown ─────────────────────────────────────────────────

#[test]
fn shutdown_closes_channel_then_link() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();
    seq.bring_up(&mut RecordingSink::new()).unwrap();

    let link = seq.shutdown();
    assert!(!link.connected);
    let calls = log.borrow();
    let n = calls.len();
    assert_eq!(calls[n - 2], Call::Close);
    assert_eq!(calls[n - 1], Call::LinkDisconnect);
}
