//! Broker session, subscriptions and the steady-state publish loop.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use securelink::app::events::BootstrapEvent;
use securelink::app::model::{Message, QoS};
use securelink::app::service::{Sequencer, Session};
use securelink::config::BootstrapConfig;
use securelink::credentials::CredentialBundle;
use securelink::error::{BootstrapError, Status};
use securelink::fsm::StateId;

use crate::mock_ports::*;

type Received = Rc<RefCell<Vec<String>>>;

/// Bring the mocks up to `BrokerUp` with `client` bound over the channel.
fn bound<'a>(
    config: &'a BootstrapConfig,
    creds: &'a CredentialBundle,
    log: &CallLog,
    client: MockClient,
    sink: &mut RecordingSink,
) -> Session<'a, MockLink, MockClient> {
    let mut seq =
        Sequencer::new(config, creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();
    seq.bring_up(sink).unwrap();
    seq.bind_client(|_channel| client, sink).unwrap()
}

fn recorder(received: &Received, tag: &'static str) -> securelink::app::model::MessageHandler {
    let received = received.clone();
    Box::new(move |msg: &Message<'_>| {
        received
            .borrow_mut()
            .push(format!("{tag}:{}:{}", msg.topic, String::from_utf8_lossy(msg.payload)));
    })
}

fn steady<'a>(
    config: &'a BootstrapConfig,
    creds: &'a CredentialBundle,
    log: &CallLog,
    client: MockClient,
    sink: &mut RecordingSink,
) -> Session<'a, MockLink, MockClient> {
    let mut session = bound(config, creds, log, client, sink);
    session
        .subscribe_configured(Box::new(|_: &Message<'_>| {}), sink)
        .unwrap();
    session
}

// ── Broker connect ───────────────────────────────────────────

#[test]
fn client_id_is_derived_from_mac_when_unset() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut sink = RecordingSink::new();
    let session = bound(&config, &creds, &log, MockClient::new(log.clone()), &mut sink);

    assert_eq!(session.client_id(), "SL-AABBCC");
    assert_eq!(
        count(&log, |c| *c
            == Call::BrokerConnect {
                client_id: "SL-AABBCC".into()
            }),
        1
    );
    assert_eq!(session.state(), StateId::BrokerUp);
    assert_eq!(
        sink.states(),
        vec![StateId::LinkUp, StateId::SecureUp, StateId::BrokerUp]
    );
}

#[test]
fn configured_client_id_is_used_verbatim() {
    let log = call_log();
    let mut config = config();
    let _ = config.session.client_id.push_str("bench-7");
    let creds = credentials();
    let session = bound(&config, &creds, &log, MockClient::new(log.clone()), &mut RecordingSink::new());
    assert_eq!(session.client_id(), "bench-7");
}

#[test]
fn broker_refusal_fails_without_tearing_down() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut sink = RecordingSink::new();
    let mut seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();
    seq.bring_up(&mut sink).unwrap();

    let mut client = MockClient::new(log.clone());
    client.connect_result = Err(Status::AUTH_FAILURE);
    let err = match seq.bind_client(|_| client, &mut sink) {
        Err(e) => e,
        Ok(_) => panic!("broker connect should fail"),
    };
    assert_eq!(err, BootstrapError::BrokerConnectFailure(Status::AUTH_FAILURE));
    assert_eq!(sink.states().last(), Some(&StateId::Failed));
    assert_eq!(count(&log, |c| matches!(c, Call::Close | Call::LinkDisconnect)), 0);
}

#[test]
fn bind_before_channel_is_out_of_sequence() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let seq =
        Sequencer::new(&config, &creds, MockLink::new(log.clone()), MockChannel::new(log.clone()))
            .unwrap();
    let client = MockClient::new(log.clone());
    let result = seq.bind_client(|_| client, &mut RecordingSink::new());
    assert!(matches!(result, Err(BootstrapError::OutOfSequence { .. })));
    assert_eq!(count(&log, |c| matches!(c, Call::BrokerConnect { .. })), 0);
}

// ── Subscriptions ────────────────────────────────────────────

#[test]
fn first_subscription_enters_steady_state() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut sink = RecordingSink::new();
    let mut session = bound(&config, &creds, &log, MockClient::new(log.clone()), &mut sink);

    session
        .subscribe_configured(Box::new(|_: &Message<'_>| {}), &mut sink)
        .unwrap();
    assert_eq!(session.state(), StateId::SteadyState);
    assert_eq!(
        count(&log, |c| *c
            == Call::Subscribe {
                filter: "iot/test".into(),
                qos: QoS::AtMostOnce
            }),
        1
    );
    assert_eq!(sink.count(|e| matches!(e, BootstrapEvent::Subscribed)), 1);
}

#[test]
fn subscribe_failure_keeps_connections() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut client = MockClient::new(log.clone());
    client.subscribe_result = Err(Status::NO_MEMORY);
    let mut sink = RecordingSink::new();
    let mut session = bound(&config, &creds, &log, client, &mut sink);

    let err = session
        .subscribe("iot/#", QoS::AtLeastOnce, Box::new(|_: &Message<'_>| {}), &mut sink)
        .unwrap_err();
    assert_eq!(err, BootstrapError::SubscribeFailure(Status::NO_MEMORY));
    assert_eq!(session.state(), StateId::Failed);
    assert_eq!(
        count(&log, |c| matches!(c, Call::Close | Call::BrokerDisconnect | Call::LinkDisconnect)),
        0
    );
}

#[test]
fn resubscribing_replaces_the_handler() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let client = MockClient::new(log.clone());
    let inbox = client.inbox();
    let mut sink = RecordingSink::new();
    let mut session = bound(&config, &creds, &log, client, &mut sink);
    let received: Received = Rc::new(RefCell::new(Vec::new()));

    session
        .subscribe("iot/test", QoS::AtMostOnce, recorder(&received, "old"), &mut sink)
        .unwrap();
    session
        .subscribe("iot/test", QoS::AtLeastOnce, recorder(&received, "new"), &mut sink)
        .unwrap();
    assert_eq!(session.state(), StateId::SteadyState);
    assert_eq!(session.client().handler_count(), 1);

    inbox.borrow_mut().push(("iot/test".into(), b"ping".to_vec()));
    session.run_cycle(&mut sink).unwrap();
    assert_eq!(*received.borrow(), vec!["new:iot/test:ping".to_string()]);
}

#[test]
fn wildcard_subscription_receives_matching_topics() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let client = MockClient::new(log.clone());
    let inbox = client.inbox();
    let mut sink = RecordingSink::new();
    let mut session = bound(&config, &creds, &log, client, &mut sink);
    let received: Received = Rc::new(RefCell::new(Vec::new()));

    session
        .subscribe("iot/+/status", QoS::AtMostOnce, recorder(&received, "w"), &mut sink)
        .unwrap();
    inbox.borrow_mut().push(("iot/dev1/status".into(), b"up".to_vec()));
    inbox.borrow_mut().push(("iot/dev1/telemetry".into(), b"42".to_vec()));
    session.run_cycle(&mut sink).unwrap();

    assert_eq!(*received.borrow(), vec!["w:iot/dev1/status:up".to_string()]);
}

// ── Steady state ─────────────────────────────────────────────

#[test]
fn three_cycles_alternate_publish_and_yield() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut sink = RecordingSink::new();
    let mut session = steady(&config, &creds, &log, MockClient::new(log.clone()), &mut sink);
    let start = log.borrow().len();

    assert_eq!(session.run(Some(3), &mut sink).unwrap(), 3);

    let calls = log.borrow();
    let tail: Vec<Call> = calls[start..].to_vec();
    let interval = Duration::from_millis(2000);
    let expected: Vec<Call> = (1..=3)
        .flat_map(|i| {
            [
                Call::Publish {
                    topic: "iot/test".into(),
                    payload: format!("hello from securelink #{i}"),
                },
                Call::Yield(interval),
            ]
        })
        .collect();
    assert_eq!(tail, expected);
    assert_eq!(session.context().cycles, 3);
    assert_eq!(session.context().published, 3);
}

#[test]
fn publish_failure_is_not_fatal() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut client = MockClient::new(log.clone());
    client.publish_results = [Ok(()), Err(Status::NO_CONNECTION), Ok(())].into_iter().collect();
    let mut sink = RecordingSink::new();
    let mut session = steady(&config, &creds, &log, client, &mut sink);

    let first = session.run_cycle(&mut sink).unwrap();
    let second = session.run_cycle(&mut sink).unwrap();
    let third = session.run_cycle(&mut sink).unwrap();

    assert_eq!(first.publish, Ok(()));
    assert_eq!(
        second.publish,
        Err(BootstrapError::PublishFailure(Status::NO_CONNECTION))
    );
    assert_eq!(third.sequence, 3);
    assert_eq!(session.state(), StateId::SteadyState);
    assert_eq!(count(&log, |c| matches!(c, Call::Yield(_))), 3);

    let ctx = session.context();
    assert_eq!(ctx.published, 2);
    assert_eq!(ctx.publish_failures, 1);
    assert_eq!(ctx.consecutive_publish_failures, 0);
    assert_eq!(ctx.last_publish_status, Some(Status::NO_CONNECTION));
    assert_eq!(
        sink.count(|e| matches!(e, BootstrapEvent::PublishFailed { sequence: 2, .. })),
        1
    );
}

#[test]
fn yield_failure_is_connection_lost() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut client = MockClient::new(log.clone());
    client.yield_results = [Ok(()), Err(Status::NO_CONNECTION)].into_iter().collect();
    let mut sink = RecordingSink::new();
    let mut session = steady(&config, &creds, &log, client, &mut sink);

    let err = session.run(None, &mut sink).unwrap_err();
    assert_eq!(err, BootstrapError::ConnectionLost(Status::NO_CONNECTION));
    assert_eq!(session.state(), StateId::Failed);
    assert_eq!(session.failure(), Some(err));
    assert_eq!(session.context().cycles, 1);
    assert_eq!(count(&log, |c| matches!(c, Call::Publish { .. })), 2);

    // No further cycles once failed.
    assert!(matches!(
        session.run_cycle(&mut sink),
        Err(BootstrapError::OutOfSequence { .. })
    ));
}

#[test]
fn cycle_before_subscription_is_out_of_sequence() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut sink = RecordingSink::new();
    let mut session = bound(&config, &creds, &log, MockClient::new(log.clone()), &mut sink);

    let err = session.run_cycle(&mut sink).unwrap_err();
    assert_eq!(
        err,
        BootstrapError::OutOfSequence {
            expected: StateId::SteadyState,
            actual: StateId::BrokerUp
        }
    );
    assert_eq!(count(&log, |c| matches!(c, Call::Publish { .. })), 0);
}

#[test]
fn interval_follows_configuration() {
    let log = call_log();
    let mut config = config();
    config.publish_interval_ms = 250;
    let creds = credentials();
    let mut sink = RecordingSink::new();
    let mut session = steady(&config, &creds, &log, MockClient::new(log.clone()), &mut sink);

    session.run_cycle(&mut sink).unwrap();
    assert_eq!(
        count(&log, |c| *c == Call::Yield(Duration::from_millis(250))),
        1
    );
}

#[test]
fn shutdown_disconnects_client_then_link() {
    let log = call_log();
    let config = config();
    let creds = credentials();
    let mut sink = RecordingSink::new();
    let session = steady(&config, &creds, &log, MockClient::new(log.clone()), &mut sink);

    let (link, _client) = session.shutdown();
    assert!(!link.connected);
    let calls = log.borrow();
    let n = calls.len();
    assert_eq!(calls[n - 2], Call::BrokerDisconnect);
    assert_eq!(calls[n - 1], Call::LinkDisconnect);
}
