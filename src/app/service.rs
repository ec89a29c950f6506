//! Bootstrap sequencer, the hexagonal core.
//!
//! [`Sequencer`] drives the link, the secure channel and (optionally) the
//! message client through a fixed, fail-fast order:
//!
//! ```text
//!  discover ─▶ associate ─▶ install CA ─▶ open ─▶ resolve ─▶ connect(+1 retry)
//!                                                               │
//!                        ┌──────── bind_client ◀────────────────┘
//!                        ▼
//!                 Session: connect ─▶ subscribe ─▶ { publish ─▶ yield }*
//! ```
//!
//! Binding the client moves the channel into it, so the sequencer is
//! consumed and a [`Session`] carries the state machine onwards.  Each step
//! checks the current state first; any collaborator failure is recorded as
//! the `Failed` reason and returned.  Established connections are never
//! torn down on failure; a supervisor restart is the only way out of
//! `Failed`.

use core::time::Duration;
use std::net::SocketAddr;

use log::{info, warn};

use crate::config::{BootstrapConfig, Endpoint};
use crate::credentials::CredentialBundle;
use crate::device_id::{self, ClientIdString};
use crate::error::{BootstrapError, Result, Status};
use crate::fsm::context::FsmContext;
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, StateId};

use super::events::BootstrapEvent;
use super::model::{AccessPointRecord, LinkInfo, Message, MessageHandler, QoS};
use super::ports::{EventSink, LinkPort, MessageClientPort, SecureChannelPort};

// ───────────────────────────────────────────────────────────────
// State machine wrapper
// ───────────────────────────────────────────────────────────────

/// FSM plus its context, with transitions mirrored to the event sink.
struct Machine {
    fsm: Fsm,
    ctx: FsmContext,
}

impl Machine {
    fn new() -> Self {
        let mut fsm = Fsm::new(build_state_table(), StateId::Init);
        let mut ctx = FsmContext::new();
        fsm.start(&mut ctx);
        Self { fsm, ctx }
    }

    fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    fn require(&self, expected: StateId) -> Result<()> {
        self.fsm.require(expected)
    }

    fn advance(&mut self, next: StateId, sink: &mut impl EventSink) -> Result<()> {
        let from = self.state();
        self.fsm.advance(next, &mut self.ctx)?;
        sink.emit(&BootstrapEvent::StateChanged { from, to: next });
        Ok(())
    }

    /// Enter `Failed` with `err` and hand it back for returning.
    fn fail(&mut self, err: BootstrapError, sink: &mut impl EventSink) -> BootstrapError {
        let from = self.state();
        self.fsm.fail(err, &mut self.ctx);
        if from != StateId::Failed {
            sink.emit(&BootstrapEvent::StateChanged {
                from,
                to: StateId::Failed,
            });
            sink.emit(&BootstrapEvent::Failed(err));
        }
        err
    }
}

// ───────────────────────────────────────────────────────────────
// Helpers
// ───────────────────────────────────────────────────────────────

/// Minimal HTTP/1.1 request for the HTTPS check.
pub fn http_probe_request(host: &str) -> String {
    format!("GET / HTTP/1.1\r\nHost: {host}\r\n\r\n")
}

/// The bytes up to the first CRLF, for logging request/status lines.
pub fn first_line(bytes: &[u8]) -> &str {
    let end = bytes
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(bytes.len());
    core::str::from_utf8(&bytes[..end]).unwrap_or("<binary>")
}

/// CA install, open, resolve, connect (plus the optional single retry).
///
/// Failures come back unrecorded; the caller moves the machine.
fn connect_secure<L: LinkPort, C: SecureChannelPort>(
    link: &mut L,
    channel: &mut C,
    credentials: &CredentialBundle,
    link_info: &LinkInfo,
    endpoint: &Endpoint,
    retry: bool,
    sink: &mut impl EventSink,
) -> Result<SocketAddr> {
    let chain = credentials.ca_chain();
    channel
        .set_root_ca_certificate(chain.as_pem())
        .map_err(BootstrapError::CertificateFailure)?;
    info!(
        "TLS: CA chain installed ({} cert(s), {} bytes, sha256:{})",
        chain.certificate_count(),
        chain.len(),
        chain.short_fingerprint()
    );
    sink.emit(&BootstrapEvent::CertificateInstalled {
        certificates: chain.certificate_count(),
        bytes: chain.len(),
    });

    channel
        .open(link_info)
        .map_err(BootstrapError::ChannelOpenFailure)?;

    let ip = link
        .resolve(&endpoint.host)
        .map_err(BootstrapError::ResolutionFailure)?;
    let peer = SocketAddr::new(ip, endpoint.port);

    info!("TLS: connecting to {} ({})", endpoint.host, peer);
    if let Err(first) = channel.connect(peer, &endpoint.host) {
        if !retry {
            return Err(BootstrapError::ChannelConnectFailure(first));
        }
        warn!("TLS: connect failed ({}), retrying once", first);
        sink.emit(&BootstrapEvent::ChannelRetry(first));
        channel
            .connect(peer, &endpoint.host)
            .map_err(BootstrapError::ChannelConnectFailure)?;
    }
    Ok(peer)
}

/// Write all of `request`, then read one chunk into `response`.
///
/// Returns `(sent, received)`.  `received` never exceeds `response.len()`.
fn exchange<C: SecureChannelPort>(
    channel: &mut C,
    request: &[u8],
    response: &mut [u8],
) -> Result<(usize, usize)> {
    let mut sent = 0;
    while sent < request.len() {
        match channel.send(&request[sent..]) {
            Ok(0) => {
                return Err(BootstrapError::ChannelIoFailure {
                    operation: "channel.send",
                    status: Status::WOULD_BLOCK,
                });
            }
            Ok(n) => sent += n.min(request.len() - sent),
            Err(status) => {
                return Err(BootstrapError::ChannelIoFailure {
                    operation: "channel.send",
                    status,
                });
            }
        }
    }

    let received = channel
        .recv(response)
        .map_err(|status| BootstrapError::ChannelIoFailure {
            operation: "channel.recv",
            status,
        })?;
    Ok((sent, received.min(response.len())))
}

// ───────────────────────────────────────────────────────────────
// Sequencer
// ───────────────────────────────────────────────────────────────

/// Drives association and secure-channel setup.
///
/// Owns the link and the channel exclusively; configuration and
/// credentials are shared read-only.
pub struct Sequencer<'a, L, C> {
    config: &'a BootstrapConfig,
    credentials: &'a CredentialBundle,
    link: L,
    channel: Option<C>,
    machine: Machine,
    link_info: Option<LinkInfo>,
    peer: Option<SocketAddr>,
}

impl<'a, L: LinkPort, C: SecureChannelPort> Sequencer<'a, L, C> {
    /// Validate the configuration and start the state machine in `Init`.
    pub fn new(
        config: &'a BootstrapConfig,
        credentials: &'a CredentialBundle,
        link: L,
        channel: C,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            credentials,
            link,
            channel: Some(channel),
            machine: Machine::new(),
            link_info: None,
            peer: None,
        })
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> StateId {
        self.machine.state()
    }

    pub fn failure(&self) -> Option<BootstrapError> {
        self.machine.ctx.failure
    }

    pub fn link_info(&self) -> Option<LinkInfo> {
        self.link_info
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn channel(&self) -> Option<&C> {
        self.channel.as_ref()
    }

    // ── Workflow ──────────────────────────────────────────────

    /// Scan (if enabled), associate and establish the secure channel.
    pub fn bring_up(&mut self, sink: &mut impl EventSink) -> Result<SocketAddr> {
        if self.config.scan_enabled {
            self.discover(sink)?;
        }
        self.associate(sink)?;
        self.establish_channel(sink)
    }

    /// Two-phase capped scan.
    ///
    /// The first call only counts, the second fills a buffer sized to
    /// `min(count, scan_cap)`.  Fewer records on the second call are
    /// accepted as-is.  An empty or failed scan is reported but is only
    /// fatal when `fail_on_empty_scan` is set.
    pub fn discover(&mut self, sink: &mut impl EventSink) -> Result<Vec<AccessPointRecord>> {
        self.machine.require(StateId::Init)?;

        info!("Scan: counting visible networks");
        let visible = match self.link.scan(&mut []) {
            Ok(n) => n,
            Err(status) => {
                warn!("Scan: count failed ({}), continuing", status);
                sink.emit(&BootstrapEvent::ScanFailed(status));
                0
            }
        };

        let wanted = visible.min(usize::from(self.config.scan_cap));
        let mut records = vec![AccessPointRecord::default(); wanted];
        let reported = if wanted == 0 {
            0
        } else {
            match self.link.scan(&mut records) {
                Ok(n) => n.min(wanted),
                Err(status) => {
                    warn!("Scan: listing failed ({}), continuing", status);
                    sink.emit(&BootstrapEvent::ScanFailed(status));
                    0
                }
            }
        };
        records.truncate(reported);

        // Per-network lines are the sink's to render.
        for ap in &records {
            sink.emit(&BootstrapEvent::AccessPoint(ap.clone()));
        }
        info!("{} networks available.", reported);
        sink.emit(&BootstrapEvent::ScanCompleted { visible, reported });

        if reported == 0 && self.config.fail_on_empty_scan {
            return Err(self
                .machine
                .fail(BootstrapError::LinkFailure(Status::NO_SSID), sink));
        }
        Ok(records)
    }

    /// Join the configured network and report its addressing.
    pub fn associate(&mut self, sink: &mut impl EventSink) -> Result<LinkInfo> {
        self.machine.require(StateId::Init)?;

        let creds = self.credentials;
        info!("Link: connecting to '{}' ({})", creds.ssid(), creds.security());
        if let Err(status) = self
            .link
            .connect(creds.ssid(), creds.passphrase(), creds.security())
        {
            return Err(self.machine.fail(BootstrapError::LinkFailure(status), sink));
        }

        let info = LinkInfo {
            mac: self.link.mac_address(),
            ip: self.link.ip_address(),
            netmask: self.link.netmask(),
            gateway: self.link.gateway(),
            rssi: self.link.rssi(),
        };
        info!("Link: up, {}", info);
        sink.emit(&BootstrapEvent::LinkUp(info));
        self.link_info = Some(info);

        self.machine.advance(StateId::LinkUp, sink)?;
        Ok(info)
    }

    /// Bring the secure channel up to the broker.  A failed connect is
    /// retried exactly once with no backoff when `retry_channel_connect` is
    /// set.
    pub fn establish_channel(&mut self, sink: &mut impl EventSink) -> Result<SocketAddr> {
        self.machine.require(StateId::LinkUp)?;
        let (Some(link_info), Some(channel)) = (self.link_info, self.channel.as_mut()) else {
            return Err(BootstrapError::OutOfSequence {
                expected: StateId::LinkUp,
                actual: self.machine.state(),
            });
        };

        let config = self.config;
        let peer = match connect_secure(
            &mut self.link,
            channel,
            self.credentials,
            &link_info,
            &config.broker,
            config.retry_channel_connect,
            sink,
        ) {
            Ok(peer) => peer,
            Err(err) => return Err(self.machine.fail(err, sink)),
        };

        info!("TLS: channel established with {}", peer);
        sink.emit(&BootstrapEvent::ChannelEstablished(peer));
        self.peer = Some(peer);
        self.machine.advance(StateId::SecureUp, sink)?;
        Ok(peer)
    }

    /// HTTPS check against `https_check`, on `channel` rather than the
    /// broker channel.
    ///
    /// `channel` is brought up the same way as the broker channel, `request`
    /// is sent and one response chunk is read into `response`, then the
    /// channel is closed.  Returns the number of bytes received.
    pub fn probe<P: SecureChannelPort>(
        &mut self,
        mut channel: P,
        request: &[u8],
        response: &mut [u8],
        sink: &mut impl EventSink,
    ) -> Result<usize> {
        self.machine.require(StateId::SecureUp)?;
        let config = self.config;
        let Some(endpoint) = config.https_check.as_ref() else {
            return Err(BootstrapError::Config("no https_check endpoint configured"));
        };
        let Some(link_info) = self.link_info else {
            return Err(BootstrapError::OutOfSequence {
                expected: StateId::SecureUp,
                actual: self.machine.state(),
            });
        };

        if let Err(err) = connect_secure(
            &mut self.link,
            &mut channel,
            self.credentials,
            &link_info,
            endpoint,
            config.retry_channel_connect,
            sink,
        ) {
            return Err(self.machine.fail(err, sink));
        }

        let outcome = exchange(&mut channel, request, response);
        if let Err(status) = channel.close() {
            warn!("TLS: close after check failed ({})", status);
        }
        match outcome {
            Ok((sent, received)) => {
                info!("TLS: sent {} [{}]", sent, first_line(request));
                info!("TLS: recv {} [{}]", received, first_line(&response[..received]));
                sink.emit(&BootstrapEvent::ProbeExchanged { sent, received });
                Ok(received)
            }
            Err(err) => Err(self.machine.fail(err, sink)),
        }
    }

    /// Hand the channel to a message client and open the broker session.
    ///
    /// An empty configured client id is replaced by one derived from the
    /// station MAC.
    pub fn bind_client<M, F>(mut self, bind: F, sink: &mut impl EventSink) -> Result<Session<'a, L, M>>
    where
        M: MessageClientPort,
        F: FnOnce(C) -> M,
    {
        self.machine.require(StateId::SecureUp)?;
        let Some(channel) = self.channel.take() else {
            return Err(BootstrapError::OutOfSequence {
                expected: StateId::SecureUp,
                actual: self.machine.state(),
            });
        };
        let mut client = bind(channel);

        let mut params = self.config.session.clone();
        if params.client_id.is_empty() {
            params.client_id = device_id::client_id(&self.link.mac_address());
        }
        info!(
            "MQTT: connecting as '{}' (protocol level {}, keep-alive {}s, clean={})",
            params.client_id,
            params.protocol_version.level(),
            params.keep_alive_secs,
            params.clean_session
        );
        if let Err(status) = client.connect(&params) {
            return Err(self
                .machine
                .fail(BootstrapError::BrokerConnectFailure(status), sink));
        }
        sink.emit(&BootstrapEvent::BrokerConnected);
        self.machine.advance(StateId::BrokerUp, sink)?;

        Ok(Session {
            config: self.config,
            link: self.link,
            client,
            machine: self.machine,
            client_id: params.client_id,
            sequence: 0,
        })
    }

    /// Close the channel and drop the association.  Errors are logged.
    pub fn shutdown(mut self) -> L {
        if let Some(mut channel) = self.channel.take() {
            if let Err(status) = channel.close() {
                warn!("TLS: close failed ({})", status);
            }
        }
        if let Err(status) = self.link.disconnect() {
            warn!("Link: disconnect failed ({})", status);
        }
        self.link
    }
}

// ───────────────────────────────────────────────────────────────
// Session
// ───────────────────────────────────────────────────────────────

/// Outcome of one steady-state cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub sequence: u32,
    /// `Err(PublishFailure)` when the publish was rejected; the cycle
    /// still yielded.
    pub publish: Result<()>,
}

/// A broker session bound over the secure channel.
pub struct Session<'a, L, M> {
    config: &'a BootstrapConfig,
    link: L,
    client: M,
    machine: Machine,
    client_id: ClientIdString,
    sequence: u32,
}

impl<L: LinkPort, M: MessageClientPort> Session<'_, L, M> {
    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> StateId {
        self.machine.state()
    }

    pub fn failure(&self) -> Option<BootstrapError> {
        self.machine.ctx.failure
    }

    pub fn context(&self) -> &FsmContext {
        &self.machine.ctx
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client(&self) -> &M {
        &self.client
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    // ── Subscriptions ─────────────────────────────────────────

    /// Register `handler` for `filter`.
    ///
    /// The first successful subscription moves the session into
    /// `SteadyState`.  Subscribing again later replaces the handler for
    /// that filter.  A rejected subscription fails the session but leaves
    /// the broker and channel connections in place.
    pub fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        let state = self.machine.state();
        if state != StateId::BrokerUp && state != StateId::SteadyState {
            return Err(BootstrapError::OutOfSequence {
                expected: StateId::BrokerUp,
                actual: state,
            });
        }

        if let Err(status) = self.client.subscribe(filter, qos, handler) {
            return Err(self
                .machine
                .fail(BootstrapError::SubscribeFailure(status), sink));
        }
        info!("MQTT: subscribed to '{}' ({:?})", filter, qos);
        sink.emit(&BootstrapEvent::Subscribed);

        if state == StateId::BrokerUp {
            self.machine.advance(StateId::SteadyState, sink)?;
        }
        Ok(())
    }

    /// Subscribe using the configured filter and QoS.
    pub fn subscribe_configured(
        &mut self,
        handler: MessageHandler,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        let sub = &self.config.subscription;
        self.subscribe(&sub.filter, sub.qos, handler, sink)
    }

    // ── Steady state ──────────────────────────────────────────

    /// Publish one message, then yield for the configured interval.
    ///
    /// A publish failure is reported and the cycle still yields.  A yield
    /// failure means the session is gone and fails it.
    pub fn run_cycle(&mut self, sink: &mut impl EventSink) -> Result<CycleReport> {
        self.machine.require(StateId::SteadyState)?;

        self.sequence = self.sequence.wrapping_add(1);
        let sequence = self.sequence;
        let publish = &self.config.publish;
        let payload = format!("{} #{}", publish.payload, sequence);
        let message = Message {
            topic: &publish.topic,
            payload: payload.as_bytes(),
            qos: publish.qos,
            retained: publish.retained,
            duplicate: false,
        };

        let outcome = self.client.publish(&message);
        self.machine.ctx.record_publish(outcome);
        match outcome {
            Ok(()) => sink.emit(&BootstrapEvent::Published { sequence }),
            Err(status) => {
                warn!(
                    "MQTT: {} (message #{}), continuing",
                    BootstrapError::PublishFailure(status),
                    sequence
                );
                sink.emit(&BootstrapEvent::PublishFailed { sequence, status });
            }
        }

        let budget = Duration::from_millis(u64::from(self.config.publish_interval_ms));
        if let Err(status) = self.client.yield_for(budget) {
            return Err(self
                .machine
                .fail(BootstrapError::ConnectionLost(status), sink));
        }
        self.machine.ctx.cycles += 1;

        Ok(CycleReport {
            sequence,
            publish: outcome.map_err(BootstrapError::PublishFailure),
        })
    }

    /// Run cycles until `max_cycles` complete (forever if `None`) or a
    /// fatal error occurs.  Returns the number of completed cycles.
    pub fn run(&mut self, max_cycles: Option<u32>, sink: &mut impl EventSink) -> Result<u32> {
        let mut completed = 0;
        while max_cycles.is_none_or(|max| completed < max) {
            self.run_cycle(sink)?;
            completed += 1;
        }
        Ok(completed)
    }

    /// Close the broker session and drop the association.  Errors are logged.
    pub fn shutdown(mut self) -> (L, M) {
        if let Err(status) = self.client.disconnect() {
            warn!("MQTT: disconnect failed ({})", status);
        }
        if let Err(status) = self.link.disconnect() {
            warn!("Link: disconnect failed ({})", status);
        }
        (self.link, self.client)
    }
}
