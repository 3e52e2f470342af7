//! Session state machine and packet pipeline
//!
//! One [`Session`] owns everything a connection needs: the handshake state
//! machine, both keystreams, the dual sequence trackers, and the reassembly
//! table. It is a synchronous core: the async loop in
//! [`crate::net::client`] feeds it datagrams and timer ticks and transmits
//! whatever it emits, which keeps every wire rule testable without a
//! socket.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::crypto::Isaac;
use crate::error::{IngressCounters, ProtocolError, SessionError};
use crate::net::reassembly::{CompletedMessage, Reassembler};
use crate::net::reliability::{Ingress, InboundTracker, OutboundTracker};
use crate::protocol::fragment::{fragment_message, Fragment};
use crate::protocol::handshake::{build_login_payload, ConnectRequest, Credentials};
use crate::protocol::packet::{
    recover_checksum_key, verify_plain_checksum, EchoResponse, OptionalHeaders, Packet,
    PacketFlags, PacketHeader, HEADER_SIZE, MAX_PACKET_SIZE,
};

/// Consecutive keystream mismatches tolerated before the session is
/// declared desynchronized
const DESYNC_TOLERANCE: u32 = 5;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No traffic yet
    Unconfigured,
    /// LoginRequest sent, waiting for the server's ConnectRequest
    LoginSent,
    /// ConnectRequest received, ConnectResponse not yet due
    ConnectReceived,
    /// Handshake complete; encrypted checksums mandatory
    Authenticated,
    /// Disconnect sent, draining
    Disconnecting,
    /// Terminal
    Dead,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unconfigured => "Unconfigured",
            SessionState::LoginSent => "LoginSent",
            SessionState::ConnectReceived => "ConnectReceived",
            SessionState::Authenticated => "Authenticated",
            SessionState::Disconnecting => "Disconnecting",
            SessionState::Dead => "Dead",
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, SessionState::Disconnecting | SessionState::Dead)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The application asked
    Requested,
    /// The peer sent the Disconnect flag
    PeerDisconnected,
    /// No ConnectRequest arrived in time
    HandshakeTimeout,
    /// Nothing heard from the peer for the inactivity limit
    InactivityTimeout,
    /// The keystreams no longer agree
    DecryptionDesync,
    /// Retention or reassembly outgrew its cap
    ResourceCap,
    /// The transport failed underneath us
    TransportClosed,
}

/// Lifecycle and telemetry events surfaced to the application
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake complete; game traffic may flow
    Connected,
    /// Peer time-sync applied; value is the server clock in seconds
    TimeSyncApplied(f64),
    /// An echo we initiated came back
    EchoRoundTripMeasured(Duration),
    /// The peer asked us to retransmit this many packets
    PeerRequestedRetransmit(usize),
    /// Session over
    Disconnected(DisconnectReason),
}

/// What the session wants done after ingesting a datagram or a tick
#[derive(Debug, PartialEq)]
pub enum SessionOutput {
    /// Datagram to send to the game endpoint
    Transmit(Vec<u8>),
    /// Datagram to send to a specific endpoint (activation traffic)
    TransmitTo(Vec<u8>, SocketAddr),
    /// A reassembled application message
    Deliver(CompletedMessage),
    /// A lifecycle event for the application
    Event(SessionEvent),
}

/// Client-side protocol session
pub struct Session {
    state: SessionState,
    peer: SocketAddr,
    /// ConnectResponse goes to the peer's port + 1
    activation: SocketAddr,
    client_id: u16,
    cookie: u64,
    server_time: Option<f64>,

    keystream_c2s: Option<Isaac>,
    keystream_s2c: Option<Isaac>,
    desync_run: u32,

    outbound: OutboundTracker,
    inbound: InboundTracker,
    reassembler: Reassembler,
    fragment_sequence: u32,
    message_id: u32,

    /// Peer-imposed outbound budget, bytes per interval
    flow: Option<(u32, Duration)>,
    /// Pending echo we initiated, by client-time value
    echo_sent: Option<(f32, Instant)>,
    /// Deadline for sending the delayed ConnectResponse
    activation_due: Option<Instant>,
    handshake_deadline: Option<Instant>,

    started: Instant,
    last_sent: Instant,
    last_received: Instant,
    counters: IngressCounters,

    config: ClientConfig,
}

impl Session {
    pub fn new(peer: SocketAddr, config: ClientConfig, now: Instant) -> Self {
        let mut activation = peer;
        activation.set_port(peer.port().wrapping_add(1));
        Self {
            state: SessionState::Unconfigured,
            peer,
            activation,
            client_id: 0,
            cookie: 0,
            server_time: None,
            keystream_c2s: None,
            keystream_s2c: None,
            desync_run: 0,
            // Sequences 0 and 1 belong to LoginRequest and ConnectResponse.
            outbound: OutboundTracker::new(2),
            inbound: InboundTracker::new(),
            reassembler: Reassembler::new(
                config.reassembly_ttl(),
                config.max_pending_messages,
            ),
            fragment_sequence: 1,
            message_id: 1,
            flow: None,
            echo_sent: None,
            activation_due: None,
            handshake_deadline: None,
            started: now,
            last_sent: now,
            last_received: now,
            counters: IngressCounters::default(),
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn client_id(&self) -> u16 {
        self.client_id
    }

    pub fn counters(&self) -> &IngressCounters {
        &self.counters
    }

    pub fn server_time(&self) -> Option<f64> {
        self.server_time
    }

    /// Peer-imposed flow bound, if any
    pub fn flow_limit(&self) -> Option<(u32, Duration)> {
        self.flow
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "session state changed");
            self.state = next;
        }
    }

    /// Rolling header timestamp: elapsed half-seconds since session start
    fn wire_time(&self, now: Instant) -> u16 {
        (now.duration_since(self.started).as_millis() / 500) as u16
    }

    // ============ Egress ============

    /// Build the LoginRequest datagram (sequence 0, cleartext).
    pub fn begin_login(&mut self, creds: &Credentials, now: Instant) -> Vec<SessionOutput> {
        let payload = build_login_payload(&self.config.client_version, creds, 0);
        let mut packet = Packet {
            header: PacketHeader {
                sequence: 0,
                time: self.wire_time(now),
                ..Default::default()
            },
            optional: OptionalHeaders {
                login_request: Some(payload),
                ..Default::default()
            },
            fragments: Vec::new(),
        };
        let bytes = packet.build(None);
        self.set_state(SessionState::LoginSent);
        self.handshake_deadline = Some(now + self.config.handshake_timeout());
        self.last_sent = now;
        vec![SessionOutput::Transmit(bytes)]
    }

    /// Finalize a packet: stamp sequence/id/time, piggyback the ACK
    /// watermark, mask the checksum, and retain for retransmission.
    fn seal(&mut self, mut packet: Packet, now: Instant) -> Vec<u8> {
        packet.header.sequence = self.outbound.next_sequence();
        packet.header.client_id = self.client_id;
        packet.header.time = self.wire_time(now);

        // Piggyback the current watermark on any sequenced packet that is
        // not already carrying one.
        if packet.optional.ack_sequence.is_none() && self.inbound.watermark() > 0 {
            packet.optional.ack_sequence = Some(self.inbound.watermark());
            self.inbound.ack_sent();
        } else if packet.optional.ack_sequence.is_some() {
            self.inbound.ack_sent();
        }

        let key = self.keystream_c2s.as_mut().map(|k| {
            packet.header.flags |= PacketFlags::ENCRYPTED_CHECKSUM;
            k.next()
        });

        let bytes = packet.build(key);
        if let Err(err) =
            self.outbound
                .retain(packet.header.sequence, bytes.clone(), key, now)
        {
            warn!(%err, "outbound retention over cap");
        }
        self.last_sent = now;
        trace!(
            sequence = packet.header.sequence,
            flags = ?packet.header.flags,
            len = bytes.len(),
            "sealed packet"
        );
        bytes
    }

    /// Fragment and packetize one application message. Each fragment rides
    /// its own datagram.
    pub fn send_message(
        &mut self,
        payload: &[u8],
        queue: u16,
        now: Instant,
    ) -> Result<Vec<SessionOutput>, SessionError> {
        if self.state != SessionState::Authenticated {
            return Err(SessionError::WrongState {
                required: SessionState::Authenticated.name(),
                actual: self.state.name(),
            });
        }

        let fragment_sequence = self.fragment_sequence;
        self.fragment_sequence = self.fragment_sequence.wrapping_add(1);
        let message_id = self.message_id;
        self.message_id = self.message_id.wrapping_add(1);

        let fragments = fragment_message(fragment_sequence, message_id, queue, payload);
        let mut outputs = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let packet = Packet {
                header: PacketHeader::default(),
                optional: OptionalHeaders::default(),
                fragments: vec![fragment],
            };
            outputs.push(SessionOutput::Transmit(self.seal(packet, now)));
        }
        Ok(outputs)
    }

    /// Header-only keep-alive carrying the ACK watermark.
    pub fn keepalive(&mut self, now: Instant) -> SessionOutput {
        let packet = Packet {
            optional: OptionalHeaders {
                ack_sequence: Some(self.inbound.watermark()),
                ..Default::default()
            },
            ..Default::default()
        };
        SessionOutput::Transmit(self.seal(packet, now))
    }

    /// Solo ACK for the coalescing deadline.
    fn solo_ack(&mut self, watermark: u32, now: Instant) -> SessionOutput {
        let packet = Packet {
            optional: OptionalHeaders {
                ack_sequence: Some(watermark),
                ..Default::default()
            },
            ..Default::default()
        };
        SessionOutput::Transmit(self.seal(packet, now))
    }

    /// Ask the peer to resend the listed sequences.
    fn request_retransmit(&mut self, missing: Vec<u32>, now: Instant) -> SessionOutput {
        let packet = Packet {
            optional: OptionalHeaders {
                request_retransmit: Some(missing),
                ..Default::default()
            },
            ..Default::default()
        };
        SessionOutput::Transmit(self.seal(packet, now))
    }

    /// Initiate an echo measurement.
    pub fn send_echo(&mut self, now: Instant) -> SessionOutput {
        let client_time = now.duration_since(self.started).as_secs_f32();
        self.echo_sent = Some((client_time, now));
        let packet = Packet {
            optional: OptionalHeaders {
                echo_request: Some(client_time),
                ..Default::default()
            },
            ..Default::default()
        };
        SessionOutput::Transmit(self.seal(packet, now))
    }

    /// Clean disconnect: emit the flagged packet and go terminal.
    pub fn disconnect(&mut self, now: Instant) -> Vec<SessionOutput> {
        let mut outputs = Vec::new();
        if self.state.is_live() && self.state != SessionState::Unconfigured {
            let packet = Packet {
                header: PacketHeader {
                    flags: PacketFlags::DISCONNECT,
                    ..Default::default()
                },
                ..Default::default()
            };
            outputs.push(SessionOutput::Transmit(self.seal(packet, now)));
        }
        outputs.push(SessionOutput::Event(SessionEvent::Disconnected(
            DisconnectReason::Requested,
        )));
        self.teardown();
        outputs
    }

    fn teardown(&mut self) {
        self.set_state(SessionState::Dead);
        self.outbound.clear();
        self.inbound.clear();
        self.reassembler.clear();
        self.activation_due = None;
        self.handshake_deadline = None;
    }

    // ============ Timers ============

    /// Periodic housekeeping; the driving loop calls this a few times per
    /// coalescing window.
    pub fn tick(&mut self, now: Instant) -> Vec<SessionOutput> {
        let mut outputs = Vec::new();
        if self.state == SessionState::Dead {
            return outputs;
        }

        // Handshake timeout fires in any pre-authenticated state.
        if let Some(deadline) = self.handshake_deadline {
            if now >= deadline && self.state != SessionState::Authenticated {
                warn!("handshake timed out");
                self.teardown();
                outputs.push(SessionOutput::Event(SessionEvent::Disconnected(
                    DisconnectReason::HandshakeTimeout,
                )));
                return outputs;
            }
        }

        // The delayed ConnectResponse to the activation endpoint. Nothing
        // else shares its tick; game housekeeping starts next round.
        if let Some(due) = self.activation_due {
            if now >= due && self.state == SessionState::ConnectReceived {
                self.activation_due = None;
                outputs.push(self.connect_response(now));
                return outputs;
            }
        }

        if self.state != SessionState::Authenticated {
            return outputs;
        }

        // Inactivity teardown.
        if now.duration_since(self.last_received) >= self.config.inactivity_timeout() {
            warn!("session inactive, tearing down");
            self.teardown();
            outputs.push(SessionOutput::Event(SessionEvent::Disconnected(
                DisconnectReason::InactivityTimeout,
            )));
            return outputs;
        }

        // Coalesced ACK.
        if let Some(watermark) = self.inbound.ack_ready(now, self.config.ack_window()) {
            outputs.push(self.solo_ack(watermark, now));
        }

        // Aged gaps become retransmit requests.
        if let Some(missing) = self
            .inbound
            .missing(now, self.config.retransmit_threshold())
        {
            outputs.push(self.request_retransmit(missing, now));
        }

        // Keep-alive when the line has gone quiet.
        if now.duration_since(self.last_sent) >= self.config.keepalive_interval() {
            outputs.push(self.keepalive(now));
        }

        // Expire abandoned partial messages.
        self.reassembler.sweep(now);

        outputs
    }

    /// Build and account the ConnectResponse (sequence 1, cleartext, to the
    /// activation endpoint).
    fn connect_response(&mut self, now: Instant) -> SessionOutput {
        let mut packet = Packet {
            header: PacketHeader {
                sequence: 1,
                time: self.wire_time(now),
                ..Default::default()
            },
            optional: OptionalHeaders {
                connect_response: Some(self.cookie),
                ..Default::default()
            },
            fragments: Vec::new(),
        };
        let bytes = packet.build(None);
        self.set_state(SessionState::Authenticated);
        self.handshake_deadline = None;
        self.last_sent = now;
        debug!(endpoint = %self.activation, "sending connect response");
        SessionOutput::TransmitTo(bytes, self.activation)
    }

    // ============ Ingress ============

    /// Ingest one raw datagram. Recoverable failures are counted and the
    /// datagram dropped; outputs carry everything the loop must do next.
    pub fn handle_datagram(&mut self, datagram: &[u8], now: Instant) -> Vec<SessionOutput> {
        if self.state == SessionState::Dead {
            return Vec::new();
        }
        let mut outputs = Vec::new();
        self.ingest(datagram, now, &mut outputs);

        // Anything held behind the gap may be ready now.
        while let Some((sequence, held)) = self.inbound.take_ready() {
            trace!(sequence, "processing held datagram");
            self.ingest(&held, now, &mut outputs);
            if self.state == SessionState::Dead {
                break;
            }
        }
        outputs
    }

    fn ingest(&mut self, datagram: &[u8], now: Instant, outputs: &mut Vec<SessionOutput>) {
        let packet = match Packet::parse(datagram) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(%err, "dropping datagram");
                self.counters.record(&err);
                return;
            }
        };

        match self.inbound.classify(packet.header.sequence) {
            Ingress::Process => {}
            Ingress::Hold => {
                trace!(sequence = packet.header.sequence, "holding ahead-of-sequence datagram");
                if let Err(err) = self
                    .inbound
                    .hold(packet.header.sequence, datagram.to_vec(), now)
                {
                    warn!(%err, "inbound hold over cap");
                    self.teardown();
                    outputs.push(SessionOutput::Event(SessionEvent::Disconnected(
                        DisconnectReason::ResourceCap,
                    )));
                }
                return;
            }
            Ingress::Duplicate => {
                self.counters.duplicates += 1;
                return;
            }
            Ingress::OutOfWindow => {
                self.counters.duplicates += 1;
                debug!(sequence = packet.header.sequence, "sequence outside window");
                return;
            }
        }

        if !self.verify(&packet, datagram) {
            return;
        }

        // The packet is authentic: it advances the contiguous watermark.
        if self.state == SessionState::LoginSent
            && packet.optional.connect_request.is_some()
        {
            self.inbound.adopt(packet.header.sequence, now);
        } else {
            self.inbound.advance(packet.header.sequence, now);
        }
        self.last_received = now;
        self.desync_run = 0;

        self.apply(packet, now, outputs);
    }

    /// Checksum verification, cleartext or masked depending on flags and
    /// state. Returns false when the datagram must be dropped.
    fn verify(&mut self, packet: &Packet, datagram: &[u8]) -> bool {
        let payload = &datagram[HEADER_SIZE..];
        let encrypted = packet
            .header
            .flags
            .contains(PacketFlags::ENCRYPTED_CHECKSUM);

        if !encrypted {
            // Post-handshake cleartext traffic is a state violation.
            if self.state == SessionState::Authenticated
                && !packet.header.flags.is_handshake()
            {
                self.counters.record(&ProtocolError::StateViolation {
                    flags: packet.header.flags.bits(),
                    state: self.state.name(),
                });
                return false;
            }
            return match verify_plain_checksum(&packet.header, payload) {
                Ok(()) => true,
                Err(err) => {
                    debug!(%err, sequence = packet.header.sequence, "bad cleartext checksum");
                    self.counters.record(&err);
                    false
                }
            };
        }

        let Some(keystream) = self.keystream_s2c.as_mut() else {
            // Encrypted flag before the handshake seeded anything.
            self.counters.record(&ProtocolError::StateViolation {
                flags: packet.header.flags.bits(),
                state: self.state.name(),
            });
            return false;
        };

        let recovered = match recover_checksum_key(&packet.header, payload) {
            Ok(key) => key,
            Err(err) => {
                self.counters.record(&err);
                return false;
            }
        };
        let expected = keystream.peek();
        if recovered == expected {
            keystream.next();
            return true;
        }

        // A mismatch is either corruption (retransmission will heal it) or
        // a dead keystream. A run of them means the latter.
        self.desync_run += 1;
        self.counters.record(&ProtocolError::ChecksumMismatch {
            computed: expected,
            carried: recovered,
        });
        warn!(
            sequence = packet.header.sequence,
            run = self.desync_run,
            "keystream word mismatch"
        );
        false
    }

    /// React to a verified packet's headers and fragments.
    fn apply(&mut self, packet: Packet, now: Instant, outputs: &mut Vec<SessionOutput>) {
        let flags = packet.header.flags;

        if flags.contains(PacketFlags::DISCONNECT) {
            self.teardown();
            outputs.push(SessionOutput::Event(SessionEvent::Disconnected(
                DisconnectReason::PeerDisconnected,
            )));
            return;
        }

        if let Some(ack) = packet.optional.ack_sequence {
            self.outbound.acknowledge(ack);
        }

        if let Some(ss) = packet.optional.server_switch {
            debug!(sequence = ss.sequence, kind = ss.kind, "server switch notice");
        }

        if let Some(cr) = packet.optional.connect_request {
            self.on_connect_request(cr, now);
        }

        if let Some(missing) = packet.optional.request_retransmit {
            outputs.push(SessionOutput::Event(SessionEvent::PeerRequestedRetransmit(
                missing.len(),
            )));
            for sequence in missing {
                if let Some(bytes) = self.retransmit(sequence) {
                    self.last_sent = now;
                    outputs.push(SessionOutput::Transmit(bytes));
                } else {
                    debug!(sequence, "peer asked for a packet no longer retained");
                }
            }
        }

        if let Some(ts) = packet.optional.time_sync {
            self.server_time = Some(ts);
            outputs.push(SessionOutput::Event(SessionEvent::TimeSyncApplied(ts)));
        }

        if let Some(client_time) = packet.optional.echo_request {
            // Answer the peer's ping in kind.
            let reply = Packet {
                optional: OptionalHeaders {
                    echo_response: Some(EchoResponse {
                        client_time,
                        holding_time: 0.0,
                    }),
                    ..Default::default()
                },
                ..Default::default()
            };
            outputs.push(SessionOutput::Transmit(self.seal(reply, now)));
        }

        if packet.optional.echo_response.is_some() {
            if let Some((_, sent_at)) = self.echo_sent.take() {
                outputs.push(SessionOutput::Event(SessionEvent::EchoRoundTripMeasured(
                    now.duration_since(sent_at),
                )));
            }
        }

        if let Some(fc) = packet.optional.flow {
            self.flow = Some((
                fc.bytes,
                Duration::from_millis(u64::from(fc.interval) * 500),
            ));
            debug!(bytes = fc.bytes, interval = fc.interval, "flow bound updated");
        }

        self.deliver_fragments(packet.fragments, now, outputs);
    }

    /// Seeds, cookie, and client id arrive; the ConnectResponse is
    /// scheduled after the activation delay.
    fn on_connect_request(&mut self, cr: ConnectRequest, now: Instant) {
        if self.state != SessionState::LoginSent {
            debug!(state = %self.state, "ignoring connect request in this state");
            return;
        }
        debug!(
            client_id = cr.client_id,
            cookie = cr.cookie,
            "connect request received"
        );
        self.client_id = cr.client_id;
        self.cookie = cr.cookie;
        self.server_time = Some(cr.server_time);
        self.keystream_s2c = Some(Isaac::new(cr.server_seed));
        self.keystream_c2s = Some(Isaac::new(cr.client_seed));
        self.activation_due = Some(now + self.config.activation_delay());
        self.set_state(SessionState::ConnectReceived);
    }

    /// Rebuild a retained packet for retransmission: the Retransmission
    /// flag is added and the checksum recomputed with the cached keystream
    /// word, so no new word is consumed on either side.
    fn retransmit(&mut self, sequence: u32) -> Option<Vec<u8>> {
        let retained = self.outbound.retained(sequence)?;
        let mut packet = Packet::parse(&retained.bytes).ok()?;
        packet.header.flags |= PacketFlags::RETRANSMISSION;
        Some(packet.build(retained.xor_key))
    }

    fn deliver_fragments(
        &mut self,
        fragments: Vec<Fragment>,
        now: Instant,
        outputs: &mut Vec<SessionOutput>,
    ) {
        let mut completed = Vec::new();
        for fragment in fragments {
            match self.reassembler.accept(&fragment.header, &fragment.data, now) {
                Ok(Some(done)) => completed.push(done),
                Ok(None) => {}
                Err(err) => {
                    warn!(%err, "reassembly over cap");
                    self.teardown();
                    outputs.push(SessionOutput::Event(SessionEvent::Disconnected(
                        DisconnectReason::ResourceCap,
                    )));
                    return;
                }
            }
        }
        // Two completions out of one datagram deliver in fragment-sequence
        // order.
        completed.sort_by_key(|m| m.fragment_sequence);
        for message in completed {
            outputs.push(SessionOutput::Deliver(message));
        }
    }

    /// First Connected event belongs to the loop once the ConnectResponse
    /// is on the wire; exposed so the loop can emit it after transmitting.
    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Keystream desync past the tolerance is terminal.
    pub fn desync_exceeded(&self) -> bool {
        self.desync_run >= DESYNC_TOLERANCE
    }

    /// Terminate after a desync run.
    pub fn fail_desync(&mut self) -> SessionOutput {
        self.teardown();
        SessionOutput::Event(SessionEvent::Disconnected(
            DisconnectReason::DecryptionDesync,
        ))
    }

    /// Largest application payload that fits one datagram budget
    pub fn max_datagram(&self) -> usize {
        MAX_PACKET_SIZE
    }
}
