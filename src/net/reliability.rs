//! Sequence tracking and retransmission
//!
//! Two independent sequence spaces per session: the per-packet counter that
//! the ACK/NAK machinery runs on, and the fragment-sequence that reassembly
//! keys on (see [`crate::net::reassembly`]). This module owns the packet
//! side: assigning outbound sequences, retaining sent datagrams until they
//! are acknowledged, holding out-of-order arrivals until the gap fills, and
//! aging gaps into retransmit requests.
//!
//! Sequence zero is the pre-handshake space; such packets bypass tracking.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::SessionError;

/// Ceiling on retained-plus-held bytes before the session is torn down
pub const MEMORY_CAP_BYTES: usize = 4 * 1024 * 1024;

/// How far ahead of the expected sequence a packet may be held
pub const SEQUENCE_WINDOW: u32 = 512;

/// Compare wrapping 32-bit sequences: `a` vs `b` with wraparound respected.
/// Only meaningful while the real distance stays under `u32::MAX / 2`.
pub fn seq_cmp(a: u32, b: u32) -> Ordering {
    (a.wrapping_sub(b) as i32).cmp(&0)
}

/// What to do with an arriving sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingress {
    /// The next expected packet; process it now
    Process,
    /// Ahead of the expected sequence; hold until the gap fills
    Hold,
    /// At or behind the contiguous watermark; drop
    Duplicate,
    /// Too far ahead to be plausible; drop
    OutOfWindow,
}

/// One retained outbound datagram
#[derive(Debug, Clone)]
pub struct RetainedPacket {
    pub bytes: Vec<u8>,
    /// Keystream word the checksum was masked with, if any. Reused verbatim
    /// on retransmission so no extra word is consumed.
    pub xor_key: Option<u32>,
    pub sent_at: Instant,
}

/// Outbound side: sequence assignment and retransmit retention
#[derive(Debug)]
pub struct OutboundTracker {
    next_sequence: u32,
    retained: BTreeMap<u32, RetainedPacket>,
    retained_bytes: usize,
}

impl OutboundTracker {
    /// Start assigning at `first` (the handshake consumes 0 and 1).
    pub fn new(first: u32) -> Self {
        Self {
            next_sequence: first,
            retained: BTreeMap::new(),
            retained_bytes: 0,
        }
    }

    /// Claim the next outbound sequence
    pub fn next_sequence(&mut self) -> u32 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }

    /// Sequence the next call to [`next_sequence`] will hand out
    pub fn peek_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn retained_bytes(&self) -> usize {
        self.retained_bytes
    }

    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }

    /// Retain a sent datagram until the peer acknowledges it.
    pub fn retain(
        &mut self,
        sequence: u32,
        bytes: Vec<u8>,
        xor_key: Option<u32>,
        now: Instant,
    ) -> Result<(), SessionError> {
        self.retained_bytes += bytes.len();
        if self.retained_bytes > MEMORY_CAP_BYTES {
            return Err(SessionError::MemoryCapExceeded {
                bytes: self.retained_bytes,
            });
        }
        self.retained.insert(
            sequence,
            RetainedPacket {
                bytes,
                xor_key,
                sent_at: now,
            },
        );
        Ok(())
    }

    /// Drop every retained packet at or below `ack`.
    pub fn acknowledge(&mut self, ack: u32) {
        let acked: Vec<u32> = self
            .retained
            .keys()
            .copied()
            .filter(|seq| seq_cmp(*seq, ack) != Ordering::Greater)
            .collect();
        for seq in acked {
            if let Some(packet) = self.retained.remove(&seq) {
                self.retained_bytes -= packet.bytes.len();
                trace!(sequence = seq, ack, "retired retained packet");
            }
        }
    }

    /// Look up a retained packet for retransmission
    pub fn retained(&self, sequence: u32) -> Option<&RetainedPacket> {
        self.retained.get(&sequence)
    }

    /// Release all retention (session teardown)
    pub fn clear(&mut self) {
        self.retained.clear();
        self.retained_bytes = 0;
    }
}

/// Inbound side: contiguity tracking and gap aging
#[derive(Debug, Default)]
pub struct InboundTracker {
    /// Highest sequence processed contiguously; zero until first packet
    watermark: u32,
    /// Raw datagrams ahead of the watermark, keyed by sequence
    held: BTreeMap<u32, Vec<u8>>,
    held_bytes: usize,
    /// When the current gap opened, for the NAK threshold
    gap_since: Option<Instant>,
    /// Sequences already requested, so a NAK is not repeated every tick
    nak_outstanding: bool,
    /// When an un-acked processed packet is oldest, for ACK coalescing
    ack_due: Option<Instant>,
}

impl InboundTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest contiguously processed sequence
    pub fn watermark(&self) -> u32 {
        self.watermark
    }

    pub fn held_bytes(&self) -> usize {
        self.held_bytes
    }

    /// Classify an arriving sequence against the expected one.
    pub fn classify(&self, sequence: u32) -> Ingress {
        if sequence == 0 {
            // Pre-handshake packets are not sequenced.
            return Ingress::Process;
        }
        let expected = self.watermark.wrapping_add(1);
        match seq_cmp(sequence, expected) {
            Ordering::Equal => Ingress::Process,
            Ordering::Less => Ingress::Duplicate,
            Ordering::Greater => {
                if sequence.wrapping_sub(expected) > SEQUENCE_WINDOW {
                    Ingress::OutOfWindow
                } else {
                    Ingress::Hold
                }
            }
        }
    }

    /// Record that `sequence` was processed in order.
    pub fn advance(&mut self, sequence: u32, now: Instant) {
        if sequence == 0 {
            return;
        }
        self.watermark = sequence;
        if self.ack_due.is_none() {
            self.ack_due = Some(now);
        }
        if self.held.is_empty() {
            self.gap_since = None;
            self.nak_outstanding = false;
        }
    }

    /// First contact: adopt the peer's starting sequence so the watermark
    /// does not demand a replay from one.
    pub fn adopt(&mut self, sequence: u32, now: Instant) {
        self.watermark = sequence;
        if sequence != 0 && self.ack_due.is_none() {
            self.ack_due = Some(now);
        }
    }

    /// Hold an ahead-of-sequence datagram until the gap fills.
    pub fn hold(
        &mut self,
        sequence: u32,
        datagram: Vec<u8>,
        now: Instant,
    ) -> Result<(), SessionError> {
        self.held_bytes += datagram.len();
        if self.held_bytes > MEMORY_CAP_BYTES {
            return Err(SessionError::MemoryCapExceeded {
                bytes: self.held_bytes,
            });
        }
        self.held.entry(sequence).or_insert(datagram);
        if self.gap_since.is_none() {
            self.gap_since = Some(now);
        }
        Ok(())
    }

    /// Pop the held datagram for the next expected sequence, if present.
    pub fn take_ready(&mut self) -> Option<(u32, Vec<u8>)> {
        let expected = self.watermark.wrapping_add(1);
        let datagram = self.held.remove(&expected)?;
        self.held_bytes -= datagram.len();
        if self.held.is_empty() {
            self.gap_since = None;
            self.nak_outstanding = false;
        }
        Some((expected, datagram))
    }

    /// Sequences missing between the watermark and the oldest held packet,
    /// once the gap has aged past `threshold`. Returns at most one batch;
    /// the flag resets when the gap changes.
    pub fn missing(&mut self, now: Instant, threshold: Duration) -> Option<Vec<u32>> {
        if self.nak_outstanding || self.held.is_empty() {
            return None;
        }
        let opened = self.gap_since?;
        if now.duration_since(opened) < threshold {
            return None;
        }

        let mut missing = Vec::new();
        let mut seq = self.watermark.wrapping_add(1);
        let highest_held = *self.held.keys().next_back()?;
        while seq_cmp(seq, highest_held) == Ordering::Less {
            if !self.held.contains_key(&seq) {
                missing.push(seq);
            }
            seq = seq.wrapping_add(1);
        }
        if missing.is_empty() {
            return None;
        }
        self.nak_outstanding = true;
        debug!(count = missing.len(), "requesting retransmission");
        Some(missing)
    }

    /// Take the pending-ACK deadline if the coalescing window has elapsed.
    pub fn ack_ready(&mut self, now: Instant, window: Duration) -> Option<u32> {
        let due = self.ack_due?;
        if now.duration_since(due) < window {
            return None;
        }
        self.ack_due = None;
        Some(self.watermark)
    }

    /// Record that an ACK carrying the watermark went out (piggybacked).
    pub fn ack_sent(&mut self) {
        self.ack_due = None;
    }

    pub fn clear(&mut self) {
        self.held.clear();
        self.held_bytes = 0;
        self.gap_since = None;
        self.ack_due = None;
    }
}
