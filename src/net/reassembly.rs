//! Fragment reassembly
//!
//! Buffers fragments by fragment-sequence until a message completes, then
//! hands back the concatenated payload with its destination queue. Entries
//! are time-bounded and the table is capped; both limits protect the
//! session from a peer that starts messages it never finishes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::SessionError;
use crate::protocol::fragment::FragmentHeader;

/// How long a partial message may wait for its remaining fragments
pub const REASSEMBLY_TTL: Duration = Duration::from_secs(30);

/// Cap on simultaneously pending messages
pub const MAX_PENDING_MESSAGES: usize = 256;

/// A fully reassembled application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedMessage {
    pub fragment_sequence: u32,
    pub queue: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct PendingMessage {
    count: u16,
    received: u16,
    queue: u16,
    slots: Vec<Option<Vec<u8>>>,
    first_arrival: Instant,
}

impl PendingMessage {
    fn new(count: u16, queue: u16, now: Instant) -> Self {
        Self {
            count,
            received: 0,
            queue,
            slots: vec![None; count as usize],
            first_arrival: now,
        }
    }

    fn bytes(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|slice| slice.len())
            .sum()
    }
}

/// Fragment-sequence keyed reassembly table
#[derive(Debug)]
pub struct Reassembler {
    pending: HashMap<u32, PendingMessage>,
    ttl: Duration,
    max_pending: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(REASSEMBLY_TTL, MAX_PENDING_MESSAGES)
    }
}

impl Reassembler {
    pub fn new(ttl: Duration, max_pending: usize) -> Self {
        Self {
            pending: HashMap::new(),
            ttl,
            max_pending,
        }
    }

    /// Number of messages still waiting on fragments
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Buffered payload bytes across all pending messages
    pub fn pending_bytes(&self) -> usize {
        self.pending.values().map(PendingMessage::bytes).sum()
    }

    /// Feed one fragment. Returns the completed message once every index of
    /// its fragment-sequence has arrived.
    pub fn accept(
        &mut self,
        header: &FragmentHeader,
        data: &[u8],
        now: Instant,
    ) -> Result<Option<CompletedMessage>, SessionError> {
        // Single-fragment messages skip the table entirely.
        if header.count <= 1 {
            return Ok(Some(CompletedMessage {
                fragment_sequence: header.sequence,
                queue: header.queue,
                payload: data.to_vec(),
            }));
        }

        if !self.pending.contains_key(&header.sequence) && self.pending.len() >= self.max_pending
        {
            return Err(SessionError::ReassemblyOverflow {
                pending: self.pending.len(),
            });
        }

        let entry = self
            .pending
            .entry(header.sequence)
            .or_insert_with(|| PendingMessage::new(header.count, header.queue, now));

        // Fragment-sequence reuse with a different count means the peer
        // restarted; the stale partial is unsalvageable.
        if entry.count != header.count {
            warn!(
                fragment_sequence = header.sequence,
                expected = entry.count,
                got = header.count,
                "fragment count changed mid-message, resetting entry"
            );
            *entry = PendingMessage::new(header.count, header.queue, now);
        }

        if header.index >= entry.count {
            warn!(
                fragment_sequence = header.sequence,
                index = header.index,
                count = entry.count,
                "fragment index out of range, ignoring"
            );
            return Ok(None);
        }

        let slot = &mut entry.slots[header.index as usize];
        if slot.is_none() {
            *slot = Some(data.to_vec());
            entry.received += 1;
        }

        if entry.received < entry.count {
            return Ok(None);
        }

        let done = self.pending.remove(&header.sequence).expect("entry exists");
        let mut payload = Vec::with_capacity(done.bytes());
        for slice in done.slots.into_iter().flatten() {
            payload.extend_from_slice(&slice);
        }
        Ok(Some(CompletedMessage {
            fragment_sequence: header.sequence,
            queue: done.queue,
            payload,
        }))
    }

    /// Drop entries older than the TTL; returns how many were discarded.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.pending.len();
        self.pending.retain(|sequence, entry| {
            let keep = now.duration_since(entry.first_arrival) < ttl;
            if !keep {
                debug!(
                    fragment_sequence = sequence,
                    received = entry.received,
                    count = entry.count,
                    "reassembly entry expired"
                );
            }
            keep
        });
        before - self.pending.len()
    }

    /// Drop everything (session teardown)
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(sequence: u32, count: u16, index: u16) -> FragmentHeader {
        FragmentHeader {
            sequence,
            id: sequence,
            count,
            size: 16,
            index,
            queue: 1,
        }
    }

    #[test]
    fn test_single_fragment_completes_immediately() {
        let mut r = Reassembler::default();
        let done = r
            .accept(&header(5, 1, 0), &[1, 2, 3], Instant::now())
            .unwrap()
            .unwrap();
        assert_eq!(done.payload, vec![1, 2, 3]);
        assert_eq!(done.fragment_sequence, 5);
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_in_order_reassembly() {
        let mut r = Reassembler::default();
        let now = Instant::now();
        assert!(r.accept(&header(9, 2, 0), &[1, 2], now).unwrap().is_none());
        let done = r.accept(&header(9, 2, 1), &[3, 4], now).unwrap().unwrap();
        assert_eq!(done.payload, vec![1, 2, 3, 4]);
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_any_arrival_order_yields_same_payload() {
        let parts: [&[u8]; 3] = [&[0, 1], &[2, 3], &[4, 5]];
        let orders = [
            [0usize, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut r = Reassembler::default();
            let now = Instant::now();
            let mut result = None;
            for &i in &order {
                let res = r
                    .accept(&header(7, 3, i as u16), parts[i], now)
                    .unwrap();
                if let Some(done) = res {
                    result = Some(done);
                }
            }
            let done = result.expect("all fragments delivered");
            assert_eq!(done.payload, vec![0, 1, 2, 3, 4, 5], "order {:?}", order);
        }
    }

    #[test]
    fn test_duplicate_fragment_ignored() {
        let mut r = Reassembler::default();
        let now = Instant::now();
        assert!(r.accept(&header(3, 2, 0), &[1], now).unwrap().is_none());
        assert!(r.accept(&header(3, 2, 0), &[9], now).unwrap().is_none());
        let done = r.accept(&header(3, 2, 1), &[2], now).unwrap().unwrap();
        // First copy wins.
        assert_eq!(done.payload, vec![1, 2]);
    }

    #[test]
    fn test_count_mismatch_resets_entry() {
        let mut r = Reassembler::default();
        let now = Instant::now();
        assert!(r.accept(&header(3, 3, 0), &[1], now).unwrap().is_none());
        // Same fragment-sequence, new count: the old partial is dropped.
        assert!(r.accept(&header(3, 2, 0), &[7], now).unwrap().is_none());
        let done = r.accept(&header(3, 2, 1), &[8], now).unwrap().unwrap();
        assert_eq!(done.payload, vec![7, 8]);
    }

    #[test]
    fn test_out_of_range_index_ignored() {
        let mut r = Reassembler::default();
        let now = Instant::now();
        assert!(r.accept(&header(4, 2, 5), &[1], now).unwrap().is_none());
        assert_eq!(r.pending_count(), 1);
    }

    #[test]
    fn test_ttl_sweep() {
        let mut r = Reassembler::new(Duration::from_millis(10), 16);
        let start = Instant::now();
        r.accept(&header(1, 2, 0), &[1], start).unwrap();
        assert_eq!(r.pending_count(), 1);

        assert_eq!(r.sweep(start + Duration::from_millis(5)), 0);
        assert_eq!(r.sweep(start + Duration::from_millis(20)), 1);
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_pending_cap() {
        let mut r = Reassembler::new(REASSEMBLY_TTL, 2);
        let now = Instant::now();
        r.accept(&header(1, 2, 0), &[1], now).unwrap();
        r.accept(&header(2, 2, 0), &[1], now).unwrap();
        let err = r.accept(&header(3, 2, 0), &[1], now).unwrap_err();
        assert_eq!(err, SessionError::ReassemblyOverflow { pending: 2 });

        // Fragments for already-tracked messages still land.
        assert!(r.accept(&header(1, 2, 1), &[2], now).unwrap().is_some());
    }

    #[test]
    fn test_pending_bytes_accounting() {
        let mut r = Reassembler::default();
        let now = Instant::now();
        r.accept(&header(1, 3, 0), &[0; 100], now).unwrap();
        r.accept(&header(1, 3, 1), &[0; 50], now).unwrap();
        assert_eq!(r.pending_bytes(), 150);
    }
}
