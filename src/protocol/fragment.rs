//! Message fragments
//!
//! Application messages ride inside packets as one or more fragments. All
//! fragments of one message share a fragment-sequence value; the index field
//! orders them. Fragment bodies cap at 448 bytes so a full packet of
//! fragments stays inside the 1024-byte datagram budget.

use crate::codec::buffer::{WireReader, WireWriter};
use crate::error::CodecError;

/// Fragment header size in bytes
pub const FRAGMENT_HEADER_SIZE: usize = 16;

/// Largest fragment body
pub const MAX_FRAGMENT_DATA: usize = 448;

/// Largest fragment including its header
pub const MAX_FRAGMENT_SIZE: usize = MAX_FRAGMENT_DATA + FRAGMENT_HEADER_SIZE;

/// Destination queue ids
pub mod queues {
    /// Ordinary game traffic
    pub const GENERAL: u16 = 0x0001;
}

/// 16-byte fragment header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FragmentHeader {
    /// Shared by every fragment of one message
    pub sequence: u32,
    /// Message id assigned by the sender
    pub id: u32,
    /// Total fragments in the message
    pub count: u16,
    /// Size of this fragment including the header
    pub size: u16,
    /// Position within `[0, count)`
    pub index: u16,
    /// Destination queue
    pub queue: u16,
}

impl FragmentHeader {
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            sequence: r.read_u32("fragment.sequence")?,
            id: r.read_u32("fragment.id")?,
            count: r.read_u16("fragment.count")?,
            size: r.read_u16("fragment.size")?,
            index: r.read_u16("fragment.index")?,
            queue: r.read_u16("fragment.queue")?,
        })
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_u32(self.sequence);
        w.write_u32(self.id);
        w.write_u16(self.count);
        w.write_u16(self.size);
        w.write_u16(self.index);
        w.write_u16(self.queue);
    }

    /// Body size implied by the header
    pub fn data_len(&self) -> usize {
        (self.size as usize).saturating_sub(FRAGMENT_HEADER_SIZE)
    }
}

/// A fragment header plus its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub data: Vec<u8>,
}

/// Split a serialized application message into fragments sharing
/// `fragment_sequence`, indices `0..count`.
pub fn fragment_message(
    fragment_sequence: u32,
    message_id: u32,
    queue: u16,
    payload: &[u8],
) -> Vec<Fragment> {
    let count = payload.len().div_ceil(MAX_FRAGMENT_DATA).max(1) as u16;
    let mut fragments = Vec::with_capacity(count as usize);

    for index in 0..count {
        let start = index as usize * MAX_FRAGMENT_DATA;
        let end = (start + MAX_FRAGMENT_DATA).min(payload.len());
        let data = payload[start..end].to_vec();
        fragments.push(Fragment {
            header: FragmentHeader {
                sequence: fragment_sequence,
                id: message_id,
                count,
                size: (FRAGMENT_HEADER_SIZE + data.len()) as u16,
                index,
                queue,
            },
            data,
        });
    }

    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = FragmentHeader {
            sequence: 100,
            id: 200,
            count: 1,
            size: 20,
            index: 0,
            queue: queues::GENERAL,
        };
        let mut w = WireWriter::new();
        header.write(&mut w);
        assert_eq!(
            w.as_bytes(),
            &[
                0x64, 0x00, 0x00, 0x00, 0xC8, 0x00, 0x00, 0x00, 0x01, 0x00, 0x14, 0x00, 0x00,
                0x00, 0x01, 0x00
            ]
        );

        let bytes = w.into_vec();
        let mut r = WireReader::new(&bytes);
        assert_eq!(FragmentHeader::read(&mut r).unwrap(), header);
        assert_eq!(r.offset(), FRAGMENT_HEADER_SIZE);
    }

    #[test]
    fn test_single_fragment_message() {
        let fragments = fragment_message(7, 42, queues::GENERAL, &[1, 2, 3, 4]);
        assert_eq!(fragments.len(), 1);
        let f = &fragments[0];
        assert_eq!(f.header.count, 1);
        assert_eq!(f.header.index, 0);
        assert_eq!(f.header.size, 20);
        assert_eq!(f.header.data_len(), 4);
        assert_eq!(f.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_message_still_emits_one_fragment() {
        let fragments = fragment_message(1, 1, queues::GENERAL, &[]);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].header.size as usize, FRAGMENT_HEADER_SIZE);
    }

    #[test]
    fn test_multi_fragment_split() {
        let payload = vec![0xAB; MAX_FRAGMENT_DATA * 2 + 10];
        let fragments = fragment_message(9, 3, queues::GENERAL, &payload);
        assert_eq!(fragments.len(), 3);
        for (i, f) in fragments.iter().enumerate() {
            assert_eq!(f.header.index as usize, i);
            assert_eq!(f.header.count, 3);
            assert_eq!(f.header.sequence, 9);
        }
        assert_eq!(fragments[0].data.len(), MAX_FRAGMENT_DATA);
        assert_eq!(fragments[1].data.len(), MAX_FRAGMENT_DATA);
        assert_eq!(fragments[2].data.len(), 10);

        let total: usize = fragments.iter().map(|f| f.data.len()).sum();
        assert_eq!(total, payload.len());
    }

    #[test]
    fn test_exact_boundary_split() {
        let payload = vec![1u8; MAX_FRAGMENT_DATA];
        let fragments = fragment_message(1, 1, queues::GENERAL, &payload);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].header.size as usize, MAX_FRAGMENT_SIZE);
    }
}
