//! Position-update messages
//!
//! The periodic per-object position sync: an object id followed by the
//! variant position form (flag-masked quaternion, optional velocity and
//! placement id, trailing sequence-counter block).

use crate::codec::buffer::{WireReader, WireWriter};
use crate::codec::position::VariantPosition;
use crate::error::CodecError;

/// Position sync for one object (S2C)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    pub object_id: u32,
    pub position: VariantPosition,
}

impl PositionUpdate {
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            object_id: r.read_u32("position_update.object_id")?,
            position: VariantPosition::read(r)?,
        })
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_u32(self.object_id);
        self.position.write(w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::position::{Position, Quaternion};

    #[test]
    fn test_round_trip() {
        let msg = PositionUpdate {
            object_id: 0x5000_0001,
            position: VariantPosition {
                position: Position {
                    cell_id: 0xDA55_0020,
                    x: 84.0,
                    y: 108.0,
                    z: 0.5,
                    rotation: Quaternion {
                        w: 0.9,
                        x: 0.0,
                        y: 0.0,
                        z: 0.43,
                    },
                },
                velocity: None,
                placement_id: None,
                grounded: true,
                sequences: [2, 17, 0, 0],
            },
        };
        let mut w = WireWriter::new();
        msg.write(&mut w);
        let bytes = w.into_vec();

        let mut r = WireReader::new(&bytes);
        let back = PositionUpdate::read(&mut r).unwrap();
        assert_eq!(back, msg);
        assert_eq!(r.offset(), bytes.len());
    }

    #[test]
    fn test_sequences_trail_the_optionals() {
        let msg = PositionUpdate {
            object_id: 1,
            position: VariantPosition {
                position: Position::default(),
                velocity: Some((0.0, 1.0, 0.0)),
                placement_id: None,
                grounded: false,
                sequences: [0xAAAA, 0xBBBB, 0xCCCC, 0xDDDD],
            },
        };
        let mut w = WireWriter::new();
        msg.write(&mut w);
        let bytes = w.into_vec();
        // The last 8 bytes are always the four sequence counters.
        let tail = &bytes[bytes.len() - 8..];
        assert_eq!(
            tail,
            &[0xAA, 0xAA, 0xBB, 0xBB, 0xCC, 0xCC, 0xDD, 0xDD]
        );
    }
}
