//! Spatial wire types
//!
//! Positions travel in two layouts: a fixed 32-byte form used inside object
//! creation (cell id, origin, full quaternion) and a variable form driven by
//! a flag word that omits zero quaternion components and optionally carries
//! velocity and a placement id. The variable form is always followed by a
//! block of four 16-bit sequence counters.

use bitflags::bitflags;

use crate::codec::buffer::{WireReader, WireWriter};
use crate::error::CodecError;

bitflags! {
    /// Flag word controlling the variable position layout
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PositionFlags: u32 {
        const HAS_VELOCITY = 0x01;
        const HAS_PLACEMENT_ID = 0x02;
        const IS_GROUNDED = 0x04;
        const NO_QUAT_W = 0x08;
        const NO_QUAT_X = 0x10;
        const NO_QUAT_Y = 0x20;
        const NO_QUAT_Z = 0x40;
    }
}

/// Orientation quaternion; the scalar component leads on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// The identity rotation
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            w: r.read_f32("quat.w")?,
            x: r.read_f32("quat.x")?,
            y: r.read_f32("quat.y")?,
            z: r.read_f32("quat.z")?,
        })
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_f32(self.w);
        w.write_f32(self.x);
        w.write_f32(self.y);
        w.write_f32(self.z);
    }
}

/// A world-space position
///
/// `cell_id` is the 32-bit world-space index; the high half addresses the
/// landblock and the low half distinguishes outdoor cells from interior and
/// dynamic ones.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub cell_id: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rotation: Quaternion,
}

/// The variable position form plus the state read alongside it
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VariantPosition {
    pub position: Position,
    pub velocity: Option<(f32, f32, f32)>,
    pub placement_id: Option<u32>,
    pub grounded: bool,
    /// instance, position, teleport, force-position
    pub sequences: [u16; 4],
}

impl Position {
    /// True for interior and dynamic cells
    pub fn is_indoors(&self) -> bool {
        (self.cell_id & 0xFFFF) >= 0x0100
    }

    /// Read the fixed 32-byte layout (object creation)
    pub fn read_fixed(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            cell_id: r.read_u32("position.cell_id")?,
            x: r.read_f32("position.x")?,
            y: r.read_f32("position.y")?,
            z: r.read_f32("position.z")?,
            rotation: Quaternion::read(r)?,
        })
    }

    /// Write the fixed 32-byte layout
    pub fn write_fixed(&self, w: &mut WireWriter) {
        w.write_u32(self.cell_id);
        w.write_f32(self.x);
        w.write_f32(self.y);
        w.write_f32(self.z);
        self.rotation.write(w);
    }
}

impl VariantPosition {
    /// Read the flag-driven layout, including the trailing sequence block.
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let flags = PositionFlags::from_bits_retain(r.read_u32("position.flags")?);
        let cell_id = r.read_u32("position.cell_id")?;
        let x = r.read_f32("position.x")?;
        let y = r.read_f32("position.y")?;
        let z = r.read_f32("position.z")?;

        // Omitted components are implicitly zero.
        let mut rotation = Quaternion::default();
        if !flags.contains(PositionFlags::NO_QUAT_W) {
            rotation.w = r.read_f32("position.quat.w")?;
        }
        if !flags.contains(PositionFlags::NO_QUAT_X) {
            rotation.x = r.read_f32("position.quat.x")?;
        }
        if !flags.contains(PositionFlags::NO_QUAT_Y) {
            rotation.y = r.read_f32("position.quat.y")?;
        }
        if !flags.contains(PositionFlags::NO_QUAT_Z) {
            rotation.z = r.read_f32("position.quat.z")?;
        }

        let velocity = if flags.contains(PositionFlags::HAS_VELOCITY) {
            Some((
                r.read_f32("position.velocity.x")?,
                r.read_f32("position.velocity.y")?,
                r.read_f32("position.velocity.z")?,
            ))
        } else {
            None
        };

        let placement_id = if flags.contains(PositionFlags::HAS_PLACEMENT_ID) {
            Some(r.read_u32("position.placement_id")?)
        } else {
            None
        };

        let mut sequences = [0u16; 4];
        for (i, seq) in sequences.iter_mut().enumerate() {
            *seq = r.read_u16(match i {
                0 => "position.seq.instance",
                1 => "position.seq.position",
                2 => "position.seq.teleport",
                _ => "position.seq.force_position",
            })?;
        }

        Ok(Self {
            position: Position {
                cell_id,
                x,
                y,
                z,
                rotation,
            },
            velocity,
            placement_id,
            grounded: flags.contains(PositionFlags::IS_GROUNDED),
            sequences,
        })
    }

    /// Write the flag-driven layout. Zero quaternion components are elided,
    /// which is what keeps re-encoded captures byte-identical.
    pub fn write(&self, w: &mut WireWriter) {
        let mut flags = PositionFlags::empty();
        if self.velocity.is_some() {
            flags |= PositionFlags::HAS_VELOCITY;
        }
        if self.placement_id.is_some() {
            flags |= PositionFlags::HAS_PLACEMENT_ID;
        }
        if self.grounded {
            flags |= PositionFlags::IS_GROUNDED;
        }
        let rot = self.position.rotation;
        if rot.w == 0.0 {
            flags |= PositionFlags::NO_QUAT_W;
        }
        if rot.x == 0.0 {
            flags |= PositionFlags::NO_QUAT_X;
        }
        if rot.y == 0.0 {
            flags |= PositionFlags::NO_QUAT_Y;
        }
        if rot.z == 0.0 {
            flags |= PositionFlags::NO_QUAT_Z;
        }

        w.write_u32(flags.bits());
        w.write_u32(self.position.cell_id);
        w.write_f32(self.position.x);
        w.write_f32(self.position.y);
        w.write_f32(self.position.z);
        if rot.w != 0.0 {
            w.write_f32(rot.w);
        }
        if rot.x != 0.0 {
            w.write_f32(rot.x);
        }
        if rot.y != 0.0 {
            w.write_f32(rot.y);
        }
        if rot.z != 0.0 {
            w.write_f32(rot.z);
        }
        if let Some((vx, vy, vz)) = self.velocity {
            w.write_f32(vx);
            w.write_f32(vy);
            w.write_f32(vz);
        }
        if let Some(p) = self.placement_id {
            w.write_u32(p);
        }
        for seq in self.sequences {
            w.write_u16(seq);
        }
    }
}
