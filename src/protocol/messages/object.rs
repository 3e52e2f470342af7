//! Entity-create decoding
//!
//! The heaviest composite message on the wire: a model/appearance block, a
//! flag-masked physics description, a nine-slot sequence block, and a
//! flag-masked weenie description (with a second flag word hidden behind an
//! object-flag bit). Optional fields decode in a fixed canonical order that
//! has nothing to do with bit positions; deviating by one field desyncs the
//! whole message.

use bitflags::bitflags;

use crate::codec::buffer::WireReader;
use crate::codec::position::Position;
use crate::error::CodecError;

/// Known-type tag elided from icon ids on the wire
const ICON_KNOWN_TYPE: u32 = 0x0600_0000;

bitflags! {
    /// Optional sections of the physics description
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PhysicsFlags: u32 {
        const CSETUP = 0x0000_0001;
        const MTABLE = 0x0000_0002;
        const VELOCITY = 0x0000_0004;
        const ACCELERATION = 0x0000_0008;
        const OMEGA = 0x0000_0010;
        const PARENT = 0x0000_0020;
        const CHILDREN = 0x0000_0040;
        const OBJSCALE = 0x0000_0080;
        const FRICTION = 0x0000_0100;
        const ELASTICITY = 0x0000_0200;
        const TIMESTAMPS = 0x0000_0400;
        const STABLE = 0x0000_0800;
        const PETABLE = 0x0000_1000;
        const DEFAULT_SCRIPT = 0x0000_2000;
        const DEFAULT_SCRIPT_INTENSITY = 0x0000_4000;
        const POSITION = 0x0000_8000;
        const MOVEMENT = 0x0001_0000;
        const ANIMATION_FRAME = 0x0002_0000;
        const TRANSLUCENCY = 0x0004_0000;
    }
}

bitflags! {
    /// Optional fields of the weenie description, first flag word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WeenieFlags: u32 {
        const PLURAL_NAME = 0x0000_0001;
        const ITEMS_CAPACITY = 0x0000_0002;
        const CONTAINERS_CAPACITY = 0x0000_0004;
        const VALUE = 0x0000_0008;
        const USABLE = 0x0000_0010;
        const USE_RADIUS = 0x0000_0020;
        const MONARCH = 0x0000_0040;
        const UI_EFFECTS = 0x0000_0080;
        const AMMO_TYPE = 0x0000_0100;
        const COMBAT_USE = 0x0000_0200;
        const STRUCTURE = 0x0000_0400;
        const MAX_STRUCTURE = 0x0000_0800;
        const STACK_SIZE = 0x0000_1000;
        const MAX_STACK_SIZE = 0x0000_2000;
        const CONTAINER = 0x0000_4000;
        const WIELDER = 0x0000_8000;
        const VALID_LOCATIONS = 0x0001_0000;
        const CURRENTLY_WIELDED_LOCATION = 0x0002_0000;
        const PRIORITY = 0x0004_0000;
        const TARGET_TYPE = 0x0008_0000;
        const RADAR_BLIP_COLOR = 0x0010_0000;
        const BURDEN = 0x0020_0000;
        const SPELL = 0x0040_0000;
        const RADAR_BEHAVIOR = 0x0080_0000;
        const WORKMANSHIP = 0x0100_0000;
        const HOUSE_OWNER = 0x0200_0000;
        const HOUSE_RESTRICTIONS = 0x0400_0000;
        const PSCRIPT = 0x0800_0000;
        const HOOK_TYPE = 0x1000_0000;
        const HOOK_ITEM_TYPES = 0x2000_0000;
        const ICON_OVERLAY = 0x4000_0000;
        const MATERIAL_TYPE = 0x8000_0000;
    }
}

bitflags! {
    /// Optional fields of the weenie description, second flag word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WeenieFlags2: u32 {
        const ICON_UNDERLAY = 0x01;
        const COOLDOWN = 0x02;
        const COOLDOWN_DURATION = 0x04;
        const PET_OWNER = 0x08;
    }
}

bitflags! {
    /// Object behavior flags; one bit gates the second weenie flag word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjectFlags: u32 {
        const OPENABLE = 0x0000_0001;
        const INSCRIBABLE = 0x0000_0002;
        const STUCK = 0x0000_0004;
        const PLAYER = 0x0000_0008;
        const ATTACKABLE = 0x0000_0010;
        const PLAYER_KILLER = 0x0000_0020;
        const HIDDEN_ADMIN = 0x0000_0040;
        const UI_HIDDEN = 0x0000_0080;
        const BOOK = 0x0000_0100;
        const VENDOR = 0x0000_0200;
        const DOOR = 0x0000_1000;
        const CORPSE = 0x0000_2000;
        const LIFE_STONE = 0x0000_4000;
        const FOOD = 0x0000_8000;
        const HEALER = 0x0001_0000;
        const LOCKPICK = 0x0002_0000;
        const PORTAL = 0x0004_0000;
        const ADMIN = 0x0010_0000;
        const INCLUDES_SECOND_HEADER = 0x0400_0000;
        const BIND_STONE = 0x0800_0000;
    }
}

/// Decoded entity-create message
///
/// Fields the upper layer commonly needs are surfaced; the rest of the
/// message is still walked so the decoder lands exactly at the end.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectCreate {
    pub object_id: u32,
    pub physics_flags: PhysicsFlags,
    pub physics_state: u32,
    pub position: Option<Position>,
    pub parent: Option<(u32, u32)>,
    pub scale: Option<f32>,
    pub sequences: [u16; 9],
    pub weenie_flags: WeenieFlags,
    pub name: String,
    pub class_id: u32,
    pub icon_id: u32,
    pub item_type: u32,
    pub object_flags: ObjectFlags,
    pub value: Option<u32>,
    pub container: Option<u32>,
    pub wielder: Option<u32>,
    pub valid_locations: Option<u32>,
    pub wielded_location: Option<u32>,
    pub priority: Option<u32>,
    pub burden: Option<u16>,
}

impl ObjectCreate {
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let object_id = r.read_u32("object_create.object_id")?;

        read_model_data(r)?;

        let physics_flags = PhysicsFlags::from_bits_retain(r.read_u32("object_create.physics_flags")?);
        let physics_state = r.read_u32("object_create.physics_state")?;

        if physics_flags.contains(PhysicsFlags::MOVEMENT) {
            let len = r.read_u32("object_create.movement_len")? as usize;
            r.skip("object_create.movement", len)?;
            if len > 0 {
                r.skip("object_create.movement_autonomous", 4)?;
            }
        } else if physics_flags.contains(PhysicsFlags::ANIMATION_FRAME) {
            r.skip("object_create.animation_frame", 4)?;
        }

        let position = if physics_flags.contains(PhysicsFlags::POSITION) {
            Some(Position::read_fixed(r)?)
        } else {
            None
        };

        if physics_flags.contains(PhysicsFlags::MTABLE) {
            r.skip("object_create.motion_table", 4)?;
        }
        if physics_flags.contains(PhysicsFlags::STABLE) {
            r.skip("object_create.sound_table", 4)?;
        }
        if physics_flags.contains(PhysicsFlags::PETABLE) {
            r.skip("object_create.effect_table", 4)?;
        }
        if physics_flags.contains(PhysicsFlags::CSETUP) {
            r.skip("object_create.setup", 4)?;
        }

        let parent = if physics_flags.contains(PhysicsFlags::PARENT) {
            Some((
                r.read_u32("object_create.parent_id")?,
                r.read_u32("object_create.parent_location")?,
            ))
        } else {
            None
        };

        if physics_flags.contains(PhysicsFlags::CHILDREN) {
            let count = r.read_u32("object_create.children_count")? as usize;
            r.skip("object_create.children", count * 8)?;
        }

        let scale = if physics_flags.contains(PhysicsFlags::OBJSCALE) {
            Some(r.read_f32("object_create.scale")?)
        } else {
            None
        };

        if physics_flags.contains(PhysicsFlags::FRICTION) {
            r.skip("object_create.friction", 4)?;
        }
        if physics_flags.contains(PhysicsFlags::ELASTICITY) {
            r.skip("object_create.elasticity", 4)?;
        }
        if physics_flags.contains(PhysicsFlags::TRANSLUCENCY) {
            r.skip("object_create.translucency", 4)?;
        }
        if physics_flags.contains(PhysicsFlags::VELOCITY) {
            r.skip("object_create.velocity", 12)?;
        }
        if physics_flags.contains(PhysicsFlags::ACCELERATION) {
            r.skip("object_create.acceleration", 12)?;
        }
        if physics_flags.contains(PhysicsFlags::OMEGA) {
            r.skip("object_create.omega", 12)?;
        }
        if physics_flags.contains(PhysicsFlags::DEFAULT_SCRIPT) {
            r.skip("object_create.default_script", 4)?;
        }
        if physics_flags.contains(PhysicsFlags::DEFAULT_SCRIPT_INTENSITY) {
            r.skip("object_create.default_script_intensity", 4)?;
        }

        let mut sequences = [0u16; 9];
        for seq in &mut sequences {
            *seq = r.read_u16("object_create.sequences")?;
        }
        r.align();

        // Weenie description
        let weenie_flags = WeenieFlags::from_bits_retain(r.read_u32("object_create.weenie_flags")?);
        let name = r.read_pad_str16("object_create.name")?;
        let class_id = r.read_var_dword("object_create.class_id")?;
        let icon_id = r.read_var_dword_known("object_create.icon_id", ICON_KNOWN_TYPE)?;
        let item_type = r.read_u32("object_create.item_type")?;
        let object_flags = ObjectFlags::from_bits_retain(r.read_u32("object_create.object_flags")?);
        r.align();

        let weenie_flags2 = if object_flags.contains(ObjectFlags::INCLUDES_SECOND_HEADER) {
            WeenieFlags2::from_bits_retain(r.read_u32("object_create.weenie_flags2")?)
        } else {
            WeenieFlags2::empty()
        };

        // Optional weenie fields, canonical order.
        if weenie_flags.contains(WeenieFlags::PLURAL_NAME) {
            r.read_pad_str16("object_create.plural_name")?;
        }
        if weenie_flags.contains(WeenieFlags::ITEMS_CAPACITY) {
            r.skip("object_create.items_capacity", 1)?;
        }
        if weenie_flags.contains(WeenieFlags::CONTAINERS_CAPACITY) {
            r.skip("object_create.containers_capacity", 1)?;
        }
        if weenie_flags.contains(WeenieFlags::AMMO_TYPE) {
            r.skip("object_create.ammo_type", 2)?;
        }
        let value = if weenie_flags.contains(WeenieFlags::VALUE) {
            Some(r.read_u32("object_create.value")?)
        } else {
            None
        };
        if weenie_flags.contains(WeenieFlags::USABLE) {
            r.skip("object_create.usable", 4)?;
        }
        if weenie_flags.contains(WeenieFlags::USE_RADIUS) {
            r.skip("object_create.use_radius", 4)?;
        }
        if weenie_flags.contains(WeenieFlags::TARGET_TYPE) {
            r.skip("object_create.target_type", 4)?;
        }
        if weenie_flags.contains(WeenieFlags::UI_EFFECTS) {
            r.skip("object_create.ui_effects", 4)?;
        }
        if weenie_flags.contains(WeenieFlags::COMBAT_USE) {
            r.skip("object_create.combat_use", 1)?;
        }
        if weenie_flags.contains(WeenieFlags::STRUCTURE) {
            r.skip("object_create.structure", 2)?;
        }
        if weenie_flags.contains(WeenieFlags::MAX_STRUCTURE) {
            r.skip("object_create.max_structure", 2)?;
        }
        if weenie_flags.contains(WeenieFlags::STACK_SIZE) {
            r.skip("object_create.stack_size", 2)?;
        }
        if weenie_flags.contains(WeenieFlags::MAX_STACK_SIZE) {
            r.skip("object_create.max_stack_size", 2)?;
        }
        let container = if weenie_flags.contains(WeenieFlags::CONTAINER) {
            Some(r.read_u32("object_create.container")?)
        } else {
            None
        };
        let wielder = if weenie_flags.contains(WeenieFlags::WIELDER) {
            Some(r.read_u32("object_create.wielder")?)
        } else {
            None
        };
        let valid_locations = if weenie_flags.contains(WeenieFlags::VALID_LOCATIONS) {
            Some(r.read_u32("object_create.valid_locations")?)
        } else {
            None
        };
        let wielded_location = if weenie_flags.contains(WeenieFlags::CURRENTLY_WIELDED_LOCATION) {
            Some(r.read_u32("object_create.wielded_location")?)
        } else {
            None
        };
        let priority = if weenie_flags.contains(WeenieFlags::PRIORITY) {
            Some(r.read_u32("object_create.priority")?)
        } else {
            None
        };
        if weenie_flags.contains(WeenieFlags::RADAR_BLIP_COLOR) {
            r.skip("object_create.radar_blip_color", 1)?;
        }
        if weenie_flags.contains(WeenieFlags::RADAR_BEHAVIOR) {
            r.skip("object_create.radar_behavior", 1)?;
        }
        if weenie_flags.contains(WeenieFlags::PSCRIPT) {
            r.skip("object_create.pscript", 2)?;
        }
        if weenie_flags.contains(WeenieFlags::WORKMANSHIP) {
            r.skip("object_create.workmanship", 4)?;
        }
        let burden = if weenie_flags.contains(WeenieFlags::BURDEN) {
            Some(r.read_u16("object_create.burden")?)
        } else {
            None
        };
        if weenie_flags.contains(WeenieFlags::SPELL) {
            r.skip("object_create.spell", 2)?;
        }
        if weenie_flags.contains(WeenieFlags::HOUSE_OWNER) {
            r.skip("object_create.house_owner", 4)?;
        }
        if weenie_flags.contains(WeenieFlags::HOUSE_RESTRICTIONS) {
            read_house_restrictions(r)?;
        }
        if weenie_flags.contains(WeenieFlags::HOOK_ITEM_TYPES) {
            r.skip("object_create.hook_item_types", 4)?;
        }
        if weenie_flags.contains(WeenieFlags::MONARCH) {
            r.skip("object_create.monarch", 4)?;
        }
        if weenie_flags.contains(WeenieFlags::HOOK_TYPE) {
            r.skip("object_create.hook_type", 2)?;
        }
        if weenie_flags.contains(WeenieFlags::ICON_OVERLAY) {
            r.read_var_dword_known("object_create.icon_overlay", ICON_KNOWN_TYPE)?;
        }
        if weenie_flags2.contains(WeenieFlags2::ICON_UNDERLAY) {
            r.read_var_dword_known("object_create.icon_underlay", ICON_KNOWN_TYPE)?;
        }
        if weenie_flags.contains(WeenieFlags::MATERIAL_TYPE) {
            r.skip("object_create.material_type", 4)?;
        }
        if weenie_flags2.contains(WeenieFlags2::COOLDOWN) {
            r.skip("object_create.cooldown", 4)?;
        }
        if weenie_flags2.contains(WeenieFlags2::COOLDOWN_DURATION) {
            r.skip("object_create.cooldown_duration", 8)?;
        }
        if weenie_flags2.contains(WeenieFlags2::PET_OWNER) {
            r.skip("object_create.pet_owner", 4)?;
        }
        r.align();

        Ok(Self {
            object_id,
            physics_flags,
            physics_state,
            position,
            parent,
            scale,
            sequences,
            weenie_flags,
            name,
            class_id,
            icon_id,
            item_type,
            object_flags,
            value,
            container,
            wielder,
            valid_locations,
            wielded_location,
            priority,
            burden,
        })
    }
}

/// Walk the model/appearance block so the physics description that follows
/// starts at the right offset.
fn read_model_data(r: &mut WireReader<'_>) -> Result<(), CodecError> {
    let header = r.read_u8("object_create.model_header")?;
    if header == 0x11 {
        let num_palettes = r.read_u8("object_create.model_palettes")?;
        let num_textures = r.read_u8("object_create.model_textures")?;
        let num_models = r.read_u8("object_create.model_parts")?;

        if num_palettes > 0 {
            r.read_var_dword("object_create.palette_id")?;
            for _ in 0..num_palettes {
                r.read_var_dword("object_create.subpalette_id")?;
                r.skip("object_create.subpalette_range", 2)?;
            }
        }
        for _ in 0..num_textures {
            r.skip("object_create.texture_part", 1)?;
            r.read_var_dword("object_create.old_texture")?;
            r.read_var_dword("object_create.new_texture")?;
        }
        for _ in 0..num_models {
            r.skip("object_create.model_part_index", 1)?;
            r.read_var_dword("object_create.model_part_id")?;
        }
    } else {
        // Minimal block: remaining three count bytes, all zero.
        r.skip("object_create.model_minimal", 3)?;
    }
    r.align();
    Ok(())
}

/// House access lists: bitmask, monarch, a guest hash table, a roommate list.
fn read_house_restrictions(r: &mut WireReader<'_>) -> Result<(), CodecError> {
    r.skip("object_create.house_bitmask", 4)?;
    r.skip("object_create.house_monarch", 4)?;
    let guest_count = r.read_u16("object_create.house_guest_count")? as usize;
    r.skip("object_create.house_guest_buckets", 2)?;
    r.skip("object_create.house_guests", guest_count * 8)?;
    let roommate_count = r.read_u32("object_create.house_roommate_count")? as usize;
    r.skip("object_create.house_roommates", roommate_count * 4)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::buffer::WireWriter;
    use crate::codec::position::Quaternion;

    /// Build the wire image of a minimal creature: empty model block,
    /// position-only physics, name/value/burden weenie fields.
    fn synthesize_creature() -> Vec<u8> {
        let mut w = WireWriter::new();
        w.write_u32(0x5000_0001); // object id

        // Model block: header 0x11, no palettes/textures/parts.
        w.write_u8(0x11);
        w.write_u8(0);
        w.write_u8(0);
        w.write_u8(0);

        // Physics: position only.
        w.write_u32(PhysicsFlags::POSITION.bits());
        w.write_u32(0x0000_0004); // state
        Position {
            cell_id: 0xDA55_0020,
            x: 84.0,
            y: 108.0,
            z: 0.5,
            rotation: Quaternion::identity(),
        }
        .write_fixed(&mut w);

        // Nine sequence slots, then alignment (18 -> 20 relative).
        for i in 0..9u16 {
            w.write_u16(i);
        }
        w.align();

        // Weenie description.
        w.write_u32((WeenieFlags::VALUE | WeenieFlags::BURDEN).bits());
        w.write_pad_str16("Drudge Slinker");
        w.write_var_dword(950); // class id
        w.write_var_dword_known(0x0600_1234, ICON_KNOWN_TYPE);
        w.write_u32(0x0000_0010); // item type: creature
        w.write_u32(ObjectFlags::ATTACKABLE.bits());
        w.align();
        w.write_u32(250); // value
        w.write_u16(0); // burden
        w.align();

        w.into_vec()
    }

    #[test]
    fn test_decode_minimal_creature() {
        let bytes = synthesize_creature();
        let mut r = WireReader::new(&bytes);
        let obj = ObjectCreate::read(&mut r).unwrap();

        assert_eq!(obj.object_id, 0x5000_0001);
        assert_eq!(obj.name, "Drudge Slinker");
        assert_eq!(obj.class_id, 950);
        assert_eq!(obj.icon_id, 0x0600_1234);
        assert!(obj.object_flags.contains(ObjectFlags::ATTACKABLE));
        assert_eq!(obj.value, Some(250));
        assert_eq!(obj.burden, Some(0));
        assert_eq!(obj.container, None);

        let pos = obj.position.expect("physics carried a position");
        assert_eq!(pos.cell_id, 0xDA55_0020);
        assert_eq!(obj.sequences[3], 3);

        // The decoder must land exactly at the end of the message.
        assert_eq!(r.offset(), bytes.len());
    }

    #[test]
    fn test_decode_parented_item_with_second_header() {
        let mut w = WireWriter::new();
        w.write_u32(0x5000_0002);
        w.write_u8(0x11);
        w.write_u8(0);
        w.write_u8(0);
        w.write_u8(0);

        w.write_u32((PhysicsFlags::PARENT | PhysicsFlags::OBJSCALE).bits());
        w.write_u32(0);
        w.write_u32(0x5000_0001); // parent id
        w.write_u32(1); // parent location
        w.write_f32(1.2); // scale
        for _ in 0..9u16 {
            w.write_u16(0);
        }
        w.align();

        w.write_u32(WeenieFlags::CONTAINER.bits());
        w.write_pad_str16("Fire Sceptre");
        w.write_var_dword(0x8000_0001); // wide class id takes 4 bytes
        w.write_var_dword_known(0x0600_0001, ICON_KNOWN_TYPE);
        w.write_u32(0x0000_8000);
        w.write_u32(ObjectFlags::INCLUDES_SECOND_HEADER.bits());
        w.align();
        w.write_u32(WeenieFlags2::COOLDOWN.bits());
        w.write_u32(0x5000_0001); // container
        w.write_u32(30); // cooldown
        w.align();

        let bytes = w.into_vec();
        let mut r = WireReader::new(&bytes);
        let obj = ObjectCreate::read(&mut r).unwrap();
        assert_eq!(obj.parent, Some((0x5000_0001, 1)));
        assert_eq!(obj.scale, Some(1.2));
        assert_eq!(obj.class_id, 0x8000_0001);
        assert_eq!(obj.container, Some(0x5000_0001));
        assert_eq!(r.offset(), bytes.len());
    }

    #[test]
    fn test_decode_model_block_with_textures() {
        let mut w = WireWriter::new();
        w.write_u32(1);
        w.write_u8(0x11);
        w.write_u8(1); // one palette
        w.write_u8(1); // one texture swap
        w.write_u8(1); // one model part
        w.write_var_dword(0x0400); // palette id
        w.write_var_dword(0x0401); // subpalette
        w.write_u8(0); // range offset
        w.write_u8(8); // range length
        w.write_u8(2); // texture part index
        w.write_var_dword(0x0500);
        w.write_var_dword(0x0501);
        w.write_u8(0); // model part index
        w.write_var_dword(0x0601);
        w.align();

        w.write_u32(0); // physics: nothing optional
        w.write_u32(0);
        for _ in 0..9u16 {
            w.write_u16(0);
        }
        w.align();

        w.write_u32(0); // weenie: nothing optional
        w.write_pad_str16("Statue");
        w.write_var_dword(42);
        w.write_var_dword_known(0x0600_0002, ICON_KNOWN_TYPE);
        w.write_u32(0x80);
        w.write_u32(0);
        w.align();

        let bytes = w.into_vec();
        let mut r = WireReader::new(&bytes);
        let obj = ObjectCreate::read(&mut r).unwrap();
        assert_eq!(obj.name, "Statue");
        assert_eq!(r.offset(), bytes.len());
    }

    #[test]
    fn test_truncated_weenie_reports_field() {
        let mut bytes = synthesize_creature();
        bytes.truncate(bytes.len() - 5);
        let mut r = WireReader::new(&bytes);
        let err = ObjectCreate::read(&mut r).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }
}
