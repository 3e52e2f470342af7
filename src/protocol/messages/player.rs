//! Player-description decoding
//!
//! The character self-description sent once at world entry, wrapped in an
//! ordered game event. Two flag words select which property hash tables and
//! stat vectors are present; a third selects the character-options sections.
//! Every table obeys the bucket-ordering rule, so decode followed by
//! re-encode reproduces the original bytes.

use bitflags::bitflags;
use std::collections::BTreeMap;

use crate::codec::buffer::{WireReader, WireWriter};
use crate::codec::position::Position;
use crate::codec::properties::{PropertyKind, PropertyTable};
use crate::error::CodecError;

bitflags! {
    /// Which property tables are present
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DescriptionFlags: u32 {
        const INT = 0x0001;
        const BOOL = 0x0002;
        const DOUBLE = 0x0004;
        const DATA_ID = 0x0008;
        const STRING = 0x0010;
        const POSITION = 0x0020;
        const INSTANCE_ID = 0x0040;
        const INT64 = 0x0080;
    }
}

bitflags! {
    /// Which stat vectors are present
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VectorFlags: u32 {
        const ATTRIBUTES = 0x0001;
        const SKILLS = 0x0002;
        const SPELL_BOOK = 0x0100;
        const ENCHANTMENTS = 0x0200;
    }
}

bitflags! {
    /// Which character-option sections are present
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags: u32 {
        const SHORTCUTS = 0x0000_0001;
        const SQUELCH_LIST = 0x0000_0002;
        const MULTI_SPELL_LIST = 0x0000_0004;
        const DESIRED_COMPONENTS = 0x0000_0008;
        const SPELLBOOK_FILTERS = 0x0000_0020;
        const OPTIONS2 = 0x0000_0040;
        const GAMEPLAY_OPTIONS = 0x0000_0200;
        const SPELL_LISTS_8 = 0x0000_0400;
    }
}

bitflags! {
    /// Which enchantment lists are present
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EnchantmentMask: u32 {
        const MULTIPLICATIVE = 0x01;
        const ADDITIVE = 0x02;
        const VITAE = 0x04;
        const COOLDOWN = 0x08;
    }
}

/// A creature attribute; vitals additionally carry a current value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attribute {
    pub ranks: u32,
    pub innate: u32,
    pub experience: u32,
    pub current: Option<u32>,
}

/// A trained skill (28-byte body behind a u32 skill-id key)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Skill {
    pub ranks: u16,
    pub training: u32,
    pub experience: u32,
    pub innate: u32,
    pub resistance: u32,
    pub last_used: f64,
}

impl Skill {
    fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let ranks = r.read_u16("skill.ranks")?;
        r.skip("skill.adjust", 2)?;
        Ok(Self {
            ranks,
            training: r.read_u32("skill.training")?,
            experience: r.read_u32("skill.experience")?,
            innate: r.read_u32("skill.innate")?,
            resistance: r.read_u32("skill.resistance")?,
            last_used: r.read_f64("skill.last_used")?,
        })
    }

    fn write(&self, w: &mut WireWriter) {
        w.write_u16(self.ranks);
        w.write_u16(1);
        w.write_u32(self.training);
        w.write_u32(self.experience);
        w.write_u32(self.innate);
        w.write_u32(self.resistance);
        w.write_f64(self.last_used);
    }
}

/// A single active enchantment layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Enchantment {
    pub spell_id: u16,
    pub layer: u16,
    pub spell_category: u16,
    pub power_level: u32,
    pub start_time: f64,
    pub duration: f64,
    pub caster: u32,
    pub degrade_modifier: f32,
    pub degrade_limit: f32,
    pub last_time_degraded: f64,
    pub stat_mod_type: u32,
    pub stat_mod_key: u32,
    pub stat_mod_value: f32,
    pub spell_set_id: Option<u32>,
}

impl Enchantment {
    fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let spell_id = r.read_u16("enchantment.spell_id")?;
        let layer = r.read_u16("enchantment.layer")?;
        let spell_category = r.read_u16("enchantment.spell_category")?;
        let has_spell_set_id = r.read_u16("enchantment.has_spell_set_id")?;
        let power_level = r.read_u32("enchantment.power_level")?;
        let start_time = r.read_f64("enchantment.start_time")?;
        let duration = r.read_f64("enchantment.duration")?;
        let caster = r.read_u32("enchantment.caster")?;
        let degrade_modifier = r.read_f32("enchantment.degrade_modifier")?;
        let degrade_limit = r.read_f32("enchantment.degrade_limit")?;
        let last_time_degraded = r.read_f64("enchantment.last_time_degraded")?;
        let stat_mod_type = r.read_u32("enchantment.stat_mod_type")?;
        let stat_mod_key = r.read_u32("enchantment.stat_mod_key")?;
        let stat_mod_value = r.read_f32("enchantment.stat_mod_value")?;
        let spell_set_id = if has_spell_set_id != 0 {
            Some(r.read_u32("enchantment.spell_set_id")?)
        } else {
            None
        };
        Ok(Self {
            spell_id,
            layer,
            spell_category,
            power_level,
            start_time,
            duration,
            caster,
            degrade_modifier,
            degrade_limit,
            last_time_degraded,
            stat_mod_type,
            stat_mod_key,
            stat_mod_value,
            spell_set_id,
        })
    }

    fn write(&self, w: &mut WireWriter) {
        w.write_u16(self.spell_id);
        w.write_u16(self.layer);
        w.write_u16(self.spell_category);
        w.write_u16(u16::from(self.spell_set_id.is_some()));
        w.write_u32(self.power_level);
        w.write_f64(self.start_time);
        w.write_f64(self.duration);
        w.write_u32(self.caster);
        w.write_f32(self.degrade_modifier);
        w.write_f32(self.degrade_limit);
        w.write_f64(self.last_time_degraded);
        w.write_u32(self.stat_mod_type);
        w.write_u32(self.stat_mod_key);
        w.write_f32(self.stat_mod_value);
        if let Some(id) = self.spell_set_id {
            w.write_u32(id);
        }
    }
}

/// A toolbar shortcut slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Shortcut {
    pub index: u32,
    pub object_id: u32,
    pub spell_id: u16,
    pub layer: u16,
}

/// The four enchantment lists, kept separate so the mask and the list
/// boundaries survive a decode/re-encode cycle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnchantmentSet {
    pub multiplicative: Option<Vec<Enchantment>>,
    pub additive: Option<Vec<Enchantment>>,
    pub cooldown: Option<Vec<Enchantment>>,
    pub vitae: Option<Enchantment>,
}

impl EnchantmentSet {
    pub fn is_empty(&self) -> bool {
        self.multiplicative.is_none()
            && self.additive.is_none()
            && self.cooldown.is_none()
            && self.vitae.is_none()
    }

    fn mask(&self) -> EnchantmentMask {
        let mut mask = EnchantmentMask::empty();
        if self.multiplicative.is_some() {
            mask |= EnchantmentMask::MULTIPLICATIVE;
        }
        if self.additive.is_some() {
            mask |= EnchantmentMask::ADDITIVE;
        }
        if self.cooldown.is_some() {
            mask |= EnchantmentMask::COOLDOWN;
        }
        if self.vitae.is_some() {
            mask |= EnchantmentMask::VITAE;
        }
        mask
    }
}

/// Decoded player-description event
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerDescription {
    pub object_id: u32,
    pub event_sequence: u32,
    pub weenie_type: u32,

    pub ints: PropertyTable,
    pub int64s: PropertyTable,
    pub bools: PropertyTable,
    pub doubles: PropertyTable,
    pub strings: PropertyTable,
    pub data_ids: PropertyTable,
    pub instance_ids: PropertyTable,
    /// Stored positions keyed by position type, with the wire bucket count
    pub positions: (u16, Vec<(u32, Position)>),

    pub has_health: bool,
    pub attributes: BTreeMap<u32, Attribute>,
    pub skills: (u16, Vec<(u32, Skill)>),
    pub spells: PropertyTable,
    pub enchantments: EnchantmentSet,

    pub option_flags: OptionFlags,
    pub options1: u32,
    pub options2: u32,
    pub shortcuts: Vec<Shortcut>,
    pub spell_lists: Vec<Vec<u32>>,
    pub desired_components: (u16, Vec<(u32, u32)>),
    pub spellbook_filters: u32,
    /// Opaque client settings blob, length-prefixed on the wire
    pub gameplay_options: Vec<u8>,

    pub inventory: Vec<(u32, u32)>,
    pub equipped: Vec<(u32, u32, u32)>,
}

impl PlayerDescription {
    /// Name property, when the string table carries one
    pub fn name(&self) -> Option<&str> {
        match self.strings.get(1) {
            Some(crate::codec::properties::PropertyValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn read(
        object_id: u32,
        event_sequence: u32,
        r: &mut WireReader<'_>,
    ) -> Result<Self, CodecError> {
        let mut desc = PlayerDescription {
            object_id,
            event_sequence,
            ..Default::default()
        };

        let flags =
            DescriptionFlags::from_bits_retain(r.read_u32("player_description.flags")?);
        desc.weenie_type = r.read_u32("player_description.weenie_type")?;

        if flags.contains(DescriptionFlags::INT) {
            desc.ints = PropertyTable::read(r, "player_description.ints", PropertyKind::Int)?;
        }
        if flags.contains(DescriptionFlags::INT64) {
            desc.int64s =
                PropertyTable::read(r, "player_description.int64s", PropertyKind::Int64)?;
        }
        if flags.contains(DescriptionFlags::BOOL) {
            desc.bools = PropertyTable::read(r, "player_description.bools", PropertyKind::Bool)?;
        }
        if flags.contains(DescriptionFlags::DOUBLE) {
            desc.doubles =
                PropertyTable::read(r, "player_description.doubles", PropertyKind::Double)?;
        }
        if flags.contains(DescriptionFlags::STRING) {
            desc.strings =
                PropertyTable::read(r, "player_description.strings", PropertyKind::String)?;
        }
        if flags.contains(DescriptionFlags::DATA_ID) {
            desc.data_ids =
                PropertyTable::read(r, "player_description.data_ids", PropertyKind::DataId)?;
        }
        if flags.contains(DescriptionFlags::INSTANCE_ID) {
            desc.instance_ids = PropertyTable::read(
                r,
                "player_description.instance_ids",
                PropertyKind::InstanceId,
            )?;
        }
        if flags.contains(DescriptionFlags::POSITION) {
            let count = r.read_u16("player_description.positions")? as usize;
            let buckets = r.read_u16("player_description.positions")?;
            let mut positions = Vec::with_capacity(count);
            for _ in 0..count {
                let key = r.read_u32("player_description.positions")?;
                positions.push((key, Position::read_fixed(r)?));
            }
            desc.positions = (buckets, positions);
        }

        let vectors = VectorFlags::from_bits_retain(r.read_u32("player_description.vectors")?);
        desc.has_health = r.read_u32("player_description.has_health")? != 0;

        if vectors.contains(VectorFlags::ATTRIBUTES) {
            let present = r.read_u32("player_description.attribute_mask")?;
            for id in 1u32..=6 {
                if present & (1 << (id - 1)) != 0 {
                    desc.attributes.insert(
                        id,
                        Attribute {
                            ranks: r.read_u32("player_description.attribute.ranks")?,
                            innate: r.read_u32("player_description.attribute.innate")?,
                            experience: r.read_u32("player_description.attribute.experience")?,
                            current: None,
                        },
                    );
                }
            }
            for id in 7u32..=9 {
                if present & (1 << (id - 1)) != 0 {
                    desc.attributes.insert(
                        id,
                        Attribute {
                            ranks: r.read_u32("player_description.vital.ranks")?,
                            innate: r.read_u32("player_description.vital.innate")?,
                            experience: r.read_u32("player_description.vital.experience")?,
                            current: Some(r.read_u32("player_description.vital.current")?),
                        },
                    );
                }
            }
        }

        if vectors.contains(VectorFlags::SKILLS) {
            let count = r.read_u16("player_description.skills")? as usize;
            let buckets = r.read_u16("player_description.skills")?;
            let mut skills = Vec::with_capacity(count);
            for _ in 0..count {
                let id = r.read_u32("player_description.skill.id")?;
                skills.push((id, Skill::read(r)?));
            }
            desc.skills = (buckets, skills);
        }

        if vectors.contains(VectorFlags::SPELL_BOOK) {
            desc.spells =
                PropertyTable::read(r, "player_description.spells", PropertyKind::Float)?;
        }

        if vectors.contains(VectorFlags::ENCHANTMENTS) {
            let mask = EnchantmentMask::from_bits_retain(
                r.read_u32("player_description.enchantment_mask")?,
            );
            if mask.contains(EnchantmentMask::MULTIPLICATIVE) {
                desc.enchantments.multiplicative = Some(read_enchantment_list(r)?);
            }
            if mask.contains(EnchantmentMask::ADDITIVE) {
                desc.enchantments.additive = Some(read_enchantment_list(r)?);
            }
            if mask.contains(EnchantmentMask::COOLDOWN) {
                desc.enchantments.cooldown = Some(read_enchantment_list(r)?);
            }
            if mask.contains(EnchantmentMask::VITAE) {
                desc.enchantments.vitae = Some(Enchantment::read(r)?);
            }
        }

        desc.option_flags =
            OptionFlags::from_bits_retain(r.read_u32("player_description.option_flags")?);
        desc.options1 = r.read_u32("player_description.options1")?;

        if desc.option_flags.contains(OptionFlags::SHORTCUTS) {
            let count = r.read_u32("player_description.shortcuts")? as usize;
            for _ in 0..count {
                desc.shortcuts.push(Shortcut {
                    index: r.read_u32("player_description.shortcut.index")?,
                    object_id: r.read_u32("player_description.shortcut.object_id")?,
                    spell_id: r.read_u16("player_description.shortcut.spell_id")?,
                    layer: r.read_u16("player_description.shortcut.layer")?,
                });
            }
        }

        let list_count = if desc.option_flags.contains(OptionFlags::SPELL_LISTS_8) {
            8
        } else {
            1
        };
        for _ in 0..list_count {
            let count = r.read_u32("player_description.spell_list")? as usize;
            let mut list = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                list.push(r.read_u32("player_description.spell_list")?);
            }
            desc.spell_lists.push(list);
        }

        if desc.option_flags.contains(OptionFlags::DESIRED_COMPONENTS) {
            let count = r.read_u16("player_description.components")? as usize;
            let buckets = r.read_u16("player_description.components")?;
            let mut comps = Vec::with_capacity(count);
            for _ in 0..count {
                comps.push((
                    r.read_u32("player_description.component.id")?,
                    r.read_u32("player_description.component.amount")?,
                ));
            }
            desc.desired_components = (buckets, comps);
        }

        desc.spellbook_filters = r.read_u32("player_description.spellbook_filters")?;

        if desc.option_flags.contains(OptionFlags::OPTIONS2) {
            desc.options2 = r.read_u32("player_description.options2")?;
        }

        if desc.option_flags.contains(OptionFlags::GAMEPLAY_OPTIONS) {
            let len = r.read_u32("player_description.gameplay_options")? as usize;
            desc.gameplay_options = r
                .read_bytes("player_description.gameplay_options", len)?
                .to_vec();
        }

        let inv_count = r.read_u32("player_description.inventory")? as usize;
        for _ in 0..inv_count {
            desc.inventory.push((
                r.read_u32("player_description.inventory.object_id")?,
                r.read_u32("player_description.inventory.kind")?,
            ));
        }

        let eq_count = r.read_u32("player_description.equipped")? as usize;
        for _ in 0..eq_count {
            desc.equipped.push((
                r.read_u32("player_description.equipped.object_id")?,
                r.read_u32("player_description.equipped.location")?,
                r.read_u32("player_description.equipped.priority")?,
            ));
        }

        Ok(desc)
    }

    pub fn write(&self, w: &mut WireWriter) {
        let mut flags = DescriptionFlags::empty();
        if !self.ints.is_empty() {
            flags |= DescriptionFlags::INT;
        }
        if !self.int64s.is_empty() {
            flags |= DescriptionFlags::INT64;
        }
        if !self.bools.is_empty() {
            flags |= DescriptionFlags::BOOL;
        }
        if !self.doubles.is_empty() {
            flags |= DescriptionFlags::DOUBLE;
        }
        if !self.strings.is_empty() {
            flags |= DescriptionFlags::STRING;
        }
        if !self.data_ids.is_empty() {
            flags |= DescriptionFlags::DATA_ID;
        }
        if !self.instance_ids.is_empty() {
            flags |= DescriptionFlags::INSTANCE_ID;
        }
        if !self.positions.1.is_empty() {
            flags |= DescriptionFlags::POSITION;
        }
        w.write_u32(flags.bits());
        w.write_u32(self.weenie_type);

        for table in [
            &self.ints,
            &self.int64s,
            &self.bools,
            &self.doubles,
            &self.strings,
            &self.data_ids,
            &self.instance_ids,
        ] {
            if !table.is_empty() {
                table.write(w);
            }
        }
        if !self.positions.1.is_empty() {
            w.write_u16(self.positions.1.len() as u16);
            w.write_u16(self.positions.0);
            for (key, pos) in &self.positions.1 {
                w.write_u32(*key);
                pos.write_fixed(w);
            }
        }

        let mut vectors = VectorFlags::empty();
        if !self.attributes.is_empty() {
            vectors |= VectorFlags::ATTRIBUTES;
        }
        if !self.skills.1.is_empty() {
            vectors |= VectorFlags::SKILLS;
        }
        if !self.spells.is_empty() {
            vectors |= VectorFlags::SPELL_BOOK;
        }
        if !self.enchantments.is_empty() {
            vectors |= VectorFlags::ENCHANTMENTS;
        }
        w.write_u32(vectors.bits());
        w.write_u32(u32::from(self.has_health));

        if !self.attributes.is_empty() {
            let mut present = 0u32;
            for id in self.attributes.keys() {
                present |= 1 << (id - 1);
            }
            w.write_u32(present);
            for (id, attr) in &self.attributes {
                w.write_u32(attr.ranks);
                w.write_u32(attr.innate);
                w.write_u32(attr.experience);
                if *id >= 7 {
                    w.write_u32(attr.current.unwrap_or(0));
                }
            }
        }

        if !self.skills.1.is_empty() {
            w.write_u16(self.skills.1.len() as u16);
            w.write_u16(self.skills.0);
            for (id, skill) in &self.skills.1 {
                w.write_u32(*id);
                skill.write(w);
            }
        }

        if !self.spells.is_empty() {
            self.spells.write(w);
        }

        if !self.enchantments.is_empty() {
            w.write_u32(self.enchantments.mask().bits());
            for list in [
                &self.enchantments.multiplicative,
                &self.enchantments.additive,
                &self.enchantments.cooldown,
            ]
            .into_iter()
            .flatten()
            {
                w.write_u32(list.len() as u32);
                for e in list {
                    e.write(w);
                }
            }
            if let Some(vitae) = &self.enchantments.vitae {
                vitae.write(w);
            }
        }

        w.write_u32(self.option_flags.bits());
        w.write_u32(self.options1);

        if self.option_flags.contains(OptionFlags::SHORTCUTS) {
            w.write_u32(self.shortcuts.len() as u32);
            for s in &self.shortcuts {
                w.write_u32(s.index);
                w.write_u32(s.object_id);
                w.write_u16(s.spell_id);
                w.write_u16(s.layer);
            }
        }

        let list_count = if self.option_flags.contains(OptionFlags::SPELL_LISTS_8) {
            8
        } else {
            1
        };
        for i in 0..list_count {
            match self.spell_lists.get(i) {
                Some(list) => {
                    w.write_u32(list.len() as u32);
                    for spell in list {
                        w.write_u32(*spell);
                    }
                }
                None => w.write_u32(0),
            }
        }

        if self.option_flags.contains(OptionFlags::DESIRED_COMPONENTS) {
            w.write_u16(self.desired_components.1.len() as u16);
            w.write_u16(self.desired_components.0);
            for (id, amount) in &self.desired_components.1 {
                w.write_u32(*id);
                w.write_u32(*amount);
            }
        }

        w.write_u32(self.spellbook_filters);

        if self.option_flags.contains(OptionFlags::OPTIONS2) {
            w.write_u32(self.options2);
        }

        if self.option_flags.contains(OptionFlags::GAMEPLAY_OPTIONS) {
            w.write_u32(self.gameplay_options.len() as u32);
            w.write_bytes(&self.gameplay_options);
        }

        w.write_u32(self.inventory.len() as u32);
        for (object_id, kind) in &self.inventory {
            w.write_u32(*object_id);
            w.write_u32(*kind);
        }

        w.write_u32(self.equipped.len() as u32);
        for (object_id, location, priority) in &self.equipped {
            w.write_u32(*object_id);
            w.write_u32(*location);
            w.write_u32(*priority);
        }
    }
}

fn read_enchantment_list(r: &mut WireReader<'_>) -> Result<Vec<Enchantment>, CodecError> {
    let count = r.read_u32("player_description.enchantments")? as usize;
    let mut list = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        list.push(Enchantment::read(r)?);
    }
    Ok(list)
}
