//! Small fixed-layout messages
//!
//! The short server-status, chat, character, and property-update messages.
//! These are the bread and butter of the dispatch layer; the heavyweight
//! composite messages live in their own modules.

use crate::codec::buffer::{WireReader, WireWriter};
use crate::codec::properties::PropertyValue;
use crate::error::CodecError;

/// Server name and population (S2C)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerName {
    pub online_count: u32,
    pub online_cap: u32,
    pub name: String,
}

impl ServerName {
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            online_count: r.read_u32("server_name.online_count")?,
            online_cap: r.read_u32("server_name.online_cap")?,
            name: r.read_pad_str16("server_name.name")?,
        })
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_u32(self.online_count);
        w.write_u32(self.online_cap);
        w.write_pad_str16(&self.name);
    }
}

/// Administrative broadcast text (S2C)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerText {
    pub text: String,
}

impl ServerText {
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            text: r.read_pad_str16("server_text.text")?,
        })
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_pad_str16(&self.text);
    }
}

/// Local speech (S2C)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HearSpeech {
    pub text: String,
    pub sender_name: String,
    pub sender_id: u32,
    pub chat_type: u32,
}

impl HearSpeech {
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            text: r.read_pad_str16("hear_speech.text")?,
            sender_name: r.read_pad_str16("hear_speech.sender_name")?,
            sender_id: r.read_u32("hear_speech.sender_id")?,
            chat_type: r.read_u32("hear_speech.chat_type")?,
        })
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_pad_str16(&self.text);
        w.write_pad_str16(&self.sender_name);
        w.write_u32(self.sender_id);
        w.write_u32(self.chat_type);
    }
}

/// One character slot in the account list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterEntry {
    pub object_id: u32,
    pub name: String,
    /// Seconds until a pending delete completes, zero when not deleting
    pub delete_time: u32,
}

/// Account character list (S2C)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterList {
    pub characters: Vec<CharacterEntry>,
    pub max_slots: u32,
    pub account: String,
    pub use_turbine_chat: bool,
    pub has_expansion: bool,
}

impl CharacterList {
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        r.skip("character_list.pad", 4)?;
        let count = r.read_u32("character_list.count")? as usize;
        let mut characters = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            characters.push(CharacterEntry {
                object_id: r.read_u32("character_list.entry.object_id")?,
                name: r.read_pad_str16("character_list.entry.name")?,
                delete_time: r.read_u32("character_list.entry.delete_time")?,
            });
        }
        let max_slots = r.read_u32("character_list.max_slots")?;
        let account = r.read_pad_str16("character_list.account")?;
        let use_turbine_chat = r.read_u32("character_list.use_turbine_chat")? != 0;
        let has_expansion = r.read_u32("character_list.has_expansion")? != 0;
        Ok(Self {
            characters,
            max_slots,
            account,
            use_turbine_chat,
            has_expansion,
        })
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_u32(0);
        w.write_u32(self.characters.len() as u32);
        for c in &self.characters {
            w.write_u32(c.object_id);
            w.write_pad_str16(&c.name);
            w.write_u32(c.delete_time);
        }
        w.write_u32(self.max_slots);
        w.write_pad_str16(&self.account);
        w.write_u32(u32::from(self.use_turbine_chat));
        w.write_u32(u32::from(self.has_expansion));
    }
}

/// Ordered action wrapper (C2S)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameAction {
    pub sequence: u32,
    pub action: u32,
    pub body: Vec<u8>,
}

impl GameAction {
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let sequence = r.read_u32("game_action.sequence")?;
        let action = r.read_u32("game_action.action")?;
        let body = r.rest().to_vec();
        r.skip("game_action.body", r.remaining())?;
        Ok(Self {
            sequence,
            action,
            body,
        })
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_u32(self.sequence);
        w.write_u32(self.action);
        w.write_bytes(&self.body);
    }
}

/// A single property change on an object (S2C)
///
/// The private form targets the session's own character and omits the
/// object id; the public form carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyUpdate {
    pub sequence: u8,
    /// Zero for private updates
    pub object_id: u32,
    pub property: u32,
    pub value: PropertyValue,
    pub is_public: bool,
}

impl PropertyUpdate {
    pub fn read(
        r: &mut WireReader<'_>,
        is_public: bool,
        read_value: fn(&mut WireReader<'_>) -> Result<PropertyValue, CodecError>,
    ) -> Result<Self, CodecError> {
        let sequence = r.read_u8("property_update.sequence")?;
        let object_id = if is_public {
            r.read_u32("property_update.object_id")?
        } else {
            0
        };
        let property = r.read_u32("property_update.property")?;
        let value = read_value(r)?;
        Ok(Self {
            sequence,
            object_id,
            property,
            value,
            is_public,
        })
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_u8(self.sequence);
        if self.is_public {
            w.write_u32(self.object_id);
        }
        w.write_u32(self.property);
        match &self.value {
            PropertyValue::Int(v) => w.write_i32(*v),
            PropertyValue::Int64(v) => w.write_i64(*v),
            PropertyValue::Bool(v) => w.write_u32(u32::from(*v)),
            PropertyValue::Float(v) => w.write_f32(*v),
            PropertyValue::Double(v) => w.write_f64(*v),
            PropertyValue::String(v) => w.write_pad_str16(v),
            PropertyValue::DataId(v) => w.write_u32(*v),
            PropertyValue::InstanceId(v) => w.write_u32(*v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_round_trip() {
        let msg = ServerName {
            online_count: 17,
            online_cap: 400,
            name: "Frostfell".to_string(),
        };
        let mut w = WireWriter::new();
        msg.write(&mut w);
        let bytes = w.into_vec();
        let mut r = WireReader::new(&bytes);
        assert_eq!(ServerName::read(&mut r).unwrap(), msg);
        assert_eq!(r.offset(), bytes.len());
    }

    #[test]
    fn test_hear_speech_round_trip() {
        let msg = HearSpeech {
            text: "Hello world".to_string(),
            sender_name: "Alice".to_string(),
            sender_id: 0x5000_0001,
            chat_type: 2,
        };
        let mut w = WireWriter::new();
        msg.write(&mut w);
        // text: 2+11 padded to 16, sender: 2+5 padded to 8, two u32s
        assert_eq!(w.len(), 32);

        let bytes = w.into_vec();
        let mut r = WireReader::new(&bytes);
        assert_eq!(HearSpeech::read(&mut r).unwrap(), msg);
    }

    #[test]
    fn test_character_list_round_trip() {
        let msg = CharacterList {
            characters: vec![
                CharacterEntry {
                    object_id: 0x5000_0001,
                    name: "Asriel".to_string(),
                    delete_time: 0,
                },
                CharacterEntry {
                    object_id: 0x5000_0002,
                    name: "Borin".to_string(),
                    delete_time: 3600,
                },
            ],
            max_slots: 11,
            account: "tester".to_string(),
            use_turbine_chat: true,
            has_expansion: true,
        };
        let mut w = WireWriter::new();
        msg.write(&mut w);
        let bytes = w.into_vec();
        let mut r = WireReader::new(&bytes);
        assert_eq!(CharacterList::read(&mut r).unwrap(), msg);
        assert_eq!(r.offset(), bytes.len());
    }

    #[test]
    fn test_game_action_round_trip() {
        let msg = GameAction {
            sequence: 3,
            action: 0x0015,
            body: b"hello".to_vec(),
        };
        let mut w = WireWriter::new();
        msg.write(&mut w);
        let bytes = w.into_vec();
        let mut r = WireReader::new(&bytes);
        assert_eq!(GameAction::read(&mut r).unwrap(), msg);
    }

    #[test]
    fn test_property_update_private_int() {
        let mut w = WireWriter::new();
        w.write_u8(0x42);
        w.write_u32(1); // property
        w.write_i32(100);
        let bytes = w.into_vec();

        let mut r = WireReader::new(&bytes);
        let upd = PropertyUpdate::read(&mut r, false, |r| {
            Ok(PropertyValue::Int(r.read_i32("value")?))
        })
        .unwrap();
        assert_eq!(upd.sequence, 0x42);
        assert_eq!(upd.object_id, 0);
        assert_eq!(upd.property, 1);
        assert_eq!(upd.value, PropertyValue::Int(100));
        assert!(!upd.is_public);
    }

    #[test]
    fn test_property_update_public_carries_object_id() {
        let original = PropertyUpdate {
            sequence: 9,
            object_id: 0x5000_0001,
            property: 25,
            value: PropertyValue::Int64(1_000_000),
            is_public: true,
        };
        let mut w = WireWriter::new();
        original.write(&mut w);
        let bytes = w.into_vec();

        let mut r = WireReader::new(&bytes);
        let upd = PropertyUpdate::read(&mut r, true, |r| {
            Ok(PropertyValue::Int64(r.read_i64("value")?))
        })
        .unwrap();
        assert_eq!(upd, original);
    }
}
