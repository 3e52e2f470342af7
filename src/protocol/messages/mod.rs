//! Application messages
//!
//! The typed message layer above fragment reassembly: a 32-bit opcode
//! followed by an opcode-specific body. The core decodes the composite
//! families (entity-create, player-description, position-update), the
//! property-update family, and the common fixed-layout messages; everything
//! else is delivered opaque for the upper layer to interpret.

pub mod misc;
pub mod movement;
pub mod object;
pub mod player;

pub use misc::{
    CharacterEntry, CharacterList, GameAction, HearSpeech, PropertyUpdate, ServerName, ServerText,
};
pub use movement::PositionUpdate;
pub use object::ObjectCreate;
pub use player::PlayerDescription;

use crate::codec::buffer::{WireReader, WireWriter};
use crate::codec::properties::PropertyValue;
use crate::error::CodecError;
use crate::protocol::opcodes;

/// The body of an ordered game event
#[derive(Debug, Clone, PartialEq)]
pub enum GameEventPayload {
    PlayerDescription(Box<PlayerDescription>),
    /// Event opcodes without a typed decoder
    Opaque { event: u32, data: Vec<u8> },
}

/// A decoded application message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ServerName(ServerName),
    ServerText(ServerText),
    HearSpeech(HearSpeech),
    CharacterList(CharacterList),
    CharacterError { code: u32 },
    CharacterEnterWorldServerReady,
    CharacterEnterWorldRequest,
    CharacterEnterWorld { object_id: u32, account: String },
    GameAction(GameAction),
    GameEvent {
        target: u32,
        sequence: u32,
        payload: GameEventPayload,
    },
    ObjectCreate(Box<ObjectCreate>),
    PlayerCreate { object_id: u32 },
    ObjectDelete { object_id: u32 },
    PositionUpdate(PositionUpdate),
    PropertyUpdate(PropertyUpdate),
    /// Opcodes without a decoder; not an error
    Opaque { opcode: u32, data: Vec<u8> },
}

impl Message {
    /// The message's wire opcode
    pub fn opcode(&self) -> u32 {
        match self {
            Message::ServerName(_) => opcodes::SERVER_NAME,
            Message::ServerText(_) => opcodes::SERVER_MESSAGE,
            Message::HearSpeech(_) => opcodes::HEAR_SPEECH,
            Message::CharacterList(_) => opcodes::CHARACTER_LIST,
            Message::CharacterError { .. } => opcodes::CHARACTER_ERROR,
            Message::CharacterEnterWorldServerReady => {
                opcodes::CHARACTER_ENTER_WORLD_SERVER_READY
            }
            Message::CharacterEnterWorldRequest => opcodes::CHARACTER_ENTER_WORLD_REQUEST,
            Message::CharacterEnterWorld { .. } => opcodes::CHARACTER_ENTER_WORLD,
            Message::GameAction(_) => opcodes::GAME_ACTION,
            Message::GameEvent { .. } => opcodes::GAME_EVENT,
            Message::ObjectCreate(_) => opcodes::OBJECT_CREATE,
            Message::PlayerCreate { .. } => opcodes::PLAYER_CREATE,
            Message::ObjectDelete { .. } => opcodes::OBJECT_DELETE,
            Message::PositionUpdate(_) => opcodes::UPDATE_POSITION,
            Message::PropertyUpdate(upd) => property_update_opcode(upd),
            Message::Opaque { opcode, .. } => *opcode,
        }
    }

    /// Decode a reassembled message body. Unknown opcodes come back as
    /// [`Message::Opaque`]; only malformed bodies of known opcodes error.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::new(data);
        let opcode = r.read_u32("opcode")?;
        Self::decode_body(opcode, &mut r).map_err(|e| e.for_opcode(opcode))
    }

    fn decode_body(opcode: u32, r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let msg = match opcode {
            opcodes::SERVER_NAME => Message::ServerName(ServerName::read(r)?),
            opcodes::SERVER_MESSAGE => Message::ServerText(ServerText::read(r)?),
            opcodes::HEAR_SPEECH => Message::HearSpeech(HearSpeech::read(r)?),
            opcodes::CHARACTER_LIST => Message::CharacterList(CharacterList::read(r)?),
            opcodes::CHARACTER_ERROR => Message::CharacterError {
                code: r.read_u32("character_error.code")?,
            },
            opcodes::CHARACTER_ENTER_WORLD_SERVER_READY => {
                Message::CharacterEnterWorldServerReady
            }
            opcodes::CHARACTER_ENTER_WORLD_REQUEST => Message::CharacterEnterWorldRequest,
            opcodes::CHARACTER_ENTER_WORLD => Message::CharacterEnterWorld {
                object_id: r.read_u32("character_enter_world.object_id")?,
                account: r.read_pad_str16("character_enter_world.account")?,
            },
            opcodes::GAME_ACTION => Message::GameAction(GameAction::read(r)?),
            opcodes::GAME_EVENT => {
                let target = r.read_u32("game_event.target")?;
                let sequence = r.read_u32("game_event.sequence")?;
                let event = r.read_u32("game_event.event")?;
                let payload = match event {
                    opcodes::events::PLAYER_DESCRIPTION => GameEventPayload::PlayerDescription(
                        Box::new(PlayerDescription::read(target, sequence, r)?),
                    ),
                    _ => {
                        let data = r.rest().to_vec();
                        r.skip("game_event.body", r.remaining())?;
                        GameEventPayload::Opaque { event, data }
                    }
                };
                Message::GameEvent {
                    target,
                    sequence,
                    payload,
                }
            }
            opcodes::OBJECT_CREATE => Message::ObjectCreate(Box::new(ObjectCreate::read(r)?)),
            opcodes::PLAYER_CREATE => Message::PlayerCreate {
                object_id: r.read_u32("player_create.object_id")?,
            },
            opcodes::OBJECT_DELETE => Message::ObjectDelete {
                object_id: r.read_u32("object_delete.object_id")?,
            },
            opcodes::UPDATE_POSITION => Message::PositionUpdate(PositionUpdate::read(r)?),

            opcodes::PRIVATE_UPDATE_PROPERTY_INT => property_update(r, false, |r| {
                Ok(PropertyValue::Int(r.read_i32("property_update.value")?))
            })?,
            opcodes::PUBLIC_UPDATE_PROPERTY_INT => property_update(r, true, |r| {
                Ok(PropertyValue::Int(r.read_i32("property_update.value")?))
            })?,
            opcodes::PRIVATE_UPDATE_PROPERTY_INT64 => property_update(r, false, |r| {
                Ok(PropertyValue::Int64(r.read_i64("property_update.value")?))
            })?,
            opcodes::PUBLIC_UPDATE_PROPERTY_INT64 => property_update(r, true, |r| {
                Ok(PropertyValue::Int64(r.read_i64("property_update.value")?))
            })?,
            opcodes::PRIVATE_UPDATE_PROPERTY_BOOL => property_update(r, false, |r| {
                Ok(PropertyValue::Bool(r.read_u32("property_update.value")? != 0))
            })?,
            opcodes::PUBLIC_UPDATE_PROPERTY_BOOL => property_update(r, true, |r| {
                Ok(PropertyValue::Bool(r.read_u32("property_update.value")? != 0))
            })?,
            opcodes::PRIVATE_UPDATE_PROPERTY_FLOAT => property_update(r, false, |r| {
                Ok(PropertyValue::Double(r.read_f64("property_update.value")?))
            })?,
            opcodes::PUBLIC_UPDATE_PROPERTY_FLOAT => property_update(r, true, |r| {
                Ok(PropertyValue::Double(r.read_f64("property_update.value")?))
            })?,
            opcodes::PRIVATE_UPDATE_PROPERTY_STRING => property_update(r, false, |r| {
                Ok(PropertyValue::String(
                    r.read_pad_str16("property_update.value")?,
                ))
            })?,
            opcodes::PUBLIC_UPDATE_PROPERTY_STRING => property_update(r, true, |r| {
                Ok(PropertyValue::String(
                    r.read_pad_str16("property_update.value")?,
                ))
            })?,
            opcodes::PRIVATE_UPDATE_PROPERTY_DID => property_update(r, false, |r| {
                Ok(PropertyValue::DataId(r.read_u32("property_update.value")?))
            })?,
            opcodes::PUBLIC_UPDATE_PROPERTY_DID => property_update(r, true, |r| {
                Ok(PropertyValue::DataId(r.read_u32("property_update.value")?))
            })?,
            opcodes::PRIVATE_UPDATE_PROPERTY_IID => property_update(r, false, |r| {
                Ok(PropertyValue::InstanceId(
                    r.read_u32("property_update.value")?,
                ))
            })?,
            opcodes::PUBLIC_UPDATE_PROPERTY_IID => property_update(r, true, |r| {
                Ok(PropertyValue::InstanceId(
                    r.read_u32("property_update.value")?,
                ))
            })?,

            _ => {
                let data = r.rest().to_vec();
                Message::Opaque { opcode, data }
            }
        };
        Ok(msg)
    }

    /// Encode a message, opcode first. Decode-only messages (the big S2C
    /// composites) are not built by the client core.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(64);
        w.write_u32(self.opcode());
        match self {
            Message::ServerName(m) => m.write(&mut w),
            Message::ServerText(m) => m.write(&mut w),
            Message::HearSpeech(m) => m.write(&mut w),
            Message::CharacterList(m) => m.write(&mut w),
            Message::CharacterError { code } => w.write_u32(*code),
            Message::CharacterEnterWorldServerReady => {}
            Message::CharacterEnterWorldRequest => {}
            Message::CharacterEnterWorld { object_id, account } => {
                w.write_u32(*object_id);
                w.write_pad_str16(account);
            }
            Message::GameAction(m) => m.write(&mut w),
            Message::GameEvent {
                target,
                sequence,
                payload,
            } => {
                w.write_u32(*target);
                w.write_u32(*sequence);
                match payload {
                    GameEventPayload::PlayerDescription(desc) => {
                        w.write_u32(opcodes::events::PLAYER_DESCRIPTION);
                        desc.write(&mut w);
                    }
                    GameEventPayload::Opaque { event, data } => {
                        w.write_u32(*event);
                        w.write_bytes(data);
                    }
                }
            }
            Message::PlayerCreate { object_id } => w.write_u32(*object_id),
            Message::ObjectDelete { object_id } => w.write_u32(*object_id),
            Message::PositionUpdate(m) => m.write(&mut w),
            Message::PropertyUpdate(upd) => upd.write(&mut w),
            Message::Opaque { data, .. } => w.write_bytes(data),
            Message::ObjectCreate(_) => {
                unreachable!("entity-create is decode-only in the client core")
            }
        }
        w.into_vec()
    }
}

fn property_update(
    r: &mut WireReader<'_>,
    is_public: bool,
    read_value: fn(&mut WireReader<'_>) -> Result<PropertyValue, CodecError>,
) -> Result<Message, CodecError> {
    Ok(Message::PropertyUpdate(PropertyUpdate::read(
        r, is_public, read_value,
    )?))
}

fn property_update_opcode(upd: &PropertyUpdate) -> u32 {
    use crate::codec::properties::PropertyKind;
    let base = match upd.value.kind() {
        PropertyKind::Int => opcodes::PRIVATE_UPDATE_PROPERTY_INT,
        PropertyKind::Int64 => opcodes::PRIVATE_UPDATE_PROPERTY_INT64,
        PropertyKind::Bool => opcodes::PRIVATE_UPDATE_PROPERTY_BOOL,
        PropertyKind::Double | PropertyKind::Float => opcodes::PRIVATE_UPDATE_PROPERTY_FLOAT,
        PropertyKind::String => opcodes::PRIVATE_UPDATE_PROPERTY_STRING,
        PropertyKind::DataId => opcodes::PRIVATE_UPDATE_PROPERTY_DID,
        PropertyKind::InstanceId => opcodes::PRIVATE_UPDATE_PROPERTY_IID,
    };
    if upd.is_public {
        base + 1
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_opcode_is_opaque() {
        let mut w = WireWriter::new();
        w.write_u32(0xDEAD_F00D);
        w.write_bytes(&[1, 2, 3]);
        let msg = Message::decode(&w.into_vec()).unwrap();
        assert_eq!(
            msg,
            Message::Opaque {
                opcode: 0xDEAD_F00D,
                data: vec![1, 2, 3],
            }
        );
        assert_eq!(msg.opcode(), 0xDEAD_F00D);
    }

    #[test]
    fn test_server_text_round_trip() {
        let msg = Message::ServerText(ServerText {
            text: "Welcome to Dereth".to_string(),
        });
        let bytes = msg.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_character_enter_world_request_is_bare_opcode() {
        let msg = Message::CharacterEnterWorldRequest;
        let bytes = msg.encode();
        assert_eq!(bytes, vec![0xC8, 0xF7, 0x00, 0x00]);
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_game_event_opaque_payload() {
        let msg = Message::GameEvent {
            target: 0x5000_0001,
            sequence: 14,
            payload: GameEventPayload::Opaque {
                event: 0x0282,
                data: vec![],
            },
        };
        let bytes = msg.encode();
        // target, sequence, event opcode
        assert_eq!(bytes.len(), 16);
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_game_event_player_description() {
        let desc = PlayerDescription {
            object_id: 0x5000_0001,
            event_sequence: 14,
            weenie_type: 10,
            spell_lists: vec![vec![]],
            ..Default::default()
        };
        let msg = Message::GameEvent {
            target: 0x5000_0001,
            sequence: 14,
            payload: GameEventPayload::PlayerDescription(Box::new(desc)),
        };
        let bytes = msg.encode();
        let back = Message::decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_property_update_round_trip_and_opcode() {
        let msg = Message::PropertyUpdate(PropertyUpdate {
            sequence: 7,
            object_id: 0,
            property: 25,
            value: PropertyValue::Int(275),
            is_public: false,
        });
        assert_eq!(msg.opcode(), opcodes::PRIVATE_UPDATE_PROPERTY_INT);
        let bytes = msg.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);

        let msg = Message::PropertyUpdate(PropertyUpdate {
            sequence: 7,
            object_id: 0x5000_0002,
            property: 5,
            value: PropertyValue::String("Sturdy".to_string()),
            is_public: true,
        });
        assert_eq!(msg.opcode(), opcodes::PUBLIC_UPDATE_PROPERTY_STRING);
        let bytes = msg.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_malformed_known_opcode_names_opcode() {
        // HearSpeech with a truncated body.
        let mut w = WireWriter::new();
        w.write_u32(opcodes::HEAR_SPEECH);
        w.write_u16(50); // claims 50 chars, none follow
        let err = Message::decode(&w.into_vec()).unwrap_err();
        assert!(matches!(
            err,
            CodecError::MalformedMessage {
                opcode: opcodes::HEAR_SPEECH,
                ..
            }
        ));
    }

    #[test]
    fn test_short_buffer_fails() {
        assert!(Message::decode(&[1, 2]).is_err());
    }
}
