//! Application message opcodes
//!
//! The 32-bit opcode leads every application message. Only the opcodes the
//! core can decode are listed; anything else is delivered opaque.

// --- Connection & character selection ---
/// S2C: list of characters for the account
pub const CHARACTER_LIST: u32 = 0xF658;
/// C2S: request to enter the world with a character
pub const CHARACTER_ENTER_WORLD_REQUEST: u32 = 0xF7C8;
/// S2C: server ready for the character to enter
pub const CHARACTER_ENTER_WORLD_SERVER_READY: u32 = 0xF7DF;
/// C2S: final enter-world message carrying the account name
pub const CHARACTER_ENTER_WORLD: u32 = 0xF657;
/// S2C: character operation failed
pub const CHARACTER_ERROR: u32 = 0xF659;
/// S2C: server name and population
pub const SERVER_NAME: u32 = 0xF7E1;
/// S2C: administrative broadcast text
pub const SERVER_MESSAGE: u32 = 0xF7E0;

// --- World & object lifecycle ---
/// S2C: create an object (full model, physics, and weenie description)
pub const OBJECT_CREATE: u32 = 0xF745;
/// S2C: identify the player's own object
pub const PLAYER_CREATE: u32 = 0xF746;
/// S2C: remove an object from the world
pub const OBJECT_DELETE: u32 = 0xF747;
/// S2C: position sync for an object
pub const UPDATE_POSITION: u32 = 0xF748;

// --- Wrappers ---
/// S2C: ordered event wrapper (target, sequence, event opcode)
pub const GAME_EVENT: u32 = 0xF7B0;
/// C2S: ordered action wrapper (sequence, action opcode)
pub const GAME_ACTION: u32 = 0xF7B1;

// --- Chat ---
/// S2C: local speech
pub const HEAR_SPEECH: u32 = 0x02BB;

// --- Property updates, private then public per type ---
pub const PRIVATE_UPDATE_PROPERTY_INT: u32 = 0x02CD;
pub const PUBLIC_UPDATE_PROPERTY_INT: u32 = 0x02CE;
pub const PRIVATE_UPDATE_PROPERTY_INT64: u32 = 0x02CF;
pub const PUBLIC_UPDATE_PROPERTY_INT64: u32 = 0x02D0;
pub const PRIVATE_UPDATE_PROPERTY_BOOL: u32 = 0x02D1;
pub const PUBLIC_UPDATE_PROPERTY_BOOL: u32 = 0x02D2;
pub const PRIVATE_UPDATE_PROPERTY_FLOAT: u32 = 0x02D3;
pub const PUBLIC_UPDATE_PROPERTY_FLOAT: u32 = 0x02D4;
pub const PRIVATE_UPDATE_PROPERTY_STRING: u32 = 0x02D5;
pub const PUBLIC_UPDATE_PROPERTY_STRING: u32 = 0x02D6;
pub const PRIVATE_UPDATE_PROPERTY_DID: u32 = 0x02D7;
pub const PUBLIC_UPDATE_PROPERTY_DID: u32 = 0x02D8;
pub const PRIVATE_UPDATE_PROPERTY_IID: u32 = 0x02D9;
pub const PUBLIC_UPDATE_PROPERTY_IID: u32 = 0x02DA;

/// Event opcodes carried inside [`GAME_EVENT`]
pub mod events {
    /// Full self-description of the player character
    pub const PLAYER_DESCRIPTION: u32 = 0x0013;
}
