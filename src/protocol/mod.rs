//! Wire protocol implementation
//!
//! Packet framing with the composite checksum, fragment layout, handshake
//! payloads, and the typed application-message layer.

pub mod fragment;
pub mod handshake;
pub mod messages;
pub mod opcodes;
pub mod packet;

pub use fragment::{Fragment, FragmentHeader, FRAGMENT_HEADER_SIZE, MAX_FRAGMENT_DATA};
pub use handshake::{ConnectRequest, Credentials, LoginRequest};
pub use messages::Message;
pub use packet::{
    Packet, PacketFlags, PacketHeader, HEADER_SIZE, ITERATION, MAX_PACKET_SIZE,
};
