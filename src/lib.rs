//! Client-side network core for the Asheron's Call UDP wire protocol
//!
//! This library turns raw datagrams into ordered, reassembled application
//! messages and back: the 20-byte packet framing with its composite
//! checksum, the reverse-consumed ISAAC keystream that masks post-handshake
//! checksums, dual-sequence reliability with fragment reassembly and
//! ACK/NAK, the login handshake state machine, and the serialization
//! primitives the bitmask-driven game messages are built from.
//!
//! ## Modules
//!
//! - `codec` - wire reader/writer, packed integers, strings, positions,
//!   bucket-ordered property tables
//! - `config` - tunables with TOML loading
//! - `crypto` - the integrity hash and the keystream
//! - `error` - error types and result alias
//! - `net` - session state machine, reliability, dispatch, client loop
//! - `protocol` - packet framing, fragments, handshake, typed messages
//!
//! The upper layers (UI, world state, asset files) live elsewhere; the only
//! surface here is [`Client`], the [`Dispatcher`] callbacks, and the
//! [`SessionEvent`] stream.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod net;
pub mod protocol;

pub use config::ClientConfig;
pub use error::{DerethError, Result};
pub use net::{Client, Delivery, Dispatcher, SessionEvent};
pub use protocol::{Credentials, Message};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
