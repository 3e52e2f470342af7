//! Network layer
//!
//! The session state machine, the reliability and reassembly trackers, the
//! opcode dispatcher, and the async client loop that owns the socket.

pub mod client;
pub mod dispatch;
pub mod reassembly;
pub mod reliability;
pub mod session;
pub mod transport;

pub use client::Client;
pub use dispatch::{Delivery, Dispatcher, MessageHandler};
pub use reassembly::{CompletedMessage, Reassembler};
pub use session::{DisconnectReason, Session, SessionEvent, SessionOutput, SessionState};
pub use transport::Transport;
