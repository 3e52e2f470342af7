//! Error handling module
//!
//! Defines the error types used across the protocol core. Per-datagram
//! recoverable failures (bad checksum, short datagram, malformed optional
//! headers) are logged and counted by the session loop and never surface
//! through the public API; everything here that does cross the API boundary
//! arrives wrapped in [`DerethError`].

use std::io;

use thiserror::Error;

/// Main error type for the protocol core
#[derive(Error, Debug)]
pub enum DerethError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Net(#[from] NetError),

    /// Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Serialization errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Session lifecycle errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Send channel closed")]
    ChannelClosed,

    #[error("Send buffer full")]
    SendBufferFull,

    #[error("Socket closed")]
    SocketClosed,
}

/// Wire protocol errors
///
/// The recoverable variants map one-to-one onto the ingress drop counters;
/// the session loop consumes them and increments telemetry rather than
/// propagating.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Datagram too short: {actual} bytes (header needs {expected})")]
    ShortDatagram { expected: usize, actual: usize },

    #[error("Checksum mismatch: computed {computed:#010X}, packet carried {carried:#010X}")]
    ChecksumMismatch { computed: u32, carried: u32 },

    #[error("Keystream desync at sequence {sequence}")]
    DecryptionDesync { sequence: u32 },

    #[error("Malformed optional header for flags {flags:#010X} at offset {offset}")]
    UnknownFlagShape { flags: u32, offset: usize },

    #[error("Fragment size {size} overruns packet payload of {payload} bytes")]
    FragmentOverrun { size: usize, payload: usize },

    #[error("Bad iteration field: {0:#06X}")]
    BadIteration(u16),

    #[error("Flag {flags:#010X} not allowed in state {state}")]
    StateViolation { flags: u32, state: &'static str },

    #[error("Message too large: {size} bytes exceeds {max} fragments")]
    MessageTooLarge { size: usize, max: usize },
}

/// Serialization errors
///
/// Produced by the wire reader and the message decoders; carries the failing
/// field name and byte offset so a bad capture can be triaged without a hex
/// dump session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Truncated read of '{field}' at offset {offset}: need {need} bytes, have {have}")]
    Truncated {
        field: &'static str,
        offset: usize,
        need: usize,
        have: usize,
    },

    #[error("Invalid value for '{field}' at offset {offset}: {reason}")]
    Invalid {
        field: &'static str,
        offset: usize,
        reason: String,
    },

    #[error("Malformed message {opcode:#010X}: '{field}' at offset {offset}")]
    MalformedMessage {
        opcode: u32,
        field: &'static str,
        offset: usize,
    },
}

impl CodecError {
    /// Attach an opcode to a bare reader error, preserving field and offset.
    pub fn for_opcode(self, opcode: u32) -> CodecError {
        match self {
            CodecError::Truncated { field, offset, .. }
            | CodecError::Invalid { field, offset, .. } => CodecError::MalformedMessage {
                opcode,
                field,
                offset,
            },
            other => other,
        }
    }
}

/// Session lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Session timed out after {secs}s of inactivity")]
    InactivityTimeout { secs: u64 },

    #[error("Peer disconnected")]
    PeerDisconnected,

    #[error("Server rejected credentials")]
    BadCredentials,

    #[error("Reassembly table overflow: {pending} pending messages")]
    ReassemblyOverflow { pending: usize },

    #[error("Retention memory cap exceeded: {bytes} bytes")]
    MemoryCapExceeded { bytes: usize },

    #[error("Operation requires state {required}, session is {actual}")]
    WrongState {
        required: &'static str,
        actual: &'static str,
    },
}

/// Result type alias for protocol core operations
pub type Result<T> = std::result::Result<T, DerethError>;

/// Ingress drop counters
///
/// Recoverable per-datagram failures land here instead of the upper layer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngressCounters {
    pub short_datagrams: u64,
    pub checksum_mismatches: u64,
    pub unknown_flag_shapes: u64,
    pub fragment_overruns: u64,
    pub duplicates: u64,
    pub bad_iterations: u64,
    pub state_violations: u64,
}

impl IngressCounters {
    /// Record a recoverable ingress failure against the matching counter.
    pub fn record(&mut self, err: &ProtocolError) {
        match err {
            ProtocolError::ShortDatagram { .. } => self.short_datagrams += 1,
            ProtocolError::ChecksumMismatch { .. } => self.checksum_mismatches += 1,
            ProtocolError::UnknownFlagShape { .. } => self.unknown_flag_shapes += 1,
            ProtocolError::FragmentOverrun { .. } => self.fragment_overruns += 1,
            ProtocolError::BadIteration(_) => self.bad_iterations += 1,
            ProtocolError::StateViolation { .. } => self.state_violations += 1,
            _ => {}
        }
    }

    /// Total dropped datagrams.
    pub fn total(&self) -> u64 {
        self.short_datagrams
            + self.checksum_mismatches
            + self.unknown_flag_shapes
            + self.fragment_overruns
            + self.duplicates
            + self.bad_iterations
            + self.state_violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::ChecksumMismatch {
            computed: 0xDEADBEEF,
            carried: 0x12345678,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: computed 0xDEADBEEF, packet carried 0x12345678"
        );

        let err = CodecError::Truncated {
            field: "cookie",
            offset: 8,
            need: 8,
            have: 4,
        };
        assert_eq!(
            err.to_string(),
            "Truncated read of 'cookie' at offset 8: need 8 bytes, have 4"
        );
    }

    #[test]
    fn test_codec_error_for_opcode() {
        let err = CodecError::Truncated {
            field: "flags",
            offset: 12,
            need: 4,
            have: 1,
        };
        let err = err.for_opcode(0xF745);
        assert_eq!(
            err,
            CodecError::MalformedMessage {
                opcode: 0xF745,
                field: "flags",
                offset: 12,
            }
        );
    }

    #[test]
    fn test_ingress_counters_record() {
        let mut counters = IngressCounters::default();
        counters.record(&ProtocolError::ShortDatagram {
            expected: 20,
            actual: 3,
        });
        counters.record(&ProtocolError::ChecksumMismatch {
            computed: 1,
            carried: 2,
        });
        counters.record(&ProtocolError::ChecksumMismatch {
            computed: 3,
            carried: 4,
        });
        assert_eq!(counters.short_datagrams, 1);
        assert_eq!(counters.checksum_mismatches, 2);
        assert_eq!(counters.total(), 3);
    }
}
