//! Opcode dispatch
//!
//! Maps opcodes to subscriber lists. A reassembled payload is decoded once,
//! then fanned out: typed subscribers for known opcodes, the default sink
//! for everything else. Malformed bodies of known opcodes are delivered to
//! the same subscribers with the failing field and offset, so the upper
//! layer can triage without touching raw captures.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::CodecError;
use crate::net::reassembly::CompletedMessage;
use crate::protocol::messages::Message;

/// What a subscriber receives
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A fully decoded message
    Decoded {
        message: Message,
        queue: u16,
    },
    /// A known opcode whose body did not decode
    Malformed {
        opcode: u32,
        error: CodecError,
        raw: Vec<u8>,
    },
}

impl Delivery {
    pub fn opcode(&self) -> u32 {
        match self {
            Delivery::Decoded { message, .. } => message.opcode(),
            Delivery::Malformed { opcode, .. } => *opcode,
        }
    }
}

/// Subscriber callback
pub type MessageHandler = Arc<dyn Fn(&Delivery) + Send + Sync>;

/// Opcode → subscriber registry
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<u32, Vec<MessageHandler>>>,
    default: RwLock<Option<MessageHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one opcode
    pub fn subscribe(&self, opcode: u32, handler: MessageHandler) {
        self.handlers.write().entry(opcode).or_default().push(handler);
    }

    /// Sink for opcodes without subscribers (and for opaque messages)
    pub fn set_default(&self, handler: MessageHandler) {
        *self.default.write() = Some(handler);
    }

    /// Decode a reassembled message and fan it out. Returns the delivery so
    /// callers can forward it to a channel as well.
    pub fn dispatch(&self, completed: &CompletedMessage) -> Delivery {
        let delivery = match Message::decode(&completed.payload) {
            Ok(message) => {
                trace!(opcode = message.opcode(), "dispatching");
                Delivery::Decoded {
                    message,
                    queue: completed.queue,
                }
            }
            Err(error) => {
                let opcode = completed
                    .payload
                    .get(0..4)
                    .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
                    .unwrap_or(0);
                debug!(opcode, %error, "malformed message");
                Delivery::Malformed {
                    opcode,
                    error,
                    raw: completed.payload.clone(),
                }
            }
        };

        let opcode = delivery.opcode();
        let handlers = self.handlers.read();
        match handlers.get(&opcode) {
            Some(subscribers) if !subscribers.is_empty() => {
                for handler in subscribers {
                    handler(&delivery);
                }
            }
            _ => {
                if let Some(default) = self.default.read().as_ref() {
                    default(&delivery);
                }
            }
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::opcodes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn completed(payload: Vec<u8>) -> CompletedMessage {
        CompletedMessage {
            fragment_sequence: 1,
            queue: 1,
            payload,
        }
    }

    #[test]
    fn test_subscriber_receives_decoded_message() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        dispatcher.subscribe(
            opcodes::SERVER_MESSAGE,
            Arc::new(move |delivery| {
                assert!(matches!(
                    delivery,
                    Delivery::Decoded {
                        message: Message::ServerText(_),
                        ..
                    }
                ));
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let msg = Message::ServerText(crate::protocol::messages::ServerText {
            text: "hi".to_string(),
        });
        dispatcher.dispatch(&completed(msg.encode()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_opcode_goes_to_default() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        dispatcher.set_default(Arc::new(move |delivery| {
            assert_eq!(delivery.opcode(), 0xDEAD_F00D);
            hits2.fetch_add(1, Ordering::SeqCst);
        }));

        let mut payload = 0xDEAD_F00Du32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[1, 2, 3]);
        let delivery = dispatcher.dispatch(&completed(payload));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(matches!(
            delivery,
            Delivery::Decoded {
                message: Message::Opaque { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_known_opcode_reaches_subscriber() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        dispatcher.subscribe(
            opcodes::HEAR_SPEECH,
            Arc::new(move |delivery| {
                let Delivery::Malformed { opcode, error, .. } = delivery else {
                    panic!("expected malformed delivery");
                };
                assert_eq!(*opcode, opcodes::HEAR_SPEECH);
                assert!(matches!(error, CodecError::MalformedMessage { .. }));
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // Truncated HearSpeech body.
        let mut payload = opcodes::HEAR_SPEECH.to_le_bytes().to_vec();
        payload.extend_from_slice(&50u16.to_le_bytes());
        dispatcher.dispatch(&completed(payload));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_multiple_subscribers_all_fire() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            dispatcher.subscribe(
                opcodes::SERVER_MESSAGE,
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        let msg = Message::ServerText(crate::protocol::messages::ServerText {
            text: "x".to_string(),
        });
        dispatcher.dispatch(&completed(msg.encode()));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
