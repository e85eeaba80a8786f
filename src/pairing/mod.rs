//! Pairing for unrecognized senders.
//!
//! Gates messages from unknown identities. An unknown sender receives a
//! short-lived pairing code and must be approved via `chatgate pairing
//! approve` before the agent will talk to them.

mod store;

pub use store::{PairingRequest, PairingStore, CODE_ALPHABET, CODE_LENGTH, MAX_PENDING_PER_CHAT};
