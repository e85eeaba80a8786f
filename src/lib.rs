//! chatgate — pairing-based access control for chat-channel agents.
//!
//! Gates which external identities may exchange messages with an automated
//! agent. Unknown senders go through a pairing handshake that produces a
//! short-lived, human-verifiable code; an operator approves or rejects that
//! code out-of-band, which promotes the identity into a durable allow list.
//!
//! The stores are plain JSON documents guarded by lock files with
//! stale-owner recovery, so multiple worker threads or processes sharing the
//! same state directory stay consistent.

pub mod allowlist;
pub mod cli;
pub mod config;
pub mod error;
pub mod ident;
pub mod lockfile;
pub mod pairing;
pub mod persist;
pub mod policy;

pub use allowlist::AllowListStore;
pub use config::Config;
pub use error::StoreError;
pub use ident::IdentToken;
pub use pairing::{PairingRequest, PairingStore};
pub use policy::{ChatKind, Decision, GatePolicy, InboundMessage, PolicyEngine, PolicyMode};
