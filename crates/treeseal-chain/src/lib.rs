//! Append-only, hash-chained, signed log of release approvals.
//!
//! The [`HashChain`] records who may approve releases of a source tree (the
//! signature control list) and which tree hashes were approved. Each
//! [`Link`] references the hash of its predecessor, so the chain is strictly
//! linear and tamper-evident. Trust is derived by replaying the links from
//! genesis ([`ChainState::replay`]); nothing is cached across loads.

mod chain;
mod error;
mod link;
mod state;
mod store;

#[cfg(test)]
mod tests;

pub use chain::HashChain;
pub use error::{ChainError, LinkParseError, Violation};
pub use link::{
    Endorsement, Link, LinkKind, NONCE_SIZE, key_hex, key_possession_message,
    sign_key_possession,
};
pub use state::{ChainState, TreeRecord};
pub use store::parse_chain;

// Re-exported so callers can build keys without a direct dependency.
pub use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
