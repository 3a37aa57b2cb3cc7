//! Error types for the hash chain crate.

use std::path::PathBuf;

use treeseal_types::{LinkHash, TreeHash};

/// Errors produced while parsing a single canonical link line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkParseError {
    /// The line is structurally broken (missing fields, bad hex, bad key).
    #[error("malformed link: {0}")]
    Malformed(String),

    /// The type tag is not part of the protocol.
    #[error("unknown link type '{0}'")]
    UnknownType(String),
}

/// The invariant a link violates during replay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    /// `previous` does not equal the hash of the preceding link.
    #[error("previous hash mismatch: expected {expected}, got {actual}")]
    BrokenLink {
        /// Hash of the preceding link.
        expected: LinkHash,
        /// Value stored in the link.
        actual: LinkHash,
    },

    /// The first link is not a chain-start link.
    #[error("chain does not begin with a chain-start link")]
    MissingGenesis,

    /// A chain-start link appears after the first position.
    #[error("chain-start link after the first position")]
    DuplicateGenesis,

    /// A signature does not verify against its key and payload.
    #[error("invalid signature by {0}")]
    BadSignature(String),

    /// The endorsing key is not in the signature control list.
    #[error("signer {0} is not authorized")]
    UnauthorizedSigner(String),

    /// `addkey` for a key that is already authorized.
    #[error("key {0} is already authorized")]
    KeyAlreadyAuthorized(String),

    /// `remkey` for a key that is not authorized.
    #[error("key {0} is not authorized")]
    UnknownKey(String),

    /// The quorum threshold would leave `1 <= m <= keys`.
    #[error("threshold {m} out of range for {keys} authorized keys")]
    ThresholdOutOfRange {
        /// Resulting threshold.
        m: usize,
        /// Resulting number of authorized keys.
        keys: usize,
    },

    /// `source` for a tree hash that is already part of history.
    #[error("tree hash {0} already recorded")]
    TreeAlreadyRecorded(TreeHash),

    /// `signtr` for a tree hash never recorded.
    #[error("tree hash {0} was never recorded")]
    UnknownTree(TreeHash),

    /// `signtr` for a tree hash that already reached quorum.
    #[error("tree hash {0} is already approved")]
    TreeAlreadyApproved(TreeHash),

    /// `signtr` for a tree recorded before the last approved one.
    #[error("tree hash {0} is older than the last approved tree")]
    TreeSuperseded(TreeHash),

    /// The same key signed the same tree hash twice.
    #[error("{signer} already signed tree hash {tree_hash}")]
    DuplicateSignature {
        /// Signer key (hex).
        signer: String,
        /// The tree hash.
        tree_hash: TreeHash,
    },
}

/// Errors that can occur during hash chain operations.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// I/O on the backing file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `start` was called on a path that already exists.
    #[error("chain file '{}' exists already", .0.display())]
    Exists(PathBuf),

    /// Another handle holds the exclusive lock.
    #[error("chain file '{}' is locked by another process", .path.display())]
    Locked {
        /// Path of the chain file.
        path: PathBuf,
    },

    /// The handle was closed; it can no longer append.
    #[error("hash chain handle is closed")]
    Closed,

    /// The chain file contains no links.
    #[error("chain file '{}' is empty", .0.display())]
    Empty(PathBuf),

    /// A stored line could not be parsed.
    #[error("link {index}: {source}")]
    Malformed {
        /// Zero-based position of the offending line.
        index: usize,
        /// The parse failure.
        #[source]
        source: LinkParseError,
    },

    /// A link violates a chain invariant.
    #[error("hash chain invalid at link {index}: {violation}")]
    Invalid {
        /// Zero-based position of the first offending link.
        index: usize,
        /// The violated invariant.
        violation: Violation,
    },

    /// The chain head differs from what the caller expects.
    #[error("head mismatch: expected {expected}, chain head is {actual}")]
    HeadMismatch {
        /// The head the caller expected.
        expected: LinkHash,
        /// The actual head.
        actual: LinkHash,
    },

    /// A free-text field contains a line break or is empty where text is required.
    #[error("invalid text field: {0}")]
    InvalidText(String),
}
