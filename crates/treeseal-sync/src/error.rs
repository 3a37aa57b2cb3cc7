//! Error types for synchronization and distribution.

use treeseal_chain::ChainError;
use treeseal_tree::TreeError;
use treeseal_types::TreeHash;

/// Errors that can occur while syncing a tree or handling a distribution.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Loading, verifying or appending to the hash chain failed.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Hashing, diffing or patching the tree failed.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Distribution has an unsupported format version.
    #[error("unsupported distribution version {found}, this build supports version {supported}")]
    UnsupportedVersion {
        /// Version found in the bundle.
        found: u8,
        /// Version this build supports.
        supported: u8,
    },

    /// A patch file name is not `<from hex>-<to hex>`.
    #[error("invalid patch file name '{0}'")]
    InvalidPatchName(String),

    /// A patch's embedded hashes disagree with its file name.
    #[error("patch {from}-{to} declares {found_from}-{found_to}")]
    PatchMismatch {
        /// Source hash from the file name.
        from: TreeHash,
        /// Target hash from the file name.
        to: TreeHash,
        /// Source hash inside the patch.
        found_from: TreeHash,
        /// Target hash inside the patch.
        found_to: TreeHash,
    },

    /// No chain of available patches leads from the current tree to the target.
    #[error("no patch path from {from} to {to}")]
    MissingPatchPath {
        /// Current tree hash.
        from: TreeHash,
        /// Target tree hash.
        to: TreeHash,
    },

    /// More than one chain of patches leads to the target.
    #[error("more than one patch path from {from} to {to}")]
    AmbiguousPatchPath {
        /// Current tree hash.
        from: TreeHash,
        /// Target tree hash.
        to: TreeHash,
    },

    /// The current tree hash is not part of the recorded history.
    #[error("tree {0} is not part of the recorded history")]
    DivergentTree(TreeHash),

    /// The current tree is newer than the approved target.
    #[error("tree {current} is newer than the approved tree {target}")]
    AheadOfTarget {
        /// Current tree hash.
        current: TreeHash,
        /// Approved tree hash.
        target: TreeHash,
    },

    /// The tree hash after applying a patch is not the expected one.
    #[error("tree hash mismatch: expected {expected}, got {actual}")]
    TreeMismatch {
        /// Hash the patch promised.
        expected: TreeHash,
        /// Hash actually computed.
        actual: TreeHash,
    },

    /// The local chain is not a prefix of the incoming one.
    #[error("incoming chain does not extend the local chain ({local} local links, {incoming} incoming)")]
    Rollback {
        /// Number of links in the local chain.
        local: usize,
        /// Number of links in the incoming chain.
        incoming: usize,
    },
}

impl From<postcard::Error> for SyncError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
