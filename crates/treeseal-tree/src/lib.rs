//! Directory tree hashing, diffing and patching.
//!
//! This crate provides:
//! - [`tree_hash`] computes a deterministic digest of a directory's regular files.
//! - [`diff`] builds the [`Patch`] that turns one directory into another.
//! - [`apply_patch`] applies a patch in place, atomically per file.
//!
//! Patches are serialized with postcard and carry the tree hashes they go
//! from and to, so a patch can be checked before and after it is applied.

mod error;
mod hash;
mod patch;

pub use error::TreeError;
pub use hash::{Excludes, TreeEntry, hash_listing, tree_hash, tree_listing};
pub use patch::{
    PATCH_VERSION, Patch, PatchOp, apply_patch, deserialize_patch, diff, serialize_patch,
};
