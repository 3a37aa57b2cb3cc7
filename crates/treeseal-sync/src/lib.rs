//! Synchronizing working trees to approved tree hashes.
//!
//! - [`PatchDir`] stores patches addressed by their `(from, to)` hashes.
//! - [`Synchronizer`] moves a directory along the recorded history to the
//!   approved tree, verifying the tree hash after every patch.
//! - [`publish`] records a working directory as a new tree.
//! - [`dist`] bundles a chain with its patches and applies such bundles.

pub mod dist;
mod error;
mod patch_dir;
mod publish;
mod sync;

#[cfg(test)]
mod tests;

pub use dist::{DIST_VERSION, Distribution, PatchFile};
pub use error::SyncError;
pub use patch_dir::PatchDir;
pub use publish::publish;
pub use sync::{SyncConfig, SyncOutcome, Synchronizer, find_path};
