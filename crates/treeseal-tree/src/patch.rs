//! Patches between two tree states.
//!
//! A [`Patch`] takes a tree from hash `from` to hash `to`. It is a list of
//! whole-file writes and deletes, serialized with postcard. Deletes come
//! first so a file can be replaced by a directory of the same name and
//! vice versa.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use treeseal_types::TreeHash;

use crate::error::TreeError;
use crate::hash::{Excludes, TreeEntry, hash_listing, tree_listing};

type Result<T> = std::result::Result<T, TreeError>;

/// Current patch envelope version.
pub const PATCH_VERSION: u8 = 1;

/// A single file operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchOp {
    /// Create or replace a file.
    Write {
        /// Slash-separated path relative to the tree root.
        path: String,
        /// Whether the file is executable.
        executable: bool,
        /// Full file contents.
        contents: Vec<u8>,
    },
    /// Remove a file.
    Delete {
        /// Slash-separated path relative to the tree root.
        path: String,
    },
}

impl PatchOp {
    /// The path this operation touches.
    pub fn path(&self) -> &str {
        match self {
            Self::Write { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// Transformation from tree `from` to tree `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Envelope version, see [`PATCH_VERSION`].
    pub version: u8,
    /// Tree hash the patch applies to.
    pub from: TreeHash,
    /// Tree hash after applying the patch.
    pub to: TreeHash,
    /// Deletes first, then writes; each group sorted by path.
    pub ops: Vec<PatchOp>,
}

impl Patch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Compute the patch that turns `from_dir` into `to_dir`.
pub fn diff(from_dir: &Path, to_dir: &Path, excludes: &Excludes) -> Result<Patch> {
    let from_list = tree_listing(from_dir, excludes)?;
    let to_list = tree_listing(to_dir, excludes)?;

    let old: BTreeMap<&str, &TreeEntry> = from_list.iter().map(|e| (e.path.as_str(), e)).collect();
    let new: BTreeMap<&str, &TreeEntry> = to_list.iter().map(|e| (e.path.as_str(), e)).collect();

    let mut ops = Vec::new();
    for path in old.keys().filter(|p| !new.contains_key(*p)) {
        ops.push(PatchOp::Delete {
            path: path.to_string(),
        });
    }
    for (path, entry) in &new {
        let changed = old
            .get(path)
            .is_none_or(|o| o.hash != entry.hash || o.executable != entry.executable);
        if changed {
            ops.push(PatchOp::Write {
                path: path.to_string(),
                executable: entry.executable,
                contents: std::fs::read(to_dir.join(path))?,
            });
        }
    }

    let patch = Patch {
        version: PATCH_VERSION,
        from: hash_listing(&from_list),
        to: hash_listing(&to_list),
        ops,
    };
    debug!(from = %patch.from, to = %patch.to, ops = patch.ops.len(), "computed diff");
    Ok(patch)
}

/// Apply `patch` to `dir`.
///
/// Every path is validated before the tree is touched. The caller is
/// responsible for checking the resulting tree hash.
pub fn apply_patch(dir: &Path, patch: &Patch, excludes: &Excludes) -> Result<()> {
    for op in &patch.ops {
        validate_path(op.path(), excludes)?;
    }

    for op in &patch.ops {
        match op {
            PatchOp::Delete { path } => {
                let full = dir.join(path);
                match std::fs::symlink_metadata(&full) {
                    Ok(m) if m.is_file() => {}
                    Ok(_) => return Err(TreeError::UnsupportedFileType(full)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(TreeError::MissingFile(path.clone()));
                    }
                    Err(e) => return Err(e.into()),
                }
                std::fs::remove_file(&full)?;
                prune_empty_dirs(dir, &full)?;
            }
            PatchOp::Write {
                path,
                executable,
                contents,
            } => {
                let full = dir.join(path);
                let parent = full
                    .parent()
                    .ok_or_else(|| TreeError::InvalidPath(path.clone()))?;
                std::fs::create_dir_all(parent)?;

                // Write to a temp file in the same directory, then rename.
                let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
                tmp.write_all(contents)?;
                set_mode(tmp.as_file(), *executable)?;
                tmp.persist(&full).map_err(|e| TreeError::Io(e.error))?;
            }
        }
    }

    debug!(dir = %dir.display(), from = %patch.from, to = %patch.to, "applied patch");
    Ok(())
}

/// Serialize a patch to postcard bytes.
pub fn serialize_patch(patch: &Patch) -> Result<Vec<u8>> {
    Ok(postcard::to_allocvec(patch)?)
}

/// Deserialize a patch, rejecting unknown envelope versions.
pub fn deserialize_patch(bytes: &[u8]) -> Result<Patch> {
    let patch: Patch = postcard::from_bytes(bytes)?;
    if patch.version != PATCH_VERSION {
        return Err(TreeError::UnsupportedVersion {
            found: patch.version,
            supported: PATCH_VERSION,
        });
    }
    Ok(patch)
}

/// Reject absolute paths, `.`/`..` components and excluded paths.
fn validate_path(path: &str, excludes: &Excludes) -> Result<()> {
    let bad_component = path
        .split('/')
        .any(|c| c.is_empty() || c == "." || c == ".." || c.contains(['\\', '\0', '\n']));
    if bad_component {
        return Err(TreeError::InvalidPath(path.to_string()));
    }
    if excludes.is_excluded(path) {
        return Err(TreeError::ExcludedPath(path.to_string()));
    }
    Ok(())
}

/// Remove directories left empty by a delete, up to (not including) `root`.
fn prune_empty_dirs(root: &Path, removed: &Path) -> Result<()> {
    let mut current = removed.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        if std::fs::read_dir(dir)?.next().is_some() {
            break;
        }
        std::fs::remove_dir(dir)?;
        current = dir.parent();
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &std::fs::File, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    file.set_permissions(std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_file: &std::fs::File, _executable: bool) -> Result<()> {
    Ok(())
}
