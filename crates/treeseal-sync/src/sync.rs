//! Bringing a directory to an approved tree hash.
//!
//! The history of a tree is `EMPTY_TREE` followed by every tree hash
//! recorded in the chain. Stored patches are edges between two points of
//! that history, always pointing forward. Synchronizing means finding the
//! unique sequence of edges from the directory's current hash to the
//! target, then applying it while checking the tree hash after every step.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};
use treeseal_tree::{Excludes, Patch, apply_patch, tree_hash};
use treeseal_types::TreeHash;

use crate::error::SyncError;
use crate::patch_dir::PatchDir;

type Result<T> = std::result::Result<T, SyncError>;

/// Settings for a [`Synchronizer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Paths left out of tree hashing and patching.
    pub excludes: Excludes,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            excludes: Excludes::control_dir(),
        }
    }
}

/// What [`Synchronizer::sync_dir`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No tree has been approved yet; the directory was left alone.
    NoTarget,
    /// The directory already has the target hash.
    UpToDate(TreeHash),
    /// Patches were applied.
    Applied {
        /// Tree hash before syncing.
        from: TreeHash,
        /// Tree hash after syncing.
        to: TreeHash,
        /// Number of patches applied.
        patches: usize,
    },
}

/// Applies stored patches to move a directory along its recorded history.
#[derive(Debug, Clone, Default)]
pub struct Synchronizer {
    config: SyncConfig,
}

impl Synchronizer {
    /// Create a synchronizer with the given settings.
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// The active settings.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Tree hash of `dir` under the configured excludes.
    pub fn current_hash(&self, dir: &Path) -> Result<TreeHash> {
        Ok(tree_hash(dir, &self.config.excludes)?)
    }

    /// Bring `dir` to `target` using patches from `patches`.
    ///
    /// `recorded` is the chain's recorded tree history in order. The whole
    /// patch path is resolved and loaded before the directory is touched,
    /// so a missing or ambiguous path leaves it unchanged.
    pub fn sync_dir(
        &self,
        dir: &Path,
        target: Option<TreeHash>,
        patches: &PatchDir,
        recorded: &[TreeHash],
    ) -> Result<SyncOutcome> {
        let Some(target) = target else {
            info!(dir = %dir.display(), "no approved tree, nothing to sync");
            return Ok(SyncOutcome::NoTarget);
        };

        let current = self.current_hash(dir)?;
        if current == target {
            debug!(dir = %dir.display(), hash = %current, "tree already up to date");
            return Ok(SyncOutcome::UpToDate(current));
        }

        let history: Vec<TreeHash> = std::iter::once(TreeHash::empty())
            .chain(recorded.iter().copied())
            .collect();
        let path = find_path(&history, &patches.edges()?, current, target)?;

        let mut loaded: Vec<Patch> = Vec::with_capacity(path.len());
        for (from, to) in &path {
            let patch = patches
                .get(from, to)?
                .ok_or(SyncError::MissingPatchPath { from: *from, to: *to })?;
            loaded.push(patch);
        }

        for patch in &loaded {
            apply_patch(dir, patch, &self.config.excludes)?;
            let actual = self.current_hash(dir)?;
            if actual != patch.to {
                return Err(SyncError::TreeMismatch {
                    expected: patch.to,
                    actual,
                });
            }
            debug!(from = %patch.from, to = %patch.to, "applied patch");
        }

        let actual = self.current_hash(dir)?;
        if actual != target {
            return Err(SyncError::TreeMismatch {
                expected: target,
                actual,
            });
        }

        info!(
            dir = %dir.display(),
            from = %current,
            to = %target,
            patches = loaded.len(),
            "synced tree"
        );
        Ok(SyncOutcome::Applied {
            from: current,
            to: target,
            patches: loaded.len(),
        })
    }
}

/// Find the unique forward path of edges from `from` to `to`.
///
/// `history` is the ordered tree history. Edges whose ends are not both in
/// history, or that point backwards, are ignored. Returns an empty path
/// when `from == to`.
pub fn find_path(
    history: &[TreeHash],
    edges: &[(TreeHash, TreeHash)],
    from: TreeHash,
    to: TreeHash,
) -> Result<Vec<(TreeHash, TreeHash)>> {
    // The first occurrence wins; recorded hashes are unique after EMPTY_TREE.
    let mut position: HashMap<TreeHash, usize> = HashMap::new();
    for (i, hash) in history.iter().enumerate() {
        position.entry(*hash).or_insert(i);
    }

    let start = *position.get(&from).ok_or(SyncError::DivergentTree(from))?;
    let end = *position
        .get(&to)
        .ok_or(SyncError::MissingPatchPath { from, to })?;
    if start > end {
        return Err(SyncError::AheadOfTarget {
            current: from,
            target: to,
        });
    }
    if start == end {
        return Ok(Vec::new());
    }

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); end + 1];
    for (a, b) in edges {
        if let (Some(&i), Some(&j)) = (position.get(a), position.get(b))
            && start <= i
            && i < j
            && j <= end
        {
            successors[i].push(j);
        }
    }

    // paths[i] = number of paths from i to end, capped at 2.
    let mut paths = vec![0u8; end + 1];
    let mut next = vec![None; end + 1];
    paths[end] = 1;
    for i in (start..end).rev() {
        for &j in &successors[i] {
            if paths[j] > 0 {
                paths[i] = (paths[i] + paths[j]).min(2);
                next[i].get_or_insert(j);
            }
        }
    }

    match paths[start] {
        0 => Err(SyncError::MissingPatchPath { from, to }),
        1 => {
            let mut path = Vec::new();
            let mut i = start;
            while let Some(j) = next[i] {
                path.push((history[i], history[j]));
                i = j;
            }
            Ok(path)
        }
        _ => Err(SyncError::AmbiguousPatchPath { from, to }),
    }
}
