//! Recording a new release of a working directory.

use std::path::Path;

use tracing::info;
use treeseal_chain::{ChainError, HashChain, SigningKey, Violation};
use treeseal_tree::diff;
use treeseal_types::TreeHash;

use crate::error::SyncError;
use crate::patch_dir::PatchDir;
use crate::sync::{SyncConfig, Synchronizer};

type Result<T> = std::result::Result<T, SyncError>;

/// Record the current state of `dir` as a new tree in `chain`.
///
/// The last recorded tree is rebuilt from `EMPTY_TREE` in a temporary
/// directory using the stored patches, diffed against `dir`, and the
/// resulting patch is stored before the `source` link is appended.
/// Returns `None` if `dir` matches the last recorded tree.
pub fn publish(
    chain: &mut HashChain,
    dir: &Path,
    patches: &PatchDir,
    config: &SyncConfig,
    comment: Option<&str>,
    signer: &SigningKey,
) -> Result<Option<TreeHash>> {
    let recorded = chain.tree_hashes();
    let last = recorded.last().copied().unwrap_or_else(TreeHash::empty);

    let base = tempfile::tempdir()?;
    Synchronizer::new(config.clone()).sync_dir(base.path(), Some(last), patches, &recorded)?;

    let patch = diff(base.path(), dir, &config.excludes)?;
    if patch.is_empty() {
        info!(dir = %dir.display(), tree = %last, "no changes since last recorded tree");
        return Ok(None);
    }

    // Checked here so a rejected tree does not leave a patch behind.
    if patch.to == TreeHash::empty() || chain.state().tree(&patch.to).is_some() {
        return Err(ChainError::Invalid {
            index: chain.len(),
            violation: Violation::TreeAlreadyRecorded(patch.to),
        }
        .into());
    }

    patches.put(&patch)?;
    chain.record_tree(patch.to, comment, signer)?;

    info!(
        from = %patch.from,
        to = %patch.to,
        ops = patch.ops.len(),
        "published tree"
    );
    Ok(Some(patch.to))
}
