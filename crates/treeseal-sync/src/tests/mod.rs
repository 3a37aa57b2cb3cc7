//! Tests for the sync crate.


use std::path::{Path, PathBuf};

use tempfile::TempDir;
use treeseal_chain::{HashChain, SigningKey};
use treeseal_types::{Layout, TreeHash};

use crate::patch_dir::PatchDir;
use crate::publish::publish;
use crate::sync::SyncConfig;

/// Deterministic signing key from a seed byte.
fn test_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// Write `contents` to `rel` under `dir`, creating parents.
fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// A working tree with its own chain, single signer, threshold 1.
struct Publisher {
    _root: TempDir,
    work: PathBuf,
    layout: Layout,
    chain: HashChain,
    key: SigningKey,
}

impl Publisher {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let layout = Layout::in_tree(&work);
        let key = test_key(1);
        let (chain, _) = HashChain::start(layout.chain_path(), &key, Some("test")).unwrap();
        Self {
            _root: root,
            work,
            layout,
            chain,
            key,
        }
    }

    fn patches(&self) -> PatchDir {
        PatchDir::new(self.layout.patch_dir())
    }

    fn write(&self, rel: &str, contents: &str) -> &Self {
        write(&self.work, rel, contents);
        self
    }

    fn remove(&self, rel: &str) -> &Self {
        std::fs::remove_file(self.work.join(rel)).unwrap();
        self
    }

    /// Publish the working tree without approving it.
    fn publish(&mut self) -> TreeHash {
        let patches = self.patches();
        publish(
            &mut self.chain,
            &self.work,
            &patches,
            &SyncConfig::default(),
            None,
            &self.key,
        )
        .unwrap()
        .expect("working tree has changes")
    }

    /// Publish and sign with the only key, which approves at threshold 1.
    fn release(&mut self) -> TreeHash {
        let tree = self.publish();
        self.chain.sign_tree(tree, &self.key).unwrap();
        tree
    }
}
