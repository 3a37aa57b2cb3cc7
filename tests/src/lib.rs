//! Shared test harness for treeseal integration tests.
//!
//! Provides [`Origin`], a working tree where releases are published and
//! signed, and [`Mirror`], a tree that only receives distributions and
//! syncs to the approved release.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use treeseal_chain::{HashChain, SigningKey, sign_key_possession};
use treeseal_sync::{PatchDir, SyncConfig, SyncOutcome, Synchronizer, dist, publish};
use treeseal_tree::{Excludes, tree_hash};
use treeseal_types::{Layout, LinkHash, TreeHash};

/// Deterministic signing key from a seed byte.
pub fn key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// Write `contents` to `rel` under `dir`, creating parents.
pub fn write_file(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().expect("relative path has a parent"))
        .expect("create parent dirs");
    std::fs::write(path, contents).expect("write file");
}

/// Tree hash of `dir`, ignoring the control directory.
pub fn hash_of(dir: &Path) -> TreeHash {
    tree_hash(dir, &Excludes::control_dir()).expect("hash tree")
}

// =========================================================================
// Origin
// =========================================================================

/// The tree releases are cut from.
pub struct Origin {
    _root: TempDir,
    /// Working tree.
    pub dir: PathBuf,
    /// Control directory layout inside `dir`.
    pub layout: Layout,
    /// The open, locked chain.
    pub chain: HashChain,
}

impl Origin {
    /// Start a chain with `founder` as the only signer.
    pub fn start(founder: &SigningKey) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = root.path().join("origin");
        std::fs::create_dir_all(&dir).expect("create origin");
        let layout = Layout::in_tree(&dir);
        let (chain, _) =
            HashChain::start(layout.chain_path(), founder, Some("origin")).expect("start chain");
        Self {
            _root: root,
            dir,
            layout,
            chain,
        }
    }

    /// The origin's patch directory.
    pub fn patches(&self) -> PatchDir {
        PatchDir::new(self.layout.patch_dir())
    }

    /// Authorize `new_key`, endorsed by `signer`.
    pub fn add_signer(&mut self, new_key: &SigningKey, signer: &SigningKey) {
        self.chain
            .add_key(
                new_key.verifying_key(),
                sign_key_possession(new_key, None),
                None,
                signer,
            )
            .expect("add key");
    }

    /// Write a file into the working tree.
    pub fn write(&self, rel: &str, contents: &str) {
        write_file(&self.dir, rel, contents);
    }

    /// Remove a file from the working tree.
    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.dir.join(rel)).expect("remove file");
    }

    /// Publish the working tree, recording a new tree hash.
    pub fn publish(&mut self, comment: &str, signer: &SigningKey) -> TreeHash {
        let patches = self.patches();
        publish(
            &mut self.chain,
            &self.dir,
            &patches,
            &SyncConfig::default(),
            Some(comment),
            signer,
        )
        .expect("publish")
        .expect("working tree changed")
    }

    /// Sign `tree` with `signer`.
    pub fn sign(&mut self, tree: TreeHash, signer: &SigningKey) {
        self.chain.sign_tree(tree, signer).expect("sign tree");
    }

    /// Bundle the chain and patches, returning the bytes and chain head.
    pub fn distribution(&mut self) -> (Vec<u8>, LinkHash) {
        // The bundle is read from disk; release and retake the lock around it.
        self.chain.close().expect("close chain");
        let mut out = Vec::new();
        let head = dist::create(&self.layout.chain_path(), &self.patches(), &mut out)
            .expect("create distribution");
        self.chain = HashChain::read_file(self.layout.chain_path()).expect("reopen chain");
        (out, head)
    }
}

// =========================================================================
// Mirror
// =========================================================================

/// A tree that follows the origin through distributions.
pub struct Mirror {
    _root: TempDir,
    /// Working tree.
    pub dir: PathBuf,
    /// Control directory layout inside `dir`.
    pub layout: Layout,
}

impl Default for Mirror {
    fn default() -> Self {
        Self::new()
    }
}

impl Mirror {
    /// An empty mirror with no chain yet.
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = root.path().join("mirror");
        std::fs::create_dir_all(&dir).expect("create mirror");
        let layout = Layout::in_tree(&dir);
        Self {
            _root: root,
            dir,
            layout,
        }
    }

    /// The mirror's patch directory.
    pub fn patches(&self) -> PatchDir {
        PatchDir::new(self.layout.patch_dir())
    }

    /// Import a distribution and sync to its approved tree.
    pub fn apply(
        &self,
        bundle: &[u8],
        expected_head: Option<&LinkHash>,
    ) -> Result<SyncOutcome, treeseal_sync::SyncError> {
        let patches = self.patches();
        let mut chain = dist::apply(&self.layout.chain_path(), &patches, bundle, expected_head)?;
        let outcome = Synchronizer::new(SyncConfig::default()).sync_dir(
            &self.dir,
            chain.last_approved_tree_hash(),
            &patches,
            &chain.tree_hashes(),
        )?;
        chain.close()?;
        Ok(outcome)
    }

    /// Current tree hash of the mirror.
    pub fn hash(&self) -> TreeHash {
        hash_of(&self.dir)
    }

    /// Read a file from the mirror.
    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.dir.join(rel)).expect("read file")
    }
}
