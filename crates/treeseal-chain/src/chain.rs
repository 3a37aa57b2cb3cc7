//! The hash chain container: verified links, derived state, locked store.

use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand::RngCore;
use tracing::{debug, info, warn};
use treeseal_types::{LinkHash, TreeHash};

use crate::error::ChainError;
use crate::link::{Link, NONCE_SIZE};
use crate::state::ChainState;
use crate::store::{ChainFile, parse_lines};

type Result<T> = std::result::Result<T, ChainError>;

/// Append-only, signed hash chain backed by a locked file.
///
/// Every link is verified against the state derived from all previous
/// links before it is written; the file never contains a link that fails
/// replay. The handle holds an exclusive lock on the file until
/// [`close`](Self::close) is called or the handle is dropped. After closing,
/// the in-memory chain stays queryable but can no longer be appended to.
#[derive(Debug)]
pub struct HashChain {
    path: PathBuf,
    file: Option<ChainFile>,
    links: Vec<Link>,
    state: ChainState,
}

impl HashChain {
    /// Start a new chain at `path` with `signing_key` as the first signer.
    ///
    /// Returns the chain and the serialized genesis entry.
    pub fn start(
        path: impl AsRef<Path>,
        signing_key: &SigningKey,
        comment: Option<&str>,
    ) -> Result<(Self, String)> {
        let path = path.as_ref();
        if path.try_exists()? {
            return Err(ChainError::Exists(path.to_path_buf()));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);
        let link = Link::chain_start(now_secs(), signing_key, nonce, comment)?;
        let state = ChainState::default().step(&link)?;

        let entry = link.to_string();
        let file = create_with(path, std::slice::from_ref(&entry))?;

        info!(path = %path.display(), head = %link.hash(), "started hash chain");

        Ok((
            Self {
                path: path.to_path_buf(),
                file: Some(file),
                links: vec![link],
                state,
            },
            entry,
        ))
    }

    /// Open the chain at `path`, re-verifying every link from genesis.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = ChainFile::open(path)?;
        let lines = file.read_lines()?;
        if lines.is_empty() {
            return Err(ChainError::Empty(path.to_path_buf()));
        }

        let links = parse_lines(&lines)?;
        let state = ChainState::replay(&links)?;

        debug!(
            path = %path.display(),
            links = links.len(),
            head = ?state.head(),
            "loaded hash chain"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            links,
            state,
        })
    }

    /// Create a new chain file at `path` holding exactly `links`.
    ///
    /// The links are replayed before anything is written.
    pub fn create_from(path: impl AsRef<Path>, links: Vec<Link>) -> Result<Self> {
        let path = path.as_ref();
        if links.is_empty() {
            return Err(ChainError::Empty(path.to_path_buf()));
        }
        let state = ChainState::replay(&links)?;

        let lines: Vec<String> = links.iter().map(Link::to_string).collect();
        let file = create_with(path, &lines)?;

        info!(path = %path.display(), links = links.len(), "created hash chain");

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            links,
            state,
        })
    }

    /// Verify `link` against the current state and persist it.
    ///
    /// On failure the file is left unchanged.
    pub fn append(&mut self, link: Link) -> Result<LinkHash> {
        let file = self.file.as_mut().ok_or(ChainError::Closed)?;
        let next = self.state.clone().step(&link)?;

        file.append_line(&link.to_string())?;
        let hash = link.hash();

        debug!(
            index = self.links.len(),
            kind = link.kind.tag(),
            hash = %hash,
            "appended link"
        );

        self.links.push(link);
        self.state = next;
        Ok(hash)
    }

    /// Append an `addkey` link endorsed by `signer`.
    pub fn add_key(
        &mut self,
        pubkey: VerifyingKey,
        pubkey_signature: Signature,
        comment: Option<&str>,
        signer: &SigningKey,
    ) -> Result<Link> {
        let link = Link::add_key(
            self.head(),
            now_secs(),
            pubkey,
            pubkey_signature,
            comment,
            signer,
        )?;
        self.commit(link)
    }

    /// Append a `remkey` link endorsed by `signer`.
    pub fn remove_key(&mut self, pubkey: VerifyingKey, signer: &SigningKey) -> Result<Link> {
        let link = Link::remove_key(self.head(), now_secs(), pubkey, signer);
        self.commit(link)
    }

    /// Append a `sigctl` link endorsed by `signer`.
    pub fn set_threshold(&mut self, m: usize, signer: &SigningKey) -> Result<Link> {
        let link = Link::set_threshold(self.head(), now_secs(), m, signer);
        self.commit(link)
    }

    /// Append a `source` link recording `tree_hash`.
    pub fn record_tree(
        &mut self,
        tree_hash: TreeHash,
        comment: Option<&str>,
        signer: &SigningKey,
    ) -> Result<Link> {
        let link = Link::record_tree(self.head(), now_secs(), tree_hash, comment, signer)?;
        self.commit(link)
    }

    /// Append a `signtr` link: `signer`'s signature over `tree_hash`.
    pub fn sign_tree(&mut self, tree_hash: TreeHash, signer: &SigningKey) -> Result<Link> {
        let link = Link::sign_tree(self.head(), now_secs(), tree_hash, signer);
        self.commit(link)
    }

    /// Append a `comment` link.
    pub fn comment(&mut self, text: &str, signer: &SigningKey) -> Result<Link> {
        let link = Link::comment(self.head(), now_secs(), text, signer)?;
        self.commit(link)
    }

    fn commit(&mut self, link: Link) -> Result<Link> {
        self.append(link.clone())?;
        Ok(link)
    }

    /// Hash of the most recent link.
    pub fn head(&self) -> LinkHash {
        self.state.head().unwrap_or_else(LinkHash::genesis_previous)
    }

    /// Fail unless the chain head equals `expected`.
    pub fn check_head(&self, expected: &LinkHash) -> Result<()> {
        let actual = self.head();
        if actual != *expected {
            return Err(ChainError::HeadMismatch {
                expected: *expected,
                actual,
            });
        }
        Ok(())
    }

    /// The most recently approved tree hash, if any tree reached quorum.
    pub fn last_approved_tree_hash(&self) -> Option<TreeHash> {
        self.state.last_approved()
    }

    /// Every recorded tree hash, in chain order.
    pub fn tree_hashes(&self) -> Vec<TreeHash> {
        self.state.tree_hashes()
    }

    /// The derived authorization state.
    pub fn state(&self) -> &ChainState {
        &self.state
    }

    /// All links, in chain order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Always `false` for a loaded chain; provided for API completeness.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Whether this chain's links are a prefix of `other`.
    pub fn is_prefix_of(&self, other: &[Link]) -> bool {
        other.len() >= self.links.len() && other[..self.links.len()] == self.links[..]
    }

    /// The chain in its on-disk text form.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for link in &self.links {
            text.push_str(&link.to_string());
            text.push('\n');
        }
        text
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Release the exclusive lock.
    ///
    /// Queries keep working on the in-memory chain; appends fail with
    /// [`ChainError::Closed`].
    pub fn close(&mut self) -> Result<()> {
        let file = self.file.take().ok_or(ChainError::Closed)?;
        debug!(path = %file.path().display(), "closing hash chain");
        drop(file);
        Ok(())
    }
}

/// Create a chain file holding `lines`; a partially written file is removed.
fn create_with(path: &Path, lines: &[String]) -> Result<ChainFile> {
    let mut file = ChainFile::create(path)?;
    let written = lines.iter().try_for_each(|line| file.append_line(line));
    if let Err(e) = written {
        drop(file);
        if let Err(remove) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %remove, "failed to remove partial chain file");
        }
        return Err(e);
    }
    Ok(file)
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
