//! Distribution bundles: a hash chain plus the patches it refers to.
//!
//! A bundle is a postcard-encoded [`Distribution`]. Applying one never
//! trusts the bundle: the chain is parsed and replayed in memory before
//! anything touches disk, an existing local chain must be a prefix of the
//! bundled one, and every patch is checked against its file name.

use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use treeseal_chain::{ChainError, ChainState, HashChain, parse_chain};
use treeseal_types::LinkHash;

use crate::error::SyncError;
use crate::patch_dir::PatchDir;

type Result<T> = std::result::Result<T, SyncError>;

/// Current bundle format version.
pub const DIST_VERSION: u8 = 1;

/// A serialized patch and its `{from}-{to}` file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchFile {
    /// File name inside the patch directory.
    pub name: String,
    /// Postcard-encoded patch.
    pub data: Vec<u8>,
}

/// A complete distribution bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    /// Format version, see [`DIST_VERSION`].
    pub version: u8,
    /// The hash chain in its on-disk text form.
    pub chain: String,
    /// Every patch from the patch directory.
    pub patches: Vec<PatchFile>,
}

impl Distribution {
    /// Encode to postcard bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode from postcard bytes, rejecting unknown versions.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let dist: Self = postcard::from_bytes(bytes)?;
        if dist.version != DIST_VERSION {
            return Err(SyncError::UnsupportedVersion {
                found: dist.version,
                supported: DIST_VERSION,
            });
        }
        Ok(dist)
    }
}

/// Bundle the chain at `chain_path` and all of `patches` into `writer`.
///
/// The chain is loaded and verified first. Returns its head, which
/// recipients can pin with `expected_head` when applying.
pub fn create(chain_path: &Path, patches: &PatchDir, mut writer: impl Write) -> Result<LinkHash> {
    let mut chain = HashChain::read_file(chain_path)?;
    let head = chain.head();
    let dist = Distribution {
        version: DIST_VERSION,
        chain: chain.to_text(),
        patches: patches
            .files()?
            .into_iter()
            .map(|(name, data)| PatchFile { name, data })
            .collect(),
    };
    chain.close()?;

    writer.write_all(&dist.encode()?)?;
    writer.flush()?;

    info!(
        head = %head,
        links = chain.len(),
        patches = dist.patches.len(),
        "created distribution"
    );
    Ok(head)
}

/// Apply a bundle read from `reader` to the chain at `chain_path`.
///
/// If `expected_head` is given, the bundled chain's head must equal it.
/// An existing local chain is extended with the bundle's new links only;
/// if it is not a prefix of the bundled chain the bundle is rejected.
/// Patches are written before the chain is extended. The returned chain
/// holds the lock, so the caller can sync and then close it.
pub fn apply(
    chain_path: &Path,
    patches: &PatchDir,
    mut reader: impl Read,
    expected_head: Option<&LinkHash>,
) -> Result<HashChain> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let dist = Distribution::decode(&bytes)?;

    let links = parse_chain(&dist.chain)?;
    let state = ChainState::replay(&links)?;
    let Some(head) = state.head() else {
        return Err(ChainError::Empty(chain_path.to_path_buf()).into());
    };
    if let Some(expected) = expected_head
        && *expected != head
    {
        return Err(ChainError::HeadMismatch {
            expected: *expected,
            actual: head,
        }
        .into());
    }

    let local = if chain_path.try_exists()? {
        let local = HashChain::read_file(chain_path)?;
        if !local.is_prefix_of(&links) {
            return Err(SyncError::Rollback {
                local: local.len(),
                incoming: links.len(),
            });
        }
        Some(local)
    } else {
        None
    };

    for file in &dist.patches {
        patches.put_raw(&file.name, &file.data)?;
    }

    let chain = match local {
        Some(mut local) => {
            let appended = links.len() - local.len();
            for link in links.into_iter().skip(local.len()) {
                local.append(link)?;
            }
            debug!(appended, "extended local chain");
            local
        }
        None => HashChain::create_from(chain_path, links)?,
    };

    info!(
        head = %head,
        links = chain.len(),
        patches = dist.patches.len(),
        "applied distribution"
    );
    Ok(chain)
}
