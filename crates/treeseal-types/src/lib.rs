//! Shared types and identifiers for treeseal.
//!
//! This crate defines the digest newtypes used across the workspace
//! ([`TreeHash`], [`LinkHash`]), their hex codec, the empty-tree sentinel
//! and the on-disk layout of the control directory ([`Layout`]).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Size of every digest in bytes.
pub const DIGEST_SIZE: usize = 32;

/// Default name of the control directory inside a working tree.
pub const CONTROL_DIR: &str = ".treeseal";

/// File name of the hash chain inside the control directory.
pub const CHAIN_FILE: &str = "hashchain";

/// Directory name of the patch store inside the control directory.
pub const PATCH_DIR: &str = "patches";

/// Errors produced when decoding a hex digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseDigestError {
    /// The input does not have exactly `2 * DIGEST_SIZE` characters.
    #[error("digest must be {expected} hex characters, got {found}")]
    InvalidLength {
        /// Expected number of characters.
        expected: usize,
        /// Number of characters found.
        found: usize,
    },

    /// The input contains a character outside `[0-9a-fA-F]`.
    #[error("digest is not valid hex: {0}")]
    InvalidHex(String),
}

/// Decode a hex string of exactly `2 * N` characters into a byte array.
pub fn decode_hex_array<const N: usize>(s: &str) -> Result<[u8; N], ParseDigestError> {
    if s.len() != 2 * N {
        return Err(ParseDigestError::InvalidLength {
            expected: 2 * N,
            found: s.len(),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).map_err(|e| ParseDigestError::InvalidHex(e.to_string()))?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Digest types
// ---------------------------------------------------------------------------

macro_rules! define_digest {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; DIGEST_SIZE]);

        impl $name {
            /// Create a digest by hashing arbitrary data with BLAKE3.
            pub fn from_data(data: &[u8]) -> Self {
                Self(blake3::hash(data).into())
            }

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
                &self.0
            }
        }

        impl From<[u8; DIGEST_SIZE]> for $name {
            fn from(bytes: [u8; DIGEST_SIZE]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ParseDigestError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_hex_array(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_digest!(
    /// Content-derived fingerprint of a directory tree: `blake3(listing)`.
    TreeHash
);

define_digest!(
    /// Identity of a hash chain link: `blake3(canonical line)`.
    LinkHash
);

impl TreeHash {
    /// Tree hash of an empty directory (BLAKE3 of the empty listing).
    ///
    /// This is the origin of every tree history.
    pub fn empty() -> Self {
        Self::from_data(&[])
    }
}

impl LinkHash {
    /// The `previous` value of a chain's genesis link.
    pub fn genesis_previous() -> Self {
        Self(*TreeHash::empty().as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Location of the control directory and the files inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    control_dir: PathBuf,
}

impl Layout {
    /// Layout rooted at `control_dir`.
    pub fn new(control_dir: impl Into<PathBuf>) -> Self {
        Self {
            control_dir: control_dir.into(),
        }
    }

    /// Default layout inside the working tree `root`.
    pub fn in_tree(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join(CONTROL_DIR))
    }

    /// The control directory itself.
    pub fn control_dir(&self) -> &Path {
        &self.control_dir
    }

    /// Path of the hash chain file.
    pub fn chain_path(&self) -> PathBuf {
        self.control_dir.join(CHAIN_FILE)
    }

    /// Path of the patch directory.
    pub fn patch_dir(&self) -> PathBuf {
        self.control_dir.join(PATCH_DIR)
    }
}
