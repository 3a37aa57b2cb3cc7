//! Tree hashing.
//!
//! A tree hash is `blake3` over the sorted listing of every regular file in
//! the tree, one line per file:
//!
//! ```text
//! <f|x> <blake3(contents) hex> <relative path>\n
//! ```
//!
//! `x` marks executable files. Directories contribute only through the
//! files they contain, so empty directories do not change the hash. The
//! listing is sorted by path, which makes the hash independent of the
//! order the filesystem returns entries in.

use std::fs::File;
use std::path::Path;

use treeseal_types::{CONTROL_DIR, TreeHash};

use crate::error::TreeError;

type Result<T> = std::result::Result<T, TreeError>;

/// Relative paths left out of hashing and patching.
///
/// An entry excludes the path itself and everything below it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Excludes(Vec<String>);

impl Excludes {
    /// Build from relative paths; leading `./` and trailing `/` are ignored.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths = paths
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                let p = p.strip_prefix("./").unwrap_or(p);
                p.trim_end_matches('/').to_string()
            })
            .filter(|p| !p.is_empty())
            .collect();
        Self(paths)
    }

    /// Excludes only the control directory.
    pub fn control_dir() -> Self {
        Self::new([CONTROL_DIR])
    }

    /// Whether `rel` (slash-separated, relative to the tree root) is excluded.
    pub fn is_excluded(&self, rel: &str) -> bool {
        self.0.iter().any(|p| {
            rel == p
                || rel
                    .strip_prefix(p.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// The configured paths.
    pub fn paths(&self) -> &[String] {
        &self.0
    }
}

/// One regular file of a tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Slash-separated path relative to the tree root.
    pub path: String,
    /// Whether any execute bit is set.
    pub executable: bool,
    /// `blake3` of the file contents.
    pub hash: [u8; 32],
}

impl TreeEntry {
    fn line(&self) -> String {
        let mode = if self.executable { 'x' } else { 'f' };
        format!("{mode} {} {}\n", hex::encode(self.hash), self.path)
    }
}

/// List every regular file under `dir`, sorted by path.
///
/// Symlinks and special files are rejected rather than skipped, so a tree
/// hash always describes the whole tree.
pub fn tree_listing(dir: &Path, excludes: &Excludes) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    walk(dir, "", excludes, &mut entries)?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Compute the tree hash of `dir`.
pub fn tree_hash(dir: &Path, excludes: &Excludes) -> Result<TreeHash> {
    Ok(hash_listing(&tree_listing(dir, excludes)?))
}

/// Hash a sorted listing.
pub fn hash_listing(entries: &[TreeEntry]) -> TreeHash {
    let mut hasher = blake3::Hasher::new();
    for entry in entries {
        hasher.update(entry.line().as_bytes());
    }
    TreeHash::from(<[u8; 32]>::from(hasher.finalize()))
}

fn walk(dir: &Path, prefix: &str, excludes: &Excludes, out: &mut Vec<TreeEntry>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            return Err(TreeError::NonUtf8Path(path));
        };
        if name.contains('\n') {
            return Err(TreeError::InvalidPath(name));
        }
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        if excludes.is_excluded(&rel) {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&path, &rel, excludes, out)?;
        } else if file_type.is_file() {
            let mut hasher = blake3::Hasher::new();
            std::io::copy(&mut File::open(&path)?, &mut hasher)?;
            out.push(TreeEntry {
                path: rel,
                executable: is_executable(&entry.metadata()?),
                hash: hasher.finalize().into(),
            });
        } else {
            return Err(TreeError::UnsupportedFileType(path));
        }
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}
