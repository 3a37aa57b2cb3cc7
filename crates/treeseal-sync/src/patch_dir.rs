//! Patch storage addressed by `(from, to)` tree hash pairs.
//!
//! Each patch is stored as one file named `{from hex}-{to hex}` directly
//! in the patch directory. Writes go to a temporary file first and are
//! renamed into place.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use treeseal_tree::{Patch, deserialize_patch, serialize_patch};
use treeseal_types::TreeHash;

use crate::error::SyncError;

type Result<T> = std::result::Result<T, SyncError>;

/// Directory of serialized patches.
#[derive(Debug, Clone)]
pub struct PatchDir {
    dir: PathBuf,
}

impl PatchDir {
    /// Patch directory at `dir`. Nothing is created until a patch is stored.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// File name of the patch from `from` to `to`.
    pub fn file_name(from: &TreeHash, to: &TreeHash) -> String {
        format!("{from}-{to}")
    }

    /// Parse a patch file name back into its `(from, to)` pair.
    pub fn parse_name(name: &str) -> Result<(TreeHash, TreeHash)> {
        let invalid = || SyncError::InvalidPatchName(name.to_string());
        let (from, to) = name.split_once('-').ok_or_else(invalid)?;
        let from = from.parse::<TreeHash>().map_err(|_| invalid())?;
        let to = to.parse::<TreeHash>().map_err(|_| invalid())?;
        // Only the canonical lowercase spelling is a valid name.
        if Self::file_name(&from, &to) != name {
            return Err(invalid());
        }
        Ok((from, to))
    }

    /// Store `patch` under its `(from, to)` name.
    pub fn put(&self, patch: &Patch) -> Result<PathBuf> {
        let name = Self::file_name(&patch.from, &patch.to);
        let data = serialize_patch(patch)?;
        self.write_atomic(&name, &data)
    }

    /// Store serialized patch bytes under `name` after checking that they
    /// decode and that the embedded hashes match the name.
    pub fn put_raw(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let (from, to) = Self::parse_name(name)?;
        check_embedded(&from, &to, &deserialize_patch(data)?)?;
        self.write_atomic(name, data)
    }

    /// Load the patch from `from` to `to`, if present.
    pub fn get(&self, from: &TreeHash, to: &TreeHash) -> Result<Option<Patch>> {
        let path = self.dir.join(Self::file_name(from, to));
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let patch = deserialize_patch(&data)?;
        check_embedded(from, to, &patch)?;
        Ok(Some(patch))
    }

    /// Whether a patch from `from` to `to` is stored.
    pub fn contains(&self, from: &TreeHash, to: &TreeHash) -> Result<bool> {
        Ok(self.dir.join(Self::file_name(from, to)).try_exists()?)
    }

    /// Every stored `(from, to)` pair, sorted.
    pub fn edges(&self) -> Result<Vec<(TreeHash, TreeHash)>> {
        Ok(self
            .names()?
            .iter()
            .filter_map(|name| Self::parse_name(name).ok())
            .collect())
    }

    /// Every stored patch as `(name, bytes)`, sorted by name.
    pub fn files(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut files = Vec::new();
        for name in self.names()? {
            if Self::parse_name(&name).is_err() {
                continue;
            }
            let data = std::fs::read(self.dir.join(&name))?;
            files.push((name, data));
        }
        Ok(files)
    }

    fn names(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if Self::parse_name(&name).is_ok() => names.push(name),
                Ok(name) if name.ends_with(".tmp") => {}
                other => warn!(name = ?other, dir = %self.dir.display(), "ignoring stray file in patch directory"),
            }
        }
        names.sort();
        Ok(names)
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &path)?;
        debug!(name, size = data.len(), "stored patch");
        Ok(path)
    }
}

fn check_embedded(from: &TreeHash, to: &TreeHash, patch: &Patch) -> Result<()> {
    if patch.from != *from || patch.to != *to {
        return Err(SyncError::PatchMismatch {
            from: *from,
            to: *to,
            found_from: patch.from,
            found_to: patch.to,
        });
    }
    Ok(())
}
