//! Locked, append-only backing file for the hash chain.
//!
//! The chain file holds one canonical link per line. A [`ChainFile`] owns an
//! exclusive advisory lock on the file for as long as it lives; dropping it
//! releases the lock on every exit path.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{ChainError, LinkParseError};
use crate::link::Link;

type Result<T> = std::result::Result<T, ChainError>;

/// Exclusive handle on a chain file.
#[derive(Debug)]
pub(crate) struct ChainFile {
    path: PathBuf,
    file: File,
}

impl ChainFile {
    /// Create a new chain file. Fails if `path` exists.
    pub(crate) fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = match OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(true)
            .open(path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ChainError::Exists(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        Self::lock(path, file)
    }

    /// Open an existing chain file.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).append(true).open(path)?;
        Self::lock(path, file)
    }

    fn lock(path: &Path, file: File) -> Result<Self> {
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "acquired chain lock");
                Ok(Self {
                    path: path.to_path_buf(),
                    file,
                })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(ChainError::Locked {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Read every line of the file from the start.
    ///
    /// Lines are split on `\n` only. A final line without its terminator is
    /// a truncated record and is rejected, as is any line that is not UTF-8.
    pub(crate) fn read_lines(&mut self) -> Result<Vec<String>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        self.file.read_to_end(&mut bytes)?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }

        let mut lines: Vec<&[u8]> = bytes.split(|&b| b == b'\n').collect();
        // `split` yields an empty tail after the final terminator.
        if lines.pop().is_some_and(|tail| !tail.is_empty()) {
            return Err(malformed(lines.len(), "truncated record: missing line terminator"));
        }

        lines
            .into_iter()
            .enumerate()
            .map(|(index, line)| {
                std::str::from_utf8(line)
                    .map(str::to_string)
                    .map_err(|_| malformed(index, "line is not valid UTF-8"))
            })
            .collect()
    }

    /// Append one line and flush it to disk.
    ///
    /// If the write or the sync fails, the file is truncated back to its
    /// previous length.
    pub(crate) fn append_line(&mut self, line: &str) -> Result<()> {
        let len = self.file.metadata()?.len();
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        let written = self
            .file
            .write_all(&buf)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            warn!(path = %self.path.display(), error = %e, "append failed, truncating chain file");
            if let Err(truncate) = self.file.set_len(len) {
                warn!(path = %self.path.display(), error = %truncate, "failed to truncate chain file");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Path of the backing file.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ChainFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "released chain lock");
    }
}

/// Parse chain text (one link per line) into links.
///
/// Lines are split on `\n` only, so a stray `\r` makes its line
/// non-canonical. The final terminator may be omitted. Blank lines are
/// rejected: a chain file never contains them, so one is a sign of
/// tampering or truncation.
pub fn parse_chain(text: &str) -> Result<Vec<Link>> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    parse_lines(text.strip_suffix('\n').unwrap_or(text).split('\n'))
}

pub(crate) fn parse_lines<I, S>(lines: I) -> Result<Vec<Link>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .enumerate()
        .map(|(index, line)| {
            Link::parse(line.as_ref()).map_err(|source| ChainError::Malformed { index, source })
        })
        .collect()
}

fn malformed(index: usize, reason: &str) -> ChainError {
    ChainError::Malformed {
        index,
        source: LinkParseError::Malformed(reason.to_string()),
    }
}
