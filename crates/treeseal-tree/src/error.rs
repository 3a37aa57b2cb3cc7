//! Error types for tree operations.

use std::path::PathBuf;

/// Errors that can occur while hashing, diffing or patching a tree.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Patch has an unsupported format version.
    #[error("unsupported patch version {found}, this build supports version {supported}")]
    UnsupportedVersion {
        /// Version found in the patch.
        found: u8,
        /// Version this build supports.
        supported: u8,
    },

    /// The tree contains something other than regular files and directories.
    #[error("unsupported file type at '{}'", .0.display())]
    UnsupportedFileType(PathBuf),

    /// A path is not valid UTF-8.
    #[error("path is not valid UTF-8: '{}'", .0.display())]
    NonUtf8Path(PathBuf),

    /// A patch path is absolute, empty or escapes the tree.
    #[error("invalid patch path '{0}'")]
    InvalidPath(String),

    /// A patch touches an excluded path.
    #[error("patch touches excluded path '{0}'")]
    ExcludedPath(String),

    /// A delete targets a file that does not exist.
    #[error("patch deletes missing file '{0}'")]
    MissingFile(String),
}

impl From<postcard::Error> for TreeError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
