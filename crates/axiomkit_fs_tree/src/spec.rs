//! Tree operation specification models and top-level error types.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// Directory mode used when callers do not pass one (`rwxrwxrwx`, umask applies).
pub const MODE_DIR_DEFAULT: u32 = 0o777;

////////////////////////////////////////////////////////////////////////////////
// #region EnumsInit

/// Pattern matching mode for filter/no-process lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumPatternMode {
    /// Shell-like wildcards (`*`, `?`, `**`, character classes).
    #[default]
    Glob,
    /// Regular expression pattern.
    Regex,
    /// Substring match.
    Literal,
}

/// How file content is decoded before it reaches a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumCopyEncoding {
    /// Content must be valid UTF-8 and is handed over as text.
    #[default]
    Utf8,
    /// Content is handed over as raw bytes.
    Binary,
}

/// Coarse classification of [`FsTreeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumFsTreeErrorKind {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    IoFailure,
    InvalidData,
    InvalidPattern,
    SourceNotDirectory,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TransformModels

/// File content handed to a transform, decoded per [`EnumCopyEncoding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileContent<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
}

impl<'a> FileContent<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        match *self {
            Self::Text(txt) => txt.as_bytes(),
            Self::Bytes(raw) => raw,
        }
    }

    /// Text view; `None` for binary content.
    pub fn as_text(&self) -> Option<&'a str> {
        match *self {
            Self::Text(txt) => Some(txt),
            Self::Bytes(_) => None,
        }
    }
}

/// What a transform produced for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutput {
    /// Write to the destination derived from the source tree layout.
    Content(Vec<u8>),
    /// Write to `path` verbatim, ignoring the derived destination.
    ///
    /// An empty `path` behaves like [`TransformOutput::Content`].
    Redirect { content: Vec<u8>, path: PathBuf },
}

impl TransformOutput {
    /// Shorthand for text content written to the derived destination.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Content(content.into().into_bytes())
    }

    /// Shorthand for text content redirected to `path`.
    pub fn redirect_text(content: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Redirect {
            content: content.into().into_bytes(),
            path: path.into(),
        }
    }
}

/// Per-file transform: `(content, source path) -> output`.
pub type TypeTransformFn =
    dyn Fn(FileContent<'_>, &Path) -> Result<TransformOutput, FsTreeError> + Send + Sync;

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Options

/// Input options for `walk` / `walk_async`.
#[derive(Debug, Clone, Copy)]
pub struct SpecWalkOptions {
    /// Stat through symbolic links (a linked directory is descended into).
    pub if_follow_symlinks: bool,
}

impl Default for SpecWalkOptions {
    fn default() -> Self {
        Self {
            if_follow_symlinks: true,
        }
    }
}

/// Input options for `copy_tree` / `copy_tree_async`.
#[derive(Clone)]
pub struct SpecCopyOptions {
    /// Decoding applied before `transform` sees file content.
    pub encoding: EnumCopyEncoding,
    /// Inclusion patterns over source-relative paths; `None` copies everything.
    pub patterns_filter: Option<Vec<String>>,
    /// Files matching these are copied verbatim even when `transform` is set.
    pub patterns_no_process: Option<Vec<String>>,
    /// Pattern interpretation mode for both pattern lists.
    pub rule_pattern: EnumPatternMode,
    /// Optional per-file content transform.
    pub transform: Option<Arc<TypeTransformFn>>,
    /// Mode for created destination directories; `None` uses [`MODE_DIR_DEFAULT`].
    pub mode_dir: Option<u32>,
    /// Worker threads for the blocking copy stage; `Some(1)` is sequential.
    pub num_workers_max: Option<usize>,
    /// Follow symbolic links while enumerating the source tree.
    pub if_follow_symlinks: bool,
    /// Carry permissions, timestamps and xattrs onto verbatim copies.
    pub if_preserve_metadata: bool,
}

impl SpecCopyOptions {
    /// Attach a transform callback.
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(FileContent<'_>, &Path) -> Result<TransformOutput, FsTreeError>
            + Send
            + Sync
            + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }
}

impl Default for SpecCopyOptions {
    fn default() -> Self {
        Self {
            encoding: EnumCopyEncoding::Utf8,
            patterns_filter: None,
            patterns_no_process: None,
            rule_pattern: EnumPatternMode::Glob,
            transform: None,
            mode_dir: None,
            num_workers_max: Some(1),
            if_follow_symlinks: true,
            if_preserve_metadata: false,
        }
    }
}

impl fmt::Debug for SpecCopyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecCopyOptions")
            .field("encoding", &self.encoding)
            .field("patterns_filter", &self.patterns_filter)
            .field("patterns_no_process", &self.patterns_no_process)
            .field("rule_pattern", &self.rule_pattern)
            .field("transform", &self.transform.as_ref().map(|_| "<fn>"))
            .field("mode_dir", &self.mode_dir)
            .field("num_workers_max", &self.num_workers_max)
            .field("if_follow_symlinks", &self.if_follow_symlinks)
            .field("if_preserve_metadata", &self.if_preserve_metadata)
            .finish()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Failure of a mkdir/walk/copy/remove call. Always carries the failing path
/// when one exists.
#[derive(Debug, Error)]
pub enum FsTreeError {
    #[error("Path not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Permission denied: {} ({source})", .path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Path already exists: {} ({source})", .path.display())]
    AlreadyExists {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid data in {}: {message}", .path.display())]
    InvalidData { path: PathBuf, message: String },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Source is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),
}

impl FsTreeError {
    /// Classify an `io::Error` raised while touching `path`.
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path, source },
            io::ErrorKind::AlreadyExists => Self::AlreadyExists { path, source },
            _ => Self::Io { path, source },
        }
    }

    pub fn kind(&self) -> EnumFsTreeErrorKind {
        match self {
            Self::NotFound { .. } => EnumFsTreeErrorKind::NotFound,
            Self::PermissionDenied { .. } => EnumFsTreeErrorKind::PermissionDenied,
            Self::AlreadyExists { .. } => EnumFsTreeErrorKind::AlreadyExists,
            Self::Io { .. } => EnumFsTreeErrorKind::IoFailure,
            Self::InvalidData { .. } => EnumFsTreeErrorKind::InvalidData,
            Self::InvalidPattern(_) => EnumFsTreeErrorKind::InvalidPattern,
            Self::SourceNotDirectory(_) => EnumFsTreeErrorKind::SourceNotDirectory,
        }
    }

    /// Path the failure is attached to, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::NotFound { path }
            | Self::PermissionDenied { path, .. }
            | Self::AlreadyExists { path, .. }
            | Self::Io { path, .. }
            | Self::InvalidData { path, .. } => Some(path),
            Self::SourceNotDirectory(path) => Some(path),
            Self::InvalidPattern(_) => None,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
