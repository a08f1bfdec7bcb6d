//! Idempotent recursive directory creation.
//!
//! The nearest existing ancestor of the target is found first; only the
//! segments below it are created, parent before child. A target that already
//! exists costs no creation call at all.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::spec::{FsTreeError, MODE_DIR_DEFAULT};
use crate::util::{IoResultExt, parent_or_current};

/// Nearest ancestor of `path` (possibly `path` itself) that exists.
pub fn find_existing_ancestor(path: impl AsRef<Path>) -> Result<PathBuf, FsTreeError> {
    let path = path.as_ref();
    let mut path_cursor = path;
    while !path_cursor.try_exists().at_path(path_cursor)? {
        path_cursor = parent_or_current(path_cursor).ok_or_else(|| FsTreeError::NotFound {
            path: path.to_path_buf(),
        })?;
    }
    Ok(path_cursor.to_path_buf())
}

/// Directories that must be created to make `path` exist, parent first.
pub fn missing_segments(path: impl AsRef<Path>) -> Result<Vec<PathBuf>, FsTreeError> {
    let path = path.as_ref();
    let path_ancestor = find_existing_ancestor(path)?;
    Ok(segments_below(path, &path_ancestor))
}

/// Chain from `path` up to (not including) `path_ancestor`, parent first.
///
/// `path_ancestor` must lie on the `parent_or_current` chain of `path`.
fn segments_below(path: &Path, path_ancestor: &Path) -> Vec<PathBuf> {
    let mut l_segments = Vec::new();
    let mut path_cursor = Some(path);
    while let Some(path_segment) = path_cursor.filter(|p| *p != path_ancestor) {
        l_segments.push(path_segment.to_path_buf());
        path_cursor = parent_or_current(path_segment);
    }
    l_segments.reverse();
    l_segments
}

/// Create `path` and any missing parents.
///
/// `mode` defaults to [`MODE_DIR_DEFAULT`] and is subject to the process
/// umask. Returns how many directories were created; `Ok(0)` means the
/// directory was already there.
pub fn ensure_dir(path: impl AsRef<Path>, mode: Option<u32>) -> Result<usize, FsTreeError> {
    let path = path.as_ref();
    let l_segments = missing_segments(path)?;
    if l_segments.is_empty() {
        return check_existing_dir(path, fs::metadata(path));
    }

    let builder_dir = dir_builder(mode.unwrap_or(MODE_DIR_DEFAULT));
    let mut n_created = 0;
    for path_segment in &l_segments {
        match builder_dir.create(path_segment) {
            Ok(()) => n_created += 1,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Raced creation is fine; a dangling link or file is not.
                check_existing_dir(path_segment, fs::metadata(path_segment))?;
                tracing::trace!(path = %path_segment.display(), "directory appeared concurrently");
            }
            Err(e) => return Err(FsTreeError::from_io(path_segment, e)),
        }
    }
    tracing::debug!(path = %path.display(), n_created, "directory ensured");
    Ok(n_created)
}

/// Async counterpart of [`ensure_dir`] on `tokio::fs`.
pub async fn ensure_dir_async(
    path: impl AsRef<Path>,
    mode: Option<u32>,
) -> Result<usize, FsTreeError> {
    let path = path.as_ref();
    let path_ancestor = find_existing_ancestor_async(path).await?;
    let l_segments = segments_below(path, &path_ancestor);
    if l_segments.is_empty() {
        return check_existing_dir(path, tokio::fs::metadata(path).await);
    }

    let mut builder_dir = tokio::fs::DirBuilder::new();
    #[cfg(unix)]
    builder_dir.mode(mode.unwrap_or(MODE_DIR_DEFAULT));
    #[cfg(not(unix))]
    let _ = mode;

    let mut n_created = 0;
    for path_segment in &l_segments {
        match builder_dir.create(path_segment).await {
            Ok(()) => n_created += 1,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                check_existing_dir(path_segment, tokio::fs::metadata(path_segment).await)?;
                tracing::trace!(path = %path_segment.display(), "directory appeared concurrently");
            }
            Err(e) => return Err(FsTreeError::from_io(path_segment, e)),
        }
    }
    tracing::debug!(path = %path.display(), n_created, "directory ensured");
    Ok(n_created)
}

async fn find_existing_ancestor_async(path: &Path) -> Result<PathBuf, FsTreeError> {
    let mut path_cursor = path;
    while !tokio::fs::try_exists(path_cursor).await.at_path(path_cursor)? {
        path_cursor = parent_or_current(path_cursor).ok_or_else(|| FsTreeError::NotFound {
            path: path.to_path_buf(),
        })?;
    }
    Ok(path_cursor.to_path_buf())
}

fn check_existing_dir(
    path: &Path,
    res_stat: io::Result<fs::Metadata>,
) -> Result<usize, FsTreeError> {
    let stat_path = res_stat.at_path(path)?;
    if !stat_path.is_dir() {
        return Err(FsTreeError::AlreadyExists {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "exists and is not a directory"),
        });
    }
    Ok(0)
}

fn dir_builder(mode: u32) -> fs::DirBuilder {
    let mut builder_dir = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder_dir.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder_dir
}
