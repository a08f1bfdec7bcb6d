use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::spec::FsTreeError;

////////////////////////////////////////////////////////////////////////////////
// #region ErrorMapping

/// Attach the failing path to an `io::Result`.
pub(crate) trait IoResultExt<T> {
    fn at_path(self, path: &Path) -> Result<T, FsTreeError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at_path(self, path: &Path) -> Result<T, FsTreeError> {
        self.map_err(|e| FsTreeError::from_io(path, e))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PathUtilities

/// `path` relative to `base`, joined with `/` whatever the platform.
///
/// Returns `None` when `path` is not below `base`.
pub(crate) fn to_relative_slash(path: &Path, base: &Path) -> Option<String> {
    let path_rel = path.strip_prefix(base).ok()?;
    let l_parts: Vec<String> = path_rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(l_parts.join("/"))
}

/// Map a source path onto the destination tree.
///
/// # Examples
/// ```ignore
/// let path_dst = derive_destination_path(
///     Path::new("/src/a/x.txt"),
///     Path::new("/src"),
///     Path::new("/dst"),
/// );
/// assert_eq!(path_dst, Path::new("/dst/a/x.txt"));
/// ```
pub(crate) fn derive_destination_path(
    path_src: &Path,
    path_dir_src: &Path,
    path_dir_dst: &Path,
) -> PathBuf {
    match path_src.strip_prefix(path_dir_src) {
        Ok(path_rel) => path_dir_dst.join(path_rel),
        Err(_) => path_dir_dst.join(path_src.file_name().unwrap_or(path_src.as_os_str())),
    }
}

/// Parent directory, treating the empty parent of a bare relative name as `.`.
pub(crate) fn parent_or_current(path: &Path) -> Option<&Path> {
    match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Some(Path::new(".")),
        other => other,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Workers

pub(crate) fn calculate_worker_limit(num_workers_max: Option<usize>) -> usize {
    let n_cpu = std::thread::available_parallelism()
        .map(|v| v.get())
        .unwrap_or(1);

    match num_workers_max {
        Some(n) => n.clamp(1, n_cpu),
        None => n_cpu.clamp(1, 8),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Metadata

/// Byte copy, optionally carrying permissions, timestamps and xattrs.
pub(crate) fn copy_file_verbatim(
    path_file_src: &Path,
    path_file_dst: &Path,
    if_preserve_metadata: bool,
) -> io::Result<()> {
    fs::copy(path_file_src, path_file_dst)?;
    if if_preserve_metadata {
        apply_metadata(path_file_src, path_file_dst)?;
    }
    Ok(())
}

pub(crate) fn apply_metadata(path_file_src: &Path, path_file_dst: &Path) -> io::Result<()> {
    use filetime::{FileTime, set_file_times};

    let stat_src = fs::metadata(path_file_src)?;
    fs::set_permissions(path_file_dst, stat_src.permissions())?;

    let file_time_access = FileTime::from_last_access_time(&stat_src);
    let file_time_modify = FileTime::from_last_modification_time(&stat_src);
    set_file_times(path_file_dst, file_time_access, file_time_modify)?;

    #[cfg(target_os = "linux")]
    copy_xattrs_linux(path_file_src, path_file_dst);
    Ok(())
}

#[cfg(target_os = "linux")]
fn copy_xattrs_linux(path_file_src: &Path, path_file_dst: &Path) {
    let iter_xattr_names = match xattr::list(path_file_src) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(
                path = %path_file_src.display(),
                error = %e,
                "xattr listing unavailable"
            );
            return;
        }
    };

    for name in iter_xattr_names {
        let Some(raw_value) = xattr::get(path_file_src, &name).ok().flatten() else {
            continue;
        };
        if let Err(e) = xattr::set(path_file_dst, &name, &raw_value) {
            tracing::debug!(path = %path_file_dst.display(), error = %e, "xattr not carried over");
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

/// Whether mode bits actually restrict this process (false for root).
#[cfg(all(test, unix))]
pub(crate) fn if_permissions_enforced() -> bool {
    use std::os::unix::fs::PermissionsExt;

    let Ok(tmp) = tempfile::tempdir() else {
        return false;
    };
    let path_locked = tmp.path().join("locked");
    if fs::create_dir(&path_locked).is_err()
        || fs::set_permissions(&path_locked, fs::Permissions::from_mode(0o000)).is_err()
    {
        return false;
    }
    let if_enforced = fs::read_dir(&path_locked).is_err();
    let _ = fs::set_permissions(&path_locked, fs::Permissions::from_mode(0o755));
    if_enforced
}
