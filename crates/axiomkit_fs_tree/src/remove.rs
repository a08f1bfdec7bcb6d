//! Recursive tree removal.
//!
//! Relies on the walker delivering each directory after its whole subtree, so
//! every `rmdir` meets an already-emptied directory. Symbolic links are
//! unlinked, never followed.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::pattern::FilterPredicate;
use crate::report::ReportRemove;
use crate::spec::{FsTreeError, SpecWalkOptions};
use crate::util::IoResultExt;
use crate::walk::{walk, walk_async};

const SPEC_WALK_OPTIONS_REMOVE: SpecWalkOptions = SpecWalkOptions {
    if_follow_symlinks: false,
};

/// Delete `dir_root` and everything below it.
///
/// Fails on the first entry that cannot be removed; entries removed before
/// the failure stay removed.
pub fn remove_tree(dir_root: impl AsRef<Path>) -> Result<ReportRemove, FsTreeError> {
    let path_root = dir_root.as_ref();
    let mut report = ReportRemove::default();

    walk(
        path_root,
        &FilterPredicate::match_all(),
        &SPEC_WALK_OPTIONS_REMOVE,
        |event| {
            if event.is_file() {
                fs::remove_file(&event.path_abs).at_path(&event.path_abs)?;
                report.cnt_files_removed += 1;
            } else {
                fs::remove_dir(&event.path_abs).at_path(&event.path_abs)?;
                report.cnt_dirs_removed += 1;
            }
            Ok(())
        },
    )?;
    fs::remove_dir(path_root).at_path(path_root)?;
    report.cnt_dirs_removed += 1;

    tracing::debug!(root = %path_root.display(), "{report}");
    Ok(report)
}

/// Async counterpart of [`remove_tree`]; siblings are removed concurrently.
pub async fn remove_tree_async(dir_root: impl AsRef<Path>) -> Result<ReportRemove, FsTreeError> {
    let path_root = dir_root.as_ref();
    let cnt_files_removed = AtomicU64::new(0);
    let cnt_dirs_removed = AtomicU64::new(0);

    walk_async(
        path_root,
        &FilterPredicate::match_all(),
        &SPEC_WALK_OPTIONS_REMOVE,
        |event| {
            let cnt_files_removed = &cnt_files_removed;
            let cnt_dirs_removed = &cnt_dirs_removed;
            async move {
                if event.is_file() {
                    tokio::fs::remove_file(&event.path_abs)
                        .await
                        .at_path(&event.path_abs)?;
                    cnt_files_removed.fetch_add(1, Ordering::Relaxed);
                } else {
                    tokio::fs::remove_dir(&event.path_abs)
                        .await
                        .at_path(&event.path_abs)?;
                    cnt_dirs_removed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            }
        },
    )
    .await?;
    tokio::fs::remove_dir(path_root).await.at_path(path_root)?;

    let report = ReportRemove {
        cnt_files_removed: cnt_files_removed.into_inner(),
        cnt_dirs_removed: cnt_dirs_removed.into_inner() + 1,
    };
    tracing::debug!(root = %path_root.display(), "{report}");
    Ok(report)
}
