//! Depth-first tree traversal with pattern-gated event delivery.
//!
//! For every child of a directory the walker recurses first (if the child is a
//! directory) and only then emits the child's own event. A directory event is
//! therefore always delivered after every event of its subtree. The predicate
//! decides which events reach the visitor; it never prunes recursion.
//!
//! The blocking walker repairs a `PermissionDenied` on a directory listing by
//! relaxing that directory to `0o777` and retrying once. The async walker does
//! not repair anything and surfaces the first error as-is.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt, try_join_all};

use crate::pattern::FilterPredicate;
use crate::spec::{FsTreeError, SpecWalkOptions};
use crate::util::{IoResultExt, to_relative_slash};

/// One visited entry below the traversal root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalEvent {
    /// Entry path as reached from the traversal root.
    pub path_abs: PathBuf,
    /// `/`-separated path relative to the traversal root.
    pub path_rel: String,
    /// Basename for files; `None` marks a directory.
    pub name_file: Option<String>,
}

impl TraversalEvent {
    pub fn is_dir(&self) -> bool {
        self.name_file.is_none()
    }

    pub fn is_file(&self) -> bool {
        self.name_file.is_some()
    }

    fn new(path_abs: PathBuf, path_rel: String, name_entry: String, if_is_dir: bool) -> Self {
        Self {
            path_abs,
            path_rel,
            name_file: (!if_is_dir).then_some(name_entry),
        }
    }
}

#[derive(Debug, Clone)]
struct SpecWalkEntry {
    path_entry: PathBuf,
    name_entry: String,
    if_is_dir: bool,
}

struct SpecWalkContext<'a, F> {
    path_root: &'a Path,
    pred: &'a FilterPredicate,
    spec_walk_options: &'a SpecWalkOptions,
    visitor: F,
}

struct SpecWalkContextAsync<'a, F> {
    path_root: &'a Path,
    pred: &'a FilterPredicate,
    spec_walk_options: &'a SpecWalkOptions,
    visitor: &'a F,
}

////////////////////////////////////////////////////////////////////////////////
// #region Blocking

/// Walk `dir_root` depth-first, blocking, in name order.
///
/// `visitor` sees every entry whose root-relative path satisfies `pred`.
/// Returning an error from the visitor aborts the walk with that error.
pub fn walk<P, F>(
    dir_root: P,
    pred: &FilterPredicate,
    spec_walk_options: &SpecWalkOptions,
    visitor: F,
) -> Result<(), FsTreeError>
where
    P: AsRef<Path>,
    F: FnMut(&TraversalEvent) -> Result<(), FsTreeError>,
{
    let path_root = dir_root.as_ref();
    let mut spec_walk_ctx = SpecWalkContext {
        path_root,
        pred,
        spec_walk_options,
        visitor,
    };
    walk_directory(path_root, &mut spec_walk_ctx)
}

fn walk_directory<F>(
    path_dir: &Path,
    spec_walk_ctx: &mut SpecWalkContext<'_, F>,
) -> Result<(), FsTreeError>
where
    F: FnMut(&TraversalEvent) -> Result<(), FsTreeError>,
{
    let l_entries = list_directory_with_repair(path_dir, spec_walk_ctx.spec_walk_options)?;

    for spec_entry in l_entries {
        if spec_entry.if_is_dir {
            walk_directory(&spec_entry.path_entry, spec_walk_ctx)?;
        }

        let path_rel = relative_or_name(&spec_entry, spec_walk_ctx.path_root);
        if !spec_walk_ctx.pred.is_match(&path_rel) {
            continue;
        }
        tracing::trace!(path = %spec_entry.path_entry.display(), "visit");
        let event = TraversalEvent::new(
            spec_entry.path_entry,
            path_rel,
            spec_entry.name_entry,
            spec_entry.if_is_dir,
        );
        (spec_walk_ctx.visitor)(&event)?;
    }
    Ok(())
}

fn list_directory_with_repair(
    path_dir: &Path,
    spec_walk_options: &SpecWalkOptions,
) -> Result<Vec<SpecWalkEntry>, FsTreeError> {
    with_permission_repair(path_dir, || list_directory(path_dir, spec_walk_options))
}

/// Run `op`; on `PermissionDenied` relax `path_dir` and run it exactly once more.
fn with_permission_repair<T>(
    path_dir: &Path,
    mut op: impl FnMut() -> io::Result<T>,
) -> Result<T, FsTreeError> {
    match op() {
        Ok(value) => Ok(value),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            tracing::warn!(
                path = %path_dir.display(),
                "permission denied while listing; relaxing mode and retrying once"
            );
            relax_permissions(path_dir).at_path(path_dir)?;
            op().at_path(path_dir)
        }
        Err(e) => Err(FsTreeError::from_io(path_dir, e)),
    }
}

/// Read and stat every child of `path_dir`, sorted by name.
fn list_directory(
    path_dir: &Path,
    spec_walk_options: &SpecWalkOptions,
) -> io::Result<Vec<SpecWalkEntry>> {
    let mut l_entries = Vec::new();
    for entry_res in fs::read_dir(path_dir)? {
        let entry = entry_res?;
        let path_entry = entry.path();
        let stat_entry = if spec_walk_options.if_follow_symlinks {
            fs::metadata(&path_entry)?
        } else {
            fs::symlink_metadata(&path_entry)?
        };
        l_entries.push(SpecWalkEntry {
            path_entry,
            name_entry: entry.file_name().to_string_lossy().into_owned(),
            if_is_dir: stat_entry.is_dir(),
        });
    }
    l_entries.sort_by(|a, b| a.name_entry.cmp(&b.name_entry));
    Ok(l_entries)
}

#[cfg(unix)]
fn relax_permissions(path_dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path_dir, fs::Permissions::from_mode(0o777))
}

#[cfg(not(unix))]
fn relax_permissions(path_dir: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path_dir)?.permissions();
    perms.set_readonly(false);
    fs::set_permissions(path_dir, perms)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Async

/// Walk `dir_root` depth-first on `tokio::fs`, driving siblings concurrently.
///
/// Same visited set and the same directory-after-subtree guarantee as
/// [`walk`]; sibling events may arrive in any order. No permission repair is
/// attempted: the first error aborts the walk.
pub async fn walk_async<P, F, Fut>(
    dir_root: P,
    pred: &FilterPredicate,
    spec_walk_options: &SpecWalkOptions,
    visitor: F,
) -> Result<(), FsTreeError>
where
    P: AsRef<Path>,
    F: Fn(TraversalEvent) -> Fut + Sync,
    Fut: Future<Output = Result<(), FsTreeError>> + Send,
{
    let path_root = dir_root.as_ref();
    let spec_walk_ctx = SpecWalkContextAsync {
        path_root,
        pred,
        spec_walk_options,
        visitor: &visitor,
    };
    walk_directory_async(path_root.to_path_buf(), &spec_walk_ctx).await
}

fn walk_directory_async<'a, F, Fut>(
    path_dir: PathBuf,
    spec_walk_ctx: &'a SpecWalkContextAsync<'a, F>,
) -> BoxFuture<'a, Result<(), FsTreeError>>
where
    F: Fn(TraversalEvent) -> Fut + Sync,
    Fut: Future<Output = Result<(), FsTreeError>> + Send + 'a,
{
    async move {
        let mut iter_entries = tokio::fs::read_dir(&path_dir).await.at_path(&path_dir)?;
        let mut l_children = Vec::new();
        while let Some(entry) = iter_entries.next_entry().await.at_path(&path_dir)? {
            l_children.push((entry.path(), entry.file_name().to_string_lossy().into_owned()));
        }

        let l_tasks = l_children
            .into_iter()
            .map(move |(path_entry, name_entry)| async move {
                let res_stat = if spec_walk_ctx.spec_walk_options.if_follow_symlinks {
                    tokio::fs::metadata(&path_entry).await
                } else {
                    tokio::fs::symlink_metadata(&path_entry).await
                };
                let if_is_dir = res_stat.at_path(&path_entry)?.is_dir();
                if if_is_dir {
                    walk_directory_async(path_entry.clone(), spec_walk_ctx).await?;
                }

                let spec_entry = SpecWalkEntry {
                    path_entry,
                    name_entry,
                    if_is_dir,
                };
                let path_rel = relative_or_name(&spec_entry, spec_walk_ctx.path_root);
                if !spec_walk_ctx.pred.is_match(&path_rel) {
                    return Ok(());
                }
                let event = TraversalEvent::new(
                    spec_entry.path_entry,
                    path_rel,
                    spec_entry.name_entry,
                    spec_entry.if_is_dir,
                );
                (spec_walk_ctx.visitor)(event).await
            });
        try_join_all(l_tasks).await?;
        Ok(())
    }
    .boxed()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

fn relative_or_name(spec_entry: &SpecWalkEntry, path_root: &Path) -> String {
    to_relative_slash(&spec_entry.path_entry, path_root)
        .unwrap_or_else(|| spec_entry.name_entry.clone())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::sync::Mutex;

    use super::{TraversalEvent, walk, walk_async, with_permission_repair};
    use crate::pattern::FilterPredicate;
    use crate::spec::{EnumFsTreeErrorKind, FsTreeError, SpecWalkOptions};

    fn write_text(path: &Path, txt: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, txt).expect("write text");
    }

    /// Depth 4 with siblings on every level.
    fn build_tree(root: &Path) {
        write_text(&root.join("top.txt"), "0");
        write_text(&root.join("a/a1.txt"), "1");
        write_text(&root.join("a/b/b1.txt"), "2");
        write_text(&root.join("a/b/c/c1.txt"), "3");
        write_text(&root.join("a/b/c/c2.md"), "4");
        write_text(&root.join("a/d/d1.txt"), "5");
        write_text(&root.join("e/e1.md"), "6");
        std::fs::create_dir_all(root.join("e/empty")).expect("empty dir");
    }

    fn collect_blocking(root: &Path, pred: &FilterPredicate) -> Vec<TraversalEvent> {
        let mut l_events = Vec::new();
        walk(root, pred, &SpecWalkOptions::default(), |event| {
            l_events.push(event.clone());
            Ok(())
        })
        .expect("walk");
        l_events
    }

    fn assert_dirs_after_descendants(l_events: &[TraversalEvent]) {
        for (idx_dir, event_dir) in l_events.iter().enumerate().filter(|(_, e)| e.is_dir()) {
            let prefix = format!("{}/", event_dir.path_rel);
            for (idx, event) in l_events.iter().enumerate() {
                if event.path_rel.starts_with(&prefix) {
                    assert!(
                        idx < idx_dir,
                        "{} delivered after its parent {}",
                        event.path_rel,
                        event_dir.path_rel
                    );
                }
            }
        }
    }

    #[test]
    fn walk_is_post_order_for_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        build_tree(tmp.path());

        let l_events = collect_blocking(tmp.path(), &FilterPredicate::match_all());
        assert_dirs_after_descendants(&l_events);

        let l_files: Vec<&str> = l_events
            .iter()
            .filter(|e| e.is_file())
            .map(|e| e.path_rel.as_str())
            .collect();
        let set_files: BTreeSet<&str> = l_files.iter().copied().collect();
        assert_eq!(l_files.len(), 7);
        assert_eq!(set_files.len(), 7);

        let set_dirs: BTreeSet<&str> = l_events
            .iter()
            .filter(|e| e.is_dir())
            .map(|e| e.path_rel.as_str())
            .collect();
        let set_expected: BTreeSet<&str> =
            ["a", "a/b", "a/b/c", "a/d", "e", "e/empty"].into_iter().collect();
        assert_eq!(set_dirs, set_expected);
    }

    #[test]
    fn walk_blocking_order_is_deterministic() {
        let tmp = tempfile::tempdir().expect("tempdir");
        build_tree(tmp.path());

        let l_rel: Vec<String> = collect_blocking(tmp.path(), &FilterPredicate::match_all())
            .into_iter()
            .map(|e| e.path_rel)
            .collect();
        assert_eq!(
            l_rel,
            vec![
                "a/a1.txt", "a/b/b1.txt", "a/b/c/c1.txt", "a/b/c/c2.md", "a/b/c", "a/b",
                "a/d/d1.txt", "a/d", "a", "e/e1.md", "e/empty", "e", "top.txt",
            ]
        );
    }

    #[test]
    fn filter_gates_events_not_recursion() {
        let tmp = tempfile::tempdir().expect("tempdir");
        build_tree(tmp.path());

        let pred = FilterPredicate::from_glob("**/*.txt").expect("compile");
        let l_events = collect_blocking(tmp.path(), &pred);
        let set_rel: BTreeSet<String> = l_events.into_iter().map(|e| e.path_rel).collect();
        let set_expected: BTreeSet<String> = [
            "top.txt",
            "a/a1.txt",
            "a/b/b1.txt",
            "a/b/c/c1.txt",
            "a/d/d1.txt",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(set_rel, set_expected);
    }

    #[test]
    fn events_carry_absolute_path_and_file_name() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_text(&tmp.path().join("x/y.txt"), "y");

        let l_events = collect_blocking(tmp.path(), &FilterPredicate::match_all());
        assert_eq!(l_events.len(), 2);
        assert_eq!(l_events[0].path_abs, tmp.path().join("x/y.txt"));
        assert_eq!(l_events[0].name_file.as_deref(), Some("y.txt"));
        assert_eq!(l_events[1].path_abs, tmp.path().join("x"));
        assert!(l_events[1].is_dir());
    }

    #[test]
    fn visitor_error_aborts_walk() {
        let tmp = tempfile::tempdir().expect("tempdir");
        build_tree(tmp.path());

        let mut n_seen = 0;
        let err = walk(
            tmp.path(),
            &FilterPredicate::match_all(),
            &SpecWalkOptions::default(),
            |event| {
                n_seen += 1;
                Err(FsTreeError::NotFound {
                    path: event.path_abs.clone(),
                })
            },
        )
        .expect_err("visitor error must propagate");
        assert_eq!(n_seen, 1);
        assert_eq!(err.kind(), EnumFsTreeErrorKind::NotFound);
    }

    #[test]
    fn missing_root_is_reported() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = walk(
            tmp.path().join("nope"),
            &FilterPredicate::match_all(),
            &SpecWalkOptions::default(),
            |_| Ok(()),
        )
        .expect_err("missing root");
        assert_eq!(err.kind(), EnumFsTreeErrorKind::NotFound);
        assert_eq!(err.path(), Some(tmp.path().join("nope").as_path()));
    }

    #[cfg(unix)]
    #[test]
    fn walk_repairs_unreadable_directory() {
        use std::os::unix::fs::PermissionsExt;

        let if_enforced = crate::util::if_permissions_enforced();
        let tmp = tempfile::tempdir().expect("tempdir");
        write_text(&tmp.path().join("locked/inner.txt"), "x");
        let path_locked = tmp.path().join("locked");
        std::fs::set_permissions(&path_locked, std::fs::Permissions::from_mode(0o000))
            .expect("lock");

        let l_events = collect_blocking(tmp.path(), &FilterPredicate::match_all());
        let n_mode = std::fs::metadata(&path_locked).expect("stat").permissions().mode();
        std::fs::set_permissions(&path_locked, std::fs::Permissions::from_mode(0o755))
            .expect("unlock");

        let l_rel: Vec<&str> = l_events.iter().map(|e| e.path_rel.as_str()).collect();
        assert_eq!(l_rel, vec!["locked/inner.txt", "locked"]);
        if if_enforced {
            assert_eq!(n_mode & 0o777, 0o777);
        }
    }

    #[test]
    fn permission_repair_retries_once_then_propagates() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut n_calls = 0;
        let err = with_permission_repair(tmp.path(), || -> std::io::Result<()> {
            n_calls += 1;
            Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
        })
        .expect_err("still denied");
        assert_eq!(n_calls, 2);
        assert_eq!(err.kind(), EnumFsTreeErrorKind::PermissionDenied);
        assert_eq!(err.path(), Some(tmp.path()));

        let mut n_calls = 0;
        let err = with_permission_repair(tmp.path(), || -> std::io::Result<()> {
            n_calls += 1;
            Err(std::io::Error::other("disk gone"))
        })
        .expect_err("not a permission error");
        assert_eq!(n_calls, 1);
        assert_eq!(err.kind(), EnumFsTreeErrorKind::IoFailure);

        let mut n_calls = 0;
        let value = with_permission_repair(tmp.path(), || {
            n_calls += 1;
            if n_calls == 1 {
                Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
            } else {
                Ok(7)
            }
        })
        .expect("repaired");
        assert_eq!((value, n_calls), (7, 2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn walk_async_does_not_repair_permissions() {
        use std::os::unix::fs::PermissionsExt;

        if !crate::util::if_permissions_enforced() {
            return;
        }
        let tmp = tempfile::tempdir().expect("tempdir");
        write_text(&tmp.path().join("locked/inner.txt"), "x");
        let path_locked = tmp.path().join("locked");
        std::fs::set_permissions(&path_locked, std::fs::Permissions::from_mode(0o000))
            .expect("lock");

        let res = walk_async(
            tmp.path(),
            &FilterPredicate::match_all(),
            &SpecWalkOptions::default(),
            |_| async { Ok(()) },
        )
        .await;
        let n_mode = std::fs::metadata(&path_locked).expect("stat").permissions().mode();
        std::fs::set_permissions(&path_locked, std::fs::Permissions::from_mode(0o755))
            .expect("unlock");

        let err = res.expect_err("denied");
        assert_eq!(err.kind(), EnumFsTreeErrorKind::PermissionDenied);
        assert_eq!(err.path(), Some(path_locked.as_path()));
        assert_eq!(n_mode & 0o777, 0o000);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_dirs_are_not_descended_without_follow() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_text(&tmp.path().join("real/f.txt"), "f");
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("link"))
            .expect("symlink");

        let mut l_rel = Vec::new();
        walk(
            tmp.path(),
            &FilterPredicate::match_all(),
            &SpecWalkOptions {
                if_follow_symlinks: false,
            },
            |event| {
                l_rel.push((event.path_rel.clone(), event.is_file()));
                Ok(())
            },
        )
        .expect("walk");
        assert_eq!(
            l_rel,
            vec![
                ("link".to_string(), true),
                ("real/f.txt".to_string(), true),
                ("real".to_string(), false),
            ]
        );

        let l_events = collect_blocking(tmp.path(), &FilterPredicate::match_all());
        assert!(l_events.iter().any(|e| e.path_rel == "link/f.txt"));
    }

    #[tokio::test]
    async fn walk_async_visits_same_set_post_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        build_tree(tmp.path());

        let l_events_async: Mutex<Vec<TraversalEvent>> = Mutex::new(Vec::new());
        walk_async(
            tmp.path(),
            &FilterPredicate::match_all(),
            &SpecWalkOptions::default(),
            |event| {
                l_events_async.lock().expect("lock").push(event);
                async { Ok(()) }
            },
        )
        .await
        .expect("walk async");
        let l_events_async = l_events_async.into_inner().expect("lock");
        assert_dirs_after_descendants(&l_events_async);

        let l_events = collect_blocking(tmp.path(), &FilterPredicate::match_all());
        let set_async: BTreeSet<TraversalEventKey> =
            l_events_async.iter().map(TraversalEventKey::from).collect();
        let set_blocking: BTreeSet<TraversalEventKey> =
            l_events.iter().map(TraversalEventKey::from).collect();
        assert_eq!(l_events_async.len(), l_events.len());
        assert_eq!(set_async, set_blocking);
    }

    #[tokio::test]
    async fn walk_async_surfaces_missing_root() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = walk_async(
            tmp.path().join("nope"),
            &FilterPredicate::match_all(),
            &SpecWalkOptions::default(),
            |_| async { Ok(()) },
        )
        .await
        .expect_err("missing root");
        assert_eq!(err.kind(), EnumFsTreeErrorKind::NotFound);
    }

    #[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct TraversalEventKey(String, Option<String>);

    impl From<&TraversalEvent> for TraversalEventKey {
        fn from(event: &TraversalEvent) -> Self {
            Self(event.path_rel.clone(), event.name_file.clone())
        }
    }
}
