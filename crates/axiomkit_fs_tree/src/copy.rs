//! Filtered tree copy with optional per-file transformation.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use futures::future::try_join_all;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::mkdir::{ensure_dir, ensure_dir_async};
use crate::pattern::FilterPredicate;
use crate::report::{EnumCopyOutcome, ReportCopy, ReportCopyBuilder};
use crate::spec::{
    EnumCopyEncoding, FileContent, FsTreeError, SpecCopyOptions, SpecWalkOptions, TransformOutput,
};
use crate::util::{
    IoResultExt, apply_metadata, calculate_worker_limit, copy_file_verbatim,
    derive_destination_path, parent_or_current,
};
use crate::walk::{TraversalEvent, walk, walk_async};

#[derive(Debug, Clone)]
struct SpecCopyTaskFile {
    path_file_src: PathBuf,
    path_file_dst: PathBuf,
    path_rel: String,
}

impl SpecCopyTaskFile {
    fn from_event(event: &TraversalEvent, path_dir_src: &Path, path_dir_dst: &Path) -> Self {
        Self {
            path_file_src: event.path_abs.clone(),
            path_file_dst: derive_destination_path(&event.path_abs, path_dir_src, path_dir_dst),
            path_rel: event.path_rel.clone(),
        }
    }
}

struct SpecCopyContext {
    spec_cp_options: SpecCopyOptions,
    pred_filter: FilterPredicate,
    pred_no_process: Option<FilterPredicate>,
}

impl SpecCopyContext {
    fn new(spec_cp_options: SpecCopyOptions) -> Result<Self, FsTreeError> {
        let pred_filter = FilterPredicate::compile(
            spec_cp_options.patterns_filter.as_deref(),
            spec_cp_options.rule_pattern,
        )?;
        // An absent no-process list exempts nothing, unlike an absent filter.
        let pred_no_process = match spec_cp_options.patterns_no_process.as_deref() {
            Some(patterns) if !patterns.is_empty() => Some(FilterPredicate::compile(
                Some(patterns),
                spec_cp_options.rule_pattern,
            )?),
            _ => None,
        };
        Ok(Self {
            spec_cp_options,
            pred_filter,
            pred_no_process,
        })
    }

    fn spec_walk_options(&self) -> SpecWalkOptions {
        SpecWalkOptions {
            if_follow_symlinks: self.spec_cp_options.if_follow_symlinks,
        }
    }

    fn is_no_process(&self, path_rel: &str) -> bool {
        self.pred_no_process
            .as_ref()
            .is_some_and(|pred| pred.is_match(path_rel))
    }
}

/// Destination directories to prepare, each listed once in first-seen order.
fn collect_unique_dirs(l_tasks: &[SpecCopyTaskFile]) -> Vec<PathBuf> {
    let mut set_seen: HashSet<&Path> = HashSet::new();
    let mut l_dirs = Vec::new();
    for spec_task in l_tasks {
        let Some(path_parent_dst) = spec_task.path_file_dst.parent() else {
            continue;
        };
        if set_seen.insert(path_parent_dst) {
            l_dirs.push(path_parent_dst.to_path_buf());
        }
    }
    l_dirs
}

fn decode_content<'a>(
    raw: &'a [u8],
    encoding: EnumCopyEncoding,
    path_file_src: &Path,
) -> Result<FileContent<'a>, FsTreeError> {
    match encoding {
        EnumCopyEncoding::Binary => Ok(FileContent::Bytes(raw)),
        EnumCopyEncoding::Utf8 => std::str::from_utf8(raw)
            .map(FileContent::Text)
            .map_err(|e| FsTreeError::InvalidData {
                path: path_file_src.to_path_buf(),
                message: e.to_string(),
            }),
    }
}

////////////////////////////////////////////////////////////////////////////////
// #region Blocking

/// Copy a directory tree from `dir_source` to `dir_destination`.
///
/// Runs in three phases:
/// 1. Walk the source, collecting files accepted by `patterns_filter`.
/// 2. Create the destination root and each distinct destination directory once.
/// 3. Copy every file verbatim, or through `transform` when one is set and the
///    file is not exempted by `patterns_no_process`.
///
/// The first failure aborts the run; files already written stay in place.
pub fn copy_tree<P, Q>(
    dir_source: P,
    dir_destination: Q,
    spec_cp_options: SpecCopyOptions,
) -> Result<ReportCopy, FsTreeError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let path_dir_src = dir_source.as_ref();
    let path_dir_dst = dir_destination.as_ref();
    if !fs::metadata(path_dir_src).at_path(path_dir_src)?.is_dir() {
        return Err(FsTreeError::SourceNotDirectory(path_dir_src.to_path_buf()));
    }
    let spec_cp_ctx = SpecCopyContext::new(spec_cp_options)?;
    let mut builder_cp_report = ReportCopyBuilder::default();

    let mut l_tasks_file_copy = Vec::new();
    walk(
        path_dir_src,
        &spec_cp_ctx.pred_filter,
        &spec_cp_ctx.spec_walk_options(),
        |event| {
            if event.is_file() {
                l_tasks_file_copy.push(SpecCopyTaskFile::from_event(
                    event,
                    path_dir_src,
                    path_dir_dst,
                ));
            }
            Ok(())
        },
    )?;
    builder_cp_report.add_matched(l_tasks_file_copy.len() as u64);
    tracing::debug!(
        src = %path_dir_src.display(),
        n_files = l_tasks_file_copy.len(),
        "copy plan collected"
    );

    let mode_dir = spec_cp_ctx.spec_cp_options.mode_dir;
    builder_cp_report.add_dirs_created(ensure_dir(path_dir_dst, mode_dir)?);
    for path_dir_dst_sub in collect_unique_dirs(&l_tasks_file_copy) {
        builder_cp_report.add_dirs_created(ensure_dir(&path_dir_dst_sub, mode_dir)?);
    }

    let l_outcomes = run_file_copy_tasks(&l_tasks_file_copy, &spec_cp_ctx)?;
    for outcome in l_outcomes {
        builder_cp_report.add_outcome(outcome);
    }

    let report = builder_cp_report.build();
    tracing::debug!(dst = %path_dir_dst.display(), "{report}");
    Ok(report)
}

fn run_file_copy_tasks(
    l_tasks_file_copy: &[SpecCopyTaskFile],
    spec_cp_ctx: &SpecCopyContext,
) -> Result<Vec<EnumCopyOutcome>, FsTreeError> {
    let n_workers_max = calculate_worker_limit(spec_cp_ctx.spec_cp_options.num_workers_max);
    if n_workers_max <= 1 || l_tasks_file_copy.len() <= 1 {
        return l_tasks_file_copy
            .iter()
            .map(|spec_task| copy_one_file(spec_task, spec_cp_ctx))
            .collect();
    }

    match ThreadPoolBuilder::new().num_threads(n_workers_max).build() {
        Ok(thread_pool) => thread_pool.install(|| {
            l_tasks_file_copy
                .par_iter()
                .map(|spec_task| copy_one_file(spec_task, spec_cp_ctx))
                .collect()
        }),
        Err(e) => {
            tracing::warn!(
                n_workers_max,
                error = %e,
                "failed to initialize thread pool; falling back to serial copy"
            );
            l_tasks_file_copy
                .iter()
                .map(|spec_task| copy_one_file(spec_task, spec_cp_ctx))
                .collect()
        }
    }
}

fn copy_one_file(
    spec_task: &SpecCopyTaskFile,
    spec_cp_ctx: &SpecCopyContext,
) -> Result<EnumCopyOutcome, FsTreeError> {
    let spec_cp_options = &spec_cp_ctx.spec_cp_options;
    let Some(transform) = spec_cp_options.transform.as_ref() else {
        return copy_verbatim(spec_task, spec_cp_options);
    };
    if spec_cp_ctx.is_no_process(&spec_task.path_rel) {
        tracing::trace!(path = %spec_task.path_rel, "transform skipped");
        return copy_verbatim(spec_task, spec_cp_options);
    }

    let raw = fs::read(&spec_task.path_file_src).at_path(&spec_task.path_file_src)?;
    let content = decode_content(&raw, spec_cp_options.encoding, &spec_task.path_file_src)?;
    match transform(content, &spec_task.path_file_src)? {
        TransformOutput::Content(content) => {
            fs::write(&spec_task.path_file_dst, content).at_path(&spec_task.path_file_dst)?;
            Ok(EnumCopyOutcome::Transformed)
        }
        TransformOutput::Redirect { content, path } if path.as_os_str().is_empty() => {
            fs::write(&spec_task.path_file_dst, content).at_path(&spec_task.path_file_dst)?;
            Ok(EnumCopyOutcome::Transformed)
        }
        TransformOutput::Redirect { content, path } => {
            if let Some(path_parent) = parent_or_current(&path) {
                ensure_dir(path_parent, spec_cp_options.mode_dir)?;
            }
            fs::write(&path, content).at_path(&path)?;
            tracing::trace!(src = %spec_task.path_rel, dst = %path.display(), "redirected");
            Ok(EnumCopyOutcome::Redirected)
        }
    }
}

fn copy_verbatim(
    spec_task: &SpecCopyTaskFile,
    spec_cp_options: &SpecCopyOptions,
) -> Result<EnumCopyOutcome, FsTreeError> {
    copy_file_verbatim(
        &spec_task.path_file_src,
        &spec_task.path_file_dst,
        spec_cp_options.if_preserve_metadata,
    )
    .at_path(&spec_task.path_file_dst)?;
    Ok(EnumCopyOutcome::Copied)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Async

/// Async counterpart of [`copy_tree`] on `tokio::fs`.
///
/// Enumeration and file copies run concurrently; directory preparation stays
/// sequential. Results match [`copy_tree`] for the same inputs.
pub async fn copy_tree_async<P, Q>(
    dir_source: P,
    dir_destination: Q,
    spec_cp_options: SpecCopyOptions,
) -> Result<ReportCopy, FsTreeError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let path_dir_src = dir_source.as_ref();
    let path_dir_dst = dir_destination.as_ref();
    let stat_dir_src = tokio::fs::metadata(path_dir_src)
        .await
        .at_path(path_dir_src)?;
    if !stat_dir_src.is_dir() {
        return Err(FsTreeError::SourceNotDirectory(path_dir_src.to_path_buf()));
    }
    let spec_cp_ctx = SpecCopyContext::new(spec_cp_options)?;
    let mut builder_cp_report = ReportCopyBuilder::default();

    let l_tasks_file_copy = tokio::sync::Mutex::new(Vec::new());
    walk_async(
        path_dir_src,
        &spec_cp_ctx.pred_filter,
        &spec_cp_ctx.spec_walk_options(),
        |event| {
            let spec_task = event
                .is_file()
                .then(|| SpecCopyTaskFile::from_event(&event, path_dir_src, path_dir_dst));
            let l_tasks_file_copy = &l_tasks_file_copy;
            async move {
                if let Some(spec_task) = spec_task {
                    l_tasks_file_copy.lock().await.push(spec_task);
                }
                Ok(())
            }
        },
    )
    .await?;
    let mut l_tasks_file_copy = l_tasks_file_copy.into_inner();
    l_tasks_file_copy.sort_by(|a, b| a.path_rel.cmp(&b.path_rel));
    builder_cp_report.add_matched(l_tasks_file_copy.len() as u64);

    let mode_dir = spec_cp_ctx.spec_cp_options.mode_dir;
    builder_cp_report.add_dirs_created(ensure_dir_async(path_dir_dst, mode_dir).await?);
    for path_dir_dst_sub in collect_unique_dirs(&l_tasks_file_copy) {
        builder_cp_report.add_dirs_created(ensure_dir_async(&path_dir_dst_sub, mode_dir).await?);
    }

    let l_outcomes = try_join_all(
        l_tasks_file_copy
            .iter()
            .map(|spec_task| copy_one_file_async(spec_task, &spec_cp_ctx)),
    )
    .await?;
    for outcome in l_outcomes {
        builder_cp_report.add_outcome(outcome);
    }

    let report = builder_cp_report.build();
    tracing::debug!(dst = %path_dir_dst.display(), "{report}");
    Ok(report)
}

async fn copy_one_file_async(
    spec_task: &SpecCopyTaskFile,
    spec_cp_ctx: &SpecCopyContext,
) -> Result<EnumCopyOutcome, FsTreeError> {
    let spec_cp_options = &spec_cp_ctx.spec_cp_options;
    let Some(transform) = spec_cp_options.transform.as_ref() else {
        return copy_verbatim_async(spec_task, spec_cp_options).await;
    };
    if spec_cp_ctx.is_no_process(&spec_task.path_rel) {
        tracing::trace!(path = %spec_task.path_rel, "transform skipped");
        return copy_verbatim_async(spec_task, spec_cp_options).await;
    }

    let raw = tokio::fs::read(&spec_task.path_file_src)
        .await
        .at_path(&spec_task.path_file_src)?;
    let output = {
        let content = decode_content(&raw, spec_cp_options.encoding, &spec_task.path_file_src)?;
        transform(content, &spec_task.path_file_src)?
    };
    let (content, path_file_dst, outcome) = match output {
        TransformOutput::Content(content) => (
            content,
            spec_task.path_file_dst.clone(),
            EnumCopyOutcome::Transformed,
        ),
        TransformOutput::Redirect { content, path } if path.as_os_str().is_empty() => (
            content,
            spec_task.path_file_dst.clone(),
            EnumCopyOutcome::Transformed,
        ),
        TransformOutput::Redirect { content, path } => {
            if let Some(path_parent) = parent_or_current(&path) {
                ensure_dir_async(path_parent, spec_cp_options.mode_dir).await?;
            }
            (content, path, EnumCopyOutcome::Redirected)
        }
    };
    tokio::fs::write(&path_file_dst, content)
        .await
        .at_path(&path_file_dst)?;
    Ok(outcome)
}

async fn copy_verbatim_async(
    spec_task: &SpecCopyTaskFile,
    spec_cp_options: &SpecCopyOptions,
) -> Result<EnumCopyOutcome, FsTreeError> {
    tokio::fs::copy(&spec_task.path_file_src, &spec_task.path_file_dst)
        .await
        .at_path(&spec_task.path_file_dst)?;
    if spec_cp_options.if_preserve_metadata {
        let path_file_src = spec_task.path_file_src.clone();
        let path_file_dst = spec_task.path_file_dst.clone();
        tokio::task::spawn_blocking(move || apply_metadata(&path_file_src, &path_file_dst))
            .await
            .map_err(io::Error::other)
            .and_then(|res| res)
            .at_path(&spec_task.path_file_dst)?;
    }
    Ok(EnumCopyOutcome::Copied)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
