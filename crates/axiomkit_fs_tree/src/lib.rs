//! `axiomkit_fs_tree` v1:
//! Rust-side filesystem tree engine.
//!
//! Modules:
//! - `mkdir`   : idempotent recursive directory creation
//! - `pattern` : glob/regex/literal filters over root-relative paths
//! - `walk`    : post-order traversal (blocking and async)
//! - `copy`    : filtered tree copy with per-file transforms
//! - `remove`  : recursive tree removal
//! - `spec`    : enums/options/errors
//! - `report`  : run-time report models
//! - `util`    : shared helper functions

pub mod copy;
pub mod mkdir;
pub mod pattern;
pub mod remove;
pub mod report;
pub mod spec;
pub mod walk;
mod util;

pub use copy::{copy_tree, copy_tree_async};
pub use mkdir::{ensure_dir, ensure_dir_async, find_existing_ancestor, missing_segments};
pub use pattern::FilterPredicate;
pub use remove::{remove_tree, remove_tree_async};
pub use report::{ReportCopy, ReportRemove};
pub use spec::{
    EnumCopyEncoding, EnumFsTreeErrorKind, EnumPatternMode, FileContent, FsTreeError,
    MODE_DIR_DEFAULT, SpecCopyOptions, SpecWalkOptions, TransformOutput, TypeTransformFn,
};
pub use walk::{TraversalEvent, walk, walk_async};
