//! Run summaries for copy and remove calls.

use std::collections::BTreeMap;
use std::fmt;

/// What happened to one copied file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnumCopyOutcome {
    /// Bytes copied verbatim.
    Copied,
    /// Transformed and written to the derived destination.
    Transformed,
    /// Transformed and written to a caller-chosen path.
    Redirected,
}

/// Aggregate counters for one `copy_tree` run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportCopy {
    /// Files that passed the filter.
    pub cnt_matched: u64,
    /// Destination directories created (root included).
    pub cnt_dirs_created: u64,
    /// Files copied byte-for-byte.
    pub cnt_copied: u64,
    /// Files transformed into the derived destination.
    pub cnt_transformed: u64,
    /// Files transformed into an override path.
    pub cnt_redirected: u64,
}

impl ReportCopy {
    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_matched".to_string(), self.cnt_matched);
        dict_counts.insert("cnt_dirs_created".to_string(), self.cnt_dirs_created);
        dict_counts.insert("cnt_copied".to_string(), self.cnt_copied);
        dict_counts.insert("cnt_transformed".to_string(), self.cnt_transformed);
        dict_counts.insert("cnt_redirected".to_string(), self.cnt_redirected);
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        format!(
            "{prefix} matched={} dirs_created={} copied={} transformed={} redirected={}",
            self.cnt_matched,
            self.cnt_dirs_created,
            self.cnt_copied,
            self.cnt_transformed,
            self.cnt_redirected
        )
    }
}

impl fmt::Display for ReportCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[COPY]"))
    }
}

/// Mutable accumulator for copy statistics.
#[derive(Debug, Default, Clone)]
pub(crate) struct ReportCopyBuilder {
    report: ReportCopy,
}

impl ReportCopyBuilder {
    pub(crate) fn add_matched(&mut self, value: u64) {
        self.report.cnt_matched += value;
    }

    pub(crate) fn add_dirs_created(&mut self, value: usize) {
        self.report.cnt_dirs_created += value as u64;
    }

    pub(crate) fn add_outcome(&mut self, outcome: EnumCopyOutcome) {
        match outcome {
            EnumCopyOutcome::Copied => self.report.cnt_copied += 1,
            EnumCopyOutcome::Transformed => self.report.cnt_transformed += 1,
            EnumCopyOutcome::Redirected => self.report.cnt_redirected += 1,
        }
    }

    /// Finalize builder into immutable report.
    pub(crate) fn build(self) -> ReportCopy {
        self.report
    }
}

/// Aggregate counters for one `remove_tree` run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportRemove {
    pub cnt_files_removed: u64,
    /// Directories removed, the root included.
    pub cnt_dirs_removed: u64,
}

impl ReportRemove {
    pub fn format(&self, prefix: &str) -> String {
        format!(
            "{prefix} files_removed={} dirs_removed={}",
            self.cnt_files_removed, self.cnt_dirs_removed
        )
    }
}

impl fmt::Display for ReportRemove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[REMOVE]"))
    }
}
