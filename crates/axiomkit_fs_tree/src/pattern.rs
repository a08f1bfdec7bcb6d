//! Pattern compilation into relative-path predicates.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::{Regex, RegexSet};

use crate::spec::{EnumPatternMode, FsTreeError};

#[derive(Debug, Clone)]
enum TypePatternSeq {
    MatchAll,
    Literal(Vec<String>),
    Glob(GlobSet),
    Regex(RegexSet),
}

/// Compiled, immutable predicate over `/`-separated paths relative to a
/// traversal root. `true` means "included".
///
/// An absent or empty pattern set compiles to the match-everything predicate.
/// A non-empty set matches when any single pattern does.
#[derive(Debug, Clone)]
pub struct FilterPredicate {
    patterns: TypePatternSeq,
}

impl Default for FilterPredicate {
    fn default() -> Self {
        Self::match_all()
    }
}

impl FilterPredicate {
    pub fn match_all() -> Self {
        Self {
            patterns: TypePatternSeq::MatchAll,
        }
    }

    /// Compile a single glob.
    pub fn from_glob(pattern: &str) -> Result<Self, FsTreeError> {
        let l_patterns = [pattern.to_string()];
        Self::compile(Some(&l_patterns[..]), EnumPatternMode::Glob)
    }

    pub fn compile(
        patterns: Option<&[String]>,
        rule_pattern: EnumPatternMode,
    ) -> Result<Self, FsTreeError> {
        let Some(patterns) = patterns else {
            return Ok(Self::match_all());
        };
        if patterns.is_empty() {
            return Ok(Self::match_all());
        }

        let patterns = match rule_pattern {
            EnumPatternMode::Literal => TypePatternSeq::Literal(patterns.to_vec()),
            EnumPatternMode::Glob => {
                let mut builder_globs = GlobSetBuilder::new();
                for pattern in patterns {
                    let glob = GlobBuilder::new(pattern)
                        .literal_separator(true)
                        .build()
                        .map_err(|e| FsTreeError::InvalidPattern(format!("{pattern:?}: {e}")))?;
                    builder_globs.add(glob);
                }
                let set_globs = builder_globs
                    .build()
                    .map_err(|e| FsTreeError::InvalidPattern(e.to_string()))?;
                TypePatternSeq::Glob(set_globs)
            }
            EnumPatternMode::Regex => {
                // Validate one by one so the error names the offending pattern.
                for pattern in patterns {
                    Regex::new(pattern)
                        .map_err(|e| FsTreeError::InvalidPattern(format!("{pattern:?}: {e}")))?;
                }
                let set_regex = RegexSet::new(patterns)
                    .map_err(|e| FsTreeError::InvalidPattern(e.to_string()))?;
                TypePatternSeq::Regex(set_regex)
            }
        };
        Ok(Self { patterns })
    }

    /// Whether this predicate accepts every input.
    pub fn is_match_all(&self) -> bool {
        matches!(self.patterns, TypePatternSeq::MatchAll)
    }

    pub fn is_match(&self, path_rel: &str) -> bool {
        let path_rel = normalize_separators(path_rel);
        match &self.patterns {
            TypePatternSeq::MatchAll => true,
            TypePatternSeq::Literal(v) => v.iter().any(|p| path_rel.contains(p.as_str())),
            TypePatternSeq::Glob(set_globs) => set_globs.is_match(&*path_rel),
            TypePatternSeq::Regex(set_regex) => set_regex.is_match(&path_rel),
        }
    }
}

fn normalize_separators(path_rel: &str) -> std::borrow::Cow<'_, str> {
    if std::path::MAIN_SEPARATOR == '/' || !path_rel.contains(std::path::MAIN_SEPARATOR) {
        return std::borrow::Cow::Borrowed(path_rel);
    }
    std::borrow::Cow::Owned(path_rel.replace(std::path::MAIN_SEPARATOR, "/"))
}

#[cfg(test)]
mod tests {
    use super::FilterPredicate;
    use crate::spec::{EnumFsTreeErrorKind, EnumPatternMode};

    fn globs(patterns: &[&str]) -> FilterPredicate {
        let l_patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        FilterPredicate::compile(Some(l_patterns.as_slice()), EnumPatternMode::Glob)
            .expect("compile")
    }

    #[test]
    fn absent_or_empty_matches_everything() {
        let pred = FilterPredicate::compile(None, EnumPatternMode::Glob).expect("compile");
        assert!(pred.is_match_all());
        assert!(pred.is_match("a/b/c.bin"));
        assert!(pred.is_match(""));

        let l_empty: Vec<String> = Vec::new();
        let pred = FilterPredicate::compile(Some(l_empty.as_slice()), EnumPatternMode::Regex)
            .expect("compile");
        assert!(pred.is_match("anything"));
    }

    #[test]
    fn star_does_not_cross_separator() {
        let pred = FilterPredicate::from_glob("*.js").expect("compile");
        assert!(pred.is_match("a.js"));
        assert!(!pred.is_match("a/b.js"));
    }

    #[test]
    fn recursive_wildcard_crosses_directories() {
        let pred = FilterPredicate::from_glob("a/**/*.js").expect("compile");
        assert!(pred.is_match("a/b/c.js"));
        assert!(pred.is_match("a/b/c/d.js"));
        assert!(!pred.is_match("b/c.js"));

        let pred = FilterPredicate::from_glob("**/*.txt").expect("compile");
        assert!(pred.is_match("x.txt"));
        assert!(pred.is_match("a/b/y.txt"));
        assert!(!pred.is_match("a/b"));
    }

    #[test]
    fn any_pattern_in_set_matches() {
        let pred = globs(&["*.md", "docs/**"]);
        assert!(pred.is_match("README.md"));
        assert!(pred.is_match("docs/guide/intro.txt"));
        assert!(!pred.is_match("src/lib.rs"));
    }

    #[test]
    fn regex_and_literal_modes() {
        let l_patterns = vec![r"^report_\d+\.csv$".to_string()];
        let pred = FilterPredicate::compile(Some(l_patterns.as_slice()), EnumPatternMode::Regex)
            .expect("compile");
        assert!(pred.is_match("report_01.csv"));
        assert!(!pred.is_match("a/report_01.csv"));

        let l_patterns = vec!["vendor/".to_string()];
        let pred = FilterPredicate::compile(Some(l_patterns.as_slice()), EnumPatternMode::Literal)
            .expect("compile");
        assert!(pred.is_match("x/vendor/lib.js"));
        assert!(!pred.is_match("x/lib.js"));
    }

    #[test]
    fn invalid_patterns_rejected() {
        let err = FilterPredicate::from_glob("[").expect_err("invalid glob");
        assert_eq!(err.kind(), EnumFsTreeErrorKind::InvalidPattern);

        let l_patterns = vec!["(".to_string()];
        let err = FilterPredicate::compile(Some(l_patterns.as_slice()), EnumPatternMode::Regex)
            .expect_err("invalid regex");
        assert_eq!(err.kind(), EnumFsTreeErrorKind::InvalidPattern);
    }
}
