//! Exclude-pattern filtering, backed by a compiled [`regex::RegexSet`] —
//! one matcher per `--exclude` pattern, ORed together.

use regex::RegexSet;
use thiserror::Error;

use crate::PathFilter;

/// Failure compiling a set of `--exclude` patterns.
#[derive(Debug, Error)]
#[error("invalid exclude pattern: {0}")]
pub struct FilterError(#[from] regex::Error);

/// A [`PathFilter`] backed by a compiled regex set.
pub struct RegexSetFilter {
    set: RegexSet,
}

impl RegexSetFilter {
    /// Compiles `patterns` into a single set, matched against a path's wire
    /// `/`-separated form. An empty pattern list excludes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] if any pattern fails to compile.
    pub fn new<I, S>(patterns: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = RegexSet::new(patterns)?;
        Ok(Self { set })
    }
}

impl PathFilter for RegexSetFilter {
    fn excluded(&self, relpath: &str) -> bool {
        self.set.is_match(relpath)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pattern_set_excludes_nothing() {
        let filter = RegexSetFilter::new(Vec::<&str>::new()).unwrap();
        assert!(!filter.excluded("a/b.txt"));
    }

    #[test]
    fn any_matching_pattern_excludes() {
        let filter = RegexSetFilter::new([r"\.tmp$", r"^cache/"]).unwrap();
        assert!(filter.excluded("a/b.tmp"));
        assert!(filter.excluded("cache/x"));
        assert!(!filter.excluded("a/b.txt"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(RegexSetFilter::new(["("]).is_err());
    }
}
