//! Path filtering (§4.5, §6): a path is included iff the include pattern
//! matches (empty include = match all) and the exclude pattern does not
//! match (empty exclude = exclude nothing). Patterns are regular
//! expressions over the POSIX relative path, matching
//! `examples/original_source/filter.go`'s `IncludeThanExcludeFilter`.

use anyhow::{Context, Result};
use regex::Regex;

#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl PathFilter {
    /// Empty strings mean "match all" / "exclude nothing" respectively.
    pub fn new(include: &str, exclude: &str) -> Result<Self> {
        let include = compile_or_none(include).context("compiling include pattern")?;
        let exclude = compile_or_none(exclude).context("compiling exclude pattern")?;
        Ok(PathFilter { include, exclude })
    }

    pub fn all() -> Self {
        PathFilter {
            include: None,
            exclude: None,
        }
    }

    pub fn matches(&self, relative_path: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(relative_path) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(relative_path) {
                return false;
            }
        }
        true
    }
}

fn compile_or_none(pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Regex::new(pattern)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_patterns_match_everything() {
        let f = PathFilter::new("", "").unwrap();
        assert!(f.matches("any/path.bin"));
    }

    #[test]
    fn include_restricts() {
        let f = PathFilter::new(r"^data/", "").unwrap();
        assert!(f.matches("data/a.bin"));
        assert!(!f.matches("logs/a.bin"));
    }

    #[test]
    fn exclude_overrides_include() {
        let f = PathFilter::new(r"^data/", r"\.tmp$").unwrap();
        assert!(f.matches("data/a.bin"));
        assert!(!f.matches("data/a.tmp"));
    }
}
