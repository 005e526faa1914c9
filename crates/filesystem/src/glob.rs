//! Include/exclude glob filters for directory scans.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::FileSystemError;

/// A compiled include/exclude filter applied to forward-slashed relative
/// paths.
///
/// A path matches when it matches any include pattern (everything, if no
/// include patterns were given) and matches no exclude pattern.
#[derive(Debug, Clone)]
pub struct GlobFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl GlobFilter {
    /// Build a filter from include and exclude pattern lists.
    ///
    /// # Errors
    /// `FileSystemError::InvalidGlobPattern` for the first pattern that does
    /// not compile.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, FileSystemError> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Build an include-only filter.
    pub fn include(patterns: Vec<String>) -> Result<Self, FileSystemError> {
        Self::new(&patterns, &[])
    }

    /// Build an exclude-only filter.
    pub fn exclude(patterns: Vec<String>) -> Result<Self, FileSystemError> {
        Self::new(&[], &patterns)
    }

    /// Whether the relative path passes the filter.
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

impl Default for GlobFilter {
    /// The pass-everything filter.
    fn default() -> Self {
        Self {
            include: None,
            exclude: None,
        }
    }
}

fn compile(patterns: &[String]) -> Result<Option<GlobSet>, FileSystemError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder: GlobSetBuilder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob: Glob =
            Glob::new(pattern).map_err(|e| FileSystemError::InvalidGlobPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        builder.add(glob);
    }
    let set: GlobSet = builder
        .build()
        .map_err(|e| FileSystemError::InvalidGlobPattern {
            pattern: patterns.join(","),
            reason: e.to_string(),
        })?;
    Ok(Some(set))
}
