//! Ignore rules
//!
//! Entries matching these rules never take part in synchronization: they
//! are skipped by the local walk, by the remote crawl and by change-feed
//! processing. Patterns are `glob` patterns matched against each path
//! segment; patterns containing `/` are matched against the whole
//! normalized path instead.

use glob::{MatchOptions, Pattern, PatternError};

use docsync_core::domain::newtypes::RelativePath;

/// Suffix of in-flight download files
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Patterns ignored regardless of configuration
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    // in-flight downloads
    "*.partial",
    // version control
    ".git",
    ".svn",
    ".hg",
    "CVS",
    // desktop metadata
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    // office lock files
    "~$*",
    ".~lock.*#",
    // editor autosave and backups
    "*~",
    "*.swp",
    "*.tmp",
    "*.bak",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled ignore patterns
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    segment_patterns: Vec<Pattern>,
    path_patterns: Vec<Pattern>,
}

impl IgnoreRules {
    /// Compile the default patterns plus `extra`
    ///
    /// # Errors
    /// Returns the first pattern that fails to compile
    pub fn new(extra: &[String]) -> Result<Self, PatternError> {
        let mut rules = Self {
            segment_patterns: Vec::new(),
            path_patterns: Vec::new(),
        };

        let all = DEFAULT_IGNORE_PATTERNS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str));
        for raw in all {
            let pattern = Pattern::new(raw)?;
            if raw.contains('/') {
                rules.path_patterns.push(pattern);
            } else {
                rules.segment_patterns.push(pattern);
            }
        }

        Ok(rules)
    }

    /// Whether a single file or folder name is ignored
    pub fn is_ignored_name(&self, name: &str) -> bool {
        self.segment_patterns
            .iter()
            .any(|p| p.matches_with(name, MATCH_OPTIONS))
    }

    /// Whether a path, or any of its ancestors, is ignored
    pub fn is_ignored(&self, path: &RelativePath) -> bool {
        if path.is_root() {
            return false;
        }
        if path
            .as_str()
            .split('/')
            .any(|segment| self.is_ignored_name(segment))
        {
            return true;
        }
        self.path_patterns
            .iter()
            .any(|p| p.matches_with(path.as_str(), MATCH_OPTIONS))
    }
}

impl Default for IgnoreRules {
    fn default() -> Self {
        let segment_patterns = DEFAULT_IGNORE_PATTERNS
            .iter()
            .filter_map(|raw| Pattern::new(raw).ok())
            .collect();
        Self {
            segment_patterns,
            path_patterns: Vec::new(),
        }
    }
}
