//! Ignore-file rules for dependency files.
//!
//! The ignore file lists patterns of workspace-relative paths that the sync
//! must neither write nor delete:
//!
//! ```text
//! # third party binaries are managed by hand
//! /Engine/Binaries/ThirdParty/
//! *.pdb
//! !Engine/Binaries/Win64/Keep.pdb
//! ```
//!
//! - Lines starting with `#` and blank lines are skipped.
//! - A leading `!` re-includes paths matched by an earlier rule.
//! - `?` matches one character other than `/`, `*` any run of them, and
//!   `**` anything including `/`.
//! - A leading `/` anchors the pattern at the workspace root; otherwise it
//!   may match starting at any directory.
//! - The last matching rule wins. Matching ignores case.

use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::{SyncError, SyncResult};

/// Decides whether a workspace-relative file is outside the sync's control.
pub trait ExcludePredicate: Send + Sync {
    fn is_excluded_file(&self, name: &str) -> bool;
}

#[derive(Debug, Clone)]
struct IgnoreRule {
    regex: Regex,
    negated: bool,
}

/// Parsed ignore file.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRules {
    /// Rules that exclude nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse ignore-file text.
    pub fn parse(text: &str) -> SyncResult<Self> {
        let mut rules = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (negated, pattern) = match line.strip_prefix('!') {
                Some(rest) => (true, rest.trim_start()),
                None => (false, line),
            };
            if pattern.is_empty() {
                continue;
            }

            let regex = Regex::new(&pattern_to_regex(pattern)).map_err(|e| {
                SyncError::InvalidConfig(format!("bad ignore pattern '{}': {}", line, e))
            })?;
            rules.push(IgnoreRule { regex, negated });
        }

        Ok(Self { rules })
    }

    /// Load rules from a file. A missing file yields empty rules.
    pub fn load(path: &Path) -> SyncResult<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::empty()),
            Err(e) => Err(SyncError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `name` (forward-slash, workspace-relative) is ignored.
    pub fn is_excluded(&self, name: &str) -> bool {
        let name = name.replace('\\', "/");
        let mut excluded = false;
        for rule in &self.rules {
            if rule.regex.is_match(&name) {
                excluded = !rule.negated;
            }
        }
        excluded
    }
}

impl ExcludePredicate for IgnoreRules {
    fn is_excluded_file(&self, name: &str) -> bool {
        self.is_excluded(name)
    }
}

fn pattern_to_regex(pattern: &str) -> String {
    let (anchored, body) = match pattern.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };
    let (directory, body) = match body.strip_suffix('/') {
        Some(rest) => (true, rest),
        None => (false, body),
    };

    let mut regex = String::from("(?i)");
    regex.push_str(if anchored { "^" } else { "(?:^|/)" });

    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                regex.push_str(".*");
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }

    regex.push_str(if directory { "/" } else { "(?:/|$)" });
    regex
}
