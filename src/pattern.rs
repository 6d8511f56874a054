//! Gitignore-style pattern matching
//!
//! Rules are plain data compiled to a [`Regex`]; [`evaluate`] walks them in order and
//! the last matching rule wins. A path is tested only after each of its ancestor
//! directories, so an excluded directory excludes everything below it.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{Error, Result};

/// Outcome of matching a path against a rule sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Include,
    Exclude,
}

/// Where a rule came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSource {
    Builtin,
    IgnoreFile(PathBuf),
    CommandLine,
}

/// One compiled ignore pattern
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    /// Pattern text as written, without the negation marker
    pub pattern: String,
    /// `!pattern`: re-include what earlier rules excluded
    pub negated: bool,
    /// Rooted at `base` rather than matching at any depth
    pub anchored: bool,
    /// Trailing `/`: only matches directories
    pub dir_only: bool,
    /// Directory (relative to the pack base) the rule is scoped to, empty for the base
    pub base: String,
    pub source: RuleSource,
    regex: Regex,
}

impl IgnoreRule {
    /// Parse one ignore-file line.
    ///
    /// Returns `Ok(None)` for blank lines and comments.
    pub fn parse(line: &str, base: &str, source: RuleSource) -> Result<Option<Self>> {
        Self::parse_with(line, base, source, true)
    }

    /// Parse a command-line exclusion. A leading `!` is literal: these rules only exclude.
    pub fn exclude(pattern: &str) -> Result<Option<Self>> {
        Self::parse_with(pattern, "", RuleSource::CommandLine, false)
    }

    fn parse_with(line: &str, base: &str, source: RuleSource, allow_negation: bool) -> Result<Option<Self>> {
        let line = trim_unescaped_end(line);
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (negated, body) = match line.strip_prefix('!') {
            Some(rest) if allow_negation => (true, rest),
            _ => (false, line),
        };
        let body = if !allow_negation && body.starts_with('!') {
            // literal '!' for the glob translator
            format!("\\{}", body)
        } else {
            body.to_string()
        };

        let (dir_only, body) = match body.strip_suffix('/') {
            Some(rest) => (true, rest.to_string()),
            None => (false, body),
        };
        if body.is_empty() {
            return Ok(None);
        }

        let anchored = body.contains('/');
        let glob = body.strip_prefix('/').unwrap_or(&body);
        if glob.is_empty() {
            return Ok(None);
        }

        let base = base.trim_matches('/');
        let mut expr = String::from("^");
        if !base.is_empty() {
            expr.push_str(&regex::escape(base));
            expr.push('/');
        }
        if !anchored {
            expr.push_str("(?:.*/)?");
        }
        expr.push_str(&glob_to_regex(glob));
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|source| Error::Pattern {
            pattern: line.to_string(),
            source,
        })?;

        Ok(Some(Self {
            pattern: body,
            negated,
            anchored,
            dir_only,
            base: base.to_string(),
            source,
            regex,
        }))
    }

    /// Test the rule against a slash separated path relative to the pack base
    pub fn matches(&self, path: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        self.regex.is_match(path)
    }
}

/// Trim trailing whitespace unless it is escaped with a backslash
fn trim_unescaped_end(line: &str) -> &str {
    let trimmed = line.trim_end();
    if trimmed.ends_with('\\') && trimmed.len() < line.len() {
        // keep the escaped space
        &line[..trimmed.len() + 1]
    } else {
        trimmed
    }
}

/// Translate a gitignore glob into regex syntax
fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                match chars.get(i + 2) {
                    Some('/') if at_segment_start => {
                        out.push_str("(?:.*/)?");
                        i += 3;
                    }
                    None if at_segment_start => {
                        out.push_str(".*");
                        i += 2;
                    }
                    _ => {
                        // not a full segment: behaves like a single star
                        while chars.get(i) == Some(&'*') {
                            i += 1;
                        }
                        out.push_str("[^/]*");
                    }
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => match parse_class(&chars[i..]) {
                Some((class, consumed)) => {
                    out.push_str(&class);
                    i += consumed;
                }
                None => {
                    out.push_str("\\[");
                    i += 1;
                }
            },
            '\\' => {
                match chars.get(i + 1) {
                    Some(c) => out.push_str(&regex::escape(&c.to_string())),
                    None => out.push_str("\\\\"),
                }
                i += 2;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out
}

/// Parse a `[...]` class starting at `chars[0]`; returns the regex and chars consumed
fn parse_class(chars: &[char]) -> Option<(String, usize)> {
    let mut j = 1;
    let negated = matches!(chars.get(j), Some('!') | Some('^'));
    if negated {
        j += 1;
    }
    let body_start = j;
    // a leading ']' is part of the class
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    while j < chars.len() && chars[j] != ']' {
        j += 1;
    }
    if j >= chars.len() {
        return None;
    }

    let mut class = String::from(if negated { "[^/" } else { "[" });
    for &c in &chars[body_start..j] {
        if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~') {
            class.push('\\');
        }
        class.push(c);
    }
    class.push(']');
    Some((class, j + 1))
}

/// Last matching rule decides; no match includes
fn last_match<'a, I>(path: &str, is_dir: bool, rules: I) -> Decision
where
    I: Iterator<Item = &'a IgnoreRule>,
{
    match rules.filter(|rule| rule.matches(path, is_dir)).last() {
        Some(rule) if !rule.negated => Decision::Exclude,
        _ => Decision::Include,
    }
}

/// Decide whether `path` is archived under an ordered rule sequence.
///
/// Every ancestor directory is checked first; an excluded ancestor excludes the path.
pub fn evaluate<'a, I>(path: &str, is_dir: bool, rules: I) -> Decision
where
    I: IntoIterator<Item = &'a IgnoreRule>,
    I::IntoIter: Clone,
{
    let rules = rules.into_iter();
    for (idx, _) in path.match_indices('/') {
        if last_match(&path[..idx], true, rules.clone()) == Decision::Exclude {
            return Decision::Exclude;
        }
    }
    last_match(path, is_dir, rules)
}

/// Rules active during one pack operation.
///
/// Built-in and ignore-file rules come first; command-line exclusions are always
/// evaluated last so nothing can re-include what they exclude.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    file_rules: Vec<IgnoreRule>,
    command_rules: Vec<IgnoreRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_builtin(&mut self, pattern: &str) -> Result<()> {
        if let Some(rule) = IgnoreRule::parse(pattern, "", RuleSource::Builtin)? {
            self.file_rules.push(rule);
        }
        Ok(())
    }

    pub fn add_exclude(&mut self, pattern: &str) -> Result<()> {
        if let Some(rule) = IgnoreRule::exclude(pattern)? {
            self.command_rules.push(rule);
        }
        Ok(())
    }

    /// Add the rules of an ignore file located in directory `base`.
    ///
    /// Lines that fail to compile are logged and skipped, like git does.
    pub fn add_ignore_file(&mut self, text: &str, base: &str, file: &Path) -> usize {
        let mut added = 0;
        for line in text.lines() {
            match IgnoreRule::parse(line, base, RuleSource::IgnoreFile(file.to_path_buf())) {
                Ok(Some(rule)) => {
                    self.file_rules.push(rule);
                    added += 1;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("{}: {}", file.display(), e),
            }
        }
        added
    }

    pub fn decide(&self, path: &str, is_dir: bool) -> Decision {
        evaluate(path, is_dir, self.file_rules.iter().chain(self.command_rules.iter()))
    }

    pub(crate) fn file_rule_count(&self) -> usize {
        self.file_rules.len()
    }

    /// Drop ignore-file rules added after `len`, when the walk leaves their directory
    pub(crate) fn truncate_file_rules(&mut self, len: usize) {
        self.file_rules.truncate(len);
    }
}
