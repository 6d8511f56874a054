//! Directory walker producing archive entries
//!
//! Roots are walked depth-first with children sorted by file name, so the same tree
//! always yields the same entry sequence. Ignore files are loaded as directories are
//! entered and go out of scope when the walk leaves them.

use std::collections::{HashSet, VecDeque};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::archive::{detect_binary, is_representable, Entry};
use crate::error::{Error, Result, SkipReason};
use crate::pattern::{Decision, RuleSet};

/// Per-tree ignore file looked up in every walked directory
pub const IGNORE_FILE_NAME: &str = ".fmlpackignore";
pub const GITIGNORE_FILE_NAME: &str = ".gitignore";

/// What to do with files that are not text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryPolicy {
    /// Store them base64 encoded
    #[default]
    Base64,
    /// Leave them out and report them
    Skip,
}

/// What to do with symbolic links. Links are never followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymlinkPolicy {
    /// Leave them out and report them
    #[default]
    Skip,
    /// Report them as errors
    Error,
}

/// Configuration for a walk
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Directory archive paths are relative to. Defaults to the common ancestor of the roots.
    pub base: Option<PathBuf>,
    /// Command-line exclusion patterns, evaluated after every ignore file
    pub excludes: Vec<String>,
    /// Ignore files read from each walked directory
    pub ignore_file_names: Vec<String>,
    /// Also read `.gitignore` files and exclude `/.git/` unless re-included
    pub use_gitignore: bool,
    /// Archive the ignore files themselves
    pub include_ignore_files: bool,
    pub binary: BinaryPolicy,
    pub symlinks: SymlinkPolicy,
    /// Absolute paths never archived, such as the archive being written
    pub skip_paths: Vec<PathBuf>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            base: None,
            excludes: Vec::new(),
            ignore_file_names: vec![IGNORE_FILE_NAME.to_string()],
            use_gitignore: false,
            include_ignore_files: false,
            binary: BinaryPolicy::default(),
            symlinks: SymlinkPolicy::default(),
            skip_paths: Vec::new(),
        }
    }
}

/// Ignore-file rules loaded for a directory at `depth`; `mark` is the rule count before them
struct Scope {
    depth: usize,
    mark: usize,
}

/// Lazy sequence of entries for a set of roots.
///
/// Per-entry problems are yielded as `Err` items and the walk continues.
pub struct Walker {
    base: PathBuf,
    roots: std::vec::IntoIter<PathBuf>,
    current: Option<walkdir::IntoIter>,
    rules: RuleSet,
    base_rule_count: usize,
    scopes: Vec<Scope>,
    pending: VecDeque<Result<Entry>>,
    /// Every archive path emitted so far; grows with the number of entries, not their size
    seen: HashSet<String>,
    ignore_names: Vec<String>,
    options: WalkOptions,
}

impl Walker {
    /// Prepare a walk. Roots should be absolute; the walker never consults the
    /// current directory.
    ///
    /// Fails only when a command-line exclusion does not compile.
    pub fn new(roots: &[PathBuf], options: WalkOptions) -> Result<Self> {
        let roots: Vec<PathBuf> = roots.iter().map(|r| normalize_lexically(r)).collect();
        let base = match &options.base {
            Some(base) => Some(normalize_lexically(base)),
            None => common_base(&roots),
        };

        let mut ignore_names = options.ignore_file_names.clone();
        if options.use_gitignore && !ignore_names.iter().any(|n| n == GITIGNORE_FILE_NAME) {
            ignore_names.push(GITIGNORE_FILE_NAME.to_string());
        }

        let mut options = options;
        options.skip_paths = options.skip_paths.iter().map(|p| normalize_lexically(p)).collect();

        let mut walker = Self {
            base: base.clone().unwrap_or_default(),
            roots: roots.into_iter(),
            current: None,
            rules: RuleSet::new(),
            base_rule_count: 0,
            scopes: Vec::new(),
            pending: VecDeque::new(),
            seen: HashSet::new(),
            ignore_names,
            options,
        };

        if walker.options.use_gitignore {
            walker.rules.add_builtin("/.git/")?;
        }
        if let Some(base) = base {
            walker.load_ignore_files(&base, "");
        }
        for pattern in &walker.options.excludes {
            walker.rules.add_exclude(pattern)?;
        }
        walker.base_rule_count = walker.rules.file_rule_count();

        debug!("packing relative to {}", walker.base.display());
        Ok(walker)
    }

    /// Directory archive paths are relative to
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn load_ignore_files(&mut self, dir: &Path, rel: &str) -> usize {
        let mut added = 0;
        for name in &self.ignore_names {
            let path = dir.join(name);
            match fs::read_to_string(&path) {
                Ok(text) => {
                    added += self.rules.add_ignore_file(&text, rel, &path);
                    debug!("loaded ignore rules from {}", path.display());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("cannot read ignore file {}: {}", path.display(), e),
            }
        }
        added
    }

    /// Archive path of `path`, empty for the base itself
    fn relative(&self, path: &Path) -> Result<String> {
        let rest = path.strip_prefix(&self.base).map_err(|_| Error::UnreadableInput {
            path: path.to_path_buf(),
            reason: format!("outside of base directory {}", self.base.display()),
        })?;

        let mut parts = Vec::new();
        for component in rest.components() {
            match component.as_os_str().to_str() {
                Some(part) => parts.push(part),
                None => {
                    return Err(Error::Skipped {
                        path: path.to_path_buf(),
                        reason: SkipReason::NonUtf8Name,
                    })
                }
            }
        }
        let rel = parts.join("/");
        if !rel.is_empty() && !is_representable(&rel) {
            return Err(Error::UnrepresentablePath { path: rel });
        }
        Ok(rel)
    }

    fn is_ignore_file(&self, name: &OsStr) -> bool {
        self.ignore_names.iter().any(|n| OsStr::new(n) == name)
    }

    fn skip_current_dir(&mut self) {
        if let Some(iter) = self.current.as_mut() {
            iter.skip_current_dir();
        }
    }

    fn start_root(&mut self, root: PathBuf) {
        self.rules.truncate_file_rules(self.base_rule_count);
        self.scopes.clear();

        let metadata = match fs::symlink_metadata(&root) {
            Ok(m) => m,
            Err(e) => {
                let reason = if e.kind() == io::ErrorKind::NotFound {
                    "input not found".to_string()
                } else {
                    e.to_string()
                };
                self.pending.push_back(Err(Error::UnreadableInput { path: root, reason }));
                return;
            }
        };

        let rel = match self.relative(&root) {
            Ok(rel) => rel,
            Err(e) => {
                self.pending.push_back(Err(e));
                return;
            }
        };

        if !rel.is_empty() {
            if self.rules.decide(&rel, metadata.is_dir()) == Decision::Exclude {
                info!("excluding: {}", rel);
                return;
            }
            // directories between the base and a nested root
            for (idx, _) in rel.match_indices('/') {
                let parent = &rel[..idx];
                if self.seen.insert(parent.to_string()) {
                    self.pending.push_back(Ok(Entry::directory(parent)));
                }
            }
        }

        self.current = Some(
            WalkDir::new(&root)
                .follow_links(false)
                .follow_root_links(false)
                .sort_by_file_name()
                .into_iter(),
        );
    }

    fn visit(&mut self, dent: DirEntry) -> Option<Result<Entry>> {
        let depth = dent.depth();
        while let Some(scope) = self.scopes.last() {
            if scope.depth < depth {
                break;
            }
            self.rules.truncate_file_rules(scope.mark);
            self.scopes.pop();
        }

        let file_type = dent.file_type();
        let path = dent.path();

        let rel = match self.relative(path) {
            Ok(rel) => rel,
            Err(e) => {
                if file_type.is_dir() {
                    self.skip_current_dir();
                }
                return Some(Err(e));
            }
        };
        if rel.is_empty() {
            // the base itself, its ignore files are already loaded
            return None;
        }

        if self.options.skip_paths.iter().any(|p| p == path) {
            debug!("not archiving {}", rel);
            return None;
        }
        if file_type.is_file() && !self.options.include_ignore_files && self.is_ignore_file(dent.file_name()) {
            debug!("not archiving ignore file {}", rel);
            return None;
        }
        if self.rules.decide(&rel, file_type.is_dir()) == Decision::Exclude {
            info!("excluding: {}", rel);
            if file_type.is_dir() {
                self.skip_current_dir();
            }
            return None;
        }
        let first_visit = self.seen.insert(rel.clone());

        if file_type.is_dir() {
            // a directory emitted earlier still scopes its ignore files over this walk
            let mark = self.rules.file_rule_count();
            if self.load_ignore_files(path, &rel) > 0 {
                self.scopes.push(Scope { depth, mark });
            }
            if !first_visit {
                debug!("already archived {}", rel);
                return None;
            }
            return Some(Ok(Entry::directory(rel)));
        }

        if !first_visit {
            debug!("already archived {}", rel);
            return None;
        }

        if file_type.is_symlink() {
            return Some(match self.options.symlinks {
                SymlinkPolicy::Skip => Err(Error::Skipped {
                    path: path.to_path_buf(),
                    reason: SkipReason::Symlink,
                }),
                SymlinkPolicy::Error => Err(Error::Symlink {
                    path: path.to_path_buf(),
                }),
            });
        }

        if !file_type.is_file() {
            return Some(Err(Error::Skipped {
                path: path.to_path_buf(),
                reason: SkipReason::SpecialFile,
            }));
        }

        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                return Some(Err(Error::UnreadableInput {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }))
            }
        };

        match detect_binary(&data) {
            None => Some(Ok(Entry::with_encoding(rel, data, false))),
            Some(reason) => match self.options.binary {
                BinaryPolicy::Base64 => {
                    debug!("{} is binary ({:?}), storing as base64", rel, reason);
                    Some(Ok(Entry::with_encoding(rel, data, true)))
                }
                BinaryPolicy::Skip => Some(Err(Error::Skipped {
                    path: path.to_path_buf(),
                    reason: SkipReason::Binary,
                })),
            },
        }
    }
}

impl Iterator for Walker {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }

            let Some(iter) = self.current.as_mut() else {
                let root = self.roots.next()?;
                self.start_root(root);
                continue;
            };

            match iter.next() {
                None => self.current = None,
                Some(Err(e)) => return Some(Err(walk_error(e))),
                Some(Ok(dent)) => {
                    if let Some(item) = self.visit(dent) {
                        return Some(item);
                    }
                }
            }
        }
    }
}

fn walk_error(err: walkdir::Error) -> Error {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    let reason = match err.io_error() {
        Some(io) => io.to_string(),
        None => err.to_string(),
    };
    Error::UnreadableInput { path, reason }
}

/// Resolve `.` and `..` without touching the filesystem
pub(crate) fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Longest common ancestor of the roots; a directory root counts as itself, anything
/// else as its parent.
pub(crate) fn common_base(roots: &[PathBuf]) -> Option<PathBuf> {
    let mut anchors = roots.iter().map(|root| {
        let is_dir = fs::symlink_metadata(root).map(|m| m.is_dir()).unwrap_or(false);
        match root.parent() {
            Some(parent) if !is_dir => parent.to_path_buf(),
            _ => root.clone(),
        }
    });
    let first = anchors.next()?;
    Some(anchors.fold(first, |acc, anchor| {
        acc.components()
            .zip(anchor.components())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a)
            .collect()
    }))
}
