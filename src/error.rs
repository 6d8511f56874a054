//! Error types

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the archive codec can report.
///
/// Per-entry variants (`PathTraversal`, `Collision`, `UnreadableInput`, `Skipped`,
/// `Symlink`, `UnrepresentablePath`, `NotText`) are collected in operation reports
/// and do not stop the remaining entries. `Format`, `Output` and `Input` abort the
/// whole operation.
#[derive(Debug, Error)]
pub enum Error {
    /// The archive text is malformed or truncated
    #[error(transparent)]
    Format(#[from] FormatError),

    /// A decoded path would land outside the extraction root
    #[error("refusing to extract '{path}': {reason}")]
    PathTraversal { path: String, reason: TraversalReason },

    /// The destination already exists and overwriting is not allowed
    #[error("'{}' already exists (use --overwrite to replace it)", path.display())]
    Collision { path: PathBuf },

    /// A source file or root could not be read while packing
    #[error("cannot read '{}': {reason}", path.display())]
    UnreadableInput { path: PathBuf, reason: String },

    /// A source entry was left out on purpose
    #[error("skipped '{}': {reason}", path.display())]
    Skipped { path: PathBuf, reason: SkipReason },

    /// A symbolic link was met while links are configured as errors
    #[error("symbolic link '{}' cannot be archived", path.display())]
    Symlink { path: PathBuf },

    /// The path cannot be written inside a tag line
    #[error("path {path:?} cannot be represented in an archive")]
    UnrepresentablePath { path: String },

    /// A text entry holds data that is not UTF-8
    #[error("entry '{path}' is not valid UTF-8 but is not marked as binary")]
    NotText { path: String },

    /// An exclusion pattern could not be compiled
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Filesystem failure on a specific path
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The archive could not be written
    #[error("failed to write archive: {0}")]
    Output(#[source] io::Error),

    /// The archive could not be read
    #[error("failed to read archive: {0}")]
    Input(#[source] io::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that are reported but only fail a run in strict mode
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Error::Collision { .. }
                | Error::UnreadableInput { .. }
                | Error::Skipped { .. }
                | Error::UnrepresentablePath { .. }
        )
    }
}

/// Decode-time failures. Each carries the 1-based line where it was detected.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("line {line}: archive ends inside file '{path}' (missing end tag)")]
    Truncated { path: String, line: usize },

    #[error("line {line}: end tag without a matching start tag")]
    UnmatchedEnd { line: usize },

    #[error("line {line}: '{tag}' found while file '{path}' is still open")]
    UnterminatedFile {
        path: String,
        tag: String,
        line: usize,
    },

    #[error("line {line}: malformed tag '{tag}'")]
    MalformedTag { tag: String, line: usize },

    #[error("line {line}: text outside of any entry")]
    StrayText { line: usize },

    #[error("line {line}: entry with an empty path")]
    EmptyPath { line: usize },

    #[error("line {line}: duplicate entry '{path}'")]
    DuplicatePath { path: String, line: usize },

    #[error("line {line}: invalid base64 content in '{path}': {source}")]
    InvalidBase64 {
        path: String,
        line: usize,
        #[source]
        source: base64::DecodeError,
    },

    #[error("line {line}: archive is not valid UTF-8")]
    InvalidUtf8 { line: usize },
}

/// Why the guard rejected a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalReason {
    Empty,
    Absolute,
    EmptySegment,
    NulByte,
    EscapesRoot,
    SymlinkInPath,
}

impl std::fmt::Display for TraversalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            TraversalReason::Empty => "path is empty",
            TraversalReason::Absolute => "absolute paths are not allowed",
            TraversalReason::EmptySegment => "path contains an empty segment",
            TraversalReason::NulByte => "path contains a NUL byte",
            TraversalReason::EscapesRoot => "path escapes the target directory",
            TraversalReason::SymlinkInPath => "path goes through a symbolic link",
        };
        f.write_str(msg)
    }
}

/// Why the walker left an input out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Binary,
    Symlink,
    SpecialFile,
    NonUtf8Name,
    Duplicate,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Binary => write!(f, "binary file"),
            SkipReason::Symlink => write!(f, "symbolic link"),
            SkipReason::SpecialFile => write!(f, "not a regular file or directory"),
            SkipReason::NonUtf8Name => write!(f, "file name is not valid UTF-8"),
            SkipReason::Duplicate => write!(f, "path is already in the archive"),
        }
    }
}
