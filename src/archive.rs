//! Archive data structures and the FML tag grammar

// FML format constants
pub const TAG_OPEN: &str = "<|||";
pub const TAG_CLOSE: &str = "|||>";
pub const DIR_KEY: &str = "dir=";
pub const FILE_START_KEY: &str = "file_start=";
pub const FILE_START_BASE64_KEY: &str = "file_start_base64=";
pub const FILE_END: &str = "file_end";
pub const FILE_END_NOEOL: &str = "file_end_noeol";
pub const ESCAPE: u8 = b'\\';

/// Column at which base64 payloads are wrapped
pub const BASE64_LINE_WIDTH: usize = 76;

/// Name used when the format description is embedded in an archive
pub const SPEC_FILE_NAME: &str = "fmlpack-spec.md";

/// Human readable description of the FML format
pub const FORMAT_SPEC: &str = include_str!("format.md");

/// Why data is stored base64 encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryReason {
    /// Data contains a NUL byte
    NulByte,
    /// Data is not valid UTF-8
    InvalidUtf8,
}

/// Decide whether data can be stored as text
pub fn detect_binary(data: &[u8]) -> Option<BinaryReason> {
    if data.contains(&0) {
        return Some(BinaryReason::NulByte);
    }
    if std::str::from_utf8(data).is_err() {
        return Some(BinaryReason::InvalidUtf8);
    }
    None
}

/// What an entry is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File {
        /// Contents of the file
        data: Vec<u8>,
        /// Whether the contents are stored base64 encoded
        is_binary: bool,
    },
}

/// A single file or directory record in an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Relative, slash separated path
    pub path: String,
    pub kind: EntryKind,
}

impl Entry {
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
        }
    }

    /// Create a file entry, choosing text or base64 storage from the data
    pub fn file(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let is_binary = detect_binary(&data).is_some();
        Self::with_encoding(path, data, is_binary)
    }

    /// Create a file entry with an explicit storage choice
    pub fn with_encoding(path: impl Into<String>, data: impl Into<Vec<u8>>, is_binary: bool) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File {
                data: data.into(),
                is_binary,
            },
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    /// File contents, `None` for directories
    pub fn data(&self) -> Option<&[u8]> {
        match &self.kind {
            EntryKind::File { data, .. } => Some(data),
            EntryKind::Directory => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.kind, EntryKind::File { is_binary: true, .. })
    }
}

/// A recognized tag line
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Tag<'a> {
    Dir(&'a str),
    FileStart { path: &'a str, is_binary: bool },
    FileEnd { noeol: bool },
}

/// Classification of one archive line
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TagLine<'a> {
    /// Content or free text
    NotTag,
    Tag(Tag<'a>),
    /// Starts at a tag position but is not a valid tag
    Malformed(&'a str),
}

/// Classify a line (with or without its terminator)
///
/// A tag must start at column 0; trailing whitespace is tolerated.
pub(crate) fn parse_tag(line: &str) -> TagLine<'_> {
    if !line.starts_with(TAG_OPEN) {
        return TagLine::NotTag;
    }
    let trimmed = line.trim_end();
    if trimmed.len() < TAG_OPEN.len() + TAG_CLOSE.len() || !trimmed.ends_with(TAG_CLOSE) {
        return TagLine::Malformed(trimmed);
    }
    let inner = &trimmed[TAG_OPEN.len()..trimmed.len() - TAG_CLOSE.len()];

    if inner == FILE_END {
        TagLine::Tag(Tag::FileEnd { noeol: false })
    } else if inner == FILE_END_NOEOL {
        TagLine::Tag(Tag::FileEnd { noeol: true })
    } else if let Some(path) = inner.strip_prefix(FILE_START_BASE64_KEY) {
        TagLine::Tag(Tag::FileStart {
            path,
            is_binary: true,
        })
    } else if let Some(path) = inner.strip_prefix(FILE_START_KEY) {
        TagLine::Tag(Tag::FileStart {
            path,
            is_binary: false,
        })
    } else if let Some(path) = inner.strip_prefix(DIR_KEY) {
        TagLine::Tag(Tag::Dir(path))
    } else {
        TagLine::Malformed(trimmed)
    }
}

/// Whether a content line would collide with a tag position and must be escaped.
///
/// Lines made of any number of `\` followed by `<|||` are escaped by adding one `\`.
pub(crate) fn needs_escape(line: &[u8]) -> bool {
    let unescaped = line
        .iter()
        .position(|&b| b != ESCAPE)
        .map_or(&line[line.len()..], |start| &line[start..]);
    unescaped.starts_with(TAG_OPEN.as_bytes())
}

/// Whether a path can be written inside a tag line.
///
/// Backslashes are rejected: readers split on them, so a Unix name holding one
/// would come back as a nested path.
pub(crate) fn is_representable(path: &str) -> bool {
    !path.is_empty() && !path.contains(['\n', '\r', '\\'])
}
