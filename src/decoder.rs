//! FML archive decoder
//!
//! Reads an archive line by line with a two-state machine: outside any file, or
//! capturing the contents of one. Anything at a tag position that is not a valid tag
//! for the current state is a [`FormatError`]; once one is returned the entry stream
//! ends, since nothing after it can be trusted.

use std::collections::HashSet;
use std::io::BufRead;

use base64::Engine;
use tracing::warn;

use crate::archive::{needs_escape, parse_tag, Entry, Tag, TagLine, ESCAPE};
use crate::error::{Error, FormatError, Result};

/// Decodes FML archives
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    reject_stray_text: bool,
}

impl Decoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat text outside of any entry as an error instead of a warning
    pub fn reject_stray_text(mut self, reject: bool) -> Self {
        self.reject_stray_text = reject;
        self
    }

    /// Decode a whole archive held in memory
    pub fn decode(&self, input: &str) -> Result<Vec<Entry>> {
        self.entries(input.as_bytes()).collect()
    }

    /// Decode a whole archive from a reader
    pub fn decode_reader<R: BufRead>(&self, reader: R) -> Result<Vec<Entry>> {
        self.entries(reader).collect()
    }

    /// Lazily decode entries, one at a time
    pub fn entries<R: BufRead>(&self, reader: R) -> Entries<R> {
        Entries {
            reader,
            line: 0,
            seen: HashSet::new(),
            reject_stray_text: self.reject_stray_text,
            done: false,
        }
    }
}

/// File whose contents are being captured
struct OpenFile {
    path: String,
    is_binary: bool,
    line: usize,
    data: Vec<u8>,
}

/// Iterator over the entries of an archive
pub struct Entries<R> {
    reader: R,
    line: usize,
    /// Paths decoded so far, for duplicate detection; one string per entry
    seen: HashSet<String>,
    reject_stray_text: bool,
    done: bool,
}

impl<R: BufRead> Entries<R> {
    fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf).map_err(Error::Input)?;
        if n == 0 {
            return Ok(None);
        }
        self.line += 1;
        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| FormatError::InvalidUtf8 { line: self.line }.into())
    }

    fn register(&mut self, path: &str) -> Result<String> {
        if path.is_empty() {
            return Err(FormatError::EmptyPath { line: self.line }.into());
        }
        if !self.seen.insert(path.to_string()) {
            return Err(FormatError::DuplicatePath {
                path: path.to_string(),
                line: self.line,
            }
            .into());
        }
        Ok(path.to_string())
    }

    fn next_entry(&mut self) -> Result<Option<Entry>> {
        let mut open: Option<OpenFile> = None;

        loop {
            let Some(line) = self.read_line()? else {
                return match open {
                    Some(file) => Err(FormatError::Truncated {
                        path: file.path,
                        line: file.line,
                    }
                    .into()),
                    None => Ok(None),
                };
            };

            match parse_tag(&line) {
                TagLine::Malformed(tag) => {
                    return Err(FormatError::MalformedTag {
                        tag: tag.to_string(),
                        line: self.line,
                    }
                    .into())
                }
                TagLine::Tag(Tag::FileEnd { noeol }) => {
                    return match open {
                        Some(file) => finish(file, noeol).map(Some),
                        None => Err(FormatError::UnmatchedEnd { line: self.line }.into()),
                    }
                }
                TagLine::Tag(_) if open.is_some() => {
                    return Err(FormatError::UnterminatedFile {
                        path: open.map(|f| f.path).unwrap_or_default(),
                        tag: line.trim_end().to_string(),
                        line: self.line,
                    }
                    .into())
                }
                TagLine::Tag(Tag::Dir(path)) => {
                    let path = self.register(path)?;
                    return Ok(Some(Entry::directory(path)));
                }
                TagLine::Tag(Tag::FileStart { path, is_binary }) => {
                    let path = self.register(path)?;
                    open = Some(OpenFile {
                        path,
                        is_binary,
                        line: self.line,
                        data: Vec::new(),
                    });
                }
                TagLine::NotTag => match open.as_mut() {
                    Some(file) => {
                        let bytes = line.as_bytes();
                        if bytes.first() == Some(&ESCAPE) && needs_escape(bytes) {
                            file.data.extend_from_slice(&bytes[1..]);
                        } else {
                            file.data.extend_from_slice(bytes);
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None if self.reject_stray_text => {
                        return Err(FormatError::StrayText { line: self.line }.into());
                    }
                    None => warn!("line {}: ignoring text outside of any entry", self.line),
                },
            }
        }
    }
}

/// Turn captured lines into an entry
fn finish(file: OpenFile, noeol: bool) -> Result<Entry> {
    if file.is_binary {
        let compact: Vec<u8> = file.data.into_iter().filter(|b| !b.is_ascii_whitespace()).collect();
        let data = base64::engine::general_purpose::STANDARD
            .decode(&compact)
            .map_err(|source| FormatError::InvalidBase64 {
                path: file.path.clone(),
                line: file.line,
                source,
            })?;
        Ok(Entry::with_encoding(file.path, data, true))
    } else {
        let mut data = file.data;
        if noeol && data.ends_with(b"\n") {
            data.pop();
        }
        Ok(Entry::with_encoding(file.path, data, false))
    }
}

impl<R: BufRead> Iterator for Entries<R> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
