//! FML archive encoder

use std::io::{self, Write};

use base64::Engine;

use crate::archive::{
    is_representable, needs_escape, Entry, EntryKind, BASE64_LINE_WIDTH, DIR_KEY, ESCAPE, FILE_END,
    FILE_END_NOEOL, FILE_START_BASE64_KEY, FILE_START_KEY, TAG_CLOSE, TAG_OPEN,
};
use crate::error::{Error, Result};

/// Encodes entries into FML text
pub struct Encoder {
    line_width: usize,
}

impl Encoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            line_width: BASE64_LINE_WIDTH,
        }
    }

    /// Wrap base64 payloads at `width` columns
    pub fn with_line_width(mut self, width: usize) -> Self {
        self.line_width = width.max(4);
        self
    }

    /// Encode entries to a string
    pub fn encode(&self, entries: &[Entry]) -> Result<String> {
        let mut output = Vec::new();
        self.encode_to_writer(entries, &mut output)?;
        String::from_utf8(output).map_err(|e| Error::Output(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    /// Encode entries directly to a writer
    pub fn encode_to_writer<'a, I, W>(&self, entries: I, mut writer: W) -> Result<()>
    where
        I: IntoIterator<Item = &'a Entry>,
        W: Write,
    {
        for entry in entries {
            self.encode_entry(&mut writer, entry)?;
        }
        writer.flush().map_err(Error::Output)
    }

    /// Encode a single entry.
    ///
    /// The entry is validated before anything is written, so an `UnrepresentablePath`
    /// or `NotText` error leaves the output untouched.
    pub fn encode_entry<W: Write>(&self, writer: &mut W, entry: &Entry) -> Result<()> {
        if !is_representable(&entry.path) {
            return Err(Error::UnrepresentablePath {
                path: entry.path.clone(),
            });
        }

        let written = match &entry.kind {
            EntryKind::Directory => write_tag(writer, DIR_KEY, &entry.path),
            EntryKind::File { data, is_binary: true } => self.encode_base64(writer, &entry.path, data),
            EntryKind::File { data, is_binary: false } => {
                if std::str::from_utf8(data).is_err() {
                    return Err(Error::NotText {
                        path: entry.path.clone(),
                    });
                }
                encode_text(writer, &entry.path, data)
            }
        };
        written.map_err(Error::Output)
    }

    fn encode_base64<W: Write>(&self, writer: &mut W, path: &str, data: &[u8]) -> io::Result<()> {
        write_tag(writer, FILE_START_BASE64_KEY, path)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        for chunk in encoded.as_bytes().chunks(self.line_width) {
            writer.write_all(chunk)?;
            writer.write_all(b"\n")?;
        }
        write_tag(writer, FILE_END, "")
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_tag<W: Write>(writer: &mut W, key: &str, path: &str) -> io::Result<()> {
    writeln!(writer, "{}{}{}{}", TAG_OPEN, key, path, TAG_CLOSE)
}

fn encode_text<W: Write>(writer: &mut W, path: &str, data: &[u8]) -> io::Result<()> {
    write_tag(writer, FILE_START_KEY, path)?;

    for line in data.split_inclusive(|&b| b == b'\n') {
        if needs_escape(line) {
            writer.write_all(&[ESCAPE])?;
        }
        writer.write_all(line)?;
    }

    // the newline before the end tag belongs to the framing
    if !data.is_empty() && !data.ends_with(b"\n") {
        writer.write_all(b"\n")?;
        write_tag(writer, FILE_END_NOEOL, "")
    } else {
        write_tag(writer, FILE_END, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_simple_text() {
        let encoder = Encoder::new();
        let result = encoder.encode(&[Entry::file("file1.txt", "Hello, world!\n")]).unwrap();
        assert_eq!(result, "<|||file_start=file1.txt|||>\nHello, world!\n<|||file_end|||>\n");
    }

    #[test]
    fn test_encode_without_trailing_newline() {
        let encoder = Encoder::new();
        let result = encoder.encode(&[Entry::file("a.txt", "no newline at end")]).unwrap();
        assert_eq!(result, "<|||file_start=a.txt|||>\nno newline at end\n<|||file_end_noeol|||>\n");
    }

    #[test]
    fn test_encode_empty_file() {
        let encoder = Encoder::new();
        let result = encoder.encode(&[Entry::file("empty.txt", "")]).unwrap();
        assert_eq!(result, "<|||file_start=empty.txt|||>\n<|||file_end|||>\n");
    }

    #[test]
    fn test_encode_directory() {
        let encoder = Encoder::new();
        let result = encoder
            .encode(&[Entry::directory("projects"), Entry::file("projects/plan.txt", "plan\n")])
            .unwrap();
        assert_eq!(
            result,
            "<|||dir=projects|||>\n<|||file_start=projects/plan.txt|||>\nplan\n<|||file_end|||>\n"
        );
    }

    #[test]
    fn test_encode_escapes_delimiters() {
        let encoder = Encoder::new();
        let content = "<|||file_end|||>\n\\<|||dir=x|||>\ninline <|||file_end|||>\n";
        let result = encoder.encode(&[Entry::file("tricky.txt", content)]).unwrap();
        assert_eq!(
            result,
            "<|||file_start=tricky.txt|||>\n\\<|||file_end|||>\n\\\\<|||dir=x|||>\ninline <|||file_end|||>\n<|||file_end|||>\n"
        );
    }

    #[test]
    fn test_encode_binary() {
        let encoder = Encoder::new();
        let result = encoder
            .encode(&[Entry::with_encoding("image.jpg", vec![0xFF, 0xD8, 0xFF], true)])
            .unwrap();
        assert_eq!(result, "<|||file_start_base64=image.jpg|||>\n/9j/\n<|||file_end|||>\n");
    }

    #[test]
    fn test_encode_wraps_base64() {
        let encoder = Encoder::new().with_line_width(8);
        let result = encoder
            .encode(&[Entry::with_encoding("b.bin", vec![0u8; 9], true)])
            .unwrap();
        assert_eq!(result, "<|||file_start_base64=b.bin|||>\nAAAAAAAA\nAAAA\n<|||file_end|||>\n");
    }

    #[test]
    fn test_encode_rejects_bad_entries() {
        let encoder = Encoder::new();
        let mut out = Vec::new();

        let err = encoder.encode_entry(&mut out, &Entry::file("bad\nname", "x")).unwrap_err();
        assert!(matches!(err, Error::UnrepresentablePath { .. }));

        let err = encoder.encode_entry(&mut out, &Entry::file("a\\b.txt", "x")).unwrap_err();
        assert!(matches!(err, Error::UnrepresentablePath { .. }));

        let err = encoder
            .encode_entry(&mut out, &Entry::with_encoding("a.txt", vec![0xFF], false))
            .unwrap_err();
        assert!(matches!(err, Error::NotText { .. }));

        assert!(out.is_empty());
    }

    #[test]
    fn test_encode_is_deterministic() {
        let entries = vec![
            Entry::directory("d"),
            Entry::file("d/a.txt", "a\n"),
            Entry::file("d/b.bin", vec![1, 0, 2]),
        ];
        let encoder = Encoder::new();
        assert_eq!(encoder.encode(&entries).unwrap(), encoder.encode(&entries).unwrap());
    }
}
