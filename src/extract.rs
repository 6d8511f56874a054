//! Extracting and listing archives

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::archive::{Entry, EntryKind};
use crate::decoder::{Decoder, Entries};
use crate::error::{Error, Result};
use crate::guard;

/// Configuration for [`extract`]
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Replace files that already exist
    pub overwrite: bool,
    /// Treat text outside of any entry as a format error
    pub reject_stray_text: bool,
}

/// Outcome of an extraction
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Directories created or already present, as archive paths
    pub directories: Vec<String>,
    /// Files written, as archive paths
    pub files: Vec<String>,
    pub failures: Vec<Error>,
}

impl ExtractReport {
    /// Whether the run succeeded. Collisions only count under `strict`.
    pub fn is_success(&self, strict: bool) -> bool {
        self.failures.iter().all(|e| e.is_soft() && !strict)
    }

    fn record(&mut self, entry: &Entry, written: Result<()>) {
        match written {
            Ok(()) if entry.is_dir() => self.directories.push(entry.path.clone()),
            Ok(()) => self.files.push(entry.path.clone()),
            Err(e) => {
                warn!("{}", e);
                self.failures.push(e);
            }
        }
    }
}

/// Decode an archive and recreate its tree under `target`, one entry at a time.
///
/// Only the entry being written is held in memory. A format error aborts the
/// extraction and leaves the entries before it on disk.
pub fn extract<R: BufRead>(reader: R, target: &Path, options: &ExtractOptions) -> Result<ExtractReport> {
    let entries = Decoder::new()
        .reject_stray_text(options.reject_stray_text)
        .entries(reader);
    let mut report = ExtractReport::default();

    for entry in entries {
        let entry = entry?;
        let written = write_entry(&entry, target, options);
        report.record(&entry, written);
    }
    Ok(report)
}

/// Write already decoded entries under `target`.
///
/// Each entry is guarded on its own; a rejected or failed entry is reported and the
/// rest are still written.
pub fn extract_entries(entries: &[Entry], target: &Path, options: &ExtractOptions) -> Result<ExtractReport> {
    let mut report = ExtractReport::default();
    for entry in entries {
        let written = write_entry(entry, target, options);
        report.record(entry, written);
    }
    Ok(report)
}

/// `target` itself is only created once an entry passes the guard
fn write_entry(entry: &Entry, target: &Path, options: &ExtractOptions) -> Result<()> {
    let dest = guard::resolve(&entry.path, target)?;
    guard::check_no_symlinks(&entry.path, target, &dest)?;

    match &entry.kind {
        EntryKind::Directory => {
            fs::create_dir_all(&dest).map_err(|e| Error::io(&dest, e))?;
            debug!("created directory {}", dest.display());
        }
        EntryKind::File { data, .. } => {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }

            let mut open = OpenOptions::new();
            open.write(true);
            if options.overwrite {
                open.create(true).truncate(true);
            } else {
                open.create_new(true);
            }
            let mut file = match open.open(&dest) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return Err(Error::Collision { path: dest });
                }
                Err(e) => return Err(Error::io(&dest, e)),
            };
            file.write_all(data).map_err(|e| Error::io(&dest, e))?;
            debug!("extracted {} ({} bytes)", dest.display(), data.len());
        }
    }
    Ok(())
}

/// A summary of one archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub path: String,
    pub is_dir: bool,
    pub is_binary: bool,
    /// Decoded size in bytes, zero for directories
    pub size: usize,
}

impl From<Entry> for ListedEntry {
    fn from(entry: Entry) -> Self {
        let size = entry.data().map_or(0, <[u8]>::len);
        Self {
            is_dir: entry.is_dir(),
            is_binary: entry.is_binary(),
            size,
            path: entry.path,
        }
    }
}

/// Stream the entries of an archive without touching the filesystem
pub fn list<R: BufRead>(reader: R) -> List<R> {
    List {
        entries: Decoder::new().entries(reader),
    }
}

/// Iterator returned by [`list`]
pub struct List<R> {
    entries: Entries<R>,
}

impl<R: BufRead> Iterator for List<R> {
    type Item = Result<ListedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(|item| item.map(ListedEntry::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FormatError, TraversalReason};
    use tempfile::TempDir;

    const ARCHIVE: &str = "<|||dir=mydir|||>\n\
                           <|||file_start=mydir/test.txt|||>\nHello FML\n<|||file_end|||>\n\
                           <|||file_start=another.txt|||>\nAnother file\n<|||file_end_noeol|||>\n";

    #[test]
    fn test_extract_archive() {
        let dir = TempDir::new().unwrap();
        let report = extract(ARCHIVE.as_bytes(), dir.path(), &ExtractOptions::default()).unwrap();

        assert_eq!(report.directories, vec!["mydir"]);
        assert_eq!(report.files, vec!["mydir/test.txt", "another.txt"]);
        assert!(report.is_success(true));
        assert_eq!(fs::read_to_string(dir.path().join("mydir/test.txt")).unwrap(), "Hello FML\n");
        assert_eq!(fs::read_to_string(dir.path().join("another.txt")).unwrap(), "Another file");
    }

    #[test]
    fn test_extract_creates_missing_parents() {
        let dir = TempDir::new().unwrap();
        let archive = "<|||file_start=a/b/c.txt|||>\nx\n<|||file_end|||>\n";
        extract(archive.as_bytes(), &dir.path().join("out"), &ExtractOptions::default()).unwrap();
        assert_eq!(fs::read(dir.path().join("out/a/b/c.txt")).unwrap(), b"x\n");
    }

    #[test]
    fn test_collision_without_overwrite() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("another.txt"), "previous").unwrap();

        let report = extract(ARCHIVE.as_bytes(), dir.path(), &ExtractOptions::default()).unwrap();
        assert_eq!(report.files, vec!["mydir/test.txt"]);
        assert!(matches!(report.failures[..], [Error::Collision { .. }]));
        assert!(report.is_success(false));
        assert!(!report.is_success(true));
        assert_eq!(fs::read_to_string(dir.path().join("another.txt")).unwrap(), "previous");

        let options = ExtractOptions {
            overwrite: true,
            ..Default::default()
        };
        let report = extract(ARCHIVE.as_bytes(), dir.path(), &options).unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("another.txt")).unwrap(), "Another file");
    }

    #[test]
    fn test_traversal_is_rejected_and_nothing_written() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out");
        let archive = "<|||file_start=../../etc/passwd|||>\nroot::0:0\n<|||file_end|||>\n";

        let report = extract(archive.as_bytes(), &target, &ExtractOptions::default()).unwrap();
        assert!(report.files.is_empty());
        assert!(matches!(
            report.failures[..],
            [Error::PathTraversal {
                reason: TraversalReason::EscapesRoot,
                ..
            }]
        ));
        assert!(!report.is_success(false));
        assert!(!target.exists());
        assert!(!dir.path().join("etc").exists());
    }

    #[test]
    fn test_traversal_does_not_stop_other_entries() {
        let dir = TempDir::new().unwrap();
        let archive = "<|||file_start=/abs.txt|||>\nx\n<|||file_end|||>\n\
                       <|||file_start=ok.txt|||>\ny\n<|||file_end|||>\n";
        let report = extract(archive.as_bytes(), dir.path(), &ExtractOptions::default()).unwrap();
        assert_eq!(report.files, vec!["ok.txt"]);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_format_error_aborts_extraction() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out");
        let archive = "<|||file_start=first.txt|||>\nx\n<|||file_end|||>\n\
                       <|||file_start=second.txt|||>\ny\n\
                       <|||file_start=third.txt|||>\nz\n<|||file_end|||>\n";

        let err = extract(archive.as_bytes(), &target, &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::UnterminatedFile { .. })));
        assert_eq!(fs::read(target.join("first.txt")).unwrap(), b"x\n");
        assert!(!target.join("second.txt").exists());
        assert!(!target.join("third.txt").exists());
    }

    #[test]
    fn test_empty_archive_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out");
        let report = extract("".as_bytes(), &target, &ExtractOptions::default()).unwrap();
        assert!(report.files.is_empty());
        assert!(!target.exists());
    }

    #[test]
    fn test_extract_entries_from_slice() {
        let dir = TempDir::new().unwrap();
        let entries = vec![Entry::directory("d"), Entry::file("d/a.bin", vec![0u8, 1, 2])];
        let report = extract_entries(&entries, dir.path(), &ExtractOptions::default()).unwrap();
        assert_eq!(report.directories, vec!["d"]);
        assert_eq!(report.files, vec!["d/a.bin"]);
        assert_eq!(fs::read(dir.path().join("d/a.bin")).unwrap(), vec![0u8, 1, 2]);
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_refuses_symlinked_directories() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("mydir")).unwrap();

        let report = extract(ARCHIVE.as_bytes(), dir.path(), &ExtractOptions::default()).unwrap();
        assert_eq!(report.failures.len(), 2);
        assert!(!outside.path().join("test.txt").exists());
        assert_eq!(report.files, vec!["another.txt"]);
    }

    #[test]
    fn test_list_entries() {
        let archive = format!("{}<|||file_start_base64=img.bin|||>\n/9j/\n<|||file_end|||>\n", ARCHIVE);
        let listed: Vec<ListedEntry> = list(archive.as_bytes()).collect::<Result<_>>().unwrap();

        assert_eq!(listed.len(), 4);
        assert_eq!(
            listed[0],
            ListedEntry {
                path: "mydir".into(),
                is_dir: true,
                is_binary: false,
                size: 0
            }
        );
        assert_eq!(listed[2].size, 12);
        assert!(listed[3].is_binary);
        assert_eq!(listed[3].size, 3);
    }

    #[test]
    fn test_list_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let archive = "<|||dir=x|||>\n<|||file_start=x/a.txt|||>\na\n<|||file_end|||>\n";
        let cwd_entries = fs::read_dir(dir.path()).unwrap().count();

        let listed: Vec<_> = list(archive.as_bytes()).collect();
        assert_eq!(listed.len(), 2);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), cwd_entries);
    }
}
