//! # fmlpack
//!
//! Pack a directory tree into a single FML ("Filesystem Markup Language") text stream
//! and unpack it again.
//!
//! ## Format
//!
//! Every tag occupies a whole line starting at column 0:
//!
//! ```text
//! <|||dir=docs|||>
//! <|||file_start=docs/readme.md|||>
//! # Readme
//! <|||file_end|||>
//! <|||file_start_base64=logo.png|||>
//! iVBORw0KGgoAAAANSUhEUgAA...
//! <|||file_end|||>
//! ```
//!
//! Text that does not end with a newline is closed with `<|||file_end_noeol|||>`.
//! A content line that starts with `<|||` (after any number of `\`) gets one extra
//! leading `\`, which the decoder removes again.
//!
//! ## Binary Detection
//!
//! A file is binary when it contains a NUL byte or is not valid UTF-8. Binary files
//! are stored base64 encoded by default, or skipped with [`BinaryPolicy::Skip`].
//!
//! ## Filtering
//!
//! Inputs are filtered with gitignore-style rules from `.fmlpackignore` files (and
//! `.gitignore` when enabled) plus command-line exclusions. See [`pattern`].
//!
//! ## Extraction Safety
//!
//! Archives are untrusted input. Every path goes through the [`guard`] before
//! anything is written: absolute paths, `..` escapes and symbolic links in the
//! destination are refused.
//!
//! ```
//! use fmlpack::{Decoder, Encoder, Entry};
//!
//! let entries = vec![Entry::directory("docs"), Entry::file("docs/a.txt", "hello\n")];
//! let text = Encoder::new().encode(&entries).unwrap();
//! assert_eq!(Decoder::new().decode(&text).unwrap(), entries);
//! ```

pub mod archive;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod extract;
pub mod guard;
pub mod pack;
pub mod pattern;
pub mod walker;

pub use archive::{detect_binary, BinaryReason, Entry, EntryKind, FORMAT_SPEC, SPEC_FILE_NAME};
pub use decoder::{Decoder, Entries};
pub use encoder::Encoder;
pub use error::{Error, FormatError, Result, SkipReason, TraversalReason};
pub use extract::{extract, extract_entries, list, ExtractOptions, ExtractReport, List, ListedEntry};
pub use pack::{pack, PackOptions, PackReport};
pub use pattern::{evaluate, Decision, IgnoreRule, RuleSet, RuleSource};
pub use walker::{BinaryPolicy, SymlinkPolicy, WalkOptions, Walker};
