//! Packing a directory tree into an archive

use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::archive::{Entry, FORMAT_SPEC, SPEC_FILE_NAME};
use crate::encoder::Encoder;
use crate::error::{Error, Result, SkipReason};
use crate::walker::{WalkOptions, Walker};

/// Configuration for [`pack`]
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    pub walk: WalkOptions,
    /// Put the FML format description first in the archive
    pub include_spec: bool,
}

/// Outcome of a pack operation
#[derive(Debug, Default)]
pub struct PackReport {
    pub directories: usize,
    pub files: usize,
    /// Inputs that were skipped or failed, in walk order
    pub issues: Vec<Error>,
}

impl PackReport {
    /// Whether the run succeeded. Soft issues only count under `strict`.
    pub fn is_success(&self, strict: bool) -> bool {
        self.issues.iter().all(|e| e.is_soft() && !strict)
    }
}

/// Walk `roots` and stream them as an archive into `writer`.
///
/// Per-input problems land in the report; only option errors and write failures
/// abort the operation.
pub fn pack<W: Write>(roots: &[PathBuf], options: &PackOptions, mut writer: W) -> Result<PackReport> {
    let walker = Walker::new(roots, options.walk.clone())?;
    let encoder = Encoder::new();
    let mut report = PackReport::default();

    if options.include_spec {
        encoder.encode_entry(&mut writer, &Entry::file(SPEC_FILE_NAME, FORMAT_SPEC))?;
        report.files += 1;
    }

    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(e) => {
                warn!("{}", e);
                report.issues.push(e);
                continue;
            }
        };

        if options.include_spec && entry.path == SPEC_FILE_NAME {
            let e = Error::Skipped {
                path: PathBuf::from(&entry.path),
                reason: SkipReason::Duplicate,
            };
            warn!("{}", e);
            report.issues.push(e);
            continue;
        }

        match encoder.encode_entry(&mut writer, &entry) {
            Ok(()) => {
                debug!("packed {}", entry.path);
                if entry.is_dir() {
                    report.directories += 1;
                } else {
                    report.files += 1;
                }
            }
            Err(e @ (Error::UnrepresentablePath { .. } | Error::NotText { .. })) => {
                warn!("{}", e);
                report.issues.push(e);
            }
            Err(e) => return Err(e),
        }
    }

    writer.flush().map_err(Error::Output)?;
    Ok(report)
}
