use std::fs;
use std::path::{Path, PathBuf};

use fmlpack::{
    extract, pack, BinaryPolicy, Decoder, Error, ExtractOptions, FormatError, PackOptions, TraversalReason,
    WalkOptions,
};
use tempfile::TempDir;
use walkdir::WalkDir;

fn sample_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("src/nested")).unwrap();
    fs::create_dir_all(root.join("empty")).unwrap();
    fs::write(root.join("README.md"), "# Title\n\nSome text.\n").unwrap();
    fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
    fs::write(root.join("src/nested/empty.txt"), "").unwrap();
    fs::write(root.join("src/nested/crlf.txt"), "one\r\ntwo\r\n").unwrap();
    fs::write(root.join("src/nested/blank_lines.txt"), "\n\n\n").unwrap();
    fs::write(root.join("logo.bin"), [0x89, b'P', b'N', b'G', 0x00, 0xFF, 0x10]).unwrap();
    fs::write(
        root.join("docs.md"),
        "Archive tags look like this:\n<|||file_end|||>\n\\<|||dir=x|||>\n<|||file_start=evil|||>\n",
    )
    .unwrap();
    dir
}

fn pack_tree(root: &Path, options: &PackOptions) -> String {
    let mut out = Vec::new();
    let report = pack(&[root.to_path_buf()], options, &mut out).unwrap();
    assert!(report.is_success(true), "unexpected issues: {:?}", report.issues);
    String::from_utf8(out).unwrap()
}

/// Relative paths and contents (None for directories) of everything under `root`
fn snapshot(root: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            let data = if e.file_type().is_file() {
                Some(fs::read(e.path()).unwrap())
            } else {
                None
            };
            (rel, data)
        })
        .collect()
}

#[test]
fn test_pack_extract_reproduces_tree() {
    let source = sample_tree();
    let archive = pack_tree(source.path(), &PackOptions::default());

    let target = TempDir::new().unwrap();
    let report = extract(archive.as_bytes(), target.path(), &ExtractOptions::default()).unwrap();
    assert!(report.is_success(true));

    assert_eq!(snapshot(source.path()), snapshot(target.path()));
}

#[test]
fn test_packing_is_idempotent() {
    let source = sample_tree();
    let first = pack_tree(source.path(), &PackOptions::default());
    let second = pack_tree(source.path(), &PackOptions::default());
    assert_eq!(first, second);

    // extracting and packing again yields the same text
    let target = TempDir::new().unwrap();
    extract(first.as_bytes(), target.path(), &ExtractOptions::default()).unwrap();
    assert_eq!(pack_tree(target.path(), &PackOptions::default()), first);
}

#[test]
fn test_delimiters_in_content_stay_content() {
    let source = sample_tree();
    let archive = pack_tree(source.path(), &PackOptions::default());
    let entries = Decoder::new().decode(&archive).unwrap();

    assert!(!entries.iter().any(|e| e.path == "evil"));
    let docs = entries.iter().find(|e| e.path == "docs.md").unwrap();
    assert_eq!(docs.data(), Some(&fs::read(source.path().join("docs.md")).unwrap()[..]));
}

#[test]
fn test_binary_files_use_base64() {
    let source = sample_tree();
    let archive = pack_tree(source.path(), &PackOptions::default());
    assert!(archive.contains("<|||file_start_base64=logo.bin|||>\n"));

    let options = PackOptions {
        walk: WalkOptions {
            binary: BinaryPolicy::Skip,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut out = Vec::new();
    let report = pack(&[source.path().to_path_buf()], &options, &mut out).unwrap();
    assert!(!String::from_utf8(out).unwrap().contains("logo.bin"));
    assert_eq!(report.issues.len(), 1);
    assert!(report.is_success(false));
}

#[test]
fn test_ignore_precedence() {
    let source = TempDir::new().unwrap();
    let root = source.path();
    fs::create_dir_all(root.join("build/out")).unwrap();
    fs::write(root.join("app.log"), "noise\n").unwrap();
    fs::write(root.join("keep.log"), "signal\n").unwrap();
    fs::write(root.join("build/out/keep.log"), "artifact\n").unwrap();
    fs::write(root.join(".fmlpackignore"), "*.log\n!keep.log\nbuild/\n").unwrap();

    let archive = pack_tree(root, &PackOptions::default());
    let paths: Vec<String> = Decoder::new()
        .decode(&archive)
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect();
    assert_eq!(paths, vec!["keep.log"]);
}

#[test]
fn test_traversal_archive_writes_nothing() {
    let target = TempDir::new().unwrap();
    let out = target.path().join("out");
    let archive = "<|||file_start=../../etc/passwd|||>\nroot:x:0:0\n<|||file_end|||>\n";

    let report = extract(archive.as_bytes(), &out, &ExtractOptions::default()).unwrap();
    assert!(matches!(
        report.failures[..],
        [Error::PathTraversal {
            reason: TraversalReason::EscapesRoot,
            ..
        }]
    ));
    assert!(report.files.is_empty());
    assert!(snapshot(target.path()).is_empty());
}

#[test]
fn test_truncated_archive_aborts() {
    let source = sample_tree();
    let archive = pack_tree(source.path(), &PackOptions::default());
    let cut = archive.rfind("<|||file_end").unwrap();

    let target = TempDir::new().unwrap();
    let out = target.path().join("out");
    let err = extract(archive[..cut].as_bytes(), &out, &ExtractOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Format(FormatError::Truncated { ref path, .. }) if path == "src/nested/empty.txt"));

    // entries before the cut were written, the truncated one was not
    assert_eq!(fs::read(out.join("README.md")).unwrap(), b"# Title\n\nSome text.\n");
    assert!(!out.join("src/nested/empty.txt").exists());
}

#[cfg(unix)]
#[test]
fn test_backslash_in_name_is_reported_not_split() {
    let source = TempDir::new().unwrap();
    fs::write(source.path().join("a\\b.txt"), "x\n").unwrap();
    fs::write(source.path().join("ok.txt"), "ok\n").unwrap();

    let mut out = Vec::new();
    let report = pack(&[source.path().to_path_buf()], &PackOptions::default(), &mut out).unwrap();
    assert!(matches!(report.issues[..], [Error::UnrepresentablePath { .. }]));
    assert!(report.is_success(false));

    let target = TempDir::new().unwrap();
    let extracted = extract(&out[..], target.path(), &ExtractOptions::default()).unwrap();
    assert_eq!(extracted.files, vec!["ok.txt"]);
    assert_eq!(snapshot(target.path()), vec![(PathBuf::from("ok.txt"), Some(b"ok\n".to_vec()))]);
}
