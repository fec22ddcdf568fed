use pzip::archive::Archiver;
use pzip::cancel::CancelToken;
use pzip::extract::Extractor;
use pzip::zipfmt::{ZipArchive, METHOD_DEFLATE, METHOD_STORE};
use pzip::ArchiverError;

use rand::RngCore;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::tempdir;

fn write_file(path: &Path, contents: &[u8]) {
    let mut file = File::create(path).unwrap();
    file.write_all(contents).unwrap();
}

fn archive_inputs(
    archive_path: &Path,
    inputs: &[PathBuf],
    concurrency: usize,
) -> Result<(), ArchiverError> {
    let dest = File::create(archive_path).unwrap();
    let mut archiver = Archiver::new(dest, concurrency)?;
    let archived = archiver.archive(&CancelToken::new(), inputs);
    let closed = archiver.close();
    archived?;
    closed
}

fn extract_into(archive_path: &Path, output_dir: &Path) {
    let extractor = Extractor::new(output_dir, 4).unwrap();
    extractor
        .extract(&CancelToken::new(), archive_path)
        .unwrap();
}

fn entry_names(archive_path: &Path) -> Vec<String> {
    let archive = ZipArchive::open(archive_path).unwrap();
    let mut names: Vec<_> = archive.entries().iter().map(|e| e.name.clone()).collect();
    names.sort();
    names
}

fn crc32_of(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[test]
fn archives_a_single_file_and_extracts_it_back() {
    let src = tempdir().unwrap();
    let hello = src.path().join("hello.txt");
    write_file(&hello, b"hello, world!\n");

    let work = tempdir().unwrap();
    let archive_path = work.path().join("archive.zip");
    archive_inputs(&archive_path, &[hello.clone()], 4).unwrap();

    let archive = ZipArchive::open(&archive_path).unwrap();
    assert_eq!(archive.len(), 1);

    let entry = &archive.entries()[0];
    assert_eq!(entry.name, "hello.txt");
    assert_eq!(entry.method, METHOD_DEFLATE);
    assert_eq!(entry.uncompressed_size, 14);
    assert_eq!(entry.crc32, crc32_of(b"hello, world!\n"));

    let out = tempdir().unwrap();
    extract_into(&archive_path, out.path());
    assert_eq!(
        fs::read(out.path().join("hello.txt")).unwrap(),
        b"hello, world!\n"
    );
}

#[test]
fn archives_a_directory_tree_with_relative_names() {
    let src = tempdir().unwrap();
    let root = src.path().join("hello");
    fs::create_dir_all(root.join("nested")).unwrap();
    write_file(&root.join("hello.txt"), b"hello\n");
    write_file(&root.join("nested").join("hello.md"), b"# hello\n");

    let work = tempdir().unwrap();
    let archive_path = work.path().join("archive.zip");
    archive_inputs(&archive_path, &[root], 4).unwrap();

    assert_eq!(
        entry_names(&archive_path),
        vec![
            "hello/".to_string(),
            "hello/hello.txt".to_string(),
            "hello/nested/".to_string(),
            "hello/nested/hello.md".to_string(),
        ]
    );
}

#[test]
fn archives_a_directory_and_a_file_together() {
    let src = tempdir().unwrap();
    let root = src.path().join("hello");
    fs::create_dir_all(root.join("nested")).unwrap();
    write_file(&root.join("hello.txt"), b"hello\n");
    write_file(&root.join("nested").join("hello.md"), b"# hello\n");
    let loose = src.path().join("hello.txt");
    write_file(&loose, b"loose file\n");

    let work = tempdir().unwrap();
    let archive_path = work.path().join("archive.zip");
    archive_inputs(&archive_path, &[root, loose], 4).unwrap();

    // Four tree entries plus the loose file.
    assert_eq!(entry_names(&archive_path).len(), 5);
}

#[test]
fn extraction_recreates_the_tree() {
    let src = tempdir().unwrap();
    let root = src.path().join("hello");
    fs::create_dir_all(root.join("nested")).unwrap();
    write_file(&root.join("hello.txt"), b"hello\n");
    write_file(&root.join("nested").join("hello.md"), b"# hello\n");

    let work = tempdir().unwrap();
    let archive_path = work.path().join("archive.zip");
    archive_inputs(&archive_path, &[root], 2).unwrap();

    let out = tempdir().unwrap();
    extract_into(&archive_path, out.path());

    assert!(out.path().join("hello").is_dir());
    assert!(out.path().join("hello/nested").is_dir());
    assert_eq!(fs::read(out.path().join("hello/hello.txt")).unwrap(), b"hello\n");
    assert_eq!(
        fs::read(out.path().join("hello/nested/hello.md")).unwrap(),
        b"# hello\n"
    );
}

#[test]
fn zero_concurrency_is_rejected() {
    let work = tempdir().unwrap();
    let archive_path = work.path().join("archive.zip");
    let dest = File::create(&archive_path).unwrap();

    let err = Archiver::new(dest, 0).unwrap_err();
    assert!(matches!(err, ArchiverError::Config(_)));
}

#[test]
fn an_empty_directory_becomes_a_single_store_entry() {
    let src = tempdir().unwrap();
    let root = src.path().join("empty");
    fs::create_dir(&root).unwrap();

    let work = tempdir().unwrap();
    let archive_path = work.path().join("archive.zip");
    archive_inputs(&archive_path, &[root], 1).unwrap();

    let archive = ZipArchive::open(&archive_path).unwrap();
    assert_eq!(archive.len(), 1);

    let entry = &archive.entries()[0];
    assert_eq!(entry.name, "empty/");
    assert_eq!(entry.method, METHOD_STORE);
    assert_eq!(entry.compressed_size, 0);
    assert_eq!(entry.uncompressed_size, 0);
    assert_eq!(entry.crc32, 0);
}

#[test]
fn a_zero_byte_file_deflates_to_an_empty_stream() {
    let src = tempdir().unwrap();
    let empty = src.path().join("empty.bin");
    write_file(&empty, b"");

    let work = tempdir().unwrap();
    let archive_path = work.path().join("archive.zip");
    archive_inputs(&archive_path, &[empty], 1).unwrap();

    let archive = ZipArchive::open(&archive_path).unwrap();
    let entry = &archive.entries()[0];
    assert_eq!(entry.method, METHOD_DEFLATE);
    assert_eq!(entry.uncompressed_size, 0);
    assert_eq!(entry.crc32, 0x0000_0000);
    // An empty deflate stream still has a terminating block.
    assert!(entry.compressed_size > 0);

    let out = tempdir().unwrap();
    extract_into(&archive_path, out.path());
    assert_eq!(fs::read(out.path().join("empty.bin")).unwrap(), b"");
}

#[test]
fn incompressible_data_spills_to_overflow_and_roundtrips() {
    // 3 MiB of random bytes deflates to more than the 2 MiB staging
    // capacity, forcing the temp-file overflow path.
    let mut contents = vec![0u8; 3 * 1024 * 1024];
    rand::thread_rng().fill_bytes(&mut contents);

    let src = tempdir().unwrap();
    let big = src.path().join("big.bin");
    write_file(&big, &contents);

    let work = tempdir().unwrap();
    let archive_path = work.path().join("archive.zip");
    archive_inputs(&archive_path, &[big], 2).unwrap();

    let archive = ZipArchive::open(&archive_path).unwrap();
    let entry = &archive.entries()[0];
    assert!(entry.compressed_size > 2 * 1024 * 1024);
    assert_eq!(entry.uncompressed_size, contents.len() as u64);

    let out = tempdir().unwrap();
    extract_into(&archive_path, out.path());
    assert_eq!(fs::read(out.path().join("big.bin")).unwrap(), contents);
}

#[cfg(unix)]
#[test]
fn modes_and_mtimes_survive_the_roundtrip() {
    use std::os::unix::fs::PermissionsExt;

    let src = tempdir().unwrap();
    let hello = src.path().join("hello.txt");
    write_file(&hello, b"hello\n");
    fs::set_permissions(&hello, fs::Permissions::from_mode(0o750)).unwrap();

    let modified = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    File::options()
        .write(true)
        .open(&hello)
        .unwrap()
        .set_modified(modified)
        .unwrap();

    let work = tempdir().unwrap();
    let archive_path = work.path().join("archive.zip");
    archive_inputs(&archive_path, &[hello], 1).unwrap();

    let out = tempdir().unwrap();
    extract_into(&archive_path, out.path());

    let extracted = fs::metadata(out.path().join("hello.txt")).unwrap();
    assert_eq!(extracted.permissions().mode() & 0o7777, 0o750);

    let extracted_mtime = extracted.modified().unwrap();
    let seconds = |t: SystemTime| t.duration_since(UNIX_EPOCH).unwrap().as_secs();
    assert_eq!(seconds(extracted_mtime), seconds(modified));
}

#[test]
fn archiving_twice_produces_identical_decoded_contents() {
    let src = tempdir().unwrap();
    let hello = src.path().join("hello.txt");
    write_file(&hello, b"hello, world!\n");

    let work = tempdir().unwrap();
    let first = work.path().join("first.zip");
    let second = work.path().join("second.zip");
    archive_inputs(&first, &[hello.clone()], 2).unwrap();
    archive_inputs(&second, &[hello], 2).unwrap();

    let describe = |path: &Path| {
        let archive = ZipArchive::open(path).unwrap();
        archive
            .entries()
            .iter()
            .map(|e| (e.name.clone(), e.crc32, e.uncompressed_size, e.modified))
            .collect::<Vec<_>>()
    };
    assert_eq!(describe(&first), describe(&second));
}

#[cfg(unix)]
#[test]
fn a_poisoned_input_fails_the_whole_archive() {
    let src = tempdir().unwrap();
    let root = src.path().join("hello");
    fs::create_dir(&root).unwrap();
    write_file(&root.join("ok.txt"), b"fine\n");
    // A dangling symlink lstats fine but cannot be opened by the compress
    // stage.
    std::os::unix::fs::symlink(src.path().join("missing"), root.join("dangling")).unwrap();

    let work = tempdir().unwrap();
    let archive_path = work.path().join("archive.zip");

    let err = archive_inputs(&archive_path, &[root], 2).unwrap_err();
    assert!(matches!(err, ArchiverError::Io { .. }));
}

#[test]
fn a_canceled_token_aborts_archiving() {
    let src = tempdir().unwrap();
    let hello = src.path().join("hello.txt");
    write_file(&hello, b"hello\n");

    let work = tempdir().unwrap();
    let archive_path = work.path().join("archive.zip");
    let dest = File::create(&archive_path).unwrap();

    let token = CancelToken::new();
    token.cancel();

    let mut archiver = Archiver::new(dest, 2).unwrap();
    let err = archiver.archive(&token, &[hello]).unwrap_err();
    assert!(matches!(err, ArchiverError::Canceled));
}

#[test]
fn extracting_a_corrupt_archive_is_a_format_error() {
    let work = tempdir().unwrap();
    let archive_path = work.path().join("archive.zip");
    write_file(&archive_path, b"PK\x03\x04 this is not really an archive at all......");

    let out = tempdir().unwrap();
    let extractor = Extractor::new(out.path(), 2).unwrap();
    let err = extractor
        .extract(&CancelToken::new(), &archive_path)
        .unwrap_err();
    assert!(matches!(err, ArchiverError::Format(_)));
}
