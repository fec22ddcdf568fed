//! Two-stage archiver pipeline.
//!
//! Input paths are walked on the caller's thread and fan out to N parallel
//! compress workers; finished entries funnel into a single-slot writer pool
//! whose one worker serializes them into the ZIP stream. The channel between
//! the stages holds a single entry: finished entries are large, and a deeper
//! queue only raises peak memory once the writer is the bottleneck.

mod entry;

pub use entry::{EntryPool, FileEntry};

use std::fs::{self, File};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use flate2::write::DeflateEncoder;
use flate2::Compression;
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::pool::{first_error, WorkerPool};
use crate::zipfmt::ZipWriter;
use crate::ArchiverError;

const MIN_CONCURRENCY: usize = 1;

const SEQUENTIAL_WRITES: usize = 1;
const COMPRESS_CAPACITY: usize = 1;
const WRITE_CAPACITY: usize = 1;

const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Compresses and stores file-system inputs into a ZIP stream.
///
/// `archive` may be called repeatedly to append inputs; `close` writes the
/// central directory.
pub struct Archiver {
    writer: Arc<Mutex<ZipWriter<File>>>,
    compress_pool: Arc<WorkerPool<FileEntry>>,
    write_pool: Arc<WorkerPool<FileEntry>>,
    entries: Arc<EntryPool>,
    chroot: Option<PathBuf>,
}

impl std::fmt::Debug for Archiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archiver").finish_non_exhaustive()
    }
}

impl Archiver {
    /// Builds the two-stage pipeline over the destination file. Errors with
    /// `Config` if `concurrency` is less than one.
    pub fn new(dest: File, concurrency: usize) -> Result<Self, ArchiverError> {
        if concurrency < MIN_CONCURRENCY {
            return Err(ArchiverError::Config(
                "concurrency must be 1 or greater".into(),
            ));
        }

        let writer = Arc::new(Mutex::new(ZipWriter::new(dest)));
        let entries = Arc::new(EntryPool::new());

        let writer_for_pool = writer.clone();
        let entries_for_pool = entries.clone();
        let write_pool = Arc::new(WorkerPool::new(
            SEQUENTIAL_WRITES,
            WRITE_CAPACITY,
            move |mut entry: FileEntry| {
                let result = write_entry(&writer_for_pool, &mut entry);
                entries_for_pool.release(entry);
                result
            },
        )?);

        let write_pool_for_compress = write_pool.clone();
        let compress_pool = Arc::new(WorkerPool::new(
            concurrency,
            COMPRESS_CAPACITY,
            move |mut entry: FileEntry| {
                compress(&mut entry)?;
                write_pool_for_compress.enqueue(entry);
                Ok(())
            },
        )?);

        Ok(Archiver {
            writer,
            compress_pool,
            write_pool,
            entries,
            chroot: None,
        })
    }

    /// Compresses and stores the files at `inputs` into the archive.
    /// Archiving stops when `token` is canceled; the first error raised
    /// anywhere in the pipeline is returned.
    pub fn archive(&mut self, token: &CancelToken, inputs: &[PathBuf]) -> Result<(), ArchiverError> {
        self.compress_pool.start(token);
        self.write_pool.start(token);

        let walked = self.enqueue_inputs(token, inputs);
        let compress_closed = self.compress_pool.close();
        let write_closed = self.write_pool.close();

        first_error([walked, compress_closed, write_closed])
    }

    /// Writes the central directory. The pipeline must be idle (every
    /// `archive` call returned).
    pub fn close(self) -> Result<(), ArchiverError> {
        self.writer.lock().unwrap().finish()
    }

    fn enqueue_inputs(
        &mut self,
        token: &CancelToken,
        inputs: &[PathBuf],
    ) -> Result<(), ArchiverError> {
        for path in inputs {
            if token.is_canceled() {
                return Err(ArchiverError::Canceled);
            }

            let info = fs::symlink_metadata(path)
                .map_err(|e| ArchiverError::io("lstat", path.as_path(), e))?;

            if info.is_dir() {
                self.archive_dir(token, path)?;
            } else {
                self.chroot = None;
                let entry = self.entries.acquire(path, info, None)?;
                self.compress_pool.enqueue(entry);
            }
        }

        Ok(())
    }

    /// Walks `root` pre-order (the root itself included) and enqueues every
    /// visited path, named relative to the root's parent.
    fn archive_dir(&mut self, token: &CancelToken, root: &Path) -> Result<(), ArchiverError> {
        let chroot = std::path::absolute(root)
            .map_err(|e| ArchiverError::io("resolve absolute path of", root, e))?;
        self.chroot = Some(chroot.clone());

        for dirent in WalkDir::new(&chroot).sort_by_file_name() {
            if token.is_canceled() {
                return Err(ArchiverError::Canceled);
            }

            let dirent = dirent.map_err(|e| {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| chroot.clone());
                ArchiverError::io(
                    "walk directory",
                    path,
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("file tree loop detected")),
                )
            })?;

            let info = dirent
                .metadata()
                .map_err(|e| {
                    ArchiverError::io(
                        "lstat",
                        dirent.path(),
                        e.into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("metadata unavailable")),
                    )
                })?;

            let entry = self
                .entries
                .acquire(dirent.path(), info, self.chroot.as_deref())?;
            self.compress_pool.enqueue(entry);
        }

        Ok(())
    }
}

/// Compress-stage executor body: streams the source file through a deflate
/// encoder teed with a CRC-32 hasher into the entry's staging buffer, then
/// completes the header so the writer stage sees finalized sizes.
fn compress(entry: &mut FileEntry) -> Result<(), ArchiverError> {
    if entry.metadata.is_dir() {
        entry.finalize_header();
        return Ok(());
    }

    let mut source =
        File::open(&entry.path).map_err(|e| ArchiverError::io("open", entry.path.as_path(), e))?;

    let mut encoder = DeflateEncoder::new(&mut entry.staging, Compression::default());
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = source
            .read(&mut buf)
            .map_err(|e| ArchiverError::io("read", entry.path.as_path(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        encoder
            .write_all(&buf[..n])
            .map_err(|e| ArchiverError::codec("compress", entry.path.as_path(), e))?;
    }
    encoder
        .finish()
        .map_err(|e| ArchiverError::codec("close compressor for", entry.path.as_path(), e))?;

    entry.header.crc32 = hasher.finalize();
    entry.finalize_header();

    Ok(())
}

/// Writer-stage executor body: serializes one finished entry, draining the
/// in-memory staging bytes and then the spill file, which is unlinked once
/// consumed.
fn write_entry(
    writer: &Mutex<ZipWriter<File>>,
    entry: &mut FileEntry,
) -> Result<(), ArchiverError> {
    let mut writer = writer.lock().unwrap();
    let overflow = entry.staging.take_overflow();
    let memory = Cursor::new(entry.staging.in_memory());

    match overflow {
        Some(mut overflow) => {
            overflow
                .as_file_mut()
                .seek(SeekFrom::Start(0))
                .map_err(|e| ArchiverError::io("seek overflow for", entry.path.as_path(), e))?;
            let mut body = memory.chain(overflow);
            writer.write_raw_entry(&entry.header, &mut body)
            // Dropping `body` unlinks the consumed spill file.
        }
        None => {
            let mut body = memory;
            writer.write_raw_entry(&entry.header, &mut body)
        }
    }
}

