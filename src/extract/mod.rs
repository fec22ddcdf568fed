//! Parallel archive extractor.
//!
//! The inverse pipeline: the central directory is read once, then every entry
//! fans out to N extract workers. Writes are shared-nothing because each
//! entry lands in its own output path, so no writer stage is needed. The
//! entry channel is deeper than the archiver's: queued entries are lightweight
//! references, not materialized buffers.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::fsx;
use crate::pool::{first_error, WorkerPool};
use crate::zipfmt::{ArchiveEntry, ZipArchive};
use crate::ArchiverError;

const MIN_CONCURRENCY: usize = 1;

const EXTRACT_CAPACITY: usize = 10;

/// Extracts archive entries into an output tree.
#[derive(Debug)]
pub struct Extractor {
    output_dir: PathBuf,
    concurrency: usize,
}

impl Extractor {
    /// Errors with `Config` if `concurrency` is less than one.
    pub fn new(output_dir: &Path, concurrency: usize) -> Result<Self, ArchiverError> {
        if concurrency < MIN_CONCURRENCY {
            return Err(ArchiverError::Config(
                "concurrency must be 1 or greater".into(),
            ));
        }

        let output_dir = std::path::absolute(output_dir)
            .map_err(|e| ArchiverError::io("resolve absolute path of", output_dir, e))?;

        Ok(Extractor {
            output_dir,
            concurrency,
        })
    }

    /// Extracts every entry of the archive at `archive_path` into the output
    /// directory. Extraction stops at the next entry boundary when `token` is
    /// canceled; already-written files are left in place.
    pub fn extract(&self, token: &CancelToken, archive_path: &Path) -> Result<(), ArchiverError> {
        let archive = ZipArchive::open(archive_path)?;

        let output_dir = self.output_dir.clone();
        let source = Arc::new(archive_path.to_path_buf());
        let pool = WorkerPool::new(
            self.concurrency,
            EXTRACT_CAPACITY,
            move |entry: ArchiveEntry| extract_entry(&output_dir, &source, &entry),
        )?;
        pool.start(token);

        let mut enqueued = Ok(());
        for entry in archive.entries() {
            if token.is_canceled() {
                enqueued = Err(ArchiverError::Canceled);
                break;
            }
            pool.enqueue(entry.clone());
        }

        let closed = pool.close();
        first_error([enqueued, closed])
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// Extract-stage executor body: writes one entry under the output directory,
/// restoring mode bits and the recorded mtime.
fn extract_entry(
    output_dir: &Path,
    archive_path: &Path,
    entry: &ArchiveEntry,
) -> Result<(), ArchiverError> {
    let output_path = output_dir.join(relative_output_path(entry)?);

    // Newly created parents get the process default (0755 under the usual
    // umask); parents that exist keep whatever mode their own directory
    // entry restored.
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ArchiverError::io("create directories", parent, e))?;
    }

    if entry.is_dir() {
        match fs::create_dir(&output_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(ArchiverError::io("create directory", output_path, e)),
        }
        fsx::set_unix_permissions(&output_path, entry.mode & 0o7777)
            .map_err(|e| ArchiverError::io("chmod", output_path.as_path(), e))?;
        return Ok(());
    }

    let mut output = fsx::create_with_mode(&output_path, entry.mode & 0o777)
        .map_err(|e| ArchiverError::io("create file", output_path.as_path(), e))?;
    let mut content = entry.open(archive_path)?;

    io::copy(&mut content, &mut output).map_err(|e| {
        ArchiverError::codec("decompress entry to", output_path.as_path(), e)
    })?;

    // The open(2) mode is filtered by the umask; restore the exact bits.
    fsx::set_unix_permissions(&output_path, entry.mode & 0o7777)
        .map_err(|e| ArchiverError::io("chmod", output_path.as_path(), e))?;

    if let Some(modified) = entry.modified {
        output
            .set_modified(modified)
            .map_err(|e| ArchiverError::io("set mtime on", output_path.as_path(), e))?;
    }

    Ok(())
}

/// Maps a slash-separated entry name onto a relative native path, rejecting
/// names that would escape the output directory.
fn relative_output_path(entry: &ArchiveEntry) -> Result<PathBuf, ArchiverError> {
    let name = entry.name.trim_end_matches('/');
    if name.is_empty() {
        return Err(ArchiverError::Format("entry has an empty name".into()));
    }
    if entry.name.starts_with('/') {
        return Err(ArchiverError::Format(format!(
            "entry name '{}' is not a relative path",
            entry.name
        )));
    }

    let mut path = PathBuf::new();
    for part in name.split('/') {
        let component = Path::new(part).components().next();
        match component {
            Some(Component::Normal(part)) => path.push(part),
            // `a//b` and `a/./b` collapse the way lexical path cleaning does.
            None | Some(Component::CurDir) => {}
            _ => {
                return Err(ArchiverError::Format(format!(
                    "entry name '{}' is not a relative path",
                    entry.name
                )))
            }
        }
    }

    if path.as_os_str().is_empty() {
        return Err(ArchiverError::Format(format!(
            "entry name '{}' is not a relative path",
            entry.name
        )));
    }
    Ok(path)
}
