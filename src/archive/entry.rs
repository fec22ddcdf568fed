//! Archive-side entry model.
//!
//! A `FileEntry` pairs a source path with the local-file header under
//! construction and the staging buffer its compressed bytes land in. Entries
//! are owned by exactly one compress worker until handed to the writer stage,
//! which releases them back to the pool after serialization.

use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use crate::staging::StagingBuffer;
use crate::zipfmt::{
    detect_utf8, extra::ExtendedTimestamp, FileHeader, FLAG_DATA_DESCRIPTOR, FLAG_UTF8,
    METHOD_DEFLATE, METHOD_STORE, ZIP_VERSION_20,
};
use crate::ArchiverError;

#[derive(Debug)]
pub struct FileEntry {
    pub path: PathBuf,
    pub metadata: Metadata,
    pub header: FileHeader,
    pub staging: StagingBuffer,
}

impl FileEntry {
    /// Completes the header at the end of the compress stage, once the
    /// compressed size and CRC are known.
    ///
    /// Applies the UTF-8 flag policy, pins the format version, appends the
    /// extended-timestamp block, and branches on entry kind: directories get
    /// a trailing slash, STORE and zero sizes with no data descriptor; files
    /// get DEFLATE, a data descriptor, and the staged byte count as their
    /// compressed size.
    pub fn finalize_header(&mut self) {
        let header = &mut self.header;

        let (name_valid, name_require) = detect_utf8(header.name.as_bytes());
        let (comment_valid, comment_require) = detect_utf8(header.comment.as_bytes());
        if header.non_utf8 {
            header.flags &= !FLAG_UTF8;
        } else if (name_require || comment_require) && name_valid && comment_valid {
            header.flags |= FLAG_UTF8;
        }

        header.creator_version = header.creator_version & 0xff00 | ZIP_VERSION_20;
        header.reader_version = ZIP_VERSION_20;

        // The DOS header fields are lossy; the extra block preserves the
        // exact mtime for readers that understand it.
        if let Some(modified) = header.modified {
            header
                .extra
                .extend_from_slice(&ExtendedTimestamp::new(modified).encode());
        }

        if self.metadata.is_dir() {
            if !header.name.ends_with('/') {
                header.name.push('/');
            }
            header.method = METHOD_STORE;
            header.flags &= !FLAG_DATA_DESCRIPTOR;
            header.uncompressed_size = 0;
        } else {
            header.method = METHOD_DEFLATE;
            header.flags |= FLAG_DATA_DESCRIPTOR;
            header.compressed_size = self.staging.written();
        }
    }
}

/// Free-list of staging buffers, so entry churn does not pay the in-memory
/// staging allocation per file. Owned by the archiver; the writer executor
/// releases entries here after serializing them.
pub struct EntryPool {
    buffers: Mutex<Vec<StagingBuffer>>,
}

impl EntryPool {
    pub fn new() -> Self {
        EntryPool {
            buffers: Mutex::new(Vec::new()),
        }
    }

    /// Builds an entry for `path`, reusing a pooled staging buffer when one
    /// is free. The header name is `basename(path)`, or
    /// `basename(root)/path_relative_to(root)` when `relative_to` is given.
    pub fn acquire(
        &self,
        path: &Path,
        metadata: Metadata,
        relative_to: Option<&Path>,
    ) -> Result<FileEntry, ArchiverError> {
        let staging = self.buffers.lock().unwrap().pop().unwrap_or_default();

        let name = match relative_to {
            Some(root) => relative_name(root, path)?,
            None => base_name(path),
        };
        let header = FileHeader::from_metadata(name, &metadata);

        Ok(FileEntry {
            path: path.to_path_buf(),
            metadata,
            header,
            staging,
        })
    }

    /// Returns an entry's staging buffer to the free-list.
    pub fn release(&self, mut entry: FileEntry) {
        entry.staging.reset();
        self.buffers.lock().unwrap().push(entry.staging);
    }
}

impl Default for EntryPool {
    fn default() -> Self {
        Self::new()
    }
}

fn base_name(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => path.to_string_lossy().into_owned(),
    }
}

/// Derives a slash-separated `basename(root)/rel` entry name.
fn relative_name(root: &Path, path: &Path) -> Result<String, ArchiverError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| ArchiverError::StripPrefix {
            prefix: root.to_path_buf(),
            path: path.to_path_buf(),
        })?;

    let mut name = base_name(root);
    for component in rel.components() {
        if let Component::Normal(part) = component {
            name.push('/');
            name.push_str(&part.to_string_lossy());
        }
    }
    Ok(name)
}
