//! Central-directory reader and per-entry decompressing streams.
//!
//! `ZipArchive::open` parses the central directory once; `ArchiveEntry::open`
//! then opens an independent file handle per entry, so extraction workers
//! share nothing.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::DeflateDecoder;

use crate::zipfmt::{
    extra, parse_dos_date_time, CENTRAL_DIRECTORY_HEADER_SIGNATURE,
    END_OF_CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE, METHOD_DEFLATE, METHOD_STORE,
};
use crate::ArchiverError;

const EOCD_LEN: usize = 22;
/// An EOCD record may be followed by a comment of up to 64 KiB.
const MAX_COMMENT_LEN: usize = 65536;
const LOCAL_HEADER_LEN: usize = 30;

const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;

/// An archive opened for extraction: the parsed central directory plus the
/// path workers re-open per entry.
#[derive(Debug)]
pub struct ZipArchive {
    path: PathBuf,
    entries: Vec<ArchiveEntry>,
}

/// One central-directory record, reduced to what extraction needs.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Slash-separated entry name; directories end with `/`.
    pub name: String,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Unix permission and type bits recovered from the external attributes.
    pub mode: u32,
    pub modified: Option<SystemTime>,
    pub(crate) local_header_offset: u64,
}

impl ZipArchive {
    pub fn open(path: &Path) -> Result<Self, ArchiverError> {
        let mut file =
            File::open(path).map_err(|e| ArchiverError::io("open archive", path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| ArchiverError::io("stat archive", path, e))?
            .len();

        if (file_len as usize) < EOCD_LEN {
            return Err(ArchiverError::Format(format!(
                "'{}' is too small to be a ZIP archive",
                path.display()
            )));
        }

        let tail_len = (EOCD_LEN + MAX_COMMENT_LEN).min(file_len as usize);
        file.seek(SeekFrom::End(-(tail_len as i64)))
            .map_err(|e| ArchiverError::io("read archive", path, e))?;
        let mut tail = vec![0u8; tail_len];
        file.read_exact(&mut tail)
            .map_err(|e| ArchiverError::io("read archive", path, e))?;

        let signature = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
        let eocd_pos = (0..=tail_len - EOCD_LEN)
            .rev()
            .find(|&i| tail[i..i + 4] == signature)
            .ok_or_else(|| {
                ArchiverError::Format(format!(
                    "end of central directory not found in '{}'",
                    path.display()
                ))
            })?;

        let mut eocd = Cursor::new(&tail[eocd_pos + 4..]);
        let _disk_number = eocd.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _central_disk = eocd.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _disk_entries = eocd.read_u16::<LittleEndian>().map_err(corrupt)?;
        let total_entries = eocd.read_u16::<LittleEndian>().map_err(corrupt)?;
        let central_size = eocd.read_u32::<LittleEndian>().map_err(corrupt)?;
        let central_offset = eocd.read_u32::<LittleEndian>().map_err(corrupt)?;

        file.seek(SeekFrom::Start(central_offset as u64))
            .map_err(|e| ArchiverError::io("read archive", path, e))?;
        let mut central = vec![0u8; central_size as usize];
        file.read_exact(&mut central)
            .map_err(|e| ArchiverError::io("read archive", path, e))?;

        let mut cursor = Cursor::new(central.as_slice());
        let mut entries = Vec::with_capacity(total_entries as usize);
        for _ in 0..total_entries {
            entries.push(parse_central_record(&mut cursor)?);
        }

        Ok(ZipArchive {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries in central-directory order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ArchiveEntry {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Opens a decompressing byte stream over this entry's data, using a
    /// fresh file handle so concurrent extractors do not share state.
    pub fn open(&self, archive_path: &Path) -> Result<EntryReader, ArchiverError> {
        let mut file = File::open(archive_path)
            .map_err(|e| ArchiverError::io("open archive", archive_path, e))?;
        file.seek(SeekFrom::Start(self.local_header_offset))
            .map_err(|e| ArchiverError::io("read archive", archive_path, e))?;

        let mut fixed = [0u8; LOCAL_HEADER_LEN];
        file.read_exact(&mut fixed)
            .map_err(|e| ArchiverError::io("read archive", archive_path, e))?;
        if fixed[..4] != LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes() {
            return Err(ArchiverError::Format(format!(
                "local file header signature mismatch for entry '{}'",
                self.name
            )));
        }

        let name_len = u16::from_le_bytes([fixed[26], fixed[27]]) as i64;
        let extra_len = u16::from_le_bytes([fixed[28], fixed[29]]) as i64;
        file.seek(SeekFrom::Current(name_len + extra_len))
            .map_err(|e| ArchiverError::io("read archive", archive_path, e))?;

        let data = file.take(self.compressed_size);
        match self.method {
            METHOD_STORE => Ok(EntryReader::Stored(data)),
            METHOD_DEFLATE => Ok(EntryReader::Deflate(DeflateDecoder::new(data))),
            method => Err(ArchiverError::Format(format!(
                "unsupported compression method {} for entry '{}'",
                method, self.name
            ))),
        }
    }
}

/// A decompressing reader over one entry's data.
pub enum EntryReader {
    Stored(io::Take<File>),
    Deflate(DeflateDecoder<io::Take<File>>),
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntryReader::Stored(reader) => reader.read(buf),
            EntryReader::Deflate(reader) => reader.read(buf),
        }
    }
}

fn parse_central_record(cursor: &mut Cursor<&[u8]>) -> Result<ArchiveEntry, ArchiverError> {
    let signature = cursor.read_u32::<LittleEndian>().map_err(corrupt)?;
    if signature != CENTRAL_DIRECTORY_HEADER_SIGNATURE {
        return Err(ArchiverError::Format(
            "central directory header signature mismatch".into(),
        ));
    }

    let _creator_version = cursor.read_u16::<LittleEndian>().map_err(corrupt)?;
    let _reader_version = cursor.read_u16::<LittleEndian>().map_err(corrupt)?;
    let flags = cursor.read_u16::<LittleEndian>().map_err(corrupt)?;
    let method = cursor.read_u16::<LittleEndian>().map_err(corrupt)?;
    let mod_time = cursor.read_u16::<LittleEndian>().map_err(corrupt)?;
    let mod_date = cursor.read_u16::<LittleEndian>().map_err(corrupt)?;
    let crc32 = cursor.read_u32::<LittleEndian>().map_err(corrupt)?;
    let compressed_size = cursor.read_u32::<LittleEndian>().map_err(corrupt)? as u64;
    let uncompressed_size = cursor.read_u32::<LittleEndian>().map_err(corrupt)? as u64;
    let name_len = cursor.read_u16::<LittleEndian>().map_err(corrupt)? as usize;
    let extra_len = cursor.read_u16::<LittleEndian>().map_err(corrupt)? as usize;
    let comment_len = cursor.read_u16::<LittleEndian>().map_err(corrupt)? as usize;
    let _disk_start = cursor.read_u16::<LittleEndian>().map_err(corrupt)?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>().map_err(corrupt)?;
    let external_attrs = cursor.read_u32::<LittleEndian>().map_err(corrupt)?;
    let local_header_offset = cursor.read_u32::<LittleEndian>().map_err(corrupt)? as u64;

    let mut name = vec![0u8; name_len];
    cursor.read_exact(&mut name).map_err(corrupt)?;
    let mut extra_field = vec![0u8; extra_len];
    cursor.read_exact(&mut extra_field).map_err(corrupt)?;
    cursor.set_position(cursor.position() + comment_len as u64);

    let name = String::from_utf8_lossy(&name).into_owned();
    let modified =
        extra::find_modified(&extra_field).or_else(|| parse_dos_date_time(mod_time, mod_date));

    let mut mode = external_attrs >> 16;
    if mode == 0 {
        mode = if name.ends_with('/') {
            DEFAULT_DIR_MODE
        } else {
            DEFAULT_FILE_MODE
        };
    }

    Ok(ArchiveEntry {
        name,
        flags,
        method,
        crc32,
        compressed_size,
        uncompressed_size,
        mode,
        modified,
        local_header_offset,
    })
}

fn corrupt(_: io::Error) -> ArchiverError {
    ArchiverError::Format("truncated central directory record".into())
}
