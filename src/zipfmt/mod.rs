//! ZIP container contract shared by the archiver and the extractor.
//!
//! Entries are written as a local file header, the (already compressed) entry
//! bytes, and, for files, a data descriptor carrying CRC-32 and sizes. The
//! central directory is emitted when the stream writer is finished. Layouts
//! follow the PKZIP APPNOTE; only classic (non-ZIP64) records are produced.

pub mod extra;
pub mod reader;
pub mod writer;

pub use reader::{ArchiveEntry, ZipArchive};
pub use writer::ZipWriter;

use std::fs;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

use crate::fsx;

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
pub const CENTRAL_DIRECTORY_HEADER_SIGNATURE: u32 = 0x02014b50;
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

pub const METHOD_STORE: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;

/// General-purpose bit 3: CRC-32 and sizes follow the entry data in a
/// descriptor instead of appearing in the local header.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x8;
/// General-purpose bit 11: name and comment are encoded in UTF-8.
pub const FLAG_UTF8: u16 = 0x800;

/// ZIP version 2.0, the minimum for deflate and directory entries.
pub const ZIP_VERSION_20: u16 = 20;
/// Host system identifier for Unix, carried in the high byte of
/// `creator_version`.
pub const CREATOR_UNIX: u16 = 3;

/// MS-DOS directory attribute bit in the external attributes low byte.
const MSDOS_DIR_ATTR: u32 = 0x10;

/// A local-file header under construction.
///
/// Built from file metadata when an entry enters the pipeline, completed by
/// the compress stage once sizes and CRC are known, and serialized by the
/// stream writer.
#[derive(Debug, Clone, Default)]
pub struct FileHeader {
    /// Slash-separated relative entry name; directories end with `/`.
    pub name: String,
    pub comment: String,
    pub method: u16,
    pub flags: u16,
    pub creator_version: u16,
    pub reader_version: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub modified: Option<SystemTime>,
    pub extra: Vec<u8>,
    /// Unix `st_mode` in the high 16 bits.
    pub external_attrs: u32,
    /// When set, the UTF-8 flag is force-cleared regardless of the name.
    pub non_utf8: bool,
}

impl FileHeader {
    /// Seeds a header from file-system metadata, the way every entry starts
    /// out. Sizes, method and flags are completed later by the compress
    /// stage.
    pub fn from_metadata(name: String, metadata: &fs::Metadata) -> Self {
        let mode = fsx::metadata_mode(metadata);
        let mut external_attrs = mode << 16;
        if metadata.is_dir() {
            external_attrs |= MSDOS_DIR_ATTR;
        }

        FileHeader {
            name,
            uncompressed_size: metadata.len(),
            modified: metadata.modified().ok(),
            creator_version: creator_host() << 8,
            external_attrs,
            ..Default::default()
        }
    }

    /// Unix mode bits recorded in the external attributes.
    pub fn mode(&self) -> u32 {
        self.external_attrs >> 16
    }
}

#[cfg(unix)]
fn creator_host() -> u16 {
    CREATOR_UNIX
}

#[cfg(not(unix))]
fn creator_host() -> u16 {
    0
}

/// Decides whether a raw name or comment can be, and needs to be, flagged as
/// UTF-8.
///
/// Returns `(valid, require)`: `valid` is false when the bytes are not valid
/// UTF-8, in which case the flag must not be set. `require` is true when at
/// least one code point falls outside the printable ASCII range `0x20..=0x7d`
/// (backslash excluded), where all encodings agree.
pub fn detect_utf8(s: &[u8]) -> (bool, bool) {
    let text = match std::str::from_utf8(s) {
        Ok(text) => text,
        Err(_) => return (false, false),
    };

    let mut require = false;
    for r in text.chars() {
        if r < '\u{20}' || r > '\u{7d}' || r == '\u{5c}' {
            require = true;
        }
    }
    (true, require)
}

/// Converts a modification time to MS-DOS `(time, date)` header fields.
/// Times before 1980 clamp to the DOS epoch.
pub fn dos_date_time(modified: SystemTime) -> (u16, u16) {
    let dt = OffsetDateTime::from(modified);
    if dt.year() < 1980 {
        return dos_epoch();
    }
    if dt.year() > 1980 + 0x7f {
        return (0, u16::MAX);
    }

    let date =
        (((dt.year() - 1980) as u16) << 9) | ((u8::from(dt.month()) as u16) << 5) | dt.day() as u16;
    let time =
        ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
    (time, date)
}

/// MS-DOS `(time, date)` for 1980-01-01 00:00:00, used for entries without a
/// usable modification time.
pub fn dos_epoch() -> (u16, u16) {
    (0, (1 << 5) | 1)
}

/// Recovers a modification time from MS-DOS header fields, interpreting them
/// as UTC. Returns `None` for field values that do not name a real date.
pub fn parse_dos_date_time(time: u16, date: u16) -> Option<SystemTime> {
    let year = ((date >> 9) & 0x7f) as i32 + 1980;
    let month = Month::try_from(((date >> 5) & 0x0f) as u8).ok()?;
    let day = (date & 0x1f) as u8;
    let calendar = Date::from_calendar_date(year, month, day).ok()?;

    let clock = Time::from_hms(
        ((time >> 11) & 0x1f) as u8,
        ((time >> 5) & 0x3f) as u8,
        ((time & 0x1f) as u8).saturating_mul(2),
    )
    .ok()?;

    let seconds = PrimitiveDateTime::new(calendar, clock)
        .assume_utc()
        .unix_timestamp();
    Some(UNIX_EPOCH + Duration::from_secs(seconds as u64))
}
