//! Extended-timestamp extra field (tag 0x5455).
//!
//! Local times in the DOS header fields are lossy and zone-dependent; this
//! block carries the mtime as UTC Unix seconds so it round-trips across
//! readers (APPNOTE 4.5.3, libzip extrafld). Only the modification time is
//! recorded, not access or creation times.

use std::io::Cursor;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, ReadBytesExt};

pub const EXTENDED_TIMESTAMP_TAG: u16 = 0x5455;

/// Flag bit: the block carries a modification time.
const MOD_TIME_PRESENT: u8 = 0x01;

/// Size of the block body: one flag byte plus a u32 timestamp.
const BLOCK_SIZE: u16 = 5;

pub struct ExtendedTimestamp {
    mod_time: u32,
}

impl ExtendedTimestamp {
    pub fn new(modified: SystemTime) -> Self {
        let seconds = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        ExtendedTimestamp {
            mod_time: seconds as u32,
        }
    }

    pub fn mod_time(&self) -> u32 {
        self.mod_time
    }

    /// Serializes the 9-byte tag + size + flags + mtime block.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(9);
        buf.extend_from_slice(&EXTENDED_TIMESTAMP_TAG.to_le_bytes());
        buf.extend_from_slice(&BLOCK_SIZE.to_le_bytes());
        buf.push(MOD_TIME_PRESENT);
        buf.extend_from_slice(&self.mod_time.to_le_bytes());
        buf
    }
}

/// Scans a raw extra-field byte string for an extended timestamp and returns
/// the recovered modification time. Unknown blocks are skipped over by their
/// declared size.
pub fn find_modified(extra: &[u8]) -> Option<SystemTime> {
    let mut cursor = Cursor::new(extra);
    loop {
        let tag = cursor.read_u16::<LittleEndian>().ok()?;
        let size = cursor.read_u16::<LittleEndian>().ok()?;

        if tag == EXTENDED_TIMESTAMP_TAG && size >= BLOCK_SIZE {
            let flags = cursor.read_u8().ok()?;
            if flags & MOD_TIME_PRESENT == 0 {
                return None;
            }
            let seconds = cursor.read_u32::<LittleEndian>().ok()?;
            return Some(UNIX_EPOCH + Duration::from_secs(seconds as u64));
        }

        cursor.set_position(cursor.position() + size as u64);
    }
}
