//! Streaming ZIP writer for pre-compressed entries.
//!
//! The compress stage hands over finalized headers and staged bytes; this
//! writer only serializes. It is driven by the single writer-stage worker, so
//! it never sees concurrent calls.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::zipfmt::{
    dos_date_time, dos_epoch, FileHeader, CENTRAL_DIRECTORY_HEADER_SIGNATURE,
    DATA_DESCRIPTOR_SIGNATURE, END_OF_CENTRAL_DIRECTORY_SIGNATURE, FLAG_DATA_DESCRIPTOR,
    LOCAL_FILE_HEADER_SIGNATURE,
};
use crate::ArchiverError;

/*
Local file header            Central directory header
  signature        4           signature        4
  reader version   2           creator version  2
  flags            2           reader version   2
  method           2           flags            2
  mod time         2           method           2
  mod date         2           mod time         2
  crc-32           4           mod date         2
  compressed size  4           crc-32           4
  uncompressed     4           compressed size  4
  name length      2           uncompressed     4
  extra length     2           name length      2
  name, extra                  extra length     2
                               comment length   2
                               disk start       2
                               internal attrs   2
                               external attrs   4
                               local offset     4
                               name, extra, comment
*/

const LOCAL_HEADER_LEN: u64 = 30;
const CENTRAL_HEADER_LEN: u64 = 46;
const DATA_DESCRIPTOR_LEN: u64 = 16;
const EOCD_LEN: u64 = 22;

struct CentralRecord {
    header: FileHeader,
    local_header_offset: u64,
}

pub struct ZipWriter<W: Write> {
    inner: W,
    offset: u64,
    entries: Vec<CentralRecord>,
}

impl<W: Write> ZipWriter<W> {
    pub fn new(inner: W) -> Self {
        ZipWriter {
            inner,
            offset: 0,
            entries: Vec::new(),
        }
    }

    /// Emits one entry: local file header, the already-compressed bytes from
    /// `body`, and a data descriptor when the header carries that flag. The
    /// header must be finalized (sizes, CRC, flags) before the call.
    pub fn write_raw_entry(
        &mut self,
        header: &FileHeader,
        body: &mut dyn Read,
    ) -> Result<(), ArchiverError> {
        if header.name.len() > u16::MAX as usize || header.extra.len() > u16::MAX as usize {
            return Err(ArchiverError::Format(format!(
                "entry name or extra field too long for '{}'",
                header.name
            )));
        }
        if header.compressed_size > u32::MAX as u64
            || header.uncompressed_size > u32::MAX as u64
            || self.offset > u32::MAX as u64
        {
            return Err(ArchiverError::Format(format!(
                "entry '{}' exceeds classic ZIP limits (ZIP64 is unsupported)",
                header.name
            )));
        }

        let local_header_offset = self.offset;
        let (time, date) = header.modified.map(dos_date_time).unwrap_or_else(dos_epoch);
        let descriptor = header.flags & FLAG_DATA_DESCRIPTOR != 0;

        // With a data descriptor the local header carries zeros and the real
        // values follow the entry data.
        let (crc32, compressed, uncompressed) = if descriptor {
            (0, 0, 0)
        } else {
            (
                header.crc32,
                header.compressed_size as u32,
                header.uncompressed_size as u32,
            )
        };

        let w = &mut self.inner;
        w.write_u32::<LittleEndian>(LOCAL_FILE_HEADER_SIGNATURE)
            .map_err(write_err)?;
        w.write_u16::<LittleEndian>(header.reader_version)
            .map_err(write_err)?;
        w.write_u16::<LittleEndian>(header.flags).map_err(write_err)?;
        w.write_u16::<LittleEndian>(header.method).map_err(write_err)?;
        w.write_u16::<LittleEndian>(time).map_err(write_err)?;
        w.write_u16::<LittleEndian>(date).map_err(write_err)?;
        w.write_u32::<LittleEndian>(crc32).map_err(write_err)?;
        w.write_u32::<LittleEndian>(compressed).map_err(write_err)?;
        w.write_u32::<LittleEndian>(uncompressed).map_err(write_err)?;
        w.write_u16::<LittleEndian>(header.name.len() as u16)
            .map_err(write_err)?;
        w.write_u16::<LittleEndian>(header.extra.len() as u16)
            .map_err(write_err)?;
        w.write_all(header.name.as_bytes()).map_err(write_err)?;
        w.write_all(&header.extra).map_err(write_err)?;

        let copied = io::copy(body, w).map_err(write_err)?;

        let mut entry_len =
            LOCAL_HEADER_LEN + header.name.len() as u64 + header.extra.len() as u64 + copied;

        if descriptor {
            w.write_u32::<LittleEndian>(DATA_DESCRIPTOR_SIGNATURE)
                .map_err(write_err)?;
            w.write_u32::<LittleEndian>(header.crc32).map_err(write_err)?;
            w.write_u32::<LittleEndian>(header.compressed_size as u32)
                .map_err(write_err)?;
            w.write_u32::<LittleEndian>(header.uncompressed_size as u32)
                .map_err(write_err)?;
            entry_len += DATA_DESCRIPTOR_LEN;
        }

        self.offset += entry_len;
        self.entries.push(CentralRecord {
            header: header.clone(),
            local_header_offset,
        });

        Ok(())
    }

    /// Number of entries written so far.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Writes the central directory and the end-of-central-directory record,
    /// then flushes the underlying stream.
    pub fn finish(&mut self) -> Result<(), ArchiverError> {
        let central_offset = self.offset;
        if central_offset > u32::MAX as u64 {
            return Err(ArchiverError::Format(
                "central directory offset exceeds classic ZIP limits (ZIP64 is unsupported)".into(),
            ));
        }
        if self.entries.len() > u16::MAX as usize {
            return Err(ArchiverError::Format(
                "too many entries for a classic ZIP archive (ZIP64 is unsupported)".into(),
            ));
        }

        let mut central_size = 0u64;
        for record in &self.entries {
            let header = &record.header;
            let (time, date) = header.modified.map(dos_date_time).unwrap_or_else(dos_epoch);

            let w = &mut self.inner;
            w.write_u32::<LittleEndian>(CENTRAL_DIRECTORY_HEADER_SIGNATURE)
                .map_err(write_err)?;
            w.write_u16::<LittleEndian>(header.creator_version)
                .map_err(write_err)?;
            w.write_u16::<LittleEndian>(header.reader_version)
                .map_err(write_err)?;
            w.write_u16::<LittleEndian>(header.flags).map_err(write_err)?;
            w.write_u16::<LittleEndian>(header.method).map_err(write_err)?;
            w.write_u16::<LittleEndian>(time).map_err(write_err)?;
            w.write_u16::<LittleEndian>(date).map_err(write_err)?;
            w.write_u32::<LittleEndian>(header.crc32).map_err(write_err)?;
            w.write_u32::<LittleEndian>(header.compressed_size as u32)
                .map_err(write_err)?;
            w.write_u32::<LittleEndian>(header.uncompressed_size as u32)
                .map_err(write_err)?;
            w.write_u16::<LittleEndian>(header.name.len() as u16)
                .map_err(write_err)?;
            w.write_u16::<LittleEndian>(header.extra.len() as u16)
                .map_err(write_err)?;
            w.write_u16::<LittleEndian>(header.comment.len() as u16)
                .map_err(write_err)?;
            w.write_u16::<LittleEndian>(0).map_err(write_err)?; // disk start
            w.write_u16::<LittleEndian>(0).map_err(write_err)?; // internal attrs
            w.write_u32::<LittleEndian>(header.external_attrs)
                .map_err(write_err)?;
            w.write_u32::<LittleEndian>(record.local_header_offset as u32)
                .map_err(write_err)?;
            w.write_all(header.name.as_bytes()).map_err(write_err)?;
            w.write_all(&header.extra).map_err(write_err)?;
            w.write_all(header.comment.as_bytes()).map_err(write_err)?;

            central_size += CENTRAL_HEADER_LEN
                + header.name.len() as u64
                + header.extra.len() as u64
                + header.comment.len() as u64;
        }

        let w = &mut self.inner;
        w.write_u32::<LittleEndian>(END_OF_CENTRAL_DIRECTORY_SIGNATURE)
            .map_err(write_err)?;
        w.write_u16::<LittleEndian>(0).map_err(write_err)?; // disk number
        w.write_u16::<LittleEndian>(0).map_err(write_err)?; // central directory disk
        w.write_u16::<LittleEndian>(self.entries.len() as u16)
            .map_err(write_err)?;
        w.write_u16::<LittleEndian>(self.entries.len() as u16)
            .map_err(write_err)?;
        w.write_u32::<LittleEndian>(central_size as u32)
            .map_err(write_err)?;
        w.write_u32::<LittleEndian>(central_offset as u32)
            .map_err(write_err)?;
        w.write_u16::<LittleEndian>(0).map_err(write_err)?; // comment length

        self.offset += central_size + EOCD_LEN;
        self.inner.flush().map_err(write_err)?;

        Ok(())
    }
}

fn write_err(source: io::Error) -> ArchiverError {
    ArchiverError::io("write archive", std::path::PathBuf::new(), source)
}
