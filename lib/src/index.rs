//! Index files
//!
//! Every data chunk written by a radar front-end is accompanied by an index
//! file. It starts with a fixed 24 byte header followed by one fixed-size
//! record per frame, all little-endian:
//!
//! ```text
//! header: tag u32 | version u32 | flags u32 | numIdx u32 | size u64
//! record: tag u16 | version u16 | flags u32 | width u16 | height u16 |
//!         meta u32 x4 | size u32 | timestamp u64 | offset u64
//! ```
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::errors::FormatError;

/// Size of the index file header in bytes
pub const INDEX_HEADER_SIZE: usize = 24;
/// Size of a single index record in bytes
pub const INDEX_RECORD_SIZE: usize = 48;
/// Highest header version understood by the reader
pub const MAX_INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexHeader {
    pub tag: u32,
    pub version: u32,
    pub flags: u32,
    pub num_idx: u32,
    pub size: u64,
}

/// Index record of a single frame in the paired data file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexRecord {
    pub tag: u16,
    pub version: u16,
    pub flags: u32,
    pub width: u16,
    pub height: u16,
    pub meta: [u32; 4],
    /// Payload size in bytes
    pub size: u32,
    /// Hardware timestamp in us
    pub timestamp: u64,
    /// Byte offset of the frame in the data file
    pub offset: u64,
}

/// Little-endian field reader over a byte slice of known length.
struct LeCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LeCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }
}

impl IndexHeader {
    /// Parse a header from the first `INDEX_HEADER_SIZE` bytes of `buf`.
    fn from_buf(buf: &[u8]) -> Self {
        let mut cur = LeCursor::new(buf);
        Self {
            tag: cur.u32(),
            version: cur.u32(),
            flags: cur.u32(),
            num_idx: cur.u32(),
            size: cur.u64(),
        }
    }

    fn to_bytes(self) -> [u8; INDEX_HEADER_SIZE] {
        let mut out = [0u8; INDEX_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.tag.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.flags.to_le_bytes());
        out[12..16].copy_from_slice(&self.num_idx.to_le_bytes());
        out[16..24].copy_from_slice(&self.size.to_le_bytes());
        out
    }
}

impl IndexRecord {
    /// Parse a record from the first `INDEX_RECORD_SIZE` bytes of `buf`.
    fn from_buf(buf: &[u8]) -> Self {
        let mut cur = LeCursor::new(buf);
        Self {
            tag: cur.u16(),
            version: cur.u16(),
            flags: cur.u32(),
            width: cur.u16(),
            height: cur.u16(),
            meta: [cur.u32(), cur.u32(), cur.u32(), cur.u32()],
            size: cur.u32(),
            timestamp: cur.u64(),
            offset: cur.u64(),
        }
    }

    fn to_bytes(self) -> [u8; INDEX_RECORD_SIZE] {
        let mut out = Vec::with_capacity(INDEX_RECORD_SIZE);
        out.extend_from_slice(&self.tag.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        for word in self.meta {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());

        let mut bytes = [0u8; INDEX_RECORD_SIZE];
        bytes.copy_from_slice(&out);
        bytes
    }
}

/// Read the header and all records of an index file.
///
/// The number of records is taken from the size of the record area; a
/// header count that disagrees is only logged.
pub fn read_index(path: &Path) -> Result<(IndexHeader, Vec<IndexRecord>), FormatError> {
    let buf = std::fs::read(path)?;
    parse_index(path, &buf)
}

fn parse_index(path: &Path, buf: &[u8]) -> Result<(IndexHeader, Vec<IndexRecord>), FormatError> {
    if buf.len() < INDEX_HEADER_SIZE {
        return Err(FormatError::TruncatedHeader {
            path: path.to_path_buf(),
            required: INDEX_HEADER_SIZE,
            available: buf.len(),
        });
    }

    let header = IndexHeader::from_buf(&buf[..INDEX_HEADER_SIZE]);
    if header.version > MAX_INDEX_VERSION {
        return Err(FormatError::UnsupportedVersion {
            path: path.to_path_buf(),
            version: header.version,
        });
    }

    let body = &buf[INDEX_HEADER_SIZE..];
    if body.len() % INDEX_RECORD_SIZE != 0 {
        return Err(FormatError::MisalignedRecords {
            path: path.to_path_buf(),
            record_size: INDEX_RECORD_SIZE,
            available: body.len(),
        });
    }

    let records: Vec<IndexRecord> = body
        .chunks_exact(INDEX_RECORD_SIZE)
        .map(IndexRecord::from_buf)
        .collect();

    if records.len() != header.num_idx as usize {
        log::warn!(
            "Index file {} announces {} records but holds {}; using the record area.",
            path.display(),
            header.num_idx,
            records.len()
        );
    }

    log::trace!(
        "Read {} index records from {}",
        records.len(),
        path.display()
    );
    Ok((header, records))
}

/// Write an index file in the format understood by `read_index`.
pub fn write_index(
    path: &Path,
    header: &IndexHeader,
    records: &[IndexRecord],
) -> Result<(), FormatError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&header.to_bytes())?;
    for record in records {
        writer.write_all(&record.to_bytes())?;
    }
    writer.flush()?;
    Ok(())
}
