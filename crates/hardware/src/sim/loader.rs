//! Intel HEX image loader.
//!
//! This module turns the textual image produced by the compiler into bytes in device
//! memory. It performs:
//! 1. **Record parsing:** `:` + byte count + 16-bit address + type + payload + checksum.
//! 2. **Address resolution:** Extended segment (`02`) and extended linear (`04`) records
//!    set the upper address bits applied to subsequent data records.
//! 3. **Streaming load:** `load_hex` writes each data record as soon as it is decoded.
//! 4. **Validated load:** `MemoryImage::parse` decodes everything first so
//!    `MemoryImage::write_to` only touches memory for a well-formed image.
//!
//! Parsing stops at the end-of-file record; anything after it is ignored.

use tracing::{debug, warn};

use crate::common::LoadError;
use crate::soc::traits::MemorySink;

/// Record type codes.
pub mod record_type {
    /// Data bytes at a 16-bit offset.
    pub const DATA: u8 = 0x00;
    /// End of file.
    pub const END_OF_FILE: u8 = 0x01;
    /// Extended segment address (upper bits = segment * 16).
    pub const EXTENDED_SEGMENT_ADDRESS: u8 = 0x02;
    /// Start segment address (CS:IP).
    pub const START_SEGMENT_ADDRESS: u8 = 0x03;
    /// Extended linear address (upper 16 bits).
    pub const EXTENDED_LINEAR_ADDRESS: u8 = 0x04;
    /// Start linear address (32-bit entry point).
    pub const START_LINEAR_ADDRESS: u8 = 0x05;
}

/// Byte count, address (2), record type and checksum.
const RECORD_OVERHEAD: usize = 5;

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Payload bytes at a 16-bit offset from the current upper address.
    Data {
        /// Offset declared in the record.
        offset: u16,
        /// Payload bytes.
        bytes: Vec<u8>,
    },
    /// Terminates the image.
    EndOfFile,
    /// Sets the upper address to `segment << 4`.
    ExtendedSegmentAddress(u16),
    /// Entry point as a real-mode `CS:IP` pair.
    StartSegmentAddress {
        /// Code segment.
        cs: u16,
        /// Instruction pointer.
        ip: u16,
    },
    /// Sets the upper address to `value << 16`.
    ExtendedLinearAddress(u16),
    /// Entry point as a 32-bit address.
    StartLinearAddress(u32),
}

/// Decodes a single record line (without surrounding whitespace).
///
/// # Errors
///
/// `LoadError::Malformed` for structural problems or a bad checksum (when `verify_checksum`),
/// `LoadError::UnknownRecordType` for types outside `00`..=`05`.
pub fn parse_record(line_no: usize, line: &str, verify_checksum: bool) -> Result<Record, LoadError> {
    let Some(digits) = line.strip_prefix(':') else {
        return Err(LoadError::malformed(line_no, "missing ':' start code"));
    };
    if digits.len() % 2 != 0 {
        return Err(LoadError::malformed(line_no, "odd number of hex digits"));
    }
    let raw = decode_hex(digits).ok_or_else(|| LoadError::malformed(line_no, "non-hex digit"))?;
    if raw.len() < RECORD_OVERHEAD {
        return Err(LoadError::malformed(line_no, "record too short"));
    }

    let count = raw[0] as usize;
    if raw.len() != count + RECORD_OVERHEAD {
        return Err(LoadError::malformed(
            line_no,
            format!(
                "byte count {count} disagrees with {} payload bytes",
                raw.len() - RECORD_OVERHEAD
            ),
        ));
    }

    let sum = raw.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if verify_checksum && sum != 0 {
        let declared = raw[raw.len() - 1];
        let expected = declared.wrapping_sub(sum);
        return Err(LoadError::malformed(
            line_no,
            format!("checksum {declared:02X} should be {expected:02X}"),
        ));
    }

    let offset = u16::from_be_bytes([raw[1], raw[2]]);
    let kind = raw[3];
    let payload = &raw[4..4 + count];

    let expect_len = |len: usize| {
        if payload.len() == len {
            Ok(())
        } else {
            Err(LoadError::malformed(
                line_no,
                format!("record type {kind:02X} needs {len} payload bytes, got {}", payload.len()),
            ))
        }
    };

    match kind {
        record_type::DATA => Ok(Record::Data {
            offset,
            bytes: payload.to_vec(),
        }),
        record_type::END_OF_FILE => Ok(Record::EndOfFile),
        record_type::EXTENDED_SEGMENT_ADDRESS => {
            expect_len(2)?;
            Ok(Record::ExtendedSegmentAddress(u16::from_be_bytes([
                payload[0], payload[1],
            ])))
        }
        record_type::START_SEGMENT_ADDRESS => {
            expect_len(4)?;
            Ok(Record::StartSegmentAddress {
                cs: u16::from_be_bytes([payload[0], payload[1]]),
                ip: u16::from_be_bytes([payload[2], payload[3]]),
            })
        }
        record_type::EXTENDED_LINEAR_ADDRESS => {
            expect_len(2)?;
            Ok(Record::ExtendedLinearAddress(u16::from_be_bytes([
                payload[0], payload[1],
            ])))
        }
        record_type::START_LINEAR_ADDRESS => {
            expect_len(4)?;
            Ok(Record::StartLinearAddress(u32::from_be_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ])))
        }
        other => Err(LoadError::UnknownRecordType {
            line: line_no,
            record_type: other,
        }),
    }
}

fn decode_hex(digits: &str) -> Option<Vec<u8>> {
    digits
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some(((hi << 4) | lo) as u8)
        })
        .collect()
}

/// Contiguous bytes at an absolute address (before any load offset is applied).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Address of the first byte.
    pub address: u32,
    /// The bytes.
    pub bytes: Vec<u8>,
}

/// Walks the lines of an image, resolving extended addresses into data chunks.
struct Decoder<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    verify_checksums: bool,
    upper: u32,
    start_address: Option<u32>,
    records: usize,
    saw_eof: bool,
    done: bool,
}

impl<'a> Decoder<'a> {
    fn new(text: &'a str, verify_checksums: bool) -> Self {
        Self {
            lines: text.lines().enumerate(),
            verify_checksums,
            upper: 0,
            start_address: None,
            records: 0,
            saw_eof: false,
            done: false,
        }
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<Chunk, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let Some((index, raw)) = self.lines.next() else {
                self.done = true;
                warn!("hex image has no end-of-file record");
                break;
            };
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            let record = match parse_record(index + 1, line, self.verify_checksums) {
                Ok(record) => record,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            self.records += 1;

            match record {
                Record::Data { offset, bytes } => {
                    let address = self.upper.wrapping_add(u32::from(offset));
                    return Some(Ok(Chunk { address, bytes }));
                }
                Record::EndOfFile => {
                    self.saw_eof = true;
                    self.done = true;
                }
                Record::ExtendedSegmentAddress(segment) => self.upper = u32::from(segment) << 4,
                Record::ExtendedLinearAddress(upper) => self.upper = u32::from(upper) << 16,
                Record::StartSegmentAddress { cs, ip } => {
                    self.start_address = Some((u32::from(cs) << 4).wrapping_add(u32::from(ip)));
                }
                Record::StartLinearAddress(addr) => self.start_address = Some(addr),
            }
        }
        None
    }
}

/// What a successful load wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    /// Records decoded, including address and end-of-file records.
    pub records: usize,
    /// Payload bytes written.
    pub bytes: usize,
    /// Entry point declared by a start-address record, if any.
    pub start_address: Option<u32>,
    /// Whether the image was closed by an end-of-file record.
    pub terminated: bool,
}

/// Loads an Intel HEX image into `target`, writing each data byte at
/// `base_offset + address` (wrapping at 32 bits).
///
/// Bytes are written as records are decoded. **Known limitation:** when a line fails
/// to parse, the load stops with an error but bytes written by earlier lines stay in
/// `target`; nothing is rolled back. Use [`MemoryImage::parse`] followed by
/// [`MemoryImage::write_to`] for all-or-nothing loading.
///
/// # Errors
///
/// The first `LoadError` encountered; no byte from that line or any later line is written.
pub fn load_hex(
    text: &str,
    target: &mut dyn MemorySink,
    base_offset: u32,
    verify_checksums: bool,
) -> Result<LoadSummary, LoadError> {
    let mut decoder = Decoder::new(text, verify_checksums);
    let mut bytes = 0;
    for chunk in decoder.by_ref() {
        let chunk = chunk?;
        target.write_bytes(base_offset.wrapping_add(chunk.address), &chunk.bytes);
        bytes += chunk.bytes.len();
    }
    let summary = LoadSummary {
        records: decoder.records,
        bytes,
        start_address: decoder.start_address,
        terminated: decoder.saw_eof,
    };
    debug!(records = summary.records, bytes = summary.bytes, "hex image loaded");
    Ok(summary)
}

/// A fully decoded image, held in memory until written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryImage {
    chunks: Vec<Chunk>,
    start_address: Option<u32>,
    records: usize,
    terminated: bool,
}

impl MemoryImage {
    /// Decodes the whole image without touching any memory.
    ///
    /// # Errors
    ///
    /// The first `LoadError` in the text.
    pub fn parse(text: &str, verify_checksums: bool) -> Result<Self, LoadError> {
        let mut decoder = Decoder::new(text, verify_checksums);
        let chunks = decoder.by_ref().collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            chunks,
            start_address: decoder.start_address,
            records: decoder.records,
            terminated: decoder.saw_eof,
        })
    }

    /// Data chunks in file order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Every `(address, byte)` pair in file order.
    pub fn bytes(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.chunks.iter().flat_map(|c| {
            c.bytes
                .iter()
                .enumerate()
                .map(move |(i, b)| (c.address.wrapping_add(i as u32), *b))
        })
    }

    /// Total payload bytes.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.bytes.len()).sum()
    }

    /// Returns `true` if the image carries no data.
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.bytes.is_empty())
    }

    /// Entry point declared by a start-address record, if any.
    pub const fn start_address(&self) -> Option<u32> {
        self.start_address
    }

    /// Writes every chunk into `target` at `base_offset + address`.
    pub fn write_to(&self, target: &mut dyn MemorySink, base_offset: u32) -> LoadSummary {
        for chunk in &self.chunks {
            target.write_bytes(base_offset.wrapping_add(chunk.address), &chunk.bytes);
        }
        LoadSummary {
            records: self.records,
            bytes: self.len(),
            start_address: self.start_address,
            terminated: self.terminated,
        }
    }
}
