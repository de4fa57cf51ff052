//! On-disk framing for individual log records.
//!
//! ```text
//! prev_size(4) curr_size(4) header_crc(4) | payload(curr_size) | payload_crc(4)
//! ```
//! The 12-byte header covers the previous and current record's payload
//! lengths so the random-reader path can walk the log in either direction
//! without consulting anything but the header itself.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{WaleError, WaleResult};

/// Size in bytes of the fixed record header (`prev_size` + `curr_size` +
/// `header_crc`).
pub const HEADER_SIZE: u64 = 12;

/// Size in bytes of the trailing payload CRC.
pub const PAYLOAD_CRC_SIZE: u64 = 4;

/// Total non-payload bytes a record occupies on disk.
pub const RECORD_OVERHEAD: u64 = HEADER_SIZE + PAYLOAD_CRC_SIZE;

/// A decoded, CRC-verified record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub prev_size: u32,
    pub curr_size: u32,
}

impl RecordHeader {
    /// Serialize `(prev_size, curr_size, header_crc)` ready to write to disk.
    pub fn to_bytes(prev_size: u32, curr_size: u32) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        {
            let mut cursor = &mut buf[0..8];
            cursor.write_u32::<LittleEndian>(prev_size).unwrap();
            cursor.write_u32::<LittleEndian>(curr_size).unwrap();
        }
        let crc = crc32_of(&buf[0..8]);
        (&mut buf[8..12])
            .write_u32::<LittleEndian>(crc)
            .unwrap();
        buf
    }

    /// Parse and CRC-validate a 12-byte header.
    pub fn parse(bytes: &[u8]) -> WaleResult<RecordHeader> {
        if bytes.len() != HEADER_SIZE as usize {
            return Err(WaleError::HeaderCorrupted {
                lsn: "?".to_string(),
                details: format!("expected {HEADER_SIZE} header bytes, got {}", bytes.len()),
            });
        }
        let mut prefix = &bytes[0..8];
        let prev_size = prefix.read_u32::<LittleEndian>().unwrap();
        let curr_size = prefix.read_u32::<LittleEndian>().unwrap();
        let stored_crc = (&bytes[8..12]).read_u32::<LittleEndian>().unwrap();
        let computed_crc = crc32_of(&bytes[0..8]);
        if stored_crc != computed_crc {
            return Err(WaleError::HeaderCorrupted {
                lsn: "?".to_string(),
                details: format!(
                    "header crc mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
                ),
            });
        }
        Ok(RecordHeader {
            prev_size,
            curr_size,
        })
    }
}

/// CRC-32 (IEEE polynomial, the default `crc32fast` configuration) of `data`.
pub fn crc32_of(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Total slot size (header + payload + payload CRC) for a `curr_size`-byte
/// payload.
pub fn record_slot_size(curr_size: u32) -> u64 {
    RECORD_OVERHEAD + curr_size as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let bytes = RecordHeader::to_bytes(0, 5);
        let header = RecordHeader::parse(&bytes).unwrap();
        assert_eq!(header.prev_size, 0);
        assert_eq!(header.curr_size, 5);
    }

    #[test]
    fn header_detects_bit_flip() {
        let mut bytes = RecordHeader::to_bytes(10, 20);
        bytes[0] ^= 0x01;
        assert!(RecordHeader::parse(&bytes).is_err());
    }

    #[test]
    fn slot_size_matches_overhead() {
        assert_eq!(record_slot_size(5), 16 + 5);
    }

    #[test]
    fn payload_crc_detects_corruption() {
        let payload = b"hello world";
        let crc = crc32_of(payload);
        let mut corrupted = payload.to_vec();
        corrupted[0] ^= 0xff;
        assert_ne!(crc32_of(&corrupted), crc);
    }
}
