//! The block-0 master record: the single source of truth for the durable
//! LSN range.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::block_io::BlockIoOps;
use crate::error::{WaleError, WaleResult};
use crate::framing::crc32_of;
use crate::lsn::{Lsn, LSN_LIMBS};

/// Identifies a genuine WALe master record, as opposed to a foreign file or
/// an uninitialized one.
const MAGIC: &[u8; 8] = b"WALEMR01";

/// Current on-disk format version.
const FORMAT_VERSION: u16 = 1;

const LSN_FIELD_WIDTH: usize = LSN_LIMBS * 8;

/// `magic(8) + version(2) + lsn_width(2) + 4 lsn fields + crc32(4)`.
const MASTER_RECORD_SIZE: usize = 8 + 2 + 2 + 4 * LSN_FIELD_WIDTH + 4;

/// The decoded contents of block 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterRecord {
    pub lsn_width: u16,
    pub first_lsn: Lsn,
    pub check_point_lsn: Lsn,
    pub last_flushed_lsn: Lsn,
    pub next_lsn: Lsn,
}

impl MasterRecord {
    /// A brand-new, empty log's master record.
    pub fn fresh(next_lsn: Lsn, lsn_width: u16) -> MasterRecord {
        MasterRecord {
            lsn_width,
            first_lsn: Lsn::INVALID,
            check_point_lsn: Lsn::INVALID,
            last_flushed_lsn: Lsn::INVALID,
            next_lsn,
        }
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MASTER_RECORD_SIZE);
        buf.extend_from_slice(MAGIC);
        buf.write_u16::<LittleEndian>(FORMAT_VERSION).unwrap();
        buf.write_u16::<LittleEndian>(self.lsn_width).unwrap();
        for lsn in [
            self.first_lsn,
            self.check_point_lsn,
            self.last_flushed_lsn,
            self.next_lsn,
        ] {
            for limb in lsn.limbs() {
                buf.write_u64::<LittleEndian>(*limb).unwrap();
            }
        }
        let crc = crc32_of(&buf);
        buf.write_u32::<LittleEndian>(crc).unwrap();
        buf
    }

    fn from_bytes(bytes: &[u8]) -> WaleResult<MasterRecord> {
        if bytes.len() < MASTER_RECORD_SIZE {
            return Err(WaleError::MasterRecordCorrupted(format!(
                "expected at least {MASTER_RECORD_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        if &bytes[0..8] != MAGIC {
            return Err(WaleError::MasterRecordCorrupted(
                "bad magic: not a WALe master record".to_string(),
            ));
        }
        let body_len = MASTER_RECORD_SIZE - 4;
        let stored_crc = (&bytes[body_len..body_len + 4])
            .read_u32::<LittleEndian>()
            .unwrap();
        let computed_crc = crc32_of(&bytes[..body_len]);
        if stored_crc != computed_crc {
            return Err(WaleError::MasterRecordCorrupted(format!(
                "crc mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
            )));
        }

        let mut cursor = &bytes[8..];
        let version = cursor.read_u16::<LittleEndian>().unwrap();
        if version != FORMAT_VERSION {
            return Err(WaleError::MasterRecordCorrupted(format!(
                "unsupported format version {version}"
            )));
        }
        let lsn_width = cursor.read_u16::<LittleEndian>().unwrap();

        let mut read_lsn = |cursor: &mut &[u8]| -> Lsn {
            let mut limbs = [0u64; LSN_LIMBS];
            for limb in limbs.iter_mut() {
                *limb = cursor.read_u64::<LittleEndian>().unwrap();
            }
            Lsn::from_limbs(limbs)
        };
        let first_lsn = read_lsn(&mut cursor);
        let check_point_lsn = read_lsn(&mut cursor);
        let last_flushed_lsn = read_lsn(&mut cursor);
        let next_lsn = read_lsn(&mut cursor);

        Ok(MasterRecord {
            lsn_width,
            first_lsn,
            check_point_lsn,
            last_flushed_lsn,
            next_lsn,
        })
    }
}

/// Read and CRC-validate the master record from block 0.
pub fn read_master_record<B: BlockIoOps + ?Sized>(io: &B) -> WaleResult<MasterRecord> {
    let block_size = io.block_size();
    let mut buf = vec![0u8; block_size as usize];
    io.read_blocks(&mut buf, 0, 1)?;
    MasterRecord::from_bytes(&buf)
}

/// Serialize `mr` into block 0 and durably flush it.
///
/// Issues the block write followed by `flush_all_writes`; callers decide
/// whether a write-without-flush intermediate failure should latch
/// `major_scroll_error`.
pub fn write_and_flush_master_record<B: BlockIoOps + ?Sized>(
    io: &B,
    mr: &MasterRecord,
) -> WaleResult<()> {
    let block_size = io.block_size() as usize;
    let bytes = mr.to_bytes();
    if bytes.len() > block_size {
        return Err(WaleError::ParamInvalid(format!(
            "master record ({} bytes) does not fit in one block ({block_size} bytes)",
            bytes.len()
        )));
    }
    let mut buf = vec![0u8; block_size];
    buf[..bytes.len()].copy_from_slice(&bytes);
    io.write_blocks(&buf, 0, 1)?;
    io.flush_all_writes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_io::MemBlockIo;

    #[test]
    fn round_trips_through_block_io() {
        let io = MemBlockIo::new(4096);
        let mr = MasterRecord {
            lsn_width: 32,
            first_lsn: Lsn::from_u64(1),
            check_point_lsn: Lsn::from_u64(22),
            last_flushed_lsn: Lsn::from_u64(43),
            next_lsn: Lsn::from_u64(44),
        };
        write_and_flush_master_record(&io, &mr).unwrap();
        let read_back = read_master_record(&io).unwrap();
        assert_eq!(read_back, mr);
    }

    #[test]
    fn detects_bit_flip() {
        let io = MemBlockIo::new(4096);
        let mr = MasterRecord::fresh(Lsn::from_u64(1), 32);
        write_and_flush_master_record(&io, &mr).unwrap();

        let mut buf = vec![0u8; 4096];
        io.read_blocks(&mut buf, 0, 1).unwrap();
        buf[10] ^= 0xff;
        io.write_blocks(&buf, 0, 1).unwrap();

        assert!(read_master_record(&io).is_err());
    }

    #[test]
    fn rejects_foreign_magic() {
        let io = MemBlockIo::new(4096);
        let buf = vec![0u8; 4096];
        io.write_blocks(&buf, 0, 1).unwrap();
        assert!(read_master_record(&io).is_err());
    }
}
