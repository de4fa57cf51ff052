//! `wale`: a durable, append-only write-ahead log.
//!
//! A [`Wale`] owns a fixed-block file: clients append opaque byte payloads
//! and receive a monotonically assigned [`Lsn`]; once
//! [`Wale::flush_all_log_records`] returns an LSN, every record up to and
//! including it is durable and randomly readable by LSN, with CRC-verified
//! framing and an on-disk master record naming the live LSN range.
//!
//! The engine is generic over its block storage via [`BlockIoOps`] —
//! [`FileBlockIo`] for real files, [`MemBlockIo`] for tests — so it can be
//! embedded in a larger storage system without committing to one I/O
//! backend.
//!
//! ```no_run
//! use wale::{Lsn, Wale, WaleConfig, FileBlockIo};
//!
//! # fn main() -> Result<(), wale::WaleError> {
//! let io = FileBlockIo::open("wale.log", 4096)?;
//! let log = Wale::initialize(io, WaleConfig::new(), Lsn::from_u64(1))?;
//! let lsn = log.append_log_record(b"hello", false)?;
//! log.flush_all_log_records()?;
//! assert_eq!(log.get_log_record_at(lsn)?, b"hello");
//! # Ok(())
//! # }
//! ```

mod block_io;
mod buffer;
mod error;
mod framing;
mod lock;
mod lsn;
mod master_record;
mod wale;

pub use block_io::{BlockIoOps, FileBlockIo, MemBlockIo};
pub use error::{WaleError, WaleResult};
pub use framing::{RecordHeader, HEADER_SIZE, PAYLOAD_CRC_SIZE, RECORD_OVERHEAD};
pub use lsn::{Lsn, LSN_LIMBS};
pub use master_record::MasterRecord;
pub use wale::{Wale, WaleConfig};
