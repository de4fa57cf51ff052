//! Error taxonomy for the WALe engine.

use thiserror::Error;

/// All errors a WALe operation can surface.
///
/// Parameter errors and integrity errors never mutate engine state.
/// I/O errors encountered during a scroll or flush latch
/// [`crate::Wale::has_major_scroll_error`]; I/O errors encountered by a
/// reader do not.
#[derive(Debug, Error)]
pub enum WaleError {
    /// Caller queried outside the durable range, or an append would exceed
    /// `max_limit`.
    #[error("invalid parameter: {0}")]
    ParamInvalid(String),

    /// The underlying block device failed a read.
    #[error("read I/O error: {0}")]
    ReadIo(#[source] std::io::Error),

    /// The underlying block device failed a write.
    #[error("write I/O error: {0}")]
    WriteIo(#[source] std::io::Error),

    /// A record header failed its CRC check, or implied an offset outside
    /// the durable range.
    #[error("log record header corrupted at lsn {lsn}: {details}")]
    HeaderCorrupted { lsn: String, details: String },

    /// A record payload failed its CRC check.
    #[error("log record corrupted at lsn {lsn}: {details}")]
    LogRecordCorrupted { lsn: String, details: String },

    /// The block-0 master record failed its CRC check or magic/version
    /// validation.
    #[error("master record corrupted: {0}")]
    MasterRecordCorrupted(String),

    /// A buffer or block allocation failed.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// A scroll or flush previously failed a write and latched the engine
    /// into its absorbing error state.
    #[error("major scroll error: the engine can no longer append or flush")]
    MajorScrollError,
}

/// Convenience alias used throughout the crate.
pub type WaleResult<T> = Result<T, WaleError>;
