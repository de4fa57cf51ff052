//! The core engine: `Wale<B>`, its configuration, and every public
//! operation.

use std::cell::UnsafeCell;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::block_io::BlockIoOps;
use crate::buffer::AppendBuffer;
use crate::error::{WaleError, WaleResult};
use crate::framing::{crc32_of, RecordHeader, HEADER_SIZE, PAYLOAD_CRC_SIZE, RECORD_OVERHEAD};
use crate::lock::AppendBufferLock;
use crate::lsn::{Lsn, LSN_LIMBS};
use crate::master_record::{read_master_record, write_and_flush_master_record, MasterRecord};

/// Builder-style configuration: a `Default` plus chained setters, no
/// external config-loading crate.
#[derive(Clone)]
pub struct WaleConfig {
    buffer_block_count: u64,
    max_limit: Lsn,
    external_lock: Option<Arc<Mutex<()>>>,
}

impl WaleConfig {
    /// Defaults: a 4-block append buffer and the widest representable
    /// `max_limit`.
    pub fn new() -> WaleConfig {
        WaleConfig {
            buffer_block_count: 4,
            max_limit: Lsn::MAX,
            external_lock: None,
        }
    }

    /// Number of blocks held in the in-memory append buffer.
    pub fn buffer_block_count(mut self, count: u64) -> Self {
        self.buffer_block_count = count;
        self
    }

    /// The largest LSN this instance will ever assign.
    pub fn max_limit(mut self, max_limit: Lsn) -> Self {
        self.max_limit = max_limit;
        self
    }

    /// Share this instance's coordination mutex with an external one:
    /// callers that already serialize access to WALe through their own
    /// mutex can hand it in here so both identities agree. WALe still locks
    /// its own internal state mutex to satisfy Rust's aliasing rules; this
    /// additionally takes `lock` first so the two coordination points share
    /// one acquisition order.
    pub fn external_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.external_lock = Some(lock);
        self
    }
}

impl Default for WaleConfig {
    fn default() -> Self {
        WaleConfig::new()
    }
}

struct GlobalState {
    in_memory_master_record: MasterRecord,
}

/// The write-ahead log engine, generic over its block storage backend.
pub struct Wale<B: BlockIoOps> {
    io: B,
    block_size: u64,
    max_limit: Lsn,
    lsn_width: u16,
    external_lock: Option<Arc<Mutex<()>>>,
    global: Mutex<GlobalState>,
    scroll_cv: Condvar,
    buffer_lock: AppendBufferLock,
    buffer: UnsafeCell<AppendBuffer>,
    flushed_view: RwLock<MasterRecord>,
}

// SAFETY: `buffer` is only ever dereferenced while holding either
// `global` (for metadata fields) or `buffer_lock`'s shared/exclusive
// guard (for the byte contents), per the protocol documented on each
// accessor below. No `&Wale` method hands out a raw reference to it.
unsafe impl<B: BlockIoOps> Sync for Wale<B> {}

impl<B: BlockIoOps> Wale<B> {
    /// Initialize a WALe instance over `io`.
    ///
    /// If `next_lsn_seed` is [`Lsn::INVALID`], the existing master record is
    /// read back from block 0 (recovery). Otherwise a fresh, empty master
    /// record seeded with `next_lsn_seed` is written.
    pub fn initialize(io: B, config: WaleConfig, next_lsn_seed: Lsn) -> WaleResult<Wale<B>> {
        let block_size = io.block_size();
        let lsn_width = (LSN_LIMBS * 8) as u16;

        let mr = if next_lsn_seed == Lsn::INVALID {
            tracing::info!("recovering master record from existing log");
            read_master_record(&io)?
        } else {
            tracing::info!(next_lsn = %next_lsn_seed, "initializing fresh log");
            let fresh = MasterRecord::fresh(next_lsn_seed, lsn_width);
            write_and_flush_master_record(&io, &fresh)?;
            fresh
        };

        let mut buffer = AppendBuffer::new(block_size, config.buffer_block_count, 1)?;
        if mr.first_lsn.is_valid() {
            let next_offset = mr.next_lsn.sub(&mr.first_lsn)?.cast_to_u64()? + block_size;
            let block_id = next_offset / block_size;
            let within_block = next_offset % block_size;
            buffer.preload(&io, block_id, within_block)?;
        }

        Ok(Wale {
            io,
            block_size,
            max_limit: config.max_limit,
            lsn_width,
            external_lock: config.external_lock,
            global: Mutex::new(GlobalState {
                in_memory_master_record: mr,
            }),
            scroll_cv: Condvar::new(),
            buffer_lock: AppendBufferLock::new(),
            buffer: UnsafeCell::new(buffer),
            flushed_view: RwLock::new(mr),
        })
    }

    /// Release the engine's resources. A plain consuming drop: `Wale`'s
    /// fields tear themselves down (the append buffer's page-aligned
    /// allocation, the block device) via `Drop`. Exposed explicitly so
    /// callers have a named counterpart to `initialize`.
    pub fn deinitialize(self) -> WaleResult<()> {
        Ok(())
    }

    fn acquire_external(&self) -> Option<parking_lot::MutexGuard<'_, ()>> {
        self.external_lock.as_ref().map(|lock| lock.lock())
    }

    /// `true` once a scroll or flush has latched the engine into its
    /// absorbing error state; only reads and
    /// [`Wale::truncate_log_records`] remain permitted afterward.
    pub fn has_major_scroll_error(&self) -> bool {
        let _ext = self.acquire_external();
        let _global = self.global.lock();
        // SAFETY: `global` is held; `major_scroll_error` is only mutated
        // under this mutex (see `AppendBuffer::scroll` call sites below).
        unsafe { &*self.buffer.get() }.major_scroll_error
    }

    // ---- reader path ----------------------------------------------------

    pub fn first_lsn(&self) -> Lsn {
        self.flushed_view.read().first_lsn
    }

    pub fn last_flushed_lsn(&self) -> Lsn {
        self.flushed_view.read().last_flushed_lsn
    }

    pub fn check_point_lsn(&self) -> Lsn {
        self.flushed_view.read().check_point_lsn
    }

    pub fn next_lsn(&self) -> Lsn {
        self.flushed_view.read().next_lsn
    }

    pub fn lsn_width(&self) -> u16 {
        self.flushed_view.read().lsn_width
    }

    /// The file byte offset of `lsn`, given `view.first_lsn` as the
    /// durable range's base.
    fn file_offset_for(&self, view: &MasterRecord, lsn: Lsn) -> WaleResult<u64> {
        let relative = lsn.sub(&view.first_lsn)?;
        Ok(relative.cast_to_u64()? + self.block_size)
    }

    /// Read `len` bytes from the underlying file at byte offset `offset`,
    /// reading whatever whole blocks cover that range (the block I/O
    /// capability only reads in block-granular units).
    fn read_bytes_at(&self, offset: u64, len: u64) -> WaleResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let first_block = offset / self.block_size;
        let last_block = (offset + len - 1) / self.block_size;
        let count = last_block - first_block + 1;
        let mut block_buf = vec![0u8; (count * self.block_size) as usize];
        self.io.read_blocks(&mut block_buf, first_block, count)?;
        let start_in_block = (offset - first_block * self.block_size) as usize;
        Ok(block_buf[start_in_block..start_in_block + len as usize].to_vec())
    }

    fn read_header_at(&self, view: &MasterRecord, lsn: Lsn) -> WaleResult<RecordHeader> {
        let offset = self.file_offset_for(view, lsn)?;
        let bytes = self.read_bytes_at(offset, HEADER_SIZE)?;
        RecordHeader::parse(&bytes).map_err(|e| relabel_lsn(e, lsn))
    }

    /// Fails with [`WaleError::ParamInvalid`] if the log is empty or `lsn`
    /// is outside `[first_lsn, last_flushed_lsn]`.
    pub fn get_next_lsn_of(&self, lsn: Lsn) -> WaleResult<Lsn> {
        let view = self.flushed_view.read();
        self.check_in_durable_range(&view, lsn)?;
        if lsn == view.last_flushed_lsn {
            return Ok(Lsn::INVALID);
        }
        let header = self.read_header_at(&view, lsn)?;
        let step = Lsn::from_u64(RECORD_OVERHEAD + header.curr_size as u64);
        let next = lsn.add_with_limit(&step, &self.max_limit).map_err(|_| {
            WaleError::HeaderCorrupted {
                lsn: lsn.to_string(),
                details: "next lsn overflows max_limit".to_string(),
            }
        })?;
        if next > view.last_flushed_lsn {
            return Err(WaleError::HeaderCorrupted {
                lsn: lsn.to_string(),
                details: format!(
                    "computed next lsn {next} exceeds last_flushed_lsn {}",
                    view.last_flushed_lsn
                ),
            });
        }
        Ok(next)
    }

    /// Symmetric with [`Wale::get_next_lsn_of`].
    pub fn get_prev_lsn_of(&self, lsn: Lsn) -> WaleResult<Lsn> {
        let view = self.flushed_view.read();
        self.check_in_durable_range(&view, lsn)?;
        if lsn == view.first_lsn {
            return Ok(Lsn::INVALID);
        }
        let header = self.read_header_at(&view, lsn)?;
        let step = Lsn::from_u64(RECORD_OVERHEAD + header.prev_size as u64);
        let prev = lsn.sub(&step).map_err(|_| WaleError::HeaderCorrupted {
            lsn: lsn.to_string(),
            details: "prev lsn underflows".to_string(),
        })?;
        if prev < view.first_lsn {
            return Err(WaleError::HeaderCorrupted {
                lsn: lsn.to_string(),
                details: format!("computed prev lsn {prev} precedes first_lsn {}", view.first_lsn),
            });
        }
        Ok(prev)
    }

    fn check_in_durable_range(&self, view: &MasterRecord, lsn: Lsn) -> WaleResult<()> {
        if !view.first_lsn.is_valid() {
            return Err(WaleError::ParamInvalid("log is empty".to_string()));
        }
        if lsn < view.first_lsn || lsn > view.last_flushed_lsn {
            return Err(WaleError::ParamInvalid(format!(
                "lsn {lsn} not in durable range [{}, {}]",
                view.first_lsn, view.last_flushed_lsn
            )));
        }
        Ok(())
    }

    /// Read the full record at `lsn`: header, then payload, verifying the
    /// payload CRC.
    pub fn get_log_record_at(&self, lsn: Lsn) -> WaleResult<Vec<u8>> {
        let view = self.flushed_view.read();
        self.check_in_durable_range(&view, lsn)?;
        let header = self.read_header_at(&view, lsn)?;
        let offset = self.file_offset_for(&view, lsn)?;
        let next_offset = self.file_offset_for(&view, view.next_lsn)?;
        let end = offset + RECORD_OVERHEAD + header.curr_size as u64;
        if end > next_offset {
            return Err(WaleError::HeaderCorrupted {
                lsn: lsn.to_string(),
                details: "record extends past next_lsn".to_string(),
            });
        }

        let payload_start = offset + HEADER_SIZE;
        let payload_and_crc =
            self.read_bytes_at(payload_start, header.curr_size as u64 + PAYLOAD_CRC_SIZE)?;
        let payload = &payload_and_crc[..header.curr_size as usize];
        let stored_crc = LittleEndian::read_u32(&payload_and_crc[header.curr_size as usize..]);
        let computed_crc = crc32_of(payload);
        if stored_crc != computed_crc {
            tracing::warn!(%lsn, "payload crc mismatch reading log record");
            return Err(WaleError::LogRecordCorrupted {
                lsn: lsn.to_string(),
                details: format!("stored crc {stored_crc:#010x}, computed {computed_crc:#010x}"),
            });
        }
        Ok(payload.to_vec())
    }

    /// Like [`Wale::get_log_record_at`] but streams the payload through the
    /// CRC in block-sized chunks instead of returning it.
    pub fn validate_log_record_at(&self, lsn: Lsn) -> WaleResult<bool> {
        let view = self.flushed_view.read();
        self.check_in_durable_range(&view, lsn)?;
        let header = self.read_header_at(&view, lsn)?;
        let offset = self.file_offset_for(&view, lsn)?;
        let next_offset = self.file_offset_for(&view, view.next_lsn)?;
        let end = offset + RECORD_OVERHEAD + header.curr_size as u64;
        if end > next_offset {
            return Err(WaleError::HeaderCorrupted {
                lsn: lsn.to_string(),
                details: "record extends past next_lsn".to_string(),
            });
        }

        let mut hasher = Hasher::new();
        let mut pos = offset + HEADER_SIZE;
        let mut remaining = header.curr_size as u64;
        while remaining > 0 {
            let take = remaining.min(self.block_size);
            let chunk = self.read_bytes_at(pos, take)?;
            hasher.update(&chunk);
            pos += take;
            remaining -= take;
        }
        let computed = hasher.finalize();
        let crc_bytes = self.read_bytes_at(pos, PAYLOAD_CRC_SIZE)?;
        let stored = LittleEndian::read_u32(&crc_bytes);
        if stored != computed {
            tracing::warn!(%lsn, "payload crc mismatch validating log record");
        }
        Ok(stored == computed)
    }

    // ---- appender protocol ------------------------------------------------

    /// Assign a new LSN to `payload`, reserve its place in the append
    /// buffer, and stream it in. Returns [`Lsn::INVALID`] (no error) if
    /// `max_limit` would be exceeded or the engine is already latched into
    /// its fatal state; returns `Err` if this call is the one that
    /// triggers a scroll failure.
    pub fn append_log_record(&self, payload: &[u8], is_checkpoint: bool) -> WaleResult<Lsn> {
        let _ext = self.acquire_external();
        let mut shared = self.buffer_lock.acquire_shared();

        loop {
            let (latched, within_window) = {
                let global = self.global.lock();
                // SAFETY: `global` held; reads only metadata fields.
                let buffer = unsafe { &*self.buffer.get() };
                if buffer.major_scroll_error {
                    (true, false)
                } else {
                    let offset = self
                        .file_offset_for_next(&global.in_memory_master_record)
                        .unwrap_or(u64::MAX);
                    (false, buffer.offset_within_window(offset))
                }
            };
            if latched {
                return Ok(Lsn::INVALID);
            }
            if within_window {
                break;
            }
            drop(shared);
            {
                let mut global = self.global.lock();
                loop {
                    // SAFETY: `global` held for the duration of this check.
                    let buffer = unsafe { &*self.buffer.get() };
                    if buffer.major_scroll_error {
                        break;
                    }
                    let offset = self
                        .file_offset_for_next(&global.in_memory_master_record)
                        .unwrap_or(u64::MAX);
                    if buffer.offset_within_window(offset) {
                        break;
                    }
                    self.scroll_cv.wait(&mut global);
                }
            }
            shared = self.buffer_lock.acquire_shared();
        }

        let (assigned_lsn, append_slot, prev_size) = {
            let mut global = self.global.lock();
            // SAFETY: `global` held; mutates metadata fields only.
            let buffer = unsafe { &mut *self.buffer.get() };
            if buffer.major_scroll_error {
                return Ok(Lsn::INVALID);
            }
            let mr = &mut global.in_memory_master_record;
            let assigned_lsn = mr.next_lsn;
            let slot_size = RECORD_OVERHEAD + payload.len() as u64;
            let new_next = match assigned_lsn.add_with_limit(&Lsn::from_u64(slot_size), &self.max_limit) {
                Ok(v) => v,
                Err(_) => return Ok(Lsn::INVALID),
            };

            let prev_size: u32 = if mr.last_flushed_lsn.is_valid() {
                let distance = assigned_lsn.sub(&mr.last_flushed_lsn)?.cast_to_u64()?;
                (distance - RECORD_OVERHEAD) as u32
            } else {
                0
            };

            mr.next_lsn = new_next;
            if !mr.first_lsn.is_valid() {
                mr.first_lsn = assigned_lsn;
            }
            mr.last_flushed_lsn = assigned_lsn;
            if is_checkpoint {
                mr.check_point_lsn = assigned_lsn;
            }

            let append_slot = buffer.append_offset;
            let available = buffer.capacity() - append_slot;
            buffer.append_offset += slot_size.min(available);

            (assigned_lsn, append_slot, prev_size)
        };

        let header_bytes = RecordHeader::to_bytes(prev_size, payload.len() as u32);
        let payload_crc = crc32_of(payload);
        let mut record_bytes = Vec::with_capacity(RECORD_OVERHEAD as usize + payload.len());
        record_bytes.extend_from_slice(&header_bytes);
        record_bytes.extend_from_slice(payload);
        record_bytes.extend_from_slice(&payload_crc.to_le_bytes());

        match self.stream_into_buffer(shared, append_slot, &record_bytes) {
            Ok(_shared) => Ok(assigned_lsn),
            Err(e) => Err(e),
        }
    }

    /// The file offset `in_memory_master_record.next_lsn` would occupy.
    /// `block_size` if the log is still empty.
    fn file_offset_for_next(&self, mr: &MasterRecord) -> WaleResult<u64> {
        if !mr.first_lsn.is_valid() {
            return Ok(self.block_size);
        }
        self.file_offset_for(mr, mr.next_lsn)
    }

    /// Stream `data` into the buffer starting at in-buffer offset
    /// `cursor`, scrolling in place whenever the write reaches the current
    /// buffer end.
    fn stream_into_buffer<'a>(
        &'a self,
        mut shared: crate::lock::SharedGuard<'a>,
        mut cursor: u64,
        data: &[u8],
    ) -> WaleResult<crate::lock::SharedGuard<'a>> {
        let mut written = 0usize;
        while written < data.len() {
            // SAFETY: the shared/exclusive discipline of `buffer_lock`
            // ensures distinct appenders only ever write disjoint byte
            // ranges concurrently, and the one holding exclusive (during
            // scroll below) has no concurrent byte writers at all.
            let buffer = unsafe { &mut *self.buffer.get() };
            let capacity = buffer.capacity();
            let space = (capacity - cursor) as usize;
            let take = space.min(data.len() - written);
            buffer.write_at(cursor, &data[written..written + take])?;
            cursor += take as u64;
            written += take;

            if cursor >= capacity && written < data.len() {
                let exclusive = shared.upgrade();
                let mut global = self.global.lock();
                // SAFETY: exclusive buffer lock held plus `global`.
                let buffer = unsafe { &mut *self.buffer.get() };
                if let Err(e) = buffer.scroll(&self.io) {
                    drop(global);
                    self.scroll_cv.notify_all();
                    drop(exclusive);
                    tracing::warn!(error = %e, "scroll failed mid-append; latching major_scroll_error");
                    return Err(e);
                }
                cursor = buffer.append_offset;
                let remaining = (data.len() - written) as u64;
                let space_after = buffer.capacity() - cursor;
                let advance = remaining.min(space_after);
                buffer.append_offset += advance;
                drop(global);
                self.scroll_cv.notify_all();
                shared = exclusive.downgrade();
            }
        }
        Ok(shared)
    }

    // ---- flush protocol -----------------------------------------------

    /// Drain the append buffer, scroll it fully to disk, and install a new
    /// durable master record. Returns [`Lsn::INVALID`] (no error) if the
    /// engine was already latched; returns `Err` if this call's own scroll
    /// or master-record write fails (newly latching the engine).
    pub fn flush_all_log_records(&self) -> WaleResult<Lsn> {
        let _ext = self.acquire_external();
        // Acquire the exclusive buffer lock before `global`, matching the
        // order a streaming appender uses when it upgrades mid-append
        // (`stream_into_buffer`): both paths take the buffer lock first and
        // only then `global`, so neither can hold `global` while blocked
        // waiting on the other's buffer-lock hold.
        let exclusive = self.buffer_lock.acquire_exclusive();
        let mut global = self.global.lock();

        // SAFETY: both `global` and the exclusive buffer lock are held.
        let buffer = unsafe { &mut *self.buffer.get() };
        if buffer.major_scroll_error {
            return Ok(Lsn::INVALID);
        }
        if let Err(e) = buffer.scroll(&self.io) {
            drop(exclusive);
            drop(global);
            self.scroll_cv.notify_all();
            tracing::warn!(error = %e, "scroll failed during flush; latching major_scroll_error");
            return Err(e);
        }
        self.scroll_cv.notify_all();

        let new_mr = global.in_memory_master_record;
        let mut flushed_write = self.flushed_view.write();
        drop(exclusive);
        drop(global);

        let io_result = self
            .io
            .flush_all_writes()
            .and_then(|_| write_and_flush_master_record(&self.io, &new_mr));

        let result = match io_result {
            Ok(()) => {
                *flushed_write = new_mr;
                tracing::debug!(last_flushed_lsn = %new_mr.last_flushed_lsn, "flush complete");
                Ok(new_mr.last_flushed_lsn)
            }
            Err(e) => Err(e),
        };
        // Reacquire the global mutex before releasing the flushed_view
        // write lock, to preserve a consistent lock-order discipline.
        let closing_global = self.global.lock();
        drop(flushed_write);
        drop(closing_global);
        result
    }

    // ---- truncate protocol ----------------------------------------------

    /// Reset the log to empty, preserving `next_lsn` so LSNs are never
    /// reused. Refuses if the engine is latched into its fatal state.
    pub fn truncate_log_records(&self) -> WaleResult<()> {
        let _ext = self.acquire_external();
        // See the matching comment in `flush_all_log_records`: acquire the
        // exclusive buffer lock before `global` so both paths agree on
        // lock order with a streaming appender's mid-append upgrade.
        let exclusive = self.buffer_lock.acquire_exclusive();
        let mut global = self.global.lock();

        // SAFETY: both `global` and the exclusive buffer lock are held.
        let buffer = unsafe { &mut *self.buffer.get() };
        if buffer.major_scroll_error {
            return Err(WaleError::MajorScrollError);
        }

        let mut flushed_write = self.flushed_view.write();

        let next_lsn = global.in_memory_master_record.next_lsn;
        let new_mr = MasterRecord::fresh(next_lsn, self.lsn_width);
        write_and_flush_master_record(&self.io, &new_mr)?;

        buffer.append_offset = 0;
        buffer.buffer_start_block_id = 1;
        global.in_memory_master_record = new_mr;
        *flushed_write = new_mr;

        tracing::info!(next_lsn = %next_lsn, "log truncated");
        Ok(())
    }
}

fn relabel_lsn(err: WaleError, lsn: Lsn) -> WaleError {
    match err {
        WaleError::HeaderCorrupted { details, .. } => WaleError::HeaderCorrupted {
            lsn: lsn.to_string(),
            details,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_io::MemBlockIo;

    fn new_engine(block_size: u64, buffer_blocks: u64) -> Wale<MemBlockIo> {
        let io = MemBlockIo::new(block_size);
        Wale::initialize(
            io,
            WaleConfig::new().buffer_block_count(buffer_blocks),
            Lsn::from_u64(1),
        )
        .unwrap()
    }

    #[test]
    fn s1_empty_append_flush_read() {
        let wale = new_engine(4096, 4);
        let lsn = wale.append_log_record(b"hello", false).unwrap();
        assert_eq!(lsn, Lsn::from_u64(1));
        let flushed = wale.flush_all_log_records().unwrap();
        assert_eq!(flushed, Lsn::from_u64(1));
        assert_eq!(wale.get_log_record_at(Lsn::from_u64(1)).unwrap(), b"hello");
        assert_eq!(wale.first_lsn(), Lsn::from_u64(1));
        assert_eq!(wale.last_flushed_lsn(), Lsn::from_u64(1));
        assert_eq!(wale.next_lsn(), Lsn::from_u64(22));
    }

    #[test]
    fn s2_two_records_and_checkpoint() {
        let wale = new_engine(4096, 4);
        wale.append_log_record(b"hello", false).unwrap();
        wale.flush_all_log_records().unwrap();

        let lsn2 = wale.append_log_record(b"world", true).unwrap();
        assert_eq!(lsn2, Lsn::from_u64(22));
        let lsn3 = wale.append_log_record(b"!", false).unwrap();
        assert_eq!(lsn3, Lsn::from_u64(43));

        let flushed = wale.flush_all_log_records().unwrap();
        assert_eq!(flushed, Lsn::from_u64(43));
        assert_eq!(wale.check_point_lsn(), Lsn::from_u64(22));
        assert_eq!(wale.get_prev_lsn_of(Lsn::from_u64(43)).unwrap(), Lsn::from_u64(22));
        assert_eq!(wale.get_next_lsn_of(Lsn::from_u64(22)).unwrap(), Lsn::from_u64(43));
    }

    #[test]
    fn s3_scroll_across_buffer() {
        let wale = new_engine(4096, 4); // 16 KiB buffer
        let record = vec![b'x'; 6 * 1024];
        let lsn1 = wale.append_log_record(&record, false).unwrap();
        let lsn2 = wale.append_log_record(&record, false).unwrap();
        let lsn3 = wale.append_log_record(&record, false).unwrap();
        let last = wale.flush_all_log_records().unwrap();
        assert_eq!(last, lsn3);

        assert_eq!(wale.get_log_record_at(lsn1).unwrap(), record);
        assert_eq!(wale.get_log_record_at(lsn2).unwrap(), record);
        assert_eq!(wale.get_log_record_at(lsn3).unwrap(), record);
    }

    #[test]
    fn s4_corruption_detected() {
        use std::sync::Arc;

        let io = Arc::new(MemBlockIo::new(4096));
        let wale = Wale::initialize(Arc::clone(&io), WaleConfig::new(), Lsn::from_u64(1)).unwrap();
        wale.append_log_record(b"hello", false).unwrap();
        wale.flush_all_log_records().unwrap();

        // Flip a byte inside the payload region of block 1 (right after
        // the block-0 master record).
        let mut block = vec![0u8; 4096];
        io.read_blocks(&mut block, 1, 1).unwrap();
        block[12] ^= 0xff; // first payload byte
        io.write_blocks(&block, 1, 1).unwrap();

        assert!(!wale.validate_log_record_at(Lsn::from_u64(1)).unwrap());
        assert!(wale.get_log_record_at(Lsn::from_u64(1)).is_err());
    }

    #[test]
    fn s5_truncate_preserves_next_lsn() {
        let wale = new_engine(4096, 4);
        wale.append_log_record(b"hello", false).unwrap();
        wale.flush_all_log_records().unwrap();
        wale.append_log_record(b"world", true).unwrap();
        wale.append_log_record(b"!", false).unwrap();
        wale.flush_all_log_records().unwrap();

        wale.truncate_log_records().unwrap();
        assert_eq!(wale.first_lsn(), Lsn::INVALID);
        assert_eq!(wale.last_flushed_lsn(), Lsn::INVALID);
        assert_eq!(wale.check_point_lsn(), Lsn::INVALID);
        assert_eq!(wale.next_lsn(), Lsn::from_u64(60));

        let lsn = wale.append_log_record(b"x", false).unwrap();
        assert_eq!(lsn, Lsn::from_u64(60));
        assert_eq!(wale.flush_all_log_records().unwrap(), Lsn::from_u64(60));
    }

    #[test]
    fn recovery_reads_back_flushed_state() {
        use std::sync::Arc;

        let io = Arc::new(MemBlockIo::new(4096));
        let lsn = {
            let wale = Wale::initialize(Arc::clone(&io), WaleConfig::new(), Lsn::from_u64(1)).unwrap();
            let lsn = wale.append_log_record(b"hello", false).unwrap();
            wale.flush_all_log_records().unwrap();
            wale.deinitialize().unwrap();
            lsn
        };

        // Re-initialize against the same backing store (simulating a
        // process restart) by seeding INVALID, which recovers the master
        // record from block 0 instead of writing a fresh one.
        let reopened = Wale::initialize(Arc::clone(&io), WaleConfig::new(), Lsn::INVALID).unwrap();
        assert_eq!(reopened.last_flushed_lsn(), lsn);
        assert_eq!(reopened.get_log_record_at(lsn).unwrap(), b"hello");
    }
}
