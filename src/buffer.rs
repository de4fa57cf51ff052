//! The in-memory append buffer and scroll protocol.
//!
//! The buffer is a page-aligned sliding window over the file: appenders
//! stream bytes into it directly, and `scroll` periodically writes whole
//! filled blocks out and slides the window forward.

use std::alloc::{alloc_zeroed, dealloc, Layout};

use crate::block_io::BlockIoOps;
use crate::error::{WaleError, WaleResult};

/// The OS page size assumed for buffer alignment.
const PAGE_SIZE: usize = 4096;

/// A page-aligned, zero-initialized byte buffer allocated with `std::alloc`.
///
/// No crate in the surrounding stack wraps page-aligned allocation, so this
/// reaches directly for `std::alloc::Layout` rather than inventing a
/// dependency for it.
struct AlignedBuffer {
    ptr: *mut u8,
    layout: Layout,
}

// SAFETY: the buffer is only ever accessed through `&self`/`&mut self`
// borrows of the owning `AppendBuffer`, which is itself guarded by
// `AppendBufferLock`; no raw pointer escapes this module.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    fn new(len: usize) -> WaleResult<AlignedBuffer> {
        let layout = Layout::from_size_align(len.max(1), PAGE_SIZE)
            .map_err(|e| WaleError::AllocationFailed(e.to_string()))?;
        // SAFETY: `layout` has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(WaleError::AllocationFailed(format!(
                "failed to allocate {len} page-aligned bytes"
            )));
        }
        Ok(AlignedBuffer { ptr, layout })
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `layout.size()` bytes for the lifetime
        // of `self`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.layout.size()) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: see `as_slice`; `&mut self` ensures exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.layout.size()) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`layout` are exactly what was passed to
        // `alloc_zeroed`.
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

/// The sliding append-buffer window plus its bookkeeping fields.
pub struct AppendBuffer {
    data: AlignedBuffer,
    block_size: u64,
    block_count: u64,
    /// The file block index corresponding to buffer offset 0.
    pub buffer_start_block_id: u64,
    /// Next writable byte within the buffer.
    pub append_offset: u64,
    /// Latched once a scroll or flush write fails. Once set, only reads and
    /// truncate remain permitted.
    pub major_scroll_error: bool,
}

impl AppendBuffer {
    /// Allocate a fresh, empty buffer of `block_count` blocks of
    /// `block_size` bytes, starting at file block `buffer_start_block_id`.
    pub fn new(
        block_size: u64,
        block_count: u64,
        buffer_start_block_id: u64,
    ) -> WaleResult<AppendBuffer> {
        let capacity = (block_size * block_count) as usize;
        Ok(AppendBuffer {
            data: AlignedBuffer::new(capacity)?,
            block_size,
            block_count,
            buffer_start_block_id,
            append_offset: 0,
            major_scroll_error: false,
        })
    }

    /// Total buffer capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.block_size * self.block_count
    }

    /// The file byte offset of the first byte still held in the buffer.
    pub fn window_start_offset(&self) -> u64 {
        self.buffer_start_block_id * self.block_size
    }

    /// The file byte offset one past the buffer window's end.
    pub fn window_end_offset(&self) -> u64 {
        self.window_start_offset() + self.capacity()
    }

    /// `true` if file offset `offset` currently falls within
    /// `[window_start_offset, window_end_offset)`.
    pub fn offset_within_window(&self, offset: u64) -> bool {
        offset >= self.window_start_offset() && offset < self.window_end_offset()
    }

    /// Copy `bytes` into the buffer starting at in-buffer position
    /// `at_offset`. The caller is responsible for ensuring the write does
    /// not cross the buffer end (split it across a scroll otherwise).
    pub fn write_at(&mut self, at_offset: u64, bytes: &[u8]) -> WaleResult<()> {
        let end = at_offset
            .checked_add(bytes.len() as u64)
            .ok_or_else(|| WaleError::ParamInvalid("buffer offset overflow".to_string()))?;
        if end > self.capacity() {
            return Err(WaleError::ParamInvalid(format!(
                "write of {} bytes at offset {at_offset} exceeds buffer capacity {}",
                bytes.len(),
                self.capacity()
            )));
        }
        let start = at_offset as usize;
        self.data.as_mut_slice()[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Read `len` bytes out of the buffer starting at in-buffer position
    /// `at_offset`.
    pub fn read_at(&self, at_offset: u64, len: usize) -> WaleResult<&[u8]> {
        let end = at_offset
            .checked_add(len as u64)
            .ok_or_else(|| WaleError::ParamInvalid("buffer offset overflow".to_string()))?;
        if end > self.capacity() {
            return Err(WaleError::ParamInvalid(format!(
                "read of {len} bytes at offset {at_offset} exceeds buffer capacity {}",
                self.capacity()
            )));
        }
        let start = at_offset as usize;
        Ok(&self.data.as_slice()[start..start + len])
    }

    /// Load `len` bytes from `io` at file block `block_id` into the start of
    /// the buffer, as part of initialization against a non-empty log: the
    /// partial block containing `next_lsn`'s offset must be preloaded before
    /// further appends can extend it.
    pub fn preload<B: BlockIoOps + ?Sized>(
        &mut self,
        io: &B,
        block_id: u64,
        len: u64,
    ) -> WaleResult<()> {
        let mut block = vec![0u8; self.block_size as usize];
        io.read_blocks(&mut block, block_id, 1)?;
        self.buffer_start_block_id = block_id;
        self.append_offset = len;
        self.data.as_mut_slice()[..self.block_size as usize].copy_from_slice(&block);
        Ok(())
    }

    /// Write out every whole, fully-written block preceding `append_offset`
    /// and slide the window forward over them.
    ///
    /// Must only be called while holding the exclusive append buffer lock
    /// and the global mutex. On I/O failure, latches `major_scroll_error`
    /// and returns the error; the buffer is left with no shift applied.
    pub fn scroll<B: BlockIoOps + ?Sized>(&mut self, io: &B) -> WaleResult<()> {
        let whole_blocks = self.append_offset / self.block_size;
        if whole_blocks == 0 {
            return Ok(());
        }
        let write_len = (whole_blocks * self.block_size) as usize;
        let result = io.write_blocks(
            &self.data.as_slice()[..write_len],
            self.buffer_start_block_id,
            whole_blocks,
        );
        if let Err(e) = result {
            self.major_scroll_error = true;
            return Err(e);
        }

        let tail_len = (self.append_offset - whole_blocks * self.block_size) as usize;
        self.data.as_mut_slice().copy_within(write_len..write_len + tail_len, 0);
        let capacity = self.capacity() as usize;
        self.data.as_mut_slice()[tail_len..capacity - write_len + tail_len]
            .iter_mut()
            .for_each(|b| *b = 0);

        self.buffer_start_block_id += whole_blocks;
        self.append_offset = tail_len as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_io::MemBlockIo;

    #[test]
    fn write_and_read_round_trip() {
        let mut buf = AppendBuffer::new(512, 4, 1).unwrap();
        buf.write_at(0, b"hello").unwrap();
        assert_eq!(buf.read_at(0, 5).unwrap(), b"hello");
    }

    #[test]
    fn write_past_capacity_fails() {
        let mut buf = AppendBuffer::new(512, 1, 1).unwrap();
        let oversized = vec![0u8; 600];
        assert!(buf.write_at(0, &oversized).is_err());
    }

    #[test]
    fn scroll_writes_whole_blocks_and_shifts_tail() {
        let io = MemBlockIo::new(16);
        let mut buf = AppendBuffer::new(16, 4, 1).unwrap();
        let payload = vec![9u8; 16 + 5]; // one whole block plus a 5-byte tail
        buf.write_at(0, &payload).unwrap();
        buf.append_offset = payload.len() as u64;

        buf.scroll(&io).unwrap();

        assert_eq!(buf.buffer_start_block_id, 2);
        assert_eq!(buf.append_offset, 5);
        assert_eq!(buf.read_at(0, 5).unwrap(), &payload[16..]);

        let mut written = vec![0u8; 16];
        io.read_blocks(&mut written, 1, 1).unwrap();
        assert_eq!(written, payload[..16]);
    }

    #[test]
    fn scroll_is_noop_with_no_whole_blocks() {
        let io = MemBlockIo::new(16);
        let mut buf = AppendBuffer::new(16, 4, 1).unwrap();
        buf.write_at(0, b"hi").unwrap();
        buf.append_offset = 2;
        buf.scroll(&io).unwrap();
        assert_eq!(buf.buffer_start_block_id, 1);
        assert_eq!(buf.append_offset, 2);
    }

    #[test]
    fn offset_within_window() {
        let buf = AppendBuffer::new(512, 4, 2).unwrap();
        assert!(buf.offset_within_window(2 * 512));
        assert!(!buf.offset_within_window(1 * 512));
        assert!(!buf.offset_within_window(6 * 512));
    }
}
