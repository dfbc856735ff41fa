use std::collections::TryReserveError;

use tracing::trace;

/// Largest event log the downstream format can describe: its length field
/// is 16 bits wide.
pub const CAPACITY: usize = u16::MAX as usize;

/// Fixed-size, zero-initialized byte arena holding the retained prefix of an
/// event log.
///
/// The backing storage is always exactly [`CAPACITY`] bytes, whatever the
/// size of the file it is filled from. Only the first [`filled`] bytes are
/// meaningful.
///
/// [`filled`]: BoundedBuffer::filled
pub struct BoundedBuffer {
    data: Box<[u8]>,
    filled: usize,
}

impl BoundedBuffer {
    pub fn try_new() -> Result<Self, TryReserveError> {
        let mut data = Vec::new();
        data.try_reserve_exact(CAPACITY)?;
        data.resize(CAPACITY, 0);
        trace!(capacity = CAPACITY, "allocated event log buffer");

        Ok(Self {
            data: data.into_boxed_slice(),
            filled: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    /// The retained bytes.
    pub fn contents(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// The not yet filled tail of the arena.
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    /// Marks `n` more bytes of the tail as filled, clamped to the capacity.
    pub fn advance(&mut self, n: usize) {
        self.filled = self.filled.saturating_add(n).min(self.data.len());
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.data.len()
    }
}

impl Drop for BoundedBuffer {
    fn drop(&mut self) {
        trace!(filled = self.filled, "released event log buffer");
    }
}

/// Source of [`BoundedBuffer`]s.
pub trait BufferArena {
    fn allocate(&self) -> Result<BoundedBuffer, TryReserveError>;
}

/// Allocates on the heap, failing instead of aborting when memory is short.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapArena;

impl BufferArena for HeapArena {
    fn allocate(&self) -> Result<BoundedBuffer, TryReserveError> {
        BoundedBuffer::try_new()
    }
}
