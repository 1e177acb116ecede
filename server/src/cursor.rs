//! Read cursor for the tailed log file.
//!
//! The cursor is the byte offset up to which the file has been consumed and
//! broadcast. It is written only by the engine's change cycle and read by both
//! the change cycle and snapshot paths.

use std::sync::atomic::{AtomicU64, Ordering};

/// Byte offset into the log file, shared between tasks.
///
/// Read-modify-write sequences are serialized by the engine's gate; the store
/// itself only guarantees that individual loads and stores are atomic.
#[derive(Debug, Default)]
pub struct CursorStore {
    offset: AtomicU64,
}

impl CursorStore {
    /// Creates a cursor positioned at `offset`.
    #[must_use]
    pub fn new(offset: u64) -> Self {
        Self {
            offset: AtomicU64::new(offset),
        }
    }

    /// Returns the current offset.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Moves the cursor to `offset`.
    pub fn set(&self, offset: u64) {
        self.offset.store(offset, Ordering::Release);
    }

    /// Rewinds the cursor to the start of the file after truncation.
    pub fn reset(&self) {
        self.set(0);
    }
}
