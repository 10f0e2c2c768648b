//! Bounds-checked write cursor over a memory-mapped capture file.

use std::io;

use memmap2::MmapMut;

/// A fixed-capacity mapping filled front to back.
///
/// Bytes below the cursor are committed capture data; bytes at and above it
/// are free. The only way to write is [`CaptureRegion::reserve`], which hands
/// out the next `n` free bytes or nothing at all, so the cursor can never
/// pass the end of the mapping.
pub struct CaptureRegion {
    map: MmapMut,
    cursor: usize,
}

impl CaptureRegion {
    /// Wraps a writable mapping with the cursor at offset 0.
    pub fn new(map: MmapMut) -> Self {
        Self { map, cursor: 0 }
    }

    /// Total size of the mapping.
    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    /// Offset of the next free byte, which is also the number of bytes used.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Free bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.cursor
    }

    /// Whether `n` more bytes fit. Exactly filling the mapping fits.
    pub fn fits(&self, n: usize) -> bool {
        n <= self.remaining()
    }

    /// Claims the next `n` bytes and advances the cursor past them.
    ///
    /// Returns `None`, leaving the cursor untouched, if fewer than `n` bytes
    /// remain.
    pub fn reserve(&mut self, n: usize) -> Option<&mut [u8]> {
        if !self.fits(n) {
            return None;
        }
        let start = self.cursor;
        self.cursor += n;
        Some(&mut self.map[start..start + n])
    }

    /// Committed bytes, from offset 0 up to the cursor.
    pub fn used(&self) -> &[u8] {
        &self.map[..self.cursor]
    }

    /// Synchronously flushes the committed bytes to the backing file.
    ///
    /// # Errors
    ///
    /// Returns the underlying `msync` failure.
    pub fn flush_used(&self) -> io::Result<()> {
        if self.cursor == 0 {
            return Ok(());
        }
        self.map.flush_range(0, self.cursor)
    }
}

impl std::fmt::Debug for CaptureRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureRegion")
            .field("capacity", &self.capacity())
            .field("cursor", &self.cursor)
            .finish()
    }
}
