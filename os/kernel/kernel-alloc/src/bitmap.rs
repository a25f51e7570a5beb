//! # Bitmap
//!
//! A fixed-capacity bit vector over borrowed storage. A set bit means the
//! tracked resource (frame or virtual page) is in use.

use core::fmt;

/// Bit vector with first-fit run search.
///
/// Bit `i` lives in byte `i / 8` at position `i % 8` (LSB first), which is the
/// layout the boot metadata window is laid out for.
pub struct Bitmap<'a> {
    bytes: &'a mut [u8],
    bit_count: usize,
}

impl<'a> Bitmap<'a> {
    /// Tracks `bytes.len() * 8` bits. The storage is used as is; call
    /// [`init`](Self::init) to clear it.
    #[inline]
    pub const fn new(bytes: &'a mut [u8]) -> Self {
        let bit_count = bytes.len() * 8;
        Self { bytes, bit_count }
    }

    /// Clears every bit.
    pub fn init(&mut self) {
        self.bytes.fill(0);
    }

    #[inline]
    #[must_use]
    pub const fn bit_count(&self) -> usize {
        self.bit_count
    }

    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &*self.bytes
    }

    /// Whether bit `idx` is set.
    ///
    /// # Panics
    /// If `idx` is outside the bitmap.
    #[inline]
    #[must_use]
    pub fn test(&self, idx: usize) -> bool {
        self.check_index(idx);
        self.bytes[idx / 8] & (1 << (idx % 8)) != 0
    }

    /// Sets bit `idx` to `value`.
    ///
    /// # Panics
    /// If `value` is neither 0 nor 1, or `idx` is outside the bitmap.
    pub fn set(&mut self, idx: usize, value: u8) {
        assert!(value <= 1, "bitmap value must be 0 or 1, got {value}");
        self.check_index(idx);
        let mask = 1 << (idx % 8);
        if value == 1 {
            self.bytes[idx / 8] |= mask;
        } else {
            self.bytes[idx / 8] &= !mask;
        }
    }

    /// Sets `count` bits starting at `start` to `value`.
    pub fn set_range(&mut self, start: usize, count: usize, value: u8) {
        for idx in start..start + count {
            self.set(idx, value);
        }
    }

    /// Finds the first run of `cnt` clear bits and returns its start.
    ///
    /// Fully used bytes are skipped to find the first clear bit. From there
    /// the run is counted bit by bit; a set bit restarts the count right after
    /// it. The search is first-fit, so the lowest fitting run wins.
    #[must_use]
    pub fn scan(&self, cnt: usize) -> Option<usize> {
        if cnt == 0 {
            return None;
        }

        let byte = self.bytes.iter().position(|&b| b != 0xFF)?;
        let start = byte * 8 + self.bytes[byte].trailing_ones() as usize;
        if start >= self.bit_count {
            return None;
        }
        if cnt == 1 {
            return Some(start);
        }

        let mut run = 1;
        for next in start + 1..self.bit_count {
            if self.test(next) {
                run = 0;
            } else {
                run += 1;
                if run == cnt {
                    return Some(next + 1 - cnt);
                }
            }
        }
        None
    }

    /// Number of clear bits.
    #[must_use]
    pub fn count_free(&self) -> usize {
        let set: usize = self.bytes.iter().map(|b| b.count_ones() as usize).sum();
        self.bit_count - set
    }

    #[inline]
    fn check_index(&self, idx: usize) {
        assert!(
            idx < self.bit_count,
            "bit {idx} outside a bitmap of {} bits",
            self.bit_count
        );
    }
}

impl fmt::Debug for Bitmap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("bit_count", &self.bit_count)
            .field("free", &self.count_free())
            .finish()
    }
}
