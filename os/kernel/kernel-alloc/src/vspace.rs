//! # Virtual spaces
//!
//! One bit per virtual page starting at a fixed base. The kernel owns one
//! space starting at the kernel heap; every process owns one starting at the
//! user image base.

use crate::bitmap::Bitmap;
use core::fmt;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{Size4K, VirtualAddress};

pub struct VirtualSpace<'a> {
    bitmap: Bitmap<'a>,
    base: VirtualAddress,
}

impl<'a> VirtualSpace<'a> {
    /// A space of `storage.len() * 8` pages at `base`, all free.
    pub fn new(storage: &'a mut [u8], base: VirtualAddress) -> Self {
        debug_assert!(base.is_aligned::<Size4K>());
        let mut bitmap = Bitmap::new(storage);
        bitmap.init();
        Self { bitmap, base }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn bitmap(&self) -> &Bitmap<'a> {
        &self.bitmap
    }

    /// Reserves the first run of `pg_cnt` free pages.
    pub fn alloc(&mut self, pg_cnt: usize) -> Option<VirtualAddress> {
        let idx = self.bitmap.scan(pg_cnt)?;
        self.bitmap.set_range(idx, pg_cnt, 1);
        let offset = u32::try_from(idx).ok()? * PAGE_SIZE;
        Some(self.base + offset)
    }

    /// Releases `pg_cnt` pages starting at `va`.
    pub fn free(&mut self, va: VirtualAddress, pg_cnt: usize) {
        let idx = self.page_index(va);
        self.bitmap.set_range(idx, pg_cnt, 0);
    }

    /// Marks the single page at `va` as used without searching.
    ///
    /// # Panics
    /// If `va` is the first page of the space; that page is never handed out
    /// by address.
    pub fn reserve(&mut self, va: VirtualAddress) {
        let idx = self.page_index(va);
        assert!(idx > 0, "{va} is the first page of the space at {}", self.base);
        self.bitmap.set(idx, 1);
    }

    /// Whether `va` falls inside this space.
    #[must_use]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        va >= self.base && (((va.as_u32() - self.base.as_u32()) / PAGE_SIZE) as usize) < self.bitmap.bit_count()
    }

    fn page_index(&self, va: VirtualAddress) -> usize {
        assert!(
            va.is_aligned::<Size4K>() && va >= self.base,
            "{va} is not a page of the space at {}",
            self.base
        );
        ((va.as_u32() - self.base.as_u32()) / PAGE_SIZE) as usize
    }
}

impl fmt::Debug for VirtualSpace<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualSpace")
            .field("base", &self.base)
            .field("bitmap", &self.bitmap)
            .finish()
    }
}
