//! # Physical pools
//!
//! The frames above the reserved low region are split into two pools: the
//! kernel pool (lower half) and the user pool (upper half). Each pool is a
//! [`Bitmap`] over its own contiguous range; one bit per 4 KiB frame.

use crate::bitmap::Bitmap;
use core::fmt;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::{FrameAlloc, PageEntry};

/// Which physical pool an allocation draws from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Kernel,
    User,
}

impl PoolKind {
    /// Leaf permissions for pages handed out from this pool.
    #[must_use]
    pub const fn leaf_flags(self) -> PageEntry {
        match self {
            Self::Kernel => PageEntry::new_kernel_rw(),
            Self::User => PageEntry::new_user_rw(),
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Kernel => "kernel",
            Self::User => "user",
        })
    }
}

/// A contiguous run of physical frames tracked by a bitmap.
pub struct PhysicalPool<'a> {
    kind: PoolKind,
    bitmap: Bitmap<'a>,
    phys_base: PhysicalAddress,
    byte_size: u32,
}

impl<'a> PhysicalPool<'a> {
    /// Builds a pool of `storage.len() * 8` frames at `phys_base` and marks
    /// all of them free.
    pub fn new(kind: PoolKind, storage: &'a mut [u8], phys_base: PhysicalAddress, byte_size: u32) -> Self {
        debug_assert!(phys_base.is_aligned::<Size4K>());
        let mut bitmap = Bitmap::new(storage);
        bitmap.init();
        Self {
            kind,
            bitmap,
            phys_base,
            byte_size,
        }
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> PoolKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub const fn phys_base(&self) -> PhysicalAddress {
        self.phys_base
    }

    /// Size of the pool's range in bytes, as split at boot.
    #[inline]
    #[must_use]
    pub const fn byte_size(&self) -> u32 {
        self.byte_size
    }

    #[inline]
    #[must_use]
    pub const fn bitmap(&self) -> &Bitmap<'a> {
        &self.bitmap
    }

    /// Whether `pa` lies in a frame this pool tracks.
    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress) -> bool {
        pa >= self.phys_base && self.frame_index(pa) < self.bitmap.bit_count()
    }

    /// Takes the lowest free frame.
    pub fn alloc_one(&mut self) -> Option<PhysicalPage<Size4K>> {
        let idx = self.bitmap.scan(1)?;
        self.bitmap.set(idx, 1);
        let offset = u32::try_from(idx).ok()? * PAGE_SIZE;
        Some(PhysicalPage::containing_address(self.phys_base + offset))
    }

    /// Returns `frame` to the pool. Frames are never coalesced.
    ///
    /// # Panics
    /// If the frame is not part of this pool or is already free.
    pub fn free_one(&mut self, frame: PhysicalPage<Size4K>) {
        let pa = frame.base();
        assert!(self.contains(pa), "{pa} is not part of the {} pool", self.kind);
        let idx = self.frame_index(pa);
        assert!(self.bitmap.test(idx), "{pa} freed twice into the {} pool", self.kind);
        self.bitmap.set(idx, 0);
    }

    #[must_use]
    pub fn free_pages(&self) -> usize {
        self.bitmap.count_free()
    }

    #[inline]
    fn frame_index(&self, pa: PhysicalAddress) -> usize {
        ((pa.as_u32() - self.phys_base.as_u32()) / PAGE_SIZE) as usize
    }
}

impl FrameAlloc for PhysicalPool<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc_one()
    }
}

impl fmt::Debug for PhysicalPool<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalPool")
            .field("kind", &self.kind)
            .field("phys_base", &self.phys_base)
            .field("byte_size", &self.byte_size)
            .field("bitmap", &self.bitmap)
            .finish()
    }
}
