//! # Boot memory layout
//!
//! Turns the probed amount of physical memory into pool ranges and bitmap
//! sizes.
//!
//! ```text
//! 0x0000_0000 ┌───────────────────────────┐
//!             │ low 1 MiB (loader, image) │
//! 0x0010_0000 ├───────────────────────────┤
//!             │ directory + 255 tables    │
//! 0x0020_0000 ├───────────────────────────┤ kernel_pool_base
//!             │ kernel pool (half)        │
//!             ├───────────────────────────┤ user_pool_base
//!             │ user pool (other half)    │
//!             └───────────────────────────┘ total_memory (rounded down)
//! ```
//!
//! The three boot bitmaps sit back to back in the metadata window at
//! `MEM_BITMAP_BASE`: kernel pool, user pool, kernel virtual space.

use crate::error::LayoutError;
use crate::pool::PoolKind;
use kernel_info::memory::{
    KERNEL_HEAP_START, KERNEL_SPACE_START, LOW_RESERVED_BYTES, MEM_BITMAP_WINDOW, PAGE_SIZE,
    STATIC_PAGE_TABLE_BYTES, TOTAL_MEMORY_PROBE_ADDR,
};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::Mmu;

/// Pool split derived from the total amount of physical memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    total_memory: u32,
    kernel_pool_base: PhysicalAddress,
    kernel_pages: u32,
    user_pool_base: PhysicalAddress,
    user_pages: u32,
}

impl MemoryLayout {
    /// Memory taken before the pools start.
    pub const RESERVED_BYTES: u32 = LOW_RESERVED_BYTES + STATIC_PAGE_TABLE_BYTES;

    /// Splits the frames above the reserved region evenly; the kernel pool
    /// gets the lower half and the user pool takes the odd frame.
    ///
    /// # Errors
    /// If `total_memory` does not cover the reserved region, or the bitmaps
    /// would not fit the metadata window.
    pub const fn from_total_memory(total_memory: u32) -> Result<Self, LayoutError> {
        if total_memory < Self::RESERVED_BYTES {
            return Err(LayoutError::TooLittleMemory {
                total: total_memory,
                reserved: Self::RESERVED_BYTES,
            });
        }

        let free_pages = (total_memory - Self::RESERVED_BYTES) / PAGE_SIZE;
        let kernel_pages = free_pages / 2;
        let user_pages = free_pages - kernel_pages;
        let kernel_pool_base = Self::RESERVED_BYTES;

        let layout = Self {
            total_memory,
            kernel_pool_base: PhysicalAddress::new(kernel_pool_base),
            kernel_pages,
            user_pool_base: PhysicalAddress::new(kernel_pool_base + kernel_pages * PAGE_SIZE),
            user_pages,
        };

        let needed = layout.bitmap_bytes_total();
        if needed > MEM_BITMAP_WINDOW as usize {
            return Err(LayoutError::BitmapWindowExceeded {
                needed,
                available: MEM_BITMAP_WINDOW as usize,
            });
        }
        Ok(layout)
    }

    /// Reads the memory size the loader stored at the probe address.
    ///
    /// # Safety
    /// The loader's mapping of the low 1 MiB at `KERNEL_SPACE_START` must be
    /// active.
    pub unsafe fn probe<M: Mmu + ?Sized>(mmu: &M) -> Result<Self, LayoutError> {
        let at = VirtualAddress::new(KERNEL_SPACE_START + TOTAL_MEMORY_PROBE_ADDR);
        let total = unsafe { mmu.read_u32(at) };
        Self::from_total_memory(total)
    }

    #[must_use]
    pub const fn total_memory(&self) -> u32 {
        self.total_memory
    }

    #[must_use]
    pub const fn pool_base(&self, kind: PoolKind) -> PhysicalAddress {
        match kind {
            PoolKind::Kernel => self.kernel_pool_base,
            PoolKind::User => self.user_pool_base,
        }
    }

    /// Frames in the pool before the bitmap rounds them down to whole bytes.
    #[must_use]
    pub const fn pool_pages(&self, kind: PoolKind) -> u32 {
        match kind {
            PoolKind::Kernel => self.kernel_pages,
            PoolKind::User => self.user_pages,
        }
    }

    #[must_use]
    pub const fn pool_bytes(&self, kind: PoolKind) -> u32 {
        self.pool_pages(kind) * PAGE_SIZE
    }

    /// Bitmap length of a pool. Trailing frames that do not fill a whole
    /// byte are never handed out.
    #[must_use]
    pub const fn pool_bitmap_bytes(&self, kind: PoolKind) -> usize {
        (self.pool_pages(kind) / 8) as usize
    }

    /// The kernel virtual space is as large as the kernel pool.
    #[must_use]
    pub const fn kernel_vspace_bitmap_bytes(&self) -> usize {
        self.pool_bitmap_bytes(PoolKind::Kernel)
    }

    #[must_use]
    pub const fn kernel_vspace_base(&self) -> VirtualAddress {
        VirtualAddress::new(KERNEL_HEAP_START)
    }

    #[must_use]
    pub const fn bitmap_bytes_total(&self) -> usize {
        self.pool_bitmap_bytes(PoolKind::Kernel)
            + self.pool_bitmap_bytes(PoolKind::User)
            + self.kernel_vspace_bitmap_bytes()
    }

    /// The pool owning `pa`. Pools are contiguous and ordered, so one
    /// comparison decides.
    #[must_use]
    pub fn pool_of(&self, pa: PhysicalAddress) -> PoolKind {
        if pa >= self.user_pool_base {
            PoolKind::User
        } else {
            PoolKind::Kernel
        }
    }
}

/// The three boot bitmaps carved out of one metadata region.
#[derive(Debug)]
pub struct BitmapStorage<'a> {
    pub kernel_pool: &'a mut [u8],
    pub user_pool: &'a mut [u8],
    pub kernel_vspace: &'a mut [u8],
}

impl<'a> BitmapStorage<'a> {
    /// Splits `region` in window order. Bytes past the three bitmaps are
    /// left alone.
    ///
    /// # Errors
    /// [`LayoutError::BitmapWindowExceeded`] if `region` is too short.
    pub fn carve(region: &'a mut [u8], layout: &MemoryLayout) -> Result<Self, LayoutError> {
        let needed = layout.bitmap_bytes_total();
        if region.len() < needed {
            return Err(LayoutError::BitmapWindowExceeded {
                needed,
                available: region.len(),
            });
        }

        let (kernel_pool, rest) = region.split_at_mut(layout.pool_bitmap_bytes(PoolKind::Kernel));
        let (user_pool, rest) = rest.split_at_mut(layout.pool_bitmap_bytes(PoolKind::User));
        let (kernel_vspace, _) = rest.split_at_mut(layout.kernel_vspace_bitmap_bytes());
        Ok(Self {
            kernel_pool,
            user_pool,
            kernel_vspace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u32 = 1024 * 1024;

    #[test]
    fn splits_32_mib_evenly() {
        let layout = MemoryLayout::from_total_memory(32 * MIB).unwrap();
        assert_eq!(layout.pool_base(PoolKind::Kernel).as_u32(), 0x0020_0000);
        assert_eq!(layout.pool_pages(PoolKind::Kernel), 3840);
        assert_eq!(layout.pool_pages(PoolKind::User), 3840);
        assert_eq!(layout.pool_base(PoolKind::User).as_u32(), 0x0110_0000);
        assert_eq!(layout.pool_bitmap_bytes(PoolKind::Kernel), 480);
        assert_eq!(layout.bitmap_bytes_total(), 1440);
        assert_eq!(layout.kernel_vspace_base().as_u32(), 0xC010_0000);
    }

    #[test]
    fn odd_frame_goes_to_the_user_pool() {
        let layout = MemoryLayout::from_total_memory(2 * MIB + 17 * 4096 + 100).unwrap();
        assert_eq!(layout.pool_pages(PoolKind::Kernel), 8);
        assert_eq!(layout.pool_pages(PoolKind::User), 9);
        assert_eq!(layout.pool_bitmap_bytes(PoolKind::User), 1);
    }

    #[test]
    fn pool_of_needs_a_single_comparison() {
        let layout = MemoryLayout::from_total_memory(32 * MIB).unwrap();
        assert_eq!(layout.pool_of(PhysicalAddress::new(0x0020_0000)), PoolKind::Kernel);
        assert_eq!(layout.pool_of(PhysicalAddress::new(0x010F_F000)), PoolKind::Kernel);
        assert_eq!(layout.pool_of(PhysicalAddress::new(0x0110_0000)), PoolKind::User);
    }

    #[test]
    fn rejects_machines_that_do_not_fit() {
        assert_eq!(
            MemoryLayout::from_total_memory(MIB),
            Err(LayoutError::TooLittleMemory {
                total: MIB,
                reserved: 2 * MIB
            })
        );
        assert!(matches!(
            MemoryLayout::from_total_memory(1024 * MIB),
            Err(LayoutError::BitmapWindowExceeded { available: 16384, .. })
        ));
    }

    #[test]
    fn carve_splits_in_window_order() {
        let layout = MemoryLayout::from_total_memory(32 * MIB).unwrap();
        let mut region = vec![0u8; 4096];
        let storage = BitmapStorage::carve(&mut region, &layout).unwrap();
        assert_eq!(storage.kernel_pool.len(), 480);
        assert_eq!(storage.user_pool.len(), 480);
        assert_eq!(storage.kernel_vspace.len(), 480);

        let mut short = [0u8; 100];
        assert!(BitmapStorage::carve(&mut short, &layout).is_err());
    }

    #[test]
    fn probe_reads_the_loader_value() {
        let mmu = kernel_vmem::SoftMmu::with_loader_tables(32 * MIB);
        let layout = unsafe { MemoryLayout::probe(&mmu) }.unwrap();
        assert_eq!(layout.total_memory(), 32 * MIB);
    }
}
