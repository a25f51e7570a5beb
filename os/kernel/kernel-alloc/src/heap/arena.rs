//! # Arena headers
//!
//! Every arena starts on a page boundary, so the arena of any heap pointer
//! is found by rounding the pointer down to its page.
//!
//! ```text
//! +0   class index + 1 (0 for large arenas)
//! +4   free block count (small) / page count (large)
//! +8   kind tag
//! +12  next arena on the class's partial list (0 = none)
//! +16  previous arena on that list (0 = none)
//! +20  first free block index (0xFF = none)
//! +32  small arenas: one link byte per block, then the 16-byte aligned blocks
//! ```
//!
//! Free blocks are chained by index through the link bytes, so nothing is
//! ever written into the blocks themselves.

use super::block_class::{ARENA_HEADER_SIZE, BlockClass};
use core::fmt;
use kernel_memory_addresses::{Size4K, VirtualAddress};
use kernel_vmem::Mmu;

const SMALL_TAG: u32 = u32::from_be_bytes(*b"SMAL");
const LARGE_TAG: u32 = u32::from_be_bytes(*b"LARG");

const CLASS: u32 = 0;
const UNITS: u32 = 4;
const TAG: u32 = 8;
const NEXT: u32 = 12;
const PREV: u32 = 16;
const FREE_HEAD: u32 = 20;

/// End of a free chain.
const NO_BLOCK: u8 = 0xFF;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArenaKind {
    /// Blocks of the class with this ladder index.
    Small { class: usize },
    /// One allocation spanning this many pages.
    Large { pages: u32 },
}

/// Handle to the header at the start of an arena page.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Arena {
    base: VirtualAddress,
}

impl Arena {
    #[inline]
    #[must_use]
    pub const fn at(base: VirtualAddress) -> Self {
        Self { base }
    }

    /// The arena holding `ptr`.
    #[inline]
    #[must_use]
    pub const fn containing(ptr: VirtualAddress) -> Self {
        Self::at(ptr.align_down::<Size4K>())
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        self.base
    }

    /// The address handed out for a large arena.
    #[inline]
    #[must_use]
    pub fn payload(self) -> VirtualAddress {
        self.base + ARENA_HEADER_SIZE
    }

    /// Stamps a small arena of class `index` on a zeroed page and chains
    /// all of its blocks in address order.
    ///
    /// # Safety
    /// The page at `base` must be mapped, writable and owned by the caller.
    #[allow(clippy::cast_possible_truncation)] // class indices are below BLOCK_CLASS_COUNT
    pub unsafe fn init_small<M: Mmu + ?Sized>(self, mmu: &M, index: usize, class: &BlockClass) {
        let blocks = class.blocks_per_arena();
        unsafe {
            self.write(mmu, CLASS, index as u32 + 1);
            self.write(mmu, UNITS, blocks);
            self.write(mmu, TAG, SMALL_TAG);
            self.write(mmu, NEXT, 0);
            self.write(mmu, PREV, 0);
            self.write(mmu, FREE_HEAD, 0);
            for i in 0..blocks {
                let next = u8::try_from(i + 1).ok().filter(|_| i + 1 < blocks).unwrap_or(NO_BLOCK);
                self.set_link(mmu, i, next);
            }
        }
    }

    /// Stamps a large arena spanning `pages` pages.
    ///
    /// # Safety
    /// As for [`init_small`](Self::init_small).
    pub unsafe fn init_large<M: Mmu + ?Sized>(self, mmu: &M, pages: u32) {
        unsafe {
            self.write(mmu, CLASS, 0);
            self.write(mmu, UNITS, pages);
            self.write(mmu, TAG, LARGE_TAG);
        }
    }

    /// Decodes the header.
    ///
    /// # Panics
    /// If the header does not carry a valid tag; the pointer that led here
    /// was not produced by the heap or the header was overwritten.
    ///
    /// # Safety
    /// The page at `base` must be mapped.
    pub unsafe fn kind<M: Mmu + ?Sized>(self, mmu: &M) -> ArenaKind {
        let (tag, class, units) = unsafe { (self.read(mmu, TAG), self.read(mmu, CLASS), self.read(mmu, UNITS)) };
        match (tag, class) {
            (LARGE_TAG, 0) => ArenaKind::Large { pages: units },
            (SMALL_TAG, c) if c > 0 => ArenaKind::Small { class: c as usize - 1 },
            _ => panic!("corrupt arena header at {}: tag {tag:#010x}, class {class}", self.base),
        }
    }

    /// Free blocks of a small arena, pages of a large one.
    ///
    /// # Safety
    /// The page at `base` must be mapped.
    pub unsafe fn units<M: Mmu + ?Sized>(self, mmu: &M) -> u32 {
        unsafe { self.read(mmu, UNITS) }
    }

    /// Takes the first free block off the arena's chain.
    ///
    /// # Safety
    /// The arena must be a mapped small arena of `class`.
    pub unsafe fn pop_block<M: Mmu + ?Sized>(self, mmu: &M, class: &BlockClass) -> Option<VirtualAddress> {
        unsafe {
            let head = self.free_head(mmu)?;
            let next = self.link(mmu, head);
            self.write(mmu, FREE_HEAD, u32::from(next));
            let units = self.read(mmu, UNITS);
            self.write(mmu, UNITS, units - 1);
            Some(self.block(class, head))
        }
    }

    /// Puts `block` back on the arena's chain and returns the new free count.
    ///
    /// # Panics
    /// If `block` is not on a block boundary of this arena or is already
    /// on the chain.
    ///
    /// # Safety
    /// The arena must be a mapped small arena of `class`.
    pub unsafe fn push_block<M: Mmu + ?Sized>(self, mmu: &M, class: &BlockClass, block: VirtualAddress) -> u32 {
        let idx = self.block_index(class, block);
        unsafe {
            let mut cursor = self.free_head(mmu);
            while let Some(free) = cursor {
                assert_ne!(free, idx, "double free of {block}");
                cursor = self.next_free(mmu, free);
            }

            let head = self.free_head(mmu).and_then(|h| u8::try_from(h).ok()).unwrap_or(NO_BLOCK);
            self.set_link(mmu, idx, head);
            self.write(mmu, FREE_HEAD, idx);
            let units = self.read(mmu, UNITS) + 1;
            self.write(mmu, UNITS, units);
            units
        }
    }

    /// # Safety
    /// The page at `base` must be mapped.
    pub unsafe fn next<M: Mmu + ?Sized>(self, mmu: &M) -> Option<VirtualAddress> {
        unsafe { Self::decode_link(self.read(mmu, NEXT)) }
    }

    /// # Safety
    /// The page at `base` must be mapped.
    pub unsafe fn prev<M: Mmu + ?Sized>(self, mmu: &M) -> Option<VirtualAddress> {
        unsafe { Self::decode_link(self.read(mmu, PREV)) }
    }

    /// # Safety
    /// The page at `base` must be mapped and writable.
    pub unsafe fn set_next<M: Mmu + ?Sized>(self, mmu: &M, next: Option<VirtualAddress>) {
        unsafe { self.write(mmu, NEXT, next.map_or(0, VirtualAddress::as_u32)) }
    }

    /// # Safety
    /// The page at `base` must be mapped and writable.
    pub unsafe fn set_prev<M: Mmu + ?Sized>(self, mmu: &M, prev: Option<VirtualAddress>) {
        unsafe { self.write(mmu, PREV, prev.map_or(0, VirtualAddress::as_u32)) }
    }

    fn block(self, class: &BlockClass, idx: u32) -> VirtualAddress {
        self.base + class.blocks_offset() + idx * class.block_size()
    }

    fn block_index(self, class: &BlockClass, block: VirtualAddress) -> u32 {
        let first = self.base + class.blocks_offset();
        let end = first + class.blocks_per_arena() * class.block_size();
        assert!(
            block >= first && block < end && (block.as_u32() - first.as_u32()) % class.block_size() == 0,
            "{block} is not a {}-byte block of the arena at {}",
            class.block_size(),
            self.base
        );
        (block.as_u32() - first.as_u32()) / class.block_size()
    }

    const fn decode_link(raw: u32) -> Option<VirtualAddress> {
        if raw == 0 {
            None
        } else {
            Some(VirtualAddress::new(raw))
        }
    }

    unsafe fn free_head<M: Mmu + ?Sized>(self, mmu: &M) -> Option<u32> {
        let head = unsafe { self.read(mmu, FREE_HEAD) };
        (head != u32::from(NO_BLOCK)).then_some(head)
    }

    unsafe fn next_free<M: Mmu + ?Sized>(self, mmu: &M, idx: u32) -> Option<u32> {
        let next = unsafe { self.link(mmu, idx) };
        (next != NO_BLOCK).then_some(u32::from(next))
    }

    unsafe fn link<M: Mmu + ?Sized>(self, mmu: &M, idx: u32) -> u8 {
        unsafe { mmu.read_u8(self.base + ARENA_HEADER_SIZE + idx) }
    }

    unsafe fn set_link<M: Mmu + ?Sized>(self, mmu: &M, idx: u32, next: u8) {
        unsafe { mmu.write_u8(self.base + ARENA_HEADER_SIZE + idx, next) }
    }

    unsafe fn read<M: Mmu + ?Sized>(self, mmu: &M, field: u32) -> u32 {
        unsafe { mmu.read_u32(self.base + field) }
    }

    unsafe fn write<M: Mmu + ?Sized>(self, mmu: &M, field: u32, value: u32) {
        unsafe { mmu.write_u32(self.base + field, value) }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Arena({})", self.base)
    }
}
