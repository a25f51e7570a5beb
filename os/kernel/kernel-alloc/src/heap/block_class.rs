//! Block size classes and their partial-arena lists.

use super::arena::Arena;
use kernel_info::memory::{BLOCK_CLASS_COUNT, MIN_BLOCK_SIZE, PAGE_SIZE};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::Mmu;

/// Bytes at the start of every arena page reserved for its header.
pub const ARENA_HEADER_SIZE: u32 = 32;

/// Highest block index plus one; the link array uses `u8` entries and
/// reserves `0xFF` as terminator.
const MAX_BLOCKS_PER_ARENA: u32 = 255;

const BLOCK_ALIGN: u32 = 16;

/// One rung of the size ladder.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockClass {
    block_size: u32,
    blocks_per_arena: u32,
    blocks_offset: u32,
}

impl BlockClass {
    /// The largest block count whose header, link array and blocks fit
    /// into one page.
    #[must_use]
    pub const fn new(block_size: u32) -> Self {
        let mut count = (PAGE_SIZE - ARENA_HEADER_SIZE) / block_size;
        if count > MAX_BLOCKS_PER_ARENA {
            count = MAX_BLOCKS_PER_ARENA;
        }
        while Self::blocks_start(count) + count * block_size > PAGE_SIZE {
            count -= 1;
        }
        Self {
            block_size,
            blocks_per_arena: count,
            blocks_offset: Self::blocks_start(count),
        }
    }

    const fn blocks_start(count: u32) -> u32 {
        (ARENA_HEADER_SIZE + count).next_multiple_of(BLOCK_ALIGN)
    }

    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    #[inline]
    #[must_use]
    pub const fn blocks_per_arena(&self) -> u32 {
        self.blocks_per_arena
    }

    /// Offset of block 0 from the arena base.
    #[inline]
    #[must_use]
    pub const fn blocks_offset(&self) -> u32 {
        self.blocks_offset
    }
}

#[derive(Debug, Copy, Clone)]
struct ClassSlot {
    class: BlockClass,
    /// First arena of this class with at least one free block.
    partial: Option<VirtualAddress>,
}

/// The full ladder: 16, 32, ... 1024 bytes, each with its list of arenas
/// that still have free blocks.
///
/// The kernel owns one ladder and every process owns its own, so arenas are
/// never shared between address spaces.
#[derive(Debug, Clone)]
pub struct BlockClasses {
    slots: [ClassSlot; BLOCK_CLASS_COUNT],
}

impl BlockClasses {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // the largest class is 1024 bytes
    pub const fn new() -> Self {
        let mut slots = [ClassSlot {
            class: BlockClass::new(MIN_BLOCK_SIZE as u32),
            partial: None,
        }; BLOCK_CLASS_COUNT];
        let mut i = 0;
        while i < BLOCK_CLASS_COUNT {
            slots[i].class = BlockClass::new((MIN_BLOCK_SIZE << i) as u32);
            i += 1;
        }
        Self { slots }
    }

    #[inline]
    #[must_use]
    pub const fn class(&self, index: usize) -> &BlockClass {
        &self.slots[index].class
    }

    #[inline]
    #[must_use]
    pub const fn partial(&self, index: usize) -> Option<VirtualAddress> {
        self.slots[index].partial
    }

    /// Links `arena` in front of the partial list of class `index`.
    ///
    /// # Safety
    /// `arena` and every arena already on the list must be mapped.
    pub unsafe fn push_partial<M: Mmu + ?Sized>(&mut self, mmu: &M, index: usize, arena: Arena) {
        let slot = &mut self.slots[index];
        unsafe {
            arena.set_prev(mmu, None);
            arena.set_next(mmu, slot.partial);
            if let Some(head) = slot.partial {
                Arena::at(head).set_prev(mmu, Some(arena.base()));
            }
        }
        slot.partial = Some(arena.base());
    }

    /// Unlinks `arena` from the partial list of class `index`.
    ///
    /// # Safety
    /// As for [`push_partial`](Self::push_partial); `arena` must be on the list.
    pub unsafe fn remove_partial<M: Mmu + ?Sized>(&mut self, mmu: &M, index: usize, arena: Arena) {
        let slot = &mut self.slots[index];
        unsafe {
            let prev = arena.prev(mmu);
            let next = arena.next(mmu);
            match prev {
                Some(prev) => Arena::at(prev).set_next(mmu, next),
                None => {
                    assert_eq!(
                        slot.partial,
                        Some(arena.base()),
                        "arena {} is not on the list of class {index}",
                        arena.base()
                    );
                    slot.partial = next;
                }
            }
            if let Some(next) = next {
                Arena::at(next).set_prev(mmu, prev);
            }
            arena.set_prev(mmu, None);
            arena.set_next(mmu, None);
        }
    }
}

impl Default for BlockClasses {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_doubles_from_16_to_1024() {
        let classes = BlockClasses::new();
        let sizes: Vec<u32> = (0..BLOCK_CLASS_COUNT)
            .map(|i| classes.class(i).block_size())
            .collect();
        assert_eq!(sizes, [16, 32, 64, 128, 256, 512, 1024]);
    }

    #[test]
    fn blocks_fill_the_page() {
        let small = BlockClass::new(16);
        assert_eq!(small.blocks_per_arena(), 239);
        assert_eq!(small.blocks_offset(), 272);

        let large = BlockClass::new(1024);
        assert_eq!(large.blocks_per_arena(), 3);
        assert_eq!(large.blocks_offset(), 48);

        for i in 0..BLOCK_CLASS_COUNT {
            let class = *BlockClasses::new().class(i);
            let end = class.blocks_offset() + class.blocks_per_arena() * class.block_size();
            assert!(end <= PAGE_SIZE, "class {i} overflows the page");
            assert!(end + class.block_size() > PAGE_SIZE || class.blocks_per_arena() == 255);
            assert_eq!(class.blocks_offset() % 16, 0);
        }
    }

    #[test]
    fn partial_list_links_and_unlinks() {
        let mmu = kernel_vmem::SoftMmu::with_loader_tables(4 * 1024 * 1024);
        let mut classes = BlockClasses::new();
        let a = Arena::at(VirtualAddress::new(0xC000_8000));
        let b = Arena::at(VirtualAddress::new(0xC000_9000));
        let c = Arena::at(VirtualAddress::new(0xC000_A000));
        unsafe {
            classes.push_partial(&mmu, 2, a);
            classes.push_partial(&mmu, 2, b);
            classes.push_partial(&mmu, 2, c);
            assert_eq!(classes.partial(2), Some(c.base()));

            classes.remove_partial(&mmu, 2, b);
            assert_eq!(c.next(&mmu), Some(a.base()));
            assert_eq!(a.prev(&mmu), Some(c.base()));

            classes.remove_partial(&mmu, 2, c);
            assert_eq!(classes.partial(2), Some(a.base()));
            assert_eq!(a.prev(&mmu), None);

            classes.remove_partial(&mmu, 2, a);
        }
        assert_eq!(classes.partial(2), None);
        assert_eq!(classes.partial(0), None);
    }
}
