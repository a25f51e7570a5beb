//! # Byte-granular heap
//!
//! Requests up to [`LARGE_ALLOC_THRESHOLD`] bytes are served from fixed-size
//! blocks carved out of single-page arenas; larger ones get their own run of
//! pages with an arena header in front.
//!
//! Arenas are created on demand and a small arena whose blocks are all free
//! again is handed back to the page allocator right away.

mod arena;
mod block_class;

pub use arena::{Arena, ArenaKind};
pub use block_class::{ARENA_HEADER_SIZE, BlockClass, BlockClasses};

use crate::domain::Domain;
use crate::error::AllocError;
use kernel_info::memory::{LARGE_ALLOC_THRESHOLD, MAX_PAGES_PER_REQUEST, MIN_BLOCK_SIZE, PAGE_SIZE};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::{InterruptControl, IrqGuard, RawLock, RawUnlock};
use kernel_vmem::Mmu;

/// How a request of a given size is served.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SizeRoute {
    /// A block of the ladder class with this index.
    Small { class: usize },
    /// A dedicated run of pages.
    Large { pages: usize },
}

/// Picks the regime for a request of `size` bytes.
#[must_use]
pub const fn route(size: usize) -> SizeRoute {
    if size > LARGE_ALLOC_THRESHOLD {
        let pages = (size + ARENA_HEADER_SIZE as usize).div_ceil(PAGE_SIZE as usize);
        SizeRoute::Large { pages }
    } else {
        let block = if size < MIN_BLOCK_SIZE { MIN_BLOCK_SIZE } else { size.next_power_of_two() };
        let class = (block.trailing_zeros() - MIN_BLOCK_SIZE.trailing_zeros()) as usize;
        SizeRoute::Small { class }
    }
}

impl<M, R, I> Domain<'_, '_, '_, M, R, I>
where
    M: Mmu + ?Sized,
    R: RawLock + RawUnlock,
    I: InterruptControl + ?Sized,
{
    /// Allocates `size` zeroed bytes.
    ///
    /// # Errors
    /// [`AllocError::InvalidSize`] for 0 bytes, anything not smaller than
    /// the pool, or a large request spanning [`MAX_PAGES_PER_REQUEST`] pages
    /// or more; otherwise the errors of the page path.
    pub(crate) fn sys_malloc(&mut self, size: usize) -> Result<VirtualAddress, AllocError> {
        if size == 0 || size >= self.frames.pool.byte_size() as usize {
            return Err(AllocError::InvalidSize(size));
        }

        match route(size) {
            SizeRoute::Large { pages } => {
                // The page path refuses such runs outright.
                let units = u32::try_from(pages)
                    .ok()
                    .filter(|_| pages < MAX_PAGES_PER_REQUEST)
                    .ok_or(AllocError::InvalidSize(size))?;
                let arena = Arena::at(self.malloc_page(pages)?);
                unsafe { arena.init_large(self.mmu(), units) };
                Ok(arena.payload())
            }
            SizeRoute::Small { class } => {
                let arena = match self.classes.partial(class) {
                    Some(base) => Arena::at(base),
                    None => self.new_arena(class)?,
                };
                let block_class = *self.classes.class(class);
                let mmu = self.frames.ptm.mmu();
                let block = unsafe { arena.pop_block(mmu, &block_class) }.unwrap_or_else(|| {
                    panic!("{arena:?} is on the list of class {class} without a free block")
                });
                unsafe {
                    if arena.units(mmu) == 0 {
                        self.classes.remove_partial(mmu, class, arena);
                    }
                    mmu.fill(block, 0, block_class.block_size() as usize);
                }
                Ok(block)
            }
        }
    }

    /// Returns `ptr` to its arena, releasing the arena once nothing in it
    /// is in use.
    ///
    /// # Panics
    /// If `ptr` does not point at a live heap allocation of this domain.
    pub(crate) fn sys_free(&mut self, ptr: VirtualAddress) {
        let arena = Arena::containing(ptr);
        let mmu = self.frames.ptm.mmu();
        match unsafe { arena.kind(mmu) } {
            ArenaKind::Large { pages } => {
                assert_eq!(ptr, arena.payload(), "{ptr} is inside the large allocation {arena:?}");
                self.mfree_page(arena.base(), pages as usize);
            }
            ArenaKind::Small { class } => {
                let block_class = *self.classes.class(class);
                let free = unsafe { arena.push_block(mmu, &block_class, ptr) };
                if free == block_class.blocks_per_arena() {
                    if free > 1 {
                        unsafe { self.classes.remove_partial(mmu, class, arena) };
                    }
                    self.mfree_page(arena.base(), 1);
                    log::trace!("{arena:?} of {}-byte blocks reclaimed", block_class.block_size());
                } else if free == 1 {
                    unsafe { self.classes.push_partial(mmu, class, arena) };
                }
            }
        }
    }

    /// Takes a fresh page, slices it into blocks of class `class` and
    /// publishes it on the class list.
    fn new_arena(&mut self, class: usize) -> Result<Arena, AllocError> {
        let arena = Arena::at(self.malloc_page(1)?);
        let block_class = *self.classes.class(class);
        let mmu = self.frames.ptm.mmu();
        unsafe { arena.init_small(mmu, class, &block_class) };
        {
            let _irq = IrqGuard::new(self.irq);
            unsafe { self.classes.push_partial(mmu, class, arena) };
        }
        log::trace!(
            "{arena:?} holds {} blocks of {} bytes",
            block_class.blocks_per_arena(),
            block_class.block_size()
        );
        Ok(arena)
    }
}
