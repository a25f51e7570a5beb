//! # Page allocation path
//!
//! A [`Domain`] bundles everything one allocation touches while the owning
//! locks are held: a virtual space, a physical pool, the source of new page
//! tables and a block-class ladder. Allocation runs virtual space, then pool,
//! then page table; freeing runs the other way round.

use crate::error::AllocError;
use crate::heap::BlockClasses;
use crate::pool::{PhysicalPool, PoolKind};
use crate::vspace::VirtualSpace;
use kernel_info::memory::{MAX_PAGES_PER_REQUEST, PAGE_SIZE, USER_STACK3_VADDR};
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_sync::{Mutex, RawLock, RawUnlock};
use kernel_vmem::{Mmu, PageTableManager};

/// Everything guarded by the kernel pool lock.
pub(crate) struct KernelState<'a> {
    pub(crate) pool: PhysicalPool<'a>,
    pub(crate) vspace: VirtualSpace<'a>,
    pub(crate) classes: BlockClasses,
}

/// Where frames for new page tables come from.
pub(crate) enum TableSource<'d, 'a, R> {
    /// The pool that backs the pages; its lock is already held.
    SamePool,
    /// The kernel pool, locked for each table.
    Kernel(&'d Mutex<KernelState<'a>, R>),
}

/// A pool plus the page tables its frames get mapped into.
pub(crate) struct Frames<'d, 'a, M: Mmu + ?Sized, R> {
    pub(crate) kind: PoolKind,
    pub(crate) ptm: PageTableManager<'d, M>,
    pub(crate) pool: &'d mut PhysicalPool<'a>,
    pub(crate) tables: TableSource<'d, 'a, R>,
}

impl<M: Mmu + ?Sized, R: RawLock + RawUnlock> Frames<'_, '_, M, R> {
    /// Takes a frame and maps it at `va`. On failure the frame is back in
    /// the pool and nothing is mapped.
    pub(crate) fn map_new_frame(&mut self, va: VirtualAddress) -> Result<PhysicalPage<Size4K>, AllocError> {
        let frame = self
            .pool
            .alloc_one()
            .ok_or(AllocError::OutOfPhysicalMemory(self.kind))?;
        let leaf = self.kind.leaf_flags();
        let mapped = match self.tables {
            TableSource::SamePool => self.ptm.map_one(&mut *self.pool, va, frame, leaf),
            TableSource::Kernel(kernel) => self.ptm.map_one(&mut kernel.lock().pool, va, frame, leaf),
        };
        if let Err(e) = mapped {
            self.pool.free_one(frame);
            return Err(e.into());
        }
        Ok(frame)
    }

    /// Returns the frame behind `va` to the pool and unmaps the page.
    ///
    /// # Panics
    /// If `va` is backed by a frame of another pool.
    pub(crate) fn release_frame(&mut self, va: VirtualAddress) {
        let pa = self.ptm.translate(va);
        assert!(
            self.pool.contains(pa),
            "{va} is backed by {pa}, outside the {} pool",
            self.kind
        );
        self.pool.free_one(pa.page());
        self.ptm.unmap_one(va);
    }
}

/// One address space's view of the allocator with all of its locks held.
pub(crate) struct Domain<'d, 'a, 'v, M: Mmu + ?Sized, R, I: ?Sized> {
    pub(crate) frames: Frames<'d, 'a, M, R>,
    pub(crate) vspace: &'d mut VirtualSpace<'v>,
    pub(crate) classes: &'d mut BlockClasses,
    pub(crate) irq: &'d I,
}

impl<M: Mmu + ?Sized, R: RawLock + RawUnlock, I: ?Sized> Domain<'_, '_, '_, M, R, I> {
    #[inline]
    pub(crate) fn mmu(&self) -> &M {
        self.frames.ptm.mmu()
    }

    #[inline]
    pub(crate) const fn kind(&self) -> PoolKind {
        self.frames.kind
    }

    /// Maps `pg_cnt` zeroed pages at consecutive virtual addresses. The
    /// frames behind them need not be contiguous.
    ///
    /// # Errors
    /// If the virtual space has no fitting run, the pool runs dry or no
    /// frame is left for a page table. Pages mapped so far are released
    /// again before the error is returned.
    ///
    /// # Panics
    /// If `pg_cnt` is 0 or not below [`MAX_PAGES_PER_REQUEST`], or a user
    /// run reaches the page reserved for the user stack.
    pub(crate) fn malloc_page(&mut self, pg_cnt: usize) -> Result<VirtualAddress, AllocError> {
        let Some(pages) = u32::try_from(pg_cnt)
            .ok()
            .filter(|_| pg_cnt > 0 && pg_cnt < MAX_PAGES_PER_REQUEST)
        else {
            panic!("cannot allocate {pg_cnt} pages in one request");
        };
        let kind = self.kind();
        let Some(start) = self.vspace.alloc(pg_cnt) else {
            log::warn!("{kind} virtual space has no run of {pg_cnt} pages");
            return Err(AllocError::OutOfVirtualSpace(kind));
        };
        if kind == PoolKind::User {
            assert!(
                start.as_u32() + pages * PAGE_SIZE <= USER_STACK3_VADDR,
                "user run at {start} reaches the stack page"
            );
        }

        for i in 0..pages {
            if let Err(e) = self.frames.map_new_frame(start + i * PAGE_SIZE) {
                for done in 0..i {
                    self.frames.release_frame(start + done * PAGE_SIZE);
                }
                self.vspace.free(start, pg_cnt);
                log::warn!("{pg_cnt} {kind} pages at {start} rolled back: {e}");
                return Err(e);
            }
        }

        unsafe {
            self.mmu().fill(start, 0, pg_cnt * PAGE_SIZE as usize);
        }
        log::debug!("{pg_cnt} {kind} pages mapped at {start}");
        Ok(start)
    }

    /// Unmaps `pg_cnt` pages at `va`, returns their frames and releases the
    /// virtual range.
    ///
    /// # Panics
    /// If `va` is not page aligned, `pg_cnt` is 0, or a page is backed by a
    /// frame of another pool.
    pub(crate) fn mfree_page(&mut self, va: VirtualAddress, pg_cnt: usize) {
        assert!(
            pg_cnt > 0 && va.is_aligned::<Size4K>(),
            "cannot free {pg_cnt} pages at {va}"
        );
        let mut page = va;
        for _ in 0..pg_cnt {
            self.frames.release_frame(page);
            page += PAGE_SIZE;
        }
        self.vspace.free(va, pg_cnt);
        log::debug!("{pg_cnt} {} pages at {va} released", self.kind());
    }

    /// Maps one page at the caller-chosen `va` and marks it in the virtual
    /// space.
    ///
    /// # Errors
    /// As for [`malloc_page`](Self::malloc_page); the virtual bit is cleared
    /// again on failure.
    ///
    /// # Panics
    /// If `va` is the first page of the virtual space.
    pub(crate) fn map_at(&mut self, va: VirtualAddress) -> Result<VirtualAddress, AllocError> {
        self.vspace.reserve(va);
        match self.frames.map_new_frame(va) {
            Ok(frame) => {
                log::debug!("{} page at {va} backed by {frame:?}", self.kind());
                Ok(va)
            }
            Err(e) => {
                self.vspace.free(va, 1);
                log::warn!("{} page at {va} not mapped: {e}", self.kind());
                Err(e)
            }
        }
    }
}
