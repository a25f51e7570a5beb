//! # Memory manager
//!
//! The allocator's public face. Owns the MMU handle, both pools and the
//! kernel virtual space, and hands out pages and heap bytes per [`Context`].
//!
//! ## Locking
//!
//! - The kernel lock guards the kernel pool, the kernel virtual space and
//!   the kernel block classes.
//! - The user lock guards the user pool.
//! - Each process lock guards that process's virtual space and classes.
//!
//! Locks are taken in the order process, user, kernel. User mappings take
//! the kernel lock only briefly, to pull a frame for a new page table.
//!
//! Operations for a process work on the **active** address space, so that
//! process must be loaded with [`MemoryManager::activate`] first.

use crate::context::{Context, ProcessMemory};
use crate::domain::{Domain, Frames, KernelState, TableSource};
use crate::error::{AllocError, LayoutError};
use crate::heap::BlockClasses;
use crate::layout::{BitmapStorage, MemoryLayout};
use crate::pool::{PhysicalPool, PoolKind};
use crate::vspace::VirtualSpace;
use kernel_info::memory::{
    KERNEL_HEAP_START, KERNEL_SPACE_START, PAGE_DIR_PHYS, PAGE_SIZE, USER_VADDR_START,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_sync::{InterruptControl, Mutex, RawLock, RawUnlock};
use kernel_vmem::{ENTRIES, Mmu, PageTableManager};

/// Physical pools, kernel virtual space and heaps of the whole system.
pub struct MemoryManager<'a, M: Mmu, R: RawLock + RawUnlock, I: InterruptControl> {
    mmu: M,
    irq: I,
    layout: MemoryLayout,
    kernel: Mutex<KernelState<'a>, R>,
    user: Mutex<PhysicalPool<'a>, R>,
}

impl<'a, M, R, I> MemoryManager<'a, M, R, I>
where
    M: Mmu,
    R: RawLock + RawUnlock + Default,
    I: InterruptControl,
{
    /// Builds both pools and the kernel virtual space over `storage`; all
    /// bitmaps start out free.
    pub fn new(mmu: M, irq: I, layout: MemoryLayout, storage: BitmapStorage<'a>) -> Self {
        let kernel_pool = PhysicalPool::new(
            PoolKind::Kernel,
            storage.kernel_pool,
            layout.pool_base(PoolKind::Kernel),
            layout.pool_bytes(PoolKind::Kernel),
        );
        let user_pool = PhysicalPool::new(
            PoolKind::User,
            storage.user_pool,
            layout.pool_base(PoolKind::User),
            layout.pool_bytes(PoolKind::User),
        );
        let vspace = VirtualSpace::new(storage.kernel_vspace, layout.kernel_vspace_base());

        log::info!(
            "memory: {:#x} bytes; kernel pool at {} ({} pages), user pool at {} ({} pages)",
            layout.total_memory(),
            kernel_pool.phys_base(),
            kernel_pool.bitmap().bit_count(),
            user_pool.phys_base(),
            user_pool.bitmap().bit_count(),
        );
        log::info!(
            "memory: kernel virtual space at {}, {} bitmap bytes",
            vspace.base(),
            layout.bitmap_bytes_total()
        );

        Self {
            mmu,
            irq,
            layout,
            kernel: Mutex::with_default_lock(KernelState {
                pool: kernel_pool,
                vspace,
                classes: BlockClasses::new(),
            }),
            user: Mutex::with_default_lock(user_pool),
        }
    }

    /// Probes the memory size through `mmu` and builds the manager over the
    /// bitmap `region`.
    ///
    /// # Errors
    /// If the probed size does not fit the layout or `region` is too small.
    ///
    /// # Safety
    /// The loader's page tables must be active.
    pub unsafe fn boot(mmu: M, irq: I, region: &'a mut [u8]) -> Result<Self, LayoutError> {
        let layout = unsafe { MemoryLayout::probe(&mmu) }?;
        let storage = BitmapStorage::carve(region, &layout)?;
        Ok(Self::new(mmu, irq, layout, storage))
    }

    /// Builds the page directory, virtual space and block classes of a new
    /// process. The user virtual space tracks `storage.len() * 8` pages
    /// from the user image base.
    ///
    /// # Errors
    /// If no kernel page is left for the directory.
    pub fn new_process_memory<'p>(&self, storage: &'p mut [u8]) -> Result<ProcessMemory<'p, R>, AllocError> {
        let (directory, frame) = self.new_process_directory()?;
        let vspace = VirtualSpace::new(storage, VirtualAddress::new(USER_VADDR_START));
        Ok(ProcessMemory::new(directory, frame, vspace, R::default()))
    }
}

impl<'a, M, R, I> MemoryManager<'a, M, R, I>
where
    M: Mmu,
    R: RawLock + RawUnlock,
    I: InterruptControl,
{
    #[inline]
    pub const fn mmu(&self) -> &M {
        &self.mmu
    }

    #[inline]
    pub const fn irq(&self) -> &I {
        &self.irq
    }

    #[inline]
    pub const fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    #[inline]
    fn ptm(&self) -> PageTableManager<'_, M> {
        // Every directory this manager loads is the loader's or one built by
        // `init_process_directory`, so the self-map always holds.
        unsafe { PageTableManager::new(&self.mmu) }
    }

    fn with_kernel<T>(&self, f: impl FnOnce(&mut Domain<'_, 'a, 'a, M, R, I>) -> T) -> T {
        let mut guard = self.kernel.lock();
        let KernelState { pool, vspace, classes } = &mut *guard;
        let mut domain = Domain {
            frames: Frames {
                kind: PoolKind::Kernel,
                ptm: self.ptm(),
                pool,
                tables: TableSource::SamePool,
            },
            vspace,
            classes,
            irq: &self.irq,
        };
        f(&mut domain)
    }

    fn with_process<'p, T>(
        &self,
        process: &ProcessMemory<'p, R>,
        f: impl FnOnce(&mut Domain<'_, 'a, 'p, M, R, I>) -> T,
    ) -> T {
        let mut state = process.state.lock();
        let state = &mut *state;
        let mut pool = self.user.lock();
        let mut domain = Domain {
            frames: Frames {
                kind: PoolKind::User,
                ptm: self.ptm(),
                pool: &mut pool,
                tables: TableSource::Kernel(&self.kernel),
            },
            vspace: &mut state.vspace,
            classes: &mut state.classes,
            irq: &self.irq,
        };
        f(&mut domain)
    }

    /// Maps `pg_cnt` zeroed kernel pages at consecutive kernel addresses.
    ///
    /// # Errors
    /// On exhaustion of the kernel pool or kernel virtual space. Nothing
    /// stays allocated in that case.
    pub fn get_kernel_pages(&self, pg_cnt: usize) -> Result<VirtualAddress, AllocError> {
        self.with_kernel(|d| d.malloc_page(pg_cnt))
    }

    /// Maps `pg_cnt` zeroed user pages into the virtual space of `process`,
    /// which must be active.
    ///
    /// # Errors
    /// On exhaustion of the user pool, the process's virtual space, or the
    /// kernel pool when a page table is needed.
    pub fn get_user_pages(&self, process: &ProcessMemory<'_, R>, pg_cnt: usize) -> Result<VirtualAddress, AllocError> {
        self.with_process(process, |d| d.malloc_page(pg_cnt))
    }

    /// Maps one page at `va` and marks it in the virtual space of `ctx`.
    ///
    /// # Errors
    /// If no frame is left; the virtual bit is cleared again.
    ///
    /// # Panics
    /// If a kernel thread asks for a user page or a process for a kernel
    /// page, or `va` is the first page of the space.
    pub fn get_a_page(&self, ctx: Context<'_, '_, R>, pool: PoolKind, va: VirtualAddress) -> Result<VirtualAddress, AllocError> {
        match (ctx, pool) {
            (Context::Kernel, PoolKind::Kernel) => self.with_kernel(|d| d.map_at(va)),
            (Context::Process(process), PoolKind::User) => self.with_process(process, |d| d.map_at(va)),
            _ => panic!("get_a_page: {ctx:?} may not take {va} from the {pool} pool"),
        }
    }

    /// Maps one page at `va` without touching any virtual bitmap; the range
    /// is already accounted for elsewhere, e.g. when a process is duplicated.
    ///
    /// # Errors
    /// If no frame is left in `pool`, or in the kernel pool for a table.
    pub fn get_a_page_without_vspace(&self, pool: PoolKind, va: VirtualAddress) -> Result<VirtualAddress, AllocError> {
        match pool {
            PoolKind::Kernel => {
                let mut kernel = self.kernel.lock();
                let mut frames = Frames {
                    kind: pool,
                    ptm: self.ptm(),
                    pool: &mut kernel.pool,
                    tables: TableSource::<R>::SamePool,
                };
                frames.map_new_frame(va)?;
            }
            PoolKind::User => {
                let mut user = self.user.lock();
                let mut frames = Frames {
                    kind: pool,
                    ptm: self.ptm(),
                    pool: &mut user,
                    tables: TableSource::Kernel(&self.kernel),
                };
                frames.map_new_frame(va)?;
            }
        }
        Ok(va)
    }

    /// Unmaps `pg_cnt` pages at `va` from the space of `ctx` and returns
    /// their frames. [`Context::Kernel`] frees kernel pages no matter which
    /// thread asks.
    ///
    /// # Panics
    /// If a page is backed by a frame outside the context's pool.
    pub fn mfree_page(&self, ctx: Context<'_, '_, R>, va: VirtualAddress, pg_cnt: usize) {
        match ctx {
            Context::Kernel => self.with_kernel(|d| d.mfree_page(va, pg_cnt)),
            Context::Process(process) => self.with_process(process, |d| d.mfree_page(va, pg_cnt)),
        }
    }

    /// Returns a single frame to whichever pool owns it.
    pub fn free_a_phy_page(&self, pa: PhysicalAddress) {
        let frame = pa.page::<Size4K>();
        match self.layout.pool_of(pa) {
            PoolKind::Kernel => self.kernel.with_lock(|k| k.pool.free_one(frame)),
            PoolKind::User => self.user.with_lock(|pool| pool.free_one(frame)),
        }
    }

    /// Physical address behind `va` in the active address space; `va` must
    /// be mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> PhysicalAddress {
        self.ptm().translate(va)
    }

    /// Physical address behind `va`, or `None` if it is not mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.ptm().query(va)
    }

    /// Allocates a kernel page and turns it into a process directory that
    /// shares the kernel half of the active one.
    ///
    /// # Errors
    /// If no kernel page is left.
    pub fn new_process_directory(&self) -> Result<(VirtualAddress, PhysicalPage<Size4K>), AllocError> {
        let directory = self.get_kernel_pages(1)?;
        let frame = self.translate(directory).page();
        unsafe { self.ptm().init_process_directory(directory, frame) };
        Ok((directory, frame))
    }

    /// Loads the page directory of `ctx`.
    pub fn activate(&self, ctx: Context<'_, '_, R>) {
        let directory = match ctx {
            Context::Kernel => PhysicalAddress::new(PAGE_DIR_PHYS),
            Context::Process(process) => process.directory_frame().base(),
        };
        // Both kinds of directory carry the same kernel half.
        unsafe { self.mmu.load_directory(directory) };
    }

    /// Returns everything `process` owns: its user frames, the page tables
    /// of its user half and finally its directory. Leaves the kernel
    /// directory active.
    pub fn release_process_memory(&self, process: ProcessMemory<'_, R>) {
        self.activate(Context::Process(&process));
        let ptm = self.ptm();
        let mut frames = 0usize;
        let mut tables = 0usize;

        for slot in 0..KERNEL_SPACE_START >> 22 {
            let table_va = VirtualAddress::new(slot << 22);
            let pde = ptm.directory_entry(table_va);
            if !pde.present() {
                continue;
            }
            let mut va = table_va;
            for _ in 0..ENTRIES {
                if let Some(pte) = ptm.table_entry(va).filter(|pte| pte.present()) {
                    self.free_a_phy_page(pte.physical_address());
                    frames += 1;
                }
                va += PAGE_SIZE;
            }
            self.kernel.with_lock(|k| k.pool.free_one(pde.frame()));
            tables += 1;
        }

        self.activate(Context::Kernel);
        self.mfree_page(Context::Kernel, process.directory(), 1);
        log::debug!(
            "process {:?} released: {frames} frames, {tables} page tables",
            process.directory_frame()
        );
    }

    /// Allocates `size` zeroed bytes from the heap of `ctx`.
    ///
    /// # Errors
    /// [`AllocError::InvalidSize`] for 0 bytes or more than the pool holds,
    /// otherwise on exhaustion.
    pub fn sys_malloc(&self, ctx: Context<'_, '_, R>, size: usize) -> Result<VirtualAddress, AllocError> {
        match ctx {
            Context::Kernel => self.with_kernel(|d| d.sys_malloc(size)),
            Context::Process(process) => self.with_process(process, |d| d.sys_malloc(size)),
        }
    }

    /// Frees a pointer returned by [`sys_malloc`](Self::sys_malloc) for the
    /// same context.
    ///
    /// # Panics
    /// If `ptr` is not a live heap allocation of `ctx`.
    pub fn sys_free(&self, ctx: Context<'_, '_, R>, ptr: VirtualAddress) {
        match ctx {
            Context::Kernel => {
                assert!(
                    ptr.as_u32() >= KERNEL_HEAP_START,
                    "{ptr} lies below the kernel heap"
                );
                self.with_kernel(|d| d.sys_free(ptr));
            }
            Context::Process(process) => self.with_process(process, |d| d.sys_free(ptr)),
        }
    }

    /// Free frames left in `kind`'s pool.
    #[must_use]
    pub fn free_pages(&self, kind: PoolKind) -> usize {
        self.inspect_pool(kind, PhysicalPool::free_pages)
    }

    /// Runs `f` on a pool with its lock held.
    pub fn inspect_pool<T>(&self, kind: PoolKind, f: impl FnOnce(&PhysicalPool<'a>) -> T) -> T {
        match kind {
            PoolKind::Kernel => self.kernel.with_lock(|k| f(&k.pool)),
            PoolKind::User => self.user.with_lock(|pool| f(pool)),
        }
    }

    /// Runs `f` on the kernel virtual space with the kernel lock held.
    pub fn inspect_kernel_vspace<T>(&self, f: impl FnOnce(&VirtualSpace<'a>) -> T) -> T {
        self.kernel.with_lock(|k| f(&k.vspace))
    }
}

impl<M: Mmu, R: RawLock + RawUnlock, I: InterruptControl> core::fmt::Debug for MemoryManager<'_, M, R, I> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
