//! # Page Table Manager
//!
//! Maps, unmaps and translates 4 KiB pages in the **active** address space.
//!
//! All table memory is reached through the self-map ([`crate::self_map`]), so
//! this is the only place that treats live page tables as plain data. Callers
//! hand in addresses and frames and never see a table pointer.
//!
//! ## Invariants
//! - Slot 1023 of the active directory holds the directory's own frame.
//! - A new page table is zeroed before any entry in it is used.
//! - Emptied tables are never reclaimed; their directory entries stay present.

use crate::index::{DirectoryIndex, ENTRIES};
use crate::self_map::{directory_entry_at, directory_entry_of, table_entry_of, table_of};
use crate::{FrameAlloc, MapError, Mmu, PageEntry};
use kernel_info::memory::{KERNEL_PDE_START, PAGE_SIZE, SELF_MAP_PDE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// Handle to the page tables of whichever address space is currently loaded.
pub struct PageTableManager<'m, M: Mmu + ?Sized> {
    mmu: &'m M,
}

impl<'m, M: Mmu + ?Sized> PageTableManager<'m, M> {
    /// # Safety
    /// Every directory the `mmu` ever loads while this manager is in use
    /// must obey the self-map invariant, and no other code may write page
    /// tables concurrently with a mapping change to the same slot.
    #[inline]
    pub const unsafe fn new(mmu: &'m M) -> Self {
        Self { mmu }
    }

    #[inline]
    pub const fn mmu(&self) -> &'m M {
        self.mmu
    }

    /// The directory entry governing `va`.
    #[must_use]
    pub fn directory_entry(&self, va: VirtualAddress) -> PageEntry {
        // The directory is always mapped at the top page.
        PageEntry::from_bits(unsafe { self.mmu.read_u32(directory_entry_of(va)) })
    }

    /// The leaf entry for `va`, or `None` if no page table covers it.
    #[must_use]
    pub fn table_entry(&self, va: VirtualAddress) -> Option<PageEntry> {
        if !self.directory_entry(va).present() {
            return None;
        }
        Some(PageEntry::from_bits(unsafe {
            self.mmu.read_u32(table_entry_of(va))
        }))
    }

    /// Map the page at `va` to `frame`, creating its page table if needed.
    ///
    /// A missing table is taken from `tables`, zeroed and linked in as
    /// present + writable + user so that the leaf decides the final access
    /// rights. `leaf` supplies the leaf permission bits; present is forced on.
    ///
    /// # Errors
    /// [`MapError::OutOfTableFrames`] if a table is needed and `tables` is empty.
    /// Nothing is modified in that case.
    ///
    /// # Panics
    /// If `va` is already mapped. A double map means the allocator's
    /// bookkeeping is broken; overwriting would silently leak a frame.
    pub fn map_one<A: FrameAlloc + ?Sized>(
        &self,
        tables: &mut A,
        va: VirtualAddress,
        frame: PhysicalPage<Size4K>,
        leaf: PageEntry,
    ) -> Result<(), MapError> {
        debug_assert!(va.is_aligned::<Size4K>(), "unaligned page address {va}");

        let pde_va = directory_entry_of(va);
        let pte_va = table_entry_of(va);

        let pde = self.directory_entry(va);
        if pde.present() {
            let pte = PageEntry::from_bits(unsafe { self.mmu.read_u32(pte_va) });
            assert!(
                !pte.present(),
                "pte repeat: {va} is already mapped to {}",
                pte.physical_address()
            );
        } else {
            let table = tables.alloc_4k().ok_or(MapError::OutOfTableFrames)?;
            let pde = PageEntry::new_user_rw().with_physical_address(table.base());
            unsafe {
                self.mmu.write_u32(pde_va, pde.into_bits());
                // The new table is visible through the self-map from here on.
                self.mmu.fill(table_of(va), 0, PAGE_SIZE as usize);
            }
            log::trace!(
                "page table {table:?} installed in directory slot {}",
                DirectoryIndex::of(va).as_usize()
            );
        }

        let pte = leaf.with_present(true).with_physical_address(frame.base());
        unsafe {
            self.mmu.write_u32(pte_va, pte.into_bits());
        }
        Ok(())
    }

    /// Clear the present bit of the leaf for `va` and drop its TLB entry.
    ///
    /// The frame address stays in the entry; the table is kept even if it
    /// no longer maps anything. `va` must be mapped.
    pub fn unmap_one(&self, va: VirtualAddress) {
        let pte_va = table_entry_of(va);
        unsafe {
            let mut pte = PageEntry::from_bits(self.mmu.read_u32(pte_va));
            pte.set_present(false);
            self.mmu.write_u32(pte_va, pte.into_bits());
        }
        self.mmu.invalidate_page(va);
    }

    /// Physical address behind `va`.
    ///
    /// `va` must be mapped; an unmapped address yields the stale frame bits
    /// of its leaf (or faults when the table itself is missing). Use
    /// [`query`](Self::query) when the state is unknown.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> PhysicalAddress {
        let pte = PageEntry::from_bits(unsafe { self.mmu.read_u32(table_entry_of(va)) });
        pte.physical_address() + va.offset::<Size4K>()
    }

    /// Physical address behind `va`, or `None` if it is not mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let pte = self.table_entry(va)?;
        pte.present()
            .then(|| pte.physical_address() + va.offset::<Size4K>())
    }

    /// Turn the page at `directory` (physical frame `frame`) into a fresh
    /// process directory.
    ///
    /// The user half is cleared, the kernel half is copied from the active
    /// directory and the last slot is pointed at `frame` itself. Kernel
    /// mappings are thereby shared by content; the table frames they
    /// reference are the same for every process.
    ///
    /// # Safety
    /// `directory` must be a mapped, writable kernel page backed by `frame`
    /// and not otherwise in use.
    #[allow(clippy::cast_possible_truncation)] // both slots are below 1024
    pub unsafe fn init_process_directory(
        &self,
        directory: VirtualAddress,
        frame: PhysicalPage<Size4K>,
    ) {
        let kernel_half = DirectoryIndex::new(KERNEL_PDE_START as u16);
        let kernel_offset = kernel_half.byte_offset();
        unsafe {
            self.mmu.fill(directory, 0, kernel_offset as usize);
            self.mmu.copy(
                directory + kernel_offset,
                directory_entry_at(kernel_half),
                (ENTRIES - KERNEL_PDE_START) * 4,
            );
            let self_map = PageEntry::new_user_rw().with_physical_address(frame.base());
            self.mmu.write_u32(
                directory + DirectoryIndex::new(SELF_MAP_PDE as u16).byte_offset(),
                self_map.into_bits(),
            );
        }
        log::debug!("process directory {frame:?} initialized at {directory}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SoftMmu;
    use crate::self_map::DIRECTORY_BASE;

    const MIB: u32 = 1024 * 1024;

    /// A trivial **bump** allocator: always hands out the next 4 KiB frame.
    struct BumpAlloc {
        next: u32,
        end: u32,
    }

    impl BumpAlloc {
        const fn new(start: u32, end: u32) -> Self {
            Self { next: start, end }
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
            if self.next + PAGE_SIZE > self.end {
                return None;
            }
            let p = self.next;
            self.next += PAGE_SIZE;
            Some(PhysicalAddress::new(p).page())
        }
    }

    fn frame(pa: u32) -> PhysicalPage<Size4K> {
        PhysicalAddress::new(pa).page()
    }

    fn setup() -> (SoftMmu, BumpAlloc) {
        (
            SoftMmu::with_loader_tables(16 * MIB),
            BumpAlloc::new(2 * MIB, 3 * MIB),
        )
    }

    #[test]
    fn translate_after_map_returns_frame_and_offset() {
        let (mmu, mut tables) = setup();
        let ptm = unsafe { PageTableManager::new(&mmu) };
        let va = VirtualAddress::new(0xC010_0000);

        ptm.map_one(&mut tables, va, frame(0x0030_0000), PageEntry::new_kernel_rw())
            .expect("map");

        assert_eq!(ptm.translate(va).as_u32(), 0x0030_0000);
        assert_eq!(ptm.translate(va + 0x123).as_u32(), 0x0030_0123);
        assert_eq!(ptm.query(va + 0xFFF), Some(PhysicalAddress::new(0x0030_0FFF)));

        unsafe { mmu.write_u32(va + 8, 0xDEAD_BEEF) };
        assert_eq!(mmu.read_phys_u32(PhysicalAddress::new(0x0030_0008)), 0xDEAD_BEEF);
    }

    #[test]
    fn kernel_half_uses_static_tables() {
        let (mmu, mut tables) = setup();
        let ptm = unsafe { PageTableManager::new(&mmu) };

        ptm.map_one(
            &mut tables,
            VirtualAddress::new(0xC050_0000),
            frame(0x0030_0000),
            PageEntry::new_kernel_rw(),
        )
        .expect("map");

        // Slot 769 was pre-populated by the loader, no table frame consumed.
        assert_eq!(tables.next, 2 * MIB);
    }

    #[test]
    fn empty_directory_slot_gets_a_zeroed_table() {
        let (mmu, mut tables) = setup();
        let ptm = unsafe { PageTableManager::new(&mmu) };
        let va = VirtualAddress::new(0x0804_8000);

        // Garbage in the frame that will become the table.
        mmu.fill_phys(PhysicalAddress::new(2 * MIB), 0xAA, PAGE_SIZE as usize);
        assert!(!ptm.directory_entry(va).present());
        assert_eq!(ptm.table_entry(va), None);

        ptm.map_one(&mut tables, va, frame(0x0040_0000), PageEntry::new_user_rw())
            .expect("map");

        let pde = ptm.directory_entry(va);
        assert_eq!(pde, PageEntry::new_user_rw().with_physical_address(PhysicalAddress::new(2 * MIB)));
        for i in 0..ENTRIES as u32 {
            let raw = mmu.read_phys_u32(PhysicalAddress::new(2 * MIB + i * 4));
            if i == 0x48 {
                assert_eq!(raw, 0x0040_0007);
            } else {
                assert_eq!(raw, 0, "entry {i} not cleared");
            }
        }
        assert_eq!(ptm.translate(va).as_u32(), 0x0040_0000);
    }

    #[test]
    #[should_panic(expected = "pte repeat")]
    fn double_map_is_fatal() {
        let (mmu, mut tables) = setup();
        let ptm = unsafe { PageTableManager::new(&mmu) };
        let va = VirtualAddress::new(0xC010_1000);
        ptm.map_one(&mut tables, va, frame(0x0030_0000), PageEntry::new_kernel_rw())
            .expect("map");
        let _ = ptm.map_one(&mut tables, va, frame(0x0030_1000), PageEntry::new_kernel_rw());
    }

    #[test]
    fn unmap_clears_present_and_invalidates() {
        let (mmu, mut tables) = setup();
        let ptm = unsafe { PageTableManager::new(&mmu) };
        let va = VirtualAddress::new(0xC010_2000);
        ptm.map_one(&mut tables, va, frame(0x0030_0000), PageEntry::new_kernel_rw())
            .expect("map");

        ptm.unmap_one(va);

        assert_eq!(ptm.query(va), None);
        let pte = ptm.table_entry(va).expect("table stays");
        assert!(!pte.present());
        assert_eq!(pte.physical_address().as_u32(), 0x0030_0000);
        assert_eq!(mmu.invalidated(), [va]);

        // The slot can be mapped again.
        ptm.map_one(&mut tables, va, frame(0x0030_1000), PageEntry::new_kernel_rw())
            .expect("remap");
        assert_eq!(ptm.translate(va).as_u32(), 0x0030_1000);
    }

    #[test]
    fn missing_table_frame_is_reported() {
        let (mmu, _) = setup();
        let ptm = unsafe { PageTableManager::new(&mmu) };
        let mut empty = BumpAlloc::new(0, 0);
        let va = VirtualAddress::new(0x1000_0000);

        let err = ptm.map_one(&mut empty, va, frame(0x0030_0000), PageEntry::new_user_rw());

        assert_eq!(err, Err(MapError::OutOfTableFrames));
        assert!(!ptm.directory_entry(va).present());
    }

    #[test]
    fn process_directory_shares_kernel_half_and_maps_itself() {
        let (mmu, mut tables) = setup();
        let ptm = unsafe { PageTableManager::new(&mmu) };
        let dir_va = VirtualAddress::new(0xC010_0000);
        let dir_frame = frame(0x0030_0000);
        ptm.map_one(&mut tables, dir_va, dir_frame, PageEntry::new_kernel_rw())
            .expect("map");
        unsafe { mmu.fill(dir_va, 0x55, PAGE_SIZE as usize) };

        unsafe { ptm.init_process_directory(dir_va, dir_frame) };

        for slot in 0..ENTRIES as u32 {
            let new = mmu.read_phys_u32(PhysicalAddress::new(0x0030_0000 + slot * 4));
            let kernel = mmu.read_phys_u32(PhysicalAddress::new(0x0010_0000 + slot * 4));
            match slot {
                0..768 => assert_eq!(new, 0, "user slot {slot}"),
                768..1023 => assert_eq!(new, kernel, "kernel slot {slot}"),
                _ => assert_eq!(new, 0x0030_0007),
            }
        }

        unsafe { mmu.load_directory(dir_frame.base()) };
        assert_eq!(mmu.directory(), dir_frame.base());
        // Kernel mappings resolve identically, and the self-map points at the new frame.
        assert_eq!(ptm.translate(dir_va).as_u32(), 0x0030_0000);
        let top = unsafe { mmu.read_u32(DIRECTORY_BASE + 1023 * 4) };
        assert_eq!(top, 0x0030_0007);
    }
}
