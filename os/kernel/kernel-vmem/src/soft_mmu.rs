//! # Software MMU
//!
//! Simulated physical RAM plus a two-level page walker that behaves like the
//! CPU does with `CR0.WP = 0`: every access is translated through the loaded
//! directory, a clear present bit in either level faults (panics), and the
//! self-map works because the walker follows it like any other entry.

use crate::{Mmu, PageEntry};
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_info::memory::{
    KERNEL_PDE_START, LOW_RESERVED_BYTES, PAGE_DIR_PHYS, PAGE_SIZE, SELF_MAP_PDE,
    STATIC_PAGE_TABLE_BYTES, TOTAL_MEMORY_PROBE_ADDR,
};
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress};
use kernel_sync::SpinMutex;

/// A machine with `ram_bytes` of physical memory and no CPU caches.
pub struct SoftMmu {
    ram: SpinMutex<Vec<u8>>,
    cr3: AtomicU32,
    invalidated: SpinMutex<Vec<VirtualAddress>>,
}

impl SoftMmu {
    /// Zeroed RAM with no directory loaded.
    #[must_use]
    pub fn new(ram_bytes: u32) -> Self {
        Self {
            ram: SpinMutex::new(vec![0; ram_bytes as usize]),
            cr3: AtomicU32::new(0),
            invalidated: SpinMutex::new(Vec::new()),
        }
    }

    /// The state the loader leaves behind before the kernel runs:
    ///
    /// - the probed memory size stored at the probe address;
    /// - the directory at 1 MiB, with the table right behind it mapping the
    ///   low 1 MiB both at 0 and at 3 GiB;
    /// - empty tables for directory slots 769..=1022 in the following frames;
    /// - slot 1023 pointing at the directory, which is loaded.
    ///
    /// # Panics
    /// If `total_memory` cannot hold the static tables.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // directory slots are below 1024
    pub fn with_loader_tables(total_memory: u32) -> Self {
        assert!(
            total_memory >= LOW_RESERVED_BYTES + STATIC_PAGE_TABLE_BYTES,
            "{total_memory:#x} bytes cannot hold the static page tables"
        );
        let mmu = Self::new(total_memory);
        mmu.write_phys_u32(PhysicalAddress::new(TOTAL_MEMORY_PROBE_ADDR), total_memory);

        let dir = PAGE_DIR_PHYS;
        let low_table = dir + PAGE_SIZE;
        let table_entry = |frame: u32| PageEntry::new_user_rw().with_physical_address(PhysicalAddress::new(frame)).into_bits();

        for i in 0..LOW_RESERVED_BYTES / PAGE_SIZE {
            mmu.write_phys_u32(PhysicalAddress::new(low_table + i * 4), table_entry(i * PAGE_SIZE));
        }
        mmu.write_phys_u32(PhysicalAddress::new(dir), table_entry(low_table));
        mmu.write_phys_u32(PhysicalAddress::new(dir + KERNEL_PDE_START as u32 * 4), table_entry(low_table));

        let mut table = low_table + PAGE_SIZE;
        for slot in KERNEL_PDE_START as u32 + 1..SELF_MAP_PDE as u32 {
            mmu.write_phys_u32(PhysicalAddress::new(dir + slot * 4), table_entry(table));
            table += PAGE_SIZE;
        }
        mmu.write_phys_u32(PhysicalAddress::new(dir + SELF_MAP_PDE as u32 * 4), table_entry(dir));

        mmu.cr3.store(dir, Ordering::Release);
        mmu
    }

    /// Physical address of the loaded directory.
    #[must_use]
    pub fn directory(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.cr3.load(Ordering::Acquire))
    }

    /// Every address passed to [`Mmu::invalidate_page`], oldest first.
    #[must_use]
    pub fn invalidated(&self) -> Vec<VirtualAddress> {
        self.invalidated.lock().clone()
    }

    #[must_use]
    pub fn read_phys_u32(&self, pa: PhysicalAddress) -> u32 {
        let ram = self.ram.lock();
        Self::load(&ram, pa.as_usize())
    }

    pub fn write_phys_u32(&self, pa: PhysicalAddress, value: u32) {
        let mut ram = self.ram.lock();
        Self::store(&mut ram, pa.as_usize(), value);
    }

    pub fn fill_phys(&self, pa: PhysicalAddress, byte: u8, len: usize) {
        let start = pa.as_usize();
        self.ram.lock()[start..start + len].fill(byte);
    }

    fn load(ram: &[u8], at: usize) -> u32 {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(&ram[at..at + 4]);
        u32::from_le_bytes(bytes)
    }

    fn store(ram: &mut [u8], at: usize, value: u32) {
        ram[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Translate `va` the way the CPU would, faulting on a missing level.
    fn walk(&self, ram: &[u8], va: VirtualAddress) -> usize {
        let dir = self.cr3.load(Ordering::Acquire) as usize;
        let pde = PageEntry::from_bits(Self::load(ram, dir + va.directory_index() * 4));
        assert!(
            pde.present(),
            "page fault at {va}: directory slot {} not present",
            va.directory_index()
        );
        let table = pde.physical_address().as_usize();
        let pte = PageEntry::from_bits(Self::load(ram, table + va.table_index() * 4));
        assert!(pte.present(), "page fault at {va}: page not present");

        let pa = pte.physical_address().as_usize() + va.offset::<Size4K>() as usize;
        assert!(pa < ram.len(), "{va} maps to {pa:#x}, beyond simulated RAM");
        pa
    }

    /// Run `f` on each physically contiguous piece of `[va, va + len)`.
    fn for_each_chunk(
        &self,
        ram: &mut [u8],
        va: VirtualAddress,
        len: usize,
        mut f: impl FnMut(&mut [u8], usize),
    ) {
        let mut done = 0;
        while done < len {
            let at = va + u32::try_from(done).unwrap_or(u32::MAX);
            let in_page = (PAGE_SIZE - at.offset::<Size4K>()) as usize;
            let n = in_page.min(len - done);
            let pa = self.walk(ram, at);
            f(&mut ram[pa..pa + n], done);
            done += n;
        }
    }
}

impl Mmu for SoftMmu {
    unsafe fn read_u32(&self, va: VirtualAddress) -> u32 {
        assert_eq!(va.as_u32() % 4, 0, "misaligned load at {va}");
        let ram = self.ram.lock();
        let pa = self.walk(&ram, va);
        Self::load(&ram, pa)
    }

    unsafe fn write_u32(&self, va: VirtualAddress, value: u32) {
        assert_eq!(va.as_u32() % 4, 0, "misaligned store at {va}");
        let mut ram = self.ram.lock();
        let pa = self.walk(&ram, va);
        Self::store(&mut ram, pa, value);
    }

    unsafe fn read_u8(&self, va: VirtualAddress) -> u8 {
        let ram = self.ram.lock();
        ram[self.walk(&ram, va)]
    }

    unsafe fn write_u8(&self, va: VirtualAddress, value: u8) {
        let mut ram = self.ram.lock();
        let pa = self.walk(&ram, va);
        ram[pa] = value;
    }

    unsafe fn fill(&self, va: VirtualAddress, byte: u8, len: usize) {
        let mut ram = self.ram.lock();
        self.for_each_chunk(&mut ram, va, len, |chunk, _| chunk.fill(byte));
    }

    unsafe fn copy(&self, dst: VirtualAddress, src: VirtualAddress, len: usize) {
        let mut ram = self.ram.lock();
        let mut buf = vec![0; len];
        self.for_each_chunk(&mut ram, src, len, |chunk, at| {
            buf[at..at + chunk.len()].copy_from_slice(chunk);
        });
        self.for_each_chunk(&mut ram, dst, len, |chunk, at| {
            chunk.copy_from_slice(&buf[at..at + chunk.len()]);
        });
    }

    fn invalidate_page(&self, va: VirtualAddress) {
        self.invalidated.lock().push(va);
    }

    unsafe fn load_directory(&self, directory: PhysicalAddress) {
        self.cr3.store(directory.as_u32(), Ordering::Release);
    }
}
