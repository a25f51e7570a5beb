//! # Virtual Memory Support
//!
//! Two-level 32-bit x86 paging for the kernel's memory subsystem.
//!
//! ## What you get
//! - The hardware [`PageEntry`] format shared by directory and table entries.
//! - Typed walk indices ([`DirectoryIndex`], [`TableIndex`]).
//! - The [`PageTableManager`], which maps, unmaps and translates pages in
//!   the **active** address space through the self-map.
//! - A tiny seam to the outside: [`FrameAlloc`] hands out page-table frames,
//!   [`Mmu`] performs memory accesses, TLB invalidation and directory loads.
//!
//! ## x86 Virtual Address → Physical Address Walk
//!
//! ```text
//!  CR3 → Page Directory (1024 × PDE) → Page Table (1024 × PTE) → 4 KiB frame
//!          index = VA[31:22]              index = VA[21:12]       offset = VA[11:0]
//! ```
//!
//! ## The self-map
//!
//! Directory slot 1023 points at the directory itself. Every page table of the
//! active space is then visible at `0xFFC0_0000 + slot * 4 KiB` and the
//! directory at `0xFFFF_F000` (see [`self_map`]). The manager never needs to
//! turn a physical table address back into a pointer; it computes the entry's
//! virtual address from the target address alone. Any code that builds a new
//! directory must install that slot, which [`PageTableManager::init_process_directory`] does.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

#[cfg(any(test, feature = "soft-mmu"))]
extern crate alloc;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod hardware;
mod index;
mod manager;
mod page_entry;
pub mod self_map;
#[cfg(any(test, feature = "soft-mmu"))]
mod soft_mmu;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use crate::hardware::CurrentMmu;
pub use crate::index::{DirectoryIndex, ENTRIES, TableIndex, split_indices};
pub use crate::manager::PageTableManager;
pub use crate::page_entry::PageEntry;
#[cfg(any(test, feature = "soft-mmu"))]
pub use crate::soft_mmu::SoftMmu;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page tables.
///
/// Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame for a page table.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;
}

/// Access to memory through the **active** translation, plus the two
/// privileged paging operations.
///
/// The kernel implementation dereferences addresses directly; the test
/// implementation walks simulated tables in software.
///
/// # Safety
///
/// For every `unsafe` accessor the caller guarantees that all touched bytes
/// are mapped (present and writable for writes) in the active address space
/// and that no other live reference aliases them.
pub trait Mmu {
    /// Aligned 32-bit load.
    unsafe fn read_u32(&self, va: VirtualAddress) -> u32;

    /// Aligned 32-bit store.
    unsafe fn write_u32(&self, va: VirtualAddress, value: u32);

    unsafe fn read_u8(&self, va: VirtualAddress) -> u8;

    unsafe fn write_u8(&self, va: VirtualAddress, value: u8);

    /// Sets `len` bytes starting at `va` to `byte`.
    unsafe fn fill(&self, va: VirtualAddress, byte: u8, len: usize);

    /// Copies `len` bytes; the ranges must not overlap.
    unsafe fn copy(&self, dst: VirtualAddress, src: VirtualAddress, len: usize);

    /// Drops the cached translation of the page containing `va` (`invlpg`).
    fn invalidate_page(&self, va: VirtualAddress);

    /// Switches to the directory at `directory` (`mov cr3`).
    ///
    /// # Safety
    /// The directory must map the executing code and obey the self-map.
    unsafe fn load_directory(&self, directory: PhysicalAddress);
}

/// Failure to install a mapping.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    /// The directory slot was empty and no frame was left for a new table.
    #[error("no frame left for a new page table")]
    OutOfTableFrames,
}
