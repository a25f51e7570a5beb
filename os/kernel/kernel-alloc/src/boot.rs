//! # Boot entry
//!
//! Brings the memory manager up exactly once, on the loader's page tables,
//! with the boot bitmaps in the fixed metadata window.

use crate::error::LayoutError;
use crate::manager::MemoryManager;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_info::memory::{MEM_BITMAP_BASE, MEM_BITMAP_WINDOW};
use kernel_sync::{InterruptControl, RawLock, RawUnlock};
use kernel_vmem::Mmu;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Probes physical memory, lays out both pools and the kernel virtual space
/// and returns the manager that owns them.
///
/// # Errors
/// If the machine does not fit the fixed layout.
///
/// # Panics
/// On a second call.
///
/// # Safety
/// - Must run at CPL0 on the loader's page tables.
/// - The metadata window at `MEM_BITMAP_BASE` must be mapped and used by
///   nothing else for the rest of the system's life.
pub unsafe fn mem_init<M, R, I>(mmu: M, irq: I) -> Result<MemoryManager<'static, M, R, I>, LayoutError>
where
    M: Mmu,
    R: RawLock + RawUnlock + Default,
    I: InterruptControl,
{
    assert!(
        !INITIALIZED.swap(true, Ordering::AcqRel),
        "memory manager initialized twice"
    );
    log::info!("mem_init start");

    let region = unsafe {
        core::slice::from_raw_parts_mut(MEM_BITMAP_BASE as usize as *mut u8, MEM_BITMAP_WINDOW as usize)
    };
    let manager = unsafe { MemoryManager::boot(mmu, irq, region) }?;

    log::info!("mem_init done");
    Ok(manager)
}
