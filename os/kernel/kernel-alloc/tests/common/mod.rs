//! Shared fixtures: a machine with the loader's tables in simulated RAM and
//! interrupt control that only counts.

#![allow(dead_code)]

use kernel_alloc::MemoryManager;
use kernel_sync::{InterruptControl, RawSpin};
use kernel_vmem::SoftMmu;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const MIB: u32 = 1024 * 1024;
pub const PAGE: u32 = 4096;

/// Interrupt flag of a CPU that is never interrupted.
pub struct FakeIrq {
    enabled: AtomicBool,
    disables: AtomicUsize,
}

impl Default for FakeIrq {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            disables: AtomicUsize::new(0),
        }
    }
}

impl FakeIrq {
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn disables(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }
}

impl InterruptControl for FakeIrq {
    fn disable(&self) -> bool {
        self.disables.fetch_add(1, Ordering::SeqCst);
        self.enabled.swap(false, Ordering::SeqCst)
    }

    fn restore(&self, were_enabled: bool) {
        self.enabled.store(were_enabled, Ordering::SeqCst);
    }
}

pub type Manager<'a> = MemoryManager<'a, SoftMmu, RawSpin, FakeIrq>;

/// Bitmap window as large as the kernel reserves for it.
pub fn bitmap_window() -> Vec<u8> {
    vec![0xAA; 4 * PAGE as usize]
}

/// A manager on a fresh machine with `total` bytes of RAM.
pub fn boot(total: u32, window: &mut [u8]) -> Manager<'_> {
    let mmu = SoftMmu::with_loader_tables(total);
    unsafe { MemoryManager::boot(mmu, FakeIrq::default(), window) }.expect("layout fits")
}
