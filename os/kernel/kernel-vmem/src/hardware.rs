//! # Hardware MMU access
//!
//! Plain volatile pointer accesses in the current address space, `invlpg`,
//! and `mov cr3`. Ring 0 only.

use crate::Mmu;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// The MMU of the executing CPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentMmu;

impl Mmu for CurrentMmu {
    #[inline]
    unsafe fn read_u32(&self, va: VirtualAddress) -> u32 {
        unsafe { va.as_mut_ptr::<u32>().read_volatile() }
    }

    #[inline]
    unsafe fn write_u32(&self, va: VirtualAddress, value: u32) {
        unsafe { va.as_mut_ptr::<u32>().write_volatile(value) }
    }

    #[inline]
    unsafe fn read_u8(&self, va: VirtualAddress) -> u8 {
        unsafe { va.as_mut_ptr::<u8>().read_volatile() }
    }

    #[inline]
    unsafe fn write_u8(&self, va: VirtualAddress, value: u8) {
        unsafe { va.as_mut_ptr::<u8>().write_volatile(value) }
    }

    #[inline]
    unsafe fn fill(&self, va: VirtualAddress, byte: u8, len: usize) {
        unsafe { core::ptr::write_bytes(va.as_mut_ptr::<u8>(), byte, len) }
    }

    #[inline]
    unsafe fn copy(&self, dst: VirtualAddress, src: VirtualAddress, len: usize) {
        unsafe { core::ptr::copy_nonoverlapping(src.as_mut_ptr::<u8>(), dst.as_mut_ptr::<u8>(), len) }
    }

    #[inline]
    fn invalidate_page(&self, va: VirtualAddress) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_usize(), options(nostack, preserves_flags));
        }
    }

    #[inline]
    unsafe fn load_directory(&self, directory: PhysicalAddress) {
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) directory.as_usize(), options(nostack, preserves_flags));
        }
    }
}
