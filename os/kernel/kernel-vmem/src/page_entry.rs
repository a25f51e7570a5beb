use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// A single 32-bit x86 page-directory or page-table entry in its raw bitfield form.
///
/// Directory entries (PDE) and table entries (PTE) share one layout; only
/// bit 7 differs in meaning (`PS` in a PDE, `PAT` in a PTE). This kernel never
/// uses 4 MiB pages, so a present PDE always points to a page table.
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (PTE only) |
/// | 7         | `PS` / `PAT`      | 4 MiB page (PDE) or PAT index (PTE) |
/// | 8         | `G`               | Global (PTE only) |
/// | 9–11      | OS avail          | Reserved for OS use |
/// | 12–31     | `addr`            | Physical frame bits [31:12] |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntry;
/// let e = PageEntry::new_user_rw().with_physical_address(PhysicalAddress::new(0x0010_0000));
/// assert_eq!(e.into_bits(), 0x0010_0007);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntry {
    /// Present (P, bit 0).
    ///
    /// A clear bit makes every access through this entry fault.
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Set to allow ring-3 access. Permissions are intersected over the walk,
    /// so a user page needs US in both its PDE and its PTE.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5), set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6), set by the CPU on the first write through a PTE.
    pub dirty: bool,

    /// Page Size in a PDE, PAT in a PTE (bit 7). Kept clear.
    pub large_page: bool,

    /// Global (G, bit 8), PTE only.
    pub global_translation: bool,

    /// OS-available (bits 9..=11); ignored by hardware.
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame bits [31:12].
    #[bits(20)]
    frame_number: u32,
}

impl PageEntry {
    /// Mask of the frame address bits.
    pub const FRAME_MASK: u32 = 0xFFFF_F000;

    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_frame_number(phys.as_u32() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, phys: PhysicalAddress) -> Self {
        self.set_physical_address(phys);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_number() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_number(self.frame_number())
    }

    /// Present, writable, supervisor-only.
    #[inline]
    #[must_use]
    pub const fn new_kernel_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(false)
    }

    /// Present, writable, user-accessible. Used for every directory entry.
    #[inline]
    #[must_use]
    pub const fn new_user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_match_hardware_layout() {
        assert_eq!(PageEntry::new_kernel_rw().into_bits(), 0b011);
        assert_eq!(PageEntry::new_user_rw().into_bits(), 0b111);
        assert_eq!(PageEntry::new().with_global_translation(true).into_bits(), 1 << 8);
    }

    #[test]
    fn frame_round_trips_through_upper_bits() {
        let e = PageEntry::from_bits(0xC009_A063);
        assert!(e.present());
        assert!(e.writable());
        assert!(!e.user_access());
        assert!(e.accessed());
        assert!(e.dirty());
        assert_eq!(e.physical_address().as_u32(), 0xC009_A000);
        assert_eq!(e.frame().number(), 0xC009A);

        let mut cleared = e;
        cleared.set_present(false);
        assert_eq!(cleared.into_bits(), 0xC009_A062);
    }
}
