//! # Self-map address fabrication
//!
//! Directory slot 1023 holds the directory's own frame. Walking through that
//! slot makes the directory act as the page table for the top 4 MiB, so:
//!
//! - `0xFFC0_0000 + d * 4 KiB` is the page table behind directory slot `d`;
//! - `0xFFFF_F000` (slot 1023 of that window) is the directory itself.
//!
//! Both are pure arithmetic on the target address; no physical-to-virtual
//! lookup is needed.

use crate::index::{DirectoryIndex, TableIndex, split_indices};
use kernel_info::memory::SELF_MAP_PDE;
use kernel_memory_addresses::VirtualAddress;

/// Where all page tables of the active address space appear.
#[allow(clippy::cast_possible_truncation)]
pub const TABLES_BASE: VirtualAddress = VirtualAddress::new((SELF_MAP_PDE as u32) << 22);

/// Where the active page directory appears.
#[allow(clippy::cast_possible_truncation)]
pub const DIRECTORY_BASE: VirtualAddress =
    VirtualAddress::new(TABLES_BASE.as_u32() | ((SELF_MAP_PDE as u32) << 12));

/// Virtual address of directory entry `index` of the active directory.
#[inline]
#[must_use]
pub const fn directory_entry_at(index: DirectoryIndex) -> VirtualAddress {
    VirtualAddress::new(DIRECTORY_BASE.as_u32() + index.byte_offset())
}

/// Virtual address of the directory entry governing `va`.
#[inline]
#[must_use]
pub const fn directory_entry_of(va: VirtualAddress) -> VirtualAddress {
    directory_entry_at(DirectoryIndex::of(va))
}

/// Virtual address of the page table behind the directory slot of `va`.
///
/// Only dereferenceable while that directory entry is present.
#[inline]
#[must_use]
pub const fn table_of(va: VirtualAddress) -> VirtualAddress {
    VirtualAddress::new(TABLES_BASE.as_u32() + ((va.as_u32() & 0xFFC0_0000) >> 10))
}

/// Virtual address of the leaf entry mapping `va`.
#[inline]
#[must_use]
pub const fn table_entry_of(va: VirtualAddress) -> VirtualAddress {
    let (_, table) = split_indices(va);
    table_entry_at(table_of(va), table)
}

#[inline]
const fn table_entry_at(table: VirtualAddress, index: TableIndex) -> VirtualAddress {
    VirtualAddress::new(table.as_u32() + index.byte_offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::Size4K;

    #[test]
    fn window_bases() {
        assert_eq!(TABLES_BASE.as_u32(), 0xFFC0_0000);
        assert_eq!(DIRECTORY_BASE.as_u32(), 0xFFFF_F000);
    }

    #[test]
    fn directory_entry_addresses() {
        assert_eq!(directory_entry_of(VirtualAddress::new(0)).as_u32(), 0xFFFF_F000);
        assert_eq!(
            directory_entry_of(VirtualAddress::new(0xC010_0000)).as_u32(),
            0xFFFF_F000 + 768 * 4
        );
        assert_eq!(
            directory_entry_at(DirectoryIndex::new(1023)).as_u32(),
            0xFFFF_FFFC
        );
    }

    #[test]
    fn table_entry_addresses() {
        let va = VirtualAddress::new(0xC010_1000);
        assert_eq!(table_of(va).as_u32(), 0xFFF0_0000);
        assert_eq!(table_entry_of(va).as_u32(), 0xFFF0_0000 + 0x101 * 4);

        let user = VirtualAddress::new(0x0804_8000);
        assert_eq!(table_entry_of(user).as_u32(), 0xFFC0_0000 + 0x20 * 0x1000 + 0x48 * 4);
    }

    #[test]
    fn leaf_entry_lies_inside_its_table_page() {
        let va = VirtualAddress::new(0x0804_8000);
        assert_eq!(table_entry_of(va).align_down::<Size4K>(), table_of(va));
    }
}
