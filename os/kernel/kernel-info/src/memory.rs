//! # Memory Layout

/// Size of a page frame and of a virtual page.
pub const PAGE_SIZE: u32 = 4096;

/// Physical frame of the kernel's page directory, installed by the loader.
pub const PAGE_DIR_PHYS: u32 = 0x0010_0000; // 1 MiB

/// Low physical memory owned by the loader, BIOS data and the kernel image.
pub const LOW_RESERVED_BYTES: u32 = 0x0010_0000;

/// Frames holding the directory and the loader's static page tables
/// (directory, low table, and tables 769..=1022).
pub const STATIC_PAGE_TABLE_BYTES: u32 = 256 * PAGE_SIZE;

/// Physical address where the loader stores the probed memory size (bytes, `u32`).
pub const TOTAL_MEMORY_PROBE_ADDR: u32 = 0x0b00;

/// Virtual base of the pool and kernel-space bitmaps.
///
/// The kernel stack top sits at `0xc009_f000`; the main thread's PCB takes
/// `0xc009_e000`, which leaves four pages below it for bitmaps.
pub const MEM_BITMAP_BASE: u32 = 0xc009_a000;

/// Bytes available for bitmaps at [`MEM_BITMAP_BASE`].
pub const MEM_BITMAP_WINDOW: u32 = 4 * PAGE_SIZE;

/// First kernel-space address; every directory slot from here on is shared.
pub const KERNEL_SPACE_START: u32 = 0xc000_0000;

/// Start of the kernel virtual space managed by the kernel bitmap.
pub const KERNEL_HEAP_START: u32 = 0xc010_0000;

/// Start of every process's user virtual space.
pub const USER_VADDR_START: u32 = 0x0804_8000;

/// The top user page, reserved for the ring-3 stack.
pub const USER_STACK3_VADDR: u32 = KERNEL_SPACE_START - PAGE_SIZE;

/// Bitmap bytes needed to track the user virtual space of one process.
pub const USER_VSPACE_BITMAP_BYTES: usize =
    ((KERNEL_SPACE_START - USER_VADDR_START) / PAGE_SIZE / 8) as usize;

/// First page-directory slot of the kernel half.
pub const KERNEL_PDE_START: usize = (KERNEL_SPACE_START >> 22) as usize;

/// The page-directory slot that maps the directory onto itself.
pub const SELF_MAP_PDE: usize = 1023;

/// Upper (exclusive) bound for a single page-granular request: 15 MiB.
pub const MAX_PAGES_PER_REQUEST: usize = 3840;

/// Heap requests above this many bytes bypass the block classes.
pub const LARGE_ALLOC_THRESHOLD: usize = 1024;

/// Number of block classes: 16, 32, 64, 128, 256, 512, 1024 bytes.
pub const BLOCK_CLASS_COUNT: usize = 7;

/// Block size of the smallest class.
pub const MIN_BLOCK_SIZE: usize = 16;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(PAGE_DIR_PHYS == LOW_RESERVED_BYTES);
    assert!(KERNEL_PDE_START == 768);
    assert!(KERNEL_HEAP_START > KERNEL_SPACE_START);
    assert!(USER_VADDR_START.is_multiple_of(PAGE_SIZE));
    assert!(MEM_BITMAP_BASE + MEM_BITMAP_WINDOW <= 0xc009_e000);
    assert!(MIN_BLOCK_SIZE << (BLOCK_CLASS_COUNT - 1) == LARGE_ALLOC_THRESHOLD);
    assert!(LARGE_ALLOC_THRESHOLD < PAGE_SIZE as usize);
};
