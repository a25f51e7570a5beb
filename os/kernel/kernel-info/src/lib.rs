//! # Kernel Memory Configuration
//!
//! The authoritative source for the memory layout the loader hands to the
//! kernel and the memory subsystem builds on. All values are compile-time
//! constants; the single runtime input is the probed amount of physical
//! memory stored by the loader at [`TOTAL_MEMORY_PROBE_ADDR`](memory::TOTAL_MEMORY_PROBE_ADDR).
//!
//! ## Virtual Address Space
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  identity map of the low 1 MiB  │ (loader only)
//! 0x0804_8000 ├─────────────────────────────────┤ USER_VADDR_START
//!             │        User Space               │ (per-process bitmap)
//! 0xbfff_f000 ├─────────────────────────────────┤ USER_STACK3_VADDR
//!             │        ring-3 stack page        │
//! 0xc000_0000 ├─────────────────────────────────┤ KERNEL_SPACE_START
//!             │  low 1 MiB (kernel image, PCB)  │
//! 0xc009_a000 │    pool / vspace bitmaps        │ MEM_BITMAP_BASE
//! 0xc010_0000 ├─────────────────────────────────┤ KERNEL_HEAP_START
//!             │     kernel virtual space        │ (kernel bitmap)
//! 0xffc0_0000 ├─────────────────────────────────┤ directory slot 1023
//!             │ page tables via the self-map    │
//! 0xffff_f000 │ the page directory itself       │
//!             └─────────────────────────────────┘
//! ```
//!
//! ## Physical Memory
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │ BIOS, loader, kernel image      │ LOW_RESERVED_BYTES
//! 0x0010_0000 ├─────────────────────────────────┤ PAGE_DIR_PHYS
//!             │ directory + static page tables  │ STATIC_PAGE_TABLE_BYTES
//! 0x0020_0000 ├─────────────────────────────────┤
//!             │ kernel pool (half of the rest)  │
//!             ├─────────────────────────────────┤
//!             │ user pool (remaining half)      │
//!             └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
