//! # Kernel Memory Allocation
//!
//! Page-granular and byte-granular allocation for a 32-bit kernel with two
//! physical pools, per-address-space virtual bitmaps and a two-tier heap.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Heap (sys_malloc / sys_free)        │
//! │    • 16 .. 1024 byte block classes in arenas        │
//! │    • dedicated page runs above 1024 bytes           │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ pages
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Page allocation path                   │
//! │    1. virtual space: reserve a run of pages         │
//! │    2. physical pool: one frame per page             │
//! │    3. page tables: map (kernel-vmem)                │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                    Bitmaps                          │
//! │    • kernel pool, user pool, kernel virtual space   │
//! │    • one virtual space per process                  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Freeing walks the same path backwards: unmap, return the frame, clear the
//! virtual bits.
//!
//! ## Core Components
//!
//! * [`Bitmap`]: fixed bit vector with first-fit run search.
//! * [`PhysicalPool`]: one contiguous frame range; the kernel pool sits below
//!   the user pool, so the owner of any frame is found by one comparison.
//! * [`VirtualSpace`]: the pages of one address space.
//! * [`MemoryManager`]: owns everything above, serialises it with the
//!   caller's raw lock type and picks the domain from a [`Context`].
//! * [`heap`]: arenas and block classes behind `sys_malloc`/`sys_free`.
//!
//! ## Error Model
//!
//! Running out of frames, virtual pages or table frames is an [`AllocError`]
//! and always leaves the allocator as it was. Broken bookkeeping (double map,
//! double free, foreign frames, corrupt arena headers) panics.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_alloc::{Context, mem_init};
//! use kernel_sync::{CpuInterrupts, RawSpin};
//! use kernel_vmem::CurrentMmu;
//!
//! let mm = unsafe { mem_init::<_, RawSpin, _>(CurrentMmu, CpuInterrupts) }.unwrap();
//! let page = mm.get_kernel_pages(2).unwrap();
//! let block = mm.sys_malloc(Context::Kernel, 100).unwrap();
//! mm.sys_free(Context::Kernel, block);
//! mm.mfree_page(Context::Kernel, page, 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod bitmap;
mod boot;
mod context;
mod domain;
mod error;
pub mod heap;
mod layout;
mod manager;
mod pool;
mod vspace;

pub use crate::bitmap::Bitmap;
pub use crate::boot::mem_init;
pub use crate::context::{Context, ProcessMemory};
pub use crate::error::{AllocError, LayoutError};
pub use crate::heap::{SizeRoute, route};
pub use crate::layout::{BitmapStorage, MemoryLayout};
pub use crate::manager::MemoryManager;
pub use crate::pool::{PhysicalPool, PoolKind};
pub use crate::vspace::VirtualSpace;
