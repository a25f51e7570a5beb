//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for 32-bit linear and physical addresses and the
//! page bases derived from them.
//!
//! ## Overview
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Linear addresses, translated by the page tables. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Physical RAM frames. |
//!
//! ## Page Sizes
//!
//! - [`Size4K`]: the 4 KiB leaf granularity
//! - [`Size4M`]: the span of one page-directory entry
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xC010_0ABC);
//! let page = va.page::<Size4K>();
//! assert_eq!(page.base().as_u32(), 0xC010_0000);
//! assert_eq!(page.base() + va.offset::<Size4K>(), va);
//! assert_eq!(va.page::<Size4M>().number(), 0x300);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page;
mod page_size;
mod physical_address;
mod virtual_address;

pub use page::{PhysicalPage, VirtualPage};
pub use page_size::{PageSize, Size4K, Size4M};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;
