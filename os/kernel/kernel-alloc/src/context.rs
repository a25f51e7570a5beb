//! # Execution contexts
//!
//! The scheduler tells the allocator who is asking: a kernel thread, which
//! uses the kernel pool, kernel virtual space and kernel block classes, or a
//! process, which brings its own page directory, virtual space and block
//! classes and draws frames from the user pool.

use crate::heap::BlockClasses;
use crate::vspace::VirtualSpace;
use core::fmt;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_sync::{Mutex, RawLock, RawUnlock};

/// Per-process state guarded by the process's own lock.
pub(crate) struct ProcessState<'p> {
    pub(crate) vspace: VirtualSpace<'p>,
    pub(crate) classes: BlockClasses,
}

/// The memory a process owns exclusively.
///
/// Built by [`MemoryManager::new_process_memory`](crate::MemoryManager::new_process_memory)
/// and torn down by [`MemoryManager::release_process_memory`](crate::MemoryManager::release_process_memory).
pub struct ProcessMemory<'p, R> {
    directory: VirtualAddress,
    frame: PhysicalPage<Size4K>,
    pub(crate) state: Mutex<ProcessState<'p>, R>,
}

impl<'p, R> ProcessMemory<'p, R> {
    pub(crate) const fn new(
        directory: VirtualAddress,
        frame: PhysicalPage<Size4K>,
        vspace: VirtualSpace<'p>,
        lock: R,
    ) -> Self {
        Self {
            directory,
            frame,
            state: Mutex::from_raw(
                lock,
                ProcessState {
                    vspace,
                    classes: BlockClasses::new(),
                },
            ),
        }
    }

    /// Kernel address of the page directory.
    #[inline]
    #[must_use]
    pub const fn directory(&self) -> VirtualAddress {
        self.directory
    }

    /// Frame of the page directory; what gets loaded into `CR3`.
    #[inline]
    #[must_use]
    pub const fn directory_frame(&self) -> PhysicalPage<Size4K> {
        self.frame
    }
}

impl<'p, R: RawLock + RawUnlock> ProcessMemory<'p, R> {
    /// Runs `f` on the process's virtual space.
    pub fn inspect_vspace<T>(&self, f: impl FnOnce(&VirtualSpace<'p>) -> T) -> T {
        self.state.with_lock(|state| f(&state.vspace))
    }
}

impl<R> fmt::Debug for ProcessMemory<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessMemory")
            .field("directory", &self.directory)
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

/// Who an allocation is made for.
pub enum Context<'c, 'p, R> {
    /// A kernel thread; it has no page directory of its own.
    Kernel,
    /// A process and the memory it owns.
    Process(&'c ProcessMemory<'p, R>),
}

impl<R> Clone for Context<'_, '_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Context<'_, '_, R> {}

impl<R> fmt::Debug for Context<'_, '_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel => f.write_str("Kernel"),
            Self::Process(p) => f.debug_tuple("Process").field(&p.frame).finish(),
        }
    }
}
