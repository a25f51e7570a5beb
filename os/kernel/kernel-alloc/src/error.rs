use crate::pool::PoolKind;
use kernel_vmem::MapError;

/// Recoverable allocation failure.
///
/// Every partially acquired resource has been returned by the time one of
/// these reaches the caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("{0} pool has no free frame")]
    OutOfPhysicalMemory(PoolKind),
    #[error("{0} virtual space has no free run of the requested length")]
    OutOfVirtualSpace(PoolKind),
    #[error(transparent)]
    PageTable(#[from] MapError),
    #[error("cannot allocate {0} bytes")]
    InvalidSize(usize),
}

/// The probed machine does not fit the fixed boot layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("{total:#x} bytes of memory do not cover the {reserved:#x} reserved bytes")]
    TooLittleMemory { total: u32, reserved: u32 },
    #[error("bitmaps need {needed} bytes but the metadata window holds {available}")]
    BitmapWindowExceeded { needed: usize, available: usize },
}
