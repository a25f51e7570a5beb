use crate::{RawLock, RawUnlock};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicUsize, Ordering};

/// How a contended acquirer waits for its turn.
///
/// The scheduler implements this to suspend the calling thread until the
/// holder releases; [`SpinWait`] busy-waits and is usable before threads exist.
pub trait Waiter {
    /// Give up the CPU until the lock may have changed hands.
    fn wait(&self);

    /// Called after every release so a suspended acquirer can run again.
    fn notify(&self);
}

/// Busy-waiting [`Waiter`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinWait;

impl Waiter for SpinWait {
    #[inline]
    fn wait(&self) {
        spin_loop();
    }

    #[inline]
    fn notify(&self) {}
}

/// FIFO ticket lock; contended acquirers are served in arrival order.
pub struct RawTicket<W = SpinWait> {
    next: AtomicUsize,
    owner: AtomicUsize,
    waiter: W,
}

impl<W: Default> Default for RawTicket<W> {
    fn default() -> Self {
        Self::with_waiter(W::default())
    }
}

impl RawTicket<SpinWait> {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_waiter(SpinWait)
    }
}

impl<W> RawTicket<W> {
    #[must_use]
    pub const fn with_waiter(waiter: W) -> Self {
        Self {
            next: AtomicUsize::new(0),
            owner: AtomicUsize::new(0),
            waiter,
        }
    }
}

impl<W: Waiter> RawTicket<W> {
    #[inline]
    pub fn lock(&self) {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        // Acquire when we observe our turn
        while self.owner.load(Ordering::Acquire) != ticket {
            self.waiter.wait();
        }
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        let owner = self.owner.load(Ordering::Relaxed);
        let next = self.next.load(Ordering::Relaxed);
        next == owner
            && self
                .next
                .compare_exchange(next, next + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    #[inline]
    pub unsafe fn unlock(&self) {
        let t = self.owner.load(Ordering::Relaxed);
        self.owner.store(t + 1, Ordering::Release);
        self.waiter.notify();
    }
}

impl<W: Waiter> RawLock for RawTicket<W> {
    fn raw_lock(&self) {
        self.lock();
    }

    fn raw_try_lock(&self) -> bool {
        self.try_lock()
    }
}

impl<W: Waiter> RawUnlock for RawTicket<W> {
    unsafe fn raw_unlock(&self) {
        unsafe { self.unlock() }
    }
}
