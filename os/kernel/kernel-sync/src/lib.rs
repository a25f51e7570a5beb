//! # Kernel synchronization primitives
//!
//! Locks are split into a raw part ([`RawLock`] / [`RawUnlock`]) and the data
//! carrying [`Mutex<T, R>`]. The memory subsystem is generic over the raw lock
//! so the scheduler can supply a blocking primitive while host tests use
//! [`RawSpin`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod mutex;
mod raw_spin;
mod raw_ticket;

pub use irq::{CpuInterrupts, InterruptControl, IrqGuard};
pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;
pub use raw_ticket::{RawTicket, SpinWait, Waiter};

pub type SpinMutex<T> = Mutex<T, RawSpin>;

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
}

pub trait RawUnlock {
    unsafe fn raw_unlock(&self);
}
