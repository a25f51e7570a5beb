/// Enable/disable of maskable interrupts on the current CPU.
///
/// [`disable`](Self::disable) reports whether interrupts were enabled before
/// the call so that [`restore`](Self::restore) can put back exactly that
/// state. Nesting therefore works without a counter.
pub trait InterruptControl {
    /// Masks interrupts and returns whether they were enabled before.
    fn disable(&self) -> bool;

    /// Restores the state returned by a matching [`disable`](Self::disable).
    fn restore(&self, were_enabled: bool);
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// # Examples
///
/// ```no_run
/// use kernel_sync::irq::{CpuInterrupts, IrqGuard};
///
/// {
///     let _g = IrqGuard::new(&CpuInterrupts); // IF cleared if it was set
///     // critical section
/// }
/// // IF restored to prior state
/// ```
pub struct IrqGuard<'a, C: InterruptControl + ?Sized> {
    ctl: &'a C,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a, C: InterruptControl + ?Sized> IrqGuard<'a, C> {
    #[inline]
    #[must_use]
    pub fn new(ctl: &'a C) -> Self {
        let were_enabled = ctl.disable();
        Self { ctl, were_enabled }
    }

    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl<C: InterruptControl + ?Sized> Drop for IrqGuard<'_, C> {
    fn drop(&mut self) {
        self.ctl.restore(self.were_enabled);
    }
}

/// Interrupt control of the executing x86 CPU (`cli`/`sti` and the `IF` flag).
///
/// # Safety & Privilege
///
/// Only usable at ring 0; the instructions fault in user mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuInterrupts;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
impl CpuInterrupts {
    /// Bit 9 of `EFLAGS`/`RFLAGS`.
    const IF: usize = 1 << 9;

    /// Returns the current flags register (via `pushf/pop`).
    #[inline]
    #[must_use]
    pub fn flags() -> usize {
        let r: usize;
        #[cfg(target_arch = "x86")]
        unsafe {
            core::arch::asm!("pushfd; pop {}", out(reg) r, options(nostack, preserves_flags));
        }
        #[cfg(target_arch = "x86_64")]
        unsafe {
            core::arch::asm!("pushfq; pop {}", out(reg) r, options(nostack, preserves_flags));
        }
        r
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
impl InterruptControl for CpuInterrupts {
    #[inline]
    fn disable(&self) -> bool {
        let enabled = Self::flags() & Self::IF != 0;
        if enabled {
            unsafe { core::arch::asm!("cli", options(nomem, nostack)) }
        }
        enabled
    }

    #[inline]
    fn restore(&self, were_enabled: bool) {
        if were_enabled {
            unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
        }
    }
}
