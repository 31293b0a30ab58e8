//! Kernel state locking mechanism (the critical-section guard).
//!
//! Entering the *CPU Lock* state raises the port's interrupt-priority
//! threshold to exclude the timer and dispatch-request interrupts; leaving
//! restores the exact previous threshold, so nested uses at the port level
//! compose. The kernel-level guard additionally carries a singleton token
//! that unlocks [`CpuLockCell`], making "kernel state is only touched
//! inside the guard" a type-system property.
use core::ops;

use tokenlock::UnsyncTokenLock;

use super::{error::BadContextError, PortThreading};
use crate::utils::Init;

pub(super) struct CpuLockTag<System>(System);

/// The key that "unlocks" [`CpuLockCell`].
pub(super) type CpuLockToken<System> = tokenlock::UnsyncSingletonToken<CpuLockTag<System>>;

/// The keyhole type for [`UnsyncTokenLock`] that can be "unlocked" by
/// [`CpuLockToken`].
pub(super) type CpuLockKeyhole<System> = tokenlock::SingletonTokenId<CpuLockTag<System>>;

/// Cell type that can be accessed by [`CpuLockToken`] (which can be obtained
/// by [`lock_cpu`]).
pub(super) struct CpuLockCell<System, T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole<System>>);

impl<System, T> CpuLockCell<System, T> {
    pub(super) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::INIT, x))
    }
}

impl<System, T: Init> Init for CpuLockCell<System, T> {
    const INIT: Self = Self(Init::INIT);
}

impl<System, T> ops::Deref for CpuLockCell<System, T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole<System>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<System, T> ops::DerefMut for CpuLockCell<System, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Attempt to enter a CPU Lock state and get an RAII guard.
/// Return `BadContext` if the kernel is already in a CPU Lock state.
pub(super) fn lock_cpu<System: PortThreading>() -> Result<CpuLockGuard<System>, BadContextError> {
    // Safety: `try_enter_cpu_lock` is only meant to be called by the kernel
    if let Some(prev) = unsafe { System::try_enter_cpu_lock() } {
        Ok(CpuLockGuard {
            // Safety: We just entered a CPU Lock state. This also means
            //         there are no other tokens existing at this point.
            token: unsafe { CpuLockToken::new_unchecked() },
            prev,
        })
    } else {
        Err(BadContextError)
    }
}

/// Assume a CPU Lock state and get a bare [`CpuLockToken`] (without the
/// threshold-restoring behavior of [`CpuLockGuard`]).
///
/// # Safety
///
/// The system must be really in a CPU Lock state, and there must be no
/// other token or guard existing at the point of the call.
pub(super) unsafe fn assume_cpu_lock<System: PortThreading>() -> CpuLockToken<System> {
    debug_assert!(System::is_cpu_lock_active());

    // Safety: upheld by the caller
    unsafe { CpuLockToken::new_unchecked() }
}

/// RAII guard for a CPU Lock state.
///
/// [`CpuLockToken`] can be borrowed from this type. Dropping the guard
/// restores the interrupt-priority threshold that was in effect when the
/// guard was created, on every exit path including early returns.
pub(super) struct CpuLockGuard<System: PortThreading> {
    token: CpuLockToken<System>,
    prev: System::InterruptThreshold,
}

impl<System: PortThreading> CpuLockGuard<System> {
    /// Momentarily leave the CPU Lock state with a dispatch request pending,
    /// then re-enter it. The context switch (if any) is serviced inside the
    /// unlocked window; blocked tasks resume from here.
    pub(super) fn yield_cpu(&mut self) {
        // Safety: CPU Lock is active and controlled by this guard. No kernel
        // state is accessed until the lock is re-acquired: the token cannot
        // be used while `self` is mutably borrowed.
        unsafe {
            System::leave_cpu_lock(self.prev);
            System::pend_switch();
            self.prev = System::enter_cpu_lock();
        }
    }
}

impl<System: PortThreading> Drop for CpuLockGuard<System> {
    fn drop(&mut self) {
        // Safety: CPU Lock is currently active, and it's us (the kernel) who
        // are currently controlling the CPU Lock state
        unsafe {
            System::leave_cpu_lock(self.prev);
        }
    }
}

impl<System: PortThreading> ops::Deref for CpuLockGuard<System> {
    type Target = CpuLockToken<System>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<System: PortThreading> ops::DerefMut for CpuLockGuard<System> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}
