//! The RTOS kernel
//!
//! # Contexts
//!
//! Exactly one task executes at a time. Preemption happens only at defined
//! points (the periodic tick, an explicit yield, and synchronization-object
//! releases) through a *deferred dispatch request*
//! ([`PortThreading::pend_switch`]), never mid-instruction.
//!
//! Operations that can block (`take`, `lock`, `send`, `receive`, `sleep`)
//! may only be called from a task context. Interrupt handlers may call the
//! wake-side operations (`release`, non-blocking `send`/`receive`) and
//! request dispatch.
//!
//! # State
//!
//! All mutable kernel state lives in one [`State`] singleton bound to a
//! user-defined system type by [`define_kernel_state!`](crate::define_kernel_state).
//! Every access goes through the critical-section token (`klock`), making
//! "every mutation happens inside the guard" a compile-time property.
use core::{fmt, num::NonZeroUsize, ptr::NonNull};

use crate::utils::{pool::Pool, Init};

pub mod cfg;
mod collection;
pub mod error;
mod klock;
pub mod mqueue;
pub mod mutex;
mod readyqueue;
pub mod semaphore;
pub mod startup;
pub mod task;
pub mod timeout;
pub mod timer;
mod wait;

#[cfg(test)]
pub(crate) mod test_utils;

pub use self::{
    error::*,
    mqueue::QueueId,
    mutex::MutexId,
    semaphore::SemaphoreId,
    task::{TaskCb, TaskId},
    timer::TimerId,
};

/// Numeric value used to identify various kinds of kernel objects.
pub type Id = NonZeroUsize;

/// Unsigned integer type representing a tick count. The tick counter wraps
/// around after `UTicks::MAX` ticks.
pub type UTicks = u32;

/// Task scheduling key. The dispatcher always selects the Ready task with
/// the *maximal* key; `0` is reserved for the idle task.
///
/// A deadline-ordered configuration would store a negated deadline here so
/// that the same selection rule applies.
pub type Priority = u8;

/// Implemented by a port; provides the context-switch mechanism and the
/// interrupt-masking primitive.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because it's responsible for
/// initializing the execution environment and providing a dispatcher
/// implementation.
///
/// These methods are only meant to be called by the kernel.
pub unsafe trait PortThreading: Sized + 'static {
    /// Saved-context storage embedded in each task control block, updated by
    /// the port on every context switch (typically the saved stack pointer).
    /// Placed at the beginning of [`TaskCb`] so assembly code can refer to
    /// it easily.
    type PortTaskState: Copy + Send + Sync + Init + fmt::Debug + 'static;

    /// The previous interrupt-priority threshold, captured when a critical
    /// section is entered and restored exactly when it's left.
    type InterruptThreshold: Copy + Send + 'static;

    /// The initial value of [`TaskCb::port_task_state`] for all tasks.
    const PORT_TASK_STATE_INIT: Self::PortTaskState;

    /// The alignment requirement for task stack regions.
    const STACK_ALIGN: usize = core::mem::size_of::<usize>();

    /// Prepare the task for execution: set the saved program counter to
    /// [`task::TaskAttr::entry_point`] and the saved stack pointer into the
    /// stack region, so that the task starts from `entry_point` next time it
    /// receives the control.
    ///
    /// Precondition: CPU Lock active, the task is not running.
    unsafe fn initialize_task_state(task: &mut TaskCb<Self>);

    /// Transfer the control to the task chosen by
    /// [`PortToKernel::choose_running_task`], discarding the current
    /// (startup) context.
    ///
    /// Precondition: CPU Lock active, startup phase.
    unsafe fn dispatch_first_task() -> !;

    /// Request a deferred context switch (e.g. pend the dispatch exception).
    /// Idempotent: multiple requests made before the switch is serviced
    /// coalesce into one.
    unsafe fn pend_switch();

    /// Raise the interrupt-priority threshold to exclude the timer and
    /// dispatch interrupts (but not higher-priority hardware interrupts),
    /// returning the previous threshold.
    unsafe fn enter_cpu_lock() -> Self::InterruptThreshold;

    /// Restore the interrupt-priority threshold to exactly `prev` (not a
    /// fixed "unmasked" value), so that nested uses compose.
    unsafe fn leave_cpu_lock(prev: Self::InterruptThreshold);

    /// Like [`Self::enter_cpu_lock`], but fail and return `None` if the CPU
    /// Lock is already active.
    unsafe fn try_enter_cpu_lock() -> Option<Self::InterruptThreshold>;

    /// Return a flag indicating whether the CPU Lock state is active.
    fn is_cpu_lock_active() -> bool;

    /// Return a flag indicating whether the processor is executing a task
    /// (as opposed to an interrupt handler or the startup code).
    fn is_task_context() -> bool;
}

/// Implemented by a port; provides the block/page heap allocator consumed
/// for task stacks and queue storage.
///
/// # Safety
///
/// `allocate` must return memory valid until the matching `free`, aligned
/// to at least [`PortThreading::STACK_ALIGN`].
pub unsafe trait PortHeap: Sized + 'static {
    /// Allocate `size` bytes. Returns `None` on exhaustion; the kernel
    /// propagates the failure to the caller and performs no retry.
    unsafe fn allocate(size: usize) -> Option<NonNull<u8>>;

    /// Release a block previously returned by [`Self::allocate`].
    unsafe fn free(ptr: NonNull<u8>);
}

/// Associates a system type with its kernel-private state. Implemented by
/// [`define_kernel_state!`].
///
/// # Safety
///
/// `state` must return the same instance every time.
pub unsafe trait KernelCfg: PortThreading + Sized + 'static {
    /// Access the kernel's global state.
    fn state() -> &'static State<Self>;
}

/// Represents "system" types having sufficient trait `impl`s to instantiate
/// the kernel.
pub trait Kernel: PortThreading + PortHeap + KernelCfg + Sized + 'static {}
impl<T: PortThreading + PortHeap + KernelCfg + 'static> Kernel for T {}

/// Methods intended to be called by a port.
///
/// # Safety
///
/// These are only meant to be called by the port.
pub trait PortToKernel {
    /// Initialize runtime structures and enter the first task.
    ///
    /// Should be called exactly once by the port.
    ///
    /// Precondition: CPU Lock active
    unsafe fn boot() -> !;

    /// Advance the tick counter and process expired delays. The port's
    /// periodic timer interrupt handler must call this on every tick.
    ///
    /// Precondition: CPU Lock inactive, an interrupt context
    unsafe fn timer_tick();

    /// Determine the next task to run and commit it as the running task.
    /// The port's dispatch handler calls this before switching contexts.
    ///
    /// Precondition: CPU Lock active / Postcondition: CPU Lock active
    unsafe fn choose_running_task();
}

impl<System: Kernel> PortToKernel for System {
    unsafe fn boot() -> ! {
        startup::start::<Self>()
    }

    unsafe fn timer_tick() {
        timeout::timer_tick::<Self>();
    }

    unsafe fn choose_running_task() {
        // Safety: the caller guarantees an active CPU Lock
        let mut token = unsafe { klock::assume_cpu_lock::<Self>() };
        Self::state().write(&mut token).sched.reschedule();
    }
}

/// Global kernel state. One instance per system type, created by
/// [`define_kernel_state!`](crate::define_kernel_state).
pub struct State<System: PortThreading> {
    cell: klock::CpuLockCell<System, KernelState<System>>,
}

// Safety: the contents are only reachable through the CPU Lock token, of
// which at most one exists at any point in time.
unsafe impl<System: PortThreading> Sync for State<System> {}

impl<System: PortThreading> Init for State<System> {
    const INIT: Self = Self {
        cell: klock::CpuLockCell::new(KernelState::INIT),
    };
}

impl<System: PortThreading> State<System> {
    fn write<'a>(
        &'a self,
        token: &'a mut klock::CpuLockToken<System>,
    ) -> &'a mut KernelState<System> {
        self.cell.write(token)
    }

    fn read<'a>(&'a self, token: &'a klock::CpuLockToken<System>) -> &'a KernelState<System> {
        self.cell.read(token)
    }
}

/// The mutable portion of the kernel state, protected by the CPU Lock.
struct KernelState<System: PortThreading> {
    sched: task::Scheduler<System>,
    semaphores: Pool<semaphore::SemaphoreCb, { cfg::SEMAPHORE_CAPACITY }>,
    mutexes: Pool<mutex::MutexCb, { cfg::MUTEX_CAPACITY }>,
    queues: Pool<mqueue::QueueCb, { cfg::QUEUE_CAPACITY }>,
    timers: Pool<timer::TimerCb, { cfg::TIMER_CAPACITY }>,
    clock_list: collection::OrderedList<timer::TimerNodeAccess>,
}

impl<System: PortThreading> Init for KernelState<System> {
    const INIT: Self = Self {
        sched: Init::INIT,
        semaphores: Init::INIT,
        mutexes: Init::INIT,
        queues: Init::INIT,
        timers: Init::INIT,
        clock_list: Init::INIT,
    };
}

/// Terminal halt handler.
///
/// Invoked on fatal errors that this layer must not try to recover from
/// (stack overflow reported by the port, kernel invariant breaches). Spins
/// forever so the state can be observed by an attached debugger; there is
/// no automatic restart.
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
