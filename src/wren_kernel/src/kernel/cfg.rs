//! Static kernel configuration.
//!
//! The kernel is fixed-memory: object counts and the priority range are
//! compile-time constants, and the backing storage for every kernel object
//! is reserved inside [`State`](super::State). Only task stacks and queue
//! element storage come from the port's allocator.

/// The number of distinct task priority levels. Priorities range over
/// `0..NUM_PRIORITY_LEVELS`; level `0` is reserved for the idle task.
pub const NUM_PRIORITY_LEVELS: usize = 32;

/// The maximum number of tasks alive at any instant (including the idle
/// task and any deleted tasks not yet reclaimed).
pub const TASK_CAPACITY: usize = 32;

/// The maximum number of semaphores alive at any instant.
pub const SEMAPHORE_CAPACITY: usize = 16;

/// The maximum number of mutexes alive at any instant.
pub const MUTEX_CAPACITY: usize = 16;

/// The maximum number of bounded queues alive at any instant.
pub const QUEUE_CAPACITY: usize = 8;

/// The maximum number of software timers alive at any instant.
pub const TIMER_CAPACITY: usize = 16;

/// The stack size of the built-in idle task, in bytes.
pub const IDLE_TASK_STACK_SIZE: usize = 512;

/// Instantiate the kernel state for a system type.
///
/// Defines the `static` holding [`State`](crate::kernel::State) and binds it
/// to `$System` by implementing [`KernelCfg`](crate::kernel::KernelCfg).
/// The system type must additionally implement
/// [`PortThreading`](crate::kernel::PortThreading) and
/// [`PortHeap`](crate::kernel::PortHeap) (usually supplied by a port crate).
#[macro_export]
macro_rules! define_kernel_state {
    ($System:ty) => {
        const _: () = {
            static KERNEL_STATE: $crate::kernel::State<$System> =
                <$crate::kernel::State<$System> as $crate::utils::Init>::INIT;

            // Safety: `KERNEL_STATE` is the only state instance ever exposed
            // for `$System`
            unsafe impl $crate::kernel::KernelCfg for $System {
                #[inline(always)]
                fn state() -> &'static $crate::kernel::State<$System> {
                    &KERNEL_STATE
                }
            }
        };
    };
}
