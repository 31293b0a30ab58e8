//! Mock port machinery for in-crate tests.
//!
//! [`define_test_kernel!`] instantiates a fresh system type (with its own
//! kernel state and port statics) inside a test function. The mock port
//! has no real context switch: when a dispatch request is serviced, the
//! test-installed *hook* runs first, standing in for "whatever the other
//! tasks and interrupts would have done", and then the dispatcher commits
//! the next running task. A blocked task's yield loop therefore advances
//! the simulation one hook call at a time.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{klock, task::TaskId, Kernel, KernelCfg, PortToKernel};

pub(super) type Hook = Box<dyn FnMut() + Send>;

/// Upper bound on dispatch services per test; exceeding it means a blocked
/// task is never going to wake.
const SERVICE_LIMIT: usize = 2_000_000;

/// Service a pending dispatch request: run the interleaving hook with the
/// lock inactive, then run the dispatcher like the dispatch exception
/// would. Reentrant calls (from within the hook) only leave the request
/// pending.
pub(super) fn service_dispatch<System: Kernel>(
    pending: &AtomicBool,
    in_service: &AtomicBool,
    services: &AtomicUsize,
    hook: &Mutex<Option<Hook>>,
) {
    if in_service.swap(true, Ordering::Acquire) {
        return;
    }
    if services.fetch_add(1, Ordering::Relaxed) > SERVICE_LIMIT {
        panic!("test deadlock: dispatch serviced {SERVICE_LIMIT} times");
    }

    service_pending::<System>(pending);
    if let Some(hook_fn) = hook.lock().unwrap().as_mut() {
        hook_fn();
    }
    service_pending::<System>(pending);

    in_service.store(false, Ordering::Release);
}

fn service_pending<System: Kernel>(pending: &AtomicBool) {
    if pending.swap(false, Ordering::Relaxed) {
        // The dispatch exception runs with the CPU Lock raised
        unsafe {
            let prev = System::enter_cpu_lock();
            <System as PortToKernel>::choose_running_task();
            System::leave_cpu_lock(prev);
        }
    }
}

/// Simulate the end of the boot phase: commit the first running task.
pub(super) fn pick_first_task<System: Kernel>() {
    let mut lock = klock::lock_cpu::<System>().unwrap();
    System::state().write(&mut *lock).sched.reschedule();
}

/// The task the mock dispatcher last committed.
pub(super) fn running_task<System: Kernel>() -> Option<TaskId> {
    let lock = klock::lock_cpu::<System>().unwrap();
    System::state()
        .read(&*lock)
        .sched
        .running_task
        .map(TaskId::from_ptr)
}

/// Acquire the CPU Lock for direct state inspection in assertions.
pub(super) fn lock_for_test<System: Kernel>() -> klock::CpuLockGuard<System> {
    klock::lock_cpu::<System>().unwrap()
}

/// Mock allocator: a size header in front of each block so `free` needs no
/// layout argument, mirroring the port allocator contract.
pub(super) fn heap_allocate(size: usize) -> Option<core::ptr::NonNull<u8>> {
    const HEADER: usize = 16;
    let layout = std::alloc::Layout::from_size_align(size + HEADER, HEADER).ok()?;
    // Safety: the layout has a nonzero size
    let base = unsafe { std::alloc::alloc(layout) };
    if base.is_null() {
        return None;
    }
    // Safety: `base` is valid for at least `HEADER` bytes
    unsafe { base.cast::<usize>().write(size) };
    core::ptr::NonNull::new(unsafe { base.add(HEADER) })
}

/// Release a block returned by [`heap_allocate`].
///
/// # Safety
///
/// `ptr` must have come from [`heap_allocate`] and not been freed yet.
pub(super) unsafe fn heap_free(ptr: core::ptr::NonNull<u8>) {
    const HEADER: usize = 16;
    unsafe {
        let base = ptr.as_ptr().sub(HEADER);
        let size = base.cast::<usize>().read();
        let layout = std::alloc::Layout::from_size_align_unchecked(size + HEADER, HEADER);
        std::alloc::dealloc(base, layout);
    }
}

/// Instantiate a system type with mock port implementations and its own
/// kernel state. Usable inside a test function; `$port` names a module
/// holding the port's mutable state (`$port::HOOK` is the interleaving
/// hook slot).
macro_rules! define_test_kernel {
    ($System:ident, $port:ident) => {
        struct $System;
        $crate::define_kernel_state!($System);

        mod $port {
            pub static LOCK: std::sync::atomic::AtomicBool =
                std::sync::atomic::AtomicBool::new(false);
            pub static PENDING: std::sync::atomic::AtomicBool =
                std::sync::atomic::AtomicBool::new(false);
            pub static IN_SERVICE: std::sync::atomic::AtomicBool =
                std::sync::atomic::AtomicBool::new(false);
            pub static SERVICES: std::sync::atomic::AtomicUsize =
                std::sync::atomic::AtomicUsize::new(0);
            pub static HOOK: std::sync::Mutex<
                Option<$crate::kernel::test_utils::Hook>,
            > = std::sync::Mutex::new(None);
        }

        unsafe impl $crate::kernel::PortThreading for $System {
            type PortTaskState = ();
            type InterruptThreshold = bool;

            const PORT_TASK_STATE_INIT: Self::PortTaskState = ();

            unsafe fn initialize_task_state(_task: &mut $crate::kernel::TaskCb<Self>) {}

            unsafe fn dispatch_first_task() -> ! {
                panic!("dispatch_first_task is not supported by the mock port");
            }

            unsafe fn pend_switch() {
                $port::PENDING.store(true, std::sync::atomic::Ordering::Relaxed);
                if !Self::is_cpu_lock_active() {
                    $crate::kernel::test_utils::service_dispatch::<$System>(
                        &$port::PENDING,
                        &$port::IN_SERVICE,
                        &$port::SERVICES,
                        &$port::HOOK,
                    );
                }
            }

            unsafe fn enter_cpu_lock() -> bool {
                $port::LOCK.swap(true, std::sync::atomic::Ordering::Acquire)
            }

            unsafe fn leave_cpu_lock(prev: bool) {
                $port::LOCK.store(prev, std::sync::atomic::Ordering::Release);
            }

            unsafe fn try_enter_cpu_lock() -> Option<bool> {
                if $port::LOCK.swap(true, std::sync::atomic::Ordering::Acquire) {
                    None
                } else {
                    Some(false)
                }
            }

            fn is_cpu_lock_active() -> bool {
                $port::LOCK.load(std::sync::atomic::Ordering::Relaxed)
            }

            fn is_task_context() -> bool {
                true
            }
        }

        unsafe impl $crate::kernel::PortHeap for $System {
            unsafe fn allocate(size: usize) -> Option<core::ptr::NonNull<u8>> {
                $crate::kernel::test_utils::heap_allocate(size)
            }

            unsafe fn free(ptr: core::ptr::NonNull<u8>) {
                // Safety: forwarded contract
                unsafe { $crate::kernel::test_utils::heap_free(ptr) }
            }
        }
    };
}
pub(super) use define_test_kernel;
