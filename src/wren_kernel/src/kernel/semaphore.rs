//! Semaphores
use core::fmt;

use super::{
    collection::{CollectionTag, OrderedList},
    error::{BadIdError, CreateError, DeleteError, QueryError, ReleaseError, TakeError},
    klock, task,
    task::WaitNodeAccess,
    wait::{self, WaitOutcome},
    Id, Kernel, KernelCfg, KernelState, UTicks,
};
use crate::utils::{pool::PoolPtr, Init};

/// Represents a single semaphore in a system.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId(Id);

impl SemaphoreId {
    /// Get the raw ID value.
    pub const fn raw(self) -> Id {
        self.0
    }

    #[inline]
    const fn ptr(self) -> PoolPtr {
        PoolPtr::from_raw(self.0)
    }

    #[inline]
    const fn from_ptr(ptr: PoolPtr) -> Self {
        Self(ptr.raw())
    }
}

impl fmt::Debug for SemaphoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SemaphoreId").field(&self.0).finish()
    }
}

/// *Semaphore control block* - the state data of a semaphore.
pub(super) struct SemaphoreCb {
    /// The non-negative permit count.
    count: u32,

    /// Tasks blocked on [`take`], ordered by effective priority.
    pub(super) wait_queue: OrderedList<WaitNodeAccess>,
}

/// Construct a semaphore with the given initial count.
pub fn create<System: Kernel>(initial: u32) -> Result<SemaphoreId, CreateError> {
    let mut lock = klock::lock_cpu::<System>()?;
    let state = System::state().write(&mut *lock);
    let cb = SemaphoreCb {
        count: initial,
        wait_queue: Init::INIT,
    };
    match state.semaphores.allocate(cb) {
        Ok(ptr) => Ok(SemaphoreId::from_ptr(ptr)),
        Err(_) => Err(CreateError::OutOfMemory),
    }
}

/// Destroy a semaphore.
///
/// Destroying a semaphore while tasks are blocked on it is an application
/// error; the kernel does not detect it.
pub fn delete<System: Kernel>(sem: SemaphoreId) -> Result<(), DeleteError> {
    let mut lock = klock::lock_cpu::<System>()?;
    let state = System::state().write(&mut *lock);
    let cb = state.semaphores.get_mut(sem.ptr()).ok_or(BadIdError)?;
    debug_assert!(cb.wait_queue.is_empty(), "semaphore deleted with waiters");
    state.semaphores.deallocate(sem.ptr());
    Ok(())
}

/// Get the current permit count.
pub fn get<System: Kernel>(sem: SemaphoreId) -> Result<u32, QueryError> {
    let lock = klock::lock_cpu::<System>()?;
    let state = System::state().read(&*lock);
    Ok(state.semaphores.get(sem.ptr()).ok_or(BadIdError)?.count)
}

/// Signal the semaphore.
///
/// If tasks are blocked on it, the highest-priority one is woken (its
/// pending timeout cancelled) and a dispatch is requested if it outranks
/// the running task. Callable from interrupt context.
pub fn release<System: Kernel>(sem: SemaphoreId) -> Result<(), ReleaseError> {
    let mut lock = klock::lock_cpu::<System>()?;
    {
        let state = System::state().write(&mut *lock);
        let KernelState {
            semaphores, sched, ..
        } = state;
        let cb = semaphores.get_mut(sem.ptr()).ok_or(BadIdError)?;
        wait::wake_one(sched, &mut cb.wait_queue);
        cb.count += 1;
    }
    task::unlock_cpu_and_check_preemption(lock);
    Ok(())
}

/// Take one permit, blocking for up to `timeout` ticks.
///
/// A `timeout` of zero makes this a non-blocking poll: if no permit is
/// available the call fails immediately. A failure on timeout is a normal,
/// expected outcome.
pub fn take<System: Kernel>(sem: SemaphoreId, timeout: UTicks) -> Result<(), TakeError> {
    let mut lock = klock::lock_cpu::<System>()?;
    let ptr = sem.ptr();

    {
        let state = System::state().write(&mut *lock);
        let cb = state.semaphores.get_mut(ptr).ok_or(BadIdError)?;
        if cb.count > 0 {
            cb.count -= 1;
            return Ok(());
        }
    }

    if timeout == 0 {
        return Err(TakeError::Timeout);
    }
    task::expect_waitable_context::<System>()?;

    let task = {
        let state = System::state().write(&mut *lock);
        let KernelState {
            semaphores, sched, ..
        } = state;
        let cb = semaphores.get_mut(ptr).ok_or(BadIdError)?;
        wait::begin_wait(
            sched,
            &mut cb.wait_queue,
            CollectionTag::SemaphoreWait(ptr.get()),
            timeout,
        )
    };

    // Safety: the request is serviced once the lock is relinquished
    unsafe { System::pend_switch() };
    task::wait_until_woken_up(&mut lock, task);

    let state = System::state().write(&mut *lock);
    let KernelState {
        semaphores, sched, ..
    } = state;
    let cb = semaphores.get_mut(ptr).ok_or(BadIdError)?;
    match wait::finish_wait(sched, &mut cb.wait_queue, task) {
        WaitOutcome::TimedOut => Err(TakeError::Timeout),
        WaitOutcome::Signaled => {
            // `release` deposited the permit before waking us
            debug_assert!(cb.count > 0);
            cb.count -= 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{define_test_kernel, pick_first_task, running_task};
    use super::super::{task, timeout, PortToKernel};
    use super::*;

    fn noop_entry(_: usize) -> ! {
        unreachable!()
    }

    #[test]
    fn take_with_permits_never_blocks() {
        define_test_kernel!(System, port);
        task::create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        pick_first_task::<System>();

        let sem = create::<System>(2).unwrap();
        assert_eq!(take::<System>(sem, 0), Ok(()));
        assert_eq!(take::<System>(sem, 0), Ok(()));
        assert_eq!(get::<System>(sem), Ok(0));
        // Exhausted; a poll fails without blocking
        assert_eq!(take::<System>(sem, 0), Err(TakeError::Timeout));
    }

    #[test]
    fn count_stays_conserved() {
        define_test_kernel!(System, port);
        task::create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        pick_first_task::<System>();

        let sem = create::<System>(0).unwrap();
        for _ in 0..3 {
            release::<System>(sem).unwrap();
        }
        assert_eq!(get::<System>(sem), Ok(3));
        for _ in 0..3 {
            take::<System>(sem, 0).unwrap();
        }
        assert_eq!(get::<System>(sem), Ok(0));
        assert_eq!(take::<System>(sem, 0), Err(TakeError::Timeout));
    }

    #[test]
    fn take_times_out_exactly_and_unlinks() {
        define_test_kernel!(System, port);
        let t = task::create::<System>(noop_entry, 0, 128, 2, 0).unwrap();
        let _idle = task::create::<System>(noop_entry, 0, 128, 0, 0).unwrap();
        pick_first_task::<System>();
        assert_eq!(running_task::<System>(), Some(t));

        let sem = create::<System>(0).unwrap();
        port::HOOK
            .lock()
            .unwrap()
            .replace(Box::new(|| unsafe { System::timer_tick() }));

        assert_eq!(take::<System>(sem, 10), Err(TakeError::Timeout));

        // The failure occurred exactly at tick 10, and the task is no
        // longer linked in the semaphore's wait collection
        assert_eq!(timeout::now::<System>().unwrap(), 10);
        let lock = crate::kernel::test_utils::lock_for_test::<System>();
        let state = System::state().read(&*lock);
        assert!(state.semaphores[sem.ptr()].wait_queue.is_empty());
        assert!(!state.sched.tasks[t.ptr()].wait_node.is_linked());
    }

    #[test]
    fn release_wakes_highest_priority_waiter() {
        define_test_kernel!(System, port);
        let t_hi = task::create::<System>(noop_entry, 0, 128, 5, 0).unwrap();
        let _t_lo = task::create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        pick_first_task::<System>();
        assert_eq!(running_task::<System>(), Some(t_hi));

        let sem = create::<System>(0).unwrap();

        // The running (high-priority) task blocks; the hook then releases
        // the semaphore "from" the low-priority task on its first run.
        let released = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let released2 = released.clone();
        port::HOOK.lock().unwrap().replace(Box::new(move || {
            if !released2.swap(true, std::sync::atomic::Ordering::Relaxed) {
                release::<System>(sem).unwrap();
            } else {
                unsafe { System::timer_tick() }
            }
        }));

        assert_eq!(take::<System>(sem, 100), Ok(()));
        // Signaled, not timed out: the permit transferred and the count is
        // back to zero
        assert_eq!(get::<System>(sem), Ok(0));
        assert_eq!(running_task::<System>(), Some(t_hi));
        assert!(timeout::now::<System>().unwrap() < 100);
    }
}
