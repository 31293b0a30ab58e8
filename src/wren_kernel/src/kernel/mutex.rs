//! Mutexes with priority inheritance.
//!
//! Locking is not reentrant: a task calling [`lock`] on a mutex it already
//! owns blocks on itself (and times out if a timeout was given). This is a
//! documented limitation, not a detected error: behavior under double-lock
//! is unspecified by the original locking protocol.
use core::fmt;

use super::{
    collection::{CollectionTag, OrderedList},
    error::{BadContextError, BadIdError, CreateError, DeleteError, LockError, QueryError, UnlockError},
    klock, task,
    task::WaitNodeAccess,
    wait::{self, WaitOutcome},
    Id, Kernel, KernelCfg, KernelState, Priority, UTicks,
};
use crate::utils::{pool::PoolPtr, Init};

/// Represents a single mutex in a system.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId(Id);

impl MutexId {
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

impl fmt::Debug for MutexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MutexId").field(&self.0).finish()
    }
}

/// *Mutex control block* - the state data of a mutex.
pub(super) struct MutexCb {
    /// The task that currently owns the lock. `None` means free.
    owner: Option<PoolPtr>,

    /// The owner's effective priority recorded when it acquired the lock.
    /// Restored exactly on unlock, so inheritance never compounds across
    /// nested acquisitions of different mutexes.
    original_priority: Priority,

    /// Tasks blocked on [`lock`], ordered by effective priority.
    pub(super) wait_queue: OrderedList<WaitNodeAccess>,
}

/// Construct a mutex in the unlocked state.
pub fn create<System: Kernel>() -> Result<MutexId, CreateError> {
    let mut lock = klock::lock_cpu::<System>()?;
    let state = System::state().write(&mut *lock);
    let cb = MutexCb {
        owner: None,
        original_priority: 0,
        wait_queue: Init::INIT,
    };
    match state.mutexes.allocate(cb) {
        Ok(ptr) => Ok(MutexId::from_ptr(ptr)),
        Err(_) => Err(CreateError::OutOfMemory),
    }
}

/// Destroy a mutex.
///
/// Destroying a mutex while it's owned or contended is an application
/// error; the kernel does not detect it.
pub fn delete<System: Kernel>(mutex: MutexId) -> Result<(), DeleteError> {
    let mut lock = klock::lock_cpu::<System>()?;
    let state = System::state().write(&mut *lock);
    let cb = state.mutexes.get_mut(mutex.ptr()).ok_or(BadIdError)?;
    debug_assert!(cb.wait_queue.is_empty(), "mutex deleted with waiters");
    state.mutexes.deallocate(mutex.ptr());
    Ok(())
}

/// Whether the mutex is currently owned.
pub fn is_locked<System: Kernel>(mutex: MutexId) -> Result<bool, QueryError> {
    let lock = klock::lock_cpu::<System>()?;
    let state = System::state().read(&*lock);
    Ok(state.mutexes.get(mutex.ptr()).ok_or(BadIdError)?.owner.is_some())
}

/// Acquire the mutex, blocking for up to `timeout` ticks.
///
/// While the caller is blocked, the owner's effective priority is raised
/// to the caller's if it's lower (priority inheritance), preventing
/// middle-priority tasks from starving the owner.
///
/// A `timeout` of zero makes this a non-blocking attempt.
pub fn lock<System: Kernel>(mutex: MutexId, timeout: UTicks) -> Result<(), LockError> {
    let mut lock = klock::lock_cpu::<System>()?;
    let ptr = mutex.ptr();

    {
        let state = System::state().write(&mut *lock);
        let KernelState { mutexes, sched, .. } = state;
        let cb = mutexes.get_mut(ptr).ok_or(BadIdError)?;
        if cb.owner.is_none() {
            let cur = sched.running_task.ok_or(BadContextError)?;
            cb.owner = Some(cur);
            cb.original_priority = sched.tasks[cur].effective_priority;
            return Ok(());
        }
    }

    if timeout == 0 {
        return Err(LockError::Timeout);
    }
    task::expect_waitable_context::<System>()?;

    let task = {
        let state = System::state().write(&mut *lock);
        let KernelState { mutexes, sched, .. } = state;
        let cb = mutexes.get_mut(ptr).ok_or(BadIdError)?;
        let task = wait::begin_wait(
            sched,
            &mut cb.wait_queue,
            CollectionTag::MutexWait(ptr.get()),
            timeout,
        );

        // Priority inheritance: the owner must never be outranked by a
        // task the caller's priority would let run
        if let Some(owner) = cb.owner {
            let caller_priority = sched.tasks[task].effective_priority;
            if sched.tasks[owner].effective_priority < caller_priority {
                sched.set_effective_priority(owner, caller_priority);
            }
        }
        task
    };

    // Safety: the request is serviced once the lock is relinquished
    unsafe { System::pend_switch() };
    task::wait_until_woken_up(&mut lock, task);

    let state = System::state().write(&mut *lock);
    let KernelState { mutexes, sched, .. } = state;
    let cb = mutexes.get_mut(ptr).ok_or(BadIdError)?;
    match wait::finish_wait(sched, &mut cb.wait_queue, task) {
        WaitOutcome::TimedOut => Err(LockError::Timeout),
        WaitOutcome::Signaled => {
            // Candidacy transfer: `unlock` released the mutex before waking
            // us, so the re-attempt wins
            debug_assert!(cb.owner.is_none());
            cb.owner = Some(task);
            cb.original_priority = sched.tasks[task].effective_priority;
            Ok(())
        }
    }
}

/// Release the mutex.
///
/// The highest-priority waiter (if any) becomes Ready and re-attempts the
/// acquisition; if the owner's effective priority had been raised by
/// inheritance, it reverts to the recorded original.
pub fn unlock<System: Kernel>(mutex: MutexId) -> Result<(), UnlockError> {
    let mut lock = klock::lock_cpu::<System>()?;
    {
        let state = System::state().write(&mut *lock);
        let KernelState { mutexes, sched, .. } = state;
        let cb = mutexes.get_mut(mutex.ptr()).ok_or(BadIdError)?;
        let cur = sched.running_task.ok_or(BadContextError)?;
        if cb.owner != Some(cur) {
            return Err(UnlockError::NotOwner);
        }

        wait::wake_one(sched, &mut cb.wait_queue);

        if sched.tasks[cur].effective_priority != cb.original_priority {
            let original = cb.original_priority;
            sched.set_effective_priority(cur, original);
        }
        cb.owner = None;
    }
    task::unlock_cpu_and_check_preemption(lock);
    Ok(())
}
