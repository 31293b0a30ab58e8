//! Software timers.
//!
//! Timer callbacks are driven by a dedicated *timer task* (created by
//! [`init`]) that periodically drains a clock list of timer control blocks
//! keyed by the 64-bit absolute tick clock. Callbacks therefore run in
//! task context, outside any critical section, and may call kernel
//! services freely; their latency is bounded by the timer task's priority
//! and check period.
use core::fmt;

use bitflags::bitflags;

use super::{
    collection::{CollectionTag, ListNode, NodeAccess, OrderedCollection},
    error::{BadIdError, CreateError, CreateTaskError, DeleteError, TimerError},
    klock, task,
    task::TaskId,
    Id, Kernel, KernelCfg, KernelState, Priority, UTicks,
};
use crate::utils::{pool::PoolPtr, Init};

/// Represents a single software timer in a system.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(Id);

impl TimerId {
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

impl fmt::Debug for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TimerId").field(&self.0).finish()
    }
}

/// A timer's expiry callback. Runs in the timer task's context.
pub type TimerCallback = fn(TimerId);

bitflags! {
    /// Timer mode bits.
    pub struct TimerFlags: u8 {
        /// The timer is armed (linked into the clock list).
        const ACTIVE = 1 << 0;
        /// Re-arm after each expiry instead of firing once.
        const PERIODIC = 1 << 1;
    }
}

/// *Timer control block* - the state data of a software timer.
pub(super) struct TimerCb {
    /// Clock-list membership node; the key is the absolute expiry time.
    node: ListNode,
    period: u64,
    callback: TimerCallback,
    flags: TimerFlags,
}

/// Projects a timer to its clock-list node.
pub(super) struct TimerNodeAccess;

impl NodeAccess<TimerCb> for TimerNodeAccess {
    #[inline]
    fn node(timer: &TimerCb) -> &ListNode {
        &timer.node
    }
    #[inline]
    fn node_mut(timer: &mut TimerCb) -> &mut ListNode {
        &mut timer.node
    }
}

/// Spawn the timer task. `check_period` is the polling interval in ticks;
/// it bounds callback latency together with `priority`.
pub fn init<System: Kernel>(
    priority: Priority,
    stack_size: usize,
    check_period: UTicks,
) -> Result<TaskId, CreateTaskError> {
    task::create::<System>(
        timer_task_body::<System>,
        check_period as usize,
        stack_size,
        priority,
        0,
    )
}

fn timer_task_body<System: Kernel>(check_period: usize) -> ! {
    loop {
        drain_expired::<System>();
        let _ = task::sleep::<System>(check_period as UTicks);
    }
}

/// Construct a timer firing `period` ticks from now (and every `period`
/// ticks thereafter if `PERIODIC`). Pass `flags` without `ACTIVE` to
/// create it stopped.
pub fn create<System: Kernel>(
    callback: TimerCallback,
    period: u64,
    flags: TimerFlags,
) -> Result<TimerId, CreateError> {
    let mut lock = klock::lock_cpu::<System>()?;
    let state = System::state().write(&mut *lock);
    let KernelState {
        timers,
        clock_list,
        sched,
        ..
    } = state;

    let cb = TimerCb {
        node: Init::INIT,
        period,
        callback,
        flags,
    };
    let ptr = match timers.allocate(cb) {
        Ok(ptr) => ptr,
        Err(_) => return Err(CreateError::OutOfMemory),
    };
    if flags.contains(TimerFlags::ACTIVE) {
        let at = sched.absolute_clock + period;
        clock_list.insert(timers, ptr, at, CollectionTag::Clock);
    }
    Ok(TimerId::from_ptr(ptr))
}

/// Destroy a timer, disarming it first if necessary.
pub fn delete<System: Kernel>(timer: TimerId) -> Result<(), DeleteError> {
    let mut lock = klock::lock_cpu::<System>()?;
    let state = System::state().write(&mut *lock);
    let KernelState {
        timers, clock_list, ..
    } = state;
    let ptr = timer.ptr();
    if timers.get(ptr).ok_or(BadIdError)?.node.is_linked() {
        clock_list.remove(timers, ptr);
    }
    timers.deallocate(ptr);
    Ok(())
}

/// Disarm a timer. A periodic timer stops re-arming; a pending expiry is
/// cancelled.
pub fn stop<System: Kernel>(timer: TimerId) -> Result<(), TimerError> {
    let mut lock = klock::lock_cpu::<System>()?;
    let state = System::state().write(&mut *lock);
    let KernelState {
        timers, clock_list, ..
    } = state;
    let ptr = timer.ptr();
    if timers.get(ptr).ok_or(BadIdError)?.node.is_linked() {
        clock_list.remove(timers, ptr);
    }
    timers[ptr].flags.remove(TimerFlags::ACTIVE);
    Ok(())
}

/// Re-arm a stopped timer to fire `period` ticks from now.
pub fn restart<System: Kernel>(timer: TimerId) -> Result<(), TimerError> {
    let mut lock = klock::lock_cpu::<System>()?;
    let state = System::state().write(&mut *lock);
    let KernelState {
        timers,
        clock_list,
        sched,
        ..
    } = state;
    let ptr = timer.ptr();
    let period = timers.get(ptr).ok_or(BadIdError)?.period;
    if !timers[ptr].node.is_linked() {
        let at = sched.absolute_clock + period;
        clock_list.insert(timers, ptr, at, CollectionTag::Clock);
    }
    timers[ptr].flags.insert(TimerFlags::ACTIVE);
    Ok(())
}

/// Fire every due timer once. The timer task calls this on each pass;
/// callbacks run with the CPU Lock *inactive*.
pub(super) fn drain_expired<System: Kernel>() {
    loop {
        let fired = {
            let Ok(mut lock) = klock::lock_cpu::<System>() else {
                return;
            };
            let state = System::state().write(&mut *lock);
            let KernelState {
                timers,
                clock_list,
                sched,
                ..
            } = state;

            match clock_list.first() {
                Some(t) if timers[t].node.key <= sched.absolute_clock => {
                    clock_list.remove(timers, t);
                    let due = timers[t].node.key;
                    let (period, flags, callback) =
                        (timers[t].period, timers[t].flags, timers[t].callback);
                    if flags.contains(TimerFlags::ACTIVE | TimerFlags::PERIODIC) {
                        // Re-arm relative to the due time, not "now", so
                        // periodic timers don't drift
                        clock_list.insert(timers, t, due + period, CollectionTag::Clock);
                    } else {
                        timers[t].flags.remove(TimerFlags::ACTIVE);
                    }
                    Some((callback, TimerId::from_ptr(t)))
                }
                _ => None,
            }
        };
        match fired {
            Some((callback, id)) => callback(id),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{define_test_kernel, pick_first_task};
    use super::super::{task, PortToKernel};
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_entry(_: usize) -> ! {
        unreachable!()
    }

    static FIRED_ONE_SHOT: AtomicUsize = AtomicUsize::new(0);
    static FIRED_PERIODIC: AtomicUsize = AtomicUsize::new(0);

    fn count_one_shot(_: TimerId) {
        FIRED_ONE_SHOT.fetch_add(1, Ordering::Relaxed);
    }

    fn count_periodic(_: TimerId) {
        FIRED_PERIODIC.fetch_add(1, Ordering::Relaxed);
    }

    fn tick_n<System: Kernel>(n: u32) {
        for _ in 0..n {
            // Safety: CPU Lock inactive between calls
            unsafe { <System as PortToKernel>::timer_tick() };
        }
    }

    #[test]
    fn one_shot_fires_once() {
        define_test_kernel!(System, port);
        task::create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        pick_first_task::<System>();

        let t = create::<System>(count_one_shot, 5, TimerFlags::ACTIVE).unwrap();

        tick_n::<System>(4);
        drain_expired::<System>();
        assert_eq!(FIRED_ONE_SHOT.load(Ordering::Relaxed), 0);

        tick_n::<System>(1);
        drain_expired::<System>();
        assert_eq!(FIRED_ONE_SHOT.load(Ordering::Relaxed), 1);

        // One-shot: it disarmed itself
        tick_n::<System>(10);
        drain_expired::<System>();
        assert_eq!(FIRED_ONE_SHOT.load(Ordering::Relaxed), 1);
        delete::<System>(t).unwrap();
    }

    #[test]
    fn periodic_rearms_until_stopped() {
        define_test_kernel!(System, port);
        task::create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        pick_first_task::<System>();

        let t = create::<System>(
            count_periodic,
            3,
            TimerFlags::ACTIVE | TimerFlags::PERIODIC,
        )
        .unwrap();

        // 10 ticks cover expiries at 3, 6, and 9
        tick_n::<System>(10);
        drain_expired::<System>();
        assert_eq!(FIRED_PERIODIC.load(Ordering::Relaxed), 3);

        stop::<System>(t).unwrap();
        tick_n::<System>(10);
        drain_expired::<System>();
        assert_eq!(FIRED_PERIODIC.load(Ordering::Relaxed), 3);

        restart::<System>(t).unwrap();
        tick_n::<System>(3);
        drain_expired::<System>();
        assert_eq!(FIRED_PERIODIC.load(Ordering::Relaxed), 4);
        delete::<System>(t).unwrap();
    }
}
