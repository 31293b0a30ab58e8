//! Tick & delay service.
//!
//! # Delay sets
//!
//! Outstanding delays live in two sorted sets used as a ping-pong pair.
//! The *current* set holds absolute wake times in the current epoch of the
//! 32-bit tick counter; the *next* set holds wake times whose computation
//! (`now + ticks`) overflowed past zero, signifying a future wraparound:
//!
//! ```text
//!        tick epoch N                      tick epoch N+1
//! ══════════╤═══════════════╗ wrap ╔═══════════╤═════════════════
//!           │   ▲   ▲    ▲  ║ ───> ║     ▲     │      ▲
//!          now  wake times  ║      ║ wake times from "next"
//!        [current set]      ║      ║ [roles swapped on wrap]
//! ```
//!
//! When the counter wraps to zero, the two sets swap roles. Inside one set
//! every key belongs to one epoch, so the ordering invariant of the backing
//! collection holds without modular tricks; the due check against the
//! counter still uses the wraparound-safe comparison `tick_le`.
use super::{
    collection::{CollectionTag, Key, OrderedCollection},
    error::BadContextError,
    klock,
    task::{Scheduler, TaskSt},
    Kernel, KernelCfg, PortThreading, UTicks,
};
use crate::utils::pool::PoolPtr;

/// Wraparound-safe "`a` is due at or before `b`" comparison.
///
/// For values within half the counter's range of each other this agrees
/// with true chronological order even after the counter wraps past zero.
#[inline]
pub(super) fn tick_le(a: UTicks, b: UTicks) -> bool {
    b.wrapping_sub(a) < 1 << 31
}

impl<System: PortThreading> Scheduler<System> {
    /// Move `task` (the running task) out of the Ready set and into a delay
    /// set with wake time `now + ticks`.
    pub(super) fn delay_task(&mut self, task: PoolPtr, ticks: UTicks) {
        let wake = self.tick_count.wrapping_add(ticks);
        // A wake time that wrapped past zero belongs to the next epoch
        let set = if wake < self.tick_count {
            self.current_delay ^ 1
        } else {
            self.current_delay
        };
        self.ready.remove_task(&mut self.tasks, task);
        self.tasks[task].st = TaskSt::Delayed;
        self.delay[set as usize].insert(
            &mut self.tasks,
            task,
            wake as Key,
            CollectionTag::Delay(set),
        );
    }

    /// Advance the tick counter by one, swap the delay-set roles on
    /// wraparound, wake every due task, and account the running task's
    /// time slice.
    pub(super) fn advance_tick(&mut self) {
        self.absolute_clock += 1;
        self.tick_count = self.tick_count.wrapping_add(1);
        if self.tick_count == 0 {
            self.current_delay ^= 1;
        }

        let now = self.tick_count;
        let cur = self.current_delay as usize;
        // Each removal strictly shrinks the set, so this loop terminates.
        while let Some(first) = self.delay[cur].first() {
            let wake = self.tasks[first].state_node.key as UTicks;
            if !tick_le(wake, now) {
                break;
            }
            self.delay[cur].remove(&mut self.tasks, first);
            // The wait node is deliberately left linked; the woken task
            // inspects it to tell a timeout from a signal.
            self.make_ready(first);
        }

        // Round-robin slice accounting for the active ready level
        if let Some(running) = self.running_task {
            if self.tasks[running].st == TaskSt::Running {
                let level = self.tasks[running].effective_priority as usize;
                self.ready.tick_slice(&mut self.tasks, level);
            }
        }
    }
}

/// Implements [`PortToKernel::timer_tick`](super::PortToKernel::timer_tick).
///
/// Precondition: CPU Lock inactive, an interrupt context
pub(super) fn timer_tick<System: Kernel>() {
    // The port masks the timer interrupt while the lock is held, so this
    // cannot fail; a failure indicates a broken port.
    let mut lock = match klock::lock_cpu::<System>() {
        Ok(lock) => lock,
        Err(_) => super::halt(),
    };
    System::state().write(&mut *lock).sched.advance_tick();
    drop(lock);

    // Every tick is a preemption point.
    // Safety: CPU Lock inactive
    unsafe { System::pend_switch() };
}

/// The current value of the wrapping 32-bit tick counter.
pub fn now<System: Kernel>() -> Result<UTicks, BadContextError> {
    let lock = klock::lock_cpu::<System>()?;
    Ok(System::state().read(&*lock).sched.tick_count)
}

/// The monotonic 64-bit tick clock (never wraps in practice).
pub fn now64<System: Kernel>() -> Result<u64, BadContextError> {
    let lock = klock::lock_cpu::<System>()?;
    Ok(System::state().read(&*lock).sched.absolute_clock)
}
