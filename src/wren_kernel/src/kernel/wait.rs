//! IPC wait collections and the signal-vs-timeout race.
//!
//! A blocking operation links the calling task's *wait node* into the
//! object's priority-ordered wait collection and simultaneously starts a
//! timed delay (the *state node* moves into a delay set). The task then
//! resumes for exactly one of two reasons:
//!
//!  - **Signaled**: the wake side ([`wake_one`]) unlinked the wait node,
//!    cancelled the pending delay, and made the task Ready.
//!  - **Timed out**: delay expiry made the task Ready *without* touching
//!    the wait node.
//!
//! On resume, [`finish_wait`] inspects the caller's own wait-node
//! membership: still linked means the wait timed out (the node is removed
//! here and the operation fails); unlinked means the object was signaled.
use super::{
    collection::{CollectionTag, Key, OrderedCollection, OrderedList},
    task::{Scheduler, TaskSt, WaitNodeAccess},
    KernelState, PortThreading, UTicks,
};
use crate::utils::pool::PoolPtr;

/// Why a blocked task resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Link the running task into `wait_list` (ordered by effective priority)
/// and start its timed delay. Returns the blocked task for the subsequent
/// [`wait_until_woken_up`](super::task::wait_until_woken_up) /
/// [`finish_wait`] pair.
pub(super) fn begin_wait<System: PortThreading>(
    sched: &mut Scheduler<System>,
    wait_list: &mut OrderedList<WaitNodeAccess>,
    tag: CollectionTag,
    timeout: UTicks,
) -> PoolPtr {
    let task = sched.running_task.unwrap();
    let key = sched.tasks[task].effective_priority as Key;
    wait_list.insert(&mut sched.tasks, task, key, tag);
    sched.delay_task(task, timeout);
    task
}

/// Resolve the signal-vs-timeout race after `task` has resumed.
pub(super) fn finish_wait<System: PortThreading>(
    sched: &mut Scheduler<System>,
    wait_list: &mut OrderedList<WaitNodeAccess>,
    task: PoolPtr,
) -> WaitOutcome {
    if sched.tasks[task].wait_node.is_linked() {
        // Delay expiry woke us; leave the wait collection empty-handed
        wait_list.remove(&mut sched.tasks, task);
        WaitOutcome::TimedOut
    } else {
        WaitOutcome::Signaled
    }
}

/// Wake the highest-priority member of `wait_list`: unlink its wait node,
/// cancel its pending delay timeout, and make it Ready.
///
/// This may make a task Ready but doesn't yield the processor; the caller
/// decides whether to request a dispatch.
pub(super) fn wake_one<System: PortThreading>(
    sched: &mut Scheduler<System>,
    wait_list: &mut OrderedList<WaitNodeAccess>,
) -> Option<PoolPtr> {
    let task = wait_list.last()?;
    wait_list.remove(&mut sched.tasks, task);

    debug_assert_eq!(sched.tasks[task].st, TaskSt::Delayed);
    sched.unlink_state(task);
    sched.make_ready(task);
    Some(task)
}

/// Cancel `task`'s wait-collection membership, wherever it is. Used when a
/// blocked task is deleted.
pub(super) fn detach_wait_node<System: PortThreading>(
    state: &mut KernelState<System>,
    task: PoolPtr,
) {
    let KernelState {
        sched,
        semaphores,
        mutexes,
        queues,
        ..
    } = state;
    let Some(tag) = sched.tasks[task].wait_node.home else {
        return;
    };
    match tag {
        CollectionTag::SemaphoreWait(i) => {
            if let Some(cb) = semaphores.get_mut(PoolPtr::new(i)) {
                cb.wait_queue.remove(&mut sched.tasks, task);
            }
        }
        CollectionTag::MutexWait(i) => {
            if let Some(cb) = mutexes.get_mut(PoolPtr::new(i)) {
                cb.wait_queue.remove(&mut sched.tasks, task);
            }
        }
        CollectionTag::QueueSend(i) => {
            if let Some(cb) = queues.get_mut(PoolPtr::new(i)) {
                cb.send_queue.remove(&mut sched.tasks, task);
            }
        }
        CollectionTag::QueueReceive(i) => {
            if let Some(cb) = queues.get_mut(PoolPtr::new(i)) {
                cb.recv_queue.remove(&mut sched.tasks, task);
            }
        }
        _ => unreachable!("wait node linked into a state set"),
    }
}
