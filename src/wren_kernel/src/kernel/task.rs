//! Tasks
//!
//! A task is exclusively owned by the task arena once created; the public
//! handle ([`TaskId`]) is an arena index. Each task control block embeds
//! two membership nodes: the *state node* links it into exactly one state
//! set (Ready, one of the Delay sets, Suspended, Dead) at any instant, and
//! the *wait node* links it into at most one synchronization object's wait
//! collection, concurrently with the Delay set while the task awaits either
//! a timeout or a signal, whichever resolves first.
use core::fmt;

use super::{
    cfg,
    collection::{CollectionTag, ListNode, NodeAccess, OrderedCollection, OrderedList},
    error::{
        BadContextError, BadIdError, CreateTaskError, DeleteTaskError, GetCurrentTaskError,
        GetTaskPriorityError, ResumeTaskError, SetTaskPriorityError, SleepError, SuspendTaskError,
    },
    klock::{self, CpuLockGuard},
    readyqueue::ReadyQueue,
    wait, Id, Kernel, KernelCfg, PortHeap, PortThreading, Priority, UTicks,
};
use crate::utils::{
    pool::{Pool, PoolPtr},
    Init,
};

/// Represents a single task in a system.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Id);

impl TaskId {
    /// Get the raw ID value.
    pub const fn raw(self) -> Id {
        self.0
    }

    #[inline]
    pub(super) const fn ptr(self) -> PoolPtr {
        PoolPtr::from_raw(self.0)
    }

    #[inline]
    pub(super) const fn from_ptr(ptr: PoolPtr) -> Self {
        Self(ptr.raw())
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskId").field(&self.0).finish()
    }
}

/// The task arena. [`PoolPtr`]s into this arena are the kernel-internal
/// task references.
pub(super) type TaskPool<System> = Pool<TaskCb<System>, { cfg::TASK_CAPACITY }>;

/// A task's entry function. Tasks never return; they loop forever or delete
/// themselves.
pub type TaskEntry = fn(usize) -> !;

/// The stack region assigned to a task, obtained from the allocator
/// collaborator.
#[derive(Clone, Copy)]
pub struct StackRegion {
    ptr: core::ptr::NonNull<u8>,
    size: usize,
}

// Safety: the region is exclusively owned by one task and only ever touched
// by that task and (during initialization/reclamation) by the kernel under
// the CPU Lock.
unsafe impl Send for StackRegion {}
unsafe impl Sync for StackRegion {}

impl StackRegion {
    pub(super) fn new(ptr: core::ptr::NonNull<u8>, size: usize) -> Self {
        Self { ptr, size }
    }

    /// The lowest address of the region.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    pub(super) fn into_raw(self) -> core::ptr::NonNull<u8> {
        self.ptr
    }
}

impl fmt::Debug for StackRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackRegion")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .finish()
    }
}

/// The static properties of a task.
#[derive(Debug)]
pub struct TaskAttr {
    /// The entry point of the task.
    ///
    /// # Safety
    ///
    /// This is only meant to be used by a kernel port, as a task entry
    /// point, not by user code.
    pub entry_point: TaskEntry,

    /// The parameter supplied for `entry_point`.
    pub entry_param: usize,

    /// The stack region assigned to the task.
    pub stack: StackRegion,
}

/// Task state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TaskSt {
    /// Linked into the Ready set, waiting to be scheduled.
    Ready,
    /// Selected by the dispatcher. The task remains a member of the Ready
    /// set while Running.
    Running,
    /// Linked into one of the Delay sets. If the wait node is additionally
    /// linked into a wait collection, the task is blocked on IPC.
    Delayed,
    Suspended,
    /// Terminal. The task's memory is reclaimed lazily by the idle task.
    Dead,
}

/// *Task control block* - the state data of a task.
#[repr(C)]
pub struct TaskCb<System: PortThreading> {
    /// Saved-context storage for the port.
    ///
    /// This is guaranteed to be placed at the beginning of the struct so
    /// that assembler code can refer to this easily.
    pub port_task_state: System::PortTaskState,

    /// The static properties of the task.
    pub attr: TaskAttr,

    pub(super) base_priority: Priority,

    /// The task's effective priority. It may be temporarily raised above
    /// `base_priority` by the mutex priority-inheritance protocol and
    /// determines the task's position within the Ready set.
    pub(super) effective_priority: Priority,

    /// Extra ticks the task may run beyond its first when peers share its
    /// priority level.
    pub(super) time_slice: u8,

    pub(super) st: TaskSt,

    /// State-set membership node.
    pub(super) state_node: ListNode,

    /// IPC wait-collection membership node. Checked on wake-up to tell a
    /// timeout from a signal.
    pub(super) wait_node: ListNode,
}

impl<System: PortThreading> fmt::Debug for TaskCb<System> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("port_task_state", &self.port_task_state)
            .field("attr", &self.attr)
            .field("base_priority", &self.base_priority)
            .field("effective_priority", &self.effective_priority)
            .field("time_slice", &self.time_slice)
            .field("st", &self.st)
            .field("state_node", &self.state_node)
            .field("wait_node", &self.wait_node)
            .finish()
    }
}

/// Projects a task to its state-set membership node.
pub(super) struct StateNodeAccess;

impl<System: PortThreading> NodeAccess<TaskCb<System>> for StateNodeAccess {
    #[inline]
    fn node(task: &TaskCb<System>) -> &ListNode {
        &task.state_node
    }
    #[inline]
    fn node_mut(task: &mut TaskCb<System>) -> &mut ListNode {
        &mut task.state_node
    }
}

/// Projects a task to its wait-collection membership node.
pub(super) struct WaitNodeAccess;

impl<System: PortThreading> NodeAccess<TaskCb<System>> for WaitNodeAccess {
    #[inline]
    fn node(task: &TaskCb<System>) -> &ListNode {
        &task.wait_node
    }
    #[inline]
    fn node_mut(task: &mut TaskCb<System>) -> &mut ListNode {
        &mut task.wait_node
    }
}

/// The scheduler context: the task arena, the state sets, and the tick
/// bookkeeping. One instance per system, inside
/// [`State`](crate::kernel::State).
pub(super) struct Scheduler<System: PortThreading> {
    pub(super) tasks: TaskPool<System>,

    /// The Ready set. The running task remains a member.
    pub(super) ready: ReadyQueue,

    /// The ping-pong pair of delay sets, keyed by absolute wake tick.
    /// `delay[current_delay]` holds wake times in the current tick epoch;
    /// the other set holds wake times that wrapped past zero.
    pub(super) delay: [OrderedList<StateNodeAccess>; 2],
    pub(super) current_delay: u8,

    pub(super) suspended: OrderedList<StateNodeAccess>,

    /// Deleted tasks awaiting memory reclamation by the idle task.
    pub(super) dead: OrderedList<StateNodeAccess>,

    pub(super) running_task: Option<PoolPtr>,

    /// The 32-bit wrapping tick counter driving the delay sets.
    pub(super) tick_count: UTicks,

    /// Monotonic 64-bit tick clock; feeds the software timer service.
    pub(super) absolute_clock: u64,
}

impl<System: PortThreading> Init for Scheduler<System> {
    const INIT: Self = Self {
        tasks: Init::INIT,
        ready: Init::INIT,
        delay: Init::INIT,
        current_delay: 0,
        suspended: Init::INIT,
        dead: Init::INIT,
        running_task: None,
        tick_count: 0,
        absolute_clock: 0,
    };
}

impl<System: PortThreading> Scheduler<System> {
    /// Resolve and validate a public task handle.
    pub(super) fn task_ptr(&self, task: TaskId) -> Result<PoolPtr, BadIdError> {
        let ptr = task.ptr();
        self.tasks.get(ptr).ok_or(BadIdError)?;
        Ok(ptr)
    }

    /// Transition the task into the Ready state and link it into the Ready
    /// set at its effective priority. The caller must have unlinked it from
    /// its previous state set.
    pub(super) fn make_ready(&mut self, task: PoolPtr) {
        debug_assert!(!self.tasks[task].state_node.is_linked());
        self.tasks[task].st = TaskSt::Ready;
        self.ready.insert_task(&mut self.tasks, task);
    }

    /// Unlink the task from whichever state set currently holds it.
    pub(super) fn unlink_state(&mut self, task: PoolPtr) {
        match self.tasks[task].state_node.home {
            Some(CollectionTag::ReadyLevel(_)) => self.ready.remove_task(&mut self.tasks, task),
            Some(CollectionTag::Delay(i)) => self.delay[i as usize].remove(&mut self.tasks, task),
            Some(CollectionTag::Suspended) => self.suspended.remove(&mut self.tasks, task),
            Some(CollectionTag::Dead) => self.dead.remove(&mut self.tasks, task),
            Some(_) => unreachable!("state node linked into a wait collection"),
            None => {}
        }
    }

    /// The dispatcher: commit the Ready member with the maximal scheduling
    /// key as the running task. Called from the port's dispatch handler.
    pub(super) fn reschedule(&mut self) {
        if let Some(prev) = self.running_task {
            if self.tasks[prev].st == TaskSt::Running {
                self.tasks[prev].st = TaskSt::Ready;
            }
        }
        let next = self.ready.front();
        if let Some(next) = next {
            self.tasks[next].st = TaskSt::Running;
        }
        self.running_task = next;
    }

    /// Whether the Ready set holds a task that should take over the
    /// processor.
    pub(super) fn preemption_pending(&self) -> bool {
        let cur_pri = match self.running_task {
            Some(cur) if self.tasks[cur].st == TaskSt::Running => {
                self.tasks[cur].effective_priority as usize
            }
            // There is no runnable current task; any dispatch is overdue.
            _ => return true,
        };
        match self.ready.top_priority() {
            Some(top) => top > cur_pri,
            None => false,
        }
    }

    /// Change a task's effective priority, repositioning it within the
    /// Ready set if it's a member. Used by the priority-inheritance
    /// protocol and `set_priority`.
    pub(super) fn set_effective_priority(&mut self, task: PoolPtr, priority: Priority) {
        if self.tasks[task].effective_priority == priority {
            return;
        }
        let in_ready = matches!(
            self.tasks[task].state_node.home,
            Some(CollectionTag::ReadyLevel(_))
        );
        if in_ready {
            self.ready.remove_task(&mut self.tasks, task);
        }
        self.tasks[task].effective_priority = priority;
        if in_ready {
            self.ready.insert_task(&mut self.tasks, task);
        }
    }
}

/// If the current context is not waitable, return `Err(BadContext)`.
pub(super) fn expect_waitable_context<System: PortThreading>() -> Result<(), BadContextError> {
    if System::is_task_context() {
        Ok(())
    } else {
        Err(BadContextError)
    }
}

/// Relinquish the CPU Lock. After that, if there's a higher-priority Ready
/// task than the running task, request a deferred dispatch.
///
/// System services that transition a task into the Ready state should call
/// this before returning to the caller.
pub(super) fn unlock_cpu_and_check_preemption<System: Kernel>(lock: CpuLockGuard<System>) {
    let pend = System::state().read(&*lock).sched.preemption_pending();

    drop(lock);

    if pend {
        // Safety: CPU Lock inactive
        unsafe { System::pend_switch() };
    }
}

/// Spin on yields until the dispatcher hands the processor back to `task`.
/// Returns with the CPU Lock re-acquired.
///
/// The caller must have transitioned `task` (the currently executing task)
/// out of the Running state and requested a dispatch.
pub(super) fn wait_until_woken_up<System: Kernel>(lock: &mut CpuLockGuard<System>, task: PoolPtr) {
    loop {
        if System::state().read(&**lock).sched.tasks[task].st == TaskSt::Running {
            break;
        }
        lock.yield_cpu();
    }
}

/// Create a task and link it into the Ready set.
///
/// The stack is obtained from the allocator collaborator; exhaustion of
/// either the allocator or the task arena surfaces as `OutOfMemory` and is
/// never retried.
pub fn create<System: Kernel>(
    entry_point: TaskEntry,
    entry_param: usize,
    stack_size: usize,
    priority: Priority,
    time_slice: u8,
) -> Result<TaskId, CreateTaskError> {
    if priority as usize >= cfg::NUM_PRIORITY_LEVELS || stack_size == 0 {
        return Err(CreateTaskError::BadParam);
    }

    let mut lock = klock::lock_cpu::<System>()?;

    // Safety: size is nonzero; the block is owned by the new task until
    // reclamation
    let stack_ptr =
        unsafe { System::allocate(stack_size) }.ok_or(CreateTaskError::OutOfMemory)?;

    let task = {
        let state = System::state().write(&mut *lock);
        let cb = TaskCb {
            port_task_state: System::PORT_TASK_STATE_INIT,
            attr: TaskAttr {
                entry_point,
                entry_param,
                stack: StackRegion::new(stack_ptr, stack_size),
            },
            base_priority: priority,
            effective_priority: priority,
            time_slice,
            st: TaskSt::Ready,
            state_node: Init::INIT,
            wait_node: Init::INIT,
        };
        let task = match state.sched.tasks.allocate(cb) {
            Ok(task) => task,
            Err(_) => {
                // Safety: `stack_ptr` was just allocated and never exposed
                unsafe { System::free(stack_ptr) };
                return Err(CreateTaskError::OutOfMemory);
            }
        };

        // Safety: CPU Lock active, the task is not running yet
        unsafe { System::initialize_task_state(&mut state.sched.tasks[task]) };

        state.sched.make_ready(task);
        task
    };

    // If the new task has a higher priority, perform a context switch.
    unlock_cpu_and_check_preemption(lock);

    Ok(TaskId::from_ptr(task))
}

/// Transition a task into the Dead state and schedule its memory for
/// reclamation by the idle task. Always triggers a reschedule.
///
/// A task may delete itself; its stack is freed only after the processor
/// has moved on, because a task cannot safely free the stack it is
/// currently executing on.
pub fn delete<System: Kernel>(task: TaskId) -> Result<(), DeleteTaskError> {
    let mut lock = klock::lock_cpu::<System>()?;
    {
        let state = System::state().write(&mut *lock);
        let ptr = state.sched.task_ptr(task)?;
        if state.sched.tasks[ptr].st == TaskSt::Dead {
            return Err(DeleteTaskError::BadObjectState);
        }

        // Cancel an in-progress wait, then unlink from the state set
        wait::detach_wait_node(state, ptr);
        state.sched.unlink_state(ptr);

        state.sched.tasks[ptr].st = TaskSt::Dead;
        state
            .sched
            .dead
            .push_back(&mut state.sched.tasks, ptr, CollectionTag::Dead);
    }
    drop(lock);

    // Safety: CPU Lock inactive
    unsafe { System::pend_switch() };

    Ok(())
}

/// Reclaim the memory of one Dead task, if any. Returns whether a task was
/// reclaimed.
///
/// The idle task calls this in its loop; applications may call it from any
/// task context as well.
pub fn reclaim_one<System: Kernel>() -> bool {
    let Ok(mut lock) = klock::lock_cpu::<System>() else {
        return false;
    };
    let stack = {
        let state = System::state().write(&mut *lock);
        let Some(task) = state.sched.dead.first() else {
            return false;
        };
        debug_assert_ne!(state.sched.running_task, Some(task));
        state.sched.dead.remove(&mut state.sched.tasks, task);
        let cb = state
            .sched
            .tasks
            .deallocate(task)
            .expect("dead list referenced a vacant slot");
        cb.attr.stack
    };

    // Safety: the stack region came from `allocate` and its owner is gone
    unsafe { System::free(stack.into_raw()) };
    true
}

/// Block the calling task for `ticks` tick periods.
///
/// The absolute wake time is `now + ticks`; if that sum overflowed past
/// zero, the task parks in the "next" delay set, which becomes current when
/// the tick counter wraps.
pub fn sleep<System: Kernel>(ticks: UTicks) -> Result<(), SleepError> {
    expect_waitable_context::<System>()?;
    let mut lock = klock::lock_cpu::<System>()?;

    let task = {
        let state = System::state().write(&mut *lock);
        let task = state.sched.running_task.ok_or(BadContextError)?;
        state.sched.delay_task(task, ticks);
        task
    };

    // Safety: the request is serviced once the lock is relinquished
    unsafe { System::pend_switch() };

    wait_until_woken_up(&mut lock, task);
    Ok(())
}

/// Voluntarily rotate the calling task's ready level and request a
/// dispatch, letting a same-priority peer run.
pub fn yield_now<System: Kernel>() -> Result<(), BadContextError> {
    expect_waitable_context::<System>()?;
    let mut lock = klock::lock_cpu::<System>()?;
    {
        let state = System::state().write(&mut *lock);
        let task = state.sched.running_task.ok_or(BadContextError)?;
        let level = state.sched.tasks[task].effective_priority as usize;
        state.sched.ready.rotate(&mut state.sched.tasks, level);
    }
    drop(lock);

    // Safety: CPU Lock inactive
    unsafe { System::pend_switch() };
    Ok(())
}

/// Move a Ready or Running task into the Suspended set.
pub fn suspend<System: Kernel>(task: TaskId) -> Result<(), SuspendTaskError> {
    let mut lock = klock::lock_cpu::<System>()?;
    let was_running = {
        let state = System::state().write(&mut *lock);
        let ptr = state.sched.task_ptr(task)?;
        let st = state.sched.tasks[ptr].st;
        if !matches!(st, TaskSt::Ready | TaskSt::Running) {
            return Err(SuspendTaskError::BadObjectState);
        }
        state.sched.ready.remove_task(&mut state.sched.tasks, ptr);
        state.sched.tasks[ptr].st = TaskSt::Suspended;
        state
            .sched
            .suspended
            .push_back(&mut state.sched.tasks, ptr, CollectionTag::Suspended);
        st == TaskSt::Running
    };
    drop(lock);

    if was_running {
        // Safety: CPU Lock inactive
        unsafe { System::pend_switch() };
    }
    Ok(())
}

/// Move a Suspended task back into the Ready set.
pub fn resume<System: Kernel>(task: TaskId) -> Result<(), ResumeTaskError> {
    let mut lock = klock::lock_cpu::<System>()?;
    {
        let state = System::state().write(&mut *lock);
        let ptr = state.sched.task_ptr(task)?;
        if state.sched.tasks[ptr].st != TaskSt::Suspended {
            return Err(ResumeTaskError::BadObjectState);
        }
        state.sched.suspended.remove(&mut state.sched.tasks, ptr);
        state.sched.make_ready(ptr);
    }
    unlock_cpu_and_check_preemption(lock);
    Ok(())
}

/// Get the currently running task.
pub fn current<System: Kernel>() -> Result<TaskId, GetCurrentTaskError> {
    if !System::is_task_context() {
        return Err(GetCurrentTaskError::BadContext);
    }
    let lock = klock::lock_cpu::<System>()?;
    let ptr = System::state()
        .read(&*lock)
        .sched
        .running_task
        .ok_or(GetCurrentTaskError::BadContext)?;
    Ok(TaskId::from_ptr(ptr))
}

/// Get a task's base priority.
pub fn priority<System: Kernel>(task: TaskId) -> Result<Priority, GetTaskPriorityError> {
    let lock = klock::lock_cpu::<System>()?;
    let sched = &System::state().read(&*lock).sched;
    let ptr = sched.task_ptr(task)?;
    Ok(sched.tasks[ptr].base_priority)
}

/// Get a task's effective priority (the base priority, possibly raised by
/// priority inheritance).
pub fn effective_priority<System: Kernel>(task: TaskId) -> Result<Priority, GetTaskPriorityError> {
    let lock = klock::lock_cpu::<System>()?;
    let sched = &System::state().read(&*lock).sched;
    let ptr = sched.task_ptr(task)?;
    Ok(sched.tasks[ptr].effective_priority)
}

/// Assign a task's base priority, repositioning it within the Ready set.
///
/// The effective priority is overwritten as well; a boost applied by an
/// ongoing priority-inheritance episode is re-established when the
/// relevant mutex is unlocked (the original is recorded per-mutex).
pub fn set_priority<System: Kernel>(
    task: TaskId,
    priority: Priority,
) -> Result<(), SetTaskPriorityError> {
    if priority as usize >= cfg::NUM_PRIORITY_LEVELS {
        return Err(SetTaskPriorityError::BadParam);
    }
    let mut lock = klock::lock_cpu::<System>()?;
    {
        let state = System::state().write(&mut *lock);
        let ptr = state.sched.task_ptr(task)?;
        if state.sched.tasks[ptr].st == TaskSt::Dead {
            return Err(SetTaskPriorityError::BadObjectState);
        }
        state.sched.tasks[ptr].base_priority = priority;
        state.sched.set_effective_priority(ptr, priority);
    }
    unlock_cpu_and_check_preemption(lock);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{define_test_kernel, pick_first_task, running_task};
    use super::super::{error::*, PortToKernel};
    use super::*;

    fn noop_entry(_: usize) -> ! {
        unreachable!()
    }

    #[test]
    fn highest_priority_task_runs_first() {
        define_test_kernel!(System, port);
        let _t1 = create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        let t3 = create::<System>(noop_entry, 0, 128, 3, 0).unwrap();
        let _t2 = create::<System>(noop_entry, 0, 128, 2, 0).unwrap();
        pick_first_task::<System>();
        assert_eq!(running_task::<System>(), Some(t3));
    }

    #[test]
    fn creating_higher_priority_task_preempts() {
        define_test_kernel!(System, port);
        let t1 = create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        pick_first_task::<System>();
        assert_eq!(running_task::<System>(), Some(t1));

        // Lower priority does not preempt
        let _t0 = create::<System>(noop_entry, 0, 128, 0, 0).unwrap();
        assert_eq!(running_task::<System>(), Some(t1));

        // Higher priority does, through the deferred dispatch request
        let t5 = create::<System>(noop_entry, 0, 128, 5, 0).unwrap();
        assert_eq!(running_task::<System>(), Some(t5));
    }

    #[test]
    fn round_robin_rotates_on_slice_expiry() {
        define_test_kernel!(System, port);
        let a = create::<System>(noop_entry, 0, 128, 2, 2).unwrap();
        let b = create::<System>(noop_entry, 0, 128, 2, 2).unwrap();
        pick_first_task::<System>();
        assert_eq!(running_task::<System>(), Some(a));

        // The slice counter re-arms to 2 and counts down on each tick;
        // the rotation happens on the tick that finds it expired
        for _ in 0..3 {
            unsafe { System::timer_tick() };
        }
        assert_eq!(running_task::<System>(), Some(b));

        for _ in 0..3 {
            unsafe { System::timer_tick() };
        }
        assert_eq!(running_task::<System>(), Some(a));
    }

    #[test]
    fn yield_rotates_same_priority_peers() {
        define_test_kernel!(System, port);
        let a = create::<System>(noop_entry, 0, 128, 2, 0).unwrap();
        let b = create::<System>(noop_entry, 0, 128, 2, 0).unwrap();
        pick_first_task::<System>();
        assert_eq!(running_task::<System>(), Some(a));

        yield_now::<System>().unwrap();
        assert_eq!(running_task::<System>(), Some(b));
        yield_now::<System>().unwrap();
        assert_eq!(running_task::<System>(), Some(a));
    }

    #[test]
    fn delete_unlinks_and_idle_reclaims() {
        define_test_kernel!(System, port);
        let a = create::<System>(noop_entry, 0, 128, 2, 0).unwrap();
        let b = create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        pick_first_task::<System>();
        assert_eq!(running_task::<System>(), Some(a));

        // The running task deletes itself; the dispatch moves on to `b`
        delete::<System>(a).unwrap();
        assert_eq!(running_task::<System>(), Some(b));

        // Deleting twice is rejected while the carcass is still around
        assert_eq!(delete::<System>(a), Err(DeleteTaskError::BadObjectState));

        // What the idle task would do
        assert!(reclaim_one::<System>());
        assert!(!reclaim_one::<System>());

        // The handle now dangles
        assert_eq!(priority::<System>(a), Err(GetTaskPriorityError::BadId));
    }

    #[test]
    fn suspend_and_resume() {
        define_test_kernel!(System, port);
        let a = create::<System>(noop_entry, 0, 128, 3, 0).unwrap();
        let b = create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        pick_first_task::<System>();
        assert_eq!(running_task::<System>(), Some(a));

        suspend::<System>(a).unwrap();
        assert_eq!(running_task::<System>(), Some(b));
        assert_eq!(suspend::<System>(a), Err(SuspendTaskError::BadObjectState));

        resume::<System>(a).unwrap();
        assert_eq!(running_task::<System>(), Some(a));
        assert_eq!(resume::<System>(a), Err(ResumeTaskError::BadObjectState));
    }

    #[test]
    fn create_validates_parameters() {
        define_test_kernel!(System, port);
        assert_eq!(
            create::<System>(noop_entry, 0, 128, cfg::NUM_PRIORITY_LEVELS as Priority, 0),
            Err(CreateTaskError::BadParam)
        );
        assert_eq!(
            create::<System>(noop_entry, 0, 0, 1, 0),
            Err(CreateTaskError::BadParam)
        );
    }

    #[test]
    fn task_arena_exhaustion_is_reported() {
        define_test_kernel!(System, port);
        for _ in 0..cfg::TASK_CAPACITY {
            create::<System>(noop_entry, 0, 64, 1, 0).unwrap();
        }
        assert_eq!(
            create::<System>(noop_entry, 0, 64, 1, 0),
            Err(CreateTaskError::OutOfMemory)
        );
    }

    #[test]
    fn set_priority_repositions_ready_task() {
        define_test_kernel!(System, port);
        let a = create::<System>(noop_entry, 0, 128, 3, 0).unwrap();
        let b = create::<System>(noop_entry, 0, 128, 2, 0).unwrap();
        pick_first_task::<System>();
        assert_eq!(running_task::<System>(), Some(a));

        // Raising `b` above the running task preempts immediately
        set_priority::<System>(b, 4).unwrap();
        assert_eq!(running_task::<System>(), Some(b));
        assert_eq!(priority::<System>(b), Ok(4));
        assert_eq!(effective_priority::<System>(b), Ok(4));
    }
}
