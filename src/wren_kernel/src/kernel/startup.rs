//! Kernel startup and the idle task.
use super::{cfg, klock, task, Kernel, KernelCfg};

/// Start the scheduler: create the idle task, pick the first running task,
/// and transfer the control to it. Never returns.
///
/// The application's initial tasks should be created before calling this.
/// Implements [`PortToKernel::boot`](super::PortToKernel::boot).
pub fn start<System: Kernel>() -> ! {
    // The kernel cannot run without the idle task: it's the guaranteed
    // Ready member and it reclaims deleted tasks' memory.
    if task::create::<System>(idle_task_body::<System>, 0, cfg::IDLE_TASK_STACK_SIZE, 0, 0)
        .is_err()
    {
        super::halt();
    }

    let mut lock = match klock::lock_cpu::<System>() {
        Ok(lock) => lock,
        Err(_) => super::halt(),
    };
    System::state().write(&mut *lock).sched.reschedule();

    // `dispatch_first_task` requires an active CPU Lock; the threshold is
    // never restored because this context is being discarded
    core::mem::forget(lock);

    // Safety: CPU Lock active, startup phase
    unsafe { System::dispatch_first_task() }
}

/// The lowest-priority background task. Deleted tasks' stacks cannot be
/// freed by the deleter (a task may delete itself), so reclamation happens
/// here, one task per pass.
fn idle_task_body<System: Kernel>(_param: usize) -> ! {
    loop {
        if !task::reclaim_one::<System>() {
            core::hint::spin_loop();
        }
    }
}
