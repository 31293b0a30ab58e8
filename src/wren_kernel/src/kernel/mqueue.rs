//! Bounded blocking queues.
//!
//! A queue owns a fixed-capacity ring of fixed-size cells; elements are
//! copied by value in and out, so the queue never stores references to
//! caller-owned memory. Two wait collections track blocked senders and
//! blocked receivers respectively.
//!
//! The element type is erased at the control-block level (the ring is a
//! byte buffer from the allocator collaborator); the public API is typed
//! over any `T: Copy` and checks `size_of::<T>()` against the element size
//! fixed at construction.
use core::{fmt, mem};

use super::{
    collection::{CollectionTag, OrderedList},
    error::{BadIdError, CreateError, DeleteError, QueryError, ReceiveError, SendError},
    klock, task,
    task::WaitNodeAccess,
    wait::{self, WaitOutcome},
    Id, Kernel, KernelCfg, KernelState, PortHeap, UTicks,
};
use crate::utils::{pool::PoolPtr, Init};

/// Represents a single bounded queue in a system.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(Id);

impl QueueId {
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

impl fmt::Debug for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QueueId").field(&self.0).finish()
    }
}

/// The queue's element ring, owned via the allocator collaborator.
struct RingStorage(core::ptr::NonNull<u8>);

// Safety: the ring is exclusively owned by one queue control block and only
// ever touched under the CPU Lock.
unsafe impl Send for RingStorage {}
unsafe impl Sync for RingStorage {}

/// *Queue control block* - the state data of a bounded queue.
pub(super) struct QueueCb {
    storage: RingStorage,
    elem_size: usize,
    capacity: usize,

    /// Occupied cell count. `Send` blocks iff `count == capacity`;
    /// `Receive` blocks iff `count == 0`.
    count: usize,

    /// Cell index of the next element to read.
    read_pos: usize,

    /// Cell index of the next cell to write.
    write_pos: usize,

    /// Tasks blocked in [`send`], ordered by effective priority.
    pub(super) send_queue: OrderedList<WaitNodeAccess>,

    /// Tasks blocked in [`receive`], ordered by effective priority.
    pub(super) recv_queue: OrderedList<WaitNodeAccess>,
}

impl QueueCb {
    /// Copy `elem_size` bytes from `src` into the next write cell, wrapping
    /// the cursor at capacity.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of `elem_size` bytes, and the queue
    /// must not be full.
    unsafe fn write_cell(&mut self, src: *const u8) {
        debug_assert!(self.count < self.capacity);
        unsafe {
            core::ptr::copy_nonoverlapping(
                src,
                self.storage.0.as_ptr().add(self.write_pos * self.elem_size),
                self.elem_size,
            );
        }
        self.write_pos = (self.write_pos + 1) % self.capacity;
        self.count += 1;
    }

    /// Copy `elem_size` bytes out of the next read cell into `dst`,
    /// wrapping the cursor at capacity.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `elem_size` bytes, and the queue
    /// must not be empty.
    unsafe fn read_cell(&mut self, dst: *mut u8) {
        debug_assert!(self.count > 0);
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.storage.0.as_ptr().add(self.read_pos * self.elem_size),
                dst,
                self.elem_size,
            );
        }
        self.read_pos = (self.read_pos + 1) % self.capacity;
        self.count -= 1;
    }
}

/// Construct a queue holding up to `capacity` elements of type `T`.
pub fn create<System: Kernel, T: Copy>(capacity: usize) -> Result<QueueId, CreateError> {
    let elem_size = mem::size_of::<T>();
    if capacity == 0 || elem_size == 0 {
        return Err(CreateError::BadParam);
    }

    let mut lock = klock::lock_cpu::<System>()?;

    // Safety: the size is nonzero; the ring is owned by the new queue
    let storage = unsafe { System::allocate(capacity * elem_size) }
        .ok_or(CreateError::OutOfMemory)?;

    let state = System::state().write(&mut *lock);
    let cb = QueueCb {
        storage: RingStorage(storage),
        elem_size,
        capacity,
        count: 0,
        read_pos: 0,
        write_pos: 0,
        send_queue: Init::INIT,
        recv_queue: Init::INIT,
    };
    match state.queues.allocate(cb) {
        Ok(ptr) => Ok(QueueId::from_ptr(ptr)),
        Err(_) => {
            // Safety: `storage` was just allocated and never exposed
            unsafe { System::free(storage) };
            Err(CreateError::OutOfMemory)
        }
    }
}

/// Destroy a queue, releasing its ring storage.
///
/// Destroying a queue while tasks are blocked on it is an application
/// error; the kernel does not detect it.
pub fn delete<System: Kernel>(queue: QueueId) -> Result<(), DeleteError> {
    let mut lock = klock::lock_cpu::<System>()?;
    let state = System::state().write(&mut *lock);
    {
        let cb = state.queues.get(queue.ptr()).ok_or(BadIdError)?;
        debug_assert!(
            cb.send_queue.is_empty() && cb.recv_queue.is_empty(),
            "queue deleted with waiters"
        );
    }
    let cb = state.queues.deallocate(queue.ptr()).ok_or(BadIdError)?;
    // Safety: the ring came from `allocate` and its owner is gone
    unsafe { System::free(cb.storage.0) };
    Ok(())
}

/// The number of occupied cells.
pub fn len<System: Kernel>(queue: QueueId) -> Result<usize, QueryError> {
    let lock = klock::lock_cpu::<System>()?;
    let state = System::state().read(&*lock);
    Ok(state.queues.get(queue.ptr()).ok_or(BadIdError)?.count)
}

/// Copy `value` into the queue, blocking for up to `timeout` ticks while
/// the queue is full.
///
/// A `timeout` of zero makes this a non-blocking attempt, which is the
/// only form allowed in interrupt context.
pub fn send<System: Kernel, T: Copy>(
    queue: QueueId,
    value: T,
    timeout: UTicks,
) -> Result<(), SendError> {
    let src = (&value as *const T).cast::<u8>();
    let mut lock = klock::lock_cpu::<System>()?;
    let ptr = queue.ptr();

    let stored = {
        let state = System::state().write(&mut *lock);
        let KernelState { queues, sched, .. } = state;
        let cb = queues.get_mut(ptr).ok_or(BadIdError)?;
        if mem::size_of::<T>() != cb.elem_size {
            return Err(SendError::BadParam);
        }
        if cb.count < cb.capacity {
            // Safety: `src` points at `value`; the queue is not full
            unsafe { cb.write_cell(src) };
            wait::wake_one(sched, &mut cb.recv_queue);
            true
        } else {
            false
        }
    };
    if stored {
        task::unlock_cpu_and_check_preemption(lock);
        return Ok(());
    }

    if timeout == 0 {
        return Err(SendError::Timeout);
    }
    task::expect_waitable_context::<System>()?;

    let task = {
        let state = System::state().write(&mut *lock);
        let KernelState { queues, sched, .. } = state;
        let cb = queues.get_mut(ptr).ok_or(BadIdError)?;
        wait::begin_wait(
            sched,
            &mut cb.send_queue,
            CollectionTag::QueueSend(ptr.get()),
            timeout,
        )
    };

    // Safety: the request is serviced once the lock is relinquished
    unsafe { System::pend_switch() };
    task::wait_until_woken_up(&mut lock, task);

    let result = {
        let state = System::state().write(&mut *lock);
        let KernelState { queues, sched, .. } = state;
        let cb = queues.get_mut(ptr).ok_or(BadIdError)?;
        match wait::finish_wait(sched, &mut cb.send_queue, task) {
            WaitOutcome::TimedOut => Err(SendError::Timeout),
            WaitOutcome::Signaled => {
                // A receiver made room before waking us; retry the copy
                // Safety: `src` points at `value`; the queue is not full
                unsafe { cb.write_cell(src) };
                wait::wake_one(sched, &mut cb.recv_queue);
                Ok(())
            }
        }
    };
    task::unlock_cpu_and_check_preemption(lock);
    result
}

/// Copy the oldest element out of the queue, blocking for up to `timeout`
/// ticks while the queue is empty.
///
/// A `timeout` of zero makes this a non-blocking attempt, which is the
/// only form allowed in interrupt context.
pub fn receive<System: Kernel, T: Copy>(queue: QueueId, timeout: UTicks) -> Result<T, ReceiveError> {
    let mut slot = mem::MaybeUninit::<T>::uninit();
    let dst = slot.as_mut_ptr().cast::<u8>();
    let mut lock = klock::lock_cpu::<System>()?;
    let ptr = queue.ptr();

    let received = {
        let state = System::state().write(&mut *lock);
        let KernelState { queues, sched, .. } = state;
        let cb = queues.get_mut(ptr).ok_or(BadIdError)?;
        if mem::size_of::<T>() != cb.elem_size {
            return Err(ReceiveError::BadParam);
        }
        if cb.count > 0 {
            // Safety: `dst` points at `slot`; the queue is not empty
            unsafe { cb.read_cell(dst) };
            wait::wake_one(sched, &mut cb.send_queue);
            true
        } else {
            false
        }
    };
    if received {
        task::unlock_cpu_and_check_preemption(lock);
        // Safety: `read_cell` initialized `slot`
        return Ok(unsafe { slot.assume_init() });
    }

    if timeout == 0 {
        return Err(ReceiveError::Timeout);
    }
    task::expect_waitable_context::<System>()?;

    let task = {
        let state = System::state().write(&mut *lock);
        let KernelState { queues, sched, .. } = state;
        let cb = queues.get_mut(ptr).ok_or(BadIdError)?;
        wait::begin_wait(
            sched,
            &mut cb.recv_queue,
            CollectionTag::QueueReceive(ptr.get()),
            timeout,
        )
    };

    // Safety: the request is serviced once the lock is relinquished
    unsafe { System::pend_switch() };
    task::wait_until_woken_up(&mut lock, task);

    let result = {
        let state = System::state().write(&mut *lock);
        let KernelState { queues, sched, .. } = state;
        let cb = queues.get_mut(ptr).ok_or(BadIdError)?;
        match wait::finish_wait(sched, &mut cb.recv_queue, task) {
            WaitOutcome::TimedOut => Err(ReceiveError::Timeout),
            WaitOutcome::Signaled => {
                // A sender deposited an element before waking us
                // Safety: `dst` points at `slot`; the queue is not empty
                unsafe { cb.read_cell(dst) };
                wait::wake_one(sched, &mut cb.send_queue);
                Ok(())
            }
        }
    };
    task::unlock_cpu_and_check_preemption(lock);
    // Safety: on success, one of the `read_cell` calls initialized `slot`
    result.map(|()| unsafe { slot.assume_init() })
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{define_test_kernel, pick_first_task, running_task};
    use super::super::{task, PortToKernel};
    use super::*;

    fn noop_entry(_: usize) -> ! {
        unreachable!()
    }

    #[test]
    fn fifo_order_within_capacity() {
        define_test_kernel!(System, port);
        task::create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        pick_first_task::<System>();

        let q = create::<System, u32>(4).unwrap();
        for value in [10u32, 20, 30, 40] {
            send::<System, u32>(q, value, 0).unwrap();
        }
        assert_eq!(len::<System>(q), Ok(4));
        // Full: a non-blocking send fails
        assert_eq!(send::<System, u32>(q, 50, 0), Err(SendError::Timeout));

        for expected in [10u32, 20, 30, 40] {
            assert_eq!(receive::<System, u32>(q, 0), Ok(expected));
        }
        assert_eq!(len::<System>(q), Ok(0));
        assert_eq!(receive::<System, u32>(q, 0), Err(ReceiveError::Timeout));
    }

    #[test]
    fn element_size_mismatch_is_rejected() {
        define_test_kernel!(System, port);
        task::create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        pick_first_task::<System>();

        let q = create::<System, u32>(2).unwrap();
        assert_eq!(send::<System, u8>(q, 7u8, 0), Err(SendError::BadParam));
        assert_eq!(
            receive::<System, u64>(q, 0),
            Err(ReceiveError::BadParam)
        );
    }

    #[test]
    fn send_blocks_until_receiver_makes_room() {
        define_test_kernel!(System, port);
        let t = task::create::<System>(noop_entry, 0, 128, 3, 0).unwrap();
        let _bg = task::create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        pick_first_task::<System>();
        assert_eq!(running_task::<System>(), Some(t));

        let q = create::<System, u32>(2).unwrap();
        send::<System, u32>(q, 1, 0).unwrap();
        send::<System, u32>(q, 2, 0).unwrap();

        // The next send must block; the hook drains one element on its
        // first run, which wakes the sender to retry the copy.
        let drained = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let drained2 = drained.clone();
        port::HOOK.lock().unwrap().replace(Box::new(move || {
            if !drained2.swap(true, std::sync::atomic::Ordering::Relaxed) {
                assert_eq!(receive::<System, u32>(q, 0), Ok(1));
            } else {
                unsafe { System::timer_tick() }
            }
        }));

        assert_eq!(send::<System, u32>(q, 3, 100), Ok(()));
        // The ring now holds [2, 3] in order
        assert_eq!(receive::<System, u32>(q, 0), Ok(2));
        assert_eq!(receive::<System, u32>(q, 0), Ok(3));
    }

    #[test]
    fn receive_times_out_on_empty_queue() {
        define_test_kernel!(System, port);
        let t = task::create::<System>(noop_entry, 0, 128, 2, 0).unwrap();
        let _bg = task::create::<System>(noop_entry, 0, 128, 1, 0).unwrap();
        pick_first_task::<System>();
        assert_eq!(running_task::<System>(), Some(t));

        let q = create::<System, u32>(2).unwrap();
        port::HOOK
            .lock()
            .unwrap()
            .replace(Box::new(|| unsafe { System::timer_tick() }));
        assert_eq!(receive::<System, u32>(q, 7), Err(ReceiveError::Timeout));
        assert_eq!(super::super::timeout::now::<System>().unwrap(), 7);
    }
}
