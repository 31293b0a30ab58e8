//! Task ready queue (internal use only).
//!
//! A bitmap-indexed array of per-priority FIFO rings. The bitmap makes
//! "highest occupied level" a constant-time scan; each level's ring carries
//! the round-robin rotation state for tasks sharing that priority.
use super::{
    cfg,
    collection::{CollectionTag, Key, NodeAccess, OrderedCollection, OrderedList},
    task::{StateNodeAccess, TaskCb, TaskPool},
    PortThreading, Priority,
};
use crate::utils::{
    pool::{Pool, PoolPtr},
    prio_bitmap::{OneWordBitmap, PrioBitmap},
    Init,
};

/// The bit array tracking which priority levels have Ready tasks. The word
/// width bounds [`cfg::NUM_PRIORITY_LEVELS`].
pub(super) type ReadyBitmap = OneWordBitmap<u32>;

const _: () = assert!(cfg::NUM_PRIORITY_LEVELS <= ReadyBitmap::LEN);

/// The Ready set: one FIFO ring per priority level plus an occupancy
/// bitmap.
///
/// Invariant: `!levels[i].is_empty() == bitmap.get(i)`
pub(super) struct ReadyQueue {
    bitmap: ReadyBitmap,
    levels: [OrderedList<StateNodeAccess>; cfg::NUM_PRIORITY_LEVELS],

    /// Remaining time-slice ticks for the level's front task. Re-armed from
    /// the front task's configured slice whenever the front changes through
    /// rotation or the level becomes occupied.
    slice_left: [u8; cfg::NUM_PRIORITY_LEVELS],
}

impl Init for ReadyQueue {
    const INIT: Self = Self {
        bitmap: Init::INIT,
        levels: Init::INIT,
        slice_left: Init::INIT,
    };
}

impl ReadyQueue {
    /// Insert a task at the back of its effective-priority level.
    pub(super) fn insert_task<System: PortThreading>(
        &mut self,
        tasks: &mut TaskPool<System>,
        task: PoolPtr,
    ) {
        let pri = tasks[task].effective_priority as usize;
        let was_empty = self.levels[pri].is_empty();
        self.levels[pri].push_back(tasks, task, CollectionTag::ReadyLevel(pri as Priority));
        self.bitmap.set(pri);
        if was_empty {
            self.slice_left[pri] = tasks[task].time_slice;
        }
    }

    /// Remove a task from the level recorded in its state node.
    pub(super) fn remove_task<System: PortThreading>(
        &mut self,
        tasks: &mut TaskPool<System>,
        task: PoolPtr,
    ) {
        let pri = match StateNodeAccess::node(&tasks[task]).home {
            Some(CollectionTag::ReadyLevel(p)) => p as usize,
            _ => unreachable!("task is not in the Ready set"),
        };
        self.levels[pri].remove(tasks, task);
        if self.levels[pri].is_empty() {
            self.bitmap.clear(pri);
        }
    }

    /// The task the dispatcher would select: the front of the highest
    /// occupied level.
    pub(super) fn front(&self) -> Option<PoolPtr> {
        self.bitmap
            .find_last_set()
            .and_then(|pri| self.levels[pri].first())
    }

    /// The highest occupied priority level.
    pub(super) fn top_priority(&self) -> Option<usize> {
        self.bitmap.find_last_set()
    }

    /// Account one tick against `level`'s remaining slice. On expiry the
    /// level rotates and the counter re-arms from the new front task.
    /// Returns whether a rotation occurred.
    pub(super) fn tick_slice<System: PortThreading>(
        &mut self,
        tasks: &mut TaskPool<System>,
        level: usize,
    ) -> bool {
        if self.levels[level].len() <= 1 {
            // Rotation is meaningless with a single member; the counter is
            // left alone so a newly arriving peer gets a full slice.
            return false;
        }
        if let Some(left) = self.slice_left[level].checked_sub(1) {
            self.slice_left[level] = left;
            false
        } else {
            self.rotate(tasks, level);
            true
        }
    }

    /// Advance the rotation cursor: the front task moves to the back and
    /// the slice counter re-arms from the new front's configured slice.
    pub(super) fn rotate<System: PortThreading>(
        &mut self,
        tasks: &mut TaskPool<System>,
        level: usize,
    ) {
        if let Some(front) = self.levels[level].pop_front(tasks) {
            self.levels[level]
                .push_back(tasks, front, CollectionTag::ReadyLevel(level as Priority));
        }
        if let Some(front) = self.levels[level].first() {
            self.slice_left[level] = tasks[front].time_slice;
        }
    }
}

/// [`ReadyQueue`] fulfills the same contract as the other state-set
/// backings; the key is the effective priority.
impl<System: PortThreading> OrderedCollection<TaskCb<System>> for ReadyQueue {
    fn insert<const CAP: usize>(
        &mut self,
        pool: &mut Pool<TaskCb<System>, CAP>,
        elem: PoolPtr,
        key: Key,
        _tag: CollectionTag,
    ) {
        debug_assert_eq!(key, pool[elem].effective_priority as Key);
        let pri = key as usize;
        let was_empty = self.levels[pri].is_empty();
        self.levels[pri].push_back(pool, elem, CollectionTag::ReadyLevel(pri as Priority));
        self.bitmap.set(pri);
        if was_empty {
            self.slice_left[pri] = pool[elem].time_slice;
        }
    }

    fn remove<const CAP: usize>(&mut self, pool: &mut Pool<TaskCb<System>, CAP>, elem: PoolPtr) {
        let pri = match StateNodeAccess::node(&pool[elem]).home {
            Some(CollectionTag::ReadyLevel(p)) => p as usize,
            _ => unreachable!("task is not in the Ready set"),
        };
        self.levels[pri].remove(pool, elem);
        if self.levels[pri].is_empty() {
            self.bitmap.clear(pri);
        }
    }

    fn first(&self) -> Option<PoolPtr> {
        self.bitmap
            .find_first_set()
            .and_then(|pri| self.levels[pri].first())
    }

    fn last(&self) -> Option<PoolPtr> {
        self.front()
    }

    fn is_empty(&self) -> bool {
        self.bitmap.find_last_set().is_none()
    }
}
