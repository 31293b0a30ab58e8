//! Result codes returned by the kernel API.
//!
//! Timeouts are a normal, expected outcome of blocking operations and are
//! reported through the per-operation error types rather than a fatal path.

/// The operation was performed in a context where it's not allowed (e.g. a
/// blocking call from an interrupt handler, or any call from within a
/// critical section).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadContextError;

/// The specified object handle does not refer to a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadIdError;

macro_rules! define_error {
    (
        $( #[doc $( $doc:tt )*] )*
        pub enum $Name:ident {
            $(
                $( #[doc $( $vdoc:tt )*] )*
                $Variant:ident
            ),* $(,)?
        }
    ) => {
        $( #[doc $( $doc )*] )*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $Name {
            $(
                $( #[doc $( $vdoc )*] )*
                $Variant,
            )*
        }

        define_error! { @from $Name, BadContext, BadContextError, [ $( $Variant )* ] }
        define_error! { @from $Name, BadId, BadIdError, [ $( $Variant )* ] }
    };

    // Emit `From<$Sub>` if `$Target` is one of the variants.
    ( @from $Name:ident, $Target:ident, $Sub:ident, [ $( $Variant:ident )* ] ) => {
        $(
            define_error! { @from_one $Name, $Target, $Sub, $Variant }
        )*
    };
    ( @from_one $Name:ident, BadContext, $Sub:ident, BadContext ) => {
        impl From<$Sub> for $Name {
            #[inline]
            fn from(_: $Sub) -> Self {
                Self::BadContext
            }
        }
    };
    ( @from_one $Name:ident, BadId, $Sub:ident, BadId ) => {
        impl From<$Sub> for $Name {
            #[inline]
            fn from(_: $Sub) -> Self {
                Self::BadId
            }
        }
    };
    ( @from_one $Name:ident, $Target:ident, $Sub:ident, $Variant:ident ) => {};
}

define_error! {
    /// Error type for [`task::create`](crate::kernel::task::create).
    pub enum CreateTaskError {
        BadContext,
        /// The priority or stack size is out of range.
        BadParam,
        /// The task arena or the allocator collaborator is exhausted.
        OutOfMemory,
    }
}

define_error! {
    /// Error type for [`task::delete`](crate::kernel::task::delete).
    pub enum DeleteTaskError {
        BadContext,
        BadId,
        /// The task is already Dead.
        BadObjectState,
    }
}

define_error! {
    /// Error type for [`task::sleep`](crate::kernel::task::sleep).
    pub enum SleepError {
        /// Not a waitable context.
        BadContext,
    }
}

define_error! {
    /// Error type for [`task::suspend`](crate::kernel::task::suspend).
    pub enum SuspendTaskError {
        BadContext,
        BadId,
        /// The task is not Ready or Running.
        BadObjectState,
    }
}

define_error! {
    /// Error type for [`task::resume`](crate::kernel::task::resume).
    pub enum ResumeTaskError {
        BadContext,
        BadId,
        /// The task is not Suspended.
        BadObjectState,
    }
}

define_error! {
    /// Error type for [`task::current`](crate::kernel::task::current).
    pub enum GetCurrentTaskError {
        /// Not a task context.
        BadContext,
    }
}

define_error! {
    /// Error type for [`task::priority`](crate::kernel::task::priority).
    pub enum GetTaskPriorityError {
        BadContext,
        BadId,
    }
}

define_error! {
    /// Error type for [`task::set_priority`](crate::kernel::task::set_priority).
    pub enum SetTaskPriorityError {
        BadContext,
        BadId,
        /// The priority is out of range.
        BadParam,
        /// The task is Dead.
        BadObjectState,
    }
}

define_error! {
    /// Error type for object construction (`create` on semaphores, mutexes,
    /// queues, and timers).
    pub enum CreateError {
        BadContext,
        /// A construction parameter (capacity, element size) is out of
        /// range.
        BadParam,
        /// The object arena or the allocator collaborator is exhausted.
        OutOfMemory,
    }
}

define_error! {
    /// Error type for state queries (`get`, `is_locked`, `len`).
    pub enum QueryError {
        BadContext,
        BadId,
    }
}

define_error! {
    /// Error type for object destruction.
    pub enum DeleteError {
        BadContext,
        BadId,
    }
}

define_error! {
    /// Error type for [`semaphore::take`](crate::kernel::semaphore::take).
    pub enum TakeError {
        BadContext,
        BadId,
        /// The semaphore was not signaled within the timeout (this includes
        /// a failed non-blocking poll).
        Timeout,
    }
}

define_error! {
    /// Error type for [`semaphore::release`](crate::kernel::semaphore::release).
    pub enum ReleaseError {
        BadContext,
        BadId,
    }
}

define_error! {
    /// Error type for [`mutex::lock`](crate::kernel::mutex::lock).
    pub enum LockError {
        BadContext,
        BadId,
        /// The mutex was not released within the timeout (this includes a
        /// failed non-blocking poll).
        Timeout,
    }
}

define_error! {
    /// Error type for [`mutex::unlock`](crate::kernel::mutex::unlock).
    pub enum UnlockError {
        BadContext,
        BadId,
        /// The calling task does not own the mutex.
        NotOwner,
    }
}

define_error! {
    /// Error type for [`mqueue::send`](crate::kernel::mqueue::send).
    pub enum SendError {
        BadContext,
        BadId,
        /// The element type does not match the queue's element size.
        BadParam,
        /// No space became available within the timeout.
        Timeout,
    }
}

define_error! {
    /// Error type for [`mqueue::receive`](crate::kernel::mqueue::receive).
    pub enum ReceiveError {
        BadContext,
        BadId,
        /// The element type does not match the queue's element size.
        BadParam,
        /// No element arrived within the timeout.
        Timeout,
    }
}

define_error! {
    /// Error type for timer control operations.
    pub enum TimerError {
        BadContext,
        BadId,
    }
}
