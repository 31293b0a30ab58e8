//! Wren, a preemptive, single-core, fixed-memory real-time kernel.
//!
//! The kernel decides which task runs next, tracks timed delays, and
//! provides priority-aware inter-task synchronization (counting semaphores,
//! priority-inheritance mutexes, bounded blocking queues). Everything above
//! the context-switch mechanism lives here; everything below it is supplied
//! by a *port* (see [`kernel::PortThreading`] and [`kernel::PortHeap`]).
//!
//! # Static configuration
//!
//! Kernel state is fixed-size and lives in a single `static` bound to a
//! user-defined system type:
//!
//! ```rust,ignore
//! struct SystemTraits;
//! wren_kernel::define_kernel_state!(SystemTraits);
//! // + `unsafe impl PortThreading/PortHeap for SystemTraits`, supplied by
//! //   the port crate for the target processor
//! ```
//!
//! Object counts and the priority range are compile-time constants
//! ([`kernel::cfg`]).
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
pub mod kernel;
pub mod utils;
