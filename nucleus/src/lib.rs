/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Vigil microkernel core.
//!
//! The kernel multiplexes CPUs, memory and interrupts through an
//! object-capability model and defers every policy decision to user mode.
//! User code reaches the machine only through kernel objects it holds
//! capabilities to; the kernel enforces typing, authority and integrity and
//! nothing else.
//!
//! The load-bearing pieces:
//!
//! - [`caps`]: typed, revocable, copyable references to kernel objects,
//!   with transactional creation and deletion under concurrent lookup.
//! - [`kot`]: the bitmap allocator governing kernel-object memory.
//! - [`objects`] + [`sched`]: threads, per-CPU preemptive priority
//!   scheduling, signal endpoints, synchronous cross-domain invocation.
//! - [`pgt`]: the architecture-neutral page-table object mirrored into the
//!   protection hardware, including dynamic region replacement.
//!
//! Everything the core wants from the machine comes through
//! [`machine::platform::Platform`]; the kernel itself is architecture-blind.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::too_many_arguments)]
#![deny(warnings)]

pub mod boot;
pub mod caps;
pub mod error;
pub mod exc;
pub mod irq;
pub mod kot;
pub mod objects;
pub mod pgt;
pub mod sched;
pub mod syscall;

pub use machine::{Word, WORD_BITS};

#[cfg(test)]
pub(crate) mod testkit;

use machine::platform::Platform;

/// Everything global a kernel entry path needs: the object-memory bitmap,
/// the machine, the shared kernel-window template stamped into every
/// top-level page table, and the interrupt/event flag pages.
pub struct Kernel<'k> {
    /// Occupancy bitmap over the kernel-object window.
    pub kot: kot::ObjectTable<'k>,
    /// The machine underneath.
    pub platform: &'k (dyn Platform + Sync),
    /// Kernel-space entries copied into each top table at creation.
    pub mirror: &'k [pgt::MirrorEntry],
    /// Interrupt-vector flag page shared with user mode.
    pub vct_flags: &'k irq::FlagPage,
    /// Event flag page shared with user mode.
    pub evt_flags: &'k irq::FlagPage,
}
