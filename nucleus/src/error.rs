/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Kernel error taxonomy.
//!
//! Every failure is reported synchronously to the calling thread as a
//! negative sentinel in the return register; the families occupy disjoint
//! code ranges so user-mode runtimes can classify without a table. Errors
//! are never delivered asynchronously to another thread.

use snafu::Snafu;

/// Errors in kernel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum KernelError {
    /// Slot not Valid, wrong object type, or insufficient rights.
    CapabilityInvalid,

    /// Kernel-object memory range already occupied.
    KomOccupied,
    /// Kernel-object memory range outside the governed window.
    KomExhausted,

    /// Refcount nonzero on root deletion, or the object is still wired.
    InUse,

    /// Page-table position already holds a mapping.
    AlreadyMapped,
    /// Page-table position holds nothing to remove or translate.
    NotMapped,
    /// Address or storage not aligned as the geometry requires.
    BadAlignment,
    /// Size/number order outside what the table or machine can represent.
    BadOrder,

    /// Thread is not in a state that allows (un)binding to a CPU.
    ThreadBindingError,
    /// Priority outside the scheduler's range.
    PriorityError,
    /// Operation requires the thread to be bound to a CPU.
    Unbound,

    /// Signal counter saturated at its bound.
    BlockWouldExceed,
    /// The parked receiver was consumed by a competing wake.
    WasCancelled,
    /// Non-blocking receive found the counter at zero, or the receiver
    /// slot is already taken.
    Empty,

    /// Invocation stack depth limit reached.
    InvocationOverflow,
    /// Return with no activation record to pop.
    InvocationEmpty,

    /// Platform rejected the kernel-function operation.
    KernFailed,
    /// Architecture layer cannot represent the request.
    HalFailed,

    /// Malformed system-call number or parameter word.
    BadSyscall,
}

impl KernelError {
    /// Stable negative sentinel for the system-call boundary.
    pub const fn code(self) -> isize {
        match self {
            KernelError::CapabilityInvalid => -1,

            KernelError::KomOccupied => -8,
            KernelError::KomExhausted => -9,

            KernelError::InUse => -16,

            KernelError::AlreadyMapped => -24,
            KernelError::NotMapped => -25,
            KernelError::BadAlignment => -26,
            KernelError::BadOrder => -27,

            KernelError::ThreadBindingError => -32,
            KernelError::PriorityError => -33,
            KernelError::Unbound => -34,

            KernelError::BlockWouldExceed => -40,
            KernelError::WasCancelled => -41,
            KernelError::Empty => -42,

            KernelError::InvocationOverflow => -48,
            KernelError::InvocationEmpty => -49,

            KernelError::KernFailed => -56,
            KernelError::HalFailed => -57,

            KernelError::BadSyscall => -64,
        }
    }
}

impl From<machine::platform::HalError> for KernelError {
    fn from(err: machine::platform::HalError) -> Self {
        match err {
            machine::platform::HalError::Unsupported => KernelError::KernFailed,
            machine::platform::HalError::Rejected => KernelError::HalFailed,
        }
    }
}

/// Shorthand used throughout the kernel.
pub type Result<T> = core::result::Result<T, KernelError>;
