/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Kernel objects.
//!
//! Every object is pinned in kernel-object memory claimed through the KOT
//! and reached only through a Valid capability slot. This module owns the
//! object headers and their teardown rules; the lifecycle plumbing lives in
//! [`crate::caps::table`].

pub mod invocation;
pub mod kfunction;
pub mod process;
pub mod signal;
pub mod thread;

use {
    crate::{
        caps::{CapKind, CapSlot},
        error::{KernelError, Result},
        Word,
    },
    core::mem::size_of,
};

/// Implemented by every carved kernel object type.
pub trait KernelObject {
    /// The capability kind tag naming this object type.
    const KIND: CapKind;
}

/// Byte size of the object a slot of `kind` with payload `aux` governs.
///
/// Must agree exactly with what creation passed to the KOT, since deletion
/// unmarks the same range.
pub fn object_size(kind: CapKind, aux: [Word; 3]) -> Word {
    match kind {
        CapKind::CapTable => aux[0] * size_of::<CapSlot>(),
        CapKind::PageTable => crate::pgt::table_bytes_from_aux(aux),
        CapKind::Process => size_of::<process::Process>(),
        CapKind::Thread => size_of::<thread::Thread>(),
        CapKind::Signal => size_of::<signal::SignalEndpoint>(),
        CapKind::Invocation => size_of::<invocation::Invocation>(),
        // Pure authorities carry no storage.
        CapKind::None | CapKind::KernelFunction | CapKind::KernelMemory => 0,
    }
}

/// Object-specific destruction, called from root deletion while the slot is
/// held in Deleting. Checks that the object is quiescent, releases its
/// outgoing child links, and reports the byte size to unmark.
pub(crate) fn teardown(kind: CapKind, object: Word, aux: [Word; 3]) -> Result<Word> {
    match kind {
        CapKind::None => Err(KernelError::CapabilityInvalid),
        CapKind::CapTable => {
            // A table may only die empty; live entries would be orphaned.
            let table = unsafe { crate::caps::CptRef::from_raw(object, aux[0]) };
            for index in 0..table.len() {
                let slot = table.slot(index)?;
                if slot.snapshot().state() != crate::caps::SlotState::Free {
                    return Err(KernelError::InUse);
                }
            }
            Ok(object_size(kind, aux))
        }
        CapKind::PageTable => {
            let pgt = unsafe { &*(object as *const crate::pgt::PageTable) };
            pgt.teardown_check()?;
            Ok(object_size(kind, aux))
        }
        CapKind::Process => {
            let prc = unsafe { &*(object as *const process::Process) };
            prc.release_links();
            Ok(object_size(kind, aux))
        }
        CapKind::Thread => {
            let thd = unsafe { &*(object as *const thread::Thread) };
            thd.teardown_check()?;
            thd.release_links();
            Ok(object_size(kind, aux))
        }
        CapKind::Signal => {
            let sig = unsafe { &*(object as *const signal::SignalEndpoint) };
            sig.teardown_check()?;
            Ok(object_size(kind, aux))
        }
        CapKind::Invocation => {
            let inv = unsafe { &*(object as *const invocation::Invocation) };
            inv.teardown_check()?;
            inv.release_links();
            Ok(object_size(kind, aux))
        }
        CapKind::KernelFunction | CapKind::KernelMemory => Ok(0),
    }
}
