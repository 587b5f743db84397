/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Implementation of system capabilities.
//!
//! A capability is a typed, rights-bearing reference from a subject to a
//! kernel object, unforgeable outside the kernel. Capabilities live in
//! fixed-size slot arrays ([`table::CptRef`]); each slot runs the
//! Free → Creating → Valid → Deleting/Frozen → Free state machine
//! ([`slot::CapSlot`]) that serialises every concurrent operation touching
//! it. Object publication is a release store of the slot status; observers
//! who see Valid see a fully initialised object.

pub mod capid;
pub mod kmem;
pub mod rights;
pub mod slot;
pub mod table;

pub use {
    capid::CapId,
    rights::Rights,
    slot::{CapSlot, SlotState, Status},
    table::{CptRef, ValidRef},
};

use crate::Word;

/// Kind tag of a capability slot: which kernel object variant it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CapKind {
    None = 0,
    CapTable = 1,
    PageTable = 2,
    Process = 3,
    Thread = 4,
    Signal = 5,
    Invocation = 6,
    KernelFunction = 7,
    KernelMemory = 8,
}

impl CapKind {
    pub const fn to_word(self) -> Word {
        self as Word
    }

    pub fn from_word(word: Word) -> Option<CapKind> {
        Some(match word {
            0 => CapKind::None,
            1 => CapKind::CapTable,
            2 => CapKind::PageTable,
            3 => CapKind::Process,
            4 => CapKind::Thread,
            5 => CapKind::Signal,
            6 => CapKind::Invocation,
            7 => CapKind::KernelFunction,
            8 => CapKind::KernelMemory,
            _ => return None,
        })
    }
}
