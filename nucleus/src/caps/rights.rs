/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Capability rights.
//!
//! One flag word shared by all kinds; each kind's native set picks the bits
//! that mean anything for it. A copy may only shrink the set, never grow it.

use {super::CapKind, crate::Word, bitflags::bitflags};

bitflags! {
    /// Operation rights carried by a capability.
    pub struct Rights: Word {
        // Signal endpoint.
        const SIG_SEND      = 1 << 0;
        const SIG_RECEIVE   = 1 << 1;

        // Invocation.
        const INV_ACTIVATE  = 1 << 2;
        const INV_SET       = 1 << 3;

        // Page table.
        const PGT_MAP       = 1 << 4;
        const PGT_UNMAP     = 1 << 5;
        const PGT_LOOKUP    = 1 << 6;

        // Thread scheduling control.
        const THD_BIND      = 1 << 7;
        const THD_PRIO      = 1 << 8;
        const THD_RUN       = 1 << 9;
        const THD_STOP      = 1 << 10;
        const THD_FAULT_SIG = 1 << 11;

        // Kernel memory: which object kinds this authority may carve.
        const CARVE_CPT     = 1 << 12;
        const CARVE_PGT     = 1 << 13;
        const CARVE_PRC     = 1 << 14;
        const CARVE_THD     = 1 << 15;
        const CARVE_SIG     = 1 << 16;
        const CARVE_INV     = 1 << 17;

        // Kernel-function families.
        const KFN_INT       = 1 << 18;
        const KFN_CACHE     = 1 << 19;
        const KFN_PERF      = 1 << 20;
        const KFN_DEBUG     = 1 << 21;
        const KFN_SYS       = 1 << 22;
    }
}

impl Rights {
    /// The native (maximal) right set of each object kind.
    pub fn native(kind: CapKind) -> Rights {
        match kind {
            CapKind::None => Rights::empty(),
            CapKind::CapTable => Rights::empty(),
            CapKind::PageTable => Rights::PGT_MAP | Rights::PGT_UNMAP | Rights::PGT_LOOKUP,
            CapKind::Process => Rights::empty(),
            CapKind::Thread => {
                Rights::THD_BIND
                    | Rights::THD_PRIO
                    | Rights::THD_RUN
                    | Rights::THD_STOP
                    | Rights::THD_FAULT_SIG
            }
            CapKind::Signal => Rights::SIG_SEND | Rights::SIG_RECEIVE,
            CapKind::Invocation => Rights::INV_ACTIVATE | Rights::INV_SET,
            CapKind::KernelFunction => {
                Rights::KFN_INT
                    | Rights::KFN_CACHE
                    | Rights::KFN_PERF
                    | Rights::KFN_DEBUG
                    | Rights::KFN_SYS
            }
            CapKind::KernelMemory => {
                Rights::CARVE_CPT
                    | Rights::CARVE_PGT
                    | Rights::CARVE_PRC
                    | Rights::CARVE_THD
                    | Rights::CARVE_SIG
                    | Rights::CARVE_INV
            }
        }
    }

    /// The carve right guarding creation of `kind`, if that kind can be
    /// carved from kernel memory at all.
    pub fn carve_for(kind: CapKind) -> Option<Rights> {
        Some(match kind {
            CapKind::CapTable => Rights::CARVE_CPT,
            CapKind::PageTable => Rights::CARVE_PGT,
            CapKind::Process => Rights::CARVE_PRC,
            CapKind::Thread => Rights::CARVE_THD,
            CapKind::Signal => Rights::CARVE_SIG,
            CapKind::Invocation => Rights::CARVE_INV,
            _ => return None,
        })
    }
}
