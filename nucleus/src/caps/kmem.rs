/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Kernel-memory capability (Kom): authority to carve object storage.
//!
//! A Kom cap carries a `[start, end)` window in its aux words and a carve
//! permission per object kind in its rights mask. It is pure authority;
//! the actual allocator is the object bitmap; the caller picks addresses.

use {
    super::{CapKind, Rights, ValidRef},
    crate::error::{KernelError, Result},
    crate::Word,
};

/// Window carried by a Kom capability.
pub fn window(kom: &ValidRef) -> (Word, Word) {
    (kom.aux[0], kom.aux[1])
}

/// Check that `kom` authorises carving `[base, base + size)` for `kind`.
pub fn carve_check(kom: &ValidRef, kind: CapKind, base: Word, size: Word) -> Result<()> {
    if kom.status.kind() != CapKind::KernelMemory {
        return Err(KernelError::CapabilityInvalid);
    }
    let guard = Rights::carve_for(kind).ok_or(KernelError::CapabilityInvalid)?;
    if !kom.rights.contains(guard) {
        return Err(KernelError::CapabilityInvalid);
    }
    let (start, end) = window(kom);
    if base < start || size == 0 || base.checked_add(size).map_or(true, |top| top > end) {
        return Err(KernelError::KomExhausted);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::caps::table::{self, create_pure},
        crate::caps::CapSlot,
    };

    fn kom_slot(rights: Rights, start: Word, end: Word) -> &'static CapSlot {
        let slot: &'static CapSlot = Box::leak(Box::new(CapSlot::new()));
        create_pure(slot, CapKind::KernelMemory, 0, rights, [start, end, 0]).unwrap();
        slot
    }

    fn valid(slot: &CapSlot) -> ValidRef {
        let cpt = unsafe { table::CptRef::from_raw(slot as *const CapSlot as Word, 1) };
        let cpt: &'static table::CptRef = Box::leak(Box::new(cpt));
        table::lookup(cpt, 0).unwrap()
    }

    #[test]
    fn window_and_kind_gate_carving() {
        let slot = kom_slot(Rights::CARVE_SIG, 0x1000, 0x2000);
        let kom = valid(slot);

        carve_check(&kom, CapKind::Signal, 0x1000, 0x100).unwrap();
        assert_eq!(
            carve_check(&kom, CapKind::Thread, 0x1000, 0x100).unwrap_err(),
            KernelError::CapabilityInvalid
        );
        assert_eq!(
            carve_check(&kom, CapKind::Signal, 0xF00, 0x100).unwrap_err(),
            KernelError::KomExhausted
        );
        assert_eq!(
            carve_check(&kom, CapKind::Signal, 0x1F80, 0x100).unwrap_err(),
            KernelError::KomExhausted
        );
        assert_eq!(
            carve_check(&kom, CapKind::Signal, 0x1000, 0).unwrap_err(),
            KernelError::KomExhausted
        );
    }

    #[test]
    fn pure_authorities_cannot_be_carved() {
        let slot = kom_slot(Rights::all(), 0, Word::MAX);
        let kom = valid(slot);
        assert_eq!(
            carve_check(&kom, CapKind::KernelFunction, 0x1000, 0x40).unwrap_err(),
            KernelError::CapabilityInvalid
        );
    }
}
