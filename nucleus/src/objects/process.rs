/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Process: the pairing of a capability table with a top-level page table,
//! defining one protection domain. The process holds typed, non-owning
//! child links on both, counted in the targets' root refcounts so neither
//! can be deleted out from under it.

use {
    super::KernelObject,
    crate::{
        caps::{
            table::{create_object, lookup, pin_root, release_child_link, resolve_slot},
            CapKind, CptRef, Rights,
        },
        error::{KernelError, Result},
        Kernel, Word,
    },
    core::mem::size_of,
};

/// One protection domain.
#[repr(C)]
pub struct Process {
    cpt_base: Word,
    cpt_len: Word,
    cpt_root: Word,
    pgt: Word,
    pgt_root: Word,
}

impl KernelObject for Process {
    const KIND: CapKind = CapKind::Process;
}

impl Process {
    /// The process's capability table.
    pub fn cpt(&self) -> CptRef {
        unsafe { CptRef::from_raw(self.cpt_base, self.cpt_len as usize) }
    }

    /// Kernel VA of the top-level page table.
    pub fn top_pgt_addr(&self) -> Word {
        self.pgt
    }

    pub fn top_pgt(&self) -> &crate::pgt::PageTable {
        unsafe { &*(self.pgt as *const crate::pgt::PageTable) }
    }

    /// Drop the child links at deletion.
    pub(crate) fn release_links(&self) {
        release_child_link(self.cpt_root);
        release_child_link(self.pgt_root);
    }
}

/// Create a process object binding `cpt_id` (a capability table) and
/// `pgt_id` (a top-level page table).
pub fn create_process(
    kernel: &Kernel,
    cpt: &CptRef,
    dst_id: Word,
    kom_id: Word,
    base: Word,
    cpt_id: Word,
    pgt_id: Word,
) -> Result<Word> {
    let kom = lookup(cpt, kom_id)?;
    let child_cpt = lookup(cpt, cpt_id)?;
    let table = child_cpt.as_cap_table()?;
    let child_pgt = lookup(cpt, pgt_id)?;
    let top = child_pgt.as_page_table()?;
    if !top.is_top() {
        return Err(KernelError::CapabilityInvalid);
    }

    let dst = resolve_slot(cpt, dst_id)?;

    let cpt_pin = pin_root(&child_cpt)?;
    let pgt_pin = match pin_root(&child_pgt) {
        Ok(pin) => pin,
        Err(err) => {
            crate::caps::table::unpin_root(&cpt_pin);
            return Err(err);
        }
    };

    let pgt_va = child_pgt.object;
    let cpt_root = cpt_pin.addr;
    let pgt_root = pgt_pin.addr;
    let created = create_object(
        kernel,
        dst,
        &kom,
        CapKind::Process,
        base,
        size_of::<Process>(),
        Rights::native(CapKind::Process),
        [0; 3],
        |at| {
            unsafe {
                (at as *mut Process).write(Process {
                    cpt_base: table.base_addr(),
                    cpt_len: table.len() as Word,
                    cpt_root,
                    pgt: pgt_va,
                    pgt_root,
                });
            }
            Ok(())
        },
    );

    if created.is_err() {
        crate::caps::table::unpin_root(&cpt_pin);
        crate::caps::table::unpin_root(&pgt_pin);
    }
    created
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{caps::slot::rc_count, caps::table, testkit},
    };

    #[test]
    fn process_pins_its_cpt_and_pgt() {
        let env = testkit::env();
        let (cpt_id, pgt_id) = env.make_cpt_and_top_pgt(8, 9);
        let base = env.carve(core::mem::size_of::<Process>());

        create_process(&env.kernel, &env.cpt, 10, env.kom_id, base, cpt_id, pgt_id).unwrap();

        let cpt_cap = table::lookup(&env.cpt, cpt_id).unwrap();
        let pgt_cap = table::lookup(&env.cpt, pgt_id).unwrap();
        assert_eq!(rc_count(cpt_cap.slot.refcnt_word()), 1);
        assert_eq!(rc_count(pgt_cap.slot.refcnt_word()), 1);

        // Neither child can be deleted while the process lives.
        assert_eq!(
            table::delete(&env.kernel, &env.cpt, pgt_id).unwrap_err(),
            KernelError::InUse
        );

        table::delete(&env.kernel, &env.cpt, 10).unwrap();
        assert_eq!(rc_count(cpt_cap.slot.refcnt_word()), 0);
        assert_eq!(rc_count(pgt_cap.slot.refcnt_word()), 0);
        table::delete(&env.kernel, &env.cpt, pgt_id).unwrap();
        table::delete(&env.kernel, &env.cpt, cpt_id).unwrap();
    }

    #[test]
    fn non_top_pgt_is_refused() {
        let env = testkit::env();
        let (cpt_id, _) = env.make_cpt_and_top_pgt(8, 9);
        let nontop_id = env.make_nontop_pgt(11);
        let base = env.carve(core::mem::size_of::<Process>());

        assert_eq!(
            create_process(&env.kernel, &env.cpt, 10, env.kom_id, base, cpt_id, nontop_id)
                .unwrap_err(),
            KernelError::CapabilityInvalid
        );
        // The failed creation released its pins.
        let cpt_cap = table::lookup(&env.cpt, cpt_id).unwrap();
        assert_eq!(rc_count(cpt_cap.slot.refcnt_word()), 0);
    }
}
