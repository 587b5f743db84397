/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Capability tables and the operations over them.
//!
//! A table is a bare array of [`CapSlot`]s in kernel-object memory; the
//! table's own capability records the base and length. Create, copy, remove
//! and delete are each a short transaction on the slot state machine:
//!
//! - create: `Free → Creating`, carve through the object bitmap, initialise,
//!   release-publish `Valid`; any failure rolls everything back.
//! - copy: pin the source's root slot with a generation-checked refcount
//!   increment, then publish the derived slot. The root's `Valid → Deleting`
//!   transition is the linearisation point: a copy that increments after a
//!   delete started either sees the delete fail (`InUse`, our count) or
//!   observes the recycled generation and backs out.
//! - remove: `Valid → Frozen` on the derived slot, drop the root's count,
//!   wipe.
//! - delete: root-only `Valid → Deleting`, refuse with `InUse` while counted
//!   references exist, object teardown, bitmap unmark, wipe.

use {
    super::{
        capid::CapId,
        kmem,
        slot::{rc_count, rc_generation, CapSlot, SlotState, Status},
        CapKind, Rights,
    },
    crate::{
        error::{KernelError, Result},
        objects, Kernel, Word,
    },
    core::hint::spin_loop,
};

/// Reference to a capability table: base address and slot count.
#[derive(Clone, Copy, Debug)]
pub struct CptRef {
    base: *const CapSlot,
    len: usize,
}

// Tables live in pinned kernel-object memory and every slot field is
// atomic; the raw pointer is what makes this Send/Sync by hand.
unsafe impl Send for CptRef {}
unsafe impl Sync for CptRef {}

impl CptRef {
    /// Wrap a slot array at `base`.
    ///
    /// SAFETY: `base` must point at `len` live `CapSlot`s in kernel-object
    /// memory that outlive every use of the returned reference.
    pub unsafe fn from_raw(base: Word, len: usize) -> CptRef {
        CptRef {
            base: base as *const CapSlot,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn base_addr(&self) -> Word {
        self.base as Word
    }

    fn slot_ptr(&self, index: usize) -> Result<*const CapSlot> {
        if index >= self.len {
            return Err(KernelError::CapabilityInvalid);
        }
        Ok(unsafe { self.base.add(index) })
    }

    /// Borrow a slot by index.
    pub fn slot(&self, index: usize) -> Result<&CapSlot> {
        Ok(unsafe { &*self.slot_ptr(index)? })
    }
}

/// A validated snapshot of a Valid capability slot.
///
/// The snapshot is coherent with the acquire load of the status: the object
/// behind `object` was fully initialised before the slot became Valid.
pub struct ValidRef<'t> {
    pub slot: &'t CapSlot,
    pub status: Status,
    pub object: Word,
    pub rights: Rights,
    pub aux: [Word; 3],
    pub parent: Word,
}

macro_rules! kobject {
    ($name:ident, $kind:ident, $ty:path) => {
        paste::paste! {
            #[doc = "Borrow the `" $kind "` object behind this capability, checking the kind tag."]
            pub fn [<as_ $name>](&self) -> Result<&'t $ty> {
                if self.status.kind() != CapKind::$kind {
                    return Err(KernelError::CapabilityInvalid);
                }
                Ok(unsafe { &*(self.object as *const $ty) })
            }
        }
    };
}

impl<'t> ValidRef<'t> {
    /// Check kind and rights in one go.
    pub fn require(&self, kind: CapKind, rights: Rights) -> Result<()> {
        if self.status.kind() != kind || !self.rights.contains(rights) {
            return Err(KernelError::CapabilityInvalid);
        }
        Ok(())
    }

    /// Table capabilities dereference to a table reference, not an object.
    pub fn as_cap_table(&self) -> Result<CptRef> {
        if self.status.kind() != CapKind::CapTable {
            return Err(KernelError::CapabilityInvalid);
        }
        Ok(unsafe { CptRef::from_raw(self.object, self.aux[0]) })
    }

    kobject!(page_table, PageTable, crate::pgt::PageTable);
    kobject!(process, Process, crate::objects::process::Process);
    kobject!(thread, Thread, crate::objects::thread::Thread);
    kobject!(signal, Signal, crate::objects::signal::SignalEndpoint);
    kobject!(invocation, Invocation, crate::objects::invocation::Invocation);
}

fn read_valid(slot: &CapSlot) -> Result<ValidRef> {
    let status = slot.snapshot();
    if status.state() != SlotState::Valid {
        return Err(KernelError::CapabilityInvalid);
    }
    Ok(ValidRef {
        slot,
        status,
        object: slot.object(),
        rights: Rights::from_bits_truncate(slot.rights_word()),
        aux: [slot.aux(0), slot.aux(1), slot.aux(2)],
        parent: slot.parent(),
    })
}

/// Resolve a capability ID to a Valid slot snapshot.
pub fn lookup<'t>(cpt: &'t CptRef, raw: Word) -> Result<ValidRef<'t>> {
    match CapId::decode(raw) {
        CapId::One(index) => read_valid(cpt.slot(index)?),
        CapId::Two { outer, inner } => {
            let outer_ref = read_valid(cpt.slot(outer)?)?;
            let child = outer_ref.as_cap_table()?;
            let ptr = child.slot_ptr(inner)?;
            // The child table is kernel-object memory pinned at least as
            // long as the outer slot stays Valid; extend to the caller's
            // lifetime the same way the one-level path does.
            read_valid(unsafe { &*ptr })
        }
    }
}

/// Resolve a capability ID to a raw slot, Valid or not. Used for creation
/// destinations, which must currently be Free.
pub fn resolve_slot<'t>(cpt: &'t CptRef, raw: Word) -> Result<&'t CapSlot> {
    match CapId::decode(raw) {
        CapId::One(index) => cpt.slot(index),
        CapId::Two { outer, inner } => {
            let outer_ref = read_valid(cpt.slot(outer)?)?;
            let child = outer_ref.as_cap_table()?;
            let ptr = child.slot_ptr(inner)?;
            Ok(unsafe { &*ptr })
        }
    }
}

/// A generation-checked hold on an object's root slot.
pub(crate) struct RootPin<'t> {
    pub slot: &'t CapSlot,
    pub gen: Word,
    pub addr: Word,
}

/// Take a counted reference on the root slot behind `src`.
///
/// On success the object cannot finish deletion until the pin is dropped
/// through [`unpin_root`] (or handed to a published derived slot, whose
/// removal drops it).
pub(crate) fn pin_root<'t>(src: &ValidRef<'t>) -> Result<RootPin<'t>> {
    let root: &'t CapSlot = if src.status.is_root() {
        src.slot
    } else {
        debug_assert_ne!(src.parent, 0);
        unsafe { &*(src.parent as *const CapSlot) }
    };

    let gen = rc_generation(root.refcnt_word());
    root.rc_try_inc(gen)?;

    // The increment raced an eventual delete: wait for the slot to leave
    // Deleting, then decide whether our count survived.
    loop {
        let status = root.snapshot();
        let gen_now = rc_generation(root.refcnt_word());
        if gen_now != gen {
            // Recycled under us; the count died with the old generation.
            return Err(KernelError::CapabilityInvalid);
        }
        match status.state() {
            SlotState::Valid => {
                return Ok(RootPin {
                    slot: root,
                    gen,
                    addr: root as *const CapSlot as Word,
                })
            }
            SlotState::Deleting => spin_loop(),
            _ => {
                root.rc_dec(gen);
                return Err(KernelError::CapabilityInvalid);
            }
        }
    }
}

/// Drop a pin taken with [`pin_root`].
pub(crate) fn unpin_root(pin: &RootPin) {
    pin.slot.rc_dec(pin.gen);
}

/// Release a child link acquired earlier, given the recorded root address.
///
/// Safe against the root having died: the decrement is generation-checked.
pub(crate) fn release_child_link(root_addr: Word) {
    debug_assert_ne!(root_addr, 0);
    let root = unsafe { &*(root_addr as *const CapSlot) };
    root.rc_dec(rc_generation(root.refcnt_word()));
}

/// Create a kernel object: carve memory, initialise, publish.
///
/// `init` runs over zeroed, freshly claimed memory; if it fails the claim
/// and the slot reservation are both rolled back and nothing was ever
/// observable.
pub fn create_object(
    kernel: &Kernel,
    dst: &CapSlot,
    kom: &ValidRef,
    kind: CapKind,
    base: Word,
    size: Word,
    rights: Rights,
    aux: [Word; 3],
    init: impl FnOnce(Word) -> Result<()>,
) -> Result<Word> {
    kmem::carve_check(kom, kind, base, size)?;
    dst.begin_create(kind, true)?;
    if let Err(err) = kernel.kot.mark(base, size) {
        dst.abort_create();
        return Err(err);
    }
    unsafe { core::ptr::write_bytes(base as *mut u8, 0, size) };
    if let Err(err) = init(base) {
        kernel.kot.unmark(base, size);
        dst.abort_create();
        return Err(err);
    }
    dst.publish(base, rights.bits(), aux, 0);
    Ok(base)
}

/// Publish a capability with no carved object behind it (kernel-function
/// and kernel-memory authorities, boot-time table self-references).
pub fn create_pure(
    dst: &CapSlot,
    kind: CapKind,
    object: Word,
    rights: Rights,
    aux: [Word; 3],
) -> Result<()> {
    dst.begin_create(kind, true)?;
    dst.publish(object, rights.bits(), aux, 0);
    Ok(())
}

/// Derive a copy of `src_id` into `dst_locator` with shrunken rights.
pub fn copy(
    src_cpt: &CptRef,
    src_id: Word,
    dst_cpt: &CptRef,
    dst_locator: Word,
    mask: Rights,
) -> Result<()> {
    let src = lookup(src_cpt, src_id)?;
    if !src.rights.contains(mask) {
        return Err(KernelError::CapabilityInvalid);
    }
    let kind = src.status.kind();
    if kind == CapKind::None {
        return Err(KernelError::CapabilityInvalid);
    }

    let dst = resolve_slot(dst_cpt, dst_locator)?;
    dst.begin_create(kind, false)?;

    match pin_root(&src) {
        Ok(pin) => {
            // The pin becomes the derived slot's counted reference.
            dst.publish(src.object, mask.bits(), src.aux, pin.addr);
            Ok(())
        }
        Err(err) => {
            dst.abort_create();
            Err(err)
        }
    }
}

/// Remove a derived capability, dropping its count on the root.
pub fn remove(cpt: &CptRef, id: Word) -> Result<()> {
    let target = lookup(cpt, id)?;
    target.slot.freeze_derived()?;

    let parent = target.slot.parent();
    debug_assert_ne!(parent, 0);
    release_child_link(parent);

    target.slot.release();
    Ok(())
}

/// Delete a root capability and destroy its object.
pub fn delete(kernel: &Kernel, cpt: &CptRef, id: Word) -> Result<()> {
    let target = lookup(cpt, id)?;
    target.slot.begin_delete()?;

    if rc_count(target.slot.refcnt_word()) != 0 {
        target.slot.restore_valid();
        return Err(KernelError::InUse);
    }

    // Re-read the fields under Deleting: nothing can republish the slot
    // while we hold this state.
    let kind = target.slot.snapshot().kind();
    let object = target.slot.object();
    let aux = [target.slot.aux(0), target.slot.aux(1), target.slot.aux(2)];

    match objects::teardown(kind, object, aux) {
        Ok(size) => {
            if object != 0 && size > 0 {
                kernel.kot.unmark(object, size);
            }
            target.slot.release();
            Ok(())
        }
        Err(err) => {
            target.slot.restore_valid();
            Err(err)
        }
    }
}
