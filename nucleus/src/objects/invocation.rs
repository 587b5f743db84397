/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Invocation: the synchronous cross-domain call vehicle.
//!
//! An invocation binds an entry point, a stack and a cookie to a target
//! process. Activation pushes a return frame onto the calling thread's
//! invocation stack, switches the page table, and points the thread's
//! context at the entry; the thread migrates through address spaces, it is
//! not context-switched: CPU, priority and timeslice all stay put. Return
//! pops the frame, restores the page table and delivers the return value.

use {
    super::KernelObject,
    crate::{
        caps::{
            table::{create_object, lookup, pin_root, release_child_link, resolve_slot},
            CapKind, CptRef, Rights,
        },
        error::{KernelError, Result},
        objects::{process::Process, thread::InvFrame, thread::Thread},
        sched::CpuLocal,
        Kernel, Word,
    },
    core::{
        mem::size_of,
        sync::atomic::{AtomicUsize, Ordering},
    },
};

/// A bound activation record.
#[repr(C)]
pub struct Invocation {
    process: Word,
    prc_root: Word,
    entry: AtomicUsize,
    stack: AtomicUsize,
    cookie: AtomicUsize,
    /// VA of the thread currently inside, 0 when quiescent.
    active: AtomicUsize,
}

impl KernelObject for Invocation {
    const KIND: CapKind = CapKind::Invocation;
}

impl Invocation {
    pub fn target_process(&self) -> Word {
        self.process
    }

    pub fn entry(&self) -> Word {
        self.entry.load(Ordering::Relaxed)
    }

    pub fn stack(&self) -> Word {
        self.stack.load(Ordering::Relaxed)
    }

    pub fn cookie(&self) -> Word {
        self.cookie.load(Ordering::Relaxed)
    }

    /// Rebind the entry/stack/cookie triple.
    pub fn set(&self, entry: Word, stack: Word, cookie: Word) -> Result<()> {
        if self.active.load(Ordering::Acquire) != 0 {
            return Err(KernelError::InUse);
        }
        self.entry.store(entry, Ordering::Relaxed);
        self.stack.store(stack, Ordering::Relaxed);
        self.cookie.store(cookie, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn teardown_check(&self) -> Result<()> {
        if self.active.load(Ordering::Acquire) != 0 {
            return Err(KernelError::InUse);
        }
        Ok(())
    }

    pub(crate) fn release_links(&self) {
        release_child_link(self.prc_root);
    }
}

/// Activate `inv` on the calling thread.
pub fn activate(
    kernel: &Kernel,
    cpu: &CpuLocal,
    thd: &Thread,
    inv_va: Word,
    param: Word,
) -> Result<()> {
    let inv = unsafe { &*(inv_va as *const Invocation) };
    if inv.entry.load(Ordering::Acquire) == 0 {
        return Err(KernelError::CapabilityInvalid);
    }
    inv.active
        .compare_exchange(0, thd.addr(), Ordering::AcqRel, Ordering::Acquire)
        .map_err(|_| KernelError::InUse)?;

    let frame = thd.with_ctx(|ctx| InvFrame {
        inv: inv_va,
        ret_pc: ctx.pc,
        ret_sp: ctx.sp,
        prior_process: thd.process(),
    });
    if let Err(err) = thd.inv_push(frame) {
        inv.active.store(0, Ordering::Release);
        return Err(err);
    }

    // Migrate into the target protection domain.
    let target = unsafe { &*(inv.process as *const Process) };
    if thd.process() != inv.process {
        crate::pgt::load(kernel, cpu, target.top_pgt_addr());
        thd.set_process(inv.process);
    }
    thd.with_ctx(|ctx| ctx.install_call(inv.entry(), inv.stack(), inv.cookie(), param));
    Ok(())
}

/// Return from the innermost activation with `retval`.
pub fn inv_return(kernel: &Kernel, cpu: &CpuLocal, thd: &Thread, retval: Word) -> Result<()> {
    let frame = thd.inv_pop()?;
    let inv = unsafe { &*(frame.inv as *const Invocation) };
    debug_assert_eq!(inv.active.load(Ordering::Relaxed), thd.addr());
    inv.active.store(0, Ordering::Release);

    if thd.process() != frame.prior_process {
        let prior = unsafe { &*(frame.prior_process as *const Process) };
        crate::pgt::load(kernel, cpu, prior.top_pgt_addr());
        thd.set_process(frame.prior_process);
    }
    thd.with_ctx(|ctx| {
        ctx.pc = frame.ret_pc;
        ctx.sp = frame.ret_sp;
        ctx.set_retval(retval);
    });
    Ok(())
}

/// Create an invocation bound to process `prc_id`. Entry and stack are
/// installed afterwards through [`Invocation::set`].
pub fn create_invocation(
    kernel: &Kernel,
    cpt: &CptRef,
    dst_id: Word,
    kom_id: Word,
    base: Word,
    prc_id: Word,
) -> Result<Word> {
    let kom = lookup(cpt, kom_id)?;
    let prc = lookup(cpt, prc_id)?;
    prc.require(CapKind::Process, Rights::empty())?;
    let dst = resolve_slot(cpt, dst_id)?;

    let pin = pin_root(&prc)?;
    let prc_va = prc.object;
    let prc_root = pin.addr;

    let created = create_object(
        kernel,
        dst,
        &kom,
        CapKind::Invocation,
        base,
        size_of::<Invocation>(),
        Rights::native(CapKind::Invocation),
        [0; 3],
        |at| {
            unsafe {
                (at as *mut Invocation).write(Invocation {
                    process: prc_va,
                    prc_root,
                    entry: AtomicUsize::new(0),
                    stack: AtomicUsize::new(0),
                    cookie: AtomicUsize::new(0),
                    active: AtomicUsize::new(0),
                });
            }
            Ok(())
        },
    );

    if created.is_err() {
        crate::caps::table::unpin_root(&pin);
    }
    created
}

#[cfg(test)]
mod tests {
    use {super::*, crate::caps::table, crate::testkit};

    #[test]
    fn activation_migrates_and_return_restores() {
        let env = testkit::env();
        let cpu = crate::sched::CpuLocal::new(0);

        let home_prc = env.make_process(8, 9, 10);
        let peer_prc = env.make_process(11, 12, 13);
        let thd = env.make_thread_in(14, home_prc, 5, 2);

        let inv_base = env.carve(size_of::<Invocation>());
        create_invocation(&env.kernel, &env.cpt, 15, env.kom_id, inv_base, peer_prc).unwrap();
        let inv_cap = table::lookup(&env.cpt, 15).unwrap();
        let inv = inv_cap.as_invocation().unwrap();
        inv.set(0x4000, 0x9000, 0xC00C_1E00).unwrap();

        thd.with_ctx(|ctx| {
            ctx.pc = 0x1234;
            ctx.sp = 0x2000;
        });
        let home = thd.process();
        activate(&env.kernel, &cpu, thd, inv_cap.object, 77).unwrap();

        assert_ne!(thd.process(), home);
        assert_eq!(thd.inv_depth(), 1);
        thd.with_ctx(|ctx| {
            assert_eq!(ctx.pc, 0x4000);
            assert_eq!(ctx.sp, 0x9000);
            assert_eq!(ctx.r[0], 0xC00C_1E00);
            assert_eq!(ctx.r[1], 77);
        });

        inv_return(&env.kernel, &cpu, thd, 0xDEAD_BEEF).unwrap();
        assert_eq!(thd.process(), home);
        assert_eq!(thd.inv_depth(), 0);
        thd.with_ctx(|ctx| {
            assert_eq!(ctx.pc, 0x1234);
            assert_eq!(ctx.sp, 0x2000);
            assert_eq!(ctx.retval(), 0xDEAD_BEEF);
        });
    }

    #[test]
    fn unset_invocation_cannot_activate() {
        let env = testkit::env();
        let cpu = crate::sched::CpuLocal::new(0);
        let home_prc = env.make_process(8, 9, 10);
        let thd = env.make_thread_in(14, home_prc, 5, 2);
        let inv_base = env.carve(size_of::<Invocation>());
        create_invocation(&env.kernel, &env.cpt, 15, env.kom_id, inv_base, home_prc).unwrap();
        let inv_cap = table::lookup(&env.cpt, 15).unwrap();
        assert_eq!(
            activate(&env.kernel, &cpu, thd, inv_cap.object, 0).unwrap_err(),
            KernelError::CapabilityInvalid
        );
    }

    #[test]
    fn double_activation_is_refused_and_return_needs_a_frame() {
        let env = testkit::env();
        let cpu = crate::sched::CpuLocal::new(0);
        let home_prc = env.make_process(8, 9, 10);
        let thd = env.make_thread_in(14, home_prc, 5, 2);
        let other = env.make_thread_in(16, home_prc, 5, 2);

        let inv_base = env.carve(size_of::<Invocation>());
        create_invocation(&env.kernel, &env.cpt, 15, env.kom_id, inv_base, home_prc).unwrap();
        let inv_cap = table::lookup(&env.cpt, 15).unwrap();
        let inv = inv_cap.as_invocation().unwrap();
        inv.set(0x4000, 0x9000, 0).unwrap();

        assert_eq!(
            inv_return(&env.kernel, &cpu, thd, 0).unwrap_err(),
            KernelError::InvocationEmpty
        );

        activate(&env.kernel, &cpu, thd, inv_cap.object, 0).unwrap();
        assert_eq!(
            activate(&env.kernel, &cpu, other, inv_cap.object, 0).unwrap_err(),
            KernelError::InUse
        );
        // Rebinding while active is refused too.
        assert_eq!(inv.set(1, 2, 3).unwrap_err(), KernelError::InUse);

        inv_return(&env.kernel, &cpu, thd, 0).unwrap();
        activate(&env.kernel, &cpu, other, inv_cap.object, 0).unwrap();
        inv_return(&env.kernel, &cpu, other, 0).unwrap();
    }

    #[test]
    fn deletion_refused_while_active() {
        let env = testkit::env();
        let cpu = crate::sched::CpuLocal::new(0);
        let home_prc = env.make_process(8, 9, 10);
        let thd = env.make_thread_in(14, home_prc, 5, 2);
        let inv_base = env.carve(size_of::<Invocation>());
        create_invocation(&env.kernel, &env.cpt, 15, env.kom_id, inv_base, home_prc).unwrap();
        let inv_cap = table::lookup(&env.cpt, 15).unwrap();
        inv_cap.as_invocation().unwrap().set(0x4000, 0x9000, 0).unwrap();

        activate(&env.kernel, &cpu, thd, inv_cap.object, 0).unwrap();
        assert_eq!(
            table::delete(&env.kernel, &env.cpt, 15).unwrap_err(),
            KernelError::InUse
        );
        inv_return(&env.kernel, &cpu, thd, 0).unwrap();
        table::delete(&env.kernel, &env.cpt, 15).unwrap();
    }
}
