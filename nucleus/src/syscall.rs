/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! The system-call surface.
//!
//! One entry point; parameters arrive in fixed registers. The first word
//! packs the service number in its upper half and a capability ID in its
//! lower half; three parameter words follow; the result lands in the return
//! register as a non-negative value or a negative kernel error code.
//!
//! Service number families:
//!
//! | range       | family                                       |
//! |-------------|----------------------------------------------|
//! | 0x00..=0x1F | capability-table ops (create/copy/remove/delete) |
//! | 0x20..=0x2F | process/thread                               |
//! | 0x30..=0x3F | signal and invocation                        |
//! | 0x40..=0x5F | page table                                   |
//! | 0x60        | kernel-function dispatcher                   |
//!
//! Creation calls name the kernel-memory authority in the capability-ID
//! field and carry the destination slot locator packed into a parameter's
//! upper half (a locator is itself a one- or two-level capability ID).

use {
    crate::{
        caps::{
            capid::{FIELD_BITS, FIELD_MASK},
            table, CapKind, Rights,
        },
        error::{KernelError, Result},
        objects::{invocation, kfunction, process, signal, thread, thread::Thread},
        pgt,
        sched::CpuLocal,
        Kernel, Word,
    },
    machine::mpu::MapFlags,
};

/// Service numbers.
pub mod svc {
    use crate::Word;

    // Capability table family.
    pub const CPT_CRT: Word = 0x00;
    pub const CAP_CPY: Word = 0x01;
    pub const CAP_REM: Word = 0x02;
    pub const CAP_DEL: Word = 0x03;

    // Process/thread family.
    pub const PRC_CRT: Word = 0x20;
    pub const THD_CRT: Word = 0x21;
    pub const THD_BIND: Word = 0x22;
    pub const THD_PRIO: Word = 0x23;
    pub const THD_RUN: Word = 0x24;
    pub const THD_STOP: Word = 0x25;
    pub const THD_FAULT_SIG: Word = 0x26;

    // Signal and invocation family.
    pub const SIG_CRT: Word = 0x30;
    pub const SIG_SND: Word = 0x31;
    pub const SIG_RCV: Word = 0x32;
    pub const INV_CRT: Word = 0x33;
    pub const INV_SET: Word = 0x34;
    pub const INV_ACT: Word = 0x35;
    pub const INV_RET: Word = 0x36;

    // Page-table family.
    pub const PGT_CRT: Word = 0x40;
    pub const PGT_MAP_PAGE: Word = 0x41;
    pub const PGT_UNMAP_PAGE: Word = 0x42;
    pub const PGT_MAP_DIR: Word = 0x43;
    pub const PGT_UNMAP_DIR: Word = 0x44;
    pub const PGT_LOOKUP: Word = 0x45;
    pub const PGT_WALK: Word = 0x46;

    // Kernel function.
    pub const KFN_CALL: Word = 0x60;
}

/// Build the packed first syscall word.
pub fn pack_svc(svc: Word, capid: Word) -> Word {
    svc << FIELD_BITS | capid & FIELD_MASK
}

/// Pack a destination locator into a parameter's upper half.
pub fn pack_dst(dst: Word, low: Word) -> Word {
    dst << FIELD_BITS | low & FIELD_MASK
}

// PGT_CRT geometry parameter: size order, number order, top flag.
const GEOM_SIZE_MASK: Word = 0x3F;
const GEOM_NUM_SHIFT: u32 = 6;
const GEOM_NUM_MASK: Word = 0x3F;
const GEOM_TOP_BIT: Word = 1 << 12;

/// Pack the PGT_CRT geometry half-word.
pub fn pack_geometry(size_order: u32, num_order: u32, top: bool) -> Word {
    size_order as Word & GEOM_SIZE_MASK
        | (num_order as Word & GEOM_NUM_MASK) << GEOM_NUM_SHIFT
        | if top { GEOM_TOP_BIT } else { 0 }
}

// THD_CRT scheduling parameter: priority, coprocessor attribute, timeslice.
const SCHED_PRIO_MASK: Word = 0x3F;
const SCHED_COPROC_BIT: Word = 1 << 6;
const SCHED_SLICE_SHIFT: u32 = 8;

/// Pack the THD_CRT scheduling parameter.
pub fn pack_sched(prio: Word, slice: Word, coproc: bool) -> Word {
    prio & SCHED_PRIO_MASK
        | if coproc { SCHED_COPROC_BIT } else { 0 }
        | slice << SCHED_SLICE_SHIFT
}

fn current_process(thd: &Thread) -> &process::Process {
    unsafe { &*(thd.process() as *const process::Process) }
}

/// How a handled call disposes of the return register.
enum Outcome {
    /// Plain result: written into the return register.
    Value(Word),
    /// The thread parked in a blocking receive; the winning wake source
    /// owns the return register.
    Parked,
    /// The handler already arranged the context (invocation entry/return).
    Arranged,
}

/// Decode and execute the system call held in `thd`'s saved context.
///
/// Returns the value the exception path hands back for inspection; the
/// saved context has been updated as the call demands.
pub fn dispatch(kernel: &Kernel, cpu: &CpuLocal, thd: &Thread) -> isize {
    let (word0, params) = thd.with_ctx(|ctx| ctx.syscall_words());
    let svc_num = word0 >> FIELD_BITS;
    let capid = word0 & FIELD_MASK;

    match handle(kernel, cpu, thd, svc_num, capid, params) {
        Ok(Outcome::Value(value)) => {
            thd.with_ctx(|ctx| ctx.set_retval(value));
            value as isize
        }
        Ok(Outcome::Parked) => {
            cpu.block_current();
            0
        }
        Ok(Outcome::Arranged) => 0,
        Err(err) => {
            let code = err.code();
            thd.with_ctx(|ctx| ctx.set_retval(code as Word));
            code
        }
    }
}

fn handle(
    kernel: &Kernel,
    cpu: &CpuLocal,
    thd: &Thread,
    svc_num: Word,
    capid: Word,
    params: [Word; 3],
) -> Result<Outcome> {
    let cpt = current_process(thd).cpt();
    let [p0, p1, p2] = params;

    match svc_num {
        svc::CPT_CRT => {
            let kom = table::lookup(&cpt, capid)?;
            let dst = table::resolve_slot(&cpt, p1)?;
            let len = p2;
            if len == 0 || len > 1 << crate::caps::capid::TWO_LEVEL_BIT {
                return Err(KernelError::BadOrder);
            }
            table::create_object(
                kernel,
                dst,
                &kom,
                CapKind::CapTable,
                p0,
                len * core::mem::size_of::<crate::caps::CapSlot>(),
                Rights::native(CapKind::CapTable),
                [len, 0, 0],
                |_| Ok(()),
            )?;
            Ok(Outcome::Value(0))
        }
        svc::CAP_CPY => {
            let mask = Rights::from_bits_truncate(p1);
            table::copy(&cpt, capid, &cpt, p0, mask)?;
            Ok(Outcome::Value(0))
        }
        svc::CAP_REM => {
            table::remove(&cpt, capid)?;
            Ok(Outcome::Value(0))
        }
        svc::CAP_DEL => {
            table::delete(kernel, &cpt, capid)?;
            Ok(Outcome::Value(0))
        }

        svc::PRC_CRT => {
            process::create_process(
                kernel,
                &cpt,
                p1 >> FIELD_BITS,
                capid,
                p0,
                p1 & FIELD_MASK,
                p2,
            )?;
            Ok(Outcome::Value(0))
        }
        svc::THD_CRT => {
            thread::create_thread(
                kernel,
                &cpt,
                p1 >> FIELD_BITS,
                capid,
                p0,
                p1 & FIELD_MASK,
                p2 & SCHED_PRIO_MASK,
                p2 >> SCHED_SLICE_SHIFT,
                if p2 & SCHED_COPROC_BIT != 0 {
                    thread::ATTR_COPROC
                } else {
                    0
                },
            )?;
            Ok(Outcome::Value(0))
        }
        svc::THD_BIND => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::Thread, Rights::THD_BIND)?;
            cap.as_thread()?.bind(p0)?;
            Ok(Outcome::Value(0))
        }
        svc::THD_PRIO => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::Thread, Rights::THD_PRIO)?;
            cpu.set_priority(cap.as_thread()?, p0)?;
            Ok(Outcome::Value(0))
        }
        svc::THD_RUN => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::Thread, Rights::THD_RUN)?;
            let target = cap.as_thread()?;
            if !target.is_bound() {
                return Err(KernelError::Unbound);
            }
            if target.bound_cpu() == cpu.cpu_id() as Word {
                cpu.ready(target)?;
            } else {
                target.set_run_state(thread::STATE_READY);
                kernel.platform.send_reschedule_ipi(target.bound_cpu() as usize);
            }
            Ok(Outcome::Value(0))
        }
        svc::THD_STOP => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::Thread, Rights::THD_STOP)?;
            let target = cap.as_thread()?;
            if target.bound_cpu() != cpu.cpu_id() as Word {
                return Err(KernelError::ThreadBindingError);
            }
            cpu.stop(target);
            Ok(Outcome::Value(0))
        }
        svc::THD_FAULT_SIG => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::Thread, Rights::THD_FAULT_SIG)?;
            let sig = table::lookup(&cpt, p0)?;
            cap.as_thread()?.bind_fault_sig(&sig)?;
            Ok(Outcome::Value(0))
        }

        svc::SIG_CRT => {
            signal::create_signal(kernel, &cpt, p1, capid, p0, p2)?;
            Ok(Outcome::Value(0))
        }
        svc::SIG_SND => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::Signal, Rights::SIG_SEND)?;
            let value = signal::send(cpu, kernel.platform, cap.as_signal()?)?;
            Ok(Outcome::Value(value))
        }
        svc::SIG_RCV => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::Signal, Rights::SIG_RECEIVE)?;
            match signal::receive(cap.as_signal()?, thd, p0 != 0)? {
                signal::Received::Taken(left) => Ok(Outcome::Value(left)),
                signal::Received::Parked => Ok(Outcome::Parked),
            }
        }
        svc::INV_CRT => {
            invocation::create_invocation(
                kernel,
                &cpt,
                p1 >> FIELD_BITS,
                capid,
                p0,
                p1 & FIELD_MASK,
            )?;
            Ok(Outcome::Value(0))
        }
        svc::INV_SET => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::Invocation, Rights::INV_SET)?;
            cap.as_invocation()?.set(p0, p1, p2)?;
            Ok(Outcome::Value(0))
        }
        svc::INV_ACT => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::Invocation, Rights::INV_ACTIVATE)?;
            invocation::activate(kernel, cpu, thd, cap.object, p0)?;
            // The return register now belongs to the activation cookie.
            Ok(Outcome::Arranged)
        }
        svc::INV_RET => {
            invocation::inv_return(kernel, cpu, thd, p0)?;
            // The return register carries the callee's value.
            Ok(Outcome::Arranged)
        }

        svc::PGT_CRT => {
            let geometry = p2 & FIELD_MASK;
            pgt::create_pgt(
                kernel,
                &cpt,
                p2 >> FIELD_BITS,
                capid,
                p0,
                p1,
                (geometry & GEOM_SIZE_MASK) as u32,
                (geometry >> GEOM_NUM_SHIFT & GEOM_NUM_MASK) as u32,
                geometry & GEOM_TOP_BIT != 0,
            )?;
            Ok(Outcome::Value(0))
        }
        svc::PGT_MAP_PAGE => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::PageTable, Rights::PGT_MAP)?;
            pgt::map_page(
                kernel,
                cpu,
                cap.as_page_table()?,
                p0 as usize,
                p1,
                MapFlags::from_bits_truncate(p2),
            )?;
            Ok(Outcome::Value(0))
        }
        svc::PGT_UNMAP_PAGE => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::PageTable, Rights::PGT_UNMAP)?;
            pgt::unmap_page(kernel, cpu, cap.as_page_table()?, p0 as usize)?;
            Ok(Outcome::Value(0))
        }
        svc::PGT_MAP_DIR => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::PageTable, Rights::PGT_MAP)?;
            let child = table::lookup(&cpt, p1)?;
            pgt::map_dir(cap.as_page_table()?, p0 as usize, &child)?;
            Ok(Outcome::Value(0))
        }
        svc::PGT_UNMAP_DIR => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::PageTable, Rights::PGT_UNMAP)?;
            let child = table::lookup(&cpt, p1)?;
            pgt::unmap_dir(cap.as_page_table()?, p0 as usize, &child)?;
            Ok(Outcome::Value(0))
        }
        svc::PGT_LOOKUP => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::PageTable, Rights::PGT_LOOKUP)?;
            let (paddr, flags) = pgt::lookup_page(cap.as_page_table()?, p0 as usize)?;
            thd.with_ctx(|ctx| {
                ctx.r[1] = paddr;
                ctx.r[2] = flags.bits();
            });
            Ok(Outcome::Value(0))
        }
        svc::PGT_WALK => {
            let cap = table::lookup(&cpt, capid)?;
            cap.require(CapKind::PageTable, Rights::PGT_LOOKUP)?;
            let top = cap.as_page_table()?;
            if !top.is_top() {
                return Err(KernelError::CapabilityInvalid);
            }
            let hit = pgt::walk(top, p0)?;
            thd.with_ctx(|ctx| {
                ctx.r[1] = hit.map_vaddr;
                ctx.r[2] = hit.paddr;
                ctx.r[3] = hit.size_order as Word | (hit.num_order as Word) << 8;
                ctx.r[4] = hit.flags.bits();
            });
            Ok(Outcome::Value(0))
        }

        svc::KFN_CALL => {
            let kfn = table::lookup(&cpt, capid)?;
            let value = kfunction::kfn_call(
                kernel,
                cpu,
                &cpt,
                &kfn,
                p0 >> FIELD_BITS,
                p0 & FIELD_MASK,
                p1,
                p2,
            )?;
            Ok(Outcome::Value(value))
        }

        _ => Err(KernelError::BadSyscall),
    }
}
