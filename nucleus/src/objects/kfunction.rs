/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Kernel-function capability: the gate onto privileged platform primitives.
//!
//! Operations are identified by `(func_id, sub_id, p1, p2)` and dispatched
//! through a flat table; each returns zero or a positive value on success
//! and a negative kernel error otherwise. The capability's rights word
//! gates whole families. Anything the platform does not implement comes
//! back as `KernFailed`.

use {
    crate::{
        caps::{table::lookup, CapKind, CptRef, Rights, ValidRef},
        error::{KernelError, Result},
        irq,
        sched::CpuLocal,
        Kernel, Word,
    },
    core::sync::atomic::Ordering,
    machine::context::REG_COUNT,
};

/// Function identifiers, grouped by family in the high byte.
pub mod func {
    use crate::Word;

    // Local interrupt and event control.
    pub const INT_LOCAL_MOD: Word = 0x0000;
    pub const INT_LOCAL_TRIG: Word = 0x0001;
    pub const EVT_LOCAL_TRIG: Word = 0x0002;

    // Cache and prefetcher control.
    pub const CACHE_MOD: Word = 0x0100;
    pub const CACHE_MAINT: Word = 0x0101;
    pub const PRFTH_MOD: Word = 0x0102;

    // Feature and performance monitoring.
    pub const PERF_CPU_FUNC: Word = 0x0200;
    pub const PERF_MON_MOD: Word = 0x0201;
    pub const PERF_CYCLE_MOD: Word = 0x0202;

    // Debugging another thread's saved state.
    pub const DEBUG_PRINT: Word = 0x0300;
    pub const DEBUG_REG_MOD: Word = 0x0301;
    pub const DEBUG_INV_MOD: Word = 0x0302;
    pub const DEBUG_EXC_GET: Word = 0x0303;

    // System control.
    pub const IDLE_SLEEP: Word = 0x0400;
    pub const SYS_REBOOT: Word = 0x0401;
}

/// `DEBUG_REG_MOD` write-request bit in `p1`; the low bits select the
/// register: `0..REG_COUNT` the general file, then pc, then sp.
pub const DEBUG_REG_WRITE: Word = 1 << (crate::WORD_BITS - 1);

const DEBUG_REG_PC: Word = REG_COUNT as Word;
const DEBUG_REG_SP: Word = REG_COUNT as Word + 1;

fn family_right(func_id: Word) -> Rights {
    match func_id >> 8 {
        0x00 => Rights::KFN_INT,
        0x01 => Rights::KFN_CACHE,
        0x02 => Rights::KFN_PERF,
        0x03 => Rights::KFN_DEBUG,
        _ => Rights::KFN_SYS,
    }
}

/// Look up the target thread of a debug operation; it must be bound to the
/// calling CPU and paused so its saved state is actually at rest.
fn debug_target<'t>(
    cpu: &CpuLocal,
    cpt: &'t CptRef,
    sub_id: Word,
) -> Result<&'t crate::objects::thread::Thread> {
    let cap = lookup(cpt, sub_id)?;
    cap.require(CapKind::Thread, Rights::THD_DEBUG)?;
    let thd = cap.as_thread()?;
    if thd.bound_cpu() != cpu.cpu_id() as Word {
        return Err(KernelError::ThreadBindingError);
    }
    if !thd.is_paused() {
        return Err(KernelError::ThreadBindingError);
    }
    Ok(thd)
}

/// The flat kernel-function dispatcher.
pub fn kfn_call(
    kernel: &Kernel,
    cpu: &CpuLocal,
    cpt: &CptRef,
    kfn: &ValidRef,
    func_id: Word,
    sub_id: Word,
    p1: Word,
    p2: Word,
) -> Result<Word> {
    kfn.require(CapKind::KernelFunction, family_right(func_id))?;
    let platform = kernel.platform;

    match func_id {
        func::INT_LOCAL_MOD => Ok(platform.int_local_mod(sub_id, p1, p2)?),
        func::INT_LOCAL_TRIG => Ok(platform.int_local_trig(sub_id)?),
        func::EVT_LOCAL_TRIG => {
            irq::flag_slow(kernel.evt_flags, p1)?;
            let sig = cpu.vct_sig.load(Ordering::Relaxed);
            if sig == 0 {
                return Err(KernelError::KernFailed);
            }
            let sig = unsafe { &*(sig as *const crate::objects::signal::SignalEndpoint) };
            crate::objects::signal::kern_send(cpu, platform, sig, 1);
            Ok(0)
        }

        func::CACHE_MOD => Ok(platform.cache_mod(sub_id, p1)?),
        func::CACHE_MAINT => Ok(platform.cache_maint(sub_id, p1, p2)?),
        func::PRFTH_MOD => Ok(platform.prefetch_mod(sub_id, p1)?),

        func::PERF_CPU_FUNC => Ok(platform.cpu_feature(sub_id)?),
        func::PERF_MON_MOD => Ok(platform.perf_mon_mod(sub_id, p1, p2)?),
        func::PERF_CYCLE_MOD => Ok(platform.perf_cycle_mod(sub_id, p1)?),

        func::DEBUG_PRINT => {
            platform.debug_putchar(p1 as u8);
            Ok(0)
        }
        func::DEBUG_REG_MOD => {
            let thd = debug_target(cpu, cpt, sub_id)?;
            let index = p1 & !DEBUG_REG_WRITE;
            let write = p1 & DEBUG_REG_WRITE != 0;
            thd.with_ctx(|ctx| match index {
                DEBUG_REG_PC => {
                    if write {
                        ctx.pc = p2;
                        Ok(0)
                    } else {
                        Ok(ctx.pc)
                    }
                }
                DEBUG_REG_SP => {
                    if write {
                        ctx.sp = p2;
                        Ok(0)
                    } else {
                        Ok(ctx.sp)
                    }
                }
                r if (r as usize) < REG_COUNT => {
                    if write {
                        ctx.r[r as usize] = p2;
                        Ok(0)
                    } else {
                        Ok(ctx.r[r as usize])
                    }
                }
                _ => Err(KernelError::KernFailed),
            })
        }
        func::DEBUG_INV_MOD => {
            let cap = lookup(cpt, sub_id)?;
            cap.require(CapKind::Invocation, Rights::empty())?;
            let inv = cap.as_invocation()?;
            match p1 {
                0 => Ok(inv.entry()),
                1 => Ok(inv.stack()),
                2 => Ok(inv.cookie()),
                _ => Err(KernelError::KernFailed),
            }
        }
        func::DEBUG_EXC_GET => {
            let thd = debug_target(cpu, cpt, sub_id)?;
            let exc = thd.exc_record();
            match p1 {
                0 => Ok(exc.cause),
                1 => Ok(exc.addr),
                _ => Err(KernelError::KernFailed),
            }
        }

        func::IDLE_SLEEP => {
            platform.idle_wait();
            Ok(0)
        }
        func::SYS_REBOOT => platform.reboot(),

        _ => Err(KernelError::KernFailed),
    }
}
