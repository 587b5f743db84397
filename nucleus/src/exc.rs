/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! The tagged kernel-entry dispatcher.
//!
//! Every way into the kernel (system call, timer tick, fault, device
//! interrupt) funnels through one entry taking a class tag; the platform
//! stub saves the user context into the running thread before calling and
//! restores (possibly another thread's) context after. Faults the hardware
//! attributes cleanly kill the thread and poke its fault endpoint; faults
//! it cannot attribute are dropped, since acting on them would let a
//! malicious thread frame an innocent one.

use {
    crate::{
        irq,
        objects::{process::Process, signal::SignalEndpoint, thread::Thread},
        pgt,
        sched::CpuLocal,
        syscall, Kernel, Word,
    },
    machine::platform::with_irqs_masked,
};

/// Fault cause codes recorded in the thread's exception record.
pub mod cause {
    use crate::Word;

    pub const MEM_MANAGE: Word = 1;
    pub const UNDEF_INSTR: Word = 2;
    pub const DIV_ZERO: Word = 3;
    pub const PERMISSION: Word = 4;
    pub const STACK_UNFETCH: Word = 5;
}

/// Classified kernel entries.
#[derive(Debug, Clone, Copy)]
pub enum ExcClass {
    /// System call from user mode.
    Syscall,
    /// Timer tick.
    Tick,
    /// Memory-management fault with a cleanly attributed address.
    MemManage { addr: Word },
    /// Any other attributable synchronous fault.
    Fault { cause: Word, addr: Word },
    /// Imprecise bus class: cannot be attributed to the running thread.
    Imprecise,
    /// Device interrupt vector.
    Vector(Word),
}

fn kill(kernel: &Kernel, cpu: &CpuLocal, thd: &Thread, fault_cause: Word, addr: Word) {
    cpu.stop(thd);
    if let Some(sig_va) = thd.mark_fatal(fault_cause, addr) {
        let sig = unsafe { &*(sig_va as *const SignalEndpoint) };
        crate::objects::signal::kern_send(cpu, kernel.platform, sig, 1);
    }
}

/// Handle one kernel entry on behalf of the running thread.
pub fn dispatch(kernel: &Kernel, cpu: &CpuLocal, class: ExcClass) -> isize {
    match class {
        ExcClass::Syscall => match cpu.running() {
            Some(thd) => syscall::dispatch(kernel, cpu, thd),
            None => 0,
        },
        ExcClass::Tick => {
            irq::tim_handler(kernel, cpu);
            0
        }
        ExcClass::MemManage { addr } => {
            let Some(thd) = cpu.running() else { return 0 };
            let prc = unsafe { &*(thd.process() as *const Process) };
            let top = prc.top_pgt();
            let refilled = with_irqs_masked(kernel.platform, || {
                pgt::handle_fault(kernel, cpu, top, addr)
            });
            if !refilled {
                kill(kernel, cpu, thd, cause::MEM_MANAGE, addr);
            }
            0
        }
        ExcClass::Fault { cause, addr } => {
            if let Some(thd) = cpu.running() {
                kill(kernel, cpu, thd, cause, addr);
            }
            0
        }
        // Unattributable: consume silently.
        ExcClass::Imprecise => 0,
        ExcClass::Vector(vector) => {
            let _ = irq::vct_handler(kernel, cpu, vector);
            0
        }
    }
}
