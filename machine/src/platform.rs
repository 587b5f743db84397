/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! The contract between the kernel core and the machine.
//!
//! One implementation per target; the kernel holds a `&dyn Platform` and
//! never touches hardware behind its back. The trait is deliberately flat:
//! each method corresponds to one privileged primitive the core needs, and
//! the kernel-function dispatcher maps almost one-to-one onto the tail of
//! this list.

use {
    crate::{
        mpu::{RawRegion, REGION_NUM},
        Word,
    },
    snafu::Snafu,
};

/// Refusals from the architecture layer.
#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum HalError {
    /// The platform does not implement the requested primitive.
    Unsupported,
    /// The platform cannot represent the request (bad geometry, bad id).
    Rejected,
}

/// Boot-time capability slot assignment, published to user space.
///
/// The slot indices are part of the platform descriptor and differ between
/// architecture variants; the kernel reads them from here and never assumes
/// an order.
#[derive(Clone, Copy, Debug)]
pub struct BootLayout {
    /// Initial capability table, typically holding all of the below.
    pub init_cpt: usize,
    /// Initial top-level page table (or per-CPU array head).
    pub init_pgt: usize,
    /// Initial process.
    pub init_prc: usize,
    /// Initial thread (per-CPU).
    pub init_thd: usize,
    /// Kernel-function capability.
    pub init_kfn: usize,
    /// Kernel-memory capability (per NUMA node on multi-node machines).
    pub init_kom: usize,
    /// Timer-tick signal endpoint (per-CPU).
    pub sig_tick: usize,
    /// Default interrupt-vector signal endpoint (per-CPU).
    pub sig_vct: usize,
}

impl BootLayout {
    /// The layout used by single-node, single-cluster targets.
    pub const DEFAULT: BootLayout = BootLayout {
        init_cpt: 0,
        init_pgt: 1,
        init_prc: 2,
        init_thd: 3,
        init_kfn: 4,
        init_kom: 5,
        sig_tick: 6,
        sig_vct: 7,
    };
}

/// Privileged machine primitives used by the kernel core.
///
/// Methods that back the kernel-function dispatcher return the operation
/// result word or a [`HalError`]; the core translates refusals into its own
/// error taxonomy.
pub trait Platform {
    /// Identity of the CPU executing the caller.
    fn cpu_id(&self) -> usize;

    /// Mask interrupts on this CPU. Returns the prior mask state.
    fn irq_mask(&self) -> bool;

    /// Restore the interrupt mask state returned by [`Platform::irq_mask`].
    fn irq_restore(&self, prior: bool);

    /// Full memory barrier (DMB/DSB class on machines that need one).
    fn barrier(&self);

    /// Free-running timestamp in timer ticks.
    fn timestamp(&self) -> u64;

    /// Kick another CPU so it re-evaluates its ready queues.
    fn send_reschedule_ipi(&self, cpu: usize);

    /// Load the protection hardware with a top-level table's region set.
    fn mpu_program(&self, regions: &[RawRegion; REGION_NUM]);

    /// Halt until the next interrupt.
    fn idle_wait(&self);

    /// Hard reset. Kernel integrity is gone; there is no return.
    fn reboot(&self) -> !;

    /// Emit one character on the debug channel.
    fn debug_putchar(&self, ch: u8);

    /// Enable/disable or reprioritise a local interrupt vector.
    fn int_local_mod(&self, vect: Word, op: Word, param: Word) -> Result<Word, HalError>;

    /// Software-trigger a local interrupt vector.
    fn int_local_trig(&self, vect: Word) -> Result<Word, HalError>;

    /// Turn a cache on or off.
    fn cache_mod(&self, id: Word, op: Word) -> Result<Word, HalError>;

    /// Cache maintenance (clean/invalidate, whole or by address).
    fn cache_maint(&self, id: Word, op: Word, addr: Word) -> Result<Word, HalError>;

    /// Prefetcher control.
    fn prefetch_mod(&self, id: Word, op: Word) -> Result<Word, HalError>;

    /// Read a processor feature register.
    fn cpu_feature(&self, id: Word) -> Result<Word, HalError>;

    /// Performance monitor query/configure.
    fn perf_mon_mod(&self, id: Word, op: Word, param: Word) -> Result<Word, HalError>;

    /// Cycle counter read/write.
    fn perf_cycle_mod(&self, op: Word, value: Word) -> Result<Word, HalError>;
}

/// Run `f` with interrupts masked on the calling CPU.
///
/// The mirror of page-table updates into the protection hardware and the
/// scheduler queue surgery both sit inside this.
pub fn with_irqs_masked<R>(platform: &dyn Platform, f: impl FnOnce() -> R) -> R {
    let prior = platform.irq_mask();
    let result = f();
    platform.irq_restore(prior);
    result
}
