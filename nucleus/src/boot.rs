/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Boot-time capability layout.
//!
//! Publishes the initial authority set into fixed slots of the first
//! capability table: the table's own capability, the initial top page
//! table, process and thread, the kernel-function and kernel-memory
//! authorities, and the per-CPU tick and vector endpoints. The slot
//! indices come verbatim from the platform's [`BootLayout`] descriptor;
//! they differ between architecture variants and are never inferred.
//!
//! Object placement at boot is a plain bump over the object window; after
//! boot, placement policy belongs entirely to user mode.

use {
    crate::{
        caps::{
            table::{self, create_pure, CptRef},
            CapKind, CapSlot, Rights,
        },
        error::Result,
        objects::{process, signal, thread},
        pgt,
        sched::CpuLocal,
        Kernel, Word,
    },
    core::sync::atomic::Ordering,
    machine::platform::BootLayout,
};

/// Everything bootstrap needs to know about the machine's memory plan.
#[derive(Clone, Copy, Debug)]
pub struct BootConfig<'a> {
    /// Slot assignment for the initial table.
    pub layout: &'a BootLayout,
    /// Slots in the initial capability table.
    pub cpt_len: usize,
    /// Kernel-object window handed to the initial Kom, `[base, end)`.
    /// Must coincide with the window the kernel's object bitmap governs.
    pub pool_base: Word,
    pub pool_end: Word,
    /// Geometry of the initial top-level page table.
    pub vaddr_base: Word,
    pub size_order: u32,
    pub num_order: u32,
    /// Scheduling parameters of the boot thread.
    pub init_prio: Word,
    pub init_slice: Word,
    /// Saturation bounds of the tick and vector endpoints.
    pub tick_bound: Word,
    pub vct_bound: Word,
}

/// Addresses of the boot objects, for the platform stub to finish with.
#[derive(Clone, Copy, Debug)]
pub struct BootCaps {
    pub cpt: CptRef,
    pub prc: Word,
    pub thd: Word,
    pub top_pgt: Word,
}

struct Bump(Word);

impl Bump {
    fn take(&mut self, size: Word, grain: Word) -> Word {
        let at = self.0;
        self.0 = (at + size + grain - 1) & !(grain - 1);
        at
    }
}

/// Stand the initial protection domain up on the boot CPU.
pub fn bootstrap(kernel: &Kernel, cpu: &CpuLocal, cfg: &BootConfig) -> Result<BootCaps> {
    let layout = cfg.layout;
    let grain = kernel.kot.grain();
    let mut bump = Bump(cfg.pool_base);

    // The first table carries every boot capability, itself included; it
    // is carved by hand because no Kom capability exists yet.
    let cpt_bytes = cfg.cpt_len * core::mem::size_of::<CapSlot>();
    let cpt_base = bump.take(cpt_bytes as Word, grain);
    kernel.kot.mark(cpt_base, cpt_bytes as Word)?;
    unsafe { core::ptr::write_bytes(cpt_base as *mut u8, 0, cpt_bytes) };
    let cpt = unsafe { CptRef::from_raw(cpt_base, cfg.cpt_len) };

    create_pure(
        cpt.slot(layout.init_cpt)?,
        CapKind::CapTable,
        cpt_base,
        Rights::native(CapKind::CapTable),
        [cfg.cpt_len as Word, 0, 0],
    )?;
    create_pure(
        cpt.slot(layout.init_kom)?,
        CapKind::KernelMemory,
        0,
        Rights::native(CapKind::KernelMemory),
        [cfg.pool_base, cfg.pool_end, 0],
    )?;
    create_pure(
        cpt.slot(layout.init_kfn)?,
        CapKind::KernelFunction,
        0,
        Rights::native(CapKind::KernelFunction),
        [0; 3],
    )?;

    let kom_id = layout.init_kom as Word;

    // Initial address space.
    let pgt_storage = bump.take(pgt::table_bytes(cfg.num_order, true), grain);
    pgt::create_pgt(
        kernel,
        &cpt,
        layout.init_pgt as Word,
        kom_id,
        pgt_storage,
        cfg.vaddr_base,
        cfg.size_order,
        cfg.num_order,
        true,
    )?;

    // Initial protection domain and its thread.
    let prc_base = bump.take(core::mem::size_of::<process::Process>() as Word, grain);
    let prc_va = process::create_process(
        kernel,
        &cpt,
        layout.init_prc as Word,
        kom_id,
        prc_base,
        layout.init_cpt as Word,
        layout.init_pgt as Word,
    )?;

    let thd_base = bump.take(core::mem::size_of::<thread::Thread>() as Word, grain);
    let thd_va = thread::create_thread(
        kernel,
        &cpt,
        layout.init_thd as Word,
        kom_id,
        thd_base,
        layout.init_prc as Word,
        cfg.init_prio,
        cfg.init_slice,
        0,
    )?;

    // Per-CPU endpoints.
    let tick_base = bump.take(
        core::mem::size_of::<signal::SignalEndpoint>() as Word,
        grain,
    );
    signal::create_signal(
        kernel,
        &cpt,
        layout.sig_tick as Word,
        kom_id,
        tick_base,
        cfg.tick_bound,
    )?;
    let vct_base = bump.take(
        core::mem::size_of::<signal::SignalEndpoint>() as Word,
        grain,
    );
    signal::create_signal(
        kernel,
        &cpt,
        layout.sig_vct as Word,
        kom_id,
        vct_base,
        cfg.vct_bound,
    )?;
    cpu.tick_sig.store(tick_base, Ordering::Relaxed);
    cpu.vct_sig.store(vct_base, Ordering::Relaxed);

    // The boot thread takes the CPU and its domain goes live.
    let thd = unsafe { &*(thd_va as *const thread::Thread) };
    thd.bind(cpu.cpu_id() as Word)?;
    cpu.ready(thd)?;
    let running = cpu.schedule().expect("boot thread must be runnable");
    assert_eq!(running.addr(), thd_va);

    let top_cap = table::lookup(&cpt, layout.init_pgt as Word)?;
    pgt::load(kernel, cpu, top_cap.object);

    Ok(BootCaps {
        cpt,
        prc: prc_va,
        thd: thd_va,
        top_pgt: top_cap.object,
    })
}
