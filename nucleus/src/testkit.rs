/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Shared scaffolding for the unit tests: a leaked kernel-object arena
//! governed by a fresh bitmap, a boot-style root capability table, and
//! helpers that stand up the usual object menagerie.

use {
    crate::{
        caps::{
            table::{self, create_pure, CptRef},
            CapKind, CapSlot, Rights,
        },
        kot::ObjectTable,
        objects::{process, signal::SignalEndpoint, thread::Thread},
        pgt, Kernel, Word,
    },
    core::sync::atomic::{AtomicUsize, Ordering},
    machine::hosted::HostedPlatform,
    std::alloc::Layout,
};

const POOL_BYTES: usize = 256 * 1024;
const SLOT_ORDER: u32 = 6;
const ROOT_CPT_LEN: usize = 32;

/// Root-table slots mirroring the boot layout: self table at 0, the
/// kernel-function authority at 4, the kernel-memory authority at 5.
pub(crate) struct TestEnv {
    pub kernel: Kernel<'static>,
    pub cpt: CptRef,
    pub platform: &'static HostedPlatform,
    pub kom_id: Word,
    pub kfn_id: Word,
    cursor: AtomicUsize,
    pool_end: Word,
}

pub(crate) fn env() -> TestEnv {
    env_with_mirror(&[])
}

pub(crate) fn env_with_mirror(mirror: &[pgt::MirrorEntry]) -> TestEnv {
    let platform: &'static HostedPlatform = Box::leak(Box::new(HostedPlatform::new(0)));
    let vct_flags = Box::leak(Box::new(crate::irq::FlagPage::new()));
    let evt_flags = Box::leak(Box::new(crate::irq::FlagPage::new()));
    let mirror: &'static [pgt::MirrorEntry] = Box::leak(mirror.to_vec().into_boxed_slice());

    let layout = Layout::from_size_align(POOL_BYTES, 4096).unwrap();
    let pool = unsafe { std::alloc::alloc_zeroed(layout) } as Word;
    assert_ne!(pool, 0);

    let word_count = ObjectTable::words_for(POOL_BYTES, SLOT_ORDER);
    let words: &'static [AtomicUsize] = Box::leak(
        (0..word_count)
            .map(|_| AtomicUsize::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice(),
    );
    let kot = ObjectTable::new(words, pool, SLOT_ORDER);

    let kernel = Kernel {
        kot,
        platform,
        mirror,
        vct_flags,
        evt_flags,
    };

    let slots: &'static [CapSlot] = Box::leak(
        (0..ROOT_CPT_LEN)
            .map(|_| CapSlot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice(),
    );
    let cpt = unsafe { CptRef::from_raw(slots.as_ptr() as Word, ROOT_CPT_LEN) };

    create_pure(
        cpt.slot(0).unwrap(),
        CapKind::CapTable,
        cpt.base_addr(),
        Rights::native(CapKind::CapTable),
        [ROOT_CPT_LEN as Word, 0, 0],
    )
    .unwrap();
    create_pure(
        cpt.slot(4).unwrap(),
        CapKind::KernelFunction,
        0,
        Rights::native(CapKind::KernelFunction),
        [0; 3],
    )
    .unwrap();
    create_pure(
        cpt.slot(5).unwrap(),
        CapKind::KernelMemory,
        0,
        Rights::native(CapKind::KernelMemory),
        [pool, pool + POOL_BYTES, 0],
    )
    .unwrap();

    TestEnv {
        kernel,
        cpt,
        platform,
        kom_id: 5,
        kfn_id: 4,
        cursor: AtomicUsize::new(pool),
        pool_end: pool + POOL_BYTES,
    }
}

impl TestEnv {
    /// Hand out a fresh, grain-aligned object address from the arena.
    pub fn carve(&self, size: Word) -> Word {
        let grain = 1 << SLOT_ORDER;
        let size = (size + grain - 1) & !(grain - 1);
        let at = self.cursor.fetch_add(size, Ordering::SeqCst);
        assert!(at + size <= self.pool_end, "test arena exhausted");
        at
    }

    pub fn make_signal(&self, slot: Word, bound: Word) -> &'static SignalEndpoint {
        let base = self.carve(core::mem::size_of::<SignalEndpoint>());
        crate::objects::signal::create_signal(&self.kernel, &self.cpt, slot, self.kom_id, base, bound)
            .unwrap();
        unsafe { &*(base as *const SignalEndpoint) }
    }

    pub fn make_pgt_at(
        &self,
        slot: Word,
        vaddr: Word,
        size_order: u32,
        num_order: u32,
        top: bool,
    ) -> Word {
        let storage = self.carve(pgt::table_bytes(num_order, top));
        pgt::create_pgt(
            &self.kernel,
            &self.cpt,
            slot,
            self.kom_id,
            storage,
            vaddr,
            size_order,
            num_order,
            top,
        )
        .unwrap();
        slot
    }

    pub fn make_top_pgt_at(
        &self,
        slot: Word,
        vaddr: Word,
        size_order: u32,
        num_order: u32,
    ) -> &'static pgt::PageTable {
        let id = self.make_pgt_at(slot, vaddr, size_order, num_order, true);
        let cap = table::lookup(&self.cpt, id).unwrap();
        unsafe { &*(cap.object as *const pgt::PageTable) }
    }

    pub fn make_nontop_pgt(&self, slot: Word) -> Word {
        self.make_pgt_at(slot, 0x2000_0000, 12, 3, false)
    }

    /// Child capability table plus a top page table, returning their IDs.
    pub fn make_cpt_and_top_pgt(&self, cpt_slot: Word, pgt_slot: Word) -> (Word, Word) {
        let kom = table::lookup(&self.cpt, self.kom_id).unwrap();
        let len: Word = 4;
        let base = self.carve(len * core::mem::size_of::<CapSlot>());
        table::create_object(
            &self.kernel,
            self.cpt.slot(cpt_slot as usize).unwrap(),
            &kom,
            CapKind::CapTable,
            base,
            len as usize * core::mem::size_of::<CapSlot>(),
            Rights::native(CapKind::CapTable),
            [len, 0, 0],
            |_| Ok(()),
        )
        .unwrap();
        self.make_pgt_at(pgt_slot, 0x2000_0000, 12, 3, true);
        (cpt_slot, pgt_slot)
    }

    /// Process with a fresh table and top page table; returns its cap ID.
    pub fn make_process(&self, cpt_slot: Word, pgt_slot: Word, prc_slot: Word) -> Word {
        let (cpt_id, pgt_id) = self.make_cpt_and_top_pgt(cpt_slot, pgt_slot);
        let base = self.carve(core::mem::size_of::<process::Process>());
        process::create_process(
            &self.kernel,
            &self.cpt,
            prc_slot,
            self.kom_id,
            base,
            cpt_id,
            pgt_id,
        )
        .unwrap();
        prc_slot
    }

    /// Process whose capability table is the root table itself, so system
    /// calls issued by its threads resolve IDs against the test slots.
    pub fn make_root_process(&self, pgt_slot: Word, prc_slot: Word) -> Word {
        self.make_pgt_at(pgt_slot, 0x2000_0000, 12, 3, true);
        let base = self.carve(core::mem::size_of::<process::Process>());
        process::create_process(
            &self.kernel,
            &self.cpt,
            prc_slot,
            self.kom_id,
            base,
            0,
            pgt_slot,
        )
        .unwrap();
        prc_slot
    }

    /// Thread inside an existing process.
    pub fn make_thread_in(
        &self,
        thd_slot: Word,
        prc_id: Word,
        prio: Word,
        slice: Word,
    ) -> &'static Thread {
        let base = self.carve(core::mem::size_of::<Thread>());
        crate::objects::thread::create_thread(
            &self.kernel,
            &self.cpt,
            thd_slot,
            self.kom_id,
            base,
            prc_id,
            prio,
            slice,
            0,
        )
        .unwrap();
        let cap = table::lookup(&self.cpt, thd_slot).unwrap();
        unsafe { &*(cap.object as *const Thread) }
    }

    /// Fresh process and one thread in it.
    pub fn make_thread(
        &self,
        cpt_slot: Word,
        pgt_slot: Word,
        prc_slot: Word,
        thd_slot: Word,
        prio: Word,
        slice: Word,
    ) -> &'static Thread {
        let prc_id = self.make_process(cpt_slot, pgt_slot, prc_slot);
        self.make_thread_in(thd_slot, prc_id, prio, slice)
    }

    /// Two threads sharing one process, at the given priorities.
    pub fn make_two_threads(&self, prio_a: Word, prio_b: Word) -> (&'static Thread, &'static Thread) {
        let prc_id = self.make_process(20, 21, 22);
        let a = self.make_thread_in(23, prc_id, prio_a, 2);
        let b = self.make_thread_in(24, prc_id, prio_b, 2);
        (a, b)
    }
}
