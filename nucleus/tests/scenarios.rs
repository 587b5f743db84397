/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! End-to-end scenarios against the hosted machine: boot the kernel, then
//! drive it through the system-call surface the way user mode would.

use {
    core::sync::atomic::{AtomicUsize, Ordering},
    machine::{hosted::HostedPlatform, mpu::MapFlags, platform::BootLayout},
    nucleus::{
        boot::{self, BootCaps, BootConfig},
        caps::{table, Rights},
        error::KernelError,
        irq,
        kot::ObjectTable,
        objects::{process::Process, signal::SignalEndpoint, thread::Thread},
        pgt,
        sched::CpuLocal,
        syscall::{self, svc},
        Kernel, Word,
    },
    std::alloc::Layout,
};

const POOL_BYTES: usize = 256 * 1024;

struct Env {
    kernel: Kernel<'static>,
    cpu: CpuLocal,
    caps: BootCaps,
    platform: &'static HostedPlatform,
    cursor: AtomicUsize,
}

fn boot_env() -> Env {
    let platform: &'static HostedPlatform = Box::leak(Box::new(HostedPlatform::new(0)));
    let vct_flags = Box::leak(Box::new(irq::FlagPage::new()));
    let evt_flags = Box::leak(Box::new(irq::FlagPage::new()));

    let layout = Layout::from_size_align(POOL_BYTES, 4096).unwrap();
    let pool = unsafe { std::alloc::alloc_zeroed(layout) } as Word;
    let words: &'static [core::sync::atomic::AtomicUsize] = Box::leak(
        (0..ObjectTable::words_for(POOL_BYTES, 6))
            .map(|_| core::sync::atomic::AtomicUsize::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice(),
    );

    let kernel = Kernel {
        kot: ObjectTable::new(words, pool, 6),
        platform,
        mirror: &[],
        vct_flags,
        evt_flags,
    };
    let cpu = CpuLocal::new(0);
    let cfg = BootConfig {
        layout: &BootLayout::DEFAULT,
        cpt_len: 32,
        pool_base: pool,
        pool_end: pool + POOL_BYTES as Word,
        vaddr_base: 0x2000_0000,
        size_order: 12,
        num_order: 4,
        init_prio: 5,
        init_slice: 8,
        tick_bound: 8,
        vct_bound: 8,
    };
    let caps = boot::bootstrap(&kernel, &cpu, &cfg).unwrap();

    Env {
        kernel,
        cpu,
        caps,
        platform,
        // Test carving stays clear of the boot objects at the window base.
        cursor: AtomicUsize::new(pool + POOL_BYTES as Word / 2),
    }
}

impl Env {
    fn carve(&self, size: Word) -> Word {
        let size = (size + 63) & !63;
        self.cursor.fetch_add(size, Ordering::SeqCst)
    }

    fn boot_thread(&self) -> &'static Thread {
        unsafe { &*(self.caps.thd as *const Thread) }
    }

    fn call(&self, thd: &Thread, service: Word, capid: Word, params: [Word; 3]) -> isize {
        thd.with_ctx(|ctx| {
            ctx.r[0] = syscall::pack_svc(service, capid);
            ctx.r[1] = params[0];
            ctx.r[2] = params[1];
            ctx.r[3] = params[2];
        });
        syscall::dispatch(&self.kernel, &self.cpu, thd)
    }

    /// The context-switch tail the exception stub performs: load the next
    /// thread's protection domain.
    fn switch_domain(&self, thd: &Thread) {
        let prc = unsafe { &*(thd.process() as *const Process) };
        pgt::load(&self.kernel, &self.cpu, prc.top_pgt_addr());
    }
}

/// Scenario: thread A copies a capability while thread B deletes its root.
/// Exactly one side wins and no orphan capability survives.
#[test]
fn copy_then_delete_race() {
    for round in 0..48 {
        let env = boot_env();
        let base = env.carve(64);
        nucleus::objects::signal::create_signal(
            &env.kernel,
            &env.caps.cpt,
            10,
            BootLayout::DEFAULT.init_kom as Word,
            base,
            4,
        )
        .unwrap();

        let copied = AtomicUsize::new(0);
        let deleted = AtomicUsize::new(0);
        std::thread::scope(|s| {
            s.spawn(|| {
                if table::copy(&env.caps.cpt, 10, &env.caps.cpt, 11, Rights::SIG_SEND).is_ok() {
                    copied.store(1, Ordering::SeqCst);
                }
            });
            s.spawn(|| {
                if table::delete(&env.kernel, &env.caps.cpt, 10).is_ok() {
                    deleted.store(1, Ordering::SeqCst);
                }
            });
        });

        let copied = copied.load(Ordering::SeqCst) == 1;
        let deleted = deleted.load(Ordering::SeqCst) == 1;
        assert!(copied ^ deleted, "round {round}: exactly one side must win");

        if deleted {
            // Destroyed with no orphan copies.
            assert!(env.kernel.kot.probe(base, 64));
            assert!(table::lookup(&env.caps.cpt, 11).is_err());
        } else {
            // Survived with the derived reference counted.
            let root = table::lookup(&env.caps.cpt, 10).unwrap();
            assert_eq!(
                table::delete(&env.kernel, &env.caps.cpt, 10).unwrap_err(),
                KernelError::InUse
            );
            drop(root);
            table::remove(&env.caps.cpt, 11).unwrap();
            table::delete(&env.kernel, &env.caps.cpt, 10).unwrap();
        }
    }
}

/// Scenario: six static and four dynamic leaves share an 8-slot region
/// file. Touching all ten succeeds through fault refills and never evicts
/// a static leaf.
#[test]
fn static_then_dynamic_mpu_eviction() {
    let env = boot_env();
    let thd = env.boot_thread();
    let top_id = BootLayout::DEFAULT.init_pgt as Word;

    let static_flags = MapFlags::READ | MapFlags::WRITE | MapFlags::STATIC;
    for pos in 0..6usize {
        assert_eq!(
            env.call(
                thd,
                svc::PGT_MAP_PAGE,
                top_id,
                [
                    pos as Word,
                    0x8000_0000 + (pos as Word) * 0x1000,
                    static_flags.bits()
                ]
            ),
            0,
            "static leaf {pos}"
        );
    }
    for pos in 6..10usize {
        assert_eq!(
            env.call(
                thd,
                svc::PGT_MAP_PAGE,
                top_id,
                [
                    pos as Word,
                    0x8000_0000 + (pos as Word) * 0x1000,
                    (MapFlags::READ | MapFlags::WRITE).bits()
                ]
            ),
            0,
            "dynamic leaf {pos}"
        );
    }

    let top = unsafe { &*(env.caps.top_pgt as *const pgt::PageTable) };

    // Walk all ten leaves, twice, refilling on miss.
    for _ in 0..2 {
        for pos in 0..10usize {
            let vaddr = 0x2000_0000 + (pos as Word) * 0x1000 + 4;
            if !env.platform.access_ok(vaddr, false, false) {
                assert!(
                    pgt::handle_fault(&env.kernel, &env.cpu, top, vaddr),
                    "leaf {pos} not refillable"
                );
                assert!(env.platform.access_ok(vaddr, false, false));
            }
        }
    }

    // Every static leaf is still resident in the hardware file.
    for pos in 0..6usize {
        let vaddr = 0x2000_0000 + (pos as Word) * 0x1000;
        assert!(
            env.platform.access_ok(vaddr, true, false),
            "static leaf {pos} was evicted"
        );
    }
}

/// Scenario: MAX=3 endpoint; a parked receiver wakes on the first send,
/// the counter saturates at 3, the fourth send is refused.
#[test]
fn signal_saturation() {
    let env = boot_env();
    let receiver = env.boot_thread();
    let kom = BootLayout::DEFAULT.init_kom as Word;

    let sig_base = env.carve(64);
    assert_eq!(env.call(receiver, svc::SIG_CRT, kom, [sig_base, 10, 3]), 0);

    // A second thread in the boot process does the sending.
    let thd_base = env.carve(core::mem::size_of::<Thread>() as Word);
    assert_eq!(
        env.call(
            receiver,
            svc::THD_CRT,
            kom,
            [
                thd_base,
                syscall::pack_dst(11, BootLayout::DEFAULT.init_prc as Word),
                syscall::pack_sched(4, 8, false)
            ]
        ),
        0
    );
    let sender_cap = table::lookup(&env.caps.cpt, 11).unwrap();
    let sender: &Thread = sender_cap.as_thread().unwrap();
    assert_eq!(env.call(receiver, svc::THD_BIND, 11, [0, 0, 0]), 0);

    // A blocks in receive.
    assert_eq!(env.call(receiver, svc::SIG_RCV, 10, [1, 0, 0]), 0);
    assert_eq!(
        receiver.run_state(),
        nucleus::objects::thread::STATE_BLOCKED
    );

    // B sends four times.
    assert_eq!(env.call(sender, svc::SIG_SND, 10, [0; 3]), 0);
    assert_eq!(
        receiver.run_state(),
        nucleus::objects::thread::STATE_READY,
        "receiver must wake on the first send"
    );
    assert_eq!(env.call(sender, svc::SIG_SND, 10, [0; 3]), 0);
    assert_eq!(env.call(sender, svc::SIG_SND, 10, [0; 3]), 0);
    assert_eq!(
        env.call(sender, svc::SIG_SND, 10, [0; 3]),
        KernelError::BlockWouldExceed.code(),
        "fourth send must refuse at the bound"
    );

    let sig_cap = table::lookup(&env.caps.cpt, 10).unwrap();
    let sig: &SignalEndpoint = sig_cap.as_signal().unwrap();
    assert_eq!(sig.count(), 3, "counter must end at the bound");
}

/// Scenario: T (prio 5) invokes into P2; U (prio 7) preempts and runs to
/// completion; T resumes inside P2 and its return restores P1 with the
/// literal return value in the return register.
#[test]
fn invocation_return_across_preemption() {
    let env = boot_env();
    let t = env.boot_thread();
    let kom = BootLayout::DEFAULT.init_kom as Word;
    let p1_top = env.caps.top_pgt;

    // Assemble P2: table, top page table, process.
    let table_base = env.carve(8 * 64);
    assert_eq!(env.call(t, svc::CPT_CRT, kom, [table_base, 10, 8]), 0);
    let pgt_base = env.carve(pgt::table_bytes(4, true));
    assert_eq!(
        env.call(
            t,
            svc::PGT_CRT,
            kom,
            [
                pgt_base,
                0x4000_0000,
                syscall::pack_dst(11, syscall::pack_geometry(12, 4, true))
            ]
        ),
        0
    );
    let prc_base = env.carve(64);
    assert_eq!(
        env.call(t, svc::PRC_CRT, kom, [prc_base, syscall::pack_dst(12, 10), 11]),
        0
    );

    // The invocation into P2.
    let inv_base = env.carve(64);
    assert_eq!(
        env.call(t, svc::INV_CRT, kom, [inv_base, syscall::pack_dst(13, 12), 0]),
        0
    );
    assert_eq!(
        env.call(t, svc::INV_SET, 13, [0x4000_0100, 0x4000_F000, 0]),
        0
    );

    // U, higher priority, in the boot process.
    let u_base = env.carve(core::mem::size_of::<Thread>() as Word);
    assert_eq!(
        env.call(
            t,
            svc::THD_CRT,
            kom,
            [
                u_base,
                syscall::pack_dst(14, BootLayout::DEFAULT.init_prc as Word),
                syscall::pack_sched(7, 8, false)
            ]
        ),
        0
    );
    let u_cap = table::lookup(&env.caps.cpt, 14).unwrap();
    let u: &Thread = u_cap.as_thread().unwrap();
    assert_eq!(env.call(t, svc::THD_BIND, 14, [0, 0, 0]), 0);

    // T activates into P2.
    let home = t.process();
    assert_eq!(env.call(t, svc::INV_ACT, 13, [99, 0, 0]), 0);
    assert_ne!(t.process(), home);
    assert_ne!(env.cpu.current_pgt(), p1_top, "P2's domain is live");
    let p2_top = env.cpu.current_pgt();
    assert_eq!(t.priority(), 5, "invocation must not touch priority");

    // Timer elevates U; it preempts T.
    env.cpu.ready(u).unwrap();
    let next = env.cpu.schedule().unwrap();
    assert_eq!(next.addr(), u.addr(), "higher priority wins the CPU");
    env.switch_domain(next);
    assert_eq!(env.cpu.current_pgt(), p1_top, "U runs in the boot domain");

    // U runs to completion.
    env.cpu.stop(u);
    let resumed = env.cpu.schedule().unwrap();
    assert_eq!(resumed.addr(), t.addr());
    env.switch_domain(resumed);
    assert_eq!(
        env.cpu.current_pgt(),
        p2_top,
        "T must resume inside P2's address space"
    );

    // The callee returns the literal value; P1 is restored.
    assert_eq!(env.call(t, svc::INV_RET, 0, [0xDEAD_BEEF, 0, 0]), 0);
    assert_eq!(t.process(), home);
    assert_eq!(env.cpu.current_pgt(), p1_top);
    assert_eq!(t.with_ctx(|ctx| ctx.retval()), 0xDEAD_BEEF);
}

/// Scenario: an evicted dynamic leaf refills on a single fault and stays
/// resident for subsequent accesses.
#[test]
fn fault_on_dynamic_miss() {
    let env = boot_env();
    let thd = env.boot_thread();
    let top_id = BootLayout::DEFAULT.init_pgt as Word;
    let top = unsafe { &*(env.caps.top_pgt as *const pgt::PageTable) };

    // The dynamic leaf of interest at VA 0x2000_0000.
    assert_eq!(
        env.call(
            thd,
            svc::PGT_MAP_PAGE,
            top_id,
            [0, 0x8000_0000, (MapFlags::READ | MapFlags::WRITE).bits()]
        ),
        0
    );
    assert!(env.platform.access_ok(0x2000_0000, false, false));

    // Fill the remaining slots and churn more dynamic leaves through the
    // file until the first leaf has been evicted.
    for pos in 1..16usize {
        assert_eq!(
            env.call(
                thd,
                svc::PGT_MAP_PAGE,
                top_id,
                [
                    pos as Word,
                    0x8000_0000 + (pos as Word) * 0x1000,
                    MapFlags::READ.bits()
                ]
            ),
            0
        );
    }
    let mut churn = 1usize;
    while env.platform.access_ok(0x2000_0004, false, false) {
        let vaddr = 0x2000_0000 + (churn as Word) * 0x1000;
        assert!(pgt::handle_fault(&env.kernel, &env.cpu, top, vaddr));
        churn = churn % 15 + 1;
    }

    // One fault refills the slot; the access then hits without faulting.
    assert!(pgt::handle_fault(&env.kernel, &env.cpu, top, 0x2000_0004));
    assert!(env.platform.access_ok(0x2000_0004, false, false));
    assert!(env.platform.access_ok(0x2000_0008, false, false));
}

/// Scenario: an unaligned page-table creation is rejected without leaving
/// any kernel-object allocation behind.
#[test]
fn unaligned_pgt_create_rejection() {
    let env = boot_env();
    let thd = env.boot_thread();
    let kom = BootLayout::DEFAULT.init_kom as Word;

    let storage = env.carve(8192);
    assert_eq!(
        env.call(
            thd,
            svc::PGT_CRT,
            kom,
            [
                storage + 1,
                0x100,
                syscall::pack_dst(10, syscall::pack_geometry(10, 8, false))
            ]
        ),
        KernelError::BadAlignment.code()
    );

    assert!(env.kernel.kot.probe(storage, 8192), "no KOT bits may survive");
    assert_eq!(
        table::lookup(&env.caps.cpt, 10).unwrap_err(),
        KernelError::CapabilityInvalid
    );
}
