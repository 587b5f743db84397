/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Per-CPU scheduler.
//!
//! One FIFO queue per priority plus a bitmap whose highest set bit names the
//! highest non-empty priority; selection is find-first-set and a head pop.
//! The structure is owned by its CPU and touched only from that CPU's kernel
//! path (the fields are atomics solely to make the sharing of the enclosing
//! statics sound); waking a thread bound elsewhere sends an IPI instead of
//! touching the remote queues.

use {
    crate::{
        error::{KernelError, Result},
        objects::thread::{
            Thread, CPU_UNBOUND, PRIO_NUM, STATE_BLOCKED, STATE_READY, STATE_RUNNING,
            STATE_STOPPED,
        },
        Word, WORD_BITS,
    },
    core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    machine::platform::Platform,
};

static_assertions::const_assert!(PRIO_NUM <= WORD_BITS as usize);

struct Queue {
    head: AtomicUsize,
    tail: AtomicUsize,
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_QUEUE: Queue = Queue {
    head: AtomicUsize::new(0),
    tail: AtomicUsize::new(0),
};

/// Scheduler state of one CPU.
pub struct CpuLocal {
    cpu: usize,
    bitmap: AtomicUsize,
    queues: [Queue; PRIO_NUM],
    running: AtomicUsize,
    need_resched: AtomicBool,
    timestamp: AtomicU64,
    current_pgt: AtomicUsize,
    /// Timer-tick endpoint, signalled every tick once boot wires it.
    pub tick_sig: AtomicUsize,
    /// Default vector endpoint for interrupt delivery.
    pub vct_sig: AtomicUsize,
}

fn thread_at<'a>(va: Word) -> &'a Thread {
    debug_assert_ne!(va, 0);
    unsafe { &*(va as *const Thread) }
}

/// What a context switch must do about coprocessor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoprocSwitch {
    Nothing,
    SaveOld,
    RestoreNew,
    SaveOldRestoreNew,
}

/// Decide the coprocessor save/restore policy for a switch from `old` to
/// `new`. The old side is saved only when it owns a coprocessor context and
/// the hardware actually stacked one since the last switch; that flag is
/// read from the saved exception-return encoding, never duplicated.
pub fn coproc_switch_plan(old: &Thread, new: &Thread) -> CoprocSwitch {
    let save = old.with_coproc(|c| c.is_present()) && old.with_ctx(|ctx| ctx.coproc_touched());
    let restore = new.with_coproc(|c| c.is_present());
    match (save, restore) {
        (false, false) => CoprocSwitch::Nothing,
        (true, false) => CoprocSwitch::SaveOld,
        (false, true) => CoprocSwitch::RestoreNew,
        (true, true) => CoprocSwitch::SaveOldRestoreNew,
    }
}

impl CpuLocal {
    pub const fn new(cpu: usize) -> CpuLocal {
        CpuLocal {
            cpu,
            bitmap: AtomicUsize::new(0),
            queues: [EMPTY_QUEUE; PRIO_NUM],
            running: AtomicUsize::new(0),
            need_resched: AtomicBool::new(false),
            timestamp: AtomicU64::new(0),
            current_pgt: AtomicUsize::new(0),
            tick_sig: AtomicUsize::new(0),
            vct_sig: AtomicUsize::new(0),
        }
    }

    pub fn cpu_id(&self) -> usize {
        self.cpu
    }

    /// Ticks seen by this CPU.
    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Relaxed)
    }

    /// Top-level page table currently loaded on this CPU.
    pub fn current_pgt(&self) -> Word {
        self.current_pgt.load(Ordering::Relaxed)
    }

    pub(crate) fn set_current_pgt(&self, pgt: Word) {
        self.current_pgt.store(pgt, Ordering::Relaxed);
    }

    /// The thread this CPU is executing for, if any.
    pub fn running(&self) -> Option<&Thread> {
        let va = self.running.load(Ordering::Relaxed);
        (va != 0).then(|| thread_at(va))
    }

    fn enqueue(&self, thd: &Thread) {
        let prio = thd.priority() as usize;
        debug_assert!(prio < PRIO_NUM);
        let queue = &self.queues[prio];
        let va = thd.addr();

        thd.queue_next.store(0, Ordering::Relaxed);
        let tail = queue.tail.load(Ordering::Relaxed);
        thd.queue_prev.store(tail, Ordering::Relaxed);
        if tail == 0 {
            queue.head.store(va, Ordering::Relaxed);
        } else {
            thread_at(tail).queue_next.store(va, Ordering::Relaxed);
        }
        queue.tail.store(va, Ordering::Relaxed);
        self.bitmap.fetch_or(1 << prio, Ordering::Relaxed);
    }

    fn unlink(&self, thd: &Thread) {
        let prio = thd.priority() as usize;
        let queue = &self.queues[prio];
        let va = thd.addr();
        let prev = thd.queue_prev.load(Ordering::Relaxed);
        let next = thd.queue_next.load(Ordering::Relaxed);

        if prev == 0 {
            debug_assert_eq!(queue.head.load(Ordering::Relaxed), va);
            queue.head.store(next, Ordering::Relaxed);
        } else {
            thread_at(prev).queue_next.store(next, Ordering::Relaxed);
        }
        if next == 0 {
            debug_assert_eq!(queue.tail.load(Ordering::Relaxed), va);
            queue.tail.store(prev, Ordering::Relaxed);
        } else {
            thread_at(next).queue_prev.store(prev, Ordering::Relaxed);
        }
        if queue.head.load(Ordering::Relaxed) == 0 {
            self.bitmap.fetch_and(!(1 << prio), Ordering::Relaxed);
        }
        thd.queue_prev.store(0, Ordering::Relaxed);
        thd.queue_next.store(0, Ordering::Relaxed);
    }

    /// Highest non-empty priority, if any queue holds a thread.
    pub fn top_priority(&self) -> Option<Word> {
        let bitmap = self.bitmap.load(Ordering::Relaxed);
        if bitmap == 0 {
            return None;
        }
        Some((WORD_BITS - 1 - bitmap.leading_zeros()) as Word)
    }

    /// Make a thread ready on this CPU, flagging preemption if it outranks
    /// the running thread.
    pub fn ready(&self, thd: &Thread) -> Result<()> {
        if thd.bound_cpu() != self.cpu as Word {
            return Err(KernelError::ThreadBindingError);
        }
        match thd.run_state() {
            STATE_READY | STATE_RUNNING => return Err(KernelError::ThreadBindingError),
            _ => {}
        }
        thd.set_run_state(STATE_READY);
        self.enqueue(thd);

        let preempts = match self.running() {
            Some(cur) => thd.priority() > cur.priority(),
            None => true,
        };
        if preempts {
            self.need_resched.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Stop a thread: out of the queues, off the CPU if it was current.
    pub fn stop(&self, thd: &Thread) {
        match thd.run_state() {
            STATE_READY => self.unlink(thd),
            STATE_RUNNING => {
                if self.running.load(Ordering::Relaxed) == thd.addr() {
                    self.running.store(0, Ordering::Relaxed);
                    self.need_resched.store(true, Ordering::Relaxed);
                }
            }
            _ => {}
        }
        thd.set_run_state(STATE_STOPPED);
    }

    /// Park the running thread in a blocked state; the waker will ready it.
    pub fn block_current(&self) {
        if let Some(cur) = self.running() {
            cur.set_run_state(STATE_BLOCKED);
            self.running.store(0, Ordering::Relaxed);
            self.need_resched.store(true, Ordering::Relaxed);
        }
    }

    /// Pick the thread this CPU should run next and install it as running.
    ///
    /// The running thread keeps the CPU while it is at least as urgent as
    /// every ready thread and still has timeslice; otherwise it is requeued
    /// at the tail of its priority and the highest-priority head takes over.
    pub fn schedule(&self) -> Option<&Thread> {
        self.need_resched.store(false, Ordering::Relaxed);
        let current = self.running().filter(|t| t.run_state() == STATE_RUNNING);

        if let Some(cur) = current {
            let keep = cur.slice_left() > 0
                && self
                    .top_priority()
                    .map_or(true, |top| cur.priority() >= top);
            if keep {
                return Some(cur);
            }
            // Yield the CPU: back to the tail of its own priority.
            cur.slice_refill();
            cur.set_run_state(STATE_READY);
            self.enqueue(cur);
        }

        let prio = self.top_priority()?;
        let head = self.queues[prio as usize].head.load(Ordering::Relaxed);
        let next = thread_at(head);
        self.unlink(next);
        next.set_run_state(STATE_RUNNING);
        self.running.store(next.addr(), Ordering::Relaxed);
        Some(next)
    }

    /// Timer tick: account the running thread's timeslice. Returns true if
    /// the budget expired and a reschedule is due.
    pub fn tick(&self) -> bool {
        self.timestamp.fetch_add(1, Ordering::Relaxed);
        if let Some(cur) = self.running() {
            if cur.slice_debit() {
                self.need_resched.store(true, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// Wake a blocked thread with a return code, locally or via IPI.
    pub fn wake(&self, platform: &dyn Platform, thd: &Thread, retcode: isize) -> Result<()> {
        thd.with_ctx(|ctx| ctx.set_retval(retcode as Word));
        let bound = thd.bound_cpu();
        if bound == CPU_UNBOUND {
            return Err(KernelError::Unbound);
        }
        if bound == self.cpu as Word {
            self.ready(thd)
        } else {
            platform.send_reschedule_ipi(bound as usize);
            thd.set_run_state(STATE_READY);
            Ok(())
        }
    }

    /// Change a thread's priority, requeueing if it is currently ready.
    pub fn set_priority(&self, thd: &Thread, prio: Word) -> Result<()> {
        if prio >= PRIO_NUM as Word {
            return Err(KernelError::PriorityError);
        }
        match thd.run_state() {
            STATE_READY => {
                self.unlink(thd);
                thd.store_priority(prio);
                self.enqueue(thd);
            }
            STATE_RUNNING => {
                thd.store_priority(prio);
                self.need_resched.store(true, Ordering::Relaxed);
            }
            _ => thd.store_priority(prio),
        }
        Ok(())
    }
}
