/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Thread: the schedulable entity.
//!
//! A thread owns its saved register file, an optional coprocessor context
//! (decided at creation from the attribute word), a priority, a timeslice
//! budget, its CPU binding, an intrusive ready-queue node and the
//! invocation stack. The register file and the other `UnsafeCell` fields
//! are touched only by the CPU the thread is bound to, with interrupts
//! masked; that discipline is what the manual `Sync` below asserts.

use {
    super::KernelObject,
    crate::{
        caps::{
            table::{create_object, lookup, pin_root, release_child_link, resolve_slot},
            CapKind, CptRef, Rights, ValidRef,
        },
        error::{KernelError, Result},
        Kernel, Word,
    },
    core::{
        cell::UnsafeCell,
        mem::size_of,
        sync::atomic::{AtomicUsize, Ordering},
    },
    machine::context::{Context, CoprocContext, FpContext},
};

/// Number of scheduler priorities.
pub const PRIO_NUM: usize = 32;

/// Invocation stack depth limit.
pub const INV_DEPTH: usize = 16;

/// CPU field value of a thread bound nowhere.
pub const CPU_UNBOUND: Word = Word::MAX;

/// Thread attribute: create a coprocessor context.
pub const ATTR_COPROC: Word = 1 << 0;

/// Run states, low bits of the state word.
pub const STATE_STOPPED: Word = 0;
pub const STATE_READY: Word = 1;
pub const STATE_RUNNING: Word = 2;
pub const STATE_BLOCKED: Word = 3;
const STATE_MASK: Word = 0b111;

/// The thread died on an attributable fault.
pub const FLAG_FATAL: Word = 1 << 4;
/// The thread's blocking receive was cancelled by a timeout.
pub const FLAG_TIMEOUT: Word = 1 << 5;

/// Cause and address of the fault that killed a thread.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ExcRecord {
    pub cause: Word,
    pub addr: Word,
}

/// One frame of the invocation stack.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct InvFrame {
    pub inv: Word,
    pub ret_pc: Word,
    pub ret_sp: Word,
    pub prior_process: Word,
}

#[repr(C)]
struct InvStack {
    top: usize,
    frames: [InvFrame; INV_DEPTH],
}

/// The schedulable entity.
#[repr(C)]
pub struct Thread {
    ctx: UnsafeCell<Context>,
    coproc: UnsafeCell<CoprocContext>,
    exc: UnsafeCell<ExcRecord>,
    inv: UnsafeCell<InvStack>,
    state: AtomicUsize,
    prio: AtomicUsize,
    slice: AtomicUsize,
    slice_left: AtomicUsize,
    cpu: AtomicUsize,
    process: AtomicUsize,
    home: Word,
    prc_root: Word,
    attr: Word,
    fault_sig: AtomicUsize,
    fault_sig_root: AtomicUsize,
    pub(crate) queue_prev: AtomicUsize,
    pub(crate) queue_next: AtomicUsize,
}

impl KernelObject for Thread {
    const KIND: CapKind = CapKind::Thread;
}

// The UnsafeCell fields are only ever accessed from the thread's bound CPU
// inside the non-preemptive kernel; everything else is atomic.
unsafe impl Sync for Thread {}

impl Thread {
    /// Kernel VA of this thread object.
    pub fn addr(&self) -> Word {
        self as *const Thread as Word
    }

    /// Run the closure over the saved register file.
    pub fn with_ctx<R>(&self, f: impl FnOnce(&mut Context) -> R) -> R {
        unsafe { f(&mut *self.ctx.get()) }
    }

    /// Run the closure over the coprocessor context.
    pub fn with_coproc<R>(&self, f: impl FnOnce(&mut CoprocContext) -> R) -> R {
        unsafe { f(&mut *self.coproc.get()) }
    }

    /// Read the exception record.
    pub fn exc_record(&self) -> ExcRecord {
        unsafe { *self.exc.get() }
    }

    pub fn priority(&self) -> Word {
        self.prio.load(Ordering::Relaxed)
    }

    pub(crate) fn store_priority(&self, prio: Word) {
        self.prio.store(prio, Ordering::Relaxed);
    }

    pub fn timeslice(&self) -> Word {
        self.slice.load(Ordering::Relaxed)
    }

    pub fn slice_left(&self) -> Word {
        self.slice_left.load(Ordering::Relaxed)
    }

    pub(crate) fn slice_refill(&self) {
        self.slice_left
            .store(self.slice.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    /// Debit one tick; true when the budget just ran out.
    pub(crate) fn slice_debit(&self) -> bool {
        let left = self.slice_left.load(Ordering::Relaxed);
        if left <= 1 {
            self.slice_left.store(0, Ordering::Relaxed);
            true
        } else {
            self.slice_left.store(left - 1, Ordering::Relaxed);
            false
        }
    }

    pub fn bound_cpu(&self) -> Word {
        self.cpu.load(Ordering::Relaxed)
    }

    pub fn is_bound(&self) -> bool {
        self.bound_cpu() != CPU_UNBOUND
    }

    /// Current protection domain (changes across invocation).
    pub fn process(&self) -> Word {
        self.process.load(Ordering::Relaxed)
    }

    pub(crate) fn set_process(&self, prc: Word) {
        self.process.store(prc, Ordering::Relaxed);
    }

    /// Home protection domain (fixed at creation).
    pub fn home_process(&self) -> Word {
        self.home
    }

    /// The creation attribute word.
    pub fn attributes(&self) -> Word {
        self.attr
    }

    pub fn run_state(&self) -> Word {
        self.state.load(Ordering::Relaxed) & STATE_MASK
    }

    pub fn flags(&self) -> Word {
        self.state.load(Ordering::Relaxed) & !STATE_MASK
    }

    pub(crate) fn set_run_state(&self, run: Word) {
        loop {
            let old = self.state.load(Ordering::Relaxed);
            let new = old & !STATE_MASK | run;
            if self
                .state
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    pub(crate) fn set_flag(&self, flag: Word) {
        self.state.fetch_or(flag, Ordering::AcqRel);
    }

    /// Not ready, not running: register state may be inspected/poked.
    pub fn is_paused(&self) -> bool {
        matches!(self.run_state(), STATE_STOPPED | STATE_BLOCKED)
    }

    /// Bind to a CPU. Only a stopped thread may move.
    pub fn bind(&self, cpu: Word) -> Result<()> {
        if self.run_state() != STATE_STOPPED {
            return Err(KernelError::ThreadBindingError);
        }
        self.cpu.store(cpu, Ordering::Relaxed);
        Ok(())
    }

    pub fn unbind(&self) -> Result<()> {
        self.bind(CPU_UNBOUND)
    }

    pub(crate) fn inv_push(&self, frame: InvFrame) -> Result<()> {
        let stack = unsafe { &mut *self.inv.get() };
        if stack.top == INV_DEPTH {
            return Err(KernelError::InvocationOverflow);
        }
        stack.frames[stack.top] = frame;
        stack.top += 1;
        Ok(())
    }

    pub(crate) fn inv_pop(&self) -> Result<InvFrame> {
        let stack = unsafe { &mut *self.inv.get() };
        if stack.top == 0 {
            return Err(KernelError::InvocationEmpty);
        }
        stack.top -= 1;
        Ok(stack.frames[stack.top])
    }

    pub fn inv_depth(&self) -> usize {
        unsafe { &*self.inv.get() }.top
    }

    /// Record an attributable fault and kill the thread. Returns the fault
    /// endpoint to signal, if one is bound.
    pub(crate) fn mark_fatal(&self, cause: Word, addr: Word) -> Option<Word> {
        unsafe { *self.exc.get() = ExcRecord { cause, addr } };
        self.set_flag(FLAG_FATAL);
        self.set_run_state(STATE_STOPPED);
        let sig = self.fault_sig.load(Ordering::Relaxed);
        (sig != 0).then_some(sig)
    }

    pub fn is_fatal(&self) -> bool {
        self.flags() & FLAG_FATAL != 0
    }

    /// Designate the endpoint signalled when this thread goes fatal.
    pub fn bind_fault_sig(&self, sig: &ValidRef) -> Result<()> {
        sig.require(CapKind::Signal, Rights::SIG_SEND)?;
        if self.fault_sig.load(Ordering::Relaxed) != 0 {
            return Err(KernelError::InUse);
        }
        let pin = pin_root(sig)?;
        self.fault_sig.store(sig.object, Ordering::Relaxed);
        self.fault_sig_root.store(pin.addr, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn teardown_check(&self) -> Result<()> {
        if self.run_state() != STATE_STOPPED {
            return Err(KernelError::InUse);
        }
        Ok(())
    }

    pub(crate) fn release_links(&self) {
        release_child_link(self.prc_root);
        let sig_root = self.fault_sig_root.load(Ordering::Relaxed);
        if sig_root != 0 {
            release_child_link(sig_root);
        }
    }
}

/// Create a thread bound to process `prc_id`, initially stopped and
/// unbound, with the given priority and timeslice budget.
pub fn create_thread(
    kernel: &Kernel,
    cpt: &CptRef,
    dst_id: Word,
    kom_id: Word,
    base: Word,
    prc_id: Word,
    prio: Word,
    slice: Word,
    attr: Word,
) -> Result<Word> {
    if prio >= PRIO_NUM as Word {
        return Err(KernelError::PriorityError);
    }
    if slice == 0 {
        return Err(KernelError::BadSyscall);
    }

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
        CapKind::Thread,
        base,
        size_of::<Thread>(),
        Rights::native(CapKind::Thread),
        [0; 3],
        |at| {
            let coproc = if attr & ATTR_COPROC != 0 {
                CoprocContext::Fp(FpContext::new())
            } else {
                CoprocContext::None
            };
            unsafe {
                (at as *mut Thread).write(Thread {
                    ctx: UnsafeCell::new(Context::new()),
                    coproc: UnsafeCell::new(coproc),
                    exc: UnsafeCell::new(ExcRecord::default()),
                    inv: UnsafeCell::new(InvStack {
                        top: 0,
                        frames: [InvFrame::default(); INV_DEPTH],
                    }),
                    state: AtomicUsize::new(STATE_STOPPED),
                    prio: AtomicUsize::new(prio),
                    slice: AtomicUsize::new(slice),
                    slice_left: AtomicUsize::new(slice),
                    cpu: AtomicUsize::new(CPU_UNBOUND),
                    process: AtomicUsize::new(prc_va),
                    home: prc_va,
                    prc_root,
                    attr,
                    fault_sig: AtomicUsize::new(0),
                    fault_sig_root: AtomicUsize::new(0),
                    queue_prev: AtomicUsize::new(0),
                    queue_next: AtomicUsize::new(0),
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
