/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Signal endpoint: a saturating counter with a one-shot parked receiver.
//!
//! `send` increments (refusing at the bound); `receive` consumes, or parks
//! the caller when the counter is dry. At most one thread may be parked.
//! The parked-receiver word is the arbiter for every wake source: exactly
//! one of {real send, tick timeout, explicit abort} wins the claiming CAS,
//! the losers observe an empty slot.

use {
    super::KernelObject,
    crate::{
        caps::{
            table::{create_object, lookup, resolve_slot},
            CapKind, CptRef, Rights,
        },
        error::{KernelError, Result},
        objects::thread::{Thread, FLAG_TIMEOUT},
        sched::CpuLocal,
        Kernel, Word,
    },
    core::{
        mem::size_of,
        sync::atomic::{AtomicUsize, Ordering},
    },
    machine::platform::Platform,
};

/// Counting endpoint.
#[repr(C)]
pub struct SignalEndpoint {
    count: AtomicUsize,
    bound: Word,
    receiver: AtomicUsize,
}

impl KernelObject for SignalEndpoint {
    const KIND: CapKind = CapKind::Signal;
}

/// Outcome of a receive that did not fail.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    /// A pending count was consumed; the call completes immediately.
    Taken(Word),
    /// The caller is parked; a wake source will deliver the return value.
    Parked,
}

impl SignalEndpoint {
    pub fn count(&self) -> Word {
        self.count.load(Ordering::Acquire)
    }

    pub fn saturation_bound(&self) -> Word {
        self.bound
    }

    /// Increment by one; refuse at the bound.
    fn try_post(&self) -> Result<()> {
        loop {
            let old = self.count.load(Ordering::Acquire);
            if old >= self.bound {
                return Err(KernelError::BlockWouldExceed);
            }
            if self
                .count
                .compare_exchange_weak(old, old + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Batch increment, silently clamped at the bound.
    fn post_many(&self, n: Word) {
        loop {
            let old = self.count.load(Ordering::Acquire);
            let new = old.saturating_add(n).min(self.bound);
            if new == old {
                return;
            }
            if self
                .count
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Consume one pending count.
    fn try_consume(&self) -> Option<Word> {
        loop {
            let old = self.count.load(Ordering::Acquire);
            if old == 0 {
                return None;
            }
            if self
                .count
                .compare_exchange_weak(old, old - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(old - 1);
            }
        }
    }

    /// Claim the parked receiver, if any.
    fn claim_receiver(&self) -> Option<Word> {
        loop {
            let parked = self.receiver.load(Ordering::Acquire);
            if parked == 0 {
                return None;
            }
            if self
                .receiver
                .compare_exchange(parked, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(parked);
            }
        }
    }

    fn park(&self, thd: Word) -> Result<()> {
        self.receiver
            .compare_exchange(0, thd, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| KernelError::Empty)
    }

    pub(crate) fn teardown_check(&self) -> Result<()> {
        if self.receiver.load(Ordering::Acquire) != 0 {
            return Err(KernelError::InUse);
        }
        Ok(())
    }
}

/// User-path send: count up, wake a parked receiver.
pub fn send(cpu: &CpuLocal, platform: &dyn Platform, sig: &SignalEndpoint) -> Result<Word> {
    sig.try_post()?;
    if let Some(parked) = sig.claim_receiver() {
        let thd = unsafe { &*(parked as *const Thread) };
        cpu.wake(platform, thd, 0)?;
    }
    Ok(0)
}

/// Kernel-path send used from interrupt delivery: never blocks, never
/// fails, batches, and saturates silently.
pub fn kern_send(cpu: &CpuLocal, platform: &dyn Platform, sig: &SignalEndpoint, n: Word) {
    sig.post_many(n);
    if let Some(parked) = sig.claim_receiver() {
        let thd = unsafe { &*(parked as *const Thread) };
        // A wake refusal here means the receiver is mid-teardown; the
        // counter keeps the event.
        let _ = cpu.wake(platform, thd, 0);
    }
}

/// Receive: consume a pending count or (optionally) park the caller.
///
/// On `Received::Parked` the caller must block the thread; the winning wake
/// source will place the return value and ready it.
pub fn receive(sig: &SignalEndpoint, thd: &Thread, blocking: bool) -> Result<Received> {
    if let Some(left) = sig.try_consume() {
        return Ok(Received::Taken(left));
    }
    if !blocking {
        return Err(KernelError::Empty);
    }

    sig.park(thd.addr())?;

    // Close the park/send race: a send that landed before the park saw no
    // receiver and left only the count behind.
    loop {
        if sig.count() == 0 {
            return Ok(Received::Parked);
        }
        if sig
            .receiver
            .compare_exchange(thd.addr(), 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // A waker claimed us; the wake is in flight.
            return Ok(Received::Parked);
        }
        if let Some(left) = sig.try_consume() {
            return Ok(Received::Taken(left));
        }
        // The count evaporated to another receiver; park again.
        sig.park(thd.addr())?;
    }
}

/// Cancel a parked receive (tick timeout or explicit abort). The winner
/// wakes the thread with `WasCancelled`; losers observe an empty receiver
/// slot and get `WasCancelled` themselves.
pub fn cancel(
    cpu: &CpuLocal,
    platform: &dyn Platform,
    sig: &SignalEndpoint,
    thd: &Thread,
) -> Result<()> {
    if sig
        .receiver
        .compare_exchange(thd.addr(), 0, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(KernelError::WasCancelled);
    }
    thd.set_flag(FLAG_TIMEOUT);
    cpu.wake(platform, thd, KernelError::WasCancelled.code())?;
    Ok(())
}

/// Create a signal endpoint saturating at `bound`.
pub fn create_signal(
    kernel: &Kernel,
    cpt: &CptRef,
    dst_id: Word,
    kom_id: Word,
    base: Word,
    bound: Word,
) -> Result<Word> {
    if bound == 0 {
        return Err(KernelError::BadOrder);
    }
    let kom = lookup(cpt, kom_id)?;
    let dst = resolve_slot(cpt, dst_id)?;
    create_object(
        kernel,
        dst,
        &kom,
        CapKind::Signal,
        base,
        size_of::<SignalEndpoint>(),
        Rights::native(CapKind::Signal),
        [bound, 0, 0],
        |at| {
            unsafe {
                (at as *mut SignalEndpoint).write(SignalEndpoint {
                    count: AtomicUsize::new(0),
                    bound,
                    receiver: AtomicUsize::new(0),
                });
            }
            Ok(())
        },
    )
}
