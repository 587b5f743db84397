/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Interrupt delivery: flag pages and the kernel endpoints.
//!
//! Physical vectors are demultiplexed in user mode. The kernel's part is a
//! shared flag page holding two alternating flag sets; the ISR stub writes
//! whichever set is not locked by the user-mode reader, sets the vector's
//! bit, and performs a kernel send on the per-CPU vector endpoint. Timer
//! ticks use the dedicated fast word instead of the bit array.

use {
    crate::{
        error::{KernelError, Result},
        objects::signal::{kern_send, SignalEndpoint},
        sched::CpuLocal,
        Kernel, Word, WORD_BITS,
    },
    bit_field::BitField,
    core::sync::atomic::{AtomicUsize, Ordering},
};

/// Words in each flag-set bit array; bounds the vector space.
pub const FLAG_WORDS: usize = 4;

/// Highest vector number a flag page can carry.
pub const VECTOR_MAX: usize = FLAG_WORDS * WORD_BITS as usize;

/// One flag set: a lock word owned by the user-mode reader, a fast word
/// for high-rate sources, a group word summarising which bit-array words
/// are non-empty, and the bit array itself.
#[repr(C)]
pub struct FlagSet {
    lock: AtomicUsize,
    fast: AtomicUsize,
    group: AtomicUsize,
    flags: [AtomicUsize; FLAG_WORDS],
}

#[allow(clippy::declare_interior_mutable_const)]
const ZERO: AtomicUsize = AtomicUsize::new(0);

impl FlagSet {
    pub const fn new() -> FlagSet {
        FlagSet {
            lock: AtomicUsize::new(0),
            fast: AtomicUsize::new(0),
            group: AtomicUsize::new(0),
            flags: [ZERO; FLAG_WORDS],
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Acquire) != 0
    }

    pub fn fast_word(&self) -> Word {
        self.fast.load(Ordering::Acquire)
    }

    pub fn group_word(&self) -> Word {
        self.group.load(Ordering::Acquire)
    }

    pub fn flag_bit(&self, pos: usize) -> bool {
        self.flags[pos / WORD_BITS as usize]
            .load(Ordering::Acquire)
            .get_bit(pos % WORD_BITS as usize)
    }
}

impl Default for FlagSet {
    fn default() -> Self {
        Self::new()
    }
}

/// The shared page: two alternating sets so ISR writes bypass the
/// reader-writer race with the user-mode demultiplexer.
#[repr(C)]
pub struct FlagPage {
    sets: [FlagSet; 2],
}

impl FlagPage {
    pub const fn new() -> FlagPage {
        FlagPage {
            sets: [FlagSet::new(), FlagSet::new()],
        }
    }

    pub fn set(&self, index: usize) -> &FlagSet {
        &self.sets[index]
    }

    /// The set an ISR may write right now: whichever is not locked.
    fn open_set(&self) -> &FlagSet {
        if self.sets[0].is_locked() {
            &self.sets[1]
        } else {
            &self.sets[0]
        }
    }
}

impl Default for FlagPage {
    fn default() -> Self {
        Self::new()
    }
}

/// Post a vector (or event) position into the open flag set.
pub fn flag_slow(page: &FlagPage, pos: Word) -> Result<()> {
    if pos >= VECTOR_MAX as Word {
        return Err(KernelError::KernFailed);
    }
    let set = page.open_set();
    let word = pos as usize / WORD_BITS as usize;
    set.group.fetch_or(1 << word, Ordering::AcqRel);
    set.flags[word].fetch_or(1 << (pos as usize % WORD_BITS as usize), Ordering::AcqRel);
    Ok(())
}

/// Post a fast-source mask (timer class) into the open flag set.
pub fn flag_fast(page: &FlagPage, mask: Word) {
    page.open_set().fast.fetch_or(mask, Ordering::AcqRel);
}

fn endpoint_at(va: Word) -> Option<&'static SignalEndpoint> {
    (va != 0).then(|| unsafe { &*(va as *const SignalEndpoint) })
}

/// Device interrupt entry: flag the vector and poke the vector endpoint.
pub fn vct_handler(kernel: &Kernel, cpu: &CpuLocal, vector: Word) -> Result<()> {
    flag_slow(kernel.vct_flags, vector)?;
    if let Some(sig) = endpoint_at(cpu.vct_sig.load(Ordering::Relaxed)) {
        kern_send(cpu, kernel.platform, sig, 1);
    }
    Ok(())
}

/// Timer tick entry: fast-flag the tick source, poke the tick endpoint,
/// debit the running timeslice.
pub fn tim_handler(kernel: &Kernel, cpu: &CpuLocal) {
    flag_fast(kernel.vct_flags, 1);
    if let Some(sig) = endpoint_at(cpu.tick_sig.load(Ordering::Relaxed)) {
        kern_send(cpu, kernel.platform, sig, 1);
    }
    cpu.tick();
}
