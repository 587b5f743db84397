/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Hosted platform: a software model of the machine for the test suite.
//!
//! Models the pieces the kernel core can observe: an interrupt mask flag, a
//! monotonic tick counter, an 8-region protection unit with subregion
//! disable and region-number priority, a pending/enable state per interrupt
//! vector, and a small debug output ring. Everything is atomics so scenario
//! tests may hammer the kernel from several host threads.

use {
    crate::{
        mpu::{self, RawRegion, REGION_NUM},
        platform::{HalError, Platform},
        Word,
    },
    core::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering},
};

/// Vectors modelled by the hosted interrupt controller.
pub const VECTOR_NUM: usize = 32;

const DEBUG_RING: usize = 256;

/// Software machine state backing one simulated CPU.
pub struct HostedPlatform {
    cpu: usize,
    irq_masked: AtomicBool,
    ticks: AtomicU64,
    /// Programmed region file, `rbar` in the low half, `rasr` in the high.
    regions: [AtomicU64; REGION_NUM],
    ipis: AtomicUsize,
    int_enable: AtomicUsize,
    int_pending: AtomicUsize,
    int_prio: [AtomicUsize; VECTOR_NUM],
    cache_on: AtomicBool,
    prefetch_on: AtomicBool,
    cycle: AtomicU64,
    debug_ring: [AtomicU8; DEBUG_RING],
    debug_len: AtomicUsize,
}

#[allow(clippy::declare_interior_mutable_const)]
const ZERO_U64: AtomicU64 = AtomicU64::new(0);
#[allow(clippy::declare_interior_mutable_const)]
const ZERO_USIZE: AtomicUsize = AtomicUsize::new(0);
#[allow(clippy::declare_interior_mutable_const)]
const ZERO_U8: AtomicU8 = AtomicU8::new(0);

impl HostedPlatform {
    pub const fn new(cpu: usize) -> Self {
        HostedPlatform {
            cpu,
            irq_masked: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            regions: [ZERO_U64; REGION_NUM],
            ipis: AtomicUsize::new(0),
            int_enable: AtomicUsize::new(0),
            int_pending: AtomicUsize::new(0),
            int_prio: [ZERO_USIZE; VECTOR_NUM],
            cache_on: AtomicBool::new(false),
            prefetch_on: AtomicBool::new(false),
            cycle: AtomicU64::new(0),
            debug_ring: [ZERO_U8; DEBUG_RING],
            debug_len: AtomicUsize::new(0),
        }
    }

    /// Observed interrupt mask state.
    pub fn irqs_are_masked(&self) -> bool {
        self.irq_masked.load(Ordering::SeqCst)
    }

    /// Advance the simulated timer.
    pub fn ticks_advance(&self, n: u64) {
        self.ticks.fetch_add(n, Ordering::SeqCst);
    }

    /// Snapshot of the programmed region file.
    pub fn regions(&self) -> [RawRegion; REGION_NUM] {
        let mut out = [RawRegion::EMPTY; REGION_NUM];
        for (slot, packed) in self.regions.iter().enumerate() {
            let word = packed.load(Ordering::SeqCst);
            out[slot] = RawRegion {
                rbar: word as u32,
                rasr: (word >> 32) as u32,
            };
        }
        out
    }

    /// Simulate one access against the programmed region file.
    ///
    /// Higher-numbered regions take priority on overlap, like the hardware.
    pub fn access_ok(&self, addr: Word, write: bool, exec: bool) -> bool {
        let regions = self.regions();
        for region in regions.iter().rev() {
            if !mpu::region_enabled(region) {
                continue;
            }
            let order = mpu::region_total_order(region);
            let base = mpu::region_base(region);
            let size = 1usize << order;
            if addr < base || addr >= base + size {
                continue;
            }
            if order >= mpu::SRD_ORDER_MIN {
                let eighth = (addr - base) / (size / 8);
                if mpu::region_enabled_eighths(region) & (1 << eighth) == 0 {
                    continue;
                }
            }
            let flags = mpu::region_flags(region);
            if write && !flags.contains(mpu::MapFlags::WRITE) {
                return false;
            }
            if exec && !flags.contains(mpu::MapFlags::EXECUTE) {
                return false;
            }
            return flags.contains(mpu::MapFlags::READ);
        }
        false
    }

    /// Number of reschedule kicks sent to other CPUs.
    pub fn ipi_count(&self) -> usize {
        self.ipis.load(Ordering::SeqCst)
    }

    pub fn int_enabled(&self, vect: usize) -> bool {
        self.int_enable.load(Ordering::SeqCst) & (1 << vect) != 0
    }

    pub fn int_pending(&self, vect: usize) -> bool {
        self.int_pending.load(Ordering::SeqCst) & (1 << vect) != 0
    }

    /// Copy the debug ring into `buf`, returning the number of bytes.
    pub fn debug_bytes(&self, buf: &mut [u8]) -> usize {
        let len = self.debug_len.load(Ordering::SeqCst).min(DEBUG_RING);
        let n = len.min(buf.len());
        for (i, slot) in buf.iter_mut().enumerate().take(n) {
            *slot = self.debug_ring[i].load(Ordering::SeqCst);
        }
        n
    }
}

impl Platform for HostedPlatform {
    fn cpu_id(&self) -> usize {
        self.cpu
    }

    fn irq_mask(&self) -> bool {
        self.irq_masked.swap(true, Ordering::SeqCst)
    }

    fn irq_restore(&self, prior: bool) {
        self.irq_masked.store(prior, Ordering::SeqCst);
    }

    fn barrier(&self) {
        fence(Ordering::SeqCst);
    }

    fn timestamp(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn send_reschedule_ipi(&self, _cpu: usize) {
        self.ipis.fetch_add(1, Ordering::SeqCst);
    }

    fn mpu_program(&self, regions: &[RawRegion; REGION_NUM]) {
        for (slot, region) in regions.iter().enumerate() {
            let packed = region.rbar as u64 | (region.rasr as u64) << 32;
            self.regions[slot].store(packed, Ordering::SeqCst);
        }
    }

    fn idle_wait(&self) {
        core::hint::spin_loop();
    }

    fn reboot(&self) -> ! {
        panic!("hosted platform: reboot requested");
    }

    fn debug_putchar(&self, ch: u8) {
        let at = self.debug_len.fetch_add(1, Ordering::SeqCst);
        if at < DEBUG_RING {
            self.debug_ring[at].store(ch, Ordering::SeqCst);
        }
    }

    fn int_local_mod(&self, vect: Word, op: Word, param: Word) -> Result<Word, HalError> {
        if vect >= VECTOR_NUM {
            return Err(HalError::Rejected);
        }
        match op {
            0 => {
                self.int_enable.fetch_and(!(1 << vect), Ordering::SeqCst);
                Ok(0)
            }
            1 => {
                self.int_enable.fetch_or(1 << vect, Ordering::SeqCst);
                Ok(0)
            }
            2 => {
                self.int_prio[vect].store(param, Ordering::SeqCst);
                Ok(0)
            }
            3 => Ok(self.int_prio[vect].load(Ordering::SeqCst)),
            _ => Err(HalError::Unsupported),
        }
    }

    fn int_local_trig(&self, vect: Word) -> Result<Word, HalError> {
        if vect >= VECTOR_NUM {
            return Err(HalError::Rejected);
        }
        self.int_pending.fetch_or(1 << vect, Ordering::SeqCst);
        Ok(0)
    }

    fn cache_mod(&self, id: Word, op: Word) -> Result<Word, HalError> {
        if id != 0 {
            return Err(HalError::Rejected);
        }
        match op {
            0 => {
                self.cache_on.store(false, Ordering::SeqCst);
                Ok(0)
            }
            1 => {
                self.cache_on.store(true, Ordering::SeqCst);
                Ok(0)
            }
            _ => Err(HalError::Unsupported),
        }
    }

    fn cache_maint(&self, id: Word, op: Word, _addr: Word) -> Result<Word, HalError> {
        if id != 0 {
            return Err(HalError::Rejected);
        }
        // Clean/invalidate are observationally empty in the model.
        if op > 5 {
            return Err(HalError::Unsupported);
        }
        Ok(0)
    }

    fn prefetch_mod(&self, id: Word, op: Word) -> Result<Word, HalError> {
        if id != 0 {
            return Err(HalError::Rejected);
        }
        match op {
            0 => {
                self.prefetch_on.store(false, Ordering::SeqCst);
                Ok(0)
            }
            1 => {
                self.prefetch_on.store(true, Ordering::SeqCst);
                Ok(0)
            }
            _ => Err(HalError::Unsupported),
        }
    }

    fn cpu_feature(&self, id: Word) -> Result<Word, HalError> {
        match id {
            0 => Ok(0x410F_C241),
            1 => Ok(crate::WORD_BITS as Word),
            _ => Err(HalError::Rejected),
        }
    }

    fn perf_mon_mod(&self, id: Word, op: Word, _param: Word) -> Result<Word, HalError> {
        if id != 0 {
            return Err(HalError::Rejected);
        }
        match op {
            0 => Ok(1),
            _ => Err(HalError::Unsupported),
        }
    }

    fn perf_cycle_mod(&self, op: Word, value: Word) -> Result<Word, HalError> {
        match op {
            0 => Ok(self.cycle.load(Ordering::SeqCst) as Word),
            1 => {
                self.cycle.store(value as u64, Ordering::SeqCst);
                Ok(0)
            }
            _ => Err(HalError::Unsupported),
        }
    }
}
