/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Region replacement policy for MPU-class protection hardware.
//!
//! Every top-level table carries a fixed file of region descriptors plus a
//! bitmap marking which slots hold *static* leaves. Installation policy:
//!
//! 1. a descriptor already covering `(base, size)` is updated in place;
//! 2. otherwise an empty slot is used;
//! 3. otherwise a non-static victim chosen by a Fibonacci LFSR is evicted.
//!
//! At least two slots always stay available to dynamic leaves, because
//! two-region-wide load/store pairs would otherwise deadlock on refill.
//! Static leaves are resident and never evicted; dynamic leaves are
//! refilled from the tables on fault.

use {
    crate::{
        error::{KernelError, Result},
        Word,
    },
    core::sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    machine::mpu::{self, MapFlags, RawRegion, REGION_NUM},
};

/// Slots that may never be occupied by static leaves.
pub const DYNAMIC_RESERVE: usize = 2;

const LFSR_SEED: Word = 0xACE1_ACE1;
const LFSR_TAPS: Word = 0xB400_B400;

/// MPU backing state of a top-level table.
#[repr(C)]
pub struct MpuData {
    static_map: AtomicUsize,
    lfsr: AtomicUsize,
    /// Region file, `rbar` in the low half of each word.
    regions: [AtomicU64; REGION_NUM],
}

impl MpuData {
    pub(crate) fn init(&self) {
        self.static_map.store(0, Ordering::Relaxed);
        self.lfsr.store(LFSR_SEED, Ordering::Relaxed);
        for slot in &self.regions {
            slot.store(0, Ordering::Relaxed);
        }
    }

    fn region(&self, slot: usize) -> RawRegion {
        let word = self.regions[slot].load(Ordering::Relaxed);
        RawRegion {
            rbar: word as u32,
            rasr: (word >> 32) as u32,
        }
    }

    fn set_region(&self, slot: usize, region: RawRegion) {
        let word = region.rbar as u64 | (region.rasr as u64) << 32;
        self.regions[slot].store(word, Ordering::Relaxed);
    }

    /// Copy of the region file for handing to the hardware.
    pub fn snapshot(&self) -> [RawRegion; REGION_NUM] {
        let mut out = [RawRegion::EMPTY; REGION_NUM];
        for (slot, region) in out.iter_mut().enumerate() {
            *region = self.region(slot);
        }
        out
    }

    pub fn static_map(&self) -> Word {
        self.static_map.load(Ordering::Relaxed)
    }

    fn set_static(&self, slot: usize, is_static: bool) {
        if is_static {
            self.static_map.fetch_or(1 << slot, Ordering::Relaxed);
        } else {
            self.static_map.fetch_and(!(1 << slot), Ordering::Relaxed);
        }
    }

    fn step_lfsr(&self) -> Word {
        let mut value = self.lfsr.load(Ordering::Relaxed);
        if value & 1 != 0 {
            value >>= 1;
            value ^= LFSR_TAPS;
        } else {
            value >>= 1;
        }
        self.lfsr.store(value, Ordering::Relaxed);
        value
    }
}

/// Install or update the region for a leaf at `(base, 2^size_order)`.
pub(crate) fn install(
    top: &super::PageTable,
    base: Word,
    size_order: u32,
    flags: MapFlags,
) -> Result<()> {
    let mpu_data = top.mpu_data();
    let wants_static = flags.contains(MapFlags::STATIC);

    // Pass one: in-place update, and empty/dynamic candidate bookkeeping.
    let mut empty = [0usize; REGION_NUM];
    let mut empty_count = 0;
    let mut dynamic = [0usize; REGION_NUM];
    let mut dynamic_count = 0;
    let mut static_count = 0;

    for slot in 0..REGION_NUM {
        let region = mpu_data.region(slot);
        if !mpu::region_enabled(&region) {
            empty[empty_count] = slot;
            empty_count += 1;
            continue;
        }
        let is_static = mpu_data.static_map() & (1 << slot) != 0;
        if is_static {
            static_count += 1;
        } else {
            dynamic[dynamic_count] = slot;
            dynamic_count += 1;
        }
        if mpu::region_base(&region) == base && mpu::region_total_order(&region) == size_order {
            // All flag changes except residency land in the descriptor;
            // residency is tracked in the standalone bitmap.
            let statics = mpu_data.static_map().count_ones() as usize;
            if wants_static && !is_static && statics >= REGION_NUM - DYNAMIC_RESERVE {
                return Err(KernelError::HalFailed);
            }
            let updated = mpu::region_encode(base, size_order, 0xFF, flags, slot)?;
            mpu_data.set_region(slot, updated);
            mpu_data.set_static(slot, wants_static);
            return Ok(());
        }
    }

    if wants_static && static_count >= REGION_NUM - DYNAMIC_RESERVE {
        return Err(KernelError::HalFailed);
    }

    let slot = if empty_count > 0 {
        empty[0]
    } else if dynamic_count > 0 {
        dynamic[mpu_data.step_lfsr() % dynamic_count]
    } else {
        return Err(KernelError::HalFailed);
    };

    let region = mpu::region_encode(base, size_order, 0xFF, flags, slot)?;
    mpu_data.set_region(slot, region);
    mpu_data.set_static(slot, wants_static);
    Ok(())
}

/// Drop the region covering `(base, 2^size_order)` if one is resident.
pub(crate) fn clear(top: &super::PageTable, base: Word, size_order: u32) {
    let mpu_data = top.mpu_data();
    for slot in 0..REGION_NUM {
        let region = mpu_data.region(slot);
        if mpu::region_enabled(&region)
            && mpu::region_base(&region) == base
            && mpu::region_total_order(&region) == size_order
        {
            mpu_data.set_region(slot, RawRegion::EMPTY);
            mpu_data.set_static(slot, false);
            return;
        }
    }
}
