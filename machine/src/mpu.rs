/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Protection-region descriptor encoding.
//!
//! A top-level page table owns an array of [`RawRegion`] descriptors shaped
//! like the MPU's RBAR/RASR register pair: a base word with a slot index and
//! a settings word with size, subregion-disable byte and access attributes.
//! The logical flag set and the two translation tables between logical flags
//! and descriptor attribute bits live here; the replacement policy lives in
//! the kernel core.

use {
    crate::{platform::HalError, Word},
    bitflags::bitflags,
    tock_registers::{register_bitfields, LocalRegisterCopy},
};

/// Number of hardware region slots in a top-level table.
pub const REGION_NUM: usize = 8;

/// Smallest representable region, `2^5` = 32 bytes.
pub const TOTAL_ORDER_MIN: u32 = 5;

/// Smallest region on which the subregion-disable byte is honoured.
pub const SRD_ORDER_MIN: u32 = 8;

/// Largest representable region, the full 4G address space.
pub const TOTAL_ORDER_MAX: u32 = 32;

bitflags! {
    /// Architecture-neutral mapping attributes.
    pub struct MapFlags: Word {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXECUTE = 1 << 2;
        const CACHE   = 1 << 3;
        const BUFFER  = 1 << 4;
        /// Resident leaf: never a victim of dynamic replacement.
        const STATIC  = 1 << 5;
    }
}

register_bitfields! {
    u32,

    /// Region base address register image.
    pub RBAR [
        REGION OFFSET(0) NUMBITS(4) [],
        VALID OFFSET(4) NUMBITS(1) [],
        ADDR OFFSET(5) NUMBITS(27) []
    ],

    /// Region attribute and size register image.
    pub RASR [
        ENABLE OFFSET(0) NUMBITS(1) [],
        /// Region covers `2^(SIZE+1)` bytes.
        SIZE OFFSET(1) NUMBITS(5) [],
        /// Subregion disable: bit set = eighth not present.
        SRD OFFSET(8) NUMBITS(8) [],
        B OFFSET(16) NUMBITS(1) [],
        C OFFSET(17) NUMBITS(1) [],
        S OFFSET(18) NUMBITS(1) [],
        TEX OFFSET(19) NUMBITS(3) [],
        AP OFFSET(24) NUMBITS(3) [
            ReadWrite = 0b011,
            ReadOnly = 0b110
        ],
        XN OFFSET(28) NUMBITS(1) []
    ]
}

/// One hardware region descriptor pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RawRegion {
    pub rbar: u32,
    pub rasr: u32,
}

static_assertions::const_assert!(REGION_NUM.is_power_of_two());
static_assertions::const_assert_eq!(core::mem::size_of::<RawRegion>(), 8);

impl RawRegion {
    pub const EMPTY: RawRegion = RawRegion { rbar: 0, rasr: 0 };
}

const ATTR_AP_RW: u32 = 0b011 << 24;
const ATTR_AP_RO: u32 = 0b110 << 24;
const ATTR_XN: u32 = 1 << 28;
const ATTR_C: u32 = 1 << 17;
const ATTR_B: u32 = 1 << 16;

const fn attr_bits(write: bool, exec: bool, cache: bool, buffer: bool) -> u32 {
    let mut bits = if write { ATTR_AP_RW } else { ATTR_AP_RO };
    if !exec {
        bits |= ATTR_XN;
    }
    if cache {
        bits |= ATTR_C;
    }
    if buffer {
        bits |= ATTR_B;
    }
    bits
}

/// Forward translation: logical `(READ, WRITE, EXECUTE, CACHE, BUFFER)`
/// index to descriptor attribute bits. Entries without READ stay zero; a
/// mapping without read permission is never installed.
pub const FORWARD: [u32; 32] = {
    let mut table = [0u32; 32];
    let mut index = 0;
    while index < 32 {
        if index & 0b00001 != 0 {
            table[index] = attr_bits(
                index & 0b00010 != 0,
                index & 0b00100 != 0,
                index & 0b01000 != 0,
                index & 0b10000 != 0,
            );
        }
        index += 1;
    }
    table
};

/// Reverse translation: `(writable, execute-never, cacheable, bufferable)`
/// recovered from descriptor bits back to logical flag bits.
pub const REVERSE: [Word; 16] = {
    let mut table = [0 as Word; 16];
    let mut index = 0;
    while index < 16 {
        let mut bits = MapFlags::READ.bits();
        if index & 0b0001 != 0 {
            bits |= MapFlags::WRITE.bits();
        }
        if index & 0b0010 == 0 {
            bits |= MapFlags::EXECUTE.bits();
        }
        if index & 0b0100 != 0 {
            bits |= MapFlags::CACHE.bits();
        }
        if index & 0b1000 != 0 {
            bits |= MapFlags::BUFFER.bits();
        }
        table[index] = bits;
        index += 1;
    }
    table
};

/// Translate logical flags into descriptor attribute bits.
pub fn attrs_encode(flags: MapFlags) -> u32 {
    FORWARD[flags.bits() & 0b11111]
}

/// Recover logical flags from a descriptor settings word.
pub fn attrs_decode(rasr: u32) -> MapFlags {
    let reg = LocalRegisterCopy::<u32, RASR::Register>::new(rasr);
    let writable = reg.read(RASR::AP) == 0b011;
    let xn = reg.read(RASR::XN) != 0;
    let cache = reg.read(RASR::C) != 0;
    let buffer = reg.read(RASR::B) != 0;
    let index =
        writable as usize | (xn as usize) << 1 | (cache as usize) << 2 | (buffer as usize) << 3;
    MapFlags::from_bits_truncate(REVERSE[index])
}

/// Build a region descriptor for `2^total_order` bytes at `base`.
///
/// `enabled_eighths` selects the present subregions; anything but `0xFF`
/// requires the region to be at least `2^SRD_ORDER_MIN` bytes.
pub fn region_encode(
    base: Word,
    total_order: u32,
    enabled_eighths: u8,
    flags: MapFlags,
    slot: usize,
) -> Result<RawRegion, HalError> {
    if !(TOTAL_ORDER_MIN..=TOTAL_ORDER_MAX).contains(&total_order) {
        return Err(HalError::Rejected);
    }
    if enabled_eighths != 0xFF && total_order < SRD_ORDER_MIN {
        return Err(HalError::Rejected);
    }
    if slot >= REGION_NUM {
        return Err(HalError::Rejected);
    }
    let span_mask = if total_order == TOTAL_ORDER_MAX {
        Word::MAX
    } else {
        (1 << total_order) - 1
    };
    if base & span_mask != 0 {
        return Err(HalError::Rejected);
    }

    let mut rbar = LocalRegisterCopy::<u32, RBAR::Register>::new(0);
    rbar.write(
        RBAR::ADDR.val((base as u32) >> 5) + RBAR::VALID::SET + RBAR::REGION.val(slot as u32),
    );

    let mut rasr = LocalRegisterCopy::<u32, RASR::Register>::new(attrs_encode(flags));
    rasr.modify(
        RASR::ENABLE::SET
            + RASR::SIZE.val(total_order - 1)
            + RASR::SRD.val(!enabled_eighths as u32),
    );

    Ok(RawRegion {
        rbar: rbar.get(),
        rasr: rasr.get(),
    })
}

/// Is this descriptor live?
pub fn region_enabled(region: &RawRegion) -> bool {
    region.rasr & 1 != 0
}

/// Base address covered by the descriptor.
pub fn region_base(region: &RawRegion) -> Word {
    (region.rbar & !0x1F) as Word
}

/// Total order (log2 bytes) covered by the descriptor.
pub fn region_total_order(region: &RawRegion) -> u32 {
    let reg = LocalRegisterCopy::<u32, RASR::Register>::new(region.rasr);
    reg.read(RASR::SIZE) + 1
}

/// Present subregions as an eighth-mask.
pub fn region_enabled_eighths(region: &RawRegion) -> u8 {
    let reg = LocalRegisterCopy::<u32, RASR::Register>::new(region.rasr);
    !(reg.read(RASR::SRD) as u8)
}

/// Logical flags carried by the descriptor.
pub fn region_flags(region: &RawRegion) -> MapFlags {
    attrs_decode(region.rasr)
}
