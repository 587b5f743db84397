/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vigil@metta.systems>
 */

//! Platform adapter library for the Vigil microkernel.
//!
//! The kernel core (`nucleus`) is architecture-neutral; everything it needs
//! from the machine (interrupt masking, barriers, CPU identity, protection
//! hardware programming, privileged register pokes) comes through the
//! [`platform::Platform`] trait defined here, together with the register
//! context layout and the MPU region descriptor encoding.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::enum_variant_names)]
#![deny(warnings)]

pub mod context;
pub mod hosted;
pub mod mpu;
pub mod platform;

/// Native machine word. All kernel bookkeeping is word-granular.
pub type Word = usize;

/// Width of [`Word`] in bits.
pub const WORD_BITS: u32 = Word::BITS;

/// Version string.
pub fn version() -> &'static str {
    concat!(
        env!("CARGO_PKG_NAME"),
        " version ",
        env!("CARGO_PKG_VERSION")
    )
}
