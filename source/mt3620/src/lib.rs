//! Register model for the MediaTek MT3620 real-time cores.
//!
//! This crate describes the parts of the MT3620's peripheral set that the
//! real-time (Cortex-M4F) cores drive directly: the ISU SPI masters and the
//! DMA channels that feed them, and the GPIO blocks. It only knows about
//! register *shapes*. Drivers built on top of it (such as `rtcore-spim`) own
//! the sequencing.
//!
//! Register layouts are described with [`mycelium_bitfield`], so that every
//! field has a documented offset and width and can be packed into a plain
//! `u32` without relying on the layout of C-style bitfield unions.
#![cfg_attr(not(test), no_std)]
// Unusual groupings are used in binary literals in this crate in order to
// separate the bits by which field they represent, rather than by their byte.
#![allow(clippy::unusual_byte_groupings)]

pub mod dma;
pub mod gpio;
pub mod mmio;
pub mod spi;
mod unit;

pub use self::{mmio::Mmio, unit::Unit};

/// Number of interrupt priority bits implemented by the real-time cores'
/// NVIC. Priorities run from `0` (highest) to `(1 << NVIC_PRIORITY_BITS) - 1`.
pub const NVIC_PRIORITY_BITS: u8 = 3;
