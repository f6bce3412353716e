//! General DMA controller registers.
//!
//! Only the pieces needed to run a memory-to-peripheral transfer on a
//! "full size" channel are described here.
use core::ops::Range;

use mycelium_bitfield::{bitfield, enum_from_bits};

/// The real-time core's system RAM, the only memory the DMA engine can read
/// on the core's behalf. Anything a channel is pointed at with `PGMADDR`
/// must live here (`#[link_section = ".sysram"]`), not in TCM.
pub const SYSRAM: Range<usize> = 0x2200_0000..0x2201_0000;

/// Global DMA registers.
pub const GLOBAL_BASE: usize = 0x2108_0000;

const CHANNEL0_BASE: usize = GLOBAL_BASE + 0x100;
const CHANNEL_STRIDE: usize = 0x100;

/// Returns the base address of DMA channel `channel`.
#[must_use]
pub const fn channel_base(channel: usize) -> usize {
    CHANNEL0_BASE + channel * CHANNEL_STRIDE
}

/// Returns whether the `len` bytes at `addr` can be read by the DMA engine.
#[must_use]
pub fn is_reachable(addr: usize, len: usize) -> bool {
    addr >= SYSRAM.start && addr.checked_add(len).is_some_and(|end| end <= SYSRAM.end)
}

/// Global register offsets from [`GLOBAL_BASE`].
pub mod global {
    /// Writing a `1` bit enables the corresponding channel.
    pub const CH_EN_SET: usize = 0x30;
    /// Writing a `1` bit disables the corresponding channel.
    pub const CH_EN_CLR: usize = 0x34;
}

/// Channel register offsets from [`channel_base`].
pub mod reg {
    /// Number of transfer units.
    pub const COUNT: usize = 0x10;
    pub const CON: usize = 0x14;
    pub const START: usize = 0x18;
    /// Remaining transfer units.
    pub const RLCT: usize = 0x24;
    /// Memory-side address.
    pub const PGMADDR: usize = 0x2C;
    /// Peripheral-side address.
    pub const FIXADDR: usize = 0x30;
}

enum_from_bits! {
    #[derive(Debug, Eq, PartialEq)]
    #[cfg_attr(test, derive(proptest_derive::Arbitrary))]
    pub enum Size<u8> {
        Byte = 0b00,
        HalfWord = 0b01,
        Word = 0b10,
    }
}

enum_from_bits! {
    #[derive(Debug, Eq, PartialEq)]
    #[cfg_attr(test, derive(proptest_derive::Arbitrary))]
    pub enum Direction<u8> {
        /// `PGMADDR` is the source, `FIXADDR` the destination.
        MemToPeriph = 0,
        /// `FIXADDR` is the source, `PGMADDR` the destination.
        PeriphToMem = 1,
    }
}

bitfield! {
    /// Register `DMA_CON`: channel control.
    pub struct Con<u32> {
        /// Size of each transfer unit.
        pub const SIZE: Size;
        /// Increment the memory-side address after each unit.
        pub const SINC: bool;
        /// Increment the peripheral-side address after each unit.
        pub const DINC: bool;
        /// Wait for the peripheral's request line before each unit.
        pub const DREQ: bool;
        const _RESERVED_0 = 3;
        /// Wrap-point select.
        pub const WPSD: bool;
        /// Wrap-point enable.
        pub const WPEN: bool;
        pub const DIR: Direction;
        const _RESERVED_1 = 4;
        /// Half-count interrupt enable.
        pub const HITEN: bool;
        /// Completion interrupt enable.
        pub const ITEN: bool;
    }
}

bitfield! {
    /// Register `DMA_START`.
    pub struct Start<u32> {
        const _RESERVED_0 = 15;
        /// Channel running. Writing `0` stops the channel.
        pub const STR: bool;
    }
}
