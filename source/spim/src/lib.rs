//! SPI master driver for the ISU blocks of the MT3620 real-time cores.
//!
//! A [`Registry`] owns the six ISU SPI masters. [`Registry::open`] claims one
//! of them and returns a [`SpiMaster`] handle, which runs sequences of
//! [`Transfer`]s against the bus.
//!
//! The ISU SPI master can only move 32 bytes per hardware transaction (16 in
//! each direction when running full duplex), and releases chip select
//! between transactions. The driver therefore packs each sequence of
//! transfers into as few transactions ("globs", see the [`glob`] module) as
//! the buffers allow, and runs them back to back from the unit's interrupt:
//! each completion copies out the received bytes and starts the next
//! transaction, loading its whole register image with a single DMA request.
//!
//! ```ignore
//! // the DMA engine loads transactions from the registry, so it must be in
//! // system RAM.
//! #[link_section = ".sysram"]
//! static SPIM: spim::Registry = unsafe { spim::Registry::mt3620() };
//! spim::isu_spim_interrupts!(SPIM);
//!
//! let mut spi = SPIM.open(spim::Unit::Isu1)?;
//! let mut id = [0; 3];
//! // read a JEDEC ID: one full-duplex transaction.
//! spi.write_then_read_blocking(&[0x9F], &mut id)?;
//! ```
#![cfg_attr(not(any(test, feature = "sim")), no_std)]

mod error;
mod exec;
pub mod glob;
mod master;
pub mod port;
mod registry;
mod session;
mod settings;
mod transfer;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(test)]
mod tests;

pub use self::{
    error::Error,
    glob::{GlobKind, GlobPolicy},
    master::SpiMaster,
    port::Port,
    registry::Registry,
    settings::{ChipSelect, SpimSettings},
    transfer::Transfer,
};
pub use mt3620::Unit;
