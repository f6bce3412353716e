//! ISU SPI master registers.
//!
//! Each ISU block contains a SPI master at offset `0x300`. Its first
//! thirteen words (`SOAR` through `STCSR`) can be loaded in one go by the
//! ISU's TX DMA channel from a [`DmaConfig`] image in system RAM, which is how
//! a whole transaction is set up and started with a single DMA request.
use mycelium_bitfield::bitfield;

/// Number of ISU SPI masters.
pub const SPI_COUNT: usize = 6;

/// Size of `SDOR`/`SDIR` when the master runs in half-duplex mode.
pub const BUFFER_SIZE_HALF_DUPLEX: usize = 32;

/// Size of `SDOR`/`SDIR` available to each direction in full-duplex mode.
pub const BUFFER_SIZE_FULL_DUPLEX: usize = 16;

/// Number of opcode bytes (`SOAR`) sent ahead of a full-duplex payload.
pub const OPCODE_SIZE_FULL_DUPLEX: usize = 4;

/// Byte offset into `SDIR` at which full-duplex received data starts.
pub const FULL_DUPLEX_RX_OFFSET: usize = BUFFER_SIZE_HALF_DUPLEX - BUFFER_SIZE_FULL_DUPLEX;

/// The SPI block's input clock.
pub const HCLK_HZ: u32 = 79_040_000;

/// Bus clock used when a unit is first opened.
pub const BUS_SPEED_2M: u32 = 2_000_000;

/// Slowest bus clock usable in SPI mode 0.
///
/// Below this speed the MT3620 SPI master misbehaves when both `CPOL` and
/// `CPHA` are clear.
pub const BUS_SPEED_MIN_MODE0: u32 = 250_000;

pub const RS_CLK_SEL_MIN: u32 = 0;
/// `RS_CLK_SEL` is 12 bits wide.
pub const RS_CLK_SEL_MAX: u32 = (1 << 12) - 1;

const ISU0_SPI_BASE: usize = 0x3807_0300;
const ISU_STRIDE: usize = 0x1_0000;

/// Interrupt number of ISU 0's SPI master; each following ISU is 4 higher.
const ISU0_SPI_IRQ: u16 = 47;

/// Returns the base address of SPI master `index`.
#[must_use]
pub const fn base(index: usize) -> usize {
    ISU0_SPI_BASE + index * ISU_STRIDE
}

/// Returns the NVIC interrupt number of SPI master `index`.
#[must_use]
pub const fn interrupt(index: usize) -> u16 {
    ISU0_SPI_IRQ + 4 * index as u16
}

/// Returns the DMA channel that feeds SPI master `index`'s register file.
#[must_use]
pub const fn dma_tx_channel(index: usize) -> usize {
    index * 2
}

/// Register offsets from [`base`].
pub mod reg {
    /// Opcode register.
    pub const SOAR: usize = 0x00;
    /// Data-out buffer, 8 words.
    pub const SDOR: usize = 0x04;
    /// Mode register.
    pub const SMMR: usize = 0x24;
    /// Bit-count register.
    pub const SMBCR: usize = 0x28;
    /// Transfer control/status register.
    pub const STCSR: usize = 0x30;
    /// Status register. Reading it clears the interrupt flag.
    pub const SCSR: usize = 0x34;
    /// Chip-select polarity and DMA mode.
    pub const CSPOL: usize = 0x38;
    /// Data-in buffer, 8 words.
    pub const SDIR: usize = 0x40;
    /// Port written by the TX DMA channel.
    pub const DATAPORT: usize = 0x100;
}

bitfield! {
    /// Register `SMMR`: SPI master mode.
    #[derive(PartialEq, Eq)]
    pub struct Smmr<u32> {
        const _RESERVED_0 = 2;
        /// Use the full 32-byte buffers rather than the legacy 4-byte ones.
        pub const MORE_BUF_MODE: bool;
        /// Shift data out LSB first.
        pub const LSB_FIRST: bool;
        /// Clock polarity.
        pub const CPOL: bool;
        /// Clock phase.
        pub const CPHA: bool;
        const _RESERVED_1 = 2;
        /// Serial clock divider: `SPI_CLK = HCLK / (RS_CLK_SEL + 2)`.
        pub const RS_CLK_SEL = 12;
        /// Full-duplex mode: `SDOR` and `SDIR` are each split in half.
        pub const BOTH_DIRECTIONAL_DATA_MODE: bool;
        const _RESERVED_2 = 3;
        /// Which chip-select line is driven during the transaction.
        pub const RS_SLAVE_SEL = 3;
        const _RESERVED_3 = 2;
        /// Raise the unit's interrupt when a transaction finishes.
        pub const INT_EN: bool;
    }
}

bitfield! {
    /// Register `SMBCR`: SPI master bit counts.
    #[derive(PartialEq, Eq)]
    pub struct Smbcr<u32> {
        /// Bits clocked out of `SDOR`.
        pub const MOSI_BIT_CNT = 9;
        const _RESERVED_0 = 3;
        /// Bits clocked into `SDIR`.
        pub const MISO_BIT_CNT = 9;
        const _RESERVED_1 = 3;
        /// Bits clocked out of `SOAR` before the payload.
        pub const CMD_BIT_CNT = 6;
    }
}

bitfield! {
    /// Register `STCSR`: SPI transfer control.
    #[derive(PartialEq, Eq)]
    pub struct Stcsr<u32> {
        /// Writing `1` starts a transaction; cleared when it completes.
        pub const SPI_MASTER_START: bool;
        const _RESERVED_0 = 7;
        /// Set while a transaction is in progress.
        pub const SPI_MASTER_BUSY: bool;
    }
}

bitfield! {
    /// Register `SCSR`: SPI status.
    pub struct Scsr<u32> {
        /// The last transaction completed successfully.
        pub const SPI_OK: bool;
        const _RESERVED_0 = 7;
        /// The last transaction was aborted.
        pub const SPI_ABORT: bool;
    }
}

bitfield! {
    /// Register `CSPOL`: chip-select polarity.
    pub struct Cspol<u32> {
        pub const CS_POLARITY0: bool;
        pub const CS_POLARITY1: bool;
        const _RESERVED_0 = 2;
        /// Accept register writes from the TX DMA channel.
        pub const DMA_MODE: bool;
    }
}

/// An image of the SPI master's register file, loaded by DMA or by the CPU
/// before each transaction.
///
/// The layout matches the hardware exactly, from `SOAR` up to and including
/// `STCSR`, so the DMA engine can copy it word for word.
#[derive(Clone, Debug, Eq, PartialEq)]
#[repr(C, align(4))]
pub struct DmaConfig {
    pub soar: u32,
    pub sdor: [u8; BUFFER_SIZE_HALF_DUPLEX],
    pub smmr: Smmr,
    pub smbcr: Smbcr,
    _reserved: u32,
    pub stcsr: Stcsr,
}

const _: () = assert!(core::mem::size_of::<DmaConfig>() == DmaConfig::WORDS * 4);

impl DmaConfig {
    /// Size of the image, in words.
    pub const WORDS: usize = 13;

    /// Number of words from `SOAR` to `SMBCR`, which are copied into the
    /// register file directly when DMA is disabled. `STCSR` is written
    /// separately, last, to start the transaction.
    pub const REGISTER_WORDS: usize = 11;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            soar: 0,
            sdor: [0; BUFFER_SIZE_HALF_DUPLEX],
            smmr: Smmr::new(),
            smbcr: Smbcr::new(),
            _reserved: 0,
            stcsr: Stcsr::new(),
        }
    }

    /// Returns the image as the words the hardware will see.
    #[must_use]
    pub fn to_words(&self) -> [u32; Self::WORDS] {
        let mut words = [0; Self::WORDS];
        words[0] = self.soar;
        for (word, bytes) in words[1..9].iter_mut().zip(self.sdor.chunks_exact(4)) {
            *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        words[9] = self.smmr.bits();
        words[10] = self.smbcr.bits();
        words[12] = self.stcsr.bits();
        words
    }
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self::new()
    }
}
