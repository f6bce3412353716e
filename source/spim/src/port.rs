//! The hardware underneath one SPI master.
//!
//! [`Port`] is everything the driver needs from a single ISU: its SPI
//! register file, the TX DMA channel that loads it, and its interrupt line.
//! [`Mt3620`] drives the real registers; tests use a simulated port instead.
use core::sync::atomic::{fence, Ordering};

use mt3620::{
    dma::{self, Con, Direction, Size, Start},
    spi::{self, Cspol, DmaConfig, Scsr, Smmr, Stcsr, BUFFER_SIZE_HALF_DUPLEX},
    Mmio,
};

/// One ISU SPI master, its TX DMA channel, and its interrupt.
///
/// Methods are called with the unit's session locked, so implementations
/// never race with the unit's own interrupt handler.
pub trait Port {
    /// Brings the SPI master and its DMA channel up. `config` is the register
    /// image that later transactions are loaded from; it does not move while
    /// the unit is open.
    fn init(&mut self, config: &DmaConfig);

    /// Stops the SPI master and the DMA channel, and disables the unit's
    /// interrupt output and DMA mode.
    fn shutdown(&mut self);

    /// Enables or disables register loads from the TX DMA channel.
    fn set_dma_mode(&mut self, enabled: bool);

    /// Returns whether the TX DMA channel is currently running.
    fn dma_running(&self) -> bool;

    /// Starts the TX DMA channel, which loads `config` into the register file
    /// and thereby starts the transaction.
    fn start_dma(&mut self, config: &DmaConfig);

    fn stop_dma(&mut self);

    /// Returns the number of words the TX DMA channel has not yet moved.
    fn dma_remaining(&self) -> u32;

    /// Copies `config` into the register file with the CPU and starts the
    /// transaction.
    fn load_and_start(&mut self, config: &DmaConfig);

    /// Aborts the transaction in progress, if any.
    fn stop(&mut self);

    /// Reads (and thereby clears) the transaction status.
    fn status(&mut self) -> Scsr;

    /// Reads the data-in buffer.
    fn read_data(&self, buf: &mut [u8; BUFFER_SIZE_HALF_DUPLEX]);

    fn enable_irq(&mut self, priority: u8);

    fn disable_irq(&mut self);
}

/// An MT3620 ISU SPI master.
#[derive(Debug)]
pub struct Mt3620 {
    index: usize,
    spi: Mmio,
    dma: Mmio,
    dma_global: Mmio,
}

// === impl Mt3620 ===

impl Mt3620 {
    /// Returns the port for ISU `index`.
    ///
    /// # Safety
    ///
    /// - This must only be used on an MT3620 real-time core that has been
    ///   granted ISU `index` and its TX DMA channel.
    /// - Only one `Mt3620` may exist for each ISU.
    /// - The [`DmaConfig`] later passed to [`Port::init`] must be in
    ///   [SYSRAM](dma::SYSRAM), since the DMA engine reads it from there.
    #[must_use]
    pub const unsafe fn new(index: usize) -> Self {
        Self {
            index,
            spi: Mmio::new(spi::base(index)),
            dma: Mmio::new(dma::channel_base(spi::dma_tx_channel(index))),
            dma_global: Mmio::new(dma::GLOBAL_BASE),
        }
    }

    fn channel_mask(&self) -> u32 {
        1 << spi::dma_tx_channel(self.index)
    }

    fn set_start(&mut self, start: bool) {
        let mask = Stcsr::new().with(Stcsr::SPI_MASTER_START, true).bits();
        unsafe {
            if start {
                self.spi.set_bits(spi::reg::STCSR, mask);
            } else {
                self.spi.clear_bits(spi::reg::STCSR, mask);
            }
        }
    }
}

impl Port for Mt3620 {
    fn init(&mut self, config: &DmaConfig) {
        let addr = config as *const DmaConfig as usize;
        if !dma::is_reachable(addr, core::mem::size_of::<DmaConfig>()) {
            tracing::warn!(
                isu = self.index,
                addr = format_args!("{addr:#010x}"),
                "SPI master register image is outside SYSRAM; DMA transfers will load garbage"
            );
        }

        let con = Con::new()
            .with(Con::SIZE, Size::Word)
            .with(Con::SINC, true)
            .with(Con::DINC, false)
            .with(Con::DREQ, false)
            .with(Con::DIR, Direction::MemToPeriph)
            .with(Con::ITEN, false)
            .with(Con::HITEN, false);
        unsafe {
            self.dma_global
                .write(dma::global::CH_EN_SET, self.channel_mask());
            self.dma.write(dma::reg::START, 0);
            self.dma.write(dma::reg::CON, con.bits());
            self.dma.write(
                dma::reg::FIXADDR,
                (self.spi.base() + spi::reg::DATAPORT) as u32,
            );
            self.dma.write(dma::reg::PGMADDR, addr as u32);
        }

        self.set_dma_mode(true);

        // idle the data lines high until the first transaction.
        unsafe {
            let sdor = self.spi.offset(spi::reg::SDOR);
            for word in 0..BUFFER_SIZE_HALF_DUPLEX / 4 {
                sdor.write(word * 4, u32::MAX);
            }
            self.spi.write(spi::reg::SOAR, u32::MAX);
        }
        self.set_start(false);
        let _ = self.status();
    }

    fn shutdown(&mut self) {
        unsafe {
            self.dma_global
                .write(dma::global::CH_EN_CLR, self.channel_mask());
        }
        self.set_start(false);
        unsafe {
            self.spi.clear_bits(
                spi::reg::SMMR,
                Smmr::new().with(Smmr::INT_EN, true).bits(),
            );
        }
        self.set_dma_mode(false);
    }

    fn set_dma_mode(&mut self, enabled: bool) {
        let mask = Cspol::new().with(Cspol::DMA_MODE, true).bits();
        unsafe {
            if enabled {
                self.spi.set_bits(spi::reg::CSPOL, mask);
            } else {
                self.spi.clear_bits(spi::reg::CSPOL, mask);
            }
        }
    }

    fn dma_running(&self) -> bool {
        Start::from_bits(unsafe { self.dma.read(dma::reg::START) }).get(Start::STR)
    }

    fn start_dma(&mut self, config: &DmaConfig) {
        // ensure the register image is written out before the DMA engine
        // reads it.
        fence(Ordering::SeqCst);
        unsafe {
            self.dma
                .write(dma::reg::PGMADDR, config as *const DmaConfig as usize as u32);
            self.dma.write(dma::reg::COUNT, DmaConfig::WORDS as u32);
            self.dma.modify(dma::reg::START, |bits| {
                Start::from_bits(bits).with(Start::STR, true).bits()
            });
        }
    }

    fn stop_dma(&mut self) {
        unsafe {
            self.dma.modify(dma::reg::START, |bits| {
                Start::from_bits(bits).with(Start::STR, false).bits()
            });
        }
        fence(Ordering::SeqCst);
    }

    fn dma_remaining(&self) -> u32 {
        unsafe { self.dma.read(dma::reg::RLCT) }
    }

    fn load_and_start(&mut self, config: &DmaConfig) {
        let words = config.to_words();
        unsafe {
            for (i, word) in words[..DmaConfig::REGISTER_WORDS].iter().enumerate() {
                self.spi.write(spi::reg::SOAR + i * 4, *word);
            }
            self.spi.write(spi::reg::STCSR, config.stcsr.bits());
        }
    }

    fn stop(&mut self) {
        self.set_start(false);
    }

    fn status(&mut self) -> Scsr {
        Scsr::from_bits(unsafe { self.spi.read(spi::reg::SCSR) })
    }

    fn read_data(&self, buf: &mut [u8; BUFFER_SIZE_HALF_DUPLEX]) {
        let sdir = self.spi.offset(spi::reg::SDIR);
        for (i, chunk) in buf.chunks_exact_mut(4).enumerate() {
            let word = unsafe { sdir.read(i * 4) };
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    fn enable_irq(&mut self, priority: u8) {
        nvic::enable(spi::interrupt(self.index), priority);
    }

    fn disable_irq(&mut self) {
        nvic::disable(spi::interrupt(self.index));
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod nvic {
    use cortex_m::{interrupt::InterruptNumber, peripheral::NVIC, Peripherals};

    use mt3620::NVIC_PRIORITY_BITS;

    #[derive(Copy, Clone)]
    struct Irq(u16);

    unsafe impl InterruptNumber for Irq {
        fn number(self) -> u16 {
            self.0
        }
    }

    pub(super) fn enable(irq: u16, priority: u8) {
        unsafe {
            let mut peripherals = Peripherals::steal();
            peripherals
                .NVIC
                .set_priority(Irq(irq), priority << (8 - NVIC_PRIORITY_BITS));
            NVIC::unpend(Irq(irq));
            NVIC::unmask(Irq(irq));
        }
    }

    pub(super) fn disable(irq: u16) {
        NVIC::mask(Irq(irq));
    }
}

// there is no NVIC off-target.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
mod nvic {
    pub(super) fn enable(irq: u16, priority: u8) {
        tracing::trace!(irq, priority, "NVIC enable (no-op)");
    }

    pub(super) fn disable(irq: u16) {
        tracing::trace!(irq, "NVIC disable (no-op)");
    }
}
