//! A simulated [`Port`], for running the driver on the host.
//!
//! A [`SimPort`] records every transaction it is asked to start, and
//! "completes" each one immediately: the interrupt is raised, and `SDIR` is
//! filled from a queue of bytes the test supplies. Something must still call
//! [`Registry::handle_interrupt`](crate::Registry::handle_interrupt) when
//! [`SimPort::take_irq`] reports a pending interrupt, standing in for the
//! NVIC.
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use mt3620::spi::{
    DmaConfig, Scsr, Smbcr, Smmr, BUFFER_SIZE_HALF_DUPLEX, FULL_DUPLEX_RX_OFFSET, SPI_COUNT,
};

use crate::Port;

/// A simulated SPI master. Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct SimPort {
    state: Arc<Mutex<SimState>>,
}

/// Everything a [`SimPort`] has been asked to do.
#[derive(Debug, Default)]
pub struct SimState {
    /// Transactions started, oldest first.
    pub launches: Vec<Launch>,
    pub initialized: bool,
    pub shut_down: bool,
    pub dma_mode: bool,
    pub dma_running: bool,
    /// The priority the interrupt was enabled with, while it is enabled.
    pub irq_enabled: Option<u8>,
    /// Number of times a transaction was stopped.
    pub stops: usize,
    irq_pending: bool,
    ok: bool,
    hold: bool,
    fail_launch: Option<usize>,
    dma_residual: Option<(usize, u32)>,
    miso: VecDeque<u8>,
    sdir: [u8; BUFFER_SIZE_HALF_DUPLEX],
}

/// One transaction, as it was loaded into the SPI master.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Launch {
    pub config: DmaConfig,
    /// Whether the image was loaded by DMA, rather than by the CPU.
    pub dma: bool,
}

// === impl SimPort ===

impl SimPort {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns one port per ISU.
    #[must_use]
    pub fn array() -> [Self; SPI_COUNT] {
        core::array::from_fn(|_| Self::new())
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues bytes to be clocked in on MISO by later transactions.
    pub fn queue_miso(&self, bytes: &[u8]) {
        self.state().miso.extend(bytes.iter().copied());
    }

    /// Makes the `index`th transaction (counting from zero) report failure.
    pub fn fail_launch(&self, index: usize) {
        self.state().fail_launch = Some(index);
    }

    /// Makes the DMA channel report `words` untransferred after the
    /// `index`th transaction.
    pub fn set_dma_residual(&self, index: usize, words: u32) {
        self.state().dma_residual = Some((index, words));
    }

    /// While held, transactions start but never finish.
    pub fn hold(&self, hold: bool) {
        self.state().hold = hold;
    }

    /// Returns whether the interrupt is pending and enabled, clearing it.
    pub fn take_irq(&self) -> bool {
        let mut state = self.state();
        let fire = state.irq_pending && state.irq_enabled.is_some();
        if fire {
            state.irq_pending = false;
        }
        fire
    }

    fn launch(&mut self, config: &DmaConfig, dma: bool) {
        let mut guard = self.state();
        let state = &mut *guard;
        let index = state.launches.len();
        state.launches.push(Launch {
            config: config.clone(),
            dma,
        });
        state.dma_running = dma;

        let rx_len = (config.smbcr.get(Smbcr::MISO_BIT_CNT) / 8) as usize;
        let rx_start = if config.smmr.get(Smmr::BOTH_DIRECTIONAL_DATA_MODE) {
            FULL_DUPLEX_RX_OFFSET
        } else {
            0
        };
        state.sdir = [0xFF; BUFFER_SIZE_HALF_DUPLEX];
        for i in rx_start..(rx_start + rx_len).min(BUFFER_SIZE_HALF_DUPLEX) {
            state.sdir[i] = state.miso.pop_front().unwrap_or(0xFF);
        }

        state.ok = state.fail_launch != Some(index);
        if !state.hold && config.smmr.get(Smmr::INT_EN) {
            state.irq_pending = true;
        }
    }
}

impl Port for SimPort {
    fn init(&mut self, _config: &DmaConfig) {
        let mut state = self.state();
        state.initialized = true;
        state.shut_down = false;
        state.dma_mode = true;
    }

    fn shutdown(&mut self) {
        let mut state = self.state();
        state.shut_down = true;
        state.dma_mode = false;
        state.dma_running = false;
    }

    fn set_dma_mode(&mut self, enabled: bool) {
        self.state().dma_mode = enabled;
    }

    fn dma_running(&self) -> bool {
        self.state().dma_running
    }

    fn start_dma(&mut self, config: &DmaConfig) {
        self.launch(config, true);
    }

    fn stop_dma(&mut self) {
        self.state().dma_running = false;
    }

    fn dma_remaining(&self) -> u32 {
        let state = self.state();
        match state.dma_residual {
            Some((index, words)) if index + 1 == state.launches.len() => words,
            _ => 0,
        }
    }

    fn load_and_start(&mut self, config: &DmaConfig) {
        self.launch(config, false);
    }

    fn stop(&mut self) {
        let mut state = self.state();
        state.stops += 1;
        state.irq_pending = false;
    }

    fn status(&mut self) -> Scsr {
        let mut state = self.state();
        let status = Scsr::new().with(Scsr::SPI_OK, state.ok);
        state.ok = false;
        status
    }

    fn read_data(&self, buf: &mut [u8; BUFFER_SIZE_HALF_DUPLEX]) {
        *buf = self.state().sdir;
    }

    fn enable_irq(&mut self, priority: u8) {
        self.state().irq_enabled = Some(priority);
    }

    fn disable_irq(&mut self) {
        let mut state = self.state();
        state.irq_enabled = None;
        state.irq_pending = false;
    }
}

// === impl Launch ===

impl Launch {
    /// The opcode bytes shifted out of `SOAR`, in bus order.
    #[must_use]
    pub fn opcode(&self) -> Vec<u8> {
        let len = (self.config.smbcr.get(Smbcr::CMD_BIT_CNT) / 8) as usize;
        let bytes = self.config.soar.to_be_bytes();
        bytes[bytes.len() - len..].to_vec()
    }

    /// The payload bytes shifted out of `SDOR`.
    #[must_use]
    pub fn mosi(&self) -> &[u8] {
        let len = (self.config.smbcr.get(Smbcr::MOSI_BIT_CNT) / 8) as usize;
        &self.config.sdor[..len]
    }

    #[must_use]
    pub fn is_full_duplex(&self) -> bool {
        self.config.smmr.get(Smmr::BOTH_DIRECTIONAL_DATA_MODE)
    }

    /// The chip-select line the transaction drove.
    #[must_use]
    pub fn chip_select(&self) -> u32 {
        self.config.smmr.get(Smmr::RS_SLAVE_SEL)
    }
}
