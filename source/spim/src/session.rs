//! The per-unit state shared between handles and the unit's interrupt.
use core::{ptr::NonNull, task::Waker};

use embedded_hal::spi::{Mode, Phase, Polarity};
use mt3620::spi::{
    DmaConfig, Scsr, Smmr, Stcsr, BUFFER_SIZE_HALF_DUPLEX, BUS_SPEED_MIN_MODE0, HCLK_HZ,
    RS_CLK_SEL_MAX, RS_CLK_SEL_MIN,
};

use crate::{
    exec,
    glob::{self, GlobPolicy, Globs},
    ChipSelect, Error, Port, SpimSettings, Transfer,
};

/// Everything one SPI master needs between calls: the port, the register
/// image it is programmed from, and the transfer sequence in flight.
pub(crate) struct Session<P> {
    port: P,
    open: bool,
    dma: bool,
    policy: GlobPolicy,
    config: DmaConfig,
    globs: Globs,
    /// Index of the glob currently on the bus.
    current: usize,
    /// Bytes moved by the globs that have completed.
    total: usize,
    pending: Option<Pending>,
}

/// A transfer sequence that has been started and whose result has not yet
/// been collected.
struct Pending {
    transfers: RawTransfers,
    result: Option<Result<usize, Error>>,
    waker: Option<Waker>,
}

/// The caller's transfer list, held across interrupts.
///
/// Its lifetime is erased. Whoever started the sequence keeps the list
/// borrowed until the result is collected or the sequence is aborted.
struct RawTransfers(NonNull<[Transfer<'static>]>);

// Safety: the list is only accessed with the session locked.
unsafe impl Send for RawTransfers {}

// === impl Session ===

impl<P: Port> Session<P> {
    pub(crate) const fn new(port: P) -> Self {
        Self {
            port,
            open: false,
            dma: false,
            policy: GlobPolicy {
                half_duplex_writes: false,
            },
            config: DmaConfig::new(),
            globs: Globs::new(),
            current: 0,
            total: 0,
            pending: None,
        }
    }

    /// Opens the unit with `settings`.
    ///
    /// The register image lives inside the session, and the port is told its
    /// address here, so the session must not move until it is closed.
    pub(crate) fn open(&mut self, settings: &SpimSettings) -> Result<(), Error> {
        if self.open {
            return Err(Error::Busy);
        }
        if settings.irq_priority > SpimSettings::IRQ_PRIORITY_MAX {
            return Err(Error::InvalidParameter);
        }

        let mut config = DmaConfig::new();
        config.stcsr.set(Stcsr::SPI_MASTER_START, true);
        self.config = config;
        self.policy = settings.glob_policy();
        self.globs.clear();
        self.pending = None;

        self.apply_chip_select(settings.chip_select);
        self.apply_mode(settings.mode(), settings.bus_speed_hz)?;

        self.port.enable_irq(settings.irq_priority);
        self.port.init(&self.config);
        self.dma = true;
        self.open = true;
        if !settings.dma {
            self.config_dma(false)?;
        }

        tracing::debug!(?settings, "SPI master opened");
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        if !self.open {
            return;
        }
        self.abort();
        self.port.shutdown();
        self.port.disable_irq();
        self.open = false;
        tracing::debug!("SPI master closed");
    }

    fn check_idle(&self) -> Result<(), Error> {
        if !self.open {
            return Err(Error::HandleClosed);
        }
        if self.pending.is_some() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    pub(crate) fn select(&mut self, chip_select: ChipSelect) -> Result<(), Error> {
        self.check_idle()?;
        self.apply_chip_select(chip_select);
        Ok(())
    }

    pub(crate) fn configure(&mut self, mode: Mode, bus_speed_hz: u32) -> Result<(), Error> {
        self.check_idle()?;
        self.apply_mode(mode, bus_speed_hz)
    }

    fn apply_chip_select(&mut self, chip_select: ChipSelect) {
        self.config
            .smmr
            .set(Smmr::RS_SLAVE_SEL, chip_select.bits());
    }

    fn apply_mode(&mut self, mode: Mode, bus_speed_hz: u32) -> Result<(), Error> {
        if bus_speed_hz == 0 {
            return Err(Error::InvalidParameter);
        }

        let cpol = mode.polarity == Polarity::IdleHigh;
        let cpha = mode.phase == Phase::CaptureOnSecondTransition;
        if !cpol && !cpha && bus_speed_hz < BUS_SPEED_MIN_MODE0 {
            return Err(Error::Unsupported);
        }

        // SPI_CLK = HCLK / (RS_CLK_SEL + 2), rounded so the bus is never
        // faster than requested.
        let rs_clk_sel = HCLK_HZ.div_ceil(bus_speed_hz).saturating_sub(2);
        if rs_clk_sel > RS_CLK_SEL_MAX {
            return Err(Error::Unsupported);
        }
        let rs_clk_sel = rs_clk_sel.max(RS_CLK_SEL_MIN);

        self.config
            .smmr
            .set(Smmr::CPOL, cpol)
            .set(Smmr::CPHA, cpha)
            .set(Smmr::RS_CLK_SEL, rs_clk_sel)
            .set(Smmr::MORE_BUF_MODE, true)
            .set(Smmr::LSB_FIRST, false)
            .set(Smmr::INT_EN, true);
        tracing::trace!(cpol, cpha, bus_speed_hz, rs_clk_sel, "SPI master configured");
        Ok(())
    }

    pub(crate) fn config_dma(&mut self, enabled: bool) -> Result<(), Error> {
        if !self.open {
            return Err(Error::HandleClosed);
        }
        if enabled == self.dma {
            return Ok(());
        }
        if self.pending.is_some() || self.port.dma_running() {
            return Err(Error::Busy);
        }
        self.port.set_dma_mode(enabled);
        self.dma = enabled;
        tracing::trace!(enabled, "SPI master DMA mode changed");
        Ok(())
    }

    pub(crate) fn set_glob_policy(&mut self, policy: GlobPolicy) -> Result<(), Error> {
        self.check_idle()?;
        self.policy = policy;
        Ok(())
    }

    /// Splits `transfers` into globs and starts the first one.
    ///
    /// # Safety
    ///
    /// `transfers` must stay borrowed, and must not be touched by the
    /// caller, until [`Session::take_result`] returns `Some` or
    /// [`Session::abort`] is called.
    pub(crate) unsafe fn start(&mut self, transfers: &mut [Transfer<'_>]) -> Result<(), Error> {
        self.check_idle()?;
        let globs = glob::build(transfers, self.policy)?;
        let first = globs.first().ok_or(Error::InvalidParameter)?;
        exec::launch(
            &mut self.port,
            &mut self.config,
            self.dma,
            first,
            transfers,
            self.policy,
        )?;

        tracing::debug!(
            transfers = transfers.len(),
            globs = globs.len(),
            dma = self.dma,
            "SPI transfer started"
        );
        let transfers = transfers as *mut [Transfer<'_>] as *mut [Transfer<'static>];
        self.pending = Some(Pending {
            transfers: RawTransfers(NonNull::new_unchecked(transfers)),
            result: None,
            waker: None,
        });
        self.globs = globs;
        self.current = 0;
        self.total = 0;
        Ok(())
    }

    /// Returns the result of the sequence in flight if it has finished,
    /// ending it. Otherwise, registers `waker` to be woken when it does.
    pub(crate) fn take_result(&mut self, waker: Option<&Waker>) -> Option<Result<usize, Error>> {
        let Some(pending) = self.pending.as_mut() else {
            // aborted out from under the caller by `close`.
            return Some(Err(Error::HandleClosed));
        };

        if let Some(result) = pending.result.take() {
            self.pending = None;
            self.globs.clear();
            return Some(result);
        }

        if let Some(waker) = waker {
            match pending.waker {
                Some(ref registered) if registered.will_wake(waker) => {}
                _ => pending.waker = Some(waker.clone()),
            }
        }
        None
    }

    /// Halts the sequence in flight, if any, and forgets it.
    pub(crate) fn abort(&mut self) {
        if let Some(pending) = self.pending.take() {
            if pending.result.is_none() {
                if self.dma {
                    self.port.stop_dma();
                }
                self.port.stop();
                let _ = self.port.status();
                tracing::debug!(
                    glob = self.current,
                    transferred = self.total,
                    "SPI transfer aborted"
                );
            }
        }
        self.globs.clear();
        self.current = 0;
        self.total = 0;
    }

    /// Handles the unit's transaction-complete interrupt.
    ///
    /// Collects the glob that just finished and starts the next one. Returns
    /// the waker to wake if that ended the sequence.
    pub(crate) fn on_interrupt(&mut self) -> Option<Waker> {
        let Some(pending) = self.pending.as_mut().filter(|p| p.result.is_none()) else {
            // nothing in flight; reading the status acknowledges the
            // interrupt.
            let _ = self.port.status();
            tracing::trace!("spurious SPI master interrupt");
            return None;
        };

        if self.dma {
            self.port.stop_dma();
        }
        let status = self.port.status();
        let failed = !status.get(Scsr::SPI_OK) || (self.dma && self.port.dma_remaining() != 0);

        // Safety: the list stays borrowed until `pending` is gone.
        let transfers = unsafe { pending.transfers.0.as_mut() };
        let result = match self.globs.get(self.current) {
            Some(_) if failed => Some(Err(Error::TransferFailed {
                transferred: self.total,
            })),
            Some(glob) => {
                self.total += glob.len();
                let mut sdir = [0; BUFFER_SIZE_HALF_DUPLEX];
                self.port.read_data(&mut sdir);
                exec::collect(&sdir, glob, transfers);
                self.current += 1;

                match self.globs.get(self.current) {
                    Some(next) => exec::launch(
                        &mut self.port,
                        &mut self.config,
                        self.dma,
                        next,
                        transfers,
                        self.policy,
                    )
                    .err()
                    .map(Err),
                    None => Some(Ok(self.total)),
                }
            }
            None => Some(Ok(self.total)),
        };

        let result = result?;
        match result {
            Ok(total) => tracing::debug!(total, globs = self.globs.len(), "SPI transfer complete"),
            Err(error) => tracing::warn!(%error, glob = self.current, "SPI transfer failed"),
        }
        pending.result = Some(result);
        pending.waker.take()
    }
}
