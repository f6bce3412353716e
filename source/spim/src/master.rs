use core::task::Poll;

use embedded_hal::spi::Mode;
use futures::future::poll_fn;
use mt3620::Unit;

use crate::{
    registry::Slot,
    session::Session,
    ChipSelect, Error, GlobPolicy, Port, Transfer,
};

/// An open ISU SPI master.
///
/// Returned by [`Registry::open`](crate::Registry::open). The unit stays open
/// until the handle is dropped (or [closed](SpiMaster::close)), and cannot be
/// opened again in the meantime.
///
/// Transfers come in two flavors. The `async` methods return once the unit's
/// interrupt reports the last transaction done; the `_blocking` methods put
/// the core to sleep between interrupts instead. Either way, a sequence of
/// transfers is split into as few hardware transactions as the SPI buffers
/// allow, and the transactions are run back to back from the interrupt.
pub struct SpiMaster<'r, P: Port> {
    slot: &'r Slot<P>,
    unit: Unit,
}

impl<'r, P: Port> SpiMaster<'r, P> {
    pub(crate) fn new(slot: &'r Slot<P>, unit: Unit) -> Self {
        Self { slot, unit }
    }

    #[must_use]
    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Selects the chip-select line driven by subsequent transfers.
    ///
    /// # Errors
    ///
    /// - [`Error::Busy`] if a transfer is in flight.
    #[tracing::instrument(level = "debug", skip(self), fields(unit = ?self.unit), err(Debug))]
    pub fn select(&mut self, chip_select: ChipSelect) -> Result<(), Error> {
        self.slot.with(|session| session.select(chip_select))
    }

    /// Sets the SPI mode and bus clock.
    ///
    /// The bus clock is divided down from the SPI block's 79.04 MHz input, so
    /// the actual speed is the fastest one not above `bus_speed_hz`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] if `bus_speed_hz` is zero.
    /// - [`Error::Unsupported`] if `bus_speed_hz` is too slow for the clock
    ///   divider, or is below 250 kHz in mode 0.
    /// - [`Error::Busy`] if a transfer is in flight.
    #[tracing::instrument(level = "debug", skip(self), fields(unit = ?self.unit), err(Debug))]
    pub fn configure(&mut self, mode: Mode, bus_speed_hz: u32) -> Result<(), Error> {
        self.slot
            .with(|session| session.configure(mode, bus_speed_hz))
    }

    /// Enables or disables loading transactions into the SPI master by DMA.
    ///
    /// With DMA disabled, the CPU copies each transaction's register image
    /// into the SPI master itself.
    ///
    /// # Errors
    ///
    /// - [`Error::Busy`] if a transfer is in flight, or the DMA channel is
    ///   still running.
    #[tracing::instrument(level = "debug", skip(self), fields(unit = ?self.unit), err(Debug))]
    pub fn config_dma(&mut self, enabled: bool) -> Result<(), Error> {
        self.slot.with(|session| session.config_dma(enabled))
    }

    /// # Errors
    ///
    /// - [`Error::Busy`] if a transfer is in flight.
    pub fn set_glob_policy(&mut self, policy: GlobPolicy) -> Result<(), Error> {
        self.slot.with(|session| session.set_glob_policy(policy))
    }

    /// Closes the unit, so that it can be opened again.
    pub fn close(self) {
        drop(self);
    }

    /// Runs `transfers` in order, returning the number of bytes transferred.
    ///
    /// Consecutive transfers are globbed into hardware transactions; the
    /// chip-select line is released between transactions, but not between
    /// the transfers in one. A write of up to four bytes followed by reads
    /// (or more writes) becomes one full-duplex transaction, with the write
    /// sent as the opcode.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] if `transfers` is empty or any transfer
    ///   is empty.
    /// - [`Error::Unsupported`] if a transfer both writes and reads, a
    ///   transfer is too long, or the sequence needs more than
    ///   [`MAX_GLOBS`](crate::glob::MAX_GLOBS) transactions.
    /// - [`Error::Busy`] if another transfer is in flight.
    /// - [`Error::TransferFailed`] if the hardware reports an error. Read
    ///   buffers of transactions that completed before the failure have been
    ///   filled.
    ///
    /// # Safety
    ///
    /// The SPI master writes into the read buffers in `transfers` from its
    /// interrupt, until this future completes. Dropping the future before
    /// then halts the transfer, after which the buffers may be reused. The
    /// future must **not** be leaked (for example, with
    /// [`core::mem::forget`]) once it has been polled: the interrupt would go
    /// on writing to buffers that no longer belong to it.
    pub async unsafe fn transfer_sequential(
        &mut self,
        transfers: &mut [Transfer<'_>],
    ) -> Result<usize, Error> {
        /// Drop guard halting the transfer if the future is cancelled.
        struct DefinitelyStop<'r, P: Port>(&'r Slot<P>);
        impl<P: Port> Drop for DefinitelyStop<'_, P> {
            fn drop(&mut self) {
                self.0.with(Session::abort)
            }
        }

        self.slot.with(|session| session.start(transfers))?;
        let _cancel = DefinitelyStop(self.slot);

        poll_fn(|cx| {
            match self
                .slot
                .with(|session| session.take_result(Some(cx.waker())))
            {
                Some(result) => Poll::Ready(result),
                None => Poll::Pending,
            }
        })
        .await
    }

    /// Writes `data`.
    ///
    /// # Errors
    ///
    /// See [`SpiMaster::transfer_sequential`].
    ///
    /// # Safety
    ///
    /// See [`SpiMaster::transfer_sequential`].
    pub async unsafe fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        let mut transfers = [Transfer::write(data)];
        self.transfer_sequential(&mut transfers).await
    }

    /// Reads into `buf`.
    ///
    /// # Errors
    ///
    /// See [`SpiMaster::transfer_sequential`].
    ///
    /// # Safety
    ///
    /// See [`SpiMaster::transfer_sequential`].
    pub async unsafe fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut transfers = [Transfer::read(buf)];
        self.transfer_sequential(&mut transfers).await
    }

    /// Writes `data`, then reads into `buf`, without releasing chip select in
    /// between if both fit in one transaction.
    ///
    /// # Errors
    ///
    /// See [`SpiMaster::transfer_sequential`].
    ///
    /// # Safety
    ///
    /// See [`SpiMaster::transfer_sequential`].
    pub async unsafe fn write_then_read(
        &mut self,
        data: &[u8],
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let mut transfers = [Transfer::write(data), Transfer::read(buf)];
        self.transfer_sequential(&mut transfers).await
    }

    /// Runs `transfers` in order, sleeping until the last transaction is done.
    ///
    /// # Errors
    ///
    /// See [`SpiMaster::transfer_sequential`].
    pub fn transfer_sequential_blocking(
        &mut self,
        transfers: &mut [Transfer<'_>],
    ) -> Result<usize, Error> {
        // Safety: `transfers` stays borrowed until the result is collected
        // below.
        self.slot
            .with(|session| unsafe { session.start(transfers) })?;

        loop {
            let result = critical_section::with(|cs| {
                let result = self.slot.with_cs(cs, |session| session.take_result(None));
                if result.is_none() {
                    // the unit's interrupt wakes the core even while it is
                    // masked, and is serviced once the critical section ends.
                    wait::for_interrupt();
                }
                result
            });
            if let Some(result) = result {
                return result;
            }
            wait::relax();
        }
    }

    /// # Errors
    ///
    /// See [`SpiMaster::transfer_sequential`].
    pub fn write_blocking(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.transfer_sequential_blocking(&mut [Transfer::write(data)])
    }

    /// # Errors
    ///
    /// See [`SpiMaster::transfer_sequential`].
    pub fn read_blocking(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.transfer_sequential_blocking(&mut [Transfer::read(buf)])
    }

    /// # Errors
    ///
    /// See [`SpiMaster::transfer_sequential`].
    pub fn write_then_read_blocking(&mut self, data: &[u8], buf: &mut [u8]) -> Result<usize, Error> {
        self.transfer_sequential_blocking(&mut [Transfer::write(data), Transfer::read(buf)])
    }
}

impl<P: Port> Drop for SpiMaster<'_, P> {
    fn drop(&mut self) {
        self.slot.with(Session::close);
        tracing::trace!(unit = ?self.unit, "SPI master handle dropped");
    }
}

impl<P: Port> core::fmt::Debug for SpiMaster<'_, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpiMaster")
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}

mod wait {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    #[inline]
    pub(super) fn for_interrupt() {
        cortex_m::asm::wfi();
    }

    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    #[inline]
    pub(super) fn for_interrupt() {}

    #[inline]
    pub(super) fn relax() {
        core::hint::spin_loop();
        #[cfg(any(test, feature = "sim"))]
        std::thread::yield_now();
    }
}
