use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};
use mt3620::{spi::SPI_COUNT, Unit};

use crate::{
    port::{Mt3620, Port},
    session::Session,
    Error, SpiMaster, SpimSettings,
};

/// The SPI masters of every ISU, and the state each one keeps while open.
///
/// A `Registry` is meant to live in a `static`, shared between the code that
/// opens [`SpiMaster`]s and the ISU interrupt handlers, which call
/// [`Registry::handle_interrupt`] (see [`isu_spim_interrupts!`]).
///
/// [`isu_spim_interrupts!`]: crate::isu_spim_interrupts
pub struct Registry<P = Mt3620> {
    slots: [Slot<P>; SPI_COUNT],
}

/// One unit's session, behind a critical-section lock.
pub(crate) struct Slot<P> {
    session: Mutex<RefCell<Session<P>>>,
}

// === impl Registry ===

impl Registry<Mt3620> {
    /// Returns a registry driving the MT3620's six ISU SPI masters.
    ///
    /// # Safety
    ///
    /// - This must only be used on an MT3620 real-time core that has been
    ///   granted every ISU it opens, along with their TX DMA channels.
    /// - Only one such registry may exist.
    /// - The registry must be placed in DMA-accessible system RAM, with
    ///   `#[link_section = ".sysram"]`. Each open unit's register image lives
    ///   inside it, and is loaded into the SPI master by the DMA engine, which
    ///   cannot read the core's TCM.
    #[must_use]
    pub const unsafe fn mt3620() -> Self {
        Self {
            slots: [
                Slot::new(Mt3620::new(0)),
                Slot::new(Mt3620::new(1)),
                Slot::new(Mt3620::new(2)),
                Slot::new(Mt3620::new(3)),
                Slot::new(Mt3620::new(4)),
                Slot::new(Mt3620::new(5)),
            ],
        }
    }
}

impl<P: Port> Registry<P> {
    /// Returns a registry over `ports`, indexed by ISU number.
    #[must_use]
    pub fn new(ports: [P; SPI_COUNT]) -> Self {
        Self {
            slots: ports.map(Slot::new),
        }
    }

    /// Opens `unit` in SPI mode 0 at 2 MHz, selecting chip-select line 0.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] if `unit` is not an ISU.
    /// - [`Error::Busy`] if `unit` is already open.
    pub fn open(&self, unit: Unit) -> Result<SpiMaster<'_, P>, Error> {
        self.open_with(&SpimSettings::new(unit))
    }

    /// Opens the unit named by `settings`, and applies the rest of them.
    ///
    /// # Errors
    ///
    /// As [`Registry::open`], and additionally [`Error::Unsupported`] or
    /// [`Error::InvalidParameter`] if the bus speed or mode in `settings`
    /// cannot be used (see [`SpiMaster::configure`]), or
    /// [`Error::InvalidParameter`] if `settings.irq_priority` is above
    /// [`SpimSettings::IRQ_PRIORITY_MAX`].
    #[tracing::instrument(name = "Registry::open", level = "debug", skip(self), err(Debug))]
    pub fn open_with(&self, settings: &SpimSettings) -> Result<SpiMaster<'_, P>, Error> {
        let slot = self.slot(settings.unit)?;
        slot.with(|session| session.open(settings))?;
        Ok(SpiMaster::new(slot, settings.unit))
    }

    /// Services `unit`'s SPI master interrupt.
    ///
    /// This must be called from the interrupt handler of each ISU that is
    /// opened as a SPI master. Interrupts for units that are not ISUs, or
    /// that are not open, are acknowledged and otherwise ignored.
    pub fn handle_interrupt(&self, unit: Unit) {
        let Ok(slot) = self.slot(unit) else {
            return;
        };
        // wake outside the critical section.
        if let Some(waker) = slot.with(Session::on_interrupt) {
            waker.wake();
        }
    }

    fn slot(&self, unit: Unit) -> Result<&Slot<P>, Error> {
        unit.isu_index()
            .and_then(|index| self.slots.get(index))
            .ok_or(Error::InvalidParameter)
    }
}

// === impl Slot ===

impl<P: Port> Slot<P> {
    pub(crate) const fn new(port: P) -> Self {
        Self {
            session: Mutex::new(RefCell::new(Session::new(port))),
        }
    }

    /// Runs `f` with the session locked.
    pub(crate) fn with<T>(&self, f: impl FnOnce(&mut Session<P>) -> T) -> T {
        critical_section::with(|cs| self.with_cs(cs, f))
    }

    pub(crate) fn with_cs<T>(
        &self,
        cs: CriticalSection<'_>,
        f: impl FnOnce(&mut Session<P>) -> T,
    ) -> T {
        f(&mut self.session.borrow_ref_mut(cs))
    }
}

/// Defines the ISU SPI master interrupt vectors, routing each one to
/// [`Registry::handle_interrupt`] on `$registry`.
///
/// `$registry` must be a `static` [`Registry`].
///
/// ```ignore
/// #[link_section = ".sysram"]
/// static SPIM: spim::Registry = unsafe { spim::Registry::mt3620() };
/// spim::isu_spim_interrupts!(SPIM);
/// ```
#[macro_export]
macro_rules! isu_spim_interrupts {
    ($registry:path) => {
        $crate::isu_spim_interrupts! {
            $registry;
            isu_g0_spim_irq => Isu0,
            isu_g1_spim_irq => Isu1,
            isu_g2_spim_irq => Isu2,
            isu_g3_spim_irq => Isu3,
            isu_g4_spim_irq => Isu4,
            isu_g5_spim_irq => Isu5,
        }
    };
    ($registry:path; $($vector:ident => $unit:ident),+ $(,)?) => {
        $(
            #[no_mangle]
            pub extern "C" fn $vector() {
                $registry.handle_interrupt($crate::Unit::$unit);
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPort;

    #[test]
    fn non_isu_units_are_rejected() {
        let registry = Registry::new(SimPort::array());
        for unit in [Unit::UartDebug, Unit::Adc0, Unit::Gpt3] {
            assert_eq!(registry.open(unit).err(), Some(Error::InvalidParameter));
        }
        // and their interrupts are ignored.
        registry.handle_interrupt(Unit::Gpt0);
    }

    #[test]
    fn units_are_independent() {
        let registry = Registry::new(SimPort::array());
        let isu0 = registry.open(Unit::Isu0).unwrap();
        let isu5 = registry.open(Unit::Isu5).unwrap();
        assert_eq!(isu0.unit(), Unit::Isu0);
        assert_eq!(isu5.unit(), Unit::Isu5);
        assert_eq!(registry.open(Unit::Isu5).err(), Some(Error::Busy));
    }
}
