//! Settings for opening an ISU as a SPI master.
use embedded_hal::spi::{Mode, Phase, Polarity};
use mt3620::{spi::BUS_SPEED_2M, Unit, NVIC_PRIORITY_BITS};
use serde::{Deserialize, Serialize};

use crate::{Error, GlobPolicy};

/// Chip-select line driven during transfers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChipSelect {
    Line0 = 0,
    Line1 = 1,
    /// No chip-select line is driven; the caller manages chip select itself
    /// (for example, with a GPIO).
    None = 7,
}

/// Settings applied when a unit is opened.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SpimSettings {
    pub unit: Unit,
    #[serde(default = "SpimSettings::default_chip_select")]
    pub chip_select: ChipSelect,
    /// Clock idles high.
    #[serde(default)]
    pub cpol: bool,
    /// Data is captured on the second clock edge.
    #[serde(default)]
    pub cpha: bool,
    #[serde(default = "SpimSettings::default_bus_speed_hz")]
    pub bus_speed_hz: u32,
    #[serde(default = "SpimSettings::default_dma")]
    pub dma: bool,
    /// See [`GlobPolicy::half_duplex_writes`].
    #[serde(default)]
    pub half_duplex_writes: bool,
    /// NVIC priority of the unit's interrupt, `0` (highest) to
    /// [`SpimSettings::IRQ_PRIORITY_MAX`].
    #[serde(default = "SpimSettings::default_irq_priority")]
    pub irq_priority: u8,
}

// === impl ChipSelect ===

impl ChipSelect {
    /// Value of `SMMR.RS_SLAVE_SEL` selecting this line.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u8> for ChipSelect {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(ChipSelect::Line0),
            1 => Ok(ChipSelect::Line1),
            7 => Ok(ChipSelect::None),
            _ => Err(Error::Unsupported),
        }
    }
}

// === impl SpimSettings ===

impl SpimSettings {
    pub const DEFAULT_CHIP_SELECT: ChipSelect = ChipSelect::Line0;
    pub const DEFAULT_BUS_SPEED_HZ: u32 = BUS_SPEED_2M;
    pub const DEFAULT_DMA: bool = true;
    pub const DEFAULT_IRQ_PRIORITY: u8 = 2;
    pub const IRQ_PRIORITY_MAX: u8 = (1 << NVIC_PRIORITY_BITS) - 1;

    /// Settings for `unit` in SPI mode 0 at 2 MHz, using chip-select line 0
    /// and DMA.
    #[must_use]
    pub const fn new(unit: Unit) -> Self {
        Self {
            unit,
            chip_select: Self::DEFAULT_CHIP_SELECT,
            cpol: false,
            cpha: false,
            bus_speed_hz: Self::DEFAULT_BUS_SPEED_HZ,
            dma: Self::DEFAULT_DMA,
            half_duplex_writes: false,
            irq_priority: Self::DEFAULT_IRQ_PRIORITY,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        Mode {
            polarity: if self.cpol {
                Polarity::IdleHigh
            } else {
                Polarity::IdleLow
            },
            phase: if self.cpha {
                Phase::CaptureOnSecondTransition
            } else {
                Phase::CaptureOnFirstTransition
            },
        }
    }

    #[must_use]
    pub fn glob_policy(&self) -> GlobPolicy {
        GlobPolicy {
            half_duplex_writes: self.half_duplex_writes,
        }
    }

    const fn default_chip_select() -> ChipSelect {
        Self::DEFAULT_CHIP_SELECT
    }
    const fn default_bus_speed_hz() -> u32 {
        Self::DEFAULT_BUS_SPEED_HZ
    }
    const fn default_dma() -> bool {
        Self::DEFAULT_DMA
    }
    const fn default_irq_priority() -> u8 {
        Self::DEFAULT_IRQ_PRIORITY
    }
}
