use serde::{Deserialize, Serialize};

/// A peripheral unit that can be claimed by the real-time core.
///
/// The ISUs ("I2C/SPI/UART" serial blocks) can each be configured as a SPI
/// master; everything else is listed so that a unit can be named in board
/// configuration even when this crate has no driver for it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Unit {
    UartDebug,
    Isu0,
    Isu1,
    Isu2,
    Isu3,
    Isu4,
    Isu5,
    Adc0,
    Gpt0,
    Gpt1,
    Gpt2,
    Gpt3,
    Gpt4,
}

impl Unit {
    /// Number of ISU blocks.
    pub const ISU_COUNT: usize = 6;

    const ISUS: [Unit; Self::ISU_COUNT] = [
        Unit::Isu0,
        Unit::Isu1,
        Unit::Isu2,
        Unit::Isu3,
        Unit::Isu4,
        Unit::Isu5,
    ];

    /// Returns this unit's ISU index, or `None` if it is not an ISU.
    #[must_use]
    pub const fn isu_index(self) -> Option<usize> {
        match self {
            Unit::Isu0 => Some(0),
            Unit::Isu1 => Some(1),
            Unit::Isu2 => Some(2),
            Unit::Isu3 => Some(3),
            Unit::Isu4 => Some(4),
            Unit::Isu5 => Some(5),
            _ => None,
        }
    }

    /// Returns the ISU with the given index.
    #[must_use]
    pub const fn isu(index: usize) -> Option<Self> {
        if index < Self::ISU_COUNT {
            Some(Self::ISUS[index])
        } else {
            None
        }
    }
}
