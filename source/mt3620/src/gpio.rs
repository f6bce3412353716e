//! GPIO pins.
//!
//! The MT3620 spreads its GPIOs over the GPIO/PWM groups, four pins per
//! group, with the remaining eight pins living in the ADC block. All blocks
//! share the same register shape: writing a pin's bit to a `*_SET` or
//! `*_RESET` register changes only that pin, so no read-modify-write cycle
//! (and no lock) is needed to drive a single pin.
use core::fmt;

use crate::Mmio;

/// Number of pins in each GPIO/PWM group.
pub const GROUP_PIN_COUNT: u32 = 4;

/// First pin served by the ADC block.
pub const ADC_PIN_START: u32 = 41;

/// Number of pins served by the ADC block.
pub const ADC_PIN_COUNT: u32 = 8;

/// Number of GPIO/PWM groups, not counting the ADC block.
pub const GROUP_COUNT: usize = (ADC_PIN_START as usize).div_ceil(GROUP_PIN_COUNT as usize);

/// Total number of pin blocks, including the ADC block.
pub const BLOCK_COUNT: usize = GROUP_COUNT + 1;

const ADC_BLOCK: usize = GROUP_COUNT;

const GROUP0_BASE: usize = 0x3801_0000;
const GROUP_STRIDE: usize = 0x1_0000;
const ADC_GPIO_BASE: usize = 0x3800_0100;

/// Register offsets within a pin block.
pub mod reg {
    pub const DIN: usize = 0x04;
    pub const DOUT_SET: usize = 0x14;
    pub const DOUT_RESET: usize = 0x18;
    pub const OE_SET: usize = 0x24;
    pub const OE_RESET: usize = 0x28;
    pub const IES_SET: usize = 0x34;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The pin number does not name a GPIO.
    NotAPin(u32),
}

/// Driver for the MT3620's GPIO blocks.
pub struct Gpio {
    blocks: [Mmio; BLOCK_COUNT],
}

/// A pin resolved to its block and bit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Pin {
    block: usize,
    mask: u32,
}

// === impl Gpio ===

impl Gpio {
    /// Returns a driver for the GPIO blocks at their MT3620 addresses.
    ///
    /// # Safety
    ///
    /// This must only be used on an MT3620 real-time core that has been
    /// granted the GPIO blocks it touches.
    #[must_use]
    pub const unsafe fn mt3620() -> Self {
        let mut blocks = [Mmio::new(ADC_GPIO_BASE); BLOCK_COUNT];
        let mut group = 0;
        while group < GROUP_COUNT {
            blocks[group] = Mmio::new(GROUP0_BASE + group * GROUP_STRIDE);
            group += 1;
        }
        Self { blocks }
    }

    /// Returns a driver whose blocks live at arbitrary addresses.
    ///
    /// # Safety
    ///
    /// Every window in `blocks` must be valid for reads and writes at the
    /// offsets in [`reg`].
    #[must_use]
    pub const unsafe fn with_blocks(blocks: [Mmio; BLOCK_COUNT]) -> Self {
        Self { blocks }
    }

    pub fn configure_output(&mut self, pin: u32) -> Result<(), Error> {
        let pin = Pin::new(pin)?;
        unsafe { self.blocks[pin.block].write(reg::OE_SET, pin.mask) };
        Ok(())
    }

    /// Stops driving `pin` and enables its input buffer.
    pub fn configure_input(&mut self, pin: u32) -> Result<(), Error> {
        let pin = Pin::new(pin)?;
        let block = self.blocks[pin.block];
        unsafe {
            block.write(reg::OE_RESET, pin.mask);
            block.write(reg::IES_SET, pin.mask);
        }
        Ok(())
    }

    /// Drives an output pin high (`true`) or low (`false`).
    pub fn write(&mut self, pin: u32, high: bool) -> Result<(), Error> {
        let pin = Pin::new(pin)?;
        let offset = if high { reg::DOUT_SET } else { reg::DOUT_RESET };
        unsafe { self.blocks[pin.block].write(offset, pin.mask) };
        Ok(())
    }

    /// Returns the level of an input pin.
    pub fn read(&self, pin: u32) -> Result<bool, Error> {
        let pin = Pin::new(pin)?;
        let din = unsafe { self.blocks[pin.block].read(reg::DIN) };
        Ok(din & pin.mask != 0)
    }
}

// === impl Pin ===

impl Pin {
    fn new(pin: u32) -> Result<Self, Error> {
        if pin < ADC_PIN_START {
            Ok(Self {
                block: (pin / GROUP_PIN_COUNT) as usize,
                mask: 1 << (pin % GROUP_PIN_COUNT),
            })
        } else if pin < ADC_PIN_START + ADC_PIN_COUNT {
            Ok(Self {
                block: ADC_BLOCK,
                mask: 1 << (pin - ADC_PIN_START),
            })
        } else {
            Err(Error::NotAPin(pin))
        }
    }
}

// === impl Error ===

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotAPin(pin) => write!(f, "GPIO {pin} is not a pin on the MT3620"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORDS: usize = 16;

    fn fake_gpio(mem: &mut [[u32; WORDS]; BLOCK_COUNT]) -> Gpio {
        let mut blocks = [Mmio::new(0); BLOCK_COUNT];
        for (block, words) in blocks.iter_mut().zip(mem.iter_mut()) {
            *block = Mmio::new(words.as_mut_ptr() as usize);
        }
        unsafe { Gpio::with_blocks(blocks) }
    }

    #[test]
    fn pin_mapping() {
        assert_eq!(Pin::new(0), Ok(Pin { block: 0, mask: 0b0001 }));
        assert_eq!(Pin::new(7), Ok(Pin { block: 1, mask: 0b1000 }));
        assert_eq!(Pin::new(40), Ok(Pin { block: 10, mask: 0b0001 }));
        assert_eq!(
            Pin::new(41),
            Ok(Pin {
                block: ADC_BLOCK,
                mask: 0b0001
            })
        );
        assert_eq!(
            Pin::new(48),
            Ok(Pin {
                block: ADC_BLOCK,
                mask: 1 << 7
            })
        );
        assert_eq!(Pin::new(49), Err(Error::NotAPin(49)));
    }

    #[test]
    fn write_uses_set_and_reset_registers() {
        let mut mem = [[0u32; WORDS]; BLOCK_COUNT];
        let mut gpio = fake_gpio(&mut mem);

        gpio.configure_output(9).unwrap();
        gpio.write(9, true).unwrap();
        gpio.write(42, false).unwrap();
        assert_eq!(gpio.write(64, true), Err(Error::NotAPin(64)));

        assert_eq!(mem[2][reg::OE_SET / 4], 0b0010);
        assert_eq!(mem[2][reg::DOUT_SET / 4], 0b0010);
        assert_eq!(mem[ADC_BLOCK][reg::DOUT_RESET / 4], 0b0010);
    }

    #[test]
    fn read_input() {
        let mut mem = [[0u32; WORDS]; BLOCK_COUNT];
        mem[3][reg::DIN / 4] = 0b0100;
        let mut gpio = fake_gpio(&mut mem);

        gpio.configure_input(14).unwrap();
        assert_eq!(gpio.read(14), Ok(true));
        assert_eq!(gpio.read(12), Ok(false));
        assert_eq!(mem[3][reg::OE_RESET / 4], 0b0100);
        assert_eq!(mem[3][reg::IES_SET / 4], 0b0100);
    }
}
