//! Volatile access to blocks of memory-mapped registers.
use core::ptr;

/// A window over a block of 32-bit memory-mapped registers.
///
/// An `Mmio` is just a base address. All accesses are volatile and
/// word-sized, and are expressed as byte offsets from the base, matching the
/// offsets given in the MT3620 register maps.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    #[must_use]
    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Returns a window whose base is `offset` bytes past this one.
    #[must_use]
    pub const fn offset(&self, offset: usize) -> Self {
        Self {
            base: self.base + offset,
        }
    }

    /// Reads the register at `offset`.
    ///
    /// # Safety
    ///
    /// `base + offset` must be the address of a readable, 4-byte aligned
    /// register (or of memory standing in for one).
    #[inline]
    #[must_use]
    pub unsafe fn read(&self, offset: usize) -> u32 {
        ptr::read_volatile((self.base + offset) as *const u32)
    }

    /// Writes `value` to the register at `offset`.
    ///
    /// # Safety
    ///
    /// `base + offset` must be the address of a writable, 4-byte aligned
    /// register, and writing `value` to it must not violate any invariant
    /// that other code relies on.
    #[inline]
    pub unsafe fn write(&self, offset: usize, value: u32) {
        ptr::write_volatile((self.base + offset) as *mut u32, value)
    }

    /// Read-modify-write of the register at `offset`.
    ///
    /// This is *not* atomic with respect to interrupts. Callers sharing a
    /// register with an interrupt handler must mask that interrupt (or hold a
    /// critical section) around the call.
    ///
    /// # Safety
    ///
    /// See [`Mmio::read`] and [`Mmio::write`].
    #[inline]
    pub unsafe fn modify(&self, offset: usize, f: impl FnOnce(u32) -> u32) {
        let value = self.read(offset);
        self.write(offset, f(value))
    }

    /// Sets the bits in `mask`, leaving all others unchanged.
    ///
    /// # Safety
    ///
    /// See [`Mmio::modify`].
    #[inline]
    pub unsafe fn set_bits(&self, offset: usize, mask: u32) {
        self.modify(offset, |bits| bits | mask)
    }

    /// Clears the bits in `mask`, leaving all others unchanged.
    ///
    /// # Safety
    ///
    /// See [`Mmio::modify`].
    #[inline]
    pub unsafe fn clear_bits(&self, offset: usize, mask: u32) {
        self.modify(offset, |bits| bits & !mask)
    }
}
