use core::fmt;

/// Errors returned by the SPI master.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// An argument was out of range: an empty transfer list, a zero-length
    /// transfer, a zero bus speed, or a unit that is not an ISU.
    InvalidParameter,
    /// The handle's unit has been closed.
    HandleClosed,
    /// The unit is already open, or a transfer is still in flight on it.
    Busy,
    /// The request cannot be expressed on this hardware.
    Unsupported,
    /// The hardware reported a failed transaction.
    ///
    /// `transferred` counts the bytes moved by the transactions that
    /// completed before the failing one.
    TransferFailed { transferred: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidParameter => f.write_str("invalid parameter"),
            Error::HandleClosed => f.write_str("SPI master handle is closed"),
            Error::Busy => f.write_str("SPI master is busy"),
            Error::Unsupported => f.write_str("transfer not supported by the SPI hardware"),
            Error::TransferFailed { transferred } => write!(
                f,
                "SPI transfer failed after {transferred} bytes were transferred"
            ),
        }
    }
}
