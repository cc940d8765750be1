//! Error type for bridge operations.

use core::convert::Infallible;
use core::fmt::Debug;

/// Failure of a bridge operation, generic over the SPI port error `T` and
/// the filesystem error `F`.
///
/// Operations that never touch the filesystem leave `F` at its default.
#[derive(Debug)]
pub enum BridgeError<T: Debug, F: Debug = Infallible> {
    /// SPI port error.
    Transport(T),
    /// Filesystem driver error while opening or reading an image.
    Filesystem(F),
    /// Drive index outside the drive table.
    InvalidDrive(usize),
    /// HID slot index outside the device table.
    InvalidSlot(usize),
    /// The far side never signalled ready.
    Timeout,
}

impl<T: Debug, F: Debug> From<T> for BridgeError<T, F> {
    fn from(e: T) -> Self {
        BridgeError::Transport(e)
    }
}

impl<T: Debug, F: Debug> core::fmt::Display for BridgeError<T, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BridgeError::Transport(e) => write!(f, "SPI transport error: {e:?}"),
            BridgeError::Filesystem(e) => write!(f, "filesystem error: {e:?}"),
            BridgeError::InvalidDrive(d) => write!(f, "no drive {d}"),
            BridgeError::InvalidSlot(s) => write!(f, "no HID slot {s}"),
            BridgeError::Timeout => write!(f, "timed out waiting for FPGA"),
        }
    }
}
