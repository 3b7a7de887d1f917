//! Error types for qflasher-core
//!
//! Transfer loops treat the transport as infallible, so the only errors in
//! this crate come from bringing a device up: connecting, validating its
//! geometry and calibrating the fast-read path.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Transport bring-up errors
    /// Transport could not connect to the flash device
    ConnectFailed {
        /// Number of connection attempts made before giving up
        attempts: u32,
    },
    /// Quad mode could not be enabled on the device
    QuadEnableFailed,
    /// Fast-read calibration pattern did not match
    CalibrationFailed,

    // Geometry errors
    /// Device reports a sector size the arbiter does not support
    UnsupportedSectorSize(u32),
    /// Device reports a zero or non power-of-two page size, or zero flash size
    InvalidGeometry,

    // Programmer errors
    /// General transport error
    ProgrammerError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed { attempts } => {
                write!(f, "failed to connect to flash after {} attempt(s)", attempts)
            }
            Self::QuadEnableFailed => write!(f, "failed to enable quad mode"),
            Self::CalibrationFailed => write!(f, "fast read calibration failed"),
            Self::UnsupportedSectorSize(size) => {
                write!(f, "unsupported sector size {} (only 4096 is supported)", size)
            }
            Self::InvalidGeometry => write!(f, "invalid flash geometry"),
            Self::ProgrammerError => write!(f, "programmer error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
