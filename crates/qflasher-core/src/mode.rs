//! Device-mode state machine
//!
//! The transport is either set up for normal command transfers (reads,
//! page programs, erases) or for calibrated fast-read streaming. Switching
//! between the two is expensive: a full disconnect/reconnect or a fast-read
//! setup with calibration re-applied. The state machine tracks which
//! configuration the hardware is in and only reconfigures when an
//! operation needs the other one.
//!
//! ```text
//!              connect                       fast-read setup
//!   ┌──────┐ ───────────► Read/Write/Erase ◄──────────────┐
//!   │ None │                   │  ▲                        │
//!   └──────┘ ───────────►      │  │ shutdown + connect     │
//!           fast-read setup    ▼  │                        │
//!                     FastReadRaw/FastReadNibbleSwap ──────┘
//!                            disconnect + fast-read setup
//! ```

use bitflags::bitflags;

use crate::error::Result;
use crate::ops::{self, RetryPolicy};
use crate::transport::{FastReadMode, FlashTransport};

/// Kind of operation the dispatcher executes against the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Standard command read
    Read,
    /// Page program
    Write,
    /// Sector or chip erase
    Erase,
    /// Fast read, bytes as clocked in
    FastReadRaw,
    /// Fast read, nibbles swapped
    FastReadNibbleSwap,
}

impl OperationKind {
    /// Whether this operation uses the fast-read hardware path
    pub fn is_fast_read(self) -> bool {
        matches!(self, Self::FastReadRaw | Self::FastReadNibbleSwap)
    }

    /// Fast-read submode for fast-read kinds
    pub fn fast_read_mode(self) -> Option<FastReadMode> {
        match self {
            Self::FastReadRaw => Some(FastReadMode::Raw),
            Self::FastReadNibbleSwap => Some(FastReadMode::NibbleSwap),
            _ => None,
        }
    }

    /// The fast-read kind for a transfer submode
    pub fn for_fast_read(mode: FastReadMode) -> Self {
        match mode {
            FastReadMode::Raw => Self::FastReadRaw,
            FastReadMode::NibbleSwap => Self::FastReadNibbleSwap,
        }
    }
}

/// What the transport is currently configured for
///
/// Owned by the dispatcher. `None` only before the first operation (or
/// after the low-level bypass has handed the transport back).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceMode {
    /// Nothing set up yet
    #[default]
    None,
    /// Normal transport, last op was a read
    Read,
    /// Normal transport, last op was a write
    Write,
    /// Normal transport, last op was an erase
    Erase,
    /// Fast-read hardware, raw submode
    FastReadRaw,
    /// Fast-read hardware, nibble-swap submode
    FastReadNibbleSwap,
}

impl From<OperationKind> for DeviceMode {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Read => Self::Read,
            OperationKind::Write => Self::Write,
            OperationKind::Erase => Self::Erase,
            OperationKind::FastReadRaw => Self::FastReadRaw,
            OperationKind::FastReadNibbleSwap => Self::FastReadNibbleSwap,
        }
    }
}

bitflags! {
    /// Transport reconfiguration steps needed before an operation
    ///
    /// Steps are applied in declaration order: tear-down first, then
    /// set-up.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Reconfigure: u8 {
        /// Release the fast-read hardware
        const SHUTDOWN_FAST_READ = 1 << 0;
        /// Disconnect the normal transport
        const DISCONNECT         = 1 << 1;
        /// Claim the fast-read hardware and re-apply calibration
        const SETUP_FAST_READ    = 1 << 2;
        /// Connect the normal transport, retrying on failure
        const CONNECT            = 1 << 3;
    }
}

impl DeviceMode {
    /// Whether the normal command transport is connected
    pub fn is_direct(self) -> bool {
        matches!(self, Self::Read | Self::Write | Self::Erase)
    }

    /// Whether the fast-read hardware is set up
    pub fn is_fast_read(self) -> bool {
        matches!(self, Self::FastReadRaw | Self::FastReadNibbleSwap)
    }

    /// Steps needed to run `next` from this mode
    ///
    /// Consecutive operations of the same category need nothing.
    pub fn transition_to(self, next: OperationKind) -> Reconfigure {
        match (self, next.is_fast_read()) {
            (Self::None, true) => Reconfigure::SETUP_FAST_READ,
            (Self::None, false) => Reconfigure::CONNECT,
            (mode, true) if mode.is_direct() => {
                Reconfigure::DISCONNECT | Reconfigure::SETUP_FAST_READ
            }
            (mode, false) if mode.is_fast_read() => {
                Reconfigure::SHUTDOWN_FAST_READ | Reconfigure::CONNECT
            }
            _ => Reconfigure::empty(),
        }
    }

    /// Steps that return the transport to the unconfigured state
    pub fn release(self) -> Reconfigure {
        match self {
            Self::None => Reconfigure::empty(),
            mode if mode.is_fast_read() => Reconfigure::SHUTDOWN_FAST_READ,
            _ => Reconfigure::DISCONNECT,
        }
    }
}

/// Apply the steps returned by [`DeviceMode::transition_to`]
///
/// # Errors
/// * `ConnectFailed` - if `CONNECT` was requested and every attempt failed
pub fn reconfigure<T: FlashTransport + ?Sized>(
    transport: &mut T,
    steps: Reconfigure,
    retry: &RetryPolicy,
) -> Result<()> {
    if steps.is_empty() {
        return Ok(());
    }

    log::debug!("Reconfiguring transport: {:?}", steps);

    if steps.contains(Reconfigure::SHUTDOWN_FAST_READ) {
        transport.fast_read_shutdown();
    }
    if steps.contains(Reconfigure::DISCONNECT) {
        transport.disconnect();
    }
    if steps.contains(Reconfigure::SETUP_FAST_READ) {
        transport.fast_read_setup();
        transport.fast_read_apply_calibration();
    }
    if steps.contains(Reconfigure::CONNECT) {
        ops::connect_with_retry(transport, retry)?;
    }

    Ok(())
}

/// Read path chosen once at initialisation from the calibration outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferStrategy {
    /// Command reads through the normal transport
    #[default]
    Standard,
    /// Calibrated fast reads, raw submode
    FastRaw,
    /// Calibrated fast reads, nibble-swap submode
    FastNibbleSwap,
}

impl TransferStrategy {
    /// Strategy for a configured fast-read mode, given whether calibration
    /// succeeded
    pub fn from_calibration(mode: FastReadMode, calibrated: bool) -> Self {
        match (calibrated, mode) {
            (false, _) => Self::Standard,
            (true, FastReadMode::Raw) => Self::FastRaw,
            (true, FastReadMode::NibbleSwap) => Self::FastNibbleSwap,
        }
    }

    /// Calibrated fast-read submode, if fast reads are in use
    pub fn fast_read_mode(self) -> Option<FastReadMode> {
        match self {
            Self::Standard => None,
            Self::FastRaw => Some(FastReadMode::Raw),
            Self::FastNibbleSwap => Some(FastReadMode::NibbleSwap),
        }
    }

    /// Operation kind used for a plain read
    pub fn read_kind(self) -> OperationKind {
        match self {
            Self::Standard => OperationKind::Read,
            Self::FastRaw => OperationKind::FastReadRaw,
            Self::FastNibbleSwap => OperationKind::FastReadNibbleSwap,
        }
    }

    /// Operation kind used for a read with an explicit fast-read submode
    ///
    /// Without calibrated fast reads the submode is ignored.
    pub fn read_kind_for(self, mode: FastReadMode) -> OperationKind {
        match self {
            Self::Standard => OperationKind::Read,
            Self::FastRaw | Self::FastNibbleSwap => OperationKind::for_fast_read(mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_operation_connects() {
        assert_eq!(
            DeviceMode::None.transition_to(OperationKind::Read),
            Reconfigure::CONNECT
        );
        assert_eq!(
            DeviceMode::None.transition_to(OperationKind::Erase),
            Reconfigure::CONNECT
        );
        assert_eq!(
            DeviceMode::None.transition_to(OperationKind::FastReadRaw),
            Reconfigure::SETUP_FAST_READ
        );
    }

    #[test]
    fn test_same_category_is_free() {
        for from in [DeviceMode::Read, DeviceMode::Write, DeviceMode::Erase] {
            for next in [OperationKind::Read, OperationKind::Write, OperationKind::Erase] {
                assert!(from.transition_to(next).is_empty(), "{:?} -> {:?}", from, next);
            }
        }
        assert!(DeviceMode::FastReadRaw
            .transition_to(OperationKind::FastReadNibbleSwap)
            .is_empty());
        assert!(DeviceMode::FastReadNibbleSwap
            .transition_to(OperationKind::FastReadRaw)
            .is_empty());
    }

    #[test]
    fn test_cross_category() {
        assert_eq!(
            DeviceMode::Write.transition_to(OperationKind::FastReadNibbleSwap),
            Reconfigure::DISCONNECT | Reconfigure::SETUP_FAST_READ
        );
        assert_eq!(
            DeviceMode::FastReadRaw.transition_to(OperationKind::Erase),
            Reconfigure::SHUTDOWN_FAST_READ | Reconfigure::CONNECT
        );
    }

    #[test]
    fn test_release() {
        assert!(DeviceMode::None.release().is_empty());
        assert_eq!(DeviceMode::Erase.release(), Reconfigure::DISCONNECT);
        assert_eq!(
            DeviceMode::FastReadRaw.release(),
            Reconfigure::SHUTDOWN_FAST_READ
        );
    }

    #[test]
    fn test_mode_follows_kind() {
        assert_eq!(DeviceMode::from(OperationKind::Write), DeviceMode::Write);
        assert_eq!(
            DeviceMode::from(OperationKind::FastReadNibbleSwap),
            DeviceMode::FastReadNibbleSwap
        );
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            TransferStrategy::from_calibration(FastReadMode::NibbleSwap, true),
            TransferStrategy::FastNibbleSwap
        );
        assert_eq!(
            TransferStrategy::from_calibration(FastReadMode::Raw, false),
            TransferStrategy::Standard
        );
        assert_eq!(TransferStrategy::FastRaw.read_kind(), OperationKind::FastReadRaw);
        assert_eq!(TransferStrategy::Standard.fast_read_mode(), None);
        assert_eq!(
            TransferStrategy::FastNibbleSwap.fast_read_mode(),
            Some(FastReadMode::NibbleSwap)
        );
        assert_eq!(
            TransferStrategy::FastRaw.read_kind_for(FastReadMode::NibbleSwap),
            OperationKind::FastReadNibbleSwap
        );
        assert_eq!(
            TransferStrategy::Standard.read_kind_for(FastReadMode::NibbleSwap),
            OperationKind::Read
        );
    }
}
