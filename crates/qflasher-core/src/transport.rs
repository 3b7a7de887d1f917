//! Flash transport trait
//!
//! The transport is the physical command/data interface to the flash chip.
//! It owns command framing, clocking, chip-select and the calibrated
//! fast-read hardware; the arbiter only sequences calls into it.
//!
//! Apart from bring-up (`connect`, `quad_enable`, `fast_read_calibrate`)
//! every call is treated as infallible. Errors on the wire are the
//! transport's concern.

use crate::error::Result;
use crate::spi::opcodes;

/// Transfer submode of the fast-read hardware path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FastReadMode {
    /// Bytes are returned exactly as clocked in
    #[default]
    Raw,
    /// The two nibbles of every byte are swapped
    NibbleSwap,
}

/// Opcodes the transfer loops send for each kind of transaction
///
/// A transport may report its own set, for instance after reading SFDP
/// tables; [`CommandSet::default`] holds the JEDEC defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSet {
    /// Command used for standard reads
    pub read: u8,
    /// Write Enable
    pub write_enable: u8,
    /// Write Disable
    pub write_disable: u8,
    /// Page Program
    pub program_page: u8,
    /// 4 KiB sector erase
    pub sector_erase: u8,
    /// Whole-chip erase
    pub chip_erase: u8,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            read: opcodes::QIOR,
            write_enable: opcodes::WREN,
            write_disable: opcodes::WRDI,
            program_page: opcodes::PP,
            sector_erase: opcodes::SE_20,
            chip_erase: opcodes::CE_C7,
        }
    }
}

/// Physical transport to a QSPI flash device
///
/// The normal transport (`connect` .. `is_busy`) and the fast-read
/// hardware (`fast_read_*`) share pins, so only one of them may be set up
/// at a time. The device-mode state machine in [`crate::mode`] is
/// responsible for switching between them.
pub trait FlashTransport {
    /// Connect the normal command transport to the device
    ///
    /// Idempotent and safe to retry.
    fn connect(&mut self) -> Result<()>;

    /// Disconnect the normal command transport
    fn disconnect(&mut self);

    /// Total flash size in bytes (valid while connected)
    fn flash_size(&mut self) -> u32;

    /// Program page size in bytes (valid while connected)
    fn page_size(&mut self) -> u32;

    /// Smallest erase sector size in bytes (valid while connected)
    fn sector_size(&mut self) -> u32;

    /// Enable quad I/O on the device
    fn quad_enable(&mut self) -> Result<()>;

    /// Opcodes to use with this device
    fn command_set(&self) -> CommandSet {
        CommandSet::default()
    }

    /// Read `buf.len()` bytes at `addr` with the given read command
    fn read_raw(&mut self, cmd: u8, addr: u32, buf: &mut [u8]);

    /// Send a single-byte command (write enable/disable, chip erase)
    fn send_command(&mut self, cmd: u8);

    /// Program up to one page at `addr`
    ///
    /// The data must not cross a page boundary.
    fn program_page(&mut self, cmd: u8, addr: u32, data: &[u8]);

    /// Erase the sector starting at `addr`
    fn erase_sector(&mut self, cmd: u8, addr: u32);

    /// Whether a program or erase is still in progress
    fn is_busy(&mut self) -> bool;

    /// Claim the fast-read hardware resources
    fn fast_read_setup(&mut self);

    /// Search for the sampling settings that reproduce the calibration
    /// pattern stored at `pattern_addr`
    fn fast_read_calibrate(&mut self, pattern_addr: u32) -> Result<()>;

    /// Re-apply the settings found by the last successful calibration
    fn fast_read_apply_calibration(&mut self);

    /// Select the fast-read transfer submode
    fn fast_read_set_mode(&mut self, mode: FastReadMode);

    /// Read `buf.len()` bytes at `addr` through the fast-read hardware
    fn fast_read(&mut self, addr: u32, buf: &mut [u8]);

    /// Release the fast-read hardware resources
    fn fast_read_shutdown(&mut self);

    /// Mask interrupts on the current core, returning the previous mask
    fn mask_interrupts(&mut self) -> u32 {
        0
    }

    /// Restore an interrupt mask returned by [`mask_interrupts`](Self::mask_interrupts)
    fn restore_interrupts(&mut self, _state: u32) {}

    /// Delay for the specified number of microseconds
    fn delay_us(&mut self, us: u32);
}

/// Run `f` with interrupts masked around it
///
/// Every individual wire transaction goes through here so it cannot be
/// torn by an interrupt handler.
pub fn masked<T, R, F>(transport: &mut T, f: F) -> R
where
    T: FlashTransport + ?Sized,
    F: FnOnce(&mut T) -> R,
{
    let state = transport.mask_interrupts();
    let result = f(transport);
    transport.restore_interrupts(state);
    result
}
