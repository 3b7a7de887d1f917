//! Transfer loops run against a connected transport
//!
//! These are the bodies of the dispatcher's operations, shared with the
//! low-level bypass path. Every wire transaction is wrapped in
//! [`masked`](crate::transport::masked). Reads past the end of the device
//! are padded with `0xFF`; writes and erases past the end are dropped.

use crate::error::{Error, Result};
use crate::geometry::{FlashGeometry, ERASED_VALUE};
use crate::transport::{masked, CommandSet, FastReadMode, FlashTransport};

/// Default number of extra connect attempts after the first one fails
pub const DEFAULT_CONNECT_RETRIES: u32 = 5;

/// Default delay between connect attempts
pub const DEFAULT_CONNECT_RETRY_DELAY_US: u32 = 1000;

/// Retry budget for [`connect_with_retry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub retries: u32,
    /// Delay before each retry, in microseconds
    pub delay_us: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_CONNECT_RETRIES,
            delay_us: DEFAULT_CONNECT_RETRY_DELAY_US,
        }
    }
}

/// What an erase request turned into on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Erased {
    /// A single chip-erase command
    Chip,
    /// `count` sector erases starting at `start`
    Sectors {
        /// First erased sector address
        start: u32,
        /// Number of sectors erased
        count: u32,
    },
}

/// Connect the transport, retrying up to the policy's budget
///
/// # Errors
/// * `ConnectFailed` - every attempt failed
pub fn connect_with_retry<T: FlashTransport + ?Sized>(
    transport: &mut T,
    policy: &RetryPolicy,
) -> Result<()> {
    let mut attempts = 1;

    while transport.connect().is_err() {
        if attempts > policy.retries {
            return Err(Error::ConnectFailed { attempts });
        }
        log::warn!(
            "Flash connect attempt {} failed, retrying in {} us",
            attempts,
            policy.delay_us
        );
        transport.delay_us(policy.delay_us);
        attempts += 1;
    }

    if attempts > 1 {
        log::debug!("Flash connected after {} attempts", attempts);
    }
    Ok(())
}

/// Poll the transport until no program or erase is in progress
pub fn wait_while_busy<T: FlashTransport + ?Sized>(transport: &mut T) {
    while masked(transport, |t| t.is_busy()) {}
}

/// Chunked, end-clamped read loop
///
/// Splits `buf` into chunks of at most `chunk_size` bytes, clamps each one
/// against the end of the device, fills the part past the end with `0xFF`
/// and hands the rest to `fetch` together with its device address.
pub fn read_chunked<F>(
    geometry: &FlashGeometry,
    chunk_size: usize,
    addr: u32,
    buf: &mut [u8],
    mut fetch: F,
) where
    F: FnMut(u32, &mut [u8]),
{
    let mut address = addr;

    for chunk in buf.chunks_mut(chunk_size.max(1)) {
        let split = geometry.split_for_read(address, chunk.len());
        let (data, padding) = chunk.split_at_mut(split.len);
        padding.fill(ERASED_VALUE);

        if !data.is_empty() {
            log::trace!(
                "Read {} bytes from flash at address 0x{:08X}",
                data.len(),
                split.address
            );
            fetch(split.address, data);
        }

        address = split.address + split.len as u32;
    }
}

/// Standard command read
pub fn read<T: FlashTransport + ?Sized>(
    transport: &mut T,
    geometry: &FlashGeometry,
    commands: &CommandSet,
    chunk_size: usize,
    addr: u32,
    buf: &mut [u8],
) {
    log::debug!("Asked to read {} bytes at address 0x{:08X}", buf.len(), addr);

    read_chunked(geometry, chunk_size, addr, buf, |address, data| {
        masked(transport, |t| t.read_raw(commands.read, address, data));
    });
}

/// Read through the fast-read hardware
///
/// When `mode` is given it is selected before every chunk; otherwise the
/// submode already set on the transport is used.
pub fn fast_read<T: FlashTransport + ?Sized>(
    transport: &mut T,
    geometry: &FlashGeometry,
    chunk_size: usize,
    addr: u32,
    buf: &mut [u8],
    mode: Option<FastReadMode>,
) {
    log::debug!(
        "Asked to fast read {} bytes at address 0x{:08X}",
        buf.len(),
        addr
    );

    read_chunked(geometry, chunk_size, addr, buf, |address, data| {
        if let Some(mode) = mode {
            transport.fast_read_set_mode(mode);
        }
        masked(transport, |t| t.fast_read(address, data));
    });
}

/// Page-by-page program loop
///
/// No transaction crosses a page boundary. Each page is bracketed by
/// write-enable and write-disable with a busy poll after the program.
/// Stops silently once the address reaches the end of the device.
///
/// Returns the number of bytes sent to the device.
pub fn write<T: FlashTransport + ?Sized>(
    transport: &mut T,
    geometry: &FlashGeometry,
    commands: &CommandSet,
    addr: u32,
    data: &[u8],
) -> usize {
    log::debug!("Asked to write {} bytes at address 0x{:08X}", data.len(), addr);

    let mut address = addr;
    let mut remaining = data;

    while !remaining.is_empty() {
        if address >= geometry.total_size() {
            log::debug!(
                "Write stopped at end of flash, {} bytes dropped",
                remaining.len()
            );
            break;
        }

        let len = remaining.len().min(geometry.page_remaining(address) as usize);
        let (page, rest) = remaining.split_at(len);

        log::trace!("Write {} bytes to flash at address 0x{:08X}", len, address);
        masked(transport, |t| t.send_command(commands.write_enable));
        masked(transport, |t| t.program_page(commands.program_page, address, page));
        wait_while_busy(transport);
        masked(transport, |t| t.send_command(commands.write_disable));

        address += len as u32;
        remaining = rest;
    }

    data.len() - remaining.len()
}

/// Sector-by-sector erase loop
///
/// The start is rounded down to a sector boundary with the length grown to
/// keep the requested range covered. A request covering the whole device
/// becomes one chip erase.
pub fn erase<T: FlashTransport + ?Sized>(
    transport: &mut T,
    geometry: &FlashGeometry,
    commands: &CommandSet,
    addr: u32,
    len: usize,
) -> Erased {
    log::debug!("Asked to erase {} bytes at address 0x{:08X}", len, addr);

    if geometry.is_whole_chip(addr, len) {
        log::debug!("Erasing entire chip");
        erase_step(transport, commands, |t| t.send_command(commands.chip_erase));
        return Erased::Chip;
    }

    let (start, mut remaining) = geometry.align_erase_start(addr, len);
    if start != addr {
        log::debug!("Adjusted starting erase address to 0x{:08X}", start);
    }

    let sector_size = geometry.sector_size();
    let mut address = start;
    let mut count = 0;

    while remaining > 0 && address < geometry.total_size() {
        debug_assert!(geometry.is_sector_aligned(address));
        log::trace!(
            "Erasing sector {} at address 0x{:08X} ({} bytes left)",
            address / sector_size,
            address,
            remaining
        );

        erase_step(transport, commands, |t| {
            t.erase_sector(commands.sector_erase, address)
        });

        count += 1;
        remaining -= remaining.min(sector_size as usize);
        address = match address.checked_add(sector_size) {
            Some(next) => next,
            None => break,
        };
    }

    Erased::Sectors { start, count }
}

fn erase_step<T, F>(transport: &mut T, commands: &CommandSet, command: F)
where
    T: FlashTransport + ?Sized,
    F: FnOnce(&mut T),
{
    masked(transport, |t| t.send_command(commands.write_enable));
    masked(transport, command);
    wait_while_busy(transport);
    masked(transport, |t| t.send_command(commands.write_disable));
}
