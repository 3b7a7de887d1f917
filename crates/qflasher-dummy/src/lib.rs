//! qflasher-dummy - In-memory QSPI flash emulator for testing
//!
//! This crate provides a [`FlashTransport`] that emulates a QSPI flash chip
//! in memory, including the fast-read hardware path. It is useful for
//! testing and development without real hardware.
//!
//! Besides storing data, the emulator checks the transport protocol the
//! arbiter must follow: normal transfers only while connected, fast reads
//! only while the fast-read hardware is set up, programs and erases only
//! after write enable. Breaches are counted as violations. Every call is
//! also recorded, and calls that overlap in time from two threads are
//! counted, so tests can prove the transport was strictly serialized.
//!
//! The emulator state is shared: [`DummyFlash::probe`] returns a
//! [`DummyProbe`] that stays usable after the transport has been handed
//! to the arbiter.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use qflasher_core::error::{Error, Result};
use qflasher_core::geometry::ERASED_VALUE;
use qflasher_core::spi::opcodes;
use qflasher_core::transport::{CommandSet, FastReadMode, FlashTransport};

/// Configuration for the dummy flash
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Flash size in bytes
    pub size: u32,
    /// Page size for programming
    pub page_size: u32,
    /// Sector size reported to the arbiter
    pub sector_size: u32,
    /// Number of initial `connect` calls that fail
    pub connect_failures: u32,
    /// Whether fast-read calibration finds the pattern
    pub calibration_ok: bool,
    /// Number of busy polls after each program or erase
    pub busy_polls: u32,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            size: 0x10_0000,
            page_size: 256,
            sector_size: 4096,
            connect_failures: 0,
            calibration_ok: true,
            busy_polls: 1,
        }
    }
}

/// One recorded transport call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCall {
    /// `connect`, with its outcome
    Connect {
        /// Whether the attempt succeeded
        ok: bool,
    },
    /// `disconnect`
    Disconnect,
    /// `quad_enable`
    QuadEnable,
    /// `read_raw`
    ReadRaw {
        /// Read command
        cmd: u8,
        /// Device address
        addr: u32,
        /// Number of bytes
        len: usize,
    },
    /// `send_command`
    Command(u8),
    /// `program_page`
    ProgramPage {
        /// Device address
        addr: u32,
        /// Number of bytes
        len: usize,
    },
    /// `erase_sector`
    EraseSector {
        /// Sector address
        addr: u32,
    },
    /// `fast_read_setup`
    FastReadSetup,
    /// `fast_read_calibrate`
    FastReadCalibrate {
        /// Calibration pattern address
        addr: u32,
    },
    /// `fast_read_apply_calibration`
    FastReadApplyCalibration,
    /// `fast_read_set_mode`
    FastReadSetMode(FastReadMode),
    /// `fast_read`
    FastRead {
        /// Device address
        addr: u32,
        /// Number of bytes
        len: usize,
    },
    /// `fast_read_shutdown`
    FastReadShutdown,
}

impl TransportCall {
    /// Whether this call reconfigures the transport rather than moving data
    pub fn is_reconfiguration(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Disconnect | Self::FastReadSetup | Self::FastReadShutdown
        )
    }
}

/// A recorded call together with the thread that made it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRecord {
    /// The call
    pub call: TransportCall,
    /// Calling thread
    pub thread: ThreadId,
}

#[derive(Debug)]
struct State {
    config: DummyConfig,
    data: Vec<u8>,
    connected: bool,
    fast_read_active: bool,
    calibrated: bool,
    fast_mode: FastReadMode,
    write_enabled: bool,
    busy: u32,
    connect_failures_left: u32,
    calls: Vec<CallRecord>,
    violations: Vec<String>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    in_call: AtomicBool,
    overlaps: AtomicUsize,
}

/// Marks one transport call in flight; a second concurrent call is an overlap
struct CallGuard<'a> {
    shared: &'a Shared,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.shared.in_call.store(false, Ordering::SeqCst);
    }
}

/// Dummy QSPI flash transport
///
/// Emulates a flash chip in memory for testing purposes.
pub struct DummyFlash {
    shared: Arc<Shared>,
    commands: CommandSet,
    interrupt_mask: u32,
}

/// Read-only view on a [`DummyFlash`] that outlives handing it away
#[derive(Clone)]
pub struct DummyProbe {
    shared: Arc<Shared>,
}

impl DummyFlash {
    /// Create a new dummy flash with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        let data = vec![ERASED_VALUE; config.size as usize];
        let state = State {
            connect_failures_left: config.connect_failures,
            config,
            data,
            connected: false,
            fast_read_active: false,
            calibrated: false,
            fast_mode: FastReadMode::Raw,
            write_enabled: false,
            busy: 0,
            calls: Vec::new(),
            violations: Vec::new(),
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                in_call: AtomicBool::new(false),
                overlaps: AtomicUsize::new(0),
            }),
            commands: CommandSet::default(),
            interrupt_mask: 0,
        }
    }

    /// Create a new dummy flash with default configuration (1 MiB)
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Create a dummy flash with pre-filled data
    pub fn with_data(config: DummyConfig, initial_data: &[u8]) -> Self {
        let flash = Self::new(config);
        {
            let mut state = flash.shared.lock();
            let len = core::cmp::min(initial_data.len(), state.data.len());
            state.data[..len].copy_from_slice(&initial_data[..len]);
        }
        flash
    }

    /// Get a probe sharing this emulator's state
    pub fn probe(&self) -> DummyProbe {
        DummyProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    fn enter(&self) -> CallGuard<'_> {
        if self.shared.in_call.swap(true, Ordering::SeqCst) {
            self.shared.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        CallGuard {
            shared: &self.shared,
        }
    }

    /// Run one recorded transport call against the emulator state
    fn call<R>(&self, call: TransportCall, f: impl FnOnce(&mut State) -> R) -> R {
        let _guard = self.enter();
        let mut state = self.shared.lock();
        state.calls.push(CallRecord {
            call,
            thread: thread::current().id(),
        });
        f(&mut state)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl State {
    fn violation(&mut self, what: String) {
        log::warn!("dummy flash protocol violation: {}", what);
        self.violations.push(what);
    }

    fn require_connected(&mut self, op: &str) {
        if !self.connected {
            self.violation(format!("{} while transport disconnected", op));
        }
        if self.fast_read_active {
            self.violation(format!("{} while fast-read hardware active", op));
        }
    }

    fn require_fast_read(&mut self, op: &str) {
        if !self.fast_read_active {
            self.violation(format!("{} without fast-read setup", op));
        }
        if self.connected {
            self.violation(format!("{} while normal transport connected", op));
        }
    }

    fn copy_out(&self, addr: u32, buf: &mut [u8]) -> bool {
        let start = addr as usize;
        match self.data.get(start..start + buf.len()) {
            Some(src) => {
                buf.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    fn take_write_enable(&mut self, op: &str) -> bool {
        if !self.write_enabled {
            self.violation(format!("{} without write enable", op));
            return false;
        }
        self.write_enabled = false;
        self.busy = self.config.busy_polls;
        true
    }
}

impl FlashTransport for DummyFlash {
    fn connect(&mut self) -> Result<()> {
        let _guard = self.enter();
        let mut state = self.shared.lock();
        let ok = if state.connect_failures_left > 0 {
            state.connect_failures_left -= 1;
            false
        } else {
            true
        };
        state.calls.push(CallRecord {
            call: TransportCall::Connect { ok },
            thread: thread::current().id(),
        });

        if !ok {
            return Err(Error::ProgrammerError);
        }
        if state.fast_read_active {
            state.violation("connect while fast-read hardware active".to_string());
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.call(TransportCall::Disconnect, |state| {
            state.connected = false;
        })
    }

    fn flash_size(&mut self) -> u32 {
        self.shared.lock().config.size
    }

    fn page_size(&mut self) -> u32 {
        self.shared.lock().config.page_size
    }

    fn sector_size(&mut self) -> u32 {
        self.shared.lock().config.sector_size
    }

    fn quad_enable(&mut self) -> Result<()> {
        self.call(TransportCall::QuadEnable, |state| {
            state.require_connected("quad enable");
            Ok(())
        })
    }

    fn command_set(&self) -> CommandSet {
        self.commands
    }

    fn read_raw(&mut self, cmd: u8, addr: u32, buf: &mut [u8]) {
        let call = TransportCall::ReadRaw {
            cmd,
            addr,
            len: buf.len(),
        };
        self.call(call, |state| {
            state.require_connected("read");
            if !matches!(cmd, opcodes::READ | opcodes::FAST_READ | opcodes::QIOR) {
                state.violation(format!("unsupported read command 0x{:02X}", cmd));
            }
            if !state.copy_out(addr, buf) {
                state.violation(format!("read past end at 0x{:08X}", addr));
            }
        })
    }

    fn send_command(&mut self, cmd: u8) {
        let commands = self.commands;
        self.call(TransportCall::Command(cmd), |state| {
            state.require_connected("command");
            if cmd == commands.write_enable {
                state.write_enabled = true;
            } else if cmd == commands.write_disable {
                state.write_enabled = false;
            } else if cmd == commands.chip_erase || cmd == opcodes::CE_60 {
                if state.take_write_enable("chip erase") {
                    state.data.fill(ERASED_VALUE);
                }
            } else {
                state.violation(format!("unknown command 0x{:02X}", cmd));
            }
        })
    }

    fn program_page(&mut self, _cmd: u8, addr: u32, data: &[u8]) {
        let call = TransportCall::ProgramPage {
            addr,
            len: data.len(),
        };
        self.call(call, |state| {
            state.require_connected("page program");
            let page_size = state.config.page_size;
            let last = addr + (data.len() as u32).saturating_sub(1);
            if addr / page_size != last / page_size {
                state.violation(format!("page program crosses page at 0x{:08X}", addr));
            }
            if !state.take_write_enable("page program") {
                return;
            }

            let start = addr as usize;
            match state.data.get_mut(start..start + data.len()) {
                // Flash programming: can only change 1 -> 0
                Some(dst) => dst.iter_mut().zip(data).for_each(|(d, &s)| *d &= s),
                None => state.violation(format!("program past end at 0x{:08X}", addr)),
            }
        })
    }

    fn erase_sector(&mut self, _cmd: u8, addr: u32) {
        self.call(TransportCall::EraseSector { addr }, |state| {
            state.require_connected("sector erase");
            let sector_size = state.config.sector_size as usize;
            if addr as usize % sector_size != 0 {
                state.violation(format!("unaligned sector erase at 0x{:08X}", addr));
            }
            if !state.take_write_enable("sector erase") {
                return;
            }

            let start = addr as usize & !(sector_size - 1);
            match state.data.get_mut(start..start + sector_size) {
                Some(sector) => sector.fill(ERASED_VALUE),
                None => state.violation(format!("erase past end at 0x{:08X}", addr)),
            }
        })
    }

    fn is_busy(&mut self) -> bool {
        let mut state = self.shared.lock();
        if state.busy > 0 {
            state.busy -= 1;
            return true;
        }
        false
    }

    fn fast_read_setup(&mut self) {
        self.call(TransportCall::FastReadSetup, |state| {
            if state.connected {
                state.violation("fast-read setup while transport connected".to_string());
            }
            state.fast_read_active = true;
        })
    }

    fn fast_read_calibrate(&mut self, pattern_addr: u32) -> Result<()> {
        let call = TransportCall::FastReadCalibrate { addr: pattern_addr };
        self.call(call, |state| {
            state.require_fast_read("calibration");
            state.calibrated = state.config.calibration_ok;
            if state.calibrated {
                Ok(())
            } else {
                Err(Error::CalibrationFailed)
            }
        })
    }

    fn fast_read_apply_calibration(&mut self) {
        self.call(TransportCall::FastReadApplyCalibration, |state| {
            state.require_fast_read("apply calibration");
        })
    }

    fn fast_read_set_mode(&mut self, mode: FastReadMode) {
        self.call(TransportCall::FastReadSetMode(mode), |state| {
            state.fast_mode = mode;
        })
    }

    fn fast_read(&mut self, addr: u32, buf: &mut [u8]) {
        let call = TransportCall::FastRead {
            addr,
            len: buf.len(),
        };
        self.call(call, |state| {
            state.require_fast_read("fast read");
            if !state.calibrated {
                state.violation("fast read without calibration".to_string());
            }
            if !state.copy_out(addr, buf) {
                state.violation(format!("fast read past end at 0x{:08X}", addr));
                return;
            }
            if state.fast_mode == FastReadMode::NibbleSwap {
                buf.iter_mut().for_each(|b| *b = b.rotate_left(4));
            }
        })
    }

    fn fast_read_shutdown(&mut self) {
        self.call(TransportCall::FastReadShutdown, |state| {
            state.fast_read_active = false;
        })
    }

    fn mask_interrupts(&mut self) -> u32 {
        let previous = self.interrupt_mask;
        self.interrupt_mask = u32::MAX;
        previous
    }

    fn restore_interrupts(&mut self, state: u32) {
        self.interrupt_mask = state;
    }

    fn delay_us(&mut self, _us: u32) {
        // No delay needed for in-memory operations
    }
}

impl DummyProbe {
    /// Copy of the current flash contents
    pub fn data(&self) -> Vec<u8> {
        self.shared.lock().data.clone()
    }

    /// Copy of `len` bytes of flash contents at `addr`
    pub fn data_at(&self, addr: u32, len: usize) -> Vec<u8> {
        let state = self.shared.lock();
        let start = addr as usize;
        state.data[start..start + len].to_vec()
    }

    /// Overwrite flash contents directly, bypassing the protocol
    pub fn fill(&self, addr: u32, bytes: &[u8]) {
        let mut state = self.shared.lock();
        let start = addr as usize;
        state.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// All calls recorded so far
    pub fn calls(&self) -> Vec<TransportCall> {
        self.shared.lock().calls.iter().map(|r| r.call).collect()
    }

    /// All calls recorded so far, with their calling thread
    pub fn records(&self) -> Vec<CallRecord> {
        self.shared.lock().calls.clone()
    }

    /// Make the next `count` connect attempts fail
    pub fn fail_next_connects(&self, count: u32) {
        self.shared.lock().connect_failures_left = count;
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.shared.lock().calls.clear();
    }

    /// Protocol violations seen so far
    pub fn violations(&self) -> Vec<String> {
        self.shared.lock().violations.clone()
    }

    /// Number of transport calls that overlapped another call in flight
    pub fn overlaps(&self) -> usize {
        self.shared.overlaps.load(Ordering::SeqCst)
    }

    /// Whether the normal transport is connected
    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Whether the fast-read hardware is set up
    pub fn is_fast_read_active(&self) -> bool {
        self.shared.lock().fast_read_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qflasher_core::geometry::FlashGeometry;
    use qflasher_core::ops;

    fn geometry() -> FlashGeometry {
        FlashGeometry::new(0x10_0000, 256, 4096).unwrap()
    }

    #[test]
    fn test_read_write() {
        let mut flash = DummyFlash::new_default();
        let probe = flash.probe();
        let cmds = CommandSet::default();
        flash.connect().unwrap();

        // Write some data
        let data = [0x12, 0x34, 0x56, 0x78];
        ops::write(&mut flash, &geometry(), &cmds, 0x1000, &data);

        // Read it back
        let mut buf = [0u8; 4];
        ops::read(&mut flash, &geometry(), &cmds, 4096, 0x1000, &mut buf);

        assert_eq!(buf, data);
        assert!(probe.violations().is_empty());
    }

    #[test]
    fn test_erase() {
        let mut flash = DummyFlash::new_default();
        let probe = flash.probe();
        let cmds = CommandSet::default();
        flash.connect().unwrap();

        ops::write(&mut flash, &geometry(), &cmds, 0, &[0u8; 256]);
        assert!(probe.data_at(0, 256).iter().all(|&b| b == 0));

        ops::erase(&mut flash, &geometry(), &cmds, 0, 4096);
        assert!(probe.data_at(0, 256).iter().all(|&b| b == 0xFF));
        assert!(probe.violations().is_empty());
    }

    #[test]
    fn test_program_requires_write_enable() {
        let mut flash = DummyFlash::new_default();
        let probe = flash.probe();
        flash.connect().unwrap();

        flash.program_page(0x02, 0, &[0u8; 4]);
        assert_eq!(probe.data_at(0, 4), vec![0xFF; 4]);
        assert_eq!(probe.violations().len(), 1);
    }

    #[test]
    fn test_read_while_disconnected_is_flagged() {
        let mut flash = DummyFlash::new_default();
        let probe = flash.probe();
        let mut buf = [0u8; 4];
        flash.read_raw(0x03, 0, &mut buf);
        assert!(!probe.violations().is_empty());
    }

    #[test]
    fn test_nibble_swap() {
        let config = DummyConfig::default();
        let mut flash = DummyFlash::with_data(config, &[0x12, 0xAB]);
        flash.fast_read_setup();
        flash.fast_read_calibrate(0).unwrap();

        let mut raw = [0u8; 2];
        flash.fast_read_set_mode(FastReadMode::Raw);
        flash.fast_read(0, &mut raw);
        assert_eq!(raw, [0x12, 0xAB]);

        let mut swapped = [0u8; 2];
        flash.fast_read_set_mode(FastReadMode::NibbleSwap);
        flash.fast_read(0, &mut swapped);
        assert_eq!(swapped, [0x21, 0xBA]);

        assert!(flash.probe().violations().is_empty());
    }

    #[test]
    fn test_alternate_chip_erase() {
        let mut flash = DummyFlash::new_default();
        let probe = flash.probe();
        flash.connect().unwrap();
        probe.fill(0, &[0u8; 16]);

        flash.send_command(opcodes::WREN);
        flash.send_command(opcodes::CE_60);
        assert_eq!(probe.data_at(0, 16), vec![0xFF; 16]);

        let mut buf = [0u8; 4];
        flash.read_raw(opcodes::READ, 0, &mut buf);
        assert!(probe.violations().is_empty());
        flash.read_raw(0x77, 0, &mut buf);
        assert_eq!(probe.violations().len(), 1);
    }

    #[test]
    fn test_connect_failures() {
        let config = DummyConfig {
            connect_failures: 2,
            ..DummyConfig::default()
        };
        let mut flash = DummyFlash::new(config);
        assert!(flash.connect().is_err());
        assert!(flash.connect().is_err());
        assert!(flash.connect().is_ok());
        assert_eq!(
            flash.probe().calls(),
            vec![
                TransportCall::Connect { ok: false },
                TransportCall::Connect { ok: false },
                TransportCall::Connect { ok: true },
            ]
        );
    }
}
