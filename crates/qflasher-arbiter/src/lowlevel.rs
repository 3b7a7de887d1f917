//! Low-level bypass path
//!
//! For latency-sensitive callers that cannot wait behind the queue. The
//! caller opens a window with [`QspiFlash::ll_setup`], which parks the
//! dispatcher and claims the fast-read hardware, reads directly with the
//! `ll_*` calls, then closes it with [`QspiFlash::ll_shutdown`]. Reads
//! never block: if the flash is busy they fail with `LockUnavailable`.

use qflasher_core::mode::TransferStrategy;
use qflasher_core::ops;
use qflasher_core::transport::{FastReadMode, FlashTransport};
use qflasher_core::Error;

use crate::error::{ArbiterError, Result};
use crate::flash::QspiFlash;
use crate::park::ParkState;
use crate::request::Request;

impl<T: FlashTransport + Send + 'static> QspiFlash<T> {
    /// Park the dispatcher and set up fast reads for direct access
    ///
    /// Blocks until queued work ahead of the park has drained.
    ///
    /// # Errors
    /// * `Core(CalibrationFailed)` - fast reads were not calibrated at bring-up
    /// * `AlreadyParked` - a window is already open
    pub fn ll_setup(&self) -> Result<()> {
        if self.strategy() == TransferStrategy::Standard {
            return Err(ArbiterError::Core(Error::CalibrationFailed));
        }

        let _exclusive = self.lock();
        self.shared.park.request()?;
        if let Err(e) = self.submit(|_| Request::LowLevelSetup) {
            self.shared.park.cancel();
            return Err(e);
        }
        self.shared.park.wait_parked();

        let mut transport = self.shared.transport();
        transport.fast_read_setup();
        transport.fast_read_apply_calibration();
        log::debug!("Low-level flash window open");
        Ok(())
    }

    /// Release the fast-read hardware and resume the dispatcher
    ///
    /// # Errors
    /// * `NotParked` - no window is open, or it was opened by another thread
    pub fn ll_shutdown(&self) -> Result<()> {
        if !self.shared.park.is_owned_by_current_thread() {
            return Err(ArbiterError::NotParked);
        }
        self.close_window()
    }

    /// Read through the fast-read hardware in the calibrated submode
    ///
    /// # Errors
    /// * `NotParked` - no window is open
    /// * `LockUnavailable` - the flash is held by another context
    pub fn ll_read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let mode = self.strategy().fast_read_mode().unwrap_or_default();
        self.ll_fast_read_mode(addr, buf, mode)
    }

    /// Read through the fast-read hardware in the given submode
    ///
    /// # Errors
    /// * `NotParked` - no window is open
    /// * `LockUnavailable` - the flash is held by another context
    pub fn ll_fast_read_mode(&self, addr: u32, buf: &mut [u8], mode: FastReadMode) -> Result<()> {
        log::debug!("Asked to ll read {} bytes at address 0x{:08X}", buf.len(), addr);

        let shared = &*self.shared;
        if shared.park.state() != ParkState::Parked {
            return Err(ArbiterError::NotParked);
        }

        // Submitters queued behind the window hold admission, not the spinlock
        let _spin = shared.spinlock.try_lock().ok_or(ArbiterError::LockUnavailable)?;
        let mut transport = shared.try_transport().ok_or(ArbiterError::LockUnavailable)?;

        // The window may have closed while the locks were taken
        if shared.park.state() != ParkState::Parked {
            return Err(ArbiterError::NotParked);
        }

        ops::fast_read(
            &mut *transport,
            &shared.geometry,
            shared.read_chunk_size,
            addr,
            buf,
            Some(mode),
        );
        Ok(())
    }

    /// Shut fast reads down and resume, holding the transport throughout
    pub(crate) fn close_window(&self) -> Result<()> {
        let mut transport = self.shared.transport();
        if self.shared.park.state() != ParkState::Parked {
            return Err(ArbiterError::NotParked);
        }
        transport.fast_read_shutdown();
        self.shared.park.resume()?;
        log::debug!("Low-level flash window closed");
        Ok(())
    }
}
