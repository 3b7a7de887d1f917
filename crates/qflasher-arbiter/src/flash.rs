//! The flash gateway
//!
//! [`QspiFlash`] is the handle clients share. Every submission goes through
//! the admission lock, snapshots the caller's priority and lands on the
//! bounded request queue; the dispatcher thread does the rest.

use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, MutexGuard};
use qflasher_core::geometry::FlashGeometry;
use qflasher_core::mode::{OperationKind, TransferStrategy};
use qflasher_core::ops::{self, RetryPolicy};
use qflasher_core::transport::{CommandSet, FastReadMode, FlashTransport};

use crate::config::{ArbiterConfig, FastReadConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{ArbiterError, Result};
use crate::lock::{AdmissionGuard, AdmissionLock, SpinLock, SpinLockGuard};
use crate::park::{ParkHandshake, ParkState};
use crate::priority::{Priority, Scheduler, ThreadPriorities};
use crate::request::{OperationRequest, Request};

/// Name of the dispatcher thread
pub const DISPATCHER_THREAD_NAME: &str = "qspi_flash_op";

/// State shared between the gateway and the dispatcher
pub(crate) struct Shared<T> {
    transport: Mutex<T>,
    pub(crate) geometry: FlashGeometry,
    pub(crate) commands: CommandSet,
    pub(crate) read_chunk_size: usize,
    pub(crate) retry: RetryPolicy,
    pub(crate) admission: AdmissionLock,
    pub(crate) spinlock: Arc<SpinLock>,
    pub(crate) park: ParkHandshake,
    pub(crate) scheduler: Arc<dyn Scheduler>,
}

impl<T> Shared<T> {
    pub(crate) fn transport(&self) -> MutexGuard<'_, T> {
        self.transport.lock()
    }

    pub(crate) fn try_transport(&self) -> Option<MutexGuard<'_, T>> {
        self.transport.try_lock()
    }
}

/// Platform collaborators injected into the arbiter
#[derive(Clone)]
pub struct ArbiterHooks {
    /// Priority source and sink for priority inheritance
    pub scheduler: Arc<dyn Scheduler>,
    /// Lock shared with low-level code running outside this handle
    pub spinlock: Arc<SpinLock>,
}

impl Default for ArbiterHooks {
    fn default() -> Self {
        Self {
            scheduler: Arc::new(ThreadPriorities),
            spinlock: Arc::new(SpinLock::new()),
        }
    }
}

/// Thread-safe handle to one QSPI flash device
///
/// Reads block until their data is available. Writes and erases return as
/// soon as they are queued; their effects are visible to any request
/// submitted afterwards.
pub struct QspiFlash<T: FlashTransport + Send + 'static> {
    pub(crate) shared: Arc<Shared<T>>,
    queue: SyncSender<Request>,
    strategy: TransferStrategy,
    dispatcher: Option<JoinHandle<()>>,
}

/// Exclusive hold on the flash for the calling thread
///
/// While held, other threads' submissions and low-level calls are kept
/// out. The holder may still submit requests and take the lock again.
#[must_use = "the flash is unlocked when the guard is dropped"]
pub struct FlashLock<'a> {
    // Released before admission
    _spin: SpinLockGuard<'a>,
    _admission: AdmissionGuard<'a>,
}

impl<T: FlashTransport + Send + 'static> QspiFlash<T> {
    /// Bring up the device and start the dispatcher
    ///
    /// # Errors
    /// * `Core(ConnectFailed)` - the first connect failed
    /// * `Core(UnsupportedSectorSize)` - the device does not use 4 KiB sectors
    /// * `Core(QuadEnableFailed)` - quad I/O could not be enabled
    /// * `Spawn` - the dispatcher thread could not be started
    pub fn new(transport: T, config: ArbiterConfig) -> Result<Self> {
        Self::with_hooks(transport, config, ArbiterHooks::default())
    }

    /// Like [`QspiFlash::new`], with platform collaborators supplied
    pub fn with_hooks(mut transport: T, config: ArbiterConfig, hooks: ArbiterHooks) -> Result<Self> {
        let (geometry, strategy) = bring_up(&mut transport, &config)?;
        let commands = transport.command_set();

        log::info!(
            "Flash ready: {} bytes, {} byte pages, {} sectors, {:?} reads",
            geometry.total_size(),
            geometry.page_size(),
            geometry.sector_count(),
            strategy
        );

        let shared = Arc::new(Shared {
            transport: Mutex::new(transport),
            geometry,
            commands,
            read_chunk_size: config.read_chunk_size.max(1),
            retry: config.retry,
            admission: AdmissionLock::new(()),
            spinlock: hooks.spinlock,
            park: ParkHandshake::default(),
            scheduler: hooks.scheduler,
        });

        let (queue, requests) = mpsc::sync_channel(config.queue_depth);
        let dispatcher = Dispatcher::new(Arc::clone(&shared), requests, config.dispatcher_priority);
        let handle = thread::Builder::new()
            .name(DISPATCHER_THREAD_NAME.to_string())
            .spawn(move || dispatcher.run())
            .map_err(ArbiterError::Spawn)?;

        Ok(Self {
            shared,
            queue,
            strategy,
            dispatcher: Some(handle),
        })
    }

    /// Read `buf.len()` bytes starting at `addr`
    ///
    /// Bytes past the end of the device read as `0xFF`.
    pub fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.read_as(self.strategy.read_kind(), addr, buf)
    }

    /// Read with an explicit fast-read submode
    ///
    /// Falls back to a standard read when fast reads are not calibrated.
    pub fn read_mode(&self, addr: u32, buf: &mut [u8], mode: FastReadMode) -> Result<()> {
        self.read_as(self.strategy.read_kind_for(mode), addr, buf)
    }

    /// Queue a write of `data` at `addr`
    ///
    /// The data is copied before this returns. Bytes past the end of the
    /// device are dropped.
    pub fn write(&self, addr: u32, data: &[u8]) -> Result<()> {
        self.submit(|priority| Request::Op(OperationRequest::write(addr, data, priority)))
    }

    /// Queue an erase of `[addr, addr + len)`
    ///
    /// The start is rounded down to a sector boundary. Erasing from 0 over
    /// the whole device becomes a single chip erase.
    pub fn erase(&self, addr: u32, len: usize) -> Result<()> {
        self.submit(|priority| Request::Op(OperationRequest::erase(addr, len, priority)))
    }

    /// Take the flash for the calling thread
    pub fn lock(&self) -> FlashLock<'_> {
        let shared = &*self.shared;
        let reentry = shared.admission.is_owned_by_current_thread();
        let admission = shared.admission.lock();
        let spin = if reentry {
            shared.spinlock.relock()
        } else {
            shared.spinlock.lock()
        };

        FlashLock {
            _spin: spin,
            _admission: admission,
        }
    }

    /// Read path selected at bring-up
    pub fn strategy(&self) -> TransferStrategy {
        self.strategy
    }

    /// Device geometry
    pub fn geometry(&self) -> &FlashGeometry {
        &self.shared.geometry
    }

    /// Total flash size in bytes
    pub fn flash_size(&self) -> u32 {
        self.shared.geometry.total_size()
    }

    /// Program page size in bytes
    pub fn page_size(&self) -> u32 {
        self.shared.geometry.page_size()
    }

    /// Number of pages
    pub fn page_count(&self) -> u32 {
        self.shared.geometry.page_count()
    }

    /// Erase sector size in bytes
    pub fn sector_size(&self) -> u32 {
        self.shared.geometry.sector_size()
    }

    /// Number of erase sectors
    pub fn sector_count(&self) -> u32 {
        self.shared.geometry.sector_count()
    }

    /// Current park handshake state
    pub fn park_state(&self) -> ParkState {
        self.shared.park.state()
    }

    fn read_as(&self, kind: OperationKind, addr: u32, buf: &mut [u8]) -> Result<()> {
        let mut completion = None;
        self.submit(|priority| {
            let (request, done) = OperationRequest::read(kind, addr, buf.len(), priority);
            completion = Some(done);
            Request::Op(request)
        })?;

        let data = completion.ok_or(ArbiterError::Disconnected)?.wait()?;
        buf.copy_from_slice(&data);
        Ok(())
    }

    /// Admit the caller and queue one request built at its priority
    pub(crate) fn submit(&self, build: impl FnOnce(Priority) -> Request) -> Result<()> {
        let _admission = self.shared.admission.lock();
        let priority = self.shared.scheduler.current_priority();
        self.queue
            .send(build(priority))
            .map_err(|_| ArbiterError::Disconnected)
    }
}

impl<T: FlashTransport + Send + 'static> Drop for QspiFlash<T> {
    fn drop(&mut self) {
        if self.shared.park.state() == ParkState::Parked {
            log::warn!("Dropping flash handle with low-level window open");
            if let Err(e) = self.close_window() {
                log::error!("Failed to close low-level window: {}", e);
            }
        }

        if self.queue.send(Request::Terminate).is_err() {
            log::debug!("Dispatcher already stopped");
        }
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                log::error!("Flash dispatcher thread panicked");
            }
        }
    }
}

/// One-time device bring-up, leaving the transport unconfigured
fn bring_up<T: FlashTransport>(
    transport: &mut T,
    config: &ArbiterConfig,
) -> Result<(FlashGeometry, TransferStrategy)> {
    // A single attempt: a device that is absent at bring-up stays absent
    let no_retry = RetryPolicy {
        retries: 0,
        ..config.retry
    };
    ops::connect_with_retry(transport, &no_retry)?;

    let geometry = FlashGeometry::new(
        transport.flash_size(),
        transport.page_size(),
        transport.sector_size(),
    )?;
    transport.quad_enable()?;
    transport.disconnect();

    let strategy = match config.fast_read {
        Some(fast_read) => calibrate(transport, fast_read),
        None => TransferStrategy::Standard,
    };

    Ok((geometry, strategy))
}

fn calibrate<T: FlashTransport>(transport: &mut T, fast_read: FastReadConfig) -> TransferStrategy {
    transport.fast_read_setup();
    let calibrated = match transport.fast_read_calibrate(fast_read.calibration_addr) {
        Ok(()) => true,
        Err(e) => {
            log::warn!(
                "Fast-read calibration at 0x{:08X} failed ({}), using standard reads",
                fast_read.calibration_addr,
                e
            );
            false
        }
    };
    transport.fast_read_shutdown();

    TransferStrategy::from_calibration(fast_read.mode, calibrated)
}
