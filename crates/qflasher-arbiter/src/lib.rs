//! qflasher-arbiter - Thread-safe access to one QSPI flash device
//!
//! Many threads share a single flash chip whose transport can be set up
//! either for normal command transfers or for calibrated fast reads. This
//! crate serializes their requests through one dispatcher thread:
//!
//! - [`QspiFlash`] is the gateway. Submissions pass a recursive admission
//!   lock, carry the caller's priority and land on a bounded queue.
//! - The dispatcher executes requests in order, reconfiguring the transport
//!   only when the next operation needs the other configuration, and runs
//!   each one at its submitter's priority.
//! - The low-level path (`ll_*`) parks the dispatcher and reads directly,
//!   without ever blocking.
//!
//! # Example
//!
//! ```
//! use qflasher_arbiter::{ArbiterConfig, QspiFlash};
//! use qflasher_dummy::DummyFlash;
//!
//! let flash = QspiFlash::new(DummyFlash::new_default(), ArbiterConfig::default()).unwrap();
//!
//! flash.erase(0x1000, 4096).unwrap();
//! flash.write(0x1000, b"hello").unwrap();
//!
//! let mut buf = [0u8; 5];
//! flash.read(0x1000, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello");
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
mod dispatcher;
pub mod error;
mod flash;
pub mod lock;
mod lowlevel;
pub mod park;
pub mod priority;
mod request;

pub use config::{ArbiterConfig, FastReadConfig};
pub use error::{ArbiterError, Result};
pub use flash::{ArbiterHooks, FlashLock, QspiFlash, DISPATCHER_THREAD_NAME};
pub use lock::SpinLock;
pub use park::ParkState;
pub use priority::{Priority, Scheduler, ThreadPriorities};
