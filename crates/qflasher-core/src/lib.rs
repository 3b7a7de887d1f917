//! qflasher-core - Transport-level building blocks for QSPI flash arbitration
//!
//! This crate holds everything that talks to a flash transport but does not
//! need threads: the device geometry and its clamping/alignment rules, the
//! device-mode state machine that decides when the transport must be
//! reconfigured, and the chunked read, page program and erase loops.
//!
//! The threaded arbiter lives in `qflasher-arbiter`. This crate is `no_std`
//! so the same loops can run directly on a target without an OS.
//!
//! # Features
//!
//! - `std` - Implement `std::error::Error` for [`Error`]
//!
//! # Example
//!
//! ```ignore
//! use qflasher_core::{geometry::FlashGeometry, ops, transport::CommandSet};
//!
//! fn read_header<T: FlashTransport>(t: &mut T, geometry: &FlashGeometry) {
//!     let mut buf = [0u8; 64];
//!     ops::read(t, geometry, &CommandSet::default(), 4096, 0, &mut buf);
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod error;
pub mod geometry;
pub mod mode;
pub mod ops;
pub mod spi;
pub mod transport;

pub use error::{Error, Result};
