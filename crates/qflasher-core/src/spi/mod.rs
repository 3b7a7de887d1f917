//! SPI opcodes used by the arbiter
//!
//! Only the commands the transfer loops issue are defined here; the
//! transport collaborator owns command framing.

pub mod opcodes;

pub use opcodes::*;
