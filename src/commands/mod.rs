//! Simulator subcommands
//!
//! Every command builds a fresh arbiter over an emulated device and checks
//! the emulator's protocol bookkeeping afterwards where it matters.

pub mod dump;
pub mod lowlevel;
pub mod stress;

use qflasher_dummy::DummyProbe;
use thiserror::Error;

/// A simulation run that completed but saw wrong results
#[derive(Error, Debug)]
pub enum CheckError {
    /// Data read back differs from what was written
    #[error("{mismatches} of {checked} checks did not match")]
    Mismatch { mismatches: usize, checked: usize },

    /// The emulator saw transport calls out of protocol
    #[error("{0} transport protocol violations")]
    Violations(usize),

    /// Two transport calls were in flight at once
    #[error("{0} overlapping transport calls")]
    Overlaps(usize),
}

/// Fail if the emulator recorded overlapping or out-of-protocol calls
pub fn check_probe(probe: &DummyProbe) -> Result<(), CheckError> {
    let violations = probe.violations();
    for violation in &violations {
        log::error!("Protocol violation: {}", violation);
    }
    if !violations.is_empty() {
        return Err(CheckError::Violations(violations.len()));
    }

    match probe.overlaps() {
        0 => Ok(()),
        n => Err(CheckError::Overlaps(n)),
    }
}
