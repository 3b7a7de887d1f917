//! Low-level fast-read comparison

use qflasher_arbiter::{ArbiterConfig, FastReadConfig, QspiFlash};
use qflasher_core::transport::FastReadMode;
use qflasher_dummy::DummyFlash;

use super::CheckError;

/// Park the dispatcher, read a range raw and nibble-swapped, resume
///
/// Fast reads are enabled with calibration at address 0 unless the
/// parameters already configure them.
pub fn run(
    transport: DummyFlash,
    mut config: ArbiterConfig,
    address: u32,
    length: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let probe = transport.probe();
    config.fast_read.get_or_insert(FastReadConfig {
        mode: FastReadMode::Raw,
        calibration_addr: 0,
    });
    let flash = QspiFlash::new(transport, config)?;

    let seed: Vec<u8> = (0..length).map(|i| (i * 7 + 0x13) as u8).collect();
    flash.erase(address, length)?;
    flash.write(address, &seed)?;

    flash.ll_setup()?;
    println!("Dispatcher parked, low-level window open");

    let mut raw = vec![0u8; length];
    let mut swapped = vec![0u8; length];
    let reads = flash
        .ll_fast_read_mode(address, &mut raw, FastReadMode::Raw)
        .and_then(|()| flash.ll_fast_read_mode(address, &mut swapped, FastReadMode::NibbleSwap));
    flash.ll_shutdown()?;
    reads?;
    println!("Dispatcher resumed");

    let mismatches = raw
        .iter()
        .zip(&swapped)
        .filter(|(r, s)| r.rotate_left(4) != **s)
        .count();
    println!(
        "Compared {} bytes at 0x{:08X}: {} nibble-swap mismatches",
        length, address, mismatches
    );

    drop(flash);
    if mismatches > 0 {
        return Err(CheckError::Mismatch {
            mismatches,
            checked: length,
        }
        .into());
    }
    super::check_probe(&probe)?;
    Ok(())
}
