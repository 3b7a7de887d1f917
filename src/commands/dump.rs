//! Hex dump through the gateway

use qflasher_arbiter::{ArbiterConfig, QspiFlash};
use qflasher_dummy::DummyFlash;

const BYTES_PER_LINE: usize = 16;

/// Print `length` bytes at `address`
pub fn run(
    transport: DummyFlash,
    config: ArbiterConfig,
    address: u32,
    length: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let flash = QspiFlash::new(transport, config)?;

    let mut data = vec![0u8; length];
    flash.read(address, &mut data)?;

    for (i, line) in data.chunks(BYTES_PER_LINE).enumerate() {
        let offset = address as u64 + (i * BYTES_PER_LINE) as u64;
        let hex: Vec<String> = line.iter().map(|b| format!("{:02X}", b)).collect();
        println!("{:08X}: {}", offset, hex.join(" "));
    }

    Ok(())
}
