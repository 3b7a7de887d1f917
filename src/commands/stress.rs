//! Concurrent stress run against the emulated flash

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use indicatif::{ProgressBar, ProgressStyle};
use qflasher_arbiter::{ArbiterConfig, QspiFlash};
use qflasher_core::geometry::SECTOR_SIZE;
use qflasher_dummy::DummyFlash;

use super::CheckError;

/// Bytes written per iteration, starting mid-page so every write spans pages
const PATTERN_LEN: usize = 600;
const PATTERN_OFFSET: u32 = 0xF0;

/// Run `iterations` erase/write/read-back rounds on each of `threads` threads
///
/// Each thread owns a disjoint range of sectors, so every read-back must
/// match what that thread wrote.
pub fn run(
    transport: DummyFlash,
    config: ArbiterConfig,
    threads: usize,
    iterations: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let probe = transport.probe();
    let flash = Arc::new(QspiFlash::new(transport, config)?);

    let threads = threads.max(1);
    let sectors_per_thread = flash.sector_count() as usize / threads;
    if sectors_per_thread == 0 {
        return Err(format!(
            "{} threads need at least {} sectors, device has {}",
            threads,
            threads,
            flash.sector_count()
        )
        .into());
    }

    println!(
        "Stress: {} threads x {} iterations, {} sectors each",
        threads, iterations, sectors_per_thread
    );

    let pb = ProgressBar::new((threads * iterations) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rounds ({per_sec}, {eta})")?
            .progress_chars("#>-"),
    );

    let mismatches = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..threads)
        .map(|id| {
            let flash = Arc::clone(&flash);
            let mismatches = Arc::clone(&mismatches);
            let pb = pb.clone();

            thread::Builder::new()
                .name(format!("client{}", id))
                .spawn(move || -> qflasher_arbiter::Result<()> {
                    for round in 0..iterations {
                        let sector = id * sectors_per_thread + round % sectors_per_thread;
                        let addr = sector as u32 * SECTOR_SIZE;
                        let pattern = pattern(id, round);

                        flash.erase(addr, SECTOR_SIZE as usize)?;
                        flash.write(addr + PATTERN_OFFSET, &pattern)?;

                        let mut buf = vec![0u8; PATTERN_LEN];
                        flash.read(addr + PATTERN_OFFSET, &mut buf)?;
                        if buf != pattern {
                            log::error!("Read-back mismatch at 0x{:08X} (thread {}, round {})", addr, id, round);
                            mismatches.fetch_add(1, Ordering::Relaxed);
                        }
                        pb.inc(1);
                    }
                    Ok(())
                })
        })
        .collect::<Result<_, _>>()?;

    for worker in workers {
        match worker.join() {
            Ok(result) => result?,
            Err(_) => return Err("client thread panicked".into()),
        }
    }
    pb.finish_with_message("Stress run complete");

    // Drain the dispatcher before inspecting the emulator
    drop(flash);

    let calls = probe.calls();
    let reconfigurations = calls.iter().filter(|c| c.is_reconfiguration()).count();
    println!(
        "{} transport calls, {} reconfigurations, {} overlaps",
        calls.len(),
        reconfigurations,
        probe.overlaps()
    );

    let mismatches = mismatches.load(Ordering::Relaxed);
    if mismatches > 0 {
        return Err(CheckError::Mismatch {
            mismatches,
            checked: threads * iterations,
        }
        .into());
    }
    super::check_probe(&probe)?;

    println!("All {} read-backs matched", threads * iterations);
    Ok(())
}

fn pattern(id: usize, round: usize) -> Vec<u8> {
    (0..PATTERN_LEN)
        .map(|i| (i as u8) ^ ((id as u8) << 4) ^ (round as u8))
        .collect()
}
