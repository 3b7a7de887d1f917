#![allow(dead_code)]

use qflasher_arbiter::{ArbiterConfig, ArbiterHooks, FastReadConfig, QspiFlash};
use qflasher_core::transport::FastReadMode;
use qflasher_dummy::{DummyConfig, DummyFlash, DummyProbe, TransportCall};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Arbiter over a default 1 MiB emulated device, bring-up calls cleared
pub fn flash() -> (QspiFlash<DummyFlash>, DummyProbe) {
    flash_with(DummyConfig::default(), ArbiterConfig::default())
}

pub fn flash_with(
    dummy: DummyConfig,
    config: ArbiterConfig,
) -> (QspiFlash<DummyFlash>, DummyProbe) {
    flash_with_hooks(dummy, config, ArbiterHooks::default())
}

pub fn flash_with_hooks(
    dummy: DummyConfig,
    config: ArbiterConfig,
    hooks: ArbiterHooks,
) -> (QspiFlash<DummyFlash>, DummyProbe) {
    init_logging();
    let transport = DummyFlash::new(dummy);
    let probe = transport.probe();
    let flash = QspiFlash::with_hooks(transport, config, hooks).unwrap();
    probe.clear_calls();
    (flash, probe)
}

/// Arbiter over a default emulated device preloaded with `data` at 0
pub fn flash_with_data(data: &[u8]) -> (QspiFlash<DummyFlash>, DummyProbe) {
    init_logging();
    let transport = DummyFlash::with_data(DummyConfig::default(), data);
    let probe = transport.probe();
    let flash = QspiFlash::new(transport, ArbiterConfig::default()).unwrap();
    probe.clear_calls();
    (flash, probe)
}

pub fn fast_read_config(mode: FastReadMode) -> ArbiterConfig {
    ArbiterConfig {
        fast_read: Some(FastReadConfig {
            mode,
            calibration_addr: 0,
        }),
        ..ArbiterConfig::default()
    }
}

pub fn reconfigurations(calls: &[TransportCall]) -> Vec<TransportCall> {
    calls
        .iter()
        .copied()
        .filter(TransportCall::is_reconfiguration)
        .collect()
}
