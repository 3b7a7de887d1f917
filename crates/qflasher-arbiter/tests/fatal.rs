mod common;

use std::env;
use std::process::Command;

use qflasher_arbiter::ArbiterConfig;
use qflasher_dummy::DummyConfig;

use common::flash_with;

/// Set when this test binary is re-run to host the aborting dispatcher
const CHILD_ENV: &str = "QFLASHER_ABORT_CHILD";

/// Runs in the child: exhausts the reconnect budget on the first operation
fn run_until_abort() -> ! {
    let config = ArbiterConfig::from_params("retries=2,retry_delay=0").unwrap();
    let (flash, probe) = flash_with(DummyConfig::default(), config);
    // One more failure than the budget allows
    probe.fail_next_connects(3);

    let mut buf = [0u8; 4];
    let _ = flash.read(0, &mut buf);

    // Only reached if the dispatcher kept going
    std::process::exit(0);
}

#[test]
fn test_reconnect_exhaustion_aborts() {
    if env::var_os(CHILD_ENV).is_some() {
        run_until_abort();
    }

    let output = Command::new(env::current_exe().unwrap())
        .args([
            "--exact",
            "test_reconnect_exhaustion_aborts",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(CHILD_ENV, "1")
        .output()
        .unwrap();

    assert!(
        !output.status.success(),
        "child exited cleanly: {}",
        String::from_utf8_lossy(&output.stdout)
    );

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // SIGABRT
        assert_eq!(output.status.signal(), Some(6));
    }
}
