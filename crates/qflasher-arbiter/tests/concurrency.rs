mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use qflasher_arbiter::{
    ArbiterConfig, ArbiterHooks, Priority, Scheduler, ThreadPriorities, DISPATCHER_THREAD_NAME,
};
use qflasher_dummy::DummyConfig;

use common::{flash, flash_with_hooks};

#[test]
fn test_concurrent_clients_are_serialized() {
    let (flash, probe) = flash();
    let flash = Arc::new(flash);

    let workers: Vec<_> = (0..4u32)
        .map(|id| {
            let flash = Arc::clone(&flash);
            thread::spawn(move || {
                let base = 0x1_0000 * (id + 1);
                for round in 0..10u8 {
                    let pattern = vec![(id as u8) << 4 | round; 300];
                    flash.erase(base, 4096).unwrap();
                    flash.write(base, &pattern).unwrap();

                    let mut buf = vec![0u8; 300];
                    flash.read(base, &mut buf).unwrap();
                    assert_eq!(buf, pattern, "worker {} round {}", id, round);
                }
            })
        })
        .collect();

    let client_threads: Vec<_> = workers.iter().map(|w| w.thread().id()).collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(probe.overlaps(), 0);
    assert!(probe.violations().is_empty());

    // Every transport call came from the one dispatcher thread
    let records = probe.records();
    let dispatcher = records[0].thread;
    assert!(records.iter().all(|r| r.thread == dispatcher));
    assert!(!client_threads.contains(&dispatcher));
}

#[test]
fn test_requests_keep_submission_order() {
    let (flash, probe) = flash();

    flash.erase(0x4000, 4096).unwrap();
    flash.write(0x4000, &[0x0F; 16]).unwrap();
    flash.write(0x4000, &[0xF0; 16]).unwrap();
    let mut buf = [0u8; 16];
    flash.read(0x4000, &mut buf).unwrap();

    // Programming only clears bits, so both writes landed in order
    assert_eq!(buf, [0x00; 16]);
    assert!(probe.violations().is_empty());
}

/// Records every priority change made on the dispatcher thread
#[derive(Default)]
struct RecordingScheduler {
    inner: ThreadPriorities,
    dispatcher_changes: Mutex<Vec<Priority>>,
}

impl Scheduler for RecordingScheduler {
    fn current_priority(&self) -> Priority {
        self.inner.current_priority()
    }

    fn set_current_priority(&self, priority: Priority) {
        if thread::current().name() == Some(DISPATCHER_THREAD_NAME) {
            self.dispatcher_changes.lock().unwrap().push(priority);
        }
        self.inner.set_current_priority(priority);
    }
}

#[test]
fn test_dispatcher_inherits_caller_priority() {
    let scheduler = Arc::new(RecordingScheduler::default());
    let hooks = ArbiterHooks {
        scheduler: scheduler.clone(),
        ..ArbiterHooks::default()
    };
    let config = ArbiterConfig {
        dispatcher_priority: Priority(1),
        ..ArbiterConfig::default()
    };
    let (flash, _probe) = flash_with_hooks(DummyConfig::default(), config, hooks);

    scheduler.set_current_priority(Priority(7));
    let mut buf = [0u8; 4];
    flash.read(0, &mut buf).unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            scheduler.set_current_priority(Priority(3));
            flash.write(0x1000, &[0x00; 4]).unwrap();
        });
    });
    drop(flash);

    assert_eq!(
        *scheduler.dispatcher_changes.lock().unwrap(),
        vec![
            Priority(1),
            Priority(7),
            Priority(1),
            Priority(3),
            Priority(1)
        ]
    );
}

#[test]
fn test_flash_lock_excludes_other_threads() {
    let (flash, probe) = flash();
    let released = AtomicBool::new(false);
    let (locked_tx, locked_rx) = mpsc::channel();

    let flash = &flash;
    let released = &released;

    thread::scope(|s| {
        s.spawn(move || {
            let outer = flash.lock();
            let inner = flash.lock();

            // The holder can still use the flash
            flash.write(0x5000, &[0x33; 8]).unwrap();
            let mut buf = [0u8; 8];
            flash.read(0x5000, &mut buf).unwrap();
            assert_eq!(buf, [0x33; 8]);

            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            drop(inner);
            released.store(true, Ordering::SeqCst);
            drop(outer);
        });

        s.spawn(move || {
            locked_rx.recv().unwrap();
            let mut buf = [0u8; 8];
            flash.read(0x5000, &mut buf).unwrap();
            assert!(released.load(Ordering::SeqCst));
            assert_eq!(buf, [0x33; 8]);
        });
    });

    assert!(probe.violations().is_empty());
}
