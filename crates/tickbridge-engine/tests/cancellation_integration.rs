//! Cancellation across lifecycle transitions, threads and timeouts

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tickbridge_engine::sdk::{delay, once, wait_until, Wait};
use tickbridge_engine::{
    Bridge, BridgeConfig, BridgeError, LifecycleEvent, LifecycleState, RunPolicy, SlotStatus,
    CANCELLATION_MESSAGE,
};

fn bridge() -> Bridge {
    Bridge::new(BridgeConfig::default().with_background_workers(2)).unwrap()
}

#[test]
fn test_session_end_cancels_and_closes_registration() {
    let bridge = bridge();
    let handle = bridge.spawn(wait_until::<(), _>(|| false)).unwrap();
    bridge.pump_one_tick().unwrap();

    assert_eq!(
        bridge.on_host_lifecycle_transition(LifecycleEvent::SessionEnding),
        1
    );
    assert_eq!(bridge.authority().state(), LifecycleState::Closed);

    let err = handle.take_result().unwrap_err();
    assert!(matches!(
        err,
        BridgeError::CancellationAborted(ref msg) if msg == CANCELLATION_MESSAGE
    ));

    // Spawned while closed: canceled on the spot
    let late = bridge.spawn(once::<()>(Wait::NextFrame)).unwrap();
    assert_eq!(late.status(), SlotStatus::Canceled);

    bridge.on_host_lifecycle_transition(LifecycleEvent::SessionStarted);
    let fresh = bridge.spawn(once::<()>(Wait::NextFrame)).unwrap();
    assert_eq!(fresh.status(), SlotStatus::Pending);
}

#[test]
fn test_pause_and_resume_do_not_cancel() {
    let bridge = bridge();
    let handle = bridge.spawn(once::<()>(Wait::NextFrame)).unwrap();

    assert_eq!(
        bridge.on_host_lifecycle_transition(LifecycleEvent::Paused),
        0
    );
    assert_eq!(
        bridge.on_host_lifecycle_transition(LifecycleEvent::Resumed),
        0
    );
    assert_eq!(handle.status(), SlotStatus::Pending);

    bridge.pump_one_tick().unwrap();
    bridge.pump_one_tick().unwrap();
    assert_eq!(handle.status(), SlotStatus::Succeeded);
}

#[test]
fn test_completed_slots_leave_the_registry() {
    let bridge = bridge();
    let handles: Vec<_> = (0..5)
        .map(|_| bridge.spawn(once::<u8>(Wait::NextFrame)).unwrap())
        .collect();
    assert_eq!(bridge.authority().registered(), 5);

    bridge.pump_one_tick().unwrap();
    bridge.pump_one_tick().unwrap();
    assert!(handles.iter().all(|h| h.status() == SlotStatus::Succeeded));
    assert_eq!(bridge.authority().registered(), 0);
}

#[test]
fn test_cancel_racing_completion_latches_once() {
    for _ in 0..50 {
        let bridge = bridge();
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = bridge.spawn_blocking(|| Ok(7u32)).unwrap();
        let f = fired.clone();
        handle
            .register_continuation(
                move |_: ()| {
                    f.fetch_add(1, Ordering::SeqCst);
                },
                (),
                RunPolicy::WorkerAffine,
            )
            .unwrap();

        let canceler = {
            let bridge = bridge.clone();
            thread::spawn(move || {
                bridge.on_host_lifecycle_transition(LifecycleEvent::ModeChanging)
            })
        };
        let status = handle.wait();
        canceler.join().unwrap();

        assert!(matches!(
            status,
            SlotStatus::Succeeded | SlotStatus::Canceled
        ));
        assert_eq!(handle.status(), status);
        while fired.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(1));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        bridge.shutdown();
    }
}

#[test]
fn test_wait_or_cancel_from_another_thread() {
    let bridge = bridge();
    let handle = bridge
        .spawn(delay::<()>(Duration::from_secs(3600)))
        .unwrap();
    bridge.pump_one_tick().unwrap();

    let waiter = {
        let handle = handle.clone();
        thread::spawn(move || handle.wait_or_cancel(Duration::from_millis(20)))
    };
    assert_eq!(waiter.join().unwrap(), SlotStatus::Canceled);

    // The driver notices on the next tick
    let report = bridge.pump_one_tick().unwrap();
    assert!(report.surfaced.is_empty());
    assert_eq!(report.active, 0);
}

#[test]
fn test_release_refused_while_continuation_pending() {
    let bridge = bridge();
    let handle = bridge.spawn(once::<()>(Wait::NextFrame)).unwrap();
    handle
        .register_continuation(|_: ()| {}, (), RunPolicy::HostAffine)
        .unwrap();

    assert!(matches!(handle.release(), Err(BridgeError::ReleasePending)));

    handle.cancel();
    assert!(handle.release().is_ok());
    assert!(handle.release().is_ok());
}

#[test]
fn test_abandoned_rental_stops_stepping() {
    let bridge = bridge();
    let handle = bridge.spawn(wait_until::<(), _>(|| false)).unwrap();
    bridge.pump_one_tick().unwrap();

    handle.release().unwrap();
    let report = bridge.pump_one_tick().unwrap();
    assert!(report.surfaced.is_empty());
    assert_eq!(bridge.active_drivers(), 0);
}
