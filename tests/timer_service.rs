#![allow(missing_docs)]
//! Timer service end-to-end tests on the wall clock.
//!
//! These run the real scheduling thread. Deadlines are tens of milliseconds
//! and receives use generous timeouts so a loaded machine only slows the
//! tests down.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use timekeep::test_utils::init_test_logging;
use timekeep::time::{
    Ticker, Timer, TimerError, TimerService, WallClock, after_fn, delivery_channel,
};
use timekeep::{assert_with_log, test_complete, test_phase, test_section};

const PATIENCE: Duration = Duration::from_secs(10);

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

fn service() -> Arc<TimerService> {
    TimerService::new(Arc::new(WallClock::new()))
}

#[test]
fn timers_fire_in_deadline_order() {
    init_test("timers_fire_in_deadline_order");
    let service = service();
    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = delivery_channel::<()>();
    let now = service.now();

    // Registered out of order; the last to fire signals completion.
    for (label, offset_ms) in [(3u32, 60u64), (1, 20), (2, 40)] {
        let order = Arc::clone(&order);
        let done_tx = done_tx.clone();
        service
            .register(now + Duration::from_millis(offset_ms), Duration::ZERO, move |_| {
                let mut order = order.lock();
                order.push(label);
                if order.len() == 3 {
                    let _ = done_tx.try_send(());
                }
            })
            .unwrap();
    }

    let finished = done_rx.recv_timeout(PATIENCE);
    assert_with_log!(finished.is_ok(), "all fired", true, finished.is_ok());
    let order = order.lock().clone();
    assert_with_log!(order == vec![1, 2, 3], "deadline order", vec![1u32, 2, 3], order);
    test_complete!("timers_fire_in_deadline_order");
}

#[test]
fn timer_fires_no_earlier_than_deadline() {
    init_test("timer_fires_no_earlier_than_deadline");
    let service = service();
    let timer = Timer::new(&service, Duration::from_millis(30)).unwrap();
    let fired_at = timer.receiver().recv_timeout(PATIENCE).unwrap();
    assert_with_log!(
        fired_at >= timer.deadline_hint(),
        "not early",
        timer.deadline_hint(),
        fired_at
    );
    let stopped = timer.stop();
    assert_with_log!(!stopped, "stop after fire", false, stopped);
    test_complete!("timer_fires_no_earlier_than_deadline");
}

#[test]
fn stopped_timer_never_delivers() {
    init_test("stopped_timer_never_delivers");
    let service = service();
    let timer = Timer::new(&service, Duration::from_millis(50)).unwrap();
    let stopped = timer.stop();
    assert_with_log!(stopped, "stopped while pending", true, stopped);

    let got = timer.receiver().recv_timeout(Duration::from_millis(150));
    assert_with_log!(got.is_err(), "nothing delivered", "Timeout", got);
    assert_with_log!(service.is_empty(), "heap empty", true, service.is_empty());
    test_complete!("stopped_timer_never_delivers");
}

#[test]
fn earlier_registration_wakes_sleeping_loop() {
    init_test("earlier_registration_wakes_sleeping_loop");
    let service = service();
    // The loop sleeps toward a far deadline first.
    let far = Timer::new(&service, Duration::from_secs(3600)).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let near = Timer::new(&service, Duration::from_millis(10)).unwrap();
    let got = near.receiver().recv_timeout(PATIENCE);
    assert_with_log!(got.is_ok(), "near timer fired", true, got.is_ok());
    assert_with_log!(far.receiver().is_empty(), "far pending", true, far.receiver().is_empty());
    assert_with_log!(service.pending_count() == 1, "one pending", 1usize, service.pending_count());
    test_complete!("earlier_registration_wakes_sleeping_loop");
}

#[test]
fn ticker_ticks_until_stopped() {
    init_test("ticker_ticks_until_stopped");
    let service = service();
    let ticker = Ticker::new(&service, Duration::from_millis(10)).unwrap();

    test_section!("ticking");
    let mut ticks = Vec::new();
    for _ in 0..3 {
        ticks.push(ticker.receiver().recv_timeout(PATIENCE).unwrap());
    }
    let increasing = ticks.windows(2).all(|w| w[1] > w[0]);
    assert_with_log!(increasing, "tick times increase", "increasing", ticks);

    test_section!("stopped");
    let stopped = ticker.stop();
    assert_with_log!(stopped, "ticker was running", true, stopped);
    // At most one tick raced the stop.
    let _ = ticker.receiver().try_recv();
    let late = ticker.receiver().recv_timeout(Duration::from_millis(100));
    assert_with_log!(late.is_err(), "no ticks after stop", "Timeout", late);
    test_complete!("ticker_ticks_until_stopped");
}

#[test]
fn reschedule_during_fire_leaves_live_registration() {
    init_test("reschedule_during_fire_leaves_live_registration");
    let service = service();
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let fires = Arc::new(AtomicUsize::new(0));

    let handle = {
        let entered = Arc::clone(&entered);
        let release = Arc::clone(&release);
        let fires = Arc::clone(&fires);
        service
            .register(service.now() + Duration::from_millis(10), Duration::ZERO, move |_| {
                let n = fires.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    entered.wait();
                    release.wait();
                }
            })
            .unwrap()
    };

    // The callback is running outside the lock: the entry is already gone.
    entered.wait();
    let active = service.reschedule(&handle, service.now() + Duration::from_millis(10));
    let pending = service.pending_count();
    release.wait();

    assert_with_log!(!active, "reschedule reports not pending", false, active);
    assert_with_log!(pending == 1, "live registration left behind", 1usize, pending);

    let deadline = std::time::Instant::now() + PATIENCE;
    while fires.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let total = fires.load(Ordering::SeqCst);
    assert_with_log!(total == 2, "both fires happen", 2usize, total);
    test_complete!("reschedule_during_fire_leaves_live_registration");
}

#[test]
fn concurrent_registration_from_many_threads() {
    init_test("concurrent_registration_from_many_threads");
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;

    let service = service();
    let fired = Arc::new(AtomicUsize::new(0));
    let threads: Vec<_> = (0..THREADS)
        .map(|t| {
            let service = Arc::clone(&service);
            let fired = Arc::clone(&fired);
            std::thread::spawn(move || {
                let mut handles = Vec::new();
                for i in 0..PER_THREAD {
                    let fired = Arc::clone(&fired);
                    let offset = Duration::from_millis(5 + ((t * PER_THREAD + i) % 20) as u64);
                    handles.push(
                        service
                            .register(service.now() + offset, Duration::ZERO, move |_| {
                                fired.fetch_add(1, Ordering::SeqCst);
                            })
                            .unwrap(),
                    );
                }
                // Cancel every other registration; some may already have fired.
                handles
                    .iter()
                    .step_by(2)
                    .filter(|h| service.cancel(h))
                    .count()
            })
        })
        .collect();
    let cancelled: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();

    let expected = THREADS * PER_THREAD - cancelled;
    let deadline = std::time::Instant::now() + PATIENCE;
    while fired.load(Ordering::SeqCst) < expected && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    std::thread::sleep(Duration::from_millis(50));
    let total = fired.load(Ordering::SeqCst);
    assert_with_log!(total == expected, "every uncancelled timer fired once", expected, total);
    assert_with_log!(service.is_empty(), "nothing pending", true, service.is_empty());
    test_complete!(
        "concurrent_registration_from_many_threads",
        cancelled = cancelled,
        fired = total,
    );
}

#[test]
fn after_fn_can_be_cancelled() {
    init_test("after_fn_can_be_cancelled");
    let service = service();
    let (tx, rx) = delivery_channel::<()>();
    let cancelled_tx = tx.clone();
    let cancelled = after_fn(&service, Duration::from_millis(30), move || {
        let _ = cancelled_tx.try_send(());
    })
    .unwrap();
    let stopped = service.cancel(&cancelled);
    assert_with_log!(stopped, "cancelled before firing", true, stopped);

    let got = rx.recv_timeout(Duration::from_millis(150));
    assert_with_log!(got.is_err(), "cancelled fn never ran", "Timeout", got);

    after_fn(&service, Duration::from_millis(5), move || {
        let _ = tx.try_send(());
    })
    .unwrap();
    let ran = rx.recv_timeout(PATIENCE);
    assert_with_log!(ran.is_ok(), "fn ran", true, ran.is_ok());
    test_complete!("after_fn_can_be_cancelled");
}

#[test]
fn shutdown_rejects_new_timers() {
    init_test("shutdown_rejects_new_timers");
    let service = service();
    let pending = Timer::new(&service, Duration::from_secs(60)).unwrap();
    service.shutdown();
    service.shutdown();

    assert_with_log!(service.is_empty(), "pending dropped", true, service.is_empty());
    let stopped = pending.stop();
    assert_with_log!(!stopped, "nothing left to stop", false, stopped);
    let err = Timer::new(&service, Duration::from_millis(1)).err();
    let is_shutdown = matches!(err, Some(TimerError::Shutdown));
    assert_with_log!(is_shutdown, "register after shutdown", true, is_shutdown);
    test_complete!("shutdown_rejects_new_timers");
}
