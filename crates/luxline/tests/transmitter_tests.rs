use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use luxline::{DmxTransmitter, MockTransport, TransportEvent, FRAME_LEN};

/// Poll until `cond` holds or `timeout` elapses
fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_transmits_break_then_frame() {
    let mock = MockTransport::new();
    let events = mock.events();
    let tx = DmxTransmitter::new(mock).unwrap();

    tx.set_channel(1, 255).unwrap();
    tx.start().unwrap();
    assert!(tx.is_running());

    assert!(wait_until(Duration::from_secs(2), || {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, TransportEvent::Frame(_)))
    }));
    tx.stop().unwrap();

    let log = events.lock();
    let break_at = log
        .iter()
        .position(|e| *e == TransportEvent::BreakAsserted)
        .expect("no break asserted");
    let clear_at = log
        .iter()
        .position(|e| *e == TransportEvent::BreakCleared)
        .expect("break never cleared");
    let frame_at = log
        .iter()
        .position(|e| matches!(e, TransportEvent::Frame(_)))
        .expect("no frame written");
    assert!(break_at < clear_at && clear_at < frame_at);

    let TransportEvent::Frame(bytes) = &log[frame_at] else {
        unreachable!();
    };
    assert_eq!(bytes.len(), FRAME_LEN);
    assert_eq!(bytes[0], 0x00);
    assert_eq!(bytes[1], 255);
}

#[test]
fn test_start_is_idempotent() {
    let mock = MockTransport::new();
    let events = mock.events();
    let tx = DmxTransmitter::new(mock).unwrap();

    tx.start().unwrap();
    tx.start().unwrap();
    assert!(tx.is_running());

    assert!(wait_until(Duration::from_secs(2), || {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, TransportEvent::Frame(_)))
    }));
    tx.stop().unwrap();

    let log = events.lock();
    let opens = log.iter().filter(|e| **e == TransportEvent::Opened).count();
    let closes = log.iter().filter(|e| **e == TransportEvent::Closed).count();
    assert_eq!(opens, 1, "double start must not open the line twice");
    assert_eq!(closes, 1);
}

#[test]
fn test_stop_is_idempotent() {
    let tx = DmxTransmitter::new(MockTransport::new()).unwrap();

    tx.start().unwrap();
    tx.stop().unwrap();
    tx.stop().unwrap();
    assert!(!tx.is_running());
}

#[test]
fn test_no_writes_after_stop() {
    let mock = MockTransport::new();
    let events = mock.events();
    let tx = DmxTransmitter::new(mock).unwrap();

    tx.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, TransportEvent::Frame(_)))
    }));
    tx.stop().unwrap();
    assert!(!tx.is_running());

    // stop() waits for the loop to exit and closes the line, so the log is
    // final: last event is the close, and nothing more arrives.
    let len_after_stop = {
        let log = events.lock();
        assert_eq!(log.last(), Some(&TransportEvent::Closed));
        log.len()
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(events.lock().len(), len_after_stop);
}

#[test]
fn test_restart_after_stop() {
    let mock = MockTransport::new();
    let events = mock.events();
    let tx = DmxTransmitter::new(mock).unwrap();

    tx.start().unwrap();
    tx.stop().unwrap();
    let first_run_len = events.lock().len();

    tx.start().unwrap();
    assert!(tx.is_running());
    assert!(wait_until(Duration::from_secs(2), || {
        events.lock().len() > first_run_len
    }));
    tx.stop().unwrap();
}

#[test]
fn test_write_failure_stops_loop() {
    let mock = MockTransport::new();
    let events = mock.events();
    let fail_writes = mock.write_failure_switch();
    let tx = DmxTransmitter::new(mock).unwrap();

    tx.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, TransportEvent::Frame(_)))
    }));

    fail_writes.store(true, Ordering::SeqCst);
    assert!(
        wait_until(Duration::from_secs(2), || !tx.is_running()),
        "loop must mark itself idle after a write failure"
    );
    // The loop closed the line on its way out
    assert!(wait_until(Duration::from_secs(2), || {
        events.lock().last() == Some(&TransportEvent::Closed)
    }));

    // A dead loop is already stopped; stop() is a no-op, not an error
    tx.stop().unwrap();

    // And the transmitter can come back up once the line recovers
    fail_writes.store(false, Ordering::SeqCst);
    let len_before_restart = events.lock().len();
    tx.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        events.lock().len() > len_before_restart
    }));
    tx.stop().unwrap();
}

#[test]
fn test_frame_snapshots_never_torn() {
    let tx = Arc::new(DmxTransmitter::new(MockTransport::new()).unwrap());

    let writer = {
        let tx = Arc::clone(&tx);
        thread::spawn(move || {
            let mut image = [0u8; FRAME_LEN];
            for round in 0..500u32 {
                let fill = if round % 2 == 0 { 0x11 } else { 0xEE };
                image[1..].fill(fill);
                tx.set_frame(&image).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let tx = Arc::clone(&tx);
            thread::spawn(move || {
                for _ in 0..500 {
                    let frame = tx.frame();
                    let bytes = frame.as_bytes();
                    assert_eq!(bytes[0], 0x00);
                    let first = bytes[1];
                    assert!(
                        bytes[1..].iter().all(|&b| b == first),
                        "torn frame snapshot observed"
                    );
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn test_concurrent_writers_on_distinct_channels() {
    let tx = Arc::new(DmxTransmitter::new(MockTransport::new()).unwrap());
    tx.start().unwrap();

    let writers: Vec<_> = (0..8u16)
        .map(|i| {
            let tx = Arc::clone(&tx);
            let index = 1 + i * 60;
            let value = 100 + i as u8;
            thread::spawn(move || {
                for _ in 0..100 {
                    tx.set_channel(index, value).unwrap();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    tx.stop().unwrap();

    for i in 0..8u16 {
        assert_eq!(tx.channel(1 + i * 60).unwrap(), 100 + i as u8);
    }
}
