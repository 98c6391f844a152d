//! Continuous DMX512 transmission engine
//!
//! [`DmxTransmitter`] owns one universe frame and a dedicated worker thread
//! that repeatedly puts a break / mark-after-break / 513-byte frame sequence
//! on the line. Receivers expect that refresh to never pause, so the loop
//! free-runs by default; [`TransmitTiming`] slows it down for receivers that
//! are picky about refresh rate.
//!
//! All operations are callable from any thread. Channel accessors only take
//! the frame lock; the worker snapshots the frame under that lock and does
//! the blocking serial I/O outside it, so writers never wait on the line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::error::{DmxError, Result};
use crate::frame::Frame;
use crate::transport::DmxTransport;

/// How long `stop()` waits for the worker to hand the line back
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Cadence of the transmission loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitTiming {
    /// How long the break is held. The protocol floor is 100 µs on the
    /// wire; the 1 ms default adds margin and survives coarse scheduler
    /// ticks.
    pub break_hold: Duration,
    /// Extra idle time between clearing the break and starting the frame
    /// write. The line turnaround already exceeds the protocol minimum, so
    /// the default adds none.
    pub mark_after_break: Duration,
    /// Minimum spacing between frame starts. Zero free-runs, refreshing as
    /// fast as break-hold plus the 513-byte write allows.
    pub frame_interval: Duration,
}

impl Default for TransmitTiming {
    fn default() -> Self {
        Self {
            break_hold: Duration::from_millis(1),
            mark_after_break: Duration::ZERO,
            frame_interval: Duration::ZERO,
        }
    }
}

impl TransmitTiming {
    /// Cap the refresh rate, e.g. `TransmitTiming::default().with_refresh_rate(30)`
    /// for receivers that drop frames above 30 Hz.
    pub fn with_refresh_rate(mut self, hz: u32) -> Self {
        self.frame_interval = Duration::from_secs(1) / hz.max(1);
        self
    }
}

/// State shared between the transmitter handle and the worker thread
struct Shared {
    frame: Mutex<Frame>,
    running: AtomicBool,
}

struct Worker {
    handle: JoinHandle<()>,
    handback: Receiver<Box<dyn DmxTransport>>,
}

/// Transport handle and worker, guarded together so concurrent `start()` /
/// `stop()` calls serialize instead of double-spawning.
struct Lifecycle {
    transport: Option<Box<dyn DmxTransport>>,
    worker: Option<Worker>,
}

/// Continuous DMX512 transmitter over a serial line.
///
/// Holds the current universe frame and manages the background transmission
/// loop. Construct it around a validated [`DmxTransport`], seed channel
/// values, then [`start`](Self::start); the loop keeps refreshing the line
/// until [`stop`](Self::stop).
///
/// ```no_run
/// use luxline::{DmxTransmitter, SerialTransport};
///
/// # fn main() -> luxline::Result<()> {
/// let transport = SerialTransport::probe("/dev/ttyUSB0")?;
/// let transmitter = DmxTransmitter::new(transport)?;
///
/// transmitter.set_channel(1, 255)?;
/// transmitter.start()?;
/// // ... fixtures are live; channels can be updated from any thread ...
/// transmitter.stop()?;
/// # Ok(())
/// # }
/// ```
pub struct DmxTransmitter {
    shared: Arc<Shared>,
    timing: TransmitTiming,
    lifecycle: Mutex<Lifecycle>,
}

impl DmxTransmitter {
    /// Take ownership of a transport and validate it.
    ///
    /// The frame starts out all-zero and the transport stays closed until
    /// [`start`](Self::start). Fails with [`DmxError::Configuration`] when
    /// the transport does not accept the DMX512 line settings.
    pub fn new<T: DmxTransport + 'static>(transport: T) -> Result<Self> {
        Self::with_timing(transport, TransmitTiming::default())
    }

    /// Like [`new`](Self::new), with a custom loop cadence.
    pub fn with_timing<T: DmxTransport + 'static>(
        transport: T,
        timing: TransmitTiming,
    ) -> Result<Self> {
        let mut transport: Box<dyn DmxTransport> = Box::new(transport);
        transport.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                frame: Mutex::new(Frame::new()),
                running: AtomicBool::new(false),
            }),
            timing,
            lifecycle: Mutex::new(Lifecycle {
                transport: Some(transport),
                worker: None,
            }),
        })
    }

    /// Get a channel value (channels are numbered 1..=512)
    pub fn channel(&self, index: u16) -> Result<u8> {
        self.shared.frame.lock().channel(index)
    }

    /// Set a channel value (channels are numbered 1..=512).
    ///
    /// Takes effect on the next loop iteration; the in-flight frame is
    /// never torn.
    pub fn set_channel(&self, index: u16, value: u8) -> Result<()> {
        self.shared.frame.lock().set_channel(index, value)
    }

    /// Snapshot of the full frame, consistent at a single point in time
    pub fn frame(&self) -> Frame {
        *self.shared.frame.lock()
    }

    /// Replace the whole frame atomically.
    ///
    /// `bytes` must be a full 513-byte wire image; slot 0 is forced to the
    /// standard start code. On a length mismatch the current frame is left
    /// fully intact.
    pub fn set_frame(&self, bytes: &[u8]) -> Result<()> {
        let frame = Frame::from_slice(bytes)?;
        *self.shared.frame.lock() = frame;
        Ok(())
    }

    /// Loop cadence this transmitter runs with
    pub fn timing(&self) -> TransmitTiming {
        self.timing
    }

    /// Whether the transmission loop is currently running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Open the line and start the transmission loop.
    ///
    /// Idempotent: a no-op while already running. Blocks briefly while the
    /// port opens.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if self.is_running() {
            return Ok(());
        }
        Self::reap_worker(&mut lifecycle);

        let mut transport = lifecycle.transport.take().ok_or_else(|| {
            DmxError::Configuration("serial transport is no longer available".into())
        })?;
        if let Err(e) = transport.open() {
            lifecycle.transport = Some(transport);
            return Err(e);
        }

        let (handback_tx, handback_rx) = bounded(1);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let timing = self.timing;
        let spawned = thread::Builder::new()
            .name("dmx-tx".to_string())
            .spawn(move || transmit_loop(transport, shared, timing, handback_tx));

        match spawned {
            Ok(handle) => {
                lifecycle.worker = Some(Worker {
                    handle,
                    handback: handback_rx,
                });
                info!("DMX output started");
                Ok(())
            }
            Err(e) => {
                // The closure never ran; the open port was dropped with it
                self.shared.running.store(false, Ordering::SeqCst);
                Err(DmxError::Transport(e))
            }
        }
    }

    /// Signal the loop to exit, wait for it, and close the line.
    ///
    /// Idempotent: a no-op while idle. Blocks until the worker acknowledges
    /// the stop, bounded by a 1 s safety timeout; the loop normally notices
    /// within one iteration.
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        self.shared.running.store(false, Ordering::SeqCst);

        let Some(worker) = lifecycle.worker.take() else {
            return Ok(());
        };

        match worker.handback.recv_timeout(STOP_TIMEOUT) {
            Ok(mut transport) => {
                let _ = worker.handle.join();
                transport.close()?;
                lifecycle.transport = Some(transport);
                info!("DMX output stopped");
                Ok(())
            }
            Err(_) => {
                // Stuck in a transport call. Abandon the port: the detached
                // thread drops it on exit, which closes the OS handle.
                warn!(
                    "transmit thread did not stop within {:?}; abandoning serial port",
                    STOP_TIMEOUT
                );
                Ok(())
            }
        }
    }

    /// Collect the transport from a loop that exited on its own
    fn reap_worker(lifecycle: &mut Lifecycle) {
        let Some(worker) = lifecycle.worker.take() else {
            return;
        };
        match worker.handback.recv_timeout(STOP_TIMEOUT) {
            Ok(transport) => {
                let _ = worker.handle.join();
                lifecycle.transport = Some(transport);
            }
            Err(_) => {
                warn!("previous transmit thread never exited; abandoning serial port");
            }
        }
    }
}

impl Drop for DmxTransmitter {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn transmit_loop(
    mut transport: Box<dyn DmxTransport>,
    shared: Arc<Shared>,
    timing: TransmitTiming,
    handback: Sender<Box<dyn DmxTransport>>,
) {
    debug!("transmit loop entered");

    while shared.running.load(Ordering::SeqCst) {
        let start = Instant::now();

        // Snapshot under the lock, transmit outside it
        let frame = *shared.frame.lock();

        if let Err(e) = send_frame(transport.as_mut(), &frame, &timing) {
            error!("DMX transmission failed, stopping output: {e}");
            shared.running.store(false, Ordering::SeqCst);
            let _ = transport.close();
            break;
        }
        trace!("frame transmitted");

        if !timing.frame_interval.is_zero() {
            let elapsed = start.elapsed();
            if elapsed < timing.frame_interval {
                interruptible_sleep(timing.frame_interval - elapsed, &shared.running);
            }
        }
    }

    debug!("transmit loop exited");
    // Receiver is gone if stop() timed out; the port then closes on drop
    let _ = handback.send(transport);
}

/// One break / mark-after-break / frame sequence
fn send_frame(
    transport: &mut dyn DmxTransport,
    frame: &Frame,
    timing: &TransmitTiming,
) -> Result<()> {
    transport.set_break()?;
    thread::sleep(timing.break_hold);
    transport.clear_break()?;
    if !timing.mark_after_break.is_zero() {
        thread::sleep(timing.mark_after_break);
    }
    transport.write_all(frame.as_bytes())
}

/// Sleep in short slices so a stop request is noticed quickly
fn interruptible_sleep(total: Duration, running: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(25);
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(SLICE));
    }
}
