//! Serial transport boundary
//!
//! DMX512 is carried over an RS-485 line driven at 250 kbaud with 8 data
//! bits, no parity, two stop bits and no flow control. Those settings are
//! mandated by the protocol, so they are fixed here rather than exposed as
//! configuration.
//!
//! [`DmxTransport`] is the seam between the engine and the hardware:
//! [`SerialTransport`] drives a real port through the `serialport` crate,
//! [`MockTransport`] records line activity in memory for tests and headless
//! runs.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, StopBits};
use tracing::debug;

use crate::error::{DmxError, Result};

/// Line rate mandated by DMX512
pub const DMX_BAUD_RATE: u32 = 250_000;

/// Timeout applied to writes on the open line
const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// A byte-oriented serial line capable of carrying DMX512.
///
/// Implementations own the line lifecycle (open/close), the break condition
/// used to mark the start of a packet, and raw byte output. All methods
/// report failures through [`DmxError`]; none panic.
pub trait DmxTransport: Send {
    /// Confirm the line accepts the DMX512 settings by opening and
    /// immediately closing it. Leaves the transport closed.
    fn validate(&mut self) -> Result<()>;

    /// Open the line with the DMX512 settings. No-op if already open.
    fn open(&mut self) -> Result<()>;

    /// Close the line. No-op if already closed.
    fn close(&mut self) -> Result<()>;

    /// Whether the line is currently open
    fn is_open(&self) -> bool;

    /// Drive the line into the break condition
    fn set_break(&mut self) -> Result<()>;

    /// Return the line to mark (idle) level
    fn clear_break(&mut self) -> Result<()>;

    /// Write a raw byte sequence to the open line
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;
}

fn not_open() -> DmxError {
    DmxError::Transport(io::Error::new(
        io::ErrorKind::NotConnected,
        "serial port is not open",
    ))
}

/// Production transport over a system serial port.
pub struct SerialTransport {
    path: String,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    /// Wrap a device path without touching the device.
    ///
    /// Nothing is validated until [`DmxTransport::validate`] or
    /// [`DmxTransport::open`] runs; use [`SerialTransport::probe`] to
    /// configure and validate in one step.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            port: None,
        }
    }

    /// Configure a device for DMX512 and probe it.
    ///
    /// Opens the device with the fixed line settings and closes it again to
    /// confirm the OS/driver accepts them, then returns the configured
    /// (closed) transport. Fails with [`DmxError::Configuration`] when the
    /// device cannot be opened with those settings.
    pub fn probe(path: impl Into<String>) -> Result<Self> {
        let mut transport = Self::new(path);
        transport.validate()?;
        Ok(transport)
    }

    /// Device path this transport drives
    pub fn path(&self) -> &str {
        &self.path
    }

    fn open_port(&self) -> Result<Box<dyn serialport::SerialPort>> {
        serialport::new(self.path.as_str(), DMX_BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::Two)
            .flow_control(FlowControl::None)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|e| DmxError::Configuration(format!("{}: {}", self.path, e)))
    }
}

impl DmxTransport for SerialTransport {
    fn validate(&mut self) -> Result<()> {
        // A probe starts from a closed line
        self.port = None;
        let port = self.open_port()?;
        drop(port);
        debug!(port = %self.path, "serial port accepts DMX512 line settings");
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        if self.port.is_none() {
            self.port = Some(self.open_port()?);
            debug!(port = %self.path, "serial port opened");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!(port = %self.path, "serial port closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn set_break(&mut self) -> Result<()> {
        let port = self.port.as_ref().ok_or_else(not_open)?;
        port.set_break()
            .map_err(|e| DmxError::Transport(e.into()))
    }

    fn clear_break(&mut self) -> Result<()> {
        let port = self.port.as_ref().ok_or_else(not_open)?;
        port.clear_break()
            .map_err(|e| DmxError::Transport(e.into()))
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or_else(not_open)?;
        io::Write::write_all(port, bytes)?;
        Ok(())
    }
}

/// Line activity observed by a [`MockTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Closed,
    BreakAsserted,
    BreakCleared,
    Frame(Vec<u8>),
}

/// In-memory transport that records everything put on the line.
///
/// Useful for tests and for running the engine without hardware attached.
/// The event log and the write-failure switch are behind shared handles, so
/// they stay usable after the transport has been moved into a transmitter.
#[derive(Default)]
pub struct MockTransport {
    events: Arc<Mutex<Vec<TransportEvent>>>,
    fail_writes: Arc<AtomicBool>,
    reject_settings: bool,
    open: bool,
}

impl MockTransport {
    /// A mock line that accepts the DMX512 settings
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock line that rejects the DMX512 settings at validation time
    pub fn rejecting_settings() -> Self {
        Self {
            reject_settings: true,
            ..Self::default()
        }
    }

    /// Shared handle to the recorded line activity
    pub fn events(&self) -> Arc<Mutex<Vec<TransportEvent>>> {
        Arc::clone(&self.events)
    }

    /// Shared switch that makes every subsequent write fail
    pub fn write_failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_writes)
    }

    fn record(&self, event: TransportEvent) {
        self.events.lock().push(event);
    }
}

impl DmxTransport for MockTransport {
    fn validate(&mut self) -> Result<()> {
        if self.reject_settings {
            return Err(DmxError::Configuration(
                "mock transport rejects DMX512 line settings".into(),
            ));
        }
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        self.validate()?;
        if !self.open {
            self.open = true;
            self.record(TransportEvent::Opened);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.record(TransportEvent::Closed);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_break(&mut self) -> Result<()> {
        if !self.open {
            return Err(not_open());
        }
        self.record(TransportEvent::BreakAsserted);
        Ok(())
    }

    fn clear_break(&mut self) -> Result<()> {
        if !self.open {
            return Err(not_open());
        }
        self.record(TransportEvent::BreakCleared);
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.open {
            return Err(not_open());
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DmxError::Transport(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "injected write failure",
            )));
        }
        self.record(TransportEvent::Frame(bytes.to_vec()));
        Ok(())
    }
}
