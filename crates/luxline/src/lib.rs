//! Luxline - continuous DMX512 output over a serial line
//!
//! DMX512 drives stage and architectural lighting: one *universe* of 512
//! byte-sized channel values, preceded by a start code, sent continuously
//! over an RS-485 line at 250 kbaud. Each packet begins with a *break*
//! (line held low) and a *mark-after-break* before the 513 data bytes.
//! Receivers rely on the refresh never pausing (many fixtures shut down
//! when updates stop), so transmission is a long-running loop, not a
//! one-shot send.
//!
//! This crate provides that loop. [`DmxTransmitter`] holds the current
//! frame behind a lock, and a dedicated worker thread keeps re-sending it
//! while channel values are updated concurrently from any thread.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use luxline::{DmxTransmitter, SerialTransport};
//!
//! # fn main() -> luxline::Result<()> {
//! // Pick a port (luxline::list_valid_ports() enumerates candidates)
//! let transport = SerialTransport::probe("/dev/ttyUSB0")?;
//!
//! let transmitter = DmxTransmitter::new(transport)?;
//! transmitter.set_channel(1, 255)?; // full intensity on channel 1
//! transmitter.start()?;
//!
//! // ... the universe refreshes continuously until ...
//! transmitter.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`frame`] - Universe frame model and protocol constants
//! - [`transmitter`] - Transmission engine and loop cadence
//! - [`transport`] - Serial line boundary (real and mock)
//! - [`ports`] - DMX-capable port discovery
//! - [`error`] - Error types

/// Error types
pub mod error;
/// DMX512 frame model
pub mod frame;
/// Serial port discovery
pub mod ports;
/// Transmission engine
pub mod transmitter;
/// Serial transport boundary
pub mod transport;

// Re-exports
pub use error::{DmxError, Result};
pub use frame::{Frame, DMX_CHANNELS, FRAME_LEN, START_CODE};
pub use ports::list_valid_ports;
pub use transmitter::{DmxTransmitter, TransmitTiming};
pub use transport::{DmxTransport, MockTransport, SerialTransport, TransportEvent, DMX_BAUD_RATE};
