//! Serial port discovery
//!
//! Finding a DMX-capable port means actually opening every candidate with
//! the DMX512 line settings, which can reset attached USB adapters. So
//! discovery is a deliberate, side-effecting call; nothing in this crate
//! runs it implicitly.

use tracing::{debug, warn};

use crate::transport::SerialTransport;

/// List the serial ports that accept the DMX512 line settings.
///
/// Every system-visible port is opened with the fixed settings and closed
/// again; only the names the OS/driver accepts are returned. Best-effort: a
/// port that fails or disappears mid-probe is skipped, and a failed
/// enumeration yields an empty list.
pub fn list_valid_ports() -> Vec<String> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("serial port enumeration failed: {e}");
            return Vec::new();
        }
    };

    ports
        .into_iter()
        .filter_map(|info| match SerialTransport::probe(info.port_name.as_str()) {
            Ok(_) => Some(info.port_name),
            Err(e) => {
                debug!(port = %info.port_name, "not DMX-capable: {e}");
                None
            }
        })
        .collect()
}
