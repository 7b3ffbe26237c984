//! Port presence probe

use std::time::Duration;

use seqflash_core::lifecycle::PortMonitor;

/// Presence probe backed by OS port enumeration
///
/// A port counts as present only if it is enumerated and can be opened and
/// released without error.
#[derive(Debug, Clone)]
pub struct SerialPortMonitor {
    baud: u32,
    probe_timeout: Duration,
}

impl SerialPortMonitor {
    /// Monitor that probes at `baud`
    pub fn new(baud: u32) -> Self {
        Self {
            baud,
            probe_timeout: Duration::from_millis(500),
        }
    }

    fn listed(port: &str) -> bool {
        match serialport::available_ports() {
            Ok(ports) => ports.iter().any(|p| p.port_name == port),
            Err(e) => {
                log::trace!("port enumeration failed: {}", e);
                false
            }
        }
    }

    fn opens(&self, port: &str) -> bool {
        match serialport::new(port, self.baud)
            .timeout(self.probe_timeout)
            .open()
        {
            // Dropping the handle releases the port
            Ok(_handle) => true,
            Err(e) => {
                log::trace!("probe open of {} failed: {}", port, e);
                false
            }
        }
    }
}

impl PortMonitor for SerialPortMonitor {
    fn is_present(&mut self, port: &str) -> bool {
        Self::listed(port) && self.opens(port)
    }
}
