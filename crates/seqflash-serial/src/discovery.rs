//! Serial port enumeration and device port auto-detection

use serialport::{SerialPortInfo, SerialPortType};

use crate::error::{Result, SerialError};

/// Description and manufacturer keywords of common USB-UART bridges
pub const BRIDGE_KEYWORDS: &[&str] = &[
    "cp210",
    "cp2102",
    "cp2104",
    "ch340",
    "ch341",
    "ftdi",
    "ft232",
    "silicon labs",
    "usb-serial",
    "uart",
];

/// Name prefixes of USB serial devices
pub const USB_NAME_PREFIXES: &[&str] = &["/dev/ttyUSB", "/dev/ttyACM", "COM"];

/// Names never picked by auto-detection (on-board UARTs)
const EXCLUDED_NAMES: &[&str] = &["/dev/ttyS", "/dev/ttyAMA"];
const EXCLUDED_EXACT: &[&str] = &["COM1", "COM2"];

/// Operator-facing view of an enumerated port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescription {
    /// OS device name
    pub name: String,
    /// Product string, if reported
    pub description: Option<String>,
    /// Manufacturer string, if reported
    pub manufacturer: Option<String>,
    /// USB vendor and product IDs
    pub vid_pid: Option<(u16, u16)>,
}

impl PortDescription {
    /// Port with only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            manufacturer: None,
            vid_pid: None,
        }
    }

    fn mentions_bridge(&self) -> bool {
        [&self.description, &self.manufacturer]
            .into_iter()
            .flatten()
            .map(|s| s.to_lowercase())
            .any(|s| BRIDGE_KEYWORDS.iter().any(|kw| s.contains(kw)))
    }

    fn looks_like_usb(&self) -> bool {
        let excluded = EXCLUDED_NAMES.iter().any(|p| self.name.starts_with(p))
            || EXCLUDED_EXACT.contains(&self.name.as_str());
        !excluded && USB_NAME_PREFIXES.iter().any(|p| self.name.starts_with(p))
    }
}

impl From<SerialPortInfo> for PortDescription {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                description: usb.product,
                manufacturer: usb.manufacturer,
                vid_pid: Some((usb.vid, usb.pid)),
            },
            SerialPortType::PciPort => Self {
                description: Some("PCI serial port".to_string()),
                ..Self::named(info.port_name)
            },
            SerialPortType::BluetoothPort => Self {
                description: Some("Bluetooth serial port".to_string()),
                ..Self::named(info.port_name)
            },
            SerialPortType::Unknown => Self::named(info.port_name),
        }
    }
}

impl std::fmt::Display for PortDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {}",
            self.name,
            self.description.as_deref().unwrap_or("n/a")
        )?;
        if let Some(m) = &self.manufacturer {
            write!(f, " ({})", m)?;
        }
        if let Some((vid, pid)) = self.vid_pid {
            write!(f, " [{:04X}:{:04X}]", vid, pid)?;
        }
        Ok(())
    }
}

/// List the serial ports the OS currently reports
pub fn enumerate_ports() -> Result<Vec<PortDescription>> {
    let ports = serialport::available_ports().map_err(SerialError::Enumerate)?;
    log::debug!("Enumerated {} serial port(s)", ports.len());
    Ok(ports.into_iter().map(PortDescription::from).collect())
}

/// Pick the port a device is most likely attached to
///
/// Ports whose description or manufacturer names a known USB-UART bridge win;
/// otherwise the first USB-style device name that is not an on-board UART.
pub fn select_device_port(ports: &[PortDescription]) -> Option<&PortDescription> {
    if let Some(port) = ports.iter().find(|p| p.mentions_bridge()) {
        log::debug!("Selected {} by bridge description", port.name);
        return Some(port);
    }
    let port = ports.iter().find(|p| p.looks_like_usb())?;
    log::debug!("Selected {} by device name", port.name);
    Some(port)
}
