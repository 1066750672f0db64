//! Device-path discovery.

use crate::error::{Result, SerialError};
use serde::Serialize;
use serialport::SerialPortType;
use std::io;

/// How a device is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

/// A candidate serial device node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub transport: Transport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

impl DeviceInfo {
    /// A device known only by its path.
    pub fn bare(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            transport: Transport::Unknown,
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl From<serialport::SerialPortInfo> for DeviceInfo {
    fn from(port: serialport::SerialPortInfo) -> Self {
        let mut info = DeviceInfo::bare(port.port_name);
        match port.port_type {
            SerialPortType::UsbPort(usb) => {
                info.transport = Transport::Usb;
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                info.serial_number = usb.serial_number;
                info.manufacturer = usb.manufacturer;
                info.product = usb.product;
            }
            SerialPortType::PciPort => info.transport = Transport::Pci,
            SerialPortType::BluetoothPort => info.transport = Transport::Bluetooth,
            SerialPortType::Unknown => {}
        }
        info
    }
}

/// Lists candidate device nodes.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceEnumerator: Send + Sync {
    fn list(&self) -> Result<Vec<DeviceInfo>>;
}

/// Enumerates through the OS (udev, IOKit, sysfs) via `serialport`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnumerator;

impl DeviceEnumerator for SystemEnumerator {
    fn list(&self) -> Result<Vec<DeviceInfo>> {
        let ports = serialport::available_ports()
            .map_err(|err| SerialError::os("available_ports", io::Error::from(err)))?;
        Ok(ports.into_iter().map(DeviceInfo::from).collect())
    }
}

/// Enumerate, sorted by path with duplicates removed.
pub fn list_devices(enumerator: &dyn DeviceEnumerator) -> Result<Vec<DeviceInfo>> {
    let mut devices = enumerator.list()?;
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    devices.dedup_by(|a, b| a.path == b.path);
    Ok(devices)
}

/// Look up one path.
pub fn find_device(enumerator: &dyn DeviceEnumerator, path: &str) -> Result<Option<DeviceInfo>> {
    Ok(enumerator.list()?.into_iter().find(|device| device.path == path))
}
