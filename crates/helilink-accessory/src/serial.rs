//! Serial accessory host
//!
//! Finds the accessory among the system's serial ports and opens it with
//! a short read timeout so the read loop can be stopped.
//!
//! Typical uses:
//! - Arduino/ADK boards over USB CDC-ACM
//! - USB-serial adapters wired to a flight controller

use parking_lot::Mutex;
use std::io::{Read, Write};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPort, SerialPortInfo, SerialPortType};
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::host::{AccessoryHost, AccessoryInfo, AccessoryStream, HostEventSink, PermissionRequest};

/// Serial host configuration
#[derive(Debug, Clone)]
pub struct SerialHostConfig {
    /// Explicit port path; when set, only this port is considered
    pub port: Option<String>,
    /// USB vendor id filter
    pub vendor_id: Option<u16>,
    /// USB product id filter
    pub product_id: Option<u16>,
    /// Baud rate (default: 115200)
    pub baud_rate: u32,
    /// Read timeout, bounds how long a close waits on the read loop
    pub read_timeout: Duration,
    /// Port enumeration interval for hot-plug detection
    pub poll_interval: Duration,
}

impl Default for SerialHostConfig {
    fn default() -> Self {
        Self {
            port: None,
            vendor_id: None,
            product_id: None,
            baud_rate: 115200,
            read_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Accessory host backed by serial ports
pub struct SerialAccessoryHost {
    config: SerialHostConfig,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SerialAccessoryHost {
    pub fn new(config: SerialHostConfig) -> Self {
        Self {
            config,
            watcher: Mutex::new(None),
        }
    }

    /// List every serial port, unfiltered
    pub fn list_ports() -> Result<Vec<AccessoryInfo>> {
        let ports = tokio_serial::available_ports()
            .map_err(|e| LinkError::Enumeration(format!("Failed to list ports: {}", e)))?;
        Ok(ports.iter().map(port_to_accessory).collect())
    }

    fn matches(&self, port: &SerialPortInfo) -> bool {
        if let Some(wanted) = &self.config.port {
            return &port.port_name == wanted;
        }

        match &port.port_type {
            SerialPortType::UsbPort(usb) => {
                self.config.vendor_id.map_or(true, |vid| vid == usb.vid)
                    && self.config.product_id.map_or(true, |pid| pid == usb.pid)
            }
            _ => false,
        }
    }

    fn scan(&self) -> Result<Vec<AccessoryInfo>> {
        let ports = tokio_serial::available_ports()
            .map_err(|e| LinkError::Enumeration(format!("Failed to list ports: {}", e)))?;

        let mut accessories: Vec<AccessoryInfo> = ports
            .iter()
            .filter(|port| self.matches(port))
            .map(port_to_accessory)
            .collect();

        // Pseudo terminals and some adapters are never enumerated
        if let Some(wanted) = &self.config.port {
            if accessories.is_empty() && std::path::Path::new(wanted).exists() {
                accessories.push(AccessoryInfo::new(wanted.clone()));
            }
        }

        accessories.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accessories)
    }
}

impl AccessoryHost for SerialAccessoryHost {
    fn accessories(&self) -> Result<Vec<AccessoryInfo>> {
        self.scan()
    }

    fn has_permission(&self, accessory: &AccessoryInfo) -> bool {
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&accessory.id)
            .is_ok()
    }

    fn request_permission(&self, request: PermissionRequest) {
        // Serial ports have no interactive grant; access comes from group
        // membership, which only the operator can change.
        warn!(
            "No read/write access to {}; add the user to the port's group (e.g. dialout)",
            request.accessory()
        );
        request.deny();
    }

    fn open(&self, accessory: &AccessoryInfo) -> Result<AccessoryStream> {
        let port = tokio_serial::new(&accessory.id, self.config.baud_rate)
            .timeout(self.config.read_timeout)
            .open()
            .map_err(|e| LinkError::OpenFailed(format!("Failed to open {}: {}", accessory.id, e)))?;

        let reader = port.try_clone()?;

        info!(
            "Serial port opened: {} @ {} baud",
            accessory.id, self.config.baud_rate
        );

        Ok(AccessoryStream {
            reader: Box::new(PortHalf(reader)),
            writer: Box::new(PortHalf(port)),
        })
    }

    fn watch(&self, events: HostEventSink) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime, serial hot-plug detection disabled");
            return;
        };

        let interval = self.config.poll_interval;
        let config = self.config.clone();
        let task = runtime.spawn(async move {
            let host = SerialAccessoryHost::new(config);
            let mut known = host.scan().unwrap_or_default();
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                let current = match host.scan() {
                    Ok(current) => current,
                    Err(e) => {
                        debug!("Serial scan failed: {}", e);
                        continue;
                    }
                };

                for accessory in current.iter().filter(|a| !known.contains(a)) {
                    if !events.attached(accessory.clone()) {
                        return;
                    }
                }
                for accessory in known.iter().filter(|a| !current.contains(a)) {
                    if !events.detached(accessory.clone()) {
                        return;
                    }
                }
                known = current;
            }
        });

        if let Some(previous) = self.watcher.lock().replace(task) {
            previous.abort();
        }
    }
}

impl Drop for SerialAccessoryHost {
    fn drop(&mut self) {
        if let Some(task) = self.watcher.lock().take() {
            task.abort();
        }
    }
}

/// One direction of an open serial port
struct PortHalf(Box<dyn SerialPort>);

impl Read for PortHalf {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for PortHalf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

fn port_to_accessory(port: &SerialPortInfo) -> AccessoryInfo {
    let mut accessory = AccessoryInfo::new(port.port_name.clone());
    if let SerialPortType::UsbPort(usb) = &port.port_type {
        accessory.vendor_id = Some(usb.vid);
        accessory.product_id = Some(usb.pid);
        accessory.manufacturer = usb.manufacturer.clone();
        accessory.product = usb.product.clone();
        accessory.serial_number = usb.serial_number.clone();
    }
    accessory
}
