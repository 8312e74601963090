use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::device::Device;
use crate::error::Result;
use crate::metadata::Metadata;

/// Process-wide device registry, deduplicating by serial number.
///
/// Discovery may report the same physical device many times; handing the
/// same `Arc<Device>` back for the same serial number keeps its sequence
/// counter and locks singular. Owned by the application entry point and
/// passed by reference to discovery code; there is no hidden global.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, Arc<Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `metadata` is complete enough to reach a device.
    pub fn enumerated(metadata: &Metadata) -> bool {
        metadata.serial_number.is_some()
            && metadata.peer_ip.is_some()
            && metadata.control_port.is_some()
    }

    /// The device described by `metadata`, creating it on first sight.
    /// Repeated discovery of the same serial number returns the same handle.
    pub fn device_for(&self, metadata: &Metadata) -> Result<Arc<Device>> {
        let serial_number = metadata.serial_number()?;
        let mut devices = self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(device) = devices.get(serial_number) {
            return Ok(Arc::clone(device));
        }
        let device = Arc::new(Device::from_metadata(metadata)?);
        devices.insert(serial_number.to_string(), Arc::clone(&device));
        Ok(device)
    }

    /// Drop every registered device handle.
    pub fn clear(&self) {
        let mut devices = self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for serial_number in devices.keys() {
            info!(serial_number, "removing device");
        }
        devices.clear();
    }
}
