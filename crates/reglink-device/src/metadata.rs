use serde::{Deserialize, Serialize};

use reglink_session::Timeout;

use crate::error::{DeviceError, Result};

/// Enumeration metadata describing one discovered device.
///
/// Produced by the discovery service; a usable record carries at least
/// {serial_number, peer_ip, control_port}. The link-layer fields are
/// present in records learned during reset recovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number_checking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board_id: Option<u32>,
    /// Host interface the device was discovered on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    /// The device's IP address as seen from the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_id: Option<String>,
}

impl Metadata {
    pub fn serial_number(&self) -> Result<&str> {
        require(self.serial_number.as_deref(), "serial_number")
    }

    pub fn peer_ip(&self) -> Result<&str> {
        require(self.peer_ip.as_deref(), "peer_ip")
    }

    pub fn control_port(&self) -> Result<u16> {
        self.control_port
            .ok_or(DeviceError::MissingMetadata("control_port"))
    }
}

fn require<'a>(field: Option<&'a str>, name: &'static str) -> Result<&'a str> {
    field.ok_or(DeviceError::MissingMetadata(name))
}

/// Discovery collaborator consumed during reset recovery.
///
/// Implementations watch enumeration traffic and return the metadata of
/// the channel at `peer_ip` once the device announces itself again.
pub trait Enumerator {
    fn find_channel(&self, peer_ip: &str, timeout: &Timeout) -> Result<Metadata>;
}
