//! Seeding the kernel ARP cache after a device reset.
//!
//! A reset drops the link, and the host flushes its ARP entry for the
//! device. Re-resolution is slow enough to eat most of a first-contact
//! timeout, so once re-enumeration has told us the device's fresh MAC and
//! IP we install the mapping directly.

use std::net::Ipv4Addr;

use crate::error::{DeviceError, Result};

/// Parse a `aa:bb:cc:dd:ee:ff` MAC address.
pub fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    let mut bytes = [0u8; 6];
    let mut parts = mac.split(':');
    for byte in bytes.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| invalid_mac(mac))?;
        *byte = u8::from_str_radix(part, 16).map_err(|_| invalid_mac(mac))?;
    }
    if parts.next().is_some() {
        return Err(invalid_mac(mac));
    }
    Ok(bytes)
}

fn invalid_mac(mac: &str) -> DeviceError {
    DeviceError::InvalidArgument(format!("invalid MAC address {mac:?}"))
}

/// Install a complete ARP entry for `client_ip` on `interface`.
///
/// Requires CAP_NET_ADMIN; callers treat failure as a lost optimization,
/// not a fault.
#[cfg(target_os = "linux")]
pub fn arp_set(interface: &str, client_ip: Ipv4Addr, mac: &[u8; 6]) -> Result<()> {
    use std::net::UdpSocket;
    use std::os::fd::AsRawFd;

    const SIOCSARP: libc::c_ulong = 0x8955;
    const ATF_COM: libc::c_int = 0x02;

    let interface_bytes = interface.as_bytes();
    // arp_dev is a fixed 16-byte field including the NUL terminator
    if interface_bytes.len() >= 16 {
        return Err(DeviceError::InvalidArgument(format!(
            "interface name {interface:?} is too long"
        )));
    }

    let mut request: libc::arpreq = unsafe { std::mem::zeroed() };

    // SAFETY: sockaddr and sockaddr_in are layout-compatible views of the
    // same storage; we only write within the smaller struct.
    let protocol_address =
        unsafe { &mut *(&mut request.arp_pa as *mut libc::sockaddr).cast::<libc::sockaddr_in>() };
    protocol_address.sin_family = libc::AF_INET as libc::sa_family_t;
    protocol_address.sin_addr.s_addr = u32::from(client_ip).to_be();

    request.arp_ha.sa_family = libc::ARPHRD_ETHER;
    for (slot, byte) in request.arp_ha.sa_data.iter_mut().zip(mac.iter()) {
        *slot = *byte as libc::c_char;
    }
    request.arp_flags = ATF_COM;
    for (slot, byte) in request.arp_dev.iter_mut().zip(interface_bytes.iter()) {
        *slot = *byte as libc::c_char;
    }

    // Any AF_INET datagram socket can carry the ioctl.
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    // SAFETY: `request` is a fully initialized arpreq and the descriptor is
    // owned by `socket` for the duration of the call.
    let rc = unsafe { libc::ioctl(socket.as_raw_fd(), SIOCSARP, &request) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn arp_set(_interface: &str, _client_ip: Ipv4Addr, _mac: &[u8; 6]) -> Result<()> {
    Err(DeviceError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "ARP cache seeding is only implemented on Linux",
    )))
}
