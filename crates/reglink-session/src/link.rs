use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::trace;

/// Largest datagram the control plane will ever carry. Control frames are
/// tiny, but enumeration broadcasts share the receive path on some ports.
const RECV_BUFFER_SIZE: usize = 1500;

/// One blocking datagram link to the device's control port.
///
/// The session layer owns retry, matching, and serialization; a link only
/// moves datagrams. Test doubles and device simulators implement this
/// trait in place of a real socket.
pub trait ControlLink: Send {
    /// Send one request datagram.
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Wait up to `window` for one datagram. `Ok(None)` means the window
    /// elapsed with nothing received.
    fn recv(&mut self, window: Duration) -> io::Result<Option<Vec<u8>>>;
}

/// [`ControlLink`] over a UDP socket bound to an ephemeral local port.
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpLink {
    pub fn open(peer_ip: &str, control_port: u16) -> io::Result<Self> {
        let peer_ip = peer_ip.parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("failed to parse peer address {peer_ip}"),
            )
        })?;
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        Ok(Self {
            socket,
            peer: SocketAddr::new(peer_ip, control_port),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl ControlLink for UdpLink {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        trace!(peer = %self.peer, len = datagram.len(), "send control datagram");
        self.socket.send_to(datagram, self.peer)?;
        Ok(())
    }

    fn recv(&mut self, window: Duration) -> io::Result<Option<Vec<u8>>> {
        if window.is_zero() {
            return Ok(None);
        }
        self.socket.set_read_timeout(Some(window))?;
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        match self.socket.recv_from(&mut buffer) {
            Ok((received, from)) => {
                trace!(%from, len = received, "received control datagram");
                buffer.truncate(received);
                Ok(Some(buffer))
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
