use super::traits::DatagramTransport;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::Result;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};

/// Non-blocking IPv4 UDP socket with address reuse and broadcast enabled.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind with SO_REUSEADDR so several discovery peers can share a port.
    pub fn bind_reusable(bind_addr: SocketAddrV4) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        // BSD-derived stacks need SO_REUSEPORT as well to share a UDP port.
        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
        socket.set_reuse_port(true)?;

        socket.bind(&SocketAddr::V4(bind_addr).into())?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;

        Ok(UdpTransport { socket: socket.into() })
    }

    pub fn broadcast(&self) -> Result<bool> {
        self.socket.broadcast()
    }
}

impl DatagramTransport for UdpTransport {
    fn send(&self, data: &[u8], destination: SocketAddr) -> Result<usize> {
        self.socket.send_to(data, destination)
    }

    fn receive(&self, buffer: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.socket.recv_from(buffer)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }
}
