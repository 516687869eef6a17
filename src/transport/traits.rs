use std::io::Result;
use std::net::SocketAddr;

/// Trait representing a connectionless datagram channel.
pub trait DatagramTransport: Send + Sync {
    /// Send one datagram to `destination`.
    fn send(&self, data: &[u8], destination: SocketAddr) -> Result<usize>;

    /// Receive one datagram.
    /// Returns the number of bytes read and the source address.
    /// Non-blocking transports report `WouldBlock` when nothing is pending.
    fn receive(&self, buffer: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Get the local socket address.
    fn local_addr(&self) -> Result<SocketAddr>;
}
