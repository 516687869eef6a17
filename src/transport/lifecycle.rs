//! Ownership and bind/retry lifecycle of the engine's single UDP socket.
//!
//! ```text
//! Unbound --bind ok--------------------------> Bound
//! Unbound --addr in use--> Binding --retry ok--> Bound
//! Unbound --other error--> Unbound (logged, not retried)
//! any     --close--------------------------------> Closed
//! ```

use super::traits::DatagramTransport;
use super::udp::UdpTransport;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Unbound,
    /// A bind hit an address-in-use conflict and a retry is scheduled.
    Binding,
    Bound,
    Closed,
}

#[derive(Debug)]
pub enum BindOutcome {
    Bound(SocketAddr),
    Retrying { addr: SocketAddrV4, at: Instant },
    Failed(io::Error),
}

pub struct SocketLifecycle {
    state: SocketState,
    transport: Option<UdpTransport>,
    bind_addr: SocketAddrV4,
    retry_interval: Duration,
    retry_at: Option<Instant>,
    // false while the only socket is an ephemeral sender
    on_bind_addr: bool,
}

impl SocketLifecycle {
    pub fn new(bind_addr: SocketAddrV4, retry_interval: Duration) -> Self {
        SocketLifecycle {
            state: SocketState::Unbound,
            transport: None,
            bind_addr,
            retry_interval,
            retry_at: None,
            on_bind_addr: false,
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn transport(&self) -> Option<&UdpTransport> {
        self.transport.as_ref()
    }

    /// True once the socket is bound to the configured listen address.
    pub fn is_listening(&self) -> bool {
        self.on_bind_addr && self.transport.is_some()
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().and_then(|t| t.local_addr().ok())
    }

    /// Bind to the configured address. An address-in-use conflict schedules a
    /// retry `retry_interval` after `now`; any other failure leaves the state as is.
    pub fn bind(&mut self, now: Instant) -> BindOutcome {
        if self.state == SocketState::Closed {
            return BindOutcome::Failed(io::Error::new(ErrorKind::NotConnected, "socket closed"));
        }
        if self.is_listening() {
            if let Some(addr) = self.local_addr() {
                return BindOutcome::Bound(addr);
            }
        }

        match UdpTransport::bind_reusable(self.bind_addr) {
            Ok(transport) => {
                let local = transport.local_addr().unwrap_or(SocketAddr::V4(self.bind_addr));
                // Replaces any ephemeral sender.
                self.transport = Some(transport);
                self.on_bind_addr = true;
                self.retry_at = None;
                self.state = SocketState::Bound;
                BindOutcome::Bound(local)
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                let at = now + self.retry_interval;
                self.retry_at = Some(at);
                self.state = SocketState::Binding;
                BindOutcome::Retrying { addr: self.bind_addr, at }
            }
            Err(e) => {
                self.retry_at = None;
                self.state = if self.transport.is_some() {
                    SocketState::Bound
                } else {
                    SocketState::Unbound
                };
                BindOutcome::Failed(e)
            }
        }
    }

    /// Run the pending bind retry if it is due.
    pub fn poll_retry(&mut self, now: Instant) -> Option<BindOutcome> {
        match self.retry_at {
            Some(at) if now >= at => Some(self.bind(now)),
            _ => None,
        }
    }

    /// Socket to send from. Binds an ephemeral port on the configured address
    /// when nothing is bound yet.
    pub fn ensure_sender(&mut self) -> io::Result<&UdpTransport> {
        if self.state == SocketState::Closed {
            return Err(io::Error::new(ErrorKind::NotConnected, "socket closed"));
        }
        if self.transport.is_none() {
            let ephemeral = SocketAddrV4::new(*self.bind_addr.ip(), 0);
            self.transport = Some(UdpTransport::bind_reusable(ephemeral)?);
            self.on_bind_addr = false;
            if self.state == SocketState::Unbound {
                self.state = SocketState::Bound;
            }
        }
        self.transport
            .as_ref()
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "no socket"))
    }

    /// Cancel any pending retry and release the socket. Returns false if already closed.
    pub fn close(&mut self) -> bool {
        if self.state == SocketState::Closed {
            return false;
        }
        self.retry_at = None;
        self.transport = None;
        self.on_bind_addr = false;
        self.state = SocketState::Closed;
        true
    }
}
