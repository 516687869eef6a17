use super::announcer::{ActiveAnnouncement, Announcement, AnnouncementId};
use super::descriptor::ServiceDescriptor;
use super::events::{DiscoveryEvent, EventBus};
use super::filter::MatchFilter;
use super::interfaces::{InterfaceSource, SystemInterfaces};
use super::status::{ConnectivityStatus, StatusTracker};
use crate::error::{EngineError, Result};
use crate::logging::{DiscoveryLogger, LogFacadeLogger, LogLevel};
use crate::runtime::config::EngineConfig;
use crate::transport::{BindOutcome, DatagramTransport, SocketLifecycle, SocketState};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

const COMPONENT: &str = "Discovery";

/// Largest UDP payload over IPv4.
const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug)]
struct ListenSession {
    filter: MatchFilter,
    once: bool,
}

/// Announces services and discovers peers over UDP broadcast.
///
/// The engine does nothing on its own: [`poll`](Self::poll) runs due bind
/// retries and announce ticks, then drains inbound datagrams. Everything
/// happens on the polling thread, so handlers never run concurrently.
/// [`DiscoveryRuntime`](crate::runtime::DiscoveryRuntime) drives an engine on
/// a background thread.
pub struct DiscoveryEngine {
    config: EngineConfig,
    socket: SocketLifecycle,
    status: StatusTracker,
    events: EventBus,
    interfaces: Box<dyn InterfaceSource>,
    logger: Arc<dyn DiscoveryLogger>,
    announcements: Vec<ActiveAnnouncement>,
    next_announcement_id: u64,
    session: Option<ListenSession>,
    recv_buf: Vec<u8>,
}

impl DiscoveryEngine {
    /// Create an engine in `Initializing` status. Nothing is bound yet.
    ///
    /// Fails with [`EngineError::Config`] when `config` does not validate.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_interfaces(config, SystemInterfaces)
    }

    pub fn with_interfaces<I: InterfaceSource + 'static>(config: EngineConfig, interfaces: I) -> Result<Self> {
        config.validate()?;
        let socket = SocketLifecycle::new(config.bind_addr(), config.retry_interval());
        Ok(DiscoveryEngine {
            config,
            socket,
            status: StatusTracker::new(),
            events: EventBus::new(),
            interfaces: Box::new(interfaces),
            logger: LogFacadeLogger::new(),
            announcements: Vec::new(),
            next_announcement_id: 1,
            session: None,
            recv_buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn with_logger(mut self, logger: Arc<dyn DiscoveryLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectivityStatus {
        self.status.current()
    }

    pub fn socket_state(&self) -> SocketState {
        self.socket.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr()
    }

    /// True while a listen session is active.
    pub fn is_listening(&self) -> bool {
        self.session.is_some()
    }

    pub fn active_announcements(&self) -> usize {
        self.announcements.len()
    }

    pub fn subscribe(&mut self) -> mpsc::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    pub fn on_event<F>(&mut self, handler: F)
    where
        F: FnMut(&DiscoveryEvent) + Send + 'static,
    {
        self.events.on_event(handler);
    }

    /// Start announcing. The first tick fires one announce interval from now.
    pub fn broadcast(&mut self, announcement: Announcement) -> Result<AnnouncementId> {
        if self.socket.state() == SocketState::Closed {
            return Err(EngineError::Closed);
        }
        let descriptor = announcement.build()?;
        let id = AnnouncementId(self.next_announcement_id);
        self.next_announcement_id += 1;

        let first_tick = Instant::now() + self.config.announce_interval();
        self.log(
            LogLevel::Info,
            &format!(
                "Announcing {} every {} ms{}",
                descriptor.name().unwrap_or("<unnamed>"),
                self.config.announce_interval_ms,
                match announcement.repeat_count() {
                    0 => String::new(),
                    n => format!(", {} times", n),
                }
            ),
        );
        self.announcements
            .push(ActiveAnnouncement::new(id, descriptor, announcement.repeat_count(), first_tick));
        Ok(id)
    }

    /// Cancel one announcement. Returns false if it already finished.
    pub fn stop_broadcast(&mut self, id: AnnouncementId) -> bool {
        let before = self.announcements.len();
        self.announcements.retain(|a| a.id != id);
        self.announcements.len() != before
    }

    /// Bind and report every matching announcement until closed.
    pub fn listen(&mut self, filter: impl Into<MatchFilter>) -> Result<()> {
        self.start_listening(filter.into(), false)
    }

    /// Bind and close after the first matching announcement.
    pub fn listen_once(&mut self, filter: impl Into<MatchFilter>) -> Result<()> {
        self.start_listening(filter.into(), true)
    }

    fn start_listening(&mut self, filter: MatchFilter, once: bool) -> Result<()> {
        if self.socket.state() == SocketState::Closed {
            return Err(EngineError::Closed);
        }
        self.session = Some(ListenSession { filter, once });
        match self.socket.bind(Instant::now()) {
            BindOutcome::Failed(e) => {
                self.session = None;
                Err(self.report_bind_failure(e))
            }
            outcome => {
                self.report_bind_outcome(outcome);
                Ok(())
            }
        }
    }

    /// Stop all activity and release the socket. Idempotent.
    pub fn close(&mut self) {
        if self.socket.state() == SocketState::Closed {
            return;
        }
        // Timers go before the socket.
        self.announcements.clear();
        self.session = None;
        self.socket.close();
        self.log(LogLevel::Info, "Closing socket.");
    }

    /// Earliest pending bind retry or announce tick.
    pub fn next_deadline(&self) -> Option<Instant> {
        let next_tick = self.announcements.iter().map(|a| a.next_tick).min();
        match (self.socket.retry_at(), next_tick) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn poll(&mut self) {
        self.poll_at(Instant::now());
    }

    /// Run everything due at `now`, then drain the socket.
    pub fn poll_at(&mut self, now: Instant) {
        if self.socket.state() == SocketState::Closed {
            return;
        }

        if let Some(outcome) = self.socket.poll_retry(now) {
            match outcome {
                BindOutcome::Failed(e) => {
                    self.session = None;
                    self.report_bind_failure(e);
                }
                outcome => self.report_bind_outcome(outcome),
            }
        }

        self.run_announcements(now);
        self.drain_inbound();
    }

    fn run_announcements(&mut self, now: Instant) {
        let mut announcements = std::mem::take(&mut self.announcements);
        let mut finished = Vec::new();

        for announcement in announcements.iter_mut().filter(|a| a.is_due(now)) {
            if self.announce(announcement) {
                self.log(LogLevel::Info, &format!("Finished {} broadcasts.", announcement.repeat));
                finished.push(announcement.id);
            }
            announcement.schedule_next(now, self.config.announce_interval());
        }

        announcements.retain(|a| !finished.contains(&a.id));
        self.announcements = announcements;
    }

    /// One announce tick. Returns true when the repeat budget is spent.
    fn announce(&mut self, announcement: &mut ActiveAnnouncement) -> bool {
        let Some(iface) = self.interfaces.ipv4_interfaces().first().copied() else {
            self.set_status(ConnectivityStatus::NotConnected);
            return false;
        };

        let broadcast = iface.broadcast();
        self.log(
            LogLevel::Debug,
            &format!("{} / {} -> broadcast {}", iface.ip, iface.netmask, broadcast),
        );

        if announcement.refresh_host(iface.ip) {
            // Signals a descriptor refresh; the status value may be unchanged.
            self.events
                .publish(DiscoveryEvent::StatusChanged(self.status.current()));
        }

        let target = SocketAddrV4::new(broadcast, self.config.port);
        let sent = self
            .socket
            .ensure_sender()
            .and_then(|transport| transport.send(&announcement.payload, SocketAddr::V4(target)));

        match sent {
            Ok(_) => {
                self.set_status(ConnectivityStatus::Broadcasting);
                announcement.record_send()
            }
            Err(source) => {
                self.report_error(EngineError::Send { target, source }, "");
                false
            }
        }
    }

    fn drain_inbound(&mut self) {
        loop {
            let Some(transport) = self.socket.transport() else {
                return;
            };
            let (len, src) = match transport.receive(&mut self.recv_buf) {
                Ok(received) => received,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.log(LogLevel::Warn, &format!("Receive error: {}", e));
                    return;
                }
            };

            // Traffic on an ephemeral send socket is not part of any session.
            if !self.socket.is_listening() {
                continue;
            }
            let Some(session) = &self.session else {
                continue;
            };
            // Unrelated senders share the subnet; undecodable payloads are dropped silently.
            let Some(descriptor) = ServiceDescriptor::from_datagram(&self.recv_buf[..len]) else {
                continue;
            };
            if !session.filter.matches(&descriptor) {
                continue;
            }
            let once = session.once;

            self.log(
                LogLevel::Debug,
                &format!("Discovered {} from {}", descriptor.name().unwrap_or("<unnamed>"), src),
            );
            self.events.publish(DiscoveryEvent::Discovery(descriptor));

            if once {
                self.close();
                return;
            }
        }
    }

    fn set_status(&mut self, next: ConnectivityStatus) {
        if let Some(status) = self.status.transition(next) {
            self.log(LogLevel::Debug, &format!("Status changed to {}", status));
            self.events.publish(DiscoveryEvent::StatusChanged(status));
        }
    }

    fn report_bind_outcome(&mut self, outcome: BindOutcome) {
        match outcome {
            BindOutcome::Bound(addr) => {
                let mode = match &self.session {
                    Some(session) if session.once => "once",
                    _ => "forever",
                };
                self.log(LogLevel::Info, &format!("Listening ({}) on {}", mode, addr));
            }
            BindOutcome::Retrying { addr, at } => {
                let wait = at.saturating_duration_since(Instant::now());
                self.report_error(
                    EngineError::AddressInUse { addr },
                    &format!(", retrying in {} ms", wait.as_millis()),
                );
            }
            BindOutcome::Failed(e) => {
                self.report_bind_failure(e);
            }
        }
    }

    /// Log and publish a bind failure that will not be retried.
    fn report_bind_failure(&mut self, source: io::Error) -> EngineError {
        let addr = self.config.bind_addr();
        let published = EngineError::Bind {
            addr,
            source: io::Error::new(source.kind(), source.to_string()),
        };
        self.report_error(published, "");
        EngineError::Bind { addr, source }
    }

    /// Log at Warn when the engine recovers on its own, Error otherwise, then publish.
    fn report_error(&mut self, err: EngineError, note: &str) {
        let level = if err.is_recoverable() {
            LogLevel::Warn
        } else {
            LogLevel::Error
        };
        self.log(level, &format!("{}{}", err, note));
        self.events.publish(DiscoveryEvent::Error(Arc::new(err)));
    }

    fn log(&self, level: LogLevel, msg: &str) {
        if level.is_diagnostic() && !self.config.debug {
            return;
        }
        self.logger.log(level, COMPONENT, msg);
    }
}

impl Drop for DiscoveryEngine {
    fn drop(&mut self) {
        self.close();
    }
}
