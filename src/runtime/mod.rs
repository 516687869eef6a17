//! # Discovery Runtime Module
//!
//! Drives a [`DiscoveryEngine`] on a dedicated thread so callers on any
//! thread can announce and listen without polling themselves.
//!
//! ## Key Types
//!
//! - [`DiscoveryRuntime`] - Background event loop owning one engine
//! - [`EngineConfig`] - Ports, intervals and the debug switch
//! - [`discover_once`] - Async helper resolving with the first matching service
//!
//! ## Lifecycle
//!
//! 1. Build the engine: `DiscoveryEngine::new(EngineConfig::load("discovery.json")?)?`
//! 2. Subscribe to events: `engine.subscribe()`
//! 3. Start the loop: `DiscoveryRuntime::spawn(engine)?`
//! 4. Stop gracefully: `runtime.stop()`
//!
//! All engine work stays on the runtime thread; commands reach it over a channel.

pub mod config;

pub use config::EngineConfig;

use crate::discovery::{
    Announcement, AnnouncementId, ConnectivityStatus, DiscoveryEngine, DiscoveryEvent, MatchFilter,
    ServiceDescriptor,
};
use crate::error::{EngineError, Result};
use crate::transport::SocketState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on how long the loop sleeps, so inbound datagrams are drained promptly.
const MAX_IDLE: Duration = Duration::from_millis(5);

enum Command {
    Broadcast(Announcement, mpsc::Sender<Result<AnnouncementId>>),
    StopBroadcast(AnnouncementId),
    Listen(MatchFilter, bool, mpsc::Sender<Result<()>>),
    Status(mpsc::Sender<(ConnectivityStatus, SocketState)>),
    Close,
}

pub struct DiscoveryRuntime {
    commands: mpsc::Sender<Command>,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DiscoveryRuntime {
    /// Move `engine` onto a new thread and start polling it.
    pub fn spawn(engine: DiscoveryEngine) -> Result<Self> {
        let (commands, inbox) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let thread = thread::Builder::new()
            .name("udp-discovery".to_string())
            .spawn(move || run_loop(engine, inbox, flag))?;

        Ok(DiscoveryRuntime {
            commands,
            running,
            thread: Some(thread),
        })
    }

    pub fn broadcast(&self, announcement: Announcement) -> Result<AnnouncementId> {
        self.request(|reply| Command::Broadcast(announcement, reply))?
    }

    pub fn stop_broadcast(&self, id: AnnouncementId) {
        let _ = self.commands.send(Command::StopBroadcast(id));
    }

    pub fn listen(&self, filter: impl Into<MatchFilter>) -> Result<()> {
        let filter = filter.into();
        self.request(|reply| Command::Listen(filter, false, reply))?
    }

    pub fn listen_once(&self, filter: impl Into<MatchFilter>) -> Result<()> {
        let filter = filter.into();
        self.request(|reply| Command::Listen(filter, true, reply))?
    }

    pub fn status(&self) -> Result<ConnectivityStatus> {
        self.request(Command::Status).map(|(status, _)| status)
    }

    pub fn socket_state(&self) -> Result<SocketState> {
        self.request(Command::Status).map(|(_, state)| state)
    }

    /// Close the engine. The loop keeps running until [`stop`](Self::stop).
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Close the engine and join the loop thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.commands.send(Command::Close);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn request<T>(&self, make: impl FnOnce(mpsc::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = mpsc::channel();
        self.commands.send(make(reply)).map_err(|_| EngineError::Closed)?;
        response.recv().map_err(|_| EngineError::Closed)
    }
}

impl Drop for DiscoveryRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(mut engine: DiscoveryEngine, inbox: mpsc::Receiver<Command>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        loop {
            match inbox.try_recv() {
                Ok(command) => apply(&mut engine, command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }

        engine.poll();

        let idle = engine
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(MAX_IDLE)
            .min(MAX_IDLE);

        // Wake early for commands
        match inbox.recv_timeout(idle) {
            Ok(command) => apply(&mut engine, command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => running.store(false, Ordering::SeqCst),
        }
    }
    engine.close();
}

fn apply(engine: &mut DiscoveryEngine, command: Command) {
    match command {
        Command::Broadcast(announcement, reply) => {
            let _ = reply.send(engine.broadcast(announcement));
        }
        Command::StopBroadcast(id) => {
            engine.stop_broadcast(id);
        }
        Command::Listen(filter, once, reply) => {
            let result = if once {
                engine.listen_once(filter)
            } else {
                engine.listen(filter)
            };
            let _ = reply.send(result);
        }
        Command::Status(reply) => {
            let _ = reply.send((engine.status(), engine.socket_state()));
        }
        Command::Close => engine.close(),
    }
}

/// Listen once with a fresh engine and resolve with the first matching
/// service, or `None` when `wait` elapses first.
pub async fn discover_once(
    config: EngineConfig,
    filter: impl Into<MatchFilter>,
    wait: Duration,
) -> Result<Option<ServiceDescriptor>> {
    discover_once_with(DiscoveryEngine::new(config)?, filter, wait).await
}

/// [`discover_once`] on a prepared engine.
pub async fn discover_once_with(
    mut engine: DiscoveryEngine,
    filter: impl Into<MatchFilter>,
    wait: Duration,
) -> Result<Option<ServiceDescriptor>> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let mut tx = Some(tx);
    engine.on_event(move |event| {
        if let DiscoveryEvent::Discovery(service) = event {
            if let Some(tx) = tx.take() {
                let _ = tx.send(service.clone());
            }
        }
    });
    engine.listen_once(filter)?;

    let runtime = DiscoveryRuntime::spawn(engine)?;
    let found = match tokio::time::timeout(wait, rx).await {
        Ok(Ok(service)) => Some(service),
        _ => None,
    };
    runtime.stop();
    Ok(found)
}
