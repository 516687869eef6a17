use super::descriptor::ServiceDescriptor;
use super::status::ConnectivityStatus;
use crate::error::EngineError;
use std::sync::Arc;
use std::sync::mpsc;

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A matching announcement arrived.
    Discovery(ServiceDescriptor),
    /// Status transition, or the announced host was refreshed.
    StatusChanged(ConnectivityStatus),
    /// A recoverable failure, e.g. a send that did not go out.
    Error(Arc<EngineError>),
}

type Handler = Box<dyn FnMut(&DiscoveryEvent) + Send>;

/// Instance-owned publisher: channel subscribers plus callback handlers.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<mpsc::Sender<DiscoveryEvent>>,
    handlers: Vec<Handler>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> mpsc::Receiver<DiscoveryEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn on_event<F>(&mut self, handler: F)
    where
        F: FnMut(&DiscoveryEvent) + Send + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    pub fn publish(&mut self, event: DiscoveryEvent) {
        for handler in self.handlers.iter_mut() {
            handler(&event);
        }
        // Drop subscribers whose receiver is gone
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
