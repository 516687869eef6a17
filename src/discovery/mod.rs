//! # LAN Service Discovery
//!
//! Processes announce a named service (host, port, arbitrary metadata) as a
//! JSON object in a UDP broadcast datagram, and discover peers announcing a
//! matching service.
//!
//! ## Key Types
//!
//! - [`DiscoveryEngine`] - Announcer, listener and socket lifecycle in one poll-driven value
//! - [`Announcement`] - What to announce, and how many times
//! - [`MatchFilter`] - Which announcements count as a discovery
//! - [`DiscoveryEvent`] - `Discovery`, `StatusChanged` and `Error` notifications
//!
//! ## Example
//!
//! ```ignore
//! let mut engine = DiscoveryEngine::new(EngineConfig::default())?;
//! let events = engine.subscribe();
//! engine.listen_once("my-server")?;
//! loop {
//!     engine.poll();
//!     if let Ok(DiscoveryEvent::Discovery(service)) = events.try_recv() { break; }
//! }
//! ```

pub mod announcer;
pub mod descriptor;
pub mod engine;
pub mod events;
pub mod filter;
pub mod interfaces;
pub mod status;

pub use announcer::{Announcement, AnnouncementId};
pub use descriptor::ServiceDescriptor;
pub use engine::DiscoveryEngine;
pub use events::{DiscoveryEvent, EventBus};
pub use filter::MatchFilter;
pub use interfaces::*;
pub use status::{ConnectivityStatus, StatusTracker};

mod tests;
