pub mod discovery;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod transport;

pub use transport::{DatagramTransport, SocketLifecycle, SocketState, UdpTransport};
pub use discovery::{
    Announcement, AnnouncementId, ConnectivityStatus, DiscoveryEngine, DiscoveryEvent, MatchFilter,
    ServiceDescriptor,
};
pub use error::{ConfigError, EngineError, Result};
pub use runtime::*;
