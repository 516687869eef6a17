pub mod traits;
pub mod udp;
pub mod lifecycle;

pub use traits::*;
pub use udp::*;
pub use lifecycle::*;
