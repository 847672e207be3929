mod peer;
mod registry;

pub use peer::{PeerPort, METHOD_GET, METHOD_PASTE};
pub use registry::SessionRegistry;
