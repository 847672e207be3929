//! # cb-server
//!
//! The clipboard synchronization server. Peers connect over TCP and speak
//! JSON-RPC 2.0 in length-prefixed frames; each connection becomes a session
//! that can copy to, read from and export the shared clipboard, receives a
//! `paste` notification whenever the clipboard changes, and is asked for the
//! bytes of any deferred item it owns.

pub mod handler;
pub mod listener;
pub mod render;
pub mod rpc;
pub mod server;
pub mod session;

pub use handler::{BroadcastChangeHandler, SessionHandler};
pub use listener::{ConnectionContext, ConnectionListener};
pub use render::DeferredRenderCoordinator;
pub use server::ClipboardServer;
pub use session::{PeerPort, SessionRegistry};
