//! # cb-platform
//!
//! Everything that touches the native clipboard: the gateway that owns the
//! clipboard thread, the resource adapters it can drive, and the watcher that
//! turns external change signals into snapshots.

pub mod clipboard;
pub mod gateway;
pub mod watcher;

pub use clipboard::{InMemoryClipboard, SystemClipboard};
pub use gateway::{ClipboardFactory, ClipboardGateway, GatewayError, GatewayOptions, RetryPolicy};
pub use watcher::ExternalChangeWatcher;
