//! # cb-core
//!
//! Core domain models and business logic for clipbridge.
//!
//! This crate contains pure logic without any infrastructure dependencies:
//! the canonical clipboard model, the format registry that maps it onto
//! native clipboard formats, session identity, configuration DTOs and the
//! ports implemented by the platform, infra and server crates.

pub mod clipboard;
pub mod config;
pub mod format;
pub mod ports;
pub mod session;

mod ids;

// Re-export commonly used types at the crate root
pub use clipboard::{ClipboardData, ClipboardItem, ClipboardSnapshot, FormatTag, MimeType};
pub use config::ServerConfig;
pub use format::{NativeFormatId, NativeItem};
pub use session::{OwnerMark, SessionId};
