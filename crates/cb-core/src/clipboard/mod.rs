//! Clipboard domain models.
mod format_tag;
mod item;
mod mime;
mod snapshot;

pub use format_tag::FormatTag;
pub use item::{ClipboardData, ClipboardItem};
pub use mime::MimeType;
pub use snapshot::{ClipboardSnapshot, SnapshotError};
