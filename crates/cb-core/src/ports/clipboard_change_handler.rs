//! Clipboard change handler port
//!
//! The platform layer calls this when clipboard content changes underneath
//! the process; the server implements it to fan the snapshot out to peers.

use anyhow::Result;

use crate::ClipboardSnapshot;

/// Callback handler for clipboard change events.
///
/// The snapshot is already read by the platform layer.
#[async_trait::async_trait]
pub trait ClipboardChangeHandler: Send + Sync {
    async fn on_clipboard_changed(&self, snapshot: ClipboardSnapshot) -> Result<()>;
}
