use anyhow::Result;
use async_trait::async_trait;

use crate::clipboard::FormatTag;
use crate::session::SessionId;

/// Native pull-callback installed for a deferred item.
///
/// Called on the thread that reads the format: the pasting application's
/// thread, or a blocking-pool thread for reads made through the gateway.
/// It blocks until the bytes are known or the request is abandoned, so it
/// never runs on the clipboard thread or inside an async task.
pub trait RenderProvider: Send + Sync {
    fn render(&self) -> Option<Vec<u8>>;
}

/// Resolves deferred items by asking their owner for the real bytes.
#[async_trait]
pub trait DeferredRenderPort: Send + Sync {
    /// Returns the normalized payload, or `None` when the owner did not
    /// answer in time or went away.
    async fn request_render(&self, format: FormatTag, owner: SessionId) -> Option<Vec<u8>>;
}

/// Forwards a reverse `get` to one specific session.
#[async_trait]
pub trait RenderRouterPort: Send + Sync {
    async fn route_get(&self, owner: SessionId, format: &FormatTag) -> Result<Option<Vec<u8>>>;
}
