use anyhow::Result;
use async_trait::async_trait;
use cb_core::{ClipboardData, FormatTag};
use serde_json::{json, Value};

use crate::rpc::RpcPeer;

pub const METHOD_PASTE: &str = "paste";
pub const METHOD_GET: &str = "get";

/// The server's view of a connected peer.
#[async_trait]
pub trait PeerPort: Send + Sync {
    /// Tell the peer about one item of a clipboard change.
    async fn paste(&self, item: ClipboardData) -> Result<()>;

    /// Ask the peer for the bytes of a format it advertised. `None` when
    /// it has nothing for it.
    async fn get(&self, format: &FormatTag) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
impl PeerPort for RpcPeer {
    async fn paste(&self, item: ClipboardData) -> Result<()> {
        self.notify(METHOD_PASTE, json!([item])).await?;
        Ok(())
    }

    async fn get(&self, format: &FormatTag) -> Result<Option<Vec<u8>>> {
        let value = self.call(METHOD_GET, json!([format])).await?;
        let bytes = match value {
            Value::Null => return Ok(None),
            Value::String(data) => data.into_bytes(),
            other => other.to_string().into_bytes(),
        };
        Ok((!bytes.is_empty()).then_some(bytes))
    }
}
