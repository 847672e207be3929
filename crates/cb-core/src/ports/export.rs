use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use crate::clipboard::MimeType;

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub payload: Vec<u8>,
    pub target_dir: PathBuf,
    pub name_prefix: String,
    /// Requested output type. Ignored unless it names a supported image type.
    pub mime_override: Option<MimeType>,
}

/// Writes large payloads to disk instead of sending them inline.
#[async_trait]
pub trait PayloadExportPort: Send + Sync {
    /// Returns the generated file name (not the full path). The directory
    /// exists when this returns; the file itself may still be in flight.
    async fn export(&self, request: ExportRequest) -> Result<String>;
}
