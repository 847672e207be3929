use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use cb_core::ports::{ExportRequest, PayloadExportPort};
use image::{DynamicImage, ImageFormat};
use tokio::fs;
use tracing::{debug, warn};

use super::ContentType;

/// Writes payloads under a caller-chosen directory.
///
/// The name is returned as soon as the directory exists; the bytes are
/// re-encoded (when asked to) and written on a background task. Files
/// appear atomically: they are written under a `.part` name first and
/// renamed once complete.
#[derive(Debug, Clone, Default)]
pub struct FileExporter;

impl FileExporter {
    pub fn new() -> Self {
        Self
    }

    /// Source and target type for a payload, honouring the override only
    /// when it names a type we know how to produce.
    fn plan(request: &ExportRequest) -> (ContentType, ContentType) {
        let source = ContentType::sniff(&request.payload);
        let requested = request.mime_override.as_ref().and_then(ContentType::from_mime);
        let target = match (source, requested) {
            (ContentType::Image(_), Some(ContentType::Image(format))) => ContentType::Image(format),
            (ContentType::Image(_), _) => source,
            (_, Some(requested)) => requested,
            (_, None) => ContentType::Binary,
        };
        (source, target)
    }
}

fn reencode(payload: &[u8], source: ImageFormat, target: ImageFormat) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory_with_format(payload, source)
        .with_context(|| format!("decode {:?} payload", source))?;
    let decoded = match target {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(decoded.to_rgb8()),
        _ => decoded,
    };

    let mut out = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut out), target)
        .with_context(|| format!("encode payload as {:?}", target))?;
    Ok(out)
}

async fn write_file(
    path: PathBuf,
    payload: Vec<u8>,
    source: ContentType,
    target: ContentType,
) -> Result<()> {
    let bytes = match (source.image_format(), target.image_format()) {
        (Some(from), Some(to)) if from != to => {
            tokio::task::spawn_blocking(move || reencode(&payload, from, to))
                .await
                .context("image conversion task failed")??
        }
        _ => payload,
    };

    let partial = path.with_extension("part");
    fs::write(&partial, &bytes)
        .await
        .with_context(|| format!("write {}", partial.display()))?;
    fs::rename(&partial, &path)
        .await
        .with_context(|| format!("rename {} into place", partial.display()))?;
    debug!(path = %path.display(), bytes = bytes.len(), "payload exported");
    Ok(())
}

fn file_name(prefix: &str, target: ContentType) -> String {
    format!("{}{}.{}", prefix, uuid::Uuid::new_v4(), target.extension())
}

#[async_trait]
impl PayloadExportPort for FileExporter {
    async fn export(&self, request: ExportRequest) -> Result<String> {
        let (source, target) = Self::plan(&request);
        let name = file_name(&request.name_prefix, target);

        fs::create_dir_all(&request.target_dir)
            .await
            .with_context(|| format!("create export directory {}", request.target_dir.display()))?;

        let path = Path::new(&request.target_dir).join(&name);
        tokio::spawn(async move {
            if let Err(e) = write_file(path, request.payload, source, target).await {
                warn!(error = %format!("{:#}", e), "background export failed");
            }
        });

        Ok(name)
    }
}
