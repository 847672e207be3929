//! Native clipboard adapter backed by `clipboard-rs`.
//!
//! `clipboard-rs` has no delayed rendering, so deferred entries are kept in
//! this process and served to reads that go through the gateway. A private
//! marker format carrying a per-write token is committed alongside the eager
//! entries; when the marker no longer matches, another application has
//! replaced the clipboard and the deferred entries are discarded, together
//! with any bytes already rendered for them.

use std::collections::HashMap;
use std::sync::{mpsc as std_mpsc, Arc};

use anyhow::{anyhow, Context};
use cb_core::format::{
    extract_fragment, wrap_fragment, NativeFormatId, NATIVE_BITMAP, NATIVE_HTML, NATIVE_TEXT,
};
use cb_core::ports::{
    ChangeNotifier, ClipboardAccessError, NativeContent, NativeEntry, RenderProvider,
    SystemClipboardPort,
};
use clipboard_rs::common::RustImage;
use clipboard_rs::{
    Clipboard, ClipboardContent, ClipboardContext, ClipboardHandler, ClipboardWatcher,
    ClipboardWatcherContext, ContentFormat, RustImageData, WatcherShutdown,
};

const DEFERRED_MARKER: &str = "application/x-clipbridge-deferred";

fn busy(err: impl std::fmt::Display) -> ClipboardAccessError {
    ClipboardAccessError::Busy(err.to_string())
}

pub struct SystemClipboard {
    ctx: ClipboardContext,
    deferred: HashMap<NativeFormatId, Arc<dyn RenderProvider>>,
    rendered: HashMap<NativeFormatId, Vec<u8>>,
    token: Option<String>,
    watcher: Option<WatcherShutdown>,
}

impl SystemClipboard {
    pub fn new() -> anyhow::Result<Self> {
        let ctx = ClipboardContext::new()
            .map_err(|e| anyhow!("failed to open system clipboard: {}", e))?;
        Ok(Self {
            ctx,
            deferred: HashMap::new(),
            rendered: HashMap::new(),
            token: None,
            watcher: None,
        })
    }

    /// Whether our last deferred write is still on the clipboard.
    fn deferred_is_current(&mut self) -> bool {
        let Some(token) = self.token.as_ref() else {
            return false;
        };
        let current = self.ctx.get_buffer(DEFERRED_MARKER).ok();
        if current.as_deref() == Some(token.as_bytes()) {
            return true;
        }
        log::debug!("clipboard replaced externally, dropping deferred entries");
        self.token = None;
        self.deferred.clear();
        self.rendered.clear();
        false
    }

    /// Deferred content for `format`, rendered bytes first.
    fn live_deferred(&mut self, format: &NativeFormatId) -> Option<NativeContent> {
        if !self.deferred_is_current() {
            return None;
        }
        if let Some(bytes) = self.rendered.get(format) {
            return Some(NativeContent::Bytes(bytes.clone()));
        }
        self.deferred.get(format).cloned().map(NativeContent::Deferred)
    }

    fn native_format(format: &NativeFormatId) -> ContentFormat {
        match format.as_str() {
            NATIVE_TEXT => ContentFormat::Text,
            NATIVE_HTML => ContentFormat::Html,
            NATIVE_BITMAP => ContentFormat::Image,
            other => ContentFormat::Other(other.to_string()),
        }
    }

    fn to_content(format: &NativeFormatId, bytes: &[u8]) -> Option<ClipboardContent> {
        match format.as_str() {
            NATIVE_TEXT => Some(ClipboardContent::Text(
                String::from_utf8_lossy(bytes).into_owned(),
            )),
            NATIVE_HTML => {
                let envelope = String::from_utf8_lossy(bytes);
                Some(ClipboardContent::Html(extract_fragment(&envelope).to_string()))
            }
            NATIVE_BITMAP => match RustImageData::from_bytes(bytes) {
                Ok(image) => Some(ClipboardContent::Image(image)),
                Err(e) => {
                    log::warn!("dropping bitmap that is not a decodable image: {}", e);
                    None
                }
            },
            other => Some(ClipboardContent::Other(other.to_string(), bytes.to_vec())),
        }
    }
}

impl SystemClipboardPort for SystemClipboard {
    fn has(&mut self, format: &NativeFormatId) -> Result<bool, ClipboardAccessError> {
        if self.live_deferred(format).is_some() {
            return Ok(true);
        }
        Ok(self.ctx.has(Self::native_format(format)))
    }

    fn read(&mut self, format: &NativeFormatId) -> Result<Option<NativeContent>, ClipboardAccessError> {
        if let Some(content) = self.live_deferred(format) {
            return Ok(Some(content));
        }
        if !self.ctx.has(Self::native_format(format)) {
            return Ok(None);
        }

        let bytes = match format.as_str() {
            NATIVE_TEXT => self.ctx.get_text().map_err(busy)?.into_bytes(),
            NATIVE_HTML => wrap_fragment(&self.ctx.get_html().map_err(busy)?).into_bytes(),
            NATIVE_BITMAP => {
                let image = self.ctx.get_image().map_err(busy)?;
                let png = image.to_png().map_err(busy)?;
                png.get_bytes().to_vec()
            }
            other => self.ctx.get_buffer(other).map_err(busy)?,
        };
        Ok(Some(NativeContent::Bytes(bytes)))
    }

    fn cache_rendered(
        &mut self,
        format: &NativeFormatId,
        provider: &Arc<dyn RenderProvider>,
        bytes: Vec<u8>,
    ) {
        let current = self.deferred.get(format);
        if current.is_some_and(|current| Arc::ptr_eq(current, provider)) {
            self.rendered.insert(format.clone(), bytes);
        }
    }

    fn write(&mut self, entries: &[NativeEntry]) -> Result<(), ClipboardAccessError> {
        let mut contents = Vec::with_capacity(entries.len() + 1);
        let mut deferred = HashMap::new();

        for entry in entries {
            match &entry.content {
                NativeContent::Bytes(bytes) => {
                    if let Some(content) = Self::to_content(&entry.format, bytes) {
                        contents.push(content);
                    }
                }
                NativeContent::Deferred(provider) => {
                    deferred.insert(entry.format.clone(), provider.clone());
                }
            }
        }

        let token = if deferred.is_empty() {
            None
        } else {
            let token = uuid::Uuid::new_v4().to_string();
            contents.push(ClipboardContent::Other(
                DEFERRED_MARKER.to_string(),
                token.clone().into_bytes(),
            ));
            Some(token)
        };

        if contents.is_empty() {
            self.ctx.clear().map_err(busy)?;
        } else {
            self.ctx.set(contents).map_err(busy)?;
        }

        self.deferred = deferred;
        self.rendered.clear();
        self.token = token;
        Ok(())
    }

    fn watch(&mut self, notifier: ChangeNotifier) -> anyhow::Result<()> {
        if self.watcher.is_some() {
            log::debug!("clipboard watcher already running");
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = std_mpsc::channel();
        std::thread::Builder::new()
            .name("clipboard-watcher".to_string())
            .spawn(move || {
                let mut watcher_ctx = match ClipboardWatcherContext::<ChangeSignal>::new() {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        let _ = shutdown_tx.send(Err(anyhow!("failed to create watcher context: {}", e)));
                        return;
                    }
                };
                let shutdown = watcher_ctx
                    .add_handler(ChangeSignal { notifier })
                    .get_shutdown_channel();
                if shutdown_tx.send(Ok(shutdown)).is_err() {
                    return;
                }
                log::info!("start clipboard watch");
                watcher_ctx.start_watch();
                log::info!("clipboard watch stopped");
            })
            .context("failed to spawn clipboard watcher thread")?;

        let shutdown = shutdown_rx
            .recv()
            .context("clipboard watcher thread exited during startup")??;
        self.watcher = Some(shutdown);
        Ok(())
    }
}

impl Drop for SystemClipboard {
    fn drop(&mut self) {
        if let Some(shutdown) = self.watcher.take() {
            shutdown.stop();
        }
    }
}

struct ChangeSignal {
    notifier: ChangeNotifier,
}

impl ClipboardHandler for ChangeSignal {
    fn on_clipboard_change(&mut self) {
        if !self.notifier.notify() {
            log::trace!("clipboard change ignored, watcher receiver closed");
        }
    }
}
