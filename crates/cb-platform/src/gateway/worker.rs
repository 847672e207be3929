use std::sync::Arc;

use cb_core::format::{self, NativeFormatId};
use cb_core::ports::{
    ChangeNotifier, ClipboardAccessError, DeferredRenderPort, NativeContent, NativeEntry,
    RenderProvider, SystemClipboardPort,
};
use cb_core::{ClipboardItem, ClipboardSnapshot, FormatTag, OwnerMark, SessionId};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use super::{GatewayError, GatewayOptions, RetryPolicy};

pub(super) enum GatewayCommand {
    Write {
        snapshot: ClipboardSnapshot,
        writer: Option<SessionId>,
        reply: oneshot::Sender<Result<(), GatewayError>>,
    },
    Read {
        format: NativeFormatId,
        reply: oneshot::Sender<Option<NativeContent>>,
    },
    CacheRendered {
        format: NativeFormatId,
        provider: Arc<dyn RenderProvider>,
        bytes: Vec<u8>,
    },
    ReadSnapshot {
        formats: Vec<FormatTag>,
        reply: oneshot::Sender<ClipboardSnapshot>,
    },
    Watch {
        notifier: ChangeNotifier,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
    Shutdown,
}

/// Owns the clipboard resource. Lives on the clipboard thread.
pub(super) struct ClipboardWorker {
    resource: Box<dyn SystemClipboardPort>,
    retry: RetryPolicy,
    renderer: Option<Arc<dyn DeferredRenderPort>>,
    owner: Arc<OwnerMark>,
    runtime: Handle,
}

impl ClipboardWorker {
    pub(super) fn new(
        resource: Box<dyn SystemClipboardPort>,
        options: GatewayOptions,
        runtime: Handle,
    ) -> Self {
        Self {
            resource,
            retry: options.retry,
            renderer: options.renderer,
            owner: options.owner,
            runtime,
        }
    }

    pub(super) fn run(mut self, mut rx: mpsc::Receiver<GatewayCommand>) {
        info!("clipboard thread started");
        while let Some(command) = rx.blocking_recv() {
            match command {
                GatewayCommand::Write {
                    snapshot,
                    writer,
                    reply,
                } => {
                    let _ = reply.send(self.write(snapshot, writer));
                }
                GatewayCommand::Read { format, reply } => {
                    let _ = reply.send(self.read(&format));
                }
                GatewayCommand::CacheRendered {
                    format,
                    provider,
                    bytes,
                } => {
                    self.resource.cache_rendered(&format, &provider, bytes);
                }
                GatewayCommand::ReadSnapshot { formats, reply } => {
                    let _ = reply.send(self.read_snapshot(formats));
                }
                GatewayCommand::Watch { notifier, reply } => {
                    let _ = reply.send(self.resource.watch(notifier));
                }
                GatewayCommand::Shutdown => break,
            }
        }
        info!("clipboard thread stopped");
    }

    fn write(
        &mut self,
        snapshot: ClipboardSnapshot,
        writer: Option<SessionId>,
    ) -> Result<(), GatewayError> {
        let mut entries = Vec::with_capacity(snapshot.len());
        let mut deferred = 0usize;

        for item in snapshot.into_items() {
            let tag = item.format.clone();
            let native = format::normalize(item);
            match native.payload {
                Some(bytes) => entries.push(NativeEntry::bytes(native.format, bytes)),
                None => match &self.renderer {
                    Some(renderer) => {
                        deferred += 1;
                        let provider = GatewayRenderProvider {
                            format: tag,
                            writer,
                            owner: self.owner.clone(),
                            renderer: renderer.clone(),
                            runtime: self.runtime.clone(),
                        };
                        entries.push(NativeEntry::deferred(native.format, Arc::new(provider)));
                    }
                    None => {
                        warn!(format = %tag, "no render coordinator, dropping deferred item");
                    }
                },
            }
        }

        self.with_retry("write", |resource| resource.write(&entries))?;
        debug!(items = entries.len(), deferred, writer = ?writer, "clipboard written");

        if deferred > 0 {
            if let Some(writer) = writer {
                self.owner.set(writer);
            }
        }
        Ok(())
    }

    fn read(&mut self, native: &NativeFormatId) -> Option<NativeContent> {
        let result = self.with_retry("read", |resource| {
            if resource.has(native)? {
                resource.read(native)
            } else {
                Ok(None)
            }
        });
        match result {
            Ok(content) => content,
            Err(err) => {
                warn!(format = %native, error = %err, "failed to read clipboard");
                None
            }
        }
    }

    fn read_snapshot(&mut self, formats: Vec<FormatTag>) -> ClipboardSnapshot {
        let mut items = Vec::new();
        for tag in formats {
            if items.iter().any(|item: &ClipboardItem| item.format == tag) {
                continue;
            }
            match self.read(&format::to_native(&tag)) {
                Some(NativeContent::Bytes(bytes)) => items.push(ClipboardItem::eager(tag, bytes)),
                // Snapshots never render.
                Some(NativeContent::Deferred(_)) => {
                    trace!(format = %tag, "deferred item left out of snapshot")
                }
                None => {}
            }
        }
        ClipboardSnapshot::new(items).unwrap_or_else(|_| ClipboardSnapshot::empty())
    }

    fn with_retry<T>(
        &mut self,
        op: &'static str,
        mut f: impl FnMut(&mut dyn SystemClipboardPort) -> Result<T, ClipboardAccessError>,
    ) -> Result<T, GatewayError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match f(self.resource.as_mut()) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    trace!(op, attempt, error = %err, "clipboard busy, retrying");
                    std::thread::sleep(self.retry.delay);
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(GatewayError::RetryExhausted {
                        attempts,
                        source: err,
                    })
                }
                Err(err) => return Err(GatewayError::Access(err)),
            }
        }
    }
}

/// Pull-callback installed for one deferred item.
///
/// Blocks the calling thread on the async render round trip. Must not be
/// invoked from inside an async task or on the clipboard thread.
struct GatewayRenderProvider {
    format: FormatTag,
    writer: Option<SessionId>,
    owner: Arc<OwnerMark>,
    renderer: Arc<dyn DeferredRenderPort>,
    runtime: Handle,
}

impl RenderProvider for GatewayRenderProvider {
    fn render(&self) -> Option<Vec<u8>> {
        let Some(owner) = self.writer.or_else(|| self.owner.get()) else {
            debug!(format = %self.format, "deferred item has no owner to render it");
            return None;
        };

        let (tx, rx) = oneshot::channel();
        let renderer = self.renderer.clone();
        let format = self.format.clone();
        self.runtime.spawn(async move {
            let _ = tx.send(renderer.request_render(format, owner).await);
        });

        rx.blocking_recv().ok().flatten()
    }
}
