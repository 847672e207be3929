//! Clipboard gateway.
//!
//! The native clipboard is thread-affine, so a single OS thread (named
//! `clipboard`) constructs the resource and executes every operation on it.
//! [`ClipboardGateway`] is the cheap, cloneable handle the rest of the
//! process uses to submit work to that thread and await the outcome.
//!
//! ```text
//! session task ──┐
//! watcher task ──┼──► mpsc ──► clipboard thread ──► SystemClipboardPort
//! exporter     ──┘         ◄── oneshot reply ───┘
//! ```
//!
//! The clipboard thread never renders deferred content. A read that finds a
//! deferred entry gets the provider back and runs it on the blocking pool,
//! so a slow owner holds up only that read.

mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cb_core::config::ClipboardSettings;
use cb_core::format::{self, NativeFormatId};
use cb_core::ports::{
    ChangeNotifier, ClipboardAccessError, DeferredRenderPort, NativeContent, RenderProvider,
    SystemClipboardPort,
};
use cb_core::{ClipboardSnapshot, FormatTag, OwnerMark, SessionId};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use worker::{ClipboardWorker, GatewayCommand};

const COMMAND_QUEUE_DEPTH: usize = 64;

/// Builds the clipboard resource. Runs on the clipboard thread.
pub type ClipboardFactory =
    Box<dyn FnOnce() -> anyhow::Result<Box<dyn SystemClipboardPort>> + Send + 'static>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("clipboard gateway is closed")]
    Closed,

    #[error("clipboard still busy after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: ClipboardAccessError,
    },

    #[error(transparent)]
    Access(#[from] ClipboardAccessError),
}

/// Bounded retry for transient clipboard refusals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &ClipboardSettings) -> Self {
        Self {
            attempts: settings.write_attempts,
            delay: settings.retry_delay(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&ClipboardSettings::default())
    }
}

pub struct GatewayOptions {
    pub retry: RetryPolicy,
    /// Resolves deferred items. Without one, deferred items are not offered.
    pub renderer: Option<Arc<dyn DeferredRenderPort>>,
    pub owner: Arc<OwnerMark>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            renderer: None,
            owner: Arc::new(OwnerMark::new()),
        }
    }
}

#[derive(Clone)]
pub struct ClipboardGateway {
    tx: mpsc::Sender<GatewayCommand>,
}

impl ClipboardGateway {
    /// Start the clipboard thread and build the resource on it.
    ///
    /// Fails if the factory fails; the thread is gone in that case.
    pub async fn spawn(factory: ClipboardFactory, options: GatewayOptions) -> anyhow::Result<Self> {
        let runtime =
            Handle::try_current().context("clipboard gateway must be started inside a tokio runtime")?;
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<()>>();

        std::thread::Builder::new()
            .name("clipboard".to_string())
            .spawn(move || {
                let resource = match factory() {
                    Ok(resource) => {
                        let _ = ready_tx.send(Ok(()));
                        resource
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                ClipboardWorker::new(resource, options, runtime).run(rx);
            })
            .context("failed to spawn clipboard thread")?;

        ready_rx
            .await
            .context("clipboard thread exited during startup")?
            .context("failed to initialise clipboard")?;

        debug!("clipboard gateway started");
        Ok(Self { tx })
    }

    async fn submit<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> GatewayCommand,
    ) -> Result<T, GatewayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| GatewayError::Closed)?;
        reply_rx.await.map_err(|_| GatewayError::Closed)
    }

    /// Commit `snapshot` as one clipboard write.
    ///
    /// `writer` becomes the clipboard owner if the write succeeds and holds
    /// at least one deferred item.
    pub async fn write(
        &self,
        snapshot: ClipboardSnapshot,
        writer: Option<SessionId>,
    ) -> Result<(), GatewayError> {
        self.submit(|reply| GatewayCommand::Write {
            snapshot,
            writer,
            reply,
        })
        .await?
    }

    /// Bytes of `format`, or empty when the format is not on the clipboard.
    ///
    /// Deferred content is rendered off the clipboard thread and the result
    /// is kept on the clipboard for later reads. A render that yields
    /// nothing reads as empty.
    pub async fn read(&self, format: FormatTag) -> Result<Vec<u8>, GatewayError> {
        let native = format::to_native(&format);
        let content = self
            .submit(|reply| GatewayCommand::Read {
                format: native.clone(),
                reply,
            })
            .await?;

        match content {
            None => Ok(Vec::new()),
            Some(NativeContent::Bytes(bytes)) => Ok(bytes),
            Some(NativeContent::Deferred(provider)) => {
                Ok(self.render(native, provider).await.unwrap_or_default())
            }
        }
    }

    async fn render(
        &self,
        format: NativeFormatId,
        provider: Arc<dyn RenderProvider>,
    ) -> Option<Vec<u8>> {
        let render = tokio::task::spawn_blocking({
            let provider = provider.clone();
            move || provider.render()
        });
        let bytes = match render.await {
            Ok(bytes) => bytes?,
            Err(err) => {
                warn!(format = %format, error = %err, "render task failed");
                return None;
            }
        };

        let cache = GatewayCommand::CacheRendered {
            format,
            provider,
            bytes: bytes.clone(),
        };
        if self.tx.send(cache).await.is_err() {
            debug!("clipboard gateway closed before render could be cached");
        }
        Some(bytes)
    }

    /// Present formats among `formats`, in the given order.
    ///
    /// Deferred entries are left out rather than rendered.
    pub async fn read_snapshot(
        &self,
        formats: Vec<FormatTag>,
    ) -> Result<ClipboardSnapshot, GatewayError> {
        self.submit(|reply| GatewayCommand::ReadSnapshot { formats, reply })
            .await
    }

    pub async fn watch(&self, notifier: ChangeNotifier) -> anyhow::Result<()> {
        self.submit(|reply| GatewayCommand::Watch { notifier, reply })
            .await?
    }

    /// Stop the clipboard thread. Later calls fail with [`GatewayError::Closed`].
    pub async fn shutdown(&self) {
        if self.tx.send(GatewayCommand::Shutdown).await.is_err() {
            debug!("clipboard gateway already closed");
        }
    }
}
