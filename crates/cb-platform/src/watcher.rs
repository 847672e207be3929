//! External change watcher.
//!
//! Turns raw "the clipboard changed" signals into snapshots for the change
//! handler. After a signal it waits for the settling delay (other
//! applications often write several formats in quick succession), drops
//! any signals that arrived meanwhile, then reads the configured formats
//! once through the gateway. The delay is a heuristic, not a guarantee.

use std::sync::Arc;
use std::time::Duration;

use cb_core::config::ClipboardSettings;
use cb_core::ports::{ChangeNotifier, ChangeReceiver, ClipboardChangeHandler};
use cb_core::FormatTag;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::gateway::ClipboardGateway;

pub struct ExternalChangeWatcher {
    gateway: ClipboardGateway,
    handler: Arc<dyn ClipboardChangeHandler>,
    settle_delay: Duration,
    formats: Vec<FormatTag>,
}

impl ExternalChangeWatcher {
    pub fn new(
        gateway: ClipboardGateway,
        handler: Arc<dyn ClipboardChangeHandler>,
        settings: &ClipboardSettings,
    ) -> Self {
        Self {
            gateway,
            handler,
            settle_delay: settings.settle_delay(),
            formats: settings.broadcast_formats.clone(),
        }
    }

    /// Subscribe to the gateway's change signals and run on a new task.
    pub async fn start(self) -> anyhow::Result<JoinHandle<()>> {
        let (notifier, rx) = ChangeNotifier::channel();
        self.gateway.watch(notifier).await?;
        info!(
            settle_delay_ms = self.settle_delay.as_millis() as u64,
            "clipboard change watcher started"
        );
        Ok(tokio::spawn(self.run(rx)))
    }

    pub async fn run(self, mut rx: ChangeReceiver) {
        while rx.recv().await.is_some() {
            tokio::time::sleep(self.settle_delay).await;

            let mut coalesced = 0usize;
            while rx.try_recv().is_ok() {
                coalesced += 1;
            }

            let snapshot = match self.gateway.read_snapshot(self.formats.clone()).await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(error = %err, "stopping change watcher");
                    break;
                }
            };

            if snapshot.is_empty() {
                debug!(coalesced, "clipboard changed, nothing to broadcast");
                continue;
            }

            debug!(
                items = snapshot.len(),
                total_bytes = snapshot.total_size_bytes(),
                coalesced,
                "clipboard changed"
            );
            if let Err(e) = self.handler.on_clipboard_changed(snapshot).await {
                error!(error = %e, "failed to handle clipboard change");
            }
        }
        debug!("clipboard change watcher stopped");
    }
}
