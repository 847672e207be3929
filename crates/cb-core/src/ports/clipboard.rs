//! Native clipboard resource port.
//!
//! The resource is single-threaded: implementations are created on, and only
//! ever called from, the gateway's clipboard thread. That is why
//! [`SystemClipboardPort`] carries no `Send` or `Sync` bound.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use super::RenderProvider;
use crate::format::NativeFormatId;

#[derive(Debug, Error)]
pub enum ClipboardAccessError {
    /// Another process holds the clipboard. Worth retrying.
    #[error("clipboard is busy: {0}")]
    Busy(String),

    #[error("clipboard is unavailable: {0}")]
    Unavailable(String),
}

impl ClipboardAccessError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

/// Content staged for one native format.
#[derive(Clone)]
pub enum NativeContent {
    Bytes(Vec<u8>),
    /// Bytes are produced by the provider when someone reads the format.
    Deferred(Arc<dyn RenderProvider>),
}

impl fmt::Debug for NativeContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NativeEntry {
    pub format: NativeFormatId,
    pub content: NativeContent,
}

impl NativeEntry {
    pub fn bytes(format: NativeFormatId, bytes: Vec<u8>) -> Self {
        Self {
            format,
            content: NativeContent::Bytes(bytes),
        }
    }

    pub fn deferred(format: NativeFormatId, provider: Arc<dyn RenderProvider>) -> Self {
        Self {
            format,
            content: NativeContent::Deferred(provider),
        }
    }
}

/// Wakes the change watcher when clipboard content changes underneath us.
///
/// Signals carry no data; the watcher reads the clipboard itself after the
/// settling delay, so several signals in a row collapse into one read.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: mpsc::UnboundedSender<()>,
}

pub type ChangeReceiver = mpsc::UnboundedReceiver<()>;

impl ChangeNotifier {
    pub fn channel() -> (Self, ChangeReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the watcher has gone away.
    pub fn notify(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

/// The OS clipboard, seen as an opaque single-threaded resource.
pub trait SystemClipboardPort {
    fn has(&mut self, format: &NativeFormatId) -> Result<bool, ClipboardAccessError>;

    /// Content staged for `format`, or `Ok(None)` when it is not on the
    /// clipboard. Deferred content comes back unrendered; invoking the
    /// provider is the caller's business.
    fn read(&mut self, format: &NativeFormatId) -> Result<Option<NativeContent>, ClipboardAccessError>;

    /// Keep bytes rendered by `provider` for later reads of `format`.
    ///
    /// Ignored when the clipboard no longer holds that provider.
    fn cache_rendered(
        &mut self,
        _format: &NativeFormatId,
        _provider: &Arc<dyn RenderProvider>,
        _bytes: Vec<u8>,
    ) {
    }

    /// Replace the clipboard content with `entries` as a single commit.
    ///
    /// On error nothing of the batch may be visible.
    fn write(&mut self, entries: &[NativeEntry]) -> Result<(), ClipboardAccessError>;

    /// Start delivering external change signals to `notifier`.
    fn watch(&mut self, notifier: ChangeNotifier) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_busy_is_transient() {
        assert!(ClipboardAccessError::Busy("locked".into()).is_transient());
        assert!(!ClipboardAccessError::Unavailable("no display".into()).is_transient());
    }

    #[tokio::test]
    async fn notifier_reports_closed_receiver() {
        let (notifier, mut rx) = ChangeNotifier::channel();
        assert!(notifier.notify());
        assert_eq!(rx.recv().await, Some(()));
        drop(rx);
        assert!(!notifier.notify());
    }

    #[test]
    fn system_clipboard_port_is_object_safe() {
        fn assert_object_safe(_port: &mut dyn SystemClipboardPort) {}
        let _ = assert_object_safe;
    }
}
