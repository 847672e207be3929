//! Headless clipboard resource.
//!
//! Behaves like a native clipboard with delayed rendering: deferred entries
//! hold a [`RenderProvider`] that is invoked the first time the format is
//! pulled, and the rendered bytes are kept afterwards. Port reads hand the
//! provider back unrendered. The handle is
//! cloneable so tests (or a `--memory` server) can play the part of other
//! applications on the machine: copying, pasting, and holding the clipboard
//! lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cb_core::format::NativeFormatId;
use cb_core::ports::{
    ChangeNotifier, ClipboardAccessError, NativeContent, NativeEntry, RenderProvider,
    SystemClipboardPort,
};

enum Slot {
    Ready(Vec<u8>),
    Pending(Arc<dyn RenderProvider>),
}

#[derive(Default)]
struct MemoryState {
    entries: Vec<(NativeFormatId, Slot)>,
    /// Bumped on every content change; guards caching of rendered bytes.
    sequence: u64,
    reject_writes: u32,
    notifier: Option<ChangeNotifier>,
}

impl MemoryState {
    fn replace(&mut self, entries: Vec<(NativeFormatId, Slot)>) {
        self.entries = entries;
        self.sequence += 1;
        if let Some(notifier) = &self.notifier {
            notifier.notify();
        }
    }

    fn slot(&self, format: &NativeFormatId) -> Option<&Slot> {
        self.entries
            .iter()
            .find(|(id, _)| id == format)
            .map(|(_, slot)| slot)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryClipboard {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse the next `count` writes as if another process held the lock.
    pub fn reject_next_writes(&self, count: u32) {
        self.lock().reject_writes = count;
    }

    /// Replace the content the way another application's copy would.
    pub fn copy_external(&self, entries: Vec<(NativeFormatId, Vec<u8>)>) {
        let entries = entries
            .into_iter()
            .map(|(format, bytes)| (format, Slot::Ready(bytes)))
            .collect();
        self.lock().replace(entries);
    }

    /// Read a format the way another application's paste would, rendering
    /// deferred content on demand.
    ///
    /// Blocks while a deferred item is rendered, so call it from a plain
    /// thread (or `spawn_blocking`), never from inside an async task.
    pub fn pull(&self, format: &NativeFormatId) -> Option<Vec<u8>> {
        let (provider, sequence) = {
            let state = self.lock();
            match state.slot(format)? {
                Slot::Ready(bytes) => return Some(bytes.clone()),
                Slot::Pending(provider) => (provider.clone(), state.sequence),
            }
        };

        let bytes = provider.render()?;

        let mut state = self.lock();
        if state.sequence == sequence {
            if let Some((_, slot)) = state.entries.iter_mut().find(|(id, _)| id == format) {
                *slot = Slot::Ready(bytes.clone());
            }
        }
        Some(bytes)
    }

    /// Formats currently on the clipboard, in registration order.
    pub fn formats(&self) -> Vec<NativeFormatId> {
        self.lock().entries.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

impl SystemClipboardPort for InMemoryClipboard {
    fn has(&mut self, format: &NativeFormatId) -> Result<bool, ClipboardAccessError> {
        Ok(self.lock().slot(format).is_some())
    }

    fn read(&mut self, format: &NativeFormatId) -> Result<Option<NativeContent>, ClipboardAccessError> {
        Ok(self.lock().slot(format).map(|slot| match slot {
            Slot::Ready(bytes) => NativeContent::Bytes(bytes.clone()),
            Slot::Pending(provider) => NativeContent::Deferred(provider.clone()),
        }))
    }

    fn cache_rendered(
        &mut self,
        format: &NativeFormatId,
        provider: &Arc<dyn RenderProvider>,
        bytes: Vec<u8>,
    ) {
        let mut state = self.lock();
        if let Some((_, slot)) = state.entries.iter_mut().find(|(id, _)| id == format) {
            if matches!(slot, Slot::Pending(current) if Arc::ptr_eq(current, provider)) {
                *slot = Slot::Ready(bytes);
            }
        }
    }

    fn write(&mut self, entries: &[NativeEntry]) -> Result<(), ClipboardAccessError> {
        let mut state = self.lock();
        if state.reject_writes > 0 {
            state.reject_writes -= 1;
            return Err(ClipboardAccessError::Busy(
                "clipboard held by another process".to_string(),
            ));
        }

        let entries = entries
            .iter()
            .map(|entry| {
                let slot = match &entry.content {
                    NativeContent::Bytes(bytes) => Slot::Ready(bytes.clone()),
                    NativeContent::Deferred(provider) => Slot::Pending(provider.clone()),
                };
                (entry.format.clone(), slot)
            })
            .collect();
        state.replace(entries);
        Ok(())
    }

    fn watch(&mut self, notifier: ChangeNotifier) -> anyhow::Result<()> {
        self.lock().notifier = Some(notifier);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        bytes: Option<Vec<u8>>,
    }

    impl RenderProvider for CountingProvider {
        fn render(&self) -> Option<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bytes.clone()
        }
    }

    fn text() -> NativeFormatId {
        NativeFormatId::from("Text")
    }

    #[test]
    fn write_replaces_previous_content() {
        let mut clipboard = InMemoryClipboard::new();
        clipboard
            .write(&[NativeEntry::bytes(text(), b"one".to_vec())])
            .unwrap();
        clipboard
            .write(&[NativeEntry::bytes(NativeFormatId::from("HTML Format"), b"<b/>".to_vec())])
            .unwrap();

        assert!(!clipboard.has(&text()).unwrap());
        assert_eq!(clipboard.formats(), vec![NativeFormatId::from("HTML Format")]);
    }

    #[test]
    fn rejected_write_leaves_content_untouched() {
        let mut clipboard = InMemoryClipboard::new();
        clipboard.copy_external(vec![(text(), b"before".to_vec())]);
        clipboard.reject_next_writes(1);

        let err = clipboard
            .write(&[NativeEntry::bytes(text(), b"after".to_vec())])
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(clipboard.pull(&text()), Some(b"before".to_vec()));

        clipboard
            .write(&[NativeEntry::bytes(text(), b"after".to_vec())])
            .unwrap();
        assert_eq!(clipboard.pull(&text()), Some(b"after".to_vec()));
    }

    #[test]
    fn deferred_entry_renders_once_and_is_cached() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            bytes: Some(b"rendered".to_vec()),
        });
        let mut clipboard = InMemoryClipboard::new();
        clipboard
            .write(&[NativeEntry::deferred(text(), provider.clone())])
            .unwrap();

        assert_eq!(clipboard.pull(&text()), Some(b"rendered".to_vec()));
        assert_eq!(clipboard.pull(&text()), Some(b"rendered".to_vec()));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_render_is_retried_on_next_pull() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            bytes: None,
        });
        let mut clipboard = InMemoryClipboard::new();
        clipboard
            .write(&[NativeEntry::deferred(text(), provider.clone())])
            .unwrap();

        assert_eq!(clipboard.pull(&text()), None);
        assert_eq!(clipboard.pull(&text()), None);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(clipboard.has(&text()).unwrap());
    }

    #[test]
    fn port_read_leaves_deferred_entries_unrendered() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            bytes: Some(b"rendered".to_vec()),
        });
        let mut clipboard = InMemoryClipboard::new();
        clipboard
            .write(&[NativeEntry::deferred(text(), provider.clone())])
            .unwrap();

        let content = clipboard.read(&text()).unwrap();
        assert!(matches!(content, Some(NativeContent::Deferred(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cached_render_replaces_only_the_same_provider() {
        let first: Arc<dyn RenderProvider> = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            bytes: None,
        });
        let second: Arc<dyn RenderProvider> = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            bytes: None,
        });
        let mut clipboard = InMemoryClipboard::new();
        clipboard
            .write(&[NativeEntry::deferred(text(), second.clone())])
            .unwrap();

        clipboard.cache_rendered(&text(), &first, b"stale".to_vec());
        assert!(matches!(
            clipboard.read(&text()).unwrap(),
            Some(NativeContent::Deferred(_))
        ));

        clipboard.cache_rendered(&text(), &second, b"fresh".to_vec());
        assert_eq!(clipboard.pull(&text()), Some(b"fresh".to_vec()));
    }

    #[tokio::test]
    async fn changes_signal_the_watcher() {
        let mut clipboard = InMemoryClipboard::new();
        let (notifier, mut rx) = ChangeNotifier::channel();
        clipboard.watch(notifier).unwrap();

        clipboard.copy_external(vec![(text(), b"x".to_vec())]);
        clipboard
            .write(&[NativeEntry::bytes(text(), b"y".to_vec())])
            .unwrap();

        assert_eq!(rx.recv().await, Some(()));
        assert_eq!(rx.recv().await, Some(()));
    }
}
