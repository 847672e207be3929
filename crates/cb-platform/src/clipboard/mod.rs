mod memory;
mod system;

pub use memory::InMemoryClipboard;
pub use system::SystemClipboard;

use cb_core::config::ClipboardBackend;
use cb_core::ports::SystemClipboardPort;

use crate::gateway::ClipboardFactory;

/// Factory for the configured backend, to be run on the clipboard thread.
pub fn factory_for(backend: ClipboardBackend) -> ClipboardFactory {
    match backend {
        ClipboardBackend::System => {
            Box::new(|| -> anyhow::Result<Box<dyn SystemClipboardPort>> {
                Ok(Box::new(SystemClipboard::new()?))
            })
        }
        ClipboardBackend::Memory => {
            Box::new(|| -> anyhow::Result<Box<dyn SystemClipboardPort>> {
                Ok(Box::new(InMemoryClipboard::new()))
            })
        }
    }
}
