//! Port interfaces.
//!
//! Ports define the contract between the clipboard core and the crates that
//! implement it: the platform layer provides the clipboard resource, the
//! infra layer provides file export, and the server provides peers to route
//! render requests to and to broadcast changes through.

mod clipboard;
mod clipboard_change_handler;
mod export;
mod render;

pub use clipboard::{
    ChangeNotifier, ChangeReceiver, ClipboardAccessError, NativeContent, NativeEntry,
    SystemClipboardPort,
};
pub use clipboard_change_handler::ClipboardChangeHandler;
pub use export::{ExportRequest, PayloadExportPort};
pub use render::{DeferredRenderPort, RenderProvider, RenderRouterPort};
