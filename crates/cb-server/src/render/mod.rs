mod coordinator;

pub use coordinator::{DeferredRenderCoordinator, RenderId};
