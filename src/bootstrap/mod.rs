pub mod config;
pub mod tracing;

pub use config::{load_config, resolve_config};
pub use self::tracing::init_tracing_subscriber;
