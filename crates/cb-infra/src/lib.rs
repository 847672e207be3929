//! # cb-infra
//!
//! Infrastructure adapters for clipbridge. Currently the large-payload
//! exporter, which writes clipboard payloads to disk and hands back a file
//! name instead of the bytes.

pub mod export;

pub use export::FileExporter;
