//! # clipbridge
//!
//! Command line front end: `copy` and `paste` drive the local clipboard
//! through a short-lived gateway, `server` shares it with networked peers.

pub mod bootstrap;
pub mod cli;
