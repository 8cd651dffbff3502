//! Transport layer for the orchestrator.
//!
//! Currently provides HTTP transport via axum; other transports would be
//! added as separate submodules.

pub mod http;

pub use http::{ServerConfig, serve};
