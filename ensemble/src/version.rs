//! Version information for the orchestrator.

/// Orchestrator version from Cargo.toml
pub const ENSEMBLE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Node protocol revision spoken on the outbound side.
pub const NODE_PROTOCOL_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    /// Orchestrator version.
    pub ensemble: &'static str,
    /// Node protocol revision.
    pub node_protocol: &'static str,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            ensemble: ENSEMBLE_VERSION,
            node_protocol: NODE_PROTOCOL_VERSION,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}
