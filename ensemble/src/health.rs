//! Fleet health aggregation.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::client::NodeClient;
use crate::registry::Registry;
use crate::version::VersionInfo;

/// One node's probe result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelHealth {
    pub model: String,
    pub display_name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate availability of the registered fleet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub server_status: &'static str,
    pub timestamp: String,
    pub version: VersionInfo,
    pub models: Vec<ModelHealth>,
    pub available_models: usize,
}

pub struct HealthProber {
    registry: Arc<Registry>,
    client: Arc<NodeClient>,
}

impl HealthProber {
    pub fn new(registry: Arc<Registry>, client: Arc<NodeClient>) -> Self {
        Self { registry, client }
    }

    /// Probe every registered node concurrently. Disabled nodes are
    /// reported without a network call; each live probe is bounded by the
    /// model timeout, so one hung node cannot stall the aggregate.
    pub async fn probe_all(&self) -> HealthReport {
        let nodes = self.registry.snapshot();
        let timeout = self.registry.timeouts().model();

        let probes = nodes.into_iter().map(|node| {
            let client = Arc::clone(&self.client);
            async move {
                if !node.enabled {
                    return ModelHealth {
                        model: node.key,
                        display_name: node.display_name,
                        status: "disabled".to_string(),
                        details: None,
                        error: None,
                    };
                }

                match client.health(&node, timeout).await {
                    Ok(details) => {
                        let status = details
                            .get("status")
                            .and_then(Value::as_str)
                            .unwrap_or("online")
                            .to_string();
                        ModelHealth {
                            model: node.key,
                            display_name: node.display_name,
                            status,
                            details: Some(details),
                            error: None,
                        }
                    }
                    Err(err) => {
                        tracing::warn!(node = %node.key, error = %err, "health probe failed");
                        ModelHealth {
                            model: node.key,
                            display_name: node.display_name,
                            status: "offline".to_string(),
                            details: None,
                            error: Some(err.to_string()),
                        }
                    }
                }
            }
        });

        let models = futures::future::join_all(probes).await;
        let available_models = models.iter().filter(|m| m.status == "online").count();

        HealthReport {
            server_status: "online",
            timestamp: chrono::Utc::now().to_rfc3339(),
            version: VersionInfo::new(),
            models,
            available_models,
        }
    }
}
