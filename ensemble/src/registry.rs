//! Node registry: the mutable fleet configuration the orchestrator reads.
//!
//! Readers may observe updates mid-operation; each orchestration takes its
//! own snapshot of the enabled set at dispatch time, so a registry write
//! never changes the fleet of an in-flight request.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One registered prediction node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub key: String,
    pub display_name: String,
    #[serde(rename = "predictURL")]
    pub predict_url: String,
    #[serde(rename = "trainURL")]
    pub train_url: String,
    #[serde(rename = "healthURL")]
    pub health_url: String,
    pub enabled: bool,
}

/// Partial update applied to a registered node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    pub display_name: Option<String>,
    #[serde(rename = "predictURL")]
    pub predict_url: Option<String>,
    #[serde(rename = "trainURL")]
    pub train_url: Option<String>,
    #[serde(rename = "healthURL")]
    pub health_url: Option<String>,
    pub enabled: Option<bool>,
}

fn default_model_timeout_ms() -> u64 {
    30_000
}

fn default_training_timeout_ms() -> u64 {
    7_200_000
}

/// Per-call HTTP deadlines, in milliseconds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(rename = "model", default = "default_model_timeout_ms")]
    pub model_ms: u64,
    #[serde(rename = "training", default = "default_training_timeout_ms")]
    pub training_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            model_ms: default_model_timeout_ms(),
            training_ms: default_training_timeout_ms(),
        }
    }
}

impl Timeouts {
    pub fn model(&self) -> Duration {
        Duration::from_millis(self.model_ms)
    }

    pub fn training(&self) -> Duration {
        Duration::from_millis(self.training_ms)
    }

    /// Whole seconds advertised to nodes in the training preamble.
    pub fn training_secs(&self) -> u64 {
        self.training_ms.div_ceil(1000)
    }
}

/// Partial update for [`Timeouts`].
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TimeoutsUpdate {
    pub model: Option<u64>,
    pub training: Option<u64>,
}

/// Snapshot returned by the `/config` surface.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub models: Vec<NodeDescriptor>,
    pub timeouts: Timeouts,
}

/// Mutable name → node mapping plus timeouts, keyed and iterated by `key`.
pub struct Registry {
    nodes: RwLock<BTreeMap<String, NodeDescriptor>>,
    timeouts: RwLock<Timeouts>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_nodes(Vec::new(), Timeouts::default())
    }

    pub fn with_nodes(nodes: Vec<NodeDescriptor>, timeouts: Timeouts) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|node| (node.key.clone(), node))
            .collect();
        Self {
            nodes: RwLock::new(nodes),
            timeouts: RwLock::new(timeouts),
        }
    }

    pub fn snapshot(&self) -> Vec<NodeDescriptor> {
        self.nodes.read().unwrap().values().cloned().collect()
    }

    /// Snapshot of the enabled fleet, taken once per orchestration.
    pub fn enabled(&self) -> Vec<NodeDescriptor> {
        self.nodes
            .read()
            .unwrap()
            .values()
            .filter(|node| node.enabled)
            .cloned()
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<NodeDescriptor> {
        self.nodes.read().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.read().unwrap().contains_key(key)
    }

    pub fn insert(&self, node: NodeDescriptor) {
        self.nodes.write().unwrap().insert(node.key.clone(), node);
    }

    /// Apply a partial update in place. Returns false for an unknown key.
    pub fn update(&self, key: &str, update: NodeUpdate) -> bool {
        let mut nodes = self.nodes.write().unwrap();
        let Some(node) = nodes.get_mut(key) else {
            return false;
        };
        if let Some(display_name) = update.display_name {
            node.display_name = display_name;
        }
        if let Some(predict_url) = update.predict_url {
            node.predict_url = predict_url;
        }
        if let Some(train_url) = update.train_url {
            node.train_url = train_url;
        }
        if let Some(health_url) = update.health_url {
            node.health_url = health_url;
        }
        if let Some(enabled) = update.enabled {
            node.enabled = enabled;
        }
        true
    }

    pub fn remove(&self, key: &str) -> bool {
        self.nodes.write().unwrap().remove(key).is_some()
    }

    pub fn timeouts(&self) -> Timeouts {
        *self.timeouts.read().unwrap()
    }

    pub fn update_timeouts(&self, update: TimeoutsUpdate) -> Timeouts {
        let mut timeouts = self.timeouts.write().unwrap();
        if let Some(model) = update.model {
            timeouts.model_ms = model;
        }
        if let Some(training) = update.training {
            timeouts.training_ms = training;
        }
        *timeouts
    }

    pub fn config(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            models: self.snapshot(),
            timeouts: self.timeouts(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::node;
    use super::*;

    #[test]
    fn enabled_filters_and_sorts_by_key() {
        let registry = Registry::with_nodes(
            vec![
                node("zeta", "http://z", true),
                node("alpha", "http://a", true),
                node("mid", "http://m", false),
            ],
            Timeouts::default(),
        );

        let enabled: Vec<String> = registry.enabled().into_iter().map(|n| n.key).collect();
        assert_eq!(enabled, vec!["alpha", "zeta"]);
        assert_eq!(registry.snapshot().len(), 3);
    }

    #[test]
    fn update_patches_in_place() {
        let registry = Registry::with_nodes(vec![node("a", "http://a", true)], Timeouts::default());

        let applied = registry.update(
            "a",
            NodeUpdate {
                enabled: Some(false),
                display_name: Some("Model A".to_string()),
                ..Default::default()
            },
        );
        assert!(applied);

        let updated = registry.get("a").unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.display_name, "Model A");
        assert_eq!(updated.predict_url, "http://a/predict");

        assert!(!registry.update("ghost", NodeUpdate::default()));
    }

    #[test]
    fn remove_reports_membership() {
        let registry = Registry::with_nodes(vec![node("a", "http://a", true)], Timeouts::default());
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn timeout_defaults_and_updates() {
        let registry = Registry::new();
        assert_eq!(registry.timeouts().model(), Duration::from_secs(30));
        assert_eq!(registry.timeouts().training_secs(), 7200);

        let updated = registry.update_timeouts(TimeoutsUpdate {
            model: Some(1_500),
            training: None,
        });
        assert_eq!(updated.model_ms, 1_500);
        assert_eq!(updated.training_ms, 7_200_000);
    }

    #[test]
    fn training_secs_rounds_up() {
        let timeouts = Timeouts {
            model_ms: 30_000,
            training_ms: 1_001,
        };
        assert_eq!(timeouts.training_secs(), 2);
    }

    #[test]
    fn descriptor_wire_field_names() {
        let json = serde_json::to_value(node("a", "http://a", true)).unwrap();
        assert_eq!(json["predictURL"], "http://a/predict");
        assert_eq!(json["trainURL"], "http://a/train");
        assert_eq!(json["healthURL"], "http://a/health");
        assert_eq!(json["displayName"], "A");
    }
}
