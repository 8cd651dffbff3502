//! Prediction fan-out: dispatch one discharge to every enabled node,
//! isolate per-node failures, normalise the survivors and vote.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{NodeClient, NodeResponse};
use crate::discharge::Discharge;
use crate::error::OrchestratorError;
use crate::registry::Registry;
use crate::voting::{self, Vote, VoteOutcome};

/// Client-facing request body. Only `discharges[0]` is dispatched — the
/// predictor is one-at-a-time by protocol.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionRequest {
    #[serde(default)]
    pub discharges: Vec<Discharge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Success,
    Error,
}

/// One node's contribution to a fan-out, success or failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResult {
    pub model: String,
    pub status: ModelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<NodeResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything one orchestration produced: the vote plus the raw per-model
/// record it was derived from.
#[derive(Debug, Clone, Serialize)]
pub struct PredictOutcome {
    #[serde(flatten)]
    pub vote: VoteOutcome,
    pub models: Vec<ModelResult>,
}

pub struct PredictOrchestrator {
    registry: Arc<Registry>,
    client: Arc<NodeClient>,
}

impl PredictOrchestrator {
    pub fn new(registry: Arc<Registry>, client: Arc<NodeClient>) -> Self {
        Self { registry, client }
    }

    /// Fan the first discharge out to the enabled fleet and vote on the
    /// answers. Per-node failures (timeouts included) become error records;
    /// only request-shape and configuration problems fail the whole call.
    pub async fn orchestrate(
        &self,
        request: &PredictionRequest,
    ) -> Result<PredictOutcome, OrchestratorError> {
        let discharge = request.discharges.first().ok_or_else(|| {
            OrchestratorError::bad_request("discharges must be a non-empty list")
        })?;

        let nodes = self.registry.enabled();
        if nodes.is_empty() {
            return Err(OrchestratorError::NoModelsEnabled);
        }
        let timeout = self.registry.timeouts().model();

        let calls = nodes.iter().map(|node| {
            let client = Arc::clone(&self.client);
            async move {
                match client.predict(node, discharge, timeout).await {
                    Ok(response) => ModelResult {
                        model: node.key.clone(),
                        status: ModelStatus::Success,
                        result: Some(response),
                        error: None,
                    },
                    Err(err) => {
                        tracing::warn!(node = %node.key, error = %err, "predict call failed");
                        ModelResult {
                            model: node.key.clone(),
                            status: ModelStatus::Error,
                            result: None,
                            error: Some(err.to_string()),
                        }
                    }
                }
            }
        });

        let models = futures::future::join_all(calls).await;
        let votes = normalise(&models);
        let vote = voting::tally(&votes, models.len());

        tracing::info!(
            discharge = %discharge.id,
            models = models.len(),
            votes = votes.len(),
            decision = ?vote.decision,
            "prediction fan-out complete"
        );

        Ok(PredictOutcome { vote, models })
    }
}

/// Coerce heterogeneous node responses into numeric votes. This is the
/// single place string predictions are interpreted; the voting engine
/// never sees anything but 0/1.
pub(crate) fn normalise(results: &[ModelResult]) -> Vec<Vote> {
    results
        .iter()
        .filter_map(|result| {
            let response = result.result.as_ref()?;
            let class = coerce_prediction(response.prediction.as_ref()?)?;
            Some(Vote {
                model: result.model.clone(),
                prediction: class,
                confidence: response.confidence.unwrap_or(1.0),
            })
        })
        .collect()
}

fn coerce_prediction(value: &Value) -> Option<u8> {
    match value {
        Value::String(s) => Some(u8::from(s.eq_ignore_ascii_case("anomaly"))),
        Value::Number(n) => Some(u8::from(n.as_f64() == Some(1.0))),
        _ => None,
    }
}
