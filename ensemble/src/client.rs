//! HTTP client for the node train/predict/health protocol (v0.1.0).
//!
//! Error classification is the load-bearing part: only transport failures
//! (connection refused/reset, DNS, truncated or undecodable bodies) are
//! retryable, and only the training calls retry — indefinitely, so a node
//! restart never loses in-flight training data. Timeouts and HTTP error
//! statuses always propagate immediately.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::discharge::Discharge;
use crate::registry::NodeDescriptor;

/// Fixed delay between transport retries.
pub const TRANSPORT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, thiserror::Error)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("node returned HTTP {status}: {body}")]
    Protocol { status: u16, body: String },
}

impl NodeError {
    /// The only class the training pipeline is allowed to retry.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Map a reqwest failure onto the taxonomy. Timeout wins over the generic
/// request class; everything that is neither a timeout nor an HTTP status
/// is a transport fault.
fn classify(err: reqwest::Error, timeout: Duration) -> NodeError {
    if err.is_timeout() {
        return NodeError::Timeout(timeout);
    }
    if let Some(status) = err.status() {
        return NodeError::Protocol {
            status: status.as_u16(),
            body: String::new(),
        };
    }
    NodeError::Transport(err.to_string())
}

/// Run `op` until it returns anything other than a transport error.
pub(crate) async fn retry_transport<T, F, Fut>(
    node: &str,
    what: &str,
    mut op: F,
) -> Result<T, NodeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NodeError>>,
{
    let mut attempt: u64 = 1;
    loop {
        match op().await {
            Err(err) if err.is_transport() => {
                tracing::warn!(node = %node, attempt, error = %err, "{what} hit a transport error, retrying");
                attempt += 1;
                tokio::time::sleep(TRANSPORT_RETRY_BACKOFF).await;
            }
            other => return other,
        }
    }
}

/// A node's answer to a predict call. Deliberately permissive: nodes differ
/// in which of these they populate, and `prediction` may be a number or a
/// string — coercion happens in `predict::normalise`, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResponse {
    #[serde(default)]
    pub prediction: Option<Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub justification: Option<f64>,
    #[serde(default)]
    pub windows: Vec<PredictionWindow>,
    #[serde(default)]
    pub execution_time_ms: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

/// One scoring window inside a node response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionWindow {
    #[serde(default)]
    pub justification: Option<f64>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// A node's acknowledgement of a training-session preamble.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingStart {
    #[serde(default)]
    pub expected_discharges: Option<u64>,
}

/// Reqwest-backed client for the four node endpoints.
pub struct NodeClient {
    http: reqwest::Client,
}

impl Default for NodeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// POST the discharge to the node's predict endpoint. No retry: a
    /// failed or slow node is excluded from the vote, not waited for.
    pub async fn predict(
        &self,
        node: &NodeDescriptor,
        discharge: &Discharge,
        timeout: Duration,
    ) -> Result<NodeResponse, NodeError> {
        let response = self
            .http
            .post(&node.predict_url)
            .timeout(timeout)
            .json(discharge)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;
        read_json(response, timeout).await
    }

    /// POST the training-session preamble. Retries transport errors forever.
    pub async fn start_training(
        &self,
        node: &NodeDescriptor,
        total_discharges: usize,
        timeout_seconds: u64,
        timeout: Duration,
    ) -> Result<TrainingStart, NodeError> {
        let body = serde_json::json!({
            "totalDischarges": total_discharges,
            "timeoutSeconds": timeout_seconds,
        });
        retry_transport(&node.key, "training start", || {
            let request = self.http.post(&node.train_url).timeout(timeout).json(&body);
            async move {
                let response = request.send().await.map_err(|e| classify(e, timeout))?;
                read_json(response, timeout).await
            }
        })
        .await
    }

    /// POST one discharge under its 1-based ordinal. Retries transport
    /// errors forever; the caller's serial queue provides the ordering.
    pub async fn push_discharge(
        &self,
        node: &NodeDescriptor,
        ordinal: u64,
        discharge: &Discharge,
        timeout: Duration,
    ) -> Result<(), NodeError> {
        let url = format!("{}/{}", node.train_url.trim_end_matches('/'), ordinal);
        retry_transport(&node.key, "discharge delivery", || {
            let request = self.http.post(&url).timeout(timeout).json(discharge);
            async move {
                let response = request.send().await.map_err(|e| classify(e, timeout))?;
                consume_ack(response, timeout).await
            }
        })
        .await
    }

    /// GET the node's health endpoint. No retry.
    pub async fn health(
        &self,
        node: &NodeDescriptor,
        timeout: Duration,
    ) -> Result<Value, NodeError> {
        let response = self
            .http
            .get(&node.health_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;
        read_json(response, timeout).await
    }
}

async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<T, NodeError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(NodeError::Protocol {
            status: status.as_u16(),
            body,
        });
    }
    response.json().await.map_err(|e| classify(e, timeout))
}

/// Check the ack status and drain the body so truncation surfaces as a
/// transport error.
async fn consume_ack(response: reqwest::Response, timeout: Duration) -> Result<(), NodeError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(NodeError::Protocol {
            status: status.as_u16(),
            body,
        });
    }
    response
        .bytes()
        .await
        .map(|_| ())
        .map_err(|e| classify(e, timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::node;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_json_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn predict_posts_discharge_and_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "prediction": "anomaly",
                "confidence": 0.9,
                "windows": [{"justification": 0.7, "start": 0}],
                "executionTimeMs": 12.5
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = NodeClient::new();
        let discharge = Discharge {
            id: "d1".to_string(),
            times: vec![0.0, 0.1],
            length: 2,
            signals: vec![],
            anomaly_time: None,
        };

        let response = client
            .predict(&node("a", &server.uri(), true), &discharge, TEST_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(response.prediction, Some(serde_json::json!("anomaly")));
        assert_eq!(response.confidence, Some(0.9));
        assert_eq!(response.windows.len(), 1);
        assert_eq!(response.windows[0].justification, Some(0.7));
        assert_eq!(response.execution_time_ms, Some(12.5));

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["id"], "d1");
        assert_eq!(body["length"], 2);
    }

    #[tokio::test]
    async fn predict_maps_http_error_to_protocol() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let client = NodeClient::new();
        let discharge = Discharge {
            id: "d1".to_string(),
            times: vec![],
            length: 0,
            signals: vec![],
            anomaly_time: None,
        };

        let err = client
            .predict(&node("a", &server.uri(), true), &discharge, TEST_TIMEOUT)
            .await
            .unwrap_err();
        match err {
            NodeError::Protocol { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn predict_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"prediction": 1}))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let client = NodeClient::new();
        let discharge = Discharge {
            id: "d1".to_string(),
            times: vec![],
            length: 0,
            signals: vec![],
            anomaly_time: None,
        };

        let err = client
            .predict(
                &node("a", &server.uri(), true),
                &discharge,
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn start_training_sends_preamble() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/train"))
            .and(body_json_string(
                r#"{"totalDischarges":4,"timeoutSeconds":7200}"#,
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"expectedDischarges": 4})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = NodeClient::new();
        let start = client
            .start_training(&node("a", &server.uri(), true), 4, 7200, TEST_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(start.expected_discharges, Some(4));
    }

    #[tokio::test]
    async fn push_discharge_targets_ordinal_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/train/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = NodeClient::new();
        let discharge = Discharge {
            id: "d3".to_string(),
            times: vec![0.0],
            length: 1,
            signals: vec![],
            anomaly_time: None,
        };
        client
            .push_discharge(&node("a", &server.uri(), true), 3, &discharge, TEST_TIMEOUT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn push_discharge_propagates_protocol_error_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/train/1"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad discharge"))
            .expect(1)
            .mount(&server)
            .await;

        let client = NodeClient::new();
        let discharge = Discharge {
            id: "d1".to_string(),
            times: vec![],
            length: 0,
            signals: vec![],
            anomaly_time: None,
        };
        let err = client
            .push_discharge(&node("a", &server.uri(), true), 1, &discharge, TEST_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Protocol { status: 422, .. }));
    }

    #[tokio::test]
    async fn health_returns_node_details() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "online",
                "version": "0.1.0"
            })))
            .mount(&server)
            .await;

        let client = NodeClient::new();
        let details = client
            .health(&node("a", &server.uri(), true), TEST_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(details["status"], "online");
    }

    // retry_transport is exercised with injected outcomes: wiremock cannot
    // simulate connection resets, and the classification boundary is what
    // matters here.

    #[tokio::test(start_paused = true)]
    async fn retry_survives_transient_transport_errors() {
        let attempts = AtomicUsize::new(0);
        let result: Result<&str, NodeError> = retry_transport("a", "test op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(NodeError::Transport("connection reset".to_string()))
                } else {
                    Ok("delivered")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "delivered");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_on_protocol_error() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), NodeError> = retry_transport("a", "test op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(NodeError::Protocol {
                    status: 500,
                    body: String::new(),
                })
            }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            NodeError::Protocol { status: 500, .. }
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_on_timeout() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), NodeError> = retry_transport("a", "test op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(NodeError::Timeout(Duration::from_secs(30))) }
        })
        .await;

        assert!(matches!(result.unwrap_err(), NodeError::Timeout(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
