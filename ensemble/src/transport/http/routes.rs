//! HTTP route handlers for the `/api` surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::automated::Thresholds;
use crate::discharge::Discharge;
use crate::error::OrchestratorError;
use crate::health::HealthReport;
use crate::parser::{SensorFile, parse_discharge};
use crate::predict::PredictionRequest;
use crate::registry::{ConfigSnapshot, NodeDescriptor, NodeUpdate, TimeoutsUpdate};
use crate::service::OrchestratorService;

fn error_response(err: &OrchestratorError) -> (StatusCode, Json<Value>) {
    (err.status(), Json(json!({ "error": err.to_string() })))
}

fn bad_body() -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "request body must be JSON" })),
    )
}

fn ok_json<T: Serialize>(value: &T) -> (StatusCode, Json<Value>) {
    match serde_json::to_value(value) {
        Ok(value) => (StatusCode::OK, Json(value)),
        Err(err) => error_response(&OrchestratorError::internal(err)),
    }
}

async fn health_check(State(service): State<Arc<OrchestratorService>>) -> Json<HealthReport> {
    Json(service.prober().probe_all().await)
}

async fn predict(
    State(service): State<Arc<OrchestratorService>>,
    body: Option<Json<PredictionRequest>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(request)) = body else {
        return bad_body();
    };

    match service.predictor().orchestrate(&request).await {
        Ok(outcome) => match outcome.vote.decision {
            Some(class) => (
                StatusCode::OK,
                Json(json!({
                    "class": class,
                    "confidence": outcome.vote.confidence,
                    "details": outcome,
                })),
            ),
            // Tie, or nothing to vote on: the decision stays null and the
            // full per-model record ships with the conflict.
            None => (
                StatusCode::CONFLICT,
                Json(json!({
                    "class": Value::Null,
                    "confidence": outcome.vote.confidence,
                    "details": outcome,
                })),
            ),
        },
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrainRequest {
    #[serde(default)]
    discharges: Vec<Discharge>,
    total_discharges: Option<usize>,
}

fn materialise(discharges: Vec<Discharge>) -> Vec<Arc<Discharge>> {
    discharges
        .into_iter()
        .enumerate()
        .map(|(idx, discharge)| Arc::new(discharge.normalised(idx)))
        .collect()
}

async fn train(
    State(service): State<Arc<OrchestratorService>>,
    body: Option<Json<TrainRequest>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(request)) = body else {
        return bad_body();
    };
    if request.discharges.is_empty() {
        return error_response(&OrchestratorError::bad_request(
            "discharges must be a non-empty list",
        ));
    }

    let discharges = materialise(request.discharges);
    match service
        .training()
        .train_batch(discharges, request.total_discharges)
        .await
    {
        Ok(report) => ok_json(&report),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrainStartRequest {
    total_discharges: usize,
    #[serde(default)]
    auto_finish: bool,
}

async fn train_start(
    State(service): State<Arc<OrchestratorService>>,
    body: Option<Json<TrainStartRequest>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(request)) = body else {
        return bad_body();
    };
    match service
        .training()
        .start_session(request.total_discharges, request.auto_finish)
        .await
    {
        Ok(report) => ok_json(&report),
        Err(err) => error_response(&err),
    }
}

async fn train_finish(
    State(service): State<Arc<OrchestratorService>>,
) -> (StatusCode, Json<Value>) {
    match service.training().finish_session().await {
        Ok(report) => ok_json(&report),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrainRawMetadata {
    total_discharges: Option<usize>,
    #[serde(default)]
    discharges: Vec<RawDischargeInfo>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDischargeInfo {
    id: Option<String>,
    anomaly_time: Option<f64>,
}

/// Multipart training: a `metadata` JSON part plus `discharge<N>` file
/// parts. All parts sharing one `N` form one discharge.
async fn train_raw(
    State(service): State<Arc<OrchestratorService>>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let mut metadata = TrainRawMetadata::default();
    let mut groups: BTreeMap<usize, Vec<SensorFile>> = BTreeMap::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return error_response(&OrchestratorError::bad_request(format!(
                    "malformed multipart body: {err}"
                )));
            }
        };
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "metadata" {
            let text = match field.text().await {
                Ok(text) => text,
                Err(err) => {
                    return error_response(&OrchestratorError::bad_request(format!(
                        "unreadable metadata part: {err}"
                    )));
                }
            };
            metadata = match serde_json::from_str(&text) {
                Ok(metadata) => metadata,
                Err(err) => {
                    return error_response(&OrchestratorError::bad_request(format!(
                        "invalid metadata JSON: {err}"
                    )));
                }
            };
        } else if let Some(index) = name
            .strip_prefix("discharge")
            .and_then(|s| s.parse::<usize>().ok())
        {
            let file_name = field.file_name().unwrap_or(&name).to_string();
            let content = match field.text().await {
                Ok(content) => content,
                Err(err) => {
                    return error_response(&OrchestratorError::bad_request(format!(
                        "unreadable sensor file `{file_name}`: {err}"
                    )));
                }
            };
            groups
                .entry(index)
                .or_default()
                .push(SensorFile::new(file_name, content));
        }
    }

    if groups.is_empty() {
        return error_response(&OrchestratorError::bad_request(
            "no discharge files in request",
        ));
    }

    let mut discharges = Vec::with_capacity(groups.len());
    for (index, files) in &groups {
        let mut discharge = match parse_discharge(files) {
            Ok(discharge) => discharge,
            Err(err) => return error_response(&err.into()),
        };
        let info = metadata
            .discharges
            .get(*index)
            .cloned()
            .unwrap_or_default();
        discharge.id = info.id.unwrap_or_else(|| format!("discharge_{index}"));
        discharge.anomaly_time = info.anomaly_time;
        discharges.push(Arc::new(discharge));
    }

    match service
        .training()
        .train_batch(discharges, metadata.total_discharges)
        .await
    {
        Ok(report) => ok_json(&report),
        Err(err) => error_response(&err),
    }
}

async fn record_training_summary(
    State(service): State<Arc<OrchestratorService>>,
    body: Option<Json<Value>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(summary)) = body else {
        return bad_body();
    };
    match service.summaries().record(summary) {
        Ok(()) => (StatusCode::OK, Json(json!({ "stored": true }))),
        Err(err) => error_response(&err),
    }
}

async fn list_training_summaries(
    State(service): State<Arc<OrchestratorService>>,
) -> Json<Value> {
    Json(Value::Array(service.summaries().get()))
}

async fn start_automated_session(
    State(service): State<Arc<OrchestratorService>>,
) -> (StatusCode, Json<Value>) {
    match service.automated().start() {
        Ok(id) => (StatusCode::OK, Json(json!({ "sessionId": id }))),
        Err(err) => error_response(&err),
    }
}

async fn upload_to_automated_session(
    State(service): State<Arc<OrchestratorService>>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let mut files = Vec::new();
    let mut discharge_id: Option<String> = None;
    let mut thresholds = Thresholds::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return error_response(&OrchestratorError::bad_request(format!(
                    "malformed multipart body: {err}"
                )));
            }
        };
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("signal.txt").to_string();
                match field.text().await {
                    Ok(content) => files.push(SensorFile::new(file_name, content)),
                    Err(err) => {
                        return error_response(&OrchestratorError::bad_request(format!(
                            "unreadable sensor file `{file_name}`: {err}"
                        )));
                    }
                }
            }
            "dischargeId" => match field.text().await {
                Ok(text) => discharge_id = Some(text),
                Err(err) => {
                    return error_response(&OrchestratorError::bad_request(format!(
                        "unreadable dischargeId part: {err}"
                    )));
                }
            },
            "thresholds" => {
                let text = match field.text().await {
                    Ok(text) => text,
                    Err(err) => {
                        return error_response(&OrchestratorError::bad_request(format!(
                            "unreadable thresholds part: {err}"
                        )));
                    }
                };
                thresholds = match serde_json::from_str(&text) {
                    Ok(thresholds) => thresholds,
                    Err(err) => {
                        return error_response(&OrchestratorError::bad_request(format!(
                            "invalid thresholds JSON: {err}"
                        )));
                    }
                };
            }
            _ => {}
        }
    }

    let Some(discharge_id) = discharge_id else {
        return error_response(&OrchestratorError::bad_request("missing dischargeId field"));
    };
    if files.is_empty() {
        return error_response(&OrchestratorError::bad_request(
            "no sensor files in request",
        ));
    }

    match service
        .automated()
        .upload(id, &files, &discharge_id, thresholds)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(err) => error_response(&err),
    }
}

async fn finalize_automated_session(
    State(service): State<Arc<OrchestratorService>>,
    Path(id): Path<Uuid>,
) -> Response {
    match service.automated().finalize(id).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/zip"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"automated-predicts.zip\"",
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

fn ok_config(service: &OrchestratorService) -> (StatusCode, Json<Value>) {
    ok_json(&service.registry().config())
}

async fn config_snapshot(
    State(service): State<Arc<OrchestratorService>>,
) -> Json<ConfigSnapshot> {
    Json(service.registry().config())
}

async fn add_model(
    State(service): State<Arc<OrchestratorService>>,
    body: Option<Json<NodeDescriptor>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(node)) = body else {
        return bad_body();
    };
    if node.key.is_empty() {
        return error_response(&OrchestratorError::bad_request("model key must not be empty"));
    }
    if service.registry().contains(&node.key) {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": format!("model `{}` already exists", node.key) })),
        );
    }
    service.registry().insert(node);
    ok_config(&service)
}

async fn update_model(
    State(service): State<Arc<OrchestratorService>>,
    Path(key): Path<String>,
    body: Option<Json<NodeUpdate>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(update)) = body else {
        return bad_body();
    };
    if service.registry().update(&key, update) {
        ok_config(&service)
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown model `{key}`") })),
        )
    }
}

async fn remove_model(
    State(service): State<Arc<OrchestratorService>>,
    Path(key): Path<String>,
) -> (StatusCode, Json<Value>) {
    if service.registry().remove(&key) {
        ok_config(&service)
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown model `{key}`") })),
        )
    }
}

async fn update_timeouts(
    State(service): State<Arc<OrchestratorService>>,
    body: Option<Json<TimeoutsUpdate>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(update)) = body else {
        return bad_body();
    };
    service.registry().update_timeouts(update);
    ok_config(&service)
}

pub fn routes(service: Arc<OrchestratorService>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/predict", post(predict))
        .route("/api/train", post(train))
        .route("/api/train/raw", post(train_raw))
        .route("/api/train/start", post(train_start))
        .route("/api/train/finish", post(train_finish))
        .route(
            "/api/trainingCompleted",
            post(record_training_summary).get(list_training_summaries),
        )
        .route(
            "/api/automated-predicts/session",
            post(start_automated_session),
        )
        .route(
            "/api/automated-predicts/session/{id}",
            post(upload_to_automated_session),
        )
        .route(
            "/api/automated-predicts/session/{id}/zip",
            get(finalize_automated_session),
        )
        .route("/api/config", get(config_snapshot))
        .route("/api/config/models", post(add_model))
        .route(
            "/api/config/models/{key}",
            put(update_model).delete(remove_model),
        )
        .route("/api/config/timeouts", put(update_timeouts))
        .with_state(service)
}
