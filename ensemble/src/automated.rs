//! Automated-predict sessions.
//!
//! A session is a long-lived, server-side context spanning many uploads.
//! Every upload runs one fan-out, stores the raw orchestrator output under
//! the session's scratch directory, and folds each node's per-window
//! justifications into a running table with a two-stage threshold rule
//! (per-window, and streak-of-N). Finalisation packages everything as one
//! ZIP and tears the session down.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tempfile::TempDir;
use tokio::sync::Mutex;
use uuid::Uuid;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::OrchestratorError;
use crate::parser::{self, SensorFile};
use crate::predict::{PredictOrchestrator, PredictionRequest};

fn default_count() -> usize {
    1
}

/// Per-upload threshold parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub justification: f64,
    #[serde(default = "default_count")]
    pub count: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            justification: 0.0,
            count: 1,
        }
    }
}

#[derive(Debug, Default)]
struct DischargeStats {
    justifications: Vec<f64>,
    thresholds: Vec<u8>,
    count_thresholds: Vec<u8>,
}

impl DischargeStats {
    fn push(&mut self, justification: f64, thresholds: &Thresholds) {
        self.justifications.push(justification);
        self.thresholds
            .push(u8::from(justification > thresholds.justification));

        // Streak-of-N: set iff the latest `count` per-window thresholds
        // exist and are all set.
        let n = thresholds.count.max(1);
        let len = self.thresholds.len();
        let streak = len >= n && self.thresholds[len - n..].iter().all(|&t| t == 1);
        self.count_thresholds.push(u8::from(streak));
    }
}

#[derive(Debug, Default)]
struct ModelStats {
    discharge_ids: Vec<String>,
    discharges: HashMap<String, DischargeStats>,
}

struct AutoSession {
    dir: TempDir,
    discharge_order: Vec<String>,
    stats: BTreeMap<String, ModelStats>,
}

pub struct AutomatedPredictManager {
    orchestrator: Arc<PredictOrchestrator>,
    sessions: DashMap<Uuid, Arc<Mutex<AutoSession>>>,
}

impl AutomatedPredictManager {
    pub fn new(orchestrator: Arc<PredictOrchestrator>) -> Self {
        Self {
            orchestrator,
            sessions: DashMap::new(),
        }
    }

    /// Create a session with its own scratch directory.
    pub fn start(&self) -> Result<Uuid, OrchestratorError> {
        let dir = TempDir::new().map_err(OrchestratorError::internal)?;
        let id = Uuid::new_v4();
        self.sessions.insert(
            id,
            Arc::new(Mutex::new(AutoSession {
                dir,
                discharge_order: Vec::new(),
                stats: BTreeMap::new(),
            })),
        );
        tracing::info!(session = %id, "automated-predict session started");
        Ok(id)
    }

    /// Run one discharge through the fleet and fold the answers into the
    /// session's stats.
    pub async fn upload(
        &self,
        id: Uuid,
        files: &[SensorFile],
        discharge_id: &str,
        thresholds: Thresholds,
    ) -> Result<(), OrchestratorError> {
        let session = self
            .sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(OrchestratorError::SessionNotFound(id))?;

        let mut discharge = parser::parse_discharge(files)?;
        discharge.id = discharge_id.to_string();
        let request = PredictionRequest {
            discharges: vec![discharge],
        };
        let outcome = self.orchestrator.orchestrate(&request).await?;

        let mut session = session.lock().await;

        let raw_dir = session.dir.path().join("raw");
        std::fs::create_dir_all(&raw_dir).map_err(OrchestratorError::internal)?;
        let raw_path = raw_dir.join(format!("{}.json", safe_name(discharge_id)));
        let file = std::fs::File::create(&raw_path).map_err(OrchestratorError::internal)?;
        serde_json::to_writer_pretty(file, &outcome).map_err(OrchestratorError::internal)?;

        if !session.discharge_order.iter().any(|d| d == discharge_id) {
            session.discharge_order.push(discharge_id.to_string());
        }

        for result in &outcome.models {
            let Some(response) = result.result.as_ref() else {
                continue;
            };
            let model = session.stats.entry(result.model.clone()).or_default();
            if !model.discharge_ids.iter().any(|d| d == discharge_id) {
                model.discharge_ids.push(discharge_id.to_string());
            }
            let stats = model.discharges.entry(discharge_id.to_string()).or_default();
            // Only the per-window justifications feed the table; the
            // response's scalar justification does not.
            for window in &response.windows {
                if let Some(justification) = window.justification {
                    stats.push(justification, &thresholds);
                }
            }
        }

        tracing::debug!(session = %id, discharge = %discharge_id, "upload folded into session stats");
        Ok(())
    }

    /// Package the session as a ZIP and tear it down. The scratch
    /// directory is deleted with the session.
    pub async fn finalize(&self, id: Uuid) -> Result<Vec<u8>, OrchestratorError> {
        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or(OrchestratorError::SessionNotFound(id))?;
        // Wait for in-flight uploads before reading the stats.
        let session = session.lock().await;

        let mut archive = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        let raw_dir = session.dir.path().join("raw");
        if raw_dir.is_dir() {
            let mut entries: Vec<_> = std::fs::read_dir(&raw_dir)
                .map_err(OrchestratorError::internal)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .collect();
            entries.sort();
            for path in entries {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                archive
                    .start_file(format!("raw/{name}"), options)
                    .map_err(OrchestratorError::internal)?;
                let bytes = std::fs::read(&path).map_err(OrchestratorError::internal)?;
                archive
                    .write_all(&bytes)
                    .map_err(OrchestratorError::internal)?;
            }
        }

        for (model, stats) in &session.stats {
            let table = render_model_csv(&session.discharge_order, stats)?;
            archive
                .start_file(format!("stats/{}.csv", safe_name(model)), options)
                .map_err(OrchestratorError::internal)?;
            archive
                .write_all(&table)
                .map_err(OrchestratorError::internal)?;
        }

        let cursor = archive.finish().map_err(OrchestratorError::internal)?;
        tracing::info!(session = %id, "automated-predict session finalised");
        Ok(cursor.into_inner())
    }
}

/// One column triplet per discharge in session order; rows padded to the
/// model's longest justification vector.
fn render_model_csv(
    order: &[String],
    stats: &ModelStats,
) -> Result<Vec<u8>, OrchestratorError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = Vec::with_capacity(order.len() * 3);
    for id in order {
        let safe = safe_name(id);
        header.push(format!("{safe}_justification"));
        header.push(format!("{safe}_justification_threshold"));
        header.push(format!("{safe}_count_threshold"));
    }
    writer
        .write_record(&header)
        .map_err(OrchestratorError::internal)?;

    let rows = order
        .iter()
        .filter_map(|id| stats.discharges.get(id))
        .map(|d| d.justifications.len())
        .max()
        .unwrap_or(0);

    for row in 0..rows {
        let mut record = Vec::with_capacity(order.len() * 3);
        for id in order {
            match stats.discharges.get(id) {
                Some(d) if row < d.justifications.len() => {
                    record.push(d.justifications[row].to_string());
                    record.push(d.thresholds[row].to_string());
                    record.push(d.count_thresholds[row].to_string());
                }
                _ => {
                    record.extend([String::new(), String::new(), String::new()]);
                }
            }
        }
        writer
            .write_record(&record)
            .map_err(OrchestratorError::internal)?;
    }

    writer
        .into_inner()
        .map_err(|e| OrchestratorError::Internal(e.to_string()))
}

/// Filesystem- and CSV-safe rendition of a client-supplied identifier.
pub(crate) fn safe_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
