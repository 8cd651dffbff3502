//! Bounded store of training-completed callbacks from nodes.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::OrchestratorError;

/// Newest summaries retained; older entries are evicted FIFO.
pub const MAX_SUMMARIES: usize = 100;

#[derive(Debug, Default)]
pub struct SummaryStore {
    entries: Mutex<VecDeque<Value>>,
}

impl SummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate, timestamp and append one summary.
    pub fn record(&self, mut summary: Value) -> Result<(), OrchestratorError> {
        let object = summary
            .as_object_mut()
            .ok_or_else(|| OrchestratorError::bad_request("summary must be a JSON object"))?;
        if !object.contains_key("status") {
            return Err(OrchestratorError::bad_request(
                "summary is missing required field `status`",
            ));
        }
        object.insert(
            "timestamp".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );

        let mut entries = self.entries.lock().unwrap();
        entries.push_back(summary);
        if entries.len() > MAX_SUMMARIES {
            entries.pop_front();
        }
        Ok(())
    }

    /// All retained summaries in insertion order.
    pub fn get(&self) -> Vec<Value> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }
}
