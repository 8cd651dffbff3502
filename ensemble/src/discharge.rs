//! Discharge wire model shared by the node protocol, the trainer and the
//! prediction fan-out.

use serde::{Deserialize, Serialize};

/// One sensor's value sequence within a discharge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub file_name: String,
    pub values: Vec<f64>,
}

/// One experiment's bundle of time-aligned sensor signals.
///
/// All signals share `times` as their x-axis; `length` always equals
/// `times.len()` on the wire. Signal order is preserved end-to-end —
/// nodes rely on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discharge {
    #[serde(default)]
    pub id: String,
    pub times: Vec<f64>,
    #[serde(default)]
    pub length: usize,
    pub signals: Vec<Signal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_time: Option<f64>,
}

impl Discharge {
    /// Fill in the fields a client is allowed to omit: an auto-generated
    /// id (`discharge_<idx>`) and the derived `length`.
    pub fn normalised(mut self, idx: usize) -> Self {
        if self.id.is_empty() {
            self.id = format!("discharge_{idx}");
        }
        self.length = self.times.len();
        for signal in &self.signals {
            if signal.values.len() != self.length {
                tracing::warn!(
                    discharge = %self.id,
                    signal = %signal.file_name,
                    values = signal.values.len(),
                    length = self.length,
                    "signal value count differs from discharge length"
                );
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Discharge {
        Discharge {
            id: "d1".to_string(),
            times: vec![0.0, 0.1, 0.2],
            length: 3,
            signals: vec![Signal {
                file_name: "probe_a.txt".to_string(),
                values: vec![1.0, 2.0, 3.0],
            }],
            anomaly_time: None,
        }
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["id"], "d1");
        assert_eq!(json["signals"][0]["fileName"], "probe_a.txt");
        assert_eq!(json["length"], 3);
        // anomalyTime omitted when absent
        assert!(json.get("anomalyTime").is_none());
    }

    #[test]
    fn serializes_anomaly_time_when_present() {
        let mut discharge = sample();
        discharge.anomaly_time = Some(0.15);
        let json = serde_json::to_value(discharge).unwrap();
        assert_eq!(json["anomalyTime"], 0.15);
    }

    #[test]
    fn deserializes_without_id_or_length() {
        let discharge: Discharge = serde_json::from_value(serde_json::json!({
            "times": [0.0, 0.1],
            "signals": [{"fileName": "s.txt", "values": [1.0, 2.0]}]
        }))
        .unwrap();
        assert!(discharge.id.is_empty());
        assert_eq!(discharge.length, 0);

        let discharge = discharge.normalised(4);
        assert_eq!(discharge.id, "discharge_4");
        assert_eq!(discharge.length, 2);
    }

    #[test]
    fn normalised_keeps_client_id() {
        let discharge = sample().normalised(9);
        assert_eq!(discharge.id, "d1");
    }
}
