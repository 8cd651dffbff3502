//! Sensor text-file ingestion.
//!
//! Each file is a plain-text dump of one sensor: `<time> <value>` per line,
//! whitespace separated. The first file's time column becomes the shared
//! axis of the discharge; later files are checked against it and axis drift
//! is surfaced early as warnings.

use crate::discharge::{Discharge, Signal};

/// An uploaded sensor file, decoded to UTF-8 text.
#[derive(Debug, Clone)]
pub struct SensorFile {
    pub name: String,
    pub content: String,
}

impl SensorFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// A malformed line in a sensor file. Lines are 1-based.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{file}:{line}: {reason}")]
pub struct ParseError {
    pub file: String,
    pub line: usize,
    pub reason: String,
}

/// Parse one discharge from a set of sensor files.
///
/// The returned discharge has no id and no anomaly time — the caller owns
/// those. Length mismatches and divergent time axes between files are
/// warned about but accepted; downstream nodes may still reject the data.
pub fn parse_discharge(files: &[SensorFile]) -> Result<Discharge, ParseError> {
    let mut times: Vec<f64> = Vec::new();
    let mut signals: Vec<Signal> = Vec::new();

    for (index, file) in files.iter().enumerate() {
        let (file_times, values) = parse_file(file)?;

        if index == 0 {
            times = file_times;
        } else {
            check_axis(&files[0].name, &times, &file.name, &file_times);
        }

        signals.push(Signal {
            file_name: file.name.clone(),
            values,
        });
    }

    Ok(Discharge {
        id: String::new(),
        length: times.len(),
        times,
        signals,
        anomaly_time: None,
    })
}

fn parse_file(file: &SensorFile) -> Result<(Vec<f64>, Vec<f64>), ParseError> {
    let mut times = Vec::new();
    let mut values = Vec::new();

    for (number, line) in file.content.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let (Some(time), Some(value), None) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed(file, number, "expected `<time> <value>`"));
        };

        times.push(parse_field(file, number, time)?);
        values.push(parse_field(file, number, value)?);
    }

    Ok((times, values))
}

fn parse_field(file: &SensorFile, number: usize, field: &str) -> Result<f64, ParseError> {
    field
        .parse::<f64>()
        .map_err(|_| malformed(file, number, &format!("`{field}` is not a number")))
}

fn malformed(file: &SensorFile, number: usize, reason: &str) -> ParseError {
    ParseError {
        file: file.name.clone(),
        line: number + 1,
        reason: reason.to_string(),
    }
}

/// Compare a file's time column against the discharge axis.
fn check_axis(axis_file: &str, axis: &[f64], file: &str, times: &[f64]) {
    if times.len() != axis.len() {
        tracing::warn!(
            axis_file = %axis_file,
            file = %file,
            axis_len = axis.len(),
            file_len = times.len(),
            "sensor file sample count differs from discharge axis"
        );
    }

    if let Some(index) = axis.iter().zip(times).position(|(a, b)| a != b) {
        tracing::warn!(
            axis_file = %axis_file,
            file = %file,
            index,
            "sensor file time axis diverges from discharge axis"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signals_against_first_file_axis() {
        let files = vec![
            SensorFile::new("probe_a.txt", "0.0 1.5\n0.1 2.5\n0.2 3.5"),
            SensorFile::new("probe_b.txt", "0.0 -1.0\n0.1 -2.0\n0.2 -3.0"),
        ];

        let discharge = parse_discharge(&files).unwrap();
        assert_eq!(discharge.times, vec![0.0, 0.1, 0.2]);
        assert_eq!(discharge.length, 3);
        assert_eq!(discharge.signals.len(), 2);
        assert_eq!(discharge.signals[0].file_name, "probe_a.txt");
        assert_eq!(discharge.signals[0].values, vec![1.5, 2.5, 3.5]);
        assert_eq!(discharge.signals[1].values, vec![-1.0, -2.0, -3.0]);
    }

    #[test]
    fn accepts_scientific_notation_and_tabs() {
        let files = vec![SensorFile::new("s.txt", "1e-3\t4.2e1\n2e-3\t-1.0e0")];
        let discharge = parse_discharge(&files).unwrap();
        assert_eq!(discharge.times, vec![0.001, 0.002]);
        assert_eq!(discharge.signals[0].values, vec![42.0, -1.0]);
    }

    #[test]
    fn rejects_non_numeric_field_with_location() {
        let files = vec![SensorFile::new("bad.txt", "0.0 1.0\n0.1 oops")];
        let err = parse_discharge(&files).unwrap_err();
        assert_eq!(err.file, "bad.txt");
        assert_eq!(err.line, 2);
        assert!(err.to_string().contains("oops"));
    }

    #[test]
    fn rejects_blank_line() {
        let files = vec![SensorFile::new("gap.txt", "0.0 1.0\n\n0.2 3.0")];
        let err = parse_discharge(&files).unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn rejects_extra_fields() {
        let files = vec![SensorFile::new("wide.txt", "0.0 1.0 2.0")];
        let err = parse_discharge(&files).unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn accepts_length_mismatch_between_files() {
        let files = vec![
            SensorFile::new("a.txt", "0.0 1.0\n0.1 2.0"),
            SensorFile::new("b.txt", "0.0 5.0"),
        ];
        // Warned, not rejected; the axis stays the first file's.
        let discharge = parse_discharge(&files).unwrap();
        assert_eq!(discharge.length, 2);
        assert_eq!(discharge.signals[1].values, vec![5.0]);
    }

    #[test]
    fn accepts_divergent_axis() {
        let files = vec![
            SensorFile::new("a.txt", "0.0 1.0\n0.1 2.0"),
            SensorFile::new("b.txt", "0.0 5.0\n0.15 6.0"),
        ];
        let discharge = parse_discharge(&files).unwrap();
        assert_eq!(discharge.times, vec![0.0, 0.1]);
    }

    #[test]
    fn empty_file_yields_empty_discharge() {
        let discharge = parse_discharge(&[SensorFile::new("empty.txt", "")]).unwrap();
        assert_eq!(discharge.length, 0);
        assert!(discharge.signals[0].values.is_empty());
    }
}
