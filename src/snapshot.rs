//! Read-only report of every parameter of an instrument.
//!
//! A [`Snapshot`] has one row per declared parameter, instrument-level rows
//! first and then each channel in order. Row paths are the parameter name
//! (`frequency`) or `channel.parameter` (`channel3.voltage`).
//!
//! A parameter that could not be read does not abort the snapshot; its row is
//! [`SnapshotValue::Failed`] and carries the reason. A set-only parameter that
//! was never written is [`SnapshotValue::Unset`] and prints as `unset`.

use crate::parameter::Value;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// State of one snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "value")]
pub enum SnapshotValue {
    /// Value read from the device, or the cached value of a set-only
    /// parameter.
    Value(Value),
    /// Never read nor written.
    Unset,
    /// Reading failed; the error message.
    Failed(String),
}

impl SnapshotValue {
    /// The value, if there is one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            SnapshotValue::Value(v) => Some(v),
            _ => None,
        }
    }

    /// True for [`SnapshotValue::Unset`].
    pub fn is_unset(&self) -> bool {
        matches!(self, SnapshotValue::Unset)
    }

    /// True for [`SnapshotValue::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, SnapshotValue::Failed(_))
    }
}

impl fmt::Display for SnapshotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotValue::Value(v) => write!(f, "{v}"),
            SnapshotValue::Unset => write!(f, "unset"),
            SnapshotValue::Failed(reason) => write!(f, "<failed: {reason}>"),
        }
    }
}

/// One parameter in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRow {
    /// Parameter name, `channel.parameter` for channel parameters.
    pub path: String,
    /// What was read.
    pub value: SnapshotValue,
    /// Physical unit, empty when there is none.
    pub unit: String,
}

impl SnapshotRow {
    /// Build a row.
    pub fn new(path: impl Into<String>, value: SnapshotValue, unit: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value,
            unit: unit.into(),
        }
    }
}

/// All parameters of one instrument at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Instrument name.
    pub instrument: String,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Rows in declaration order.
    pub rows: Vec<SnapshotRow>,
}

impl Snapshot {
    /// Empty snapshot stamped with the current time.
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            taken_at: Utc::now(),
            rows: Vec::new(),
        }
    }

    /// Append a row.
    pub fn push(&mut self, row: SnapshotRow) {
        self.rows.push(row);
    }

    /// Row with the given path.
    pub fn row(&self, path: &str) -> Option<&SnapshotRow> {
        self.rows.iter().find(|r| r.path == path)
    }

    /// Value of the row with the given path.
    pub fn value(&self, path: &str) -> Option<&SnapshotValue> {
        self.row(path).map(|r| &r.value)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows that could not be read.
    pub fn failures(&self) -> impl Iterator<Item = &SnapshotRow> {
        self.rows.iter().filter(|r| r.value.is_failed())
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .rows
            .iter()
            .map(|r| r.path.len())
            .max()
            .unwrap_or(0)
            .max("parameter".len());

        writeln!(f, "{}:", self.instrument)?;
        writeln!(f, "{:<width$} : value", "parameter")?;
        writeln!(f, "{}", "-".repeat(width + 40))?;
        for row in &self.rows {
            write!(f, "{:<width$} : {}", row.path, row.value)?;
            if matches!(row.value, SnapshotValue::Value(_)) && !row.unit.is_empty() {
                write!(f, " ({})", row.unit)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new("dac");
        snapshot.push(SnapshotRow::new(
            "channel1.voltage",
            SnapshotValue::Value(Value::Float(8.843349)),
            "V",
        ));
        snapshot.push(SnapshotRow::new("channel1.offset", SnapshotValue::Unset, ""));
        snapshot.push(SnapshotRow::new(
            "channel2.voltage",
            SnapshotValue::Failed("timed out".into()),
            "V",
        ));
        snapshot
    }

    #[test]
    fn test_table_rendering() {
        let text = sample().to_string();
        assert!(text.starts_with("dac:\n"));
        assert!(text.contains("channel1.voltage : 8.843349 (V)"));
        assert!(text.contains("channel1.offset  : unset\n"));
        assert!(text.contains("channel2.voltage : <failed: timed out>\n"));
    }

    #[test]
    fn test_lookup_and_failures() {
        let snapshot = sample();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.value("channel1.offset").unwrap().is_unset());
        assert_eq!(snapshot.failures().count(), 1);
        assert!(snapshot.row("channel9.voltage").is_none());
    }

    #[test]
    fn test_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        let rows = json["rows"].as_array().unwrap();
        assert_eq!(rows[0]["value"]["status"], "value");
        assert_eq!(rows[0]["value"]["value"], 8.843349);
        assert_eq!(rows[1]["value"]["status"], "unset");
        assert_eq!(rows[2]["value"]["value"], "timed out");
    }
}
