//! Trace model: observed values keyed by test file, source line and expression.

pub mod diff;

pub use diff::{lenient_diff, DiffResult, FieldFailure};

use anyhow::Context;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A primitive-or-null leaf value captured from the subject.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TraceValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Str(String),
    Null,
}

impl PartialEq for TraceValue {
    fn eq(&self, other: &Self) -> bool {
        use TraceValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            // Bitwise, so NaN matches itself and every trace equals itself.
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Char(a), Char(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Null, Null) => true,
            _ => false,
        }
    }
}

impl Eq for TraceValue {}

impl fmt::Display for TraceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceValue::Bool(v) => write!(f, "{v}"),
            TraceValue::Int(v) => write!(f, "{v}"),
            TraceValue::Float(v) => write!(f, "{v}"),
            TraceValue::Double(v) => write!(f, "{v}"),
            TraceValue::Char(v) => write!(f, "'{v}'"),
            TraceValue::Str(v) => write!(f, "{v:?}"),
            TraceValue::Null => write!(f, "null"),
        }
    }
}

/// Values observed at one program point, in capture order, with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointSnapshot {
    entries: Vec<(String, TraceValue)>,
}

impl PointSnapshot {
    /// Add a value; an existing key keeps its position and takes the new value.
    pub fn insert(&mut self, key: impl Into<String>, value: TraceValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&TraceValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TraceValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for PointSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Snapshots of one test file, keyed by source line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FileTrace {
    points: BTreeMap<u32, PointSnapshot>,
}

impl FileTrace {
    /// Store the snapshot for `line`. Empty snapshots are dropped and a later
    /// visit of the same line replaces the earlier one.
    pub fn record(&mut self, line: u32, snapshot: PointSnapshot) {
        if snapshot.is_empty() {
            return;
        }
        self.points.insert(line, snapshot);
    }

    pub fn get(&self, line: u32) -> Option<&PointSnapshot> {
        self.points.get(&line)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &PointSnapshot)> {
        self.points.iter().map(|(line, snap)| (*line, snap))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Complete trace of a test run, keyed by test file path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Trace {
    files: BTreeMap<PathBuf, FileTrace>,
}

impl Trace {
    pub fn insert(&mut self, file: PathBuf, trace: FileTrace) {
        self.files.insert(file, trace);
    }

    pub fn file(&self, path: &Path) -> Option<&FileTrace> {
        self.files.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &FileTrace)> {
        self.files.iter().map(|(path, trace)| (path.as_path(), trace))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total number of captured values across all files and lines.
    pub fn value_count(&self) -> usize {
        self.files
            .values()
            .flat_map(|f| f.points.values())
            .map(PointSnapshot::len)
            .sum()
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize trace")
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write trace: {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(entries: &[(&str, TraceValue)]) -> PointSnapshot {
        let mut snap = PointSnapshot::default();
        for (k, v) in entries {
            snap.insert(*k, v.clone());
        }
        snap
    }

    #[test]
    fn test_nan_equals_itself() {
        assert_eq!(TraceValue::Double(f64::NAN), TraceValue::Double(f64::NAN));
        assert_eq!(TraceValue::Float(f32::NAN), TraceValue::Float(f32::NAN));
        assert_ne!(TraceValue::Double(0.0), TraceValue::Double(-0.0));
    }

    #[test]
    fn test_values_of_different_kinds_differ() {
        assert_ne!(TraceValue::Int(1), TraceValue::Double(1.0));
        assert_ne!(TraceValue::Str("null".into()), TraceValue::Null);
    }

    #[test]
    fn test_snapshot_insert_keeps_keys_unique() {
        let mut snap = snapshot(&[("a", TraceValue::Int(1)), ("b", TraceValue::Int(2))]);
        snap.insert("a", TraceValue::Int(3));

        assert_eq!(snap.len(), 2);
        let keys: Vec<_> = snap.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(snap.get("a"), Some(&TraceValue::Int(3)));
    }

    #[test]
    fn test_file_trace_drops_empty_and_keeps_last_visit() {
        let mut trace = FileTrace::default();
        trace.record(10, PointSnapshot::default());
        assert!(trace.is_empty());

        trace.record(10, snapshot(&[("i", TraceValue::Int(0))]));
        trace.record(10, snapshot(&[("i", TraceValue::Int(4))]));
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.get(10).unwrap().get("i"), Some(&TraceValue::Int(4)));
    }

    #[test]
    fn test_json_shape() {
        let mut file = FileTrace::default();
        file.record(
            17,
            snapshot(&[
                ("bool", TraceValue::Bool(true)),
                ("c", TraceValue::Char('b')),
                ("name", TraceValue::Str("Jan".into())),
                ("nullObject", TraceValue::Null),
            ]),
        );
        let mut trace = Trace::default();
        trace.insert(PathBuf::from("BankTest.java"), file);

        let json: serde_json::Value = serde_json::from_str(&trace.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "BankTest.java": {
                    "17": { "bool": true, "c": "b", "name": "Jan", "nullObject": null }
                }
            })
        );
    }

    #[test]
    fn test_save_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace.json");
        let mut trace = Trace::default();
        let mut file = FileTrace::default();
        file.record(3, snapshot(&[("x", TraceValue::Int(5))]));
        trace.insert(PathBuf::from("A.java"), file);

        trace.save(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"x\": 5"));
        assert_eq!(trace.value_count(), 1);
    }
}
