//! Lenient comparison of a mutant trace against the baseline.
//!
//! Every value in the baseline must be present and equal in the mutant trace.
//! Values that only the mutant trace has are ignored.

use super::{Trace, TraceValue};
use std::fmt;
use std::path::{Path, PathBuf};

/// One baseline value the mutant run did not reproduce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    pub file: PathBuf,
    pub line: u32,
    pub expression: String,
    pub expected: TraceValue,
    /// `None` when the mutant run never produced the value.
    pub actual: Option<TraceValue>,
}

impl FieldFailure {
    /// `<file>::<line>::<expression>`
    pub fn field(&self) -> String {
        format!("{}::{}::{}", self.file.display(), self.line, self.expression)
    }
}

impl fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(
                f,
                "{}: expected {} but was {}",
                self.field(),
                self.expected,
                actual
            ),
            None => write!(f, "{}: expected {} but was absent", self.field(), self.expected),
        }
    }
}

/// Ordered failures of one comparison: file, then line, then capture order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    failures: Vec<FieldFailure>,
}

impl DiffResult {
    pub fn failures(&self) -> &[FieldFailure] {
        &self.failures
    }

    pub fn first(&self) -> Option<&FieldFailure> {
        self.failures.first()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Drop failures in `files`, e.g. files the mutant run could not trace.
    pub fn excluding_files(mut self, files: &[PathBuf]) -> Self {
        if !files.is_empty() {
            self.failures.retain(|f| !files.contains(&f.file));
        }
        self
    }
}

pub fn lenient_diff(expected: &Trace, actual: &Trace) -> DiffResult {
    let mut failures = Vec::new();

    for (file, expected_file) in expected.iter() {
        let actual_file = actual.file(file);
        for (line, expected_point) in expected_file.iter() {
            let actual_point = actual_file.and_then(|f| f.get(line));
            for (expression, value) in expected_point.iter() {
                let found = actual_point.and_then(|p| p.get(expression));
                if found != Some(value) {
                    failures.push(failure(file, line, expression, value, found));
                }
            }
        }
    }

    DiffResult { failures }
}

fn failure(
    file: &Path,
    line: u32,
    expression: &str,
    expected: &TraceValue,
    actual: Option<&TraceValue>,
) -> FieldFailure {
    FieldFailure {
        file: file.to_path_buf(),
        line,
        expression: expression.to_string(),
        expected: expected.clone(),
        actual: actual.cloned(),
    }
}
