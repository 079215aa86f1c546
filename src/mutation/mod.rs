//! Surviving mutants and how they are loaded.
//!
//! This module provides:
//! - The `Mutant` record consumed by the trace engine and the assertion patcher
//! - Loading mutant reports through the `MutantReport` trait, from JSON
//!   records or a PITest report directory

pub mod pitest;
pub mod report;

pub use pitest::PitestReport;
pub use report::{JsonMutantReport, MutantReport};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// A mutation of one production class that no existing test detected.
///
/// Two mutants are the same when they share source file, line and mutator
/// kind; the artifact, class name and notes do not take part in identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutant {
    /// Source file of the mutated production class
    pub original_file: PathBuf,
    /// Compiled `.class` file containing the mutation
    pub compiled_artifact: PathBuf,
    /// Fully qualified name of the mutated class (e.g. "bank.Bank")
    pub mutated_class: String,
    /// 1-based line of the mutation in `original_file`
    pub line_number: u32,
    /// Mutator that produced the change (e.g. "ConditionalsBoundaryMutator")
    pub mutator_kind: String,
    /// Human-readable description of the change
    #[serde(default)]
    pub notes: String,
    /// Whether the mutant survived the existing test suite
    #[serde(default = "default_survived")]
    pub survived: bool,
    /// Mutated method, when the report names it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

fn default_survived() -> bool {
    true
}

impl PartialEq for Mutant {
    fn eq(&self, other: &Self) -> bool {
        self.original_file == other.original_file
            && self.line_number == other.line_number
            && self.mutator_kind == other.mutator_kind
    }
}

impl Eq for Mutant {}

impl Hash for Mutant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.original_file.hash(state);
        self.line_number.hash(state);
        self.mutator_kind.hash(state);
    }
}

impl std::fmt::Display for Mutant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.mutator_kind,
            self.original_file.display(),
            self.line_number
        )?;
        if !self.notes.is_empty() {
            write!(f, " ({})", self.notes)?;
        }
        Ok(())
    }
}

impl Mutant {
    /// Source lines within `radius` of the mutated line, as (1-based line, text).
    pub fn source_context(&self, radius: u32) -> Result<Vec<(u32, String)>> {
        let content = std::fs::read_to_string(&self.original_file)
            .with_context(|| format!("Failed to read mutated source: {:?}", self.original_file))?;
        let first = self.line_number.saturating_sub(radius).max(1);
        let last = self.line_number.saturating_add(radius);

        Ok(content
            .lines()
            .zip(1u32..)
            .filter(|(_, n)| (first..=last).contains(n))
            .map(|(text, n)| (n, text.to_string()))
            .collect())
    }
}

/// Strip a mutator's package, as mutation tools often report fully qualified names.
pub fn short_mutator_name(kind: &str) -> &str {
    kind.rsplit('.').next().unwrap_or(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn mutant(file: &str, line: u32, kind: &str) -> Mutant {
        Mutant {
            original_file: PathBuf::from(file),
            compiled_artifact: PathBuf::from("mutants/0/bank/Bank.class"),
            mutated_class: "bank.Bank".to_string(),
            line_number: line,
            mutator_kind: kind.to_string(),
            notes: String::new(),
            survived: true,
            method: None,
        }
    }

    #[test]
    fn test_identity_ignores_artifact_and_notes() {
        let a = mutant("Bank.java", 12, "MathMutator");
        let mut b = mutant("Bank.java", 12, "MathMutator");
        b.compiled_artifact = PathBuf::from("elsewhere/Bank.class");
        b.notes = "replaced + with -".to_string();
        b.method = Some("deposit".to_string());

        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_identity_uses_line_and_kind() {
        let base = mutant("Bank.java", 12, "MathMutator");
        assert_ne!(base, mutant("Bank.java", 13, "MathMutator"));
        assert_ne!(base, mutant("Bank.java", 12, "NegateConditionalsMutator"));
        assert_ne!(base, mutant("Account.java", 12, "MathMutator"));
    }

    #[test]
    fn test_display() {
        let mut m = mutant("Bank.java", 12, "MathMutator");
        assert_eq!(m.to_string(), "MathMutator at Bank.java:12");
        m.notes = "replaced + with -".to_string();
        assert_eq!(m.to_string(), "MathMutator at Bank.java:12 (replaced + with -)");
    }

    #[test]
    fn test_source_context_window() {
        let mut file = NamedTempFile::new().unwrap();
        for i in 1..=10 {
            writeln!(file, "line {i}").unwrap();
        }
        let mut m = mutant("", 2, "MathMutator");
        m.original_file = file.path().to_path_buf();

        let context = m.source_context(3).unwrap();
        let numbers: Vec<_> = context.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(context[1].1, "line 2");
    }

    #[test]
    fn test_short_mutator_name() {
        assert_eq!(
            short_mutator_name("org.pitest.mutationtest.engine.gregor.mutators.MathMutator"),
            "MathMutator"
        );
        assert_eq!(short_mutator_name("MathMutator"), "MathMutator");
    }
}
