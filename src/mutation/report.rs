//! Mutant report loading.

use super::{short_mutator_name, Mutant};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A source of mutants produced by a mutation testing tool.
pub trait MutantReport {
    /// Mutants that survived the existing tests, deduplicated, in report order.
    fn survived_mutants(&self) -> Result<Vec<Mutant>>;
}

/// A JSON array of mutant records.
///
/// Relative paths in the records are resolved against `base_dir`.
#[derive(Debug, Clone)]
pub struct JsonMutantReport {
    path: PathBuf,
    base_dir: PathBuf,
}

impl JsonMutantReport {
    pub fn new(path: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl MutantReport for JsonMutantReport {
    fn survived_mutants(&self) -> Result<Vec<Mutant>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read mutant report: {:?}", self.path))?;
        let records: Vec<Mutant> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse mutant report: {:?}", self.path))?;
        let total = records.len();

        let mut seen = HashSet::new();
        let mut mutants = Vec::new();
        for mut mutant in records {
            if !mutant.survived {
                continue;
            }
            mutant.mutator_kind = short_mutator_name(&mutant.mutator_kind).to_string();
            mutant.original_file = self.resolve(&mutant.original_file);
            mutant.compiled_artifact = self.resolve(&mutant.compiled_artifact);
            if seen.insert(mutant.clone()) {
                mutants.push(mutant);
            } else {
                tracing::debug!("Skipping duplicate mutant {}", mutant);
            }
        }

        tracing::info!(
            "Loaded {} surviving mutants ({} records) from {:?}",
            mutants.len(),
            total,
            self.path
        );
        Ok(mutants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REPORT: &str = r#"[
        {
            "original_file": "src/bank/Bank.java",
            "compiled_artifact": "mutants/0/bank/Bank.class",
            "mutated_class": "bank.Bank",
            "line_number": 12,
            "mutator_kind": "org.pitest.mutationtest.engine.gregor.mutators.MathMutator",
            "notes": "Replaced integer addition with subtraction"
        },
        {
            "original_file": "src/bank/Bank.java",
            "compiled_artifact": "mutants/1/bank/Bank.class",
            "mutated_class": "bank.Bank",
            "line_number": 12,
            "mutator_kind": "MathMutator"
        },
        {
            "original_file": "src/bank/Customer.java",
            "compiled_artifact": "/abs/Customer.class",
            "mutated_class": "bank.Customer",
            "line_number": 3,
            "mutator_kind": "ReturnValsMutator",
            "survived": false
        }
    ]"#;

    #[test]
    fn test_loads_survivors_and_dedupes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mutants.json");
        std::fs::write(&path, REPORT).unwrap();

        let report = JsonMutantReport::new(&path, dir.path());
        let mutants = report.survived_mutants().unwrap();

        assert_eq!(mutants.len(), 1);
        let m = &mutants[0];
        assert_eq!(m.mutator_kind, "MathMutator");
        assert_eq!(m.original_file, dir.path().join("src/bank/Bank.java"));
        assert_eq!(
            m.compiled_artifact,
            dir.path().join("mutants/0/bank/Bank.class")
        );
        assert!(m.survived);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mutants.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonMutantReport::new(&path, dir.path())
            .survived_mutants()
            .unwrap_err();
        assert!(err.to_string().contains("Failed to parse mutant report"));
    }
}
