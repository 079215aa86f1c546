//! PITest reports.
//!
//! PITest records the outcome of every mutant in `mutations.xml`, either
//! directly in the report directory or in a timestamped run directory below
//! it. With the `EXPORT` feature it also writes each mutant's class file to
//! `export/<package>/<Class>/mutants/<n>/`, next to a `details.txt` describing
//! the mutation. A surviving mutant is one the results mark undetected and the
//! export holds a class file for.

use super::{short_mutator_name, Mutant, MutantReport};
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const RESULTS_FILE: &str = "mutations.xml";
const EXPORT_DIR: &str = "export";
const DETAILS_FILE: &str = "details.txt";

/// Statuses of mutants no test detected.
const UNDETECTED: &[&str] = &["SURVIVED", "NO_COVERAGE"];

/// A PITest report directory, usually `target/pit-reports`.
#[derive(Debug, Clone)]
pub struct PitestReport {
    report_dir: PathBuf,
    source_dir: PathBuf,
}

/// One mutation as described by either the results or the export.
struct Record<'a> {
    class: &'a str,
    source_file: Option<&'a str>,
    line: u32,
    mutator: &'a str,
    description: &'a str,
    method: Option<&'a str>,
}

impl Record<'_> {
    fn into_mutant(self, source_dir: &Path, artifact: PathBuf) -> Mutant {
        Mutant {
            original_file: source_path(source_dir, self.class, self.source_file),
            compiled_artifact: artifact,
            mutated_class: self.class.to_string(),
            line_number: self.line,
            mutator_kind: short_mutator_name(self.mutator).to_string(),
            notes: self.description.to_string(),
            survived: true,
            method: self.method.map(str::to_string),
        }
    }
}

impl PitestReport {
    /// `source_dir` is the production source root mutated files are resolved against.
    pub fn new(report_dir: impl Into<PathBuf>, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            report_dir: report_dir.into(),
            source_dir: source_dir.into(),
        }
    }

    /// The results file of the newest run.
    fn results_file(&self) -> Result<PathBuf> {
        let direct = self.report_dir.join(RESULTS_FILE);
        if direct.is_file() {
            return Ok(direct);
        }

        let mut runs: Vec<PathBuf> = std::fs::read_dir(&self.report_dir)
            .with_context(|| format!("Failed to read PITest report directory: {:?}", self.report_dir))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name().is_some_and(|n| n != EXPORT_DIR) && p.join(RESULTS_FILE).is_file()
            })
            .collect();
        runs.sort();
        match runs.pop() {
            Some(run) => Ok(run.join(RESULTS_FILE)),
            None => bail!("No {} found under {:?}", RESULTS_FILE, self.report_dir),
        }
    }

    /// Mutants the results mark undetected. Their artifacts are not known here.
    fn undetected(&self, results: &Path) -> Result<HashSet<Mutant>> {
        let content = std::fs::read_to_string(results)
            .with_context(|| format!("Failed to read PITest results: {:?}", results))?;
        let doc = roxmltree::Document::parse(&content)
            .with_context(|| format!("Failed to parse PITest results: {:?}", results))?;

        let mut mutants = HashSet::new();
        for node in doc.descendants().filter(|n| n.has_tag_name("mutation")) {
            let status = node.attribute("status").unwrap_or_default();
            if !UNDETECTED.contains(&status) {
                continue;
            }
            let class = child_text(node, "mutatedClass");
            let line = child_text(node, "lineNumber").and_then(|l| l.parse::<u32>().ok());
            let mutator = child_text(node, "mutator");
            let (Some(class), Some(line), Some(mutator)) = (class, line, mutator) else {
                tracing::warn!("Skipping incomplete mutation entry in {:?}", results);
                continue;
            };
            let record = Record {
                class,
                source_file: child_text(node, "sourceFile"),
                line,
                mutator,
                description: child_text(node, "description").unwrap_or_default(),
                method: child_text(node, "mutatedMethod"),
            };
            mutants.insert(record.into_mutant(&self.source_dir, PathBuf::new()));
        }
        Ok(mutants)
    }

    /// Every exported mutant, in directory order.
    fn exported(&self) -> Result<Vec<Mutant>> {
        let export = self.report_dir.join(EXPORT_DIR);
        if !export.is_dir() {
            bail!(
                "No exported mutants in {:?}; run PITest with the EXPORT feature enabled",
                export
            );
        }

        let mut mutants = Vec::new();
        let walker = walkdir::WalkDir::new(&export).sort_by_file_name();
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if entry.file_name() != DETAILS_FILE {
                continue;
            }
            let Some(dir) = entry.path().parent() else {
                continue;
            };
            match self.exported_mutant(dir, entry.path()) {
                Ok(mutant) => mutants.push(mutant),
                Err(e) => tracing::warn!("Skipping exported mutant {:?}: {:#}", dir, e),
            }
        }
        Ok(mutants)
    }

    fn exported_mutant(&self, dir: &Path, details: &Path) -> Result<Mutant> {
        let content = std::fs::read_to_string(details)
            .with_context(|| format!("Failed to read {:?}", details))?;
        let first = content.lines().next().unwrap_or_default();

        let class = attribute(first, "clazz").context("details name no mutated class")?;
        let line = attribute(first, "lineNumber")
            .and_then(|l| l.parse::<u32>().ok())
            .context("details name no line number")?;
        let mutator = attribute(first, "mutator").context("details name no mutator")?;
        let artifact = walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .map(walkdir::DirEntry::into_path)
            .find(|p| p.extension().is_some_and(|ext| ext == "class"))
            .context("no class file next to the details")?;

        let record = Record {
            class,
            source_file: attribute(first, "filename"),
            line,
            mutator,
            description: attribute(first, "description").unwrap_or_default(),
            method: attribute(first, "method"),
        };
        Ok(record.into_mutant(&self.source_dir, artifact))
    }
}

impl MutantReport for PitestReport {
    fn survived_mutants(&self) -> Result<Vec<Mutant>> {
        let results = self.results_file()?;
        let undetected = self.undetected(&results)?;
        let exported = self.exported()?;
        let total = exported.len();

        let mut seen = HashSet::new();
        let mut mutants = Vec::new();
        for mutant in exported {
            if undetected.contains(&mutant) && seen.insert(mutant.clone()) {
                mutants.push(mutant);
            }
        }
        if mutants.len() < undetected.len() {
            tracing::warn!(
                "{} undetected mutants have no exported class file",
                undetected.len() - mutants.len()
            );
        }

        tracing::info!(
            "Loaded {} surviving mutants ({} exported) from {:?}",
            mutants.len(),
            total,
            results
        );
        Ok(mutants)
    }
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|c| c.has_tag_name(name))
        .and_then(|c| c.text())
        .map(str::trim)
}

/// Value of `key=` in a `details.txt` line, e.g. `lineNumber=23, `.
fn attribute<'a>(details: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!(r"\b{}=(.*?)\]*(?:, \w+=|$)", regex::escape(key));
    let re = Regex::new(&pattern).ok()?;
    re.captures(details)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|v| !v.is_empty())
}

/// Source file of `class`: the package directory plus the reported file
/// name, or the outer class name when the file name is unknown.
fn source_path(source_dir: &Path, class: &str, source_file: Option<&str>) -> PathBuf {
    let outer = class.split('$').next().unwrap_or(class);
    let (package, simple) = match outer.rsplit_once('.') {
        Some((package, simple)) => (Some(package), simple),
        None => (None, outer),
    };

    let mut path = source_dir.to_path_buf();
    if let Some(package) = package {
        path.extend(package.split('.'));
    }
    match source_file {
        Some(file) => path.join(file),
        None => path.join(format!("{simple}.java")),
    }
}
