//! Assertion generation: turns failed trace comparisons into test source edits.
//!
//! For every surviving mutant whose trace diverged from the baseline, one
//! `assertEquals(expected, expression)` statement is inserted in front of the
//! traced line of the test file, so the test fails on that mutant. Line
//! numbers from the trace refer to the unmodified files; the
//! [`InsertionLedger`] maps them onto the file as edited so far.

pub mod interactor;
pub mod ledger;
pub mod literal;

pub use interactor::{AcceptAll, Confirm, Suggestion, TerminalPrompt};
pub use ledger::InsertionLedger;
pub use literal::java_literal;

use crate::mutation::Mutant;
use crate::trace::{DiffResult, FieldFailure};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("failed to read test file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line} is outside {path:?} ({len} lines)")]
    LineOutOfRange { path: PathBuf, line: u32, len: usize },

    #[error("failed to write test file {path:?}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("confirmation prompt failed: {0}")]
    Prompt(#[source] io::Error),
}

/// How generated assertions are spelled.
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionStyle {
    /// Assertion function called by the generated statement.
    pub function: String,
    /// Statically imported member providing `function`.
    pub import: String,
    /// One level of indentation.
    pub indent: String,
    /// Tolerance appended to floating point assertions.
    pub float_delta: Option<f64>,
}

impl Default for AssertionStyle {
    fn default() -> Self {
        Self {
            function: "assertEquals".to_string(),
            import: "org.junit.Assert.assertEquals".to_string(),
            indent: "    ".to_string(),
            float_delta: None,
        }
    }
}

impl AssertionStyle {
    /// `assertEquals(<expected>, <expression>);` without indentation.
    pub fn statement(&self, failure: &FieldFailure) -> String {
        let expected = java_literal(&failure.expected);
        match self.float_delta {
            Some(delta) if literal::is_floating(&failure.expected) => format!(
                "{}({}, {}, {:?});",
                self.function, expected, failure.expression, delta
            ),
            _ => format!("{}({}, {});", self.function, expected, failure.expression),
        }
    }

    fn import_line(&self) -> String {
        format!("import static {};", self.import)
    }

    /// Whether an import line already brings the assertion function into scope.
    fn is_satisfied_by(&self, import: &str) -> bool {
        let normalized: Vec<&str> = import
            .trim_end_matches(';')
            .split_whitespace()
            .collect();
        let ["import", "static", name] = normalized.as_slice() else {
            return false;
        };
        if *name == self.import {
            return true;
        }
        match (self.import.rsplit_once('.'), name.strip_suffix(".*")) {
            (Some((class, _)), Some(wildcard)) => wildcard == class,
            _ => false,
        }
    }
}

/// Counts of what one `apply` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchSummary {
    pub inserted: usize,
    /// Skipped because an identical assertion was already in place.
    pub duplicates: usize,
    pub declined: usize,
    pub failed: usize,
}

impl fmt::Display for PatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} already covered, {} declined, {} failed",
            self.inserted, self.duplicates, self.declined, self.failed
        )
    }
}

enum Outcome {
    Inserted,
    Duplicate,
    Declined,
}

/// Edited content of one test file.
struct SourceFile {
    lines: Vec<String>,
    crlf: bool,
    trailing_newline: bool,
}

impl SourceFile {
    fn read(path: &Path) -> Result<Self, PatchError> {
        let content = fs::read_to_string(path).map_err(|source| PatchError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            lines: content.lines().map(str::to_string).collect(),
            crlf: content.contains("\r\n"),
            trailing_newline: content.ends_with('\n'),
        })
    }

    fn render(&self) -> String {
        let eol = if self.crlf { "\r\n" } else { "\n" };
        let mut content = self.lines.join(eol);
        if self.trailing_newline {
            content.push_str(eol);
        }
        content
    }

    /// Replace `path` through a sibling temporary file.
    fn write(&self, path: &Path) -> io::Result<()> {
        let mut temp = path.as_os_str().to_owned();
        temp.push(".mutoracle.tmp");
        let temp = PathBuf::from(temp);
        fs::write(&temp, self.render())?;
        fs::rename(&temp, path)
    }
}

/// Inserts assertions into test files, optionally asking first.
pub struct AssertionPatcher<C> {
    style: AssertionStyle,
    confirm: C,
}

impl<C: Confirm> AssertionPatcher<C> {
    pub fn new(style: AssertionStyle, confirm: C) -> Self {
        Self { style, confirm }
    }

    /// Insert one assertion per diverging mutant.
    ///
    /// Only the first failure of each diff is used. A failed pair is logged and
    /// counted; the remaining pairs are still processed.
    pub fn apply(&mut self, pairs: &[(DiffResult, Mutant)], interactive: bool) -> PatchSummary {
        let mut ledger = InsertionLedger::default();
        self.apply_with(&mut ledger, pairs, interactive)
    }

    fn apply_with(
        &mut self,
        ledger: &mut InsertionLedger,
        pairs: &[(DiffResult, Mutant)],
        interactive: bool,
    ) -> PatchSummary {
        let mut summary = PatchSummary::default();
        let total = pairs.iter().filter(|(diff, _)| !diff.is_empty()).count();
        let mut current = 0;

        for (diff, mutant) in pairs {
            let Some(failure) = diff.first() else {
                continue;
            };
            current += 1;

            let asked = interactive.then_some((current, total));
            match self.patch(ledger, failure, mutant, asked) {
                Ok(Outcome::Inserted) => summary.inserted += 1,
                Ok(Outcome::Duplicate) => {
                    tracing::debug!("{} is already covered by {}", mutant, failure.field());
                    summary.duplicates += 1;
                }
                Ok(Outcome::Declined) => summary.declined += 1,
                Err(e) => {
                    tracing::warn!("Could not add assertion for {}: {}", mutant, e);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!("Assertions: {}", summary);
        summary
    }

    fn patch(
        &mut self,
        ledger: &mut InsertionLedger,
        failure: &FieldFailure,
        mutant: &Mutant,
        asked: Option<(usize, usize)>,
    ) -> Result<Outcome, PatchError> {
        let path = failure.file.as_path();
        let mut source = SourceFile::read(path)?;

        let adjusted = ledger.adjusted_line(path, failure.line);
        let index = (adjusted as usize).checked_sub(1);
        let Some(index) = index.filter(|i| *i < source.lines.len()) else {
            return Err(PatchError::LineOutOfRange {
                path: path.to_path_buf(),
                line: adjusted,
                len: source.lines.len(),
            });
        };

        let statement = self.style.statement(failure);
        if source.lines[index].trim() == statement {
            return Ok(Outcome::Duplicate);
        }

        let line = format!("{}{}", self.indentation(&source.lines[index]), statement);
        source.lines.insert(index, line);

        if let Some((current, total)) = asked {
            let suggestion = Suggestion {
                file: path,
                lines: &source.lines,
                index,
                mutant,
                current,
                total,
            };
            if !self.confirm.confirm(&suggestion).map_err(PatchError::Prompt)? {
                return Ok(Outcome::Declined);
            }
        }

        ledger.record(path, failure.line);
        let mut recorded = 1;
        if let Some(after) = self.ensure_import(&mut source.lines) {
            ledger.record(path, after);
            recorded += 1;
        }

        if let Err(source_err) = source.write(path) {
            ledger.rollback(path, recorded);
            return Err(PatchError::FileWriteFailed {
                path: path.to_path_buf(),
                source: source_err,
            });
        }

        tracing::info!("Added assertion at {}:{} for {}", path.display(), index + 1, mutant);
        Ok(Outcome::Inserted)
    }

    /// Whitespace prefix of `anchor`, one level deeper when it closes a block.
    fn indentation(&self, anchor: &str) -> String {
        let prefix: String = anchor.chars().take_while(|c| c.is_whitespace()).collect();
        if anchor.trim() == "}" {
            format!("{}{}", prefix, self.style.indent)
        } else {
            prefix
        }
    }

    /// Add the assertion import when missing.
    ///
    /// Returns the original line the import was placed below (0 for the top of
    /// the file). Insertions so far all sit below the import section, so its
    /// line numbers are still the original ones.
    fn ensure_import(&self, lines: &mut Vec<String>) -> Option<u32> {
        let mut package = None;
        let mut last_import = None;

        for (i, raw) in lines.iter().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("//") || line.starts_with("/*") || line.starts_with('*') {
                continue;
            }
            if line.starts_with("package ") {
                package = Some(i);
            } else if line.starts_with("import ") {
                if self.style.is_satisfied_by(line) {
                    return None;
                }
                last_import = Some(i);
            } else {
                break;
            }
        }

        let at = last_import.or(package).map_or(0, |i| i + 1);
        lines.insert(at, self.style.import_line());
        Some(at as u32)
    }
}
