//! Trace engine.
//!
//! Produces the baseline trace of the test suite, then re-traces it once per
//! surviving mutant with the mutant's class file swapped in, and diffs each
//! mutant trace against the baseline.

pub mod swap;

pub use swap::{ArtifactSwap, SwapError};

use crate::debugger::{Launcher, ProgramPoint, Session, SessionError};
use crate::mutation::Mutant;
use crate::observer::{InspectorSet, StateObserver};
use crate::project::TestFile;
use crate::trace::{lenient_diff, DiffResult, FileTrace, Trace};
use std::path::PathBuf;

pub struct TraceEngine<L: Launcher> {
    launcher: L,
    class_files: PathBuf,
    max_depth: usize,
}

impl<L: Launcher> TraceEngine<L> {
    pub fn new(launcher: L, class_files: impl Into<PathBuf>, max_depth: usize) -> Self {
        Self {
            launcher,
            class_files: class_files.into(),
            max_depth,
        }
    }

    /// Trace every test file, one subject process at a time.
    ///
    /// A file whose session fails is logged and left out of the trace.
    pub fn trace_all(&self, tests: &[TestFile], inspectors: &InspectorSet) -> Trace {
        self.trace_suite(tests, inspectors).0
    }

    /// Trace every test file, also returning the files whose session failed.
    fn trace_suite(&self, tests: &[TestFile], inspectors: &InspectorSet) -> (Trace, Vec<PathBuf>) {
        let mut trace = Trace::default();
        let mut failed = Vec::new();
        for test in tests {
            match self.trace_file(test, inspectors) {
                Ok(fragment) => {
                    tracing::debug!(
                        "Traced {} ({} lines)",
                        test.class_name,
                        fragment.len()
                    );
                    trace.insert(test.path.clone(), fragment);
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", test.path.display(), e);
                    failed.push(test.path.clone());
                }
            }
        }
        (trace, failed)
    }

    /// Trace one test file. Files without test methods are not launched.
    pub fn trace_file(
        &self,
        test: &TestFile,
        inspectors: &InspectorSet,
    ) -> Result<FileTrace, SessionError> {
        let mut fragment = FileTrace::default();
        if test.test_methods.is_empty() {
            return Ok(fragment);
        }

        let mut session = self.launcher.open(&test.class_name)?;
        for method in &test.test_methods {
            session.arm_breakpoint(method);
        }

        let observer = StateObserver::new(inspectors, self.max_depth);
        let result = session.run(&mut |subject, point: &ProgramPoint| {
            let snapshot = observer.observe(subject, point)?;
            fragment.record(point.line, snapshot);
            Ok(())
        });
        session.close();

        result.map(|()| fragment)
    }

    /// Trace the suite once per surviving mutant and keep the mutants whose
    /// trace differs from `baseline`.
    ///
    /// Mutants are processed grouped by class so each original class file is
    /// backed up once. Test files whose session fails under a mutant are left
    /// out of that mutant's comparison. Any swap failure aborts the run; the
    /// original class files are restored before returning.
    pub fn trace_and_compare_mutants(
        &self,
        mutants: &[Mutant],
        baseline: &Trace,
        tests: &[TestFile],
        inspectors: &InspectorSet,
    ) -> Result<Vec<(DiffResult, Mutant)>, SwapError> {
        let mut ordered: Vec<&Mutant> = mutants.iter().filter(|m| m.survived).collect();
        ordered.sort_by(|a, b| a.mutated_class.cmp(&b.mutated_class));
        if ordered.len() < mutants.len() {
            tracing::debug!("Skipping {} killed mutants", mutants.len() - ordered.len());
        }

        let mut swap = ArtifactSwap::new(&self.class_files);
        let mut detected = Vec::new();
        let total = ordered.len();

        for (i, mutant) in ordered.into_iter().enumerate() {
            tracing::info!("[{}/{}] Tracing mutant {}", i + 1, total, mutant);
            swap.swap_in(&mutant.mutated_class, &mutant.compiled_artifact)?;

            let (trace, failed) = self.trace_suite(tests, inspectors);
            if !failed.is_empty() {
                tracing::warn!(
                    "{} test files could not be traced under {}; their values are not compared",
                    failed.len(),
                    mutant
                );
            }
            let diff = lenient_diff(baseline, &trace).excluding_files(&failed);
            if diff.is_empty() {
                tracing::info!("No observable difference for {}", mutant);
            } else {
                tracing::info!("{} values differ for {}", diff.len(), mutant);
                detected.push((diff, mutant.clone()));
            }
        }

        swap.restore()?;
        Ok(detected)
    }
}
