use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Lines inserted into each file during one patching run, in original coordinates.
///
/// Traces refer to line numbers of the unmodified files. Every insertion
/// shifts the lines below it, so a traced line is mapped to the edited file by
/// adding the number of earlier insertions above it.
#[derive(Debug, Clone, Default)]
pub struct InsertionLedger {
    inserted: HashMap<PathBuf, Vec<u32>>,
}

impl InsertionLedger {
    /// 1-based line in the edited file at which a new line for original line
    /// `line` must be inserted.
    pub fn adjusted_line(&self, file: &Path, line: u32) -> u32 {
        let shift = self
            .inserted
            .get(file)
            .map(|lines| lines.iter().filter(|l| **l < line).count())
            .unwrap_or(0);
        line + shift as u32
    }

    /// Record an insertion that shifts every original line after `line`.
    ///
    /// An assertion placed in front of traced line `L` is recorded as `L`, so
    /// further assertions for `L` land in front of it. A line placed below
    /// original line `n` is recorded as `n`; one placed at the very top as 0.
    pub fn record(&mut self, file: &Path, line: u32) {
        self.inserted.entry(file.to_path_buf()).or_default().push(line);
    }

    /// Undo the last `count` records for `file`.
    pub fn rollback(&mut self, file: &Path, count: usize) {
        if let Some(lines) = self.inserted.get_mut(file) {
            let keep = lines.len().saturating_sub(count);
            lines.truncate(keep);
        }
    }

    pub fn count(&self, file: &Path) -> usize {
        self.inserted.get(file).map_or(0, Vec::len)
    }
}
