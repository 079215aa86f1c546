use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

/// Fully qualified names (`package.Class.method`) of methods known to be free
/// of side effects, and therefore safe to invoke while observing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectorSet {
    methods: HashSet<String>,
}

impl InspectorSet {
    /// Load from a text file with one name per line. Blank lines and `#` comments are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read inspector list: {:?}", path))?;
        let set = Self::parse(&content);
        tracing::info!("Loaded {} inspector methods from {:?}", set.len(), path);
        Ok(set)
    }

    pub fn parse(content: &str) -> Self {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect()
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.methods.contains(qualified_name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for InspectorSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            methods: iter.into_iter().map(Into::into).collect(),
        }
    }
}
