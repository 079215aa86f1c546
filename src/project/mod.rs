//! Test file discovery.
//!
//! Walks the test source directory, keeps files matching the configured globs,
//! and scans each one for methods carrying a test annotation.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &["target", "build", "out", "node_modules"];

/// Annotations that exclude a method from tracing even when it is a test.
const DISABLED_ANNOTATIONS: &[&str] = &["Ignore", "Disabled"];

/// A test source file and the test methods declared in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFile {
    /// Absolute path to the source file.
    pub path: PathBuf,
    /// Fully qualified name of the test class (e.g. "bank.BankTest").
    pub class_name: String,
    /// Names of the enabled test methods, in declaration order.
    pub test_methods: Vec<String>,
}

/// Find all test files under `test_dir`.
///
/// `include` globs are matched against the path relative to `test_dir`, using
/// `/` separators. Files are returned sorted by path.
pub fn discover_test_files(
    test_dir: &Path,
    include: &[String],
    annotations: &[String],
) -> Result<Vec<TestFile>> {
    let test_dir = test_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve test directory: {:?}", test_dir))?;

    let mut files = Vec::new();
    let walker = walkdir::WalkDir::new(&test_dir)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && (name.starts_with('.') || SKIPPED_DIRS.contains(&&*name)))
        });

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = relative_path(&test_dir, entry.path());
        if !include.iter().any(|g| glob_match::glob_match(g, &relative)) {
            continue;
        }

        let content = match std::fs::read_to_string(entry.path()) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Skipping unreadable test file {:?}: {}", entry.path(), e);
                continue;
            }
        };
        let file = parse_test_file(entry.path(), &content, annotations);
        tracing::debug!(
            "Discovered {} with {} test methods",
            file.class_name,
            file.test_methods.len()
        );
        files.push(file);
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::info!("Discovered {} test files in {}", files.len(), test_dir.display());
    Ok(files)
}

/// Extract the class name and enabled test methods from a Java source file.
///
/// Only methods declared directly in the top-level type count; nested and
/// anonymous classes compile to classes of their own.
pub fn parse_test_file(path: &Path, content: &str, annotations: &[String]) -> TestFile {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut package = None;
    let mut test_methods = Vec::new();

    // (is a test, is disabled) for annotations awaiting their method
    let mut pending: Option<(bool, bool)> = None;
    let mut depth = 0usize;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") || line.starts_with('*') || line.starts_with("/*") {
            continue;
        }

        let in_type_body = depth == 1;
        depth = depth_after(line, depth);

        if package.is_none() {
            if let Some(rest) = line.strip_prefix("package ") {
                package = Some(rest.trim_end_matches(';').trim().to_string());
                continue;
            }
        }

        if !in_type_body {
            pending = None;
            continue;
        }

        let (names, rest) = split_annotations(line);
        if !names.is_empty() {
            let (is_test, disabled) = pending.unwrap_or((false, false));
            pending = Some((
                is_test || names.iter().any(|n| annotations.iter().any(|a| a == n)),
                disabled || names.iter().any(|n| DISABLED_ANNOTATIONS.contains(n)),
            ));
        }
        if rest.is_empty() {
            continue;
        }

        if let Some((is_test, disabled)) = pending.take() {
            if let Some(name) = method_name(rest) {
                if is_test && !disabled && !test_methods.iter().any(|m| m == name) {
                    test_methods.push(name.to_string());
                }
            }
        }
    }

    let class_name = match package {
        Some(pkg) if !pkg.is_empty() => format!("{pkg}.{stem}"),
        _ => stem,
    };

    TestFile {
        path: path.to_path_buf(),
        class_name,
        test_methods,
    }
}

/// Split leading annotations off a line, returning their simple names and the remainder.
fn split_annotations(line: &str) -> (Vec<&str>, &str) {
    let mut names = Vec::new();
    let mut rest = line;

    while let Some(after) = rest.strip_prefix('@') {
        let end = after
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(after.len());
        let name = &after[..end];
        names.push(name.rsplit('.').next().unwrap_or(name));
        rest = after[end..].trim_start();

        if rest.starts_with('(') {
            let mut depth = 0usize;
            let mut close = None;
            for (i, c) in rest.char_indices() {
                match c {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            close = Some(i);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            // Arguments spilling onto the next line leave nothing to parse here.
            rest = match close {
                Some(i) => rest[i + 1..].trim_start(),
                None => "",
            };
        }
    }

    (names, rest)
}

/// Brace nesting after `line`, skipping braces in literals and line comments.
fn depth_after(line: &str, mut depth: usize) -> usize {
    let mut chars = line.chars().peekable();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        match quote {
            Some(_) if c == '\\' => {
                chars.next();
            }
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '/' if chars.peek() == Some(&'/') => break,
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                _ => {}
            },
        }
    }
    depth
}

/// Name of the method declared on `decl`, e.g. `testDeposit` in `public void testDeposit() {`.
fn method_name(decl: &str) -> Option<&str> {
    let open = decl.find('(')?;
    let name = decl[..open].split_whitespace().last()?;
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    valid.then_some(name)
}

fn relative_path(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
