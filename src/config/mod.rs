use crate::debugger::LaunchSettings;
use crate::generator::AssertionStyle;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Layout of the project under test
    #[serde(default)]
    pub project: ProjectConfig,

    /// Subject JVM supervision
    #[serde(default)]
    pub debugger: DebuggerConfig,

    /// State capture settings
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Generated assertion settings
    #[serde(default)]
    pub patcher: PatcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Paths are relative to `project_dir` unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Root of the project; relative to the config file when not absolute
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,

    /// Root of the test sources
    #[serde(default = "default_test_dir")]
    pub test_dir: PathBuf,

    /// Root of the production sources, used to locate mutated files
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Compiled production classes, where mutants are swapped in
    #[serde(default = "default_class_files")]
    pub class_files: PathBuf,

    /// Class path entries of the subject JVM
    #[serde(default = "default_class_path")]
    pub class_path: Vec<PathBuf>,

    /// Main class that runs one test class
    #[serde(default = "default_test_runner")]
    pub test_runner: String,

    /// JDK used to run the subject; `java` from PATH when unset
    #[serde(default)]
    pub java_home: Option<PathBuf>,

    /// Extra JVM options for the subject
    #[serde(default)]
    pub jvm_options: Vec<String>,

    /// Command run once before tracing to compile the project
    #[serde(default)]
    pub build_command: Option<String>,

    /// Build command timeout
    #[serde(default = "default_build_timeout")]
    pub build_timeout_seconds: u64,

    /// Globs selecting test files, relative to `test_dir`
    #[serde(default = "default_test_file_globs")]
    pub test_file_globs: Vec<String>,

    /// Annotations marking methods to trace
    #[serde(default = "default_test_annotations")]
    pub test_annotations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebuggerConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// A subject silent for this long is considered hung
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_seconds: u64,

    /// Forward the subject's output to the terminal
    #[serde(default)]
    pub show_output: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// Deepest object nesting expanded below a variable
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatcherConfig {
    #[serde(default = "default_assertion_function")]
    pub assertion_function: String,

    /// Static import providing the assertion function
    #[serde(default = "default_assertion_import")]
    pub assertion_import: String,

    #[serde(default = "default_indent")]
    pub indent: String,

    /// Tolerance for float and double assertions
    #[serde(default)]
    pub float_delta: Option<f64>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_test_dir() -> PathBuf {
    PathBuf::from("src/test/java")
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("src/main/java")
}

fn default_class_files() -> PathBuf {
    PathBuf::from("target/classes")
}

fn default_class_path() -> Vec<PathBuf> {
    vec![
        PathBuf::from("target/classes"),
        PathBuf::from("target/test-classes"),
    ]
}

fn default_test_runner() -> String {
    "org.junit.runner.JUnitCore".to_string()
}

fn default_build_timeout() -> u64 {
    600 // 10 minutes
}

fn default_test_file_globs() -> Vec<String> {
    vec!["**/*Test.java".to_string()]
}

fn default_test_annotations() -> Vec<String> {
    [
        "Test",
        "Before",
        "After",
        "BeforeClass",
        "AfterClass",
        "BeforeEach",
        "AfterEach",
        "BeforeAll",
        "AfterAll",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    100
}

fn default_reply_timeout() -> u64 {
    10
}

fn default_max_depth() -> usize {
    5
}

fn default_assertion_function() -> String {
    "assertEquals".to_string()
}

fn default_assertion_import() -> String {
    "org.junit.Assert.assertEquals".to_string()
}

fn default_indent() -> String {
    "    ".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            test_dir: default_test_dir(),
            source_dir: default_source_dir(),
            class_files: default_class_files(),
            class_path: default_class_path(),
            test_runner: default_test_runner(),
            java_home: None,
            jvm_options: Vec::new(),
            build_command: None,
            build_timeout_seconds: default_build_timeout(),
            test_file_globs: default_test_file_globs(),
            test_annotations: default_test_annotations(),
        }
    }
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
            poll_interval_ms: default_poll_interval(),
            reply_timeout_seconds: default_reply_timeout(),
            show_output: false,
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            assertion_function: default_assertion_function(),
            assertion_import: default_assertion_import(),
            indent: default_indent(),
            float_delta: None,
        }
    }
}

impl ProjectConfig {
    /// Resolve a configured path against `project_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn test_dir(&self) -> PathBuf {
        self.resolve(&self.test_dir)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.resolve(&self.source_dir)
    }

    pub fn class_files(&self) -> PathBuf {
        self.resolve(&self.class_files)
    }

    /// Class path entries joined with the platform separator.
    pub fn class_path(&self) -> Result<String> {
        let entries: Vec<PathBuf> = self.class_path.iter().map(|p| self.resolve(p)).collect();
        let joined: OsString =
            std::env::join_paths(&entries).context("Class path entry contains a separator")?;
        Ok(joined.to_string_lossy().into_owned())
    }

    pub fn java(&self) -> PathBuf {
        match &self.java_home {
            Some(home) => self.resolve(home).join("bin").join("java"),
            None => PathBuf::from("java"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// A relative `project_dir` is resolved against the directory holding the file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;

        if config.project.project_dir.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.project.project_dir = base.join(&config.project.project_dir);
        }
        Ok(config)
    }

    pub fn launch_settings(&self) -> Result<LaunchSettings> {
        let debugger = &self.debugger;
        Ok(LaunchSettings {
            java: self.project.java(),
            class_path: self.project.class_path()?,
            test_runner: self.project.test_runner.clone(),
            jvm_options: self.project.jvm_options.clone(),
            working_dir: self.project.project_dir.clone(),
            show_output: debugger.show_output,
            connect_timeout: Duration::from_secs(debugger.connect_timeout_seconds),
            reply_timeout: Duration::from_secs(debugger.reply_timeout_seconds),
            idle_timeout: Duration::from_secs(debugger.idle_timeout_seconds),
            poll_interval: Duration::from_millis(debugger.poll_interval_ms),
        })
    }

    pub fn assertion_style(&self) -> AssertionStyle {
        AssertionStyle {
            function: self.patcher.assertion_function.clone(),
            import: self.patcher.assertion_import.clone(),
            indent: self.patcher.indent.clone(),
            float_delta: self.patcher.float_delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Default value tests
    // =========================================================================

    #[test]
    fn test_default_general_config() {
        let config = GeneralConfig::default();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_default_project_config() {
        let config = ProjectConfig::default();
        assert_eq!(config.test_dir, PathBuf::from("src/test/java"));
        assert_eq!(config.test_file_globs, vec!["**/*Test.java"]);
        assert!(config.test_annotations.contains(&"Test".to_string()));
        assert!(config.build_command.is_none());
    }

    #[test]
    fn test_default_assertion_style_matches_patcher_defaults() {
        let config = Config::default();
        assert_eq!(config.assertion_style(), AssertionStyle::default());
    }

    // =========================================================================
    // Config parsing tests
    // =========================================================================

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[general]
log_level = "debug"

[debugger]
idle_timeout_seconds = 5
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.debugger.idle_timeout_seconds, 5);
        // Defaults should still apply
        assert_eq!(config.debugger.poll_interval_ms, 100);
        assert_eq!(config.observer.max_depth, 5);
    }

    #[test]
    fn test_parse_patcher() {
        let toml = r#"
[patcher]
assertion_function = "assertEquals"
assertion_import = "org.junit.jupiter.api.Assertions.assertEquals"
indent = "\t"
float_delta = 0.0001
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let style = config.assertion_style();
        assert_eq!(style.import, "org.junit.jupiter.api.Assertions.assertEquals");
        assert_eq!(style.indent, "\t");
        assert_eq!(style.float_delta, Some(0.0001));
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.project.project_dir, PathBuf::from("."));
        assert_eq!(config.debugger.connect_timeout_seconds, 30);
        assert!(config.project.jvm_options.is_empty());
    }

    // =========================================================================
    // Path resolution tests
    // =========================================================================

    #[test]
    fn test_paths_resolve_against_project_dir() {
        let project = ProjectConfig {
            project_dir: PathBuf::from("/work/bank"),
            class_files: PathBuf::from("/abs/classes"),
            ..Default::default()
        };
        assert_eq!(project.test_dir(), PathBuf::from("/work/bank/src/test/java"));
        assert_eq!(project.source_dir(), PathBuf::from("/work/bank/src/main/java"));
        assert_eq!(project.class_files(), PathBuf::from("/abs/classes"));
        assert_eq!(
            project.class_path().unwrap(),
            "/work/bank/target/classes:/work/bank/target/test-classes"
        );
    }

    #[test]
    fn test_java_from_home() {
        let mut project = ProjectConfig::default();
        assert_eq!(project.java(), PathBuf::from("java"));
        project.java_home = Some(PathBuf::from("/opt/jdk"));
        assert_eq!(project.java(), PathBuf::from("/opt/jdk/bin/java"));
    }

    #[test]
    fn test_launch_settings() {
        let config: Config = toml::from_str(
            r#"
[project]
project_dir = "/work/bank"
jvm_options = ["-Xmx256m"]

[debugger]
poll_interval_ms = 20
show_output = true
"#,
        )
        .unwrap();
        let settings = config.launch_settings().unwrap();
        assert_eq!(settings.working_dir, PathBuf::from("/work/bank"));
        assert_eq!(settings.jvm_options, vec!["-Xmx256m"]);
        assert_eq!(settings.poll_interval, Duration::from_millis(20));
        assert!(settings.show_output);
        assert_eq!(settings.test_runner, "org.junit.runner.JUnitCore");
    }

    // =========================================================================
    // File I/O tests
    // =========================================================================

    #[test]
    fn test_config_load_nonexistent() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::remove_file(temp_file.path()).unwrap();

        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_config_load_resolves_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("mutoracle.toml");
        std::fs::write(
            &path,
            r#"
[project]
project_dir = "bank"
build_command = "mvn -q test-compile"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.project.project_dir, temp_dir.path().join("bank"));
        assert_eq!(
            config.project.build_command.as_deref(),
            Some("mvn -q test-compile")
        );
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();

        std::fs::write(temp_file.path(), "invalid {{{{ toml").unwrap();

        let result = Config::load(temp_file.path());
        assert!(result.is_err());
    }
}
