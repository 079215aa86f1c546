mod command;
mod config;
mod debugger;
mod engine;
mod generator;
mod jdwp;
mod mutation;
mod observer;
mod project;
mod trace;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::debugger::DebugLauncher;
use crate::engine::TraceEngine;
use crate::generator::{AcceptAll, AssertionPatcher, TerminalPrompt};
use crate::mutation::{JsonMutantReport, Mutant, MutantReport, PitestReport};
use crate::observer::InspectorSet;
use crate::project::TestFile;

#[derive(Parser)]
#[command(name = "mutoracle")]
#[command(version)]
#[command(about = "Adds assertions that kill surviving mutants, found by diffing debugger traces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "mutoracle.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Trace the suite, trace every surviving mutant, and insert assertions
    Run {
        #[command(flatten)]
        source: MutantSource,

        /// Inspector methods, one fully qualified name per line
        #[arg(short, long)]
        inspectors: Option<PathBuf>,

        /// Insert every assertion without asking
        #[arg(long)]
        auto: bool,
    },
    /// Record the baseline trace only
    Trace {
        #[arg(short, long)]
        inspectors: Option<PathBuf>,

        /// Write the trace here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List discovered test files and their test methods
    Discover,
}

/// Where surviving mutants come from
#[derive(Args)]
#[group(required = true, multiple = false)]
struct MutantSource {
    /// JSON list of mutants
    #[arg(short, long)]
    mutants: Option<PathBuf>,

    /// PITest report directory (e.g. target/pit-reports), exported with the EXPORT feature
    #[arg(long)]
    pitest_dir: Option<PathBuf>,
}

impl MutantSource {
    fn survived_mutants(&self, config: &Config) -> anyhow::Result<Vec<Mutant>> {
        let project = &config.project;
        match (&self.mutants, &self.pitest_dir) {
            (Some(path), _) => JsonMutantReport::new(path, &project.project_dir).survived_mutants(),
            (None, Some(dir)) => {
                PitestReport::new(project.resolve(dir), project.source_dir()).survived_mutants()
            }
            (None, None) => bail!("Either --mutants or --pitest-dir is required"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::info!("Config path: {}", cli.config.display());
    tracing::info!("Project directory: {}", config.project.project_dir.display());

    match cli.command {
        Commands::Run {
            source,
            inspectors,
            auto,
        } => {
            build(&config)?;
            let tests = discover(&config)?;
            let inspectors = load_inspectors(inspectors.as_deref())?;
            let engine = trace_engine(&config)?;

            tracing::info!("Tracing baseline over {} test files", tests.len());
            let baseline = engine.trace_all(&tests, &inspectors);
            if baseline.is_empty() {
                bail!("Baseline trace is empty, nothing to compare mutants against");
            }
            tracing::info!(
                "Baseline: {} values in {} files",
                baseline.value_count(),
                baseline.len()
            );

            let mutants = source.survived_mutants(&config)?;
            let pairs = engine
                .trace_and_compare_mutants(&mutants, &baseline, &tests, &inspectors)
                .context("Mutant tracing aborted")?;
            tracing::info!(
                "{} of {} surviving mutants change the traced state",
                pairs.len(),
                mutants.len()
            );

            let style = config.assertion_style();
            let summary = if auto {
                AssertionPatcher::new(style, AcceptAll).apply(&pairs, false)
            } else {
                AssertionPatcher::new(style, TerminalPrompt::stdio()).apply(&pairs, true)
            };
            println!("{}", summary);
        }
        Commands::Trace { inspectors, output } => {
            build(&config)?;
            let tests = discover(&config)?;
            let inspectors = load_inspectors(inspectors.as_deref())?;
            let baseline = trace_engine(&config)?.trace_all(&tests, &inspectors);

            match output {
                Some(path) => {
                    baseline.save(&path)?;
                    tracing::info!("Wrote trace to {}", path.display());
                }
                None => println!("{}", baseline.to_json()?),
            }
        }
        Commands::Discover => {
            for test in discover(&config)? {
                println!("{} ({})", test.class_name, test.path.display());
                for method in &test.test_methods {
                    println!("  {}", method);
                }
            }
        }
    }

    Ok(())
}

fn build(config: &Config) -> anyhow::Result<()> {
    let Some(command) = &config.project.build_command else {
        return Ok(());
    };
    tracing::info!("Building: {}", command);
    let result = command::run_command_with_timeout(
        &config.project.project_dir,
        command,
        config.project.build_timeout_seconds,
    );
    if !result.success {
        bail!("Build failed after {}ms:\n{}", result.duration_ms, result.output);
    }
    tracing::info!("Build finished in {}ms", result.duration_ms);
    Ok(())
}

fn discover(config: &Config) -> anyhow::Result<Vec<TestFile>> {
    project::discover_test_files(
        &config.project.test_dir(),
        &config.project.test_file_globs,
        &config.project.test_annotations,
    )
}

fn load_inspectors(path: Option<&Path>) -> anyhow::Result<InspectorSet> {
    match path {
        Some(path) => InspectorSet::load(path),
        None => Ok(InspectorSet::default()),
    }
}

fn trace_engine(config: &Config) -> anyhow::Result<TraceEngine<DebugLauncher>> {
    let launcher = DebugLauncher::new(config.launch_settings()?);
    Ok(TraceEngine::new(
        launcher,
        config.project.class_files(),
        config.observer.max_depth,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_accepts_pitest_dir() {
        let cli = Cli::try_parse_from(["mutoracle", "run", "--pitest-dir", "target/pit-reports", "--auto"]).unwrap();
        let Commands::Run { source, auto, .. } = cli.command else {
            panic!("expected run");
        };
        assert!(auto);
        assert!(source.mutants.is_none());
        assert_eq!(source.pitest_dir, Some(PathBuf::from("target/pit-reports")));
    }

    #[test]
    fn test_run_needs_exactly_one_mutant_source() {
        assert!(Cli::try_parse_from(["mutoracle", "run"]).is_err());
        assert!(Cli::try_parse_from(["mutoracle", "run", "-m", "m.json", "--pitest-dir", "pit"]).is_err());
    }
}
