mod assertion;
mod env;
mod error;
mod loader;
mod mock;
mod plan;
mod reference;
mod runner;
mod sandbox;
mod schema;
mod tool;

use assertion::Assertion;
use clap::{Parser, Subcommand, ValueEnum};
use runner::{RunOptions, TestCaseResult};
use schema::Mode;
use std::collections::HashSet;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with checkmarks
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
}

#[derive(Parser)]
#[command(name = "infratest")]
#[command(about = "A unit test harness for infrastructure-as-code modules")]
#[command(version)]
struct Cli {
    /// Log harness activity (sandboxes, tool invocations) to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute test specs
    Run {
        /// Path to test specs (file or directory)
        #[arg(default_value = "tests")]
        path: PathBuf,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
        /// Filter tests by name pattern (substring match)
        #[arg(short, long)]
        filter: Option<String>,
        /// Execution mode (overrides suite config)
        #[arg(long)]
        mode: Option<Mode>,
        /// Provisioning tool binary (overrides suite config)
        #[arg(long)]
        binary: Option<String>,
        /// Maximum number of test cases running at once
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Also write the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Validate test specs without running them
    Validate {
        /// Path to test specs (file or directory)
        #[arg(default_value = "tests")]
        path: PathBuf,
    },
    /// Scaffold a new spec file
    Init {
        /// Output path for the new spec file
        #[arg(default_value = "tests/example_test.yaml")]
        path: PathBuf,
    },
    /// Output the spec schema
    Schema,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match cli.command {
        Command::Run {
            path,
            output,
            filter,
            mode,
            binary,
            jobs,
            report,
        } => {
            let mut config = match loader::load_suite_config(test_root(&path)) {
                Ok(config) => config.unwrap_or_default(),
                Err(e) => exit_with(format_args!("Error loading suite config: {e}")),
            };
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if let Some(binary) = binary {
                config.tool.binary = binary;
            }
            if jobs.is_some() {
                config.max_parallel = jobs;
            }

            let tool_env = match env::resolve_tool_env(&config.tool.env) {
                Ok(env) => env,
                Err(e) => exit_with(format_args!("Error in suite config tool.env: {e}")),
            };
            let tool = Arc::new(tool::Tool::new(&config.tool, tool_env));

            let specs = match loader::load_specs(&path) {
                Ok(specs) => specs,
                Err(e) => exit_with(format_args!("Error loading specs: {e}")),
            };
            if specs.is_empty() {
                exit_with(format_args!("No spec files found at: {}", path.display()));
            }
            log::info!(
                "running {} spec file(s) with {} in {} mode",
                specs.len(),
                tool.binary(),
                config.mode
            );

            let options = RunOptions {
                mode: config.mode,
                filter,
                max_parallel: config.max_parallel,
                sandbox_root: config.sandbox_root,
            };

            let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => exit_with(format_args!("Error starting runtime: {e}")),
            };
            let mut results = runtime.block_on(runner::run_specs(specs, tool, options));
            results.sort_by(|a, b| (&a.file, &a.test).cmp(&(&b.file, &b.test)));

            let total_passed = results.iter().filter(|r| r.passed).count();
            let total_failed = results.len() - total_passed;
            let json = serde_json::json!({
                "passed": total_passed,
                "failed": total_failed,
                "results": results,
            });

            match output {
                OutputFormat::Human => {
                    print!("{}", format_human(&results, cli.verbose));
                    println!("\n{total_passed} passed, {total_failed} failed");
                }
                OutputFormat::Json => match serde_json::to_string_pretty(&json) {
                    Ok(s) => println!("{s}"),
                    Err(e) => exit_with(format_args!("Error serializing results: {e}")),
                },
            }

            if let Some(report) = report {
                let written = serde_json::to_vec_pretty(&json)
                    .map_err(std::io::Error::from)
                    .and_then(|bytes| fs::write(&report, bytes));
                if let Err(e) = written {
                    exit_with(format_args!("Error writing report {}: {e}", report.display()));
                }
            }

            if total_failed > 0 {
                std::process::exit(1);
            }
        }
        Command::Validate { path } => {
            let specs = match loader::load_specs(&path) {
                Ok(specs) => specs,
                Err(e) => exit_with(format_args!("✗ {e}")),
            };
            if specs.is_empty() {
                exit_with(format_args!("No spec files found at: {}", path.display()));
            }

            let mut errors = 0;
            for loaded in &specs {
                let report = validate_spec(loaded);
                if report.problems.is_empty() {
                    println!("✓ {} ({} tests)", loaded.path.display(), loaded.spec.tests.len());
                } else {
                    eprintln!("✗ {}", loaded.path.display());
                    for problem in &report.problems {
                        eprintln!("    {problem}");
                    }
                    errors += 1;
                }
                for warning in &report.warnings {
                    eprintln!("    warning: {warning}");
                }
            }

            if errors > 0 {
                exit_with(format_args!("\n{errors} spec(s) failed validation"));
            }
            println!("\nAll {} spec(s) valid", specs.len());
        }
        Command::Init { path } => {
            let template = r#"# Each test copies `module` into a fresh sandbox, runs init/plan/show and
# checks the planned values. Mocks replace real resources in mock mode.
tests:
  - name: vpc cidr validation
    module: ../modules/vpc
    vars:
      cidr_block: "10.0.0.0/16"
    mocks:
      - resource: aws_vpc.main
        attributes:
          id: vpc-123
          cidr_block: "10.0.0.0/16"
    asserts:
      - name: cidr matches variable
        actual: output.vpc_cidr
        expected: var.cidr_block
        condition: equals
      - name: vpc id looks real
        actual: resource.aws_vpc.main.id
        expected: "^vpc-"
        condition: matches
"#;
            if path.exists() {
                exit_with(format_args!("Error: file already exists: {}", path.display()));
            }
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
                && let Err(e) = fs::create_dir_all(parent)
            {
                exit_with(format_args!("Error creating directory: {e}"));
            }
            if let Err(e) = fs::write(&path, template) {
                exit_with(format_args!("Error writing file: {e}"));
            }
            println!("Created: {}", path.display());
        }
        Command::Schema => {
            let schema = schema::generate_schema();
            match serde_json::to_string_pretty(&schema) {
                Ok(json) => println!("{json}"),
                Err(e) => exit_with(format_args!("Error serializing schema: {e}")),
            }
        }
    }
}

fn exit_with(message: impl Display) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

/// Directory holding the suite config for a spec path.
fn test_root(path: &Path) -> &Path {
    if path.is_file() {
        path.parent().unwrap_or(path)
    } else {
        path
    }
}

/// Findings of `validate` for one spec file.
#[derive(Debug, Default)]
struct Validation {
    /// Would fail at run time regardless of the plan.
    problems: Vec<String>,
    /// References that run but can never match anything.
    warnings: Vec<String>,
}

fn validate_spec(loaded: &loader::LoadedSpec) -> Validation {
    let mut problems = Vec::new();
    let mut warnings = Vec::new();
    let mut names = HashSet::new();

    for case in &loaded.spec.tests {
        if !names.insert(case.name.as_str()) {
            problems.push(format!("duplicate test name {:?}", case.name));
        }

        let module = sandbox::module_path(loaded.base_dir(), &case.module);
        if !module.is_dir() {
            problems.push(format!("{}: module directory not found: {}", case.name, module.display()));
        }
        if let Err(e) = mock::validate_mocks(&case.mocks) {
            problems.push(format!("{}: {e}", case.name));
        }
        for spec in &case.asserts {
            let assertion = Assertion::from_spec(spec);
            for problem in assertion.problems() {
                problems.push(format!("{} / {}: {problem}", case.name, spec.name));
            }
            for warning in &assertion.warnings {
                warnings.push(format!("{} / {}: {warning}", case.name, spec.name));
            }
        }
    }

    Validation { problems, warnings }
}

/// Render results grouped by file.
fn format_human(results: &[TestCaseResult], verbose: bool) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let mut current_file: Option<&str> = None;

    for result in results {
        if current_file != Some(result.file.as_str()) {
            let _ = writeln!(out, "\n{}", result.file);
            current_file = Some(result.file.as_str());
        }

        let mark = if result.passed { "✓" } else { "✗" };
        let _ = writeln!(out, "  {mark} {} ({:.2?})", result.test, result.duration);
        for assertion in result.assertions.iter().filter(|a| !a.passed) {
            let message = assertion.message.as_deref().unwrap_or("failed");
            let _ = writeln!(out, "    {}: {message}", assertion.name);
        }

        // A case without assertion results failed before evaluation; its logs are the diagnostic.
        let show_logs = !result.passed && (verbose || result.assertions.is_empty());
        if show_logs {
            for line in result.logs.lines() {
                let _ = writeln!(out, "    | {line}");
            }
        }
    }

    out
}
