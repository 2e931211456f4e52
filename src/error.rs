//! Error types for spec loading and test case execution.
//!
//! Only [`LoadError`] aborts a run. Everything else is local to one test
//! case and ends up in that case's result.

use std::path::PathBuf;
use std::time::Duration;

/// Failure to discover or parse spec files. Aborts the whole run.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Failed to read a file or directory.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse YAML.
    #[error("invalid YAML in {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    /// Failed to parse TOML.
    #[error("invalid TOML in {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// Unsupported file extension.
    #[error("unsupported file format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),
}

/// Workspace creation or module copy failure.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to create sandbox: {0}")]
    Create(#[source] std::io::Error),
    #[error("module directory not found: {}", .0.display())]
    ModuleNotFound(PathBuf),
    #[error("failed to copy module {}: {source}", .path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write variables file: {0}")]
    WriteVars(#[source] std::io::Error),
}

/// Mock resource generation failure.
#[derive(Debug, thiserror::Error)]
pub enum MockInjectionError {
    #[error("invalid resource identifier {0:?}: expected <type>.<name>")]
    InvalidResourceId(String),
    #[error("resource {0:?} is mocked more than once")]
    Duplicate(String),
    #[error("mocks {first:?} and {second:?} would both export output {output:?}")]
    OutputCollision {
        first: String,
        second: String,
        output: String,
    },
    #[error("invalid attribute name {attribute:?} on mock {resource:?}")]
    InvalidAttributeName { resource: String, attribute: String },
    #[error("failed to write mock file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Provisioning tool invocation failure.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to run `{binary} {step}`: {source}")]
    Spawn {
        binary: String,
        step: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("`{binary} {step}` exited with {status}")]
    Failed {
        binary: String,
        step: &'static str,
        status: std::process::ExitStatus,
    },
    #[error("`{binary} {step}` timed out after {}s", .timeout.as_secs())]
    Timeout {
        binary: String,
        step: &'static str,
        timeout: Duration,
    },
}

/// The plan JSON could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse plan JSON: {0}")]
pub struct ExtractionError(#[from] pub serde_json::Error);

/// Any error that ends a single test case before its assertions run.
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("failed injecting mocks: {0}")]
    MockInjection(#[from] MockInjectionError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}
