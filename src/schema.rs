//! Schema definitions for infratest spec files.
//!
//! This module defines the structure of test specification files and of the
//! optional suite configuration. Specs are written in YAML or TOML and
//! deserialized into these types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default timeout for `init`, in seconds.
pub const DEFAULT_INIT_TIMEOUT_SECS: u64 = 120;
/// Default timeout for `plan`, in seconds.
pub const DEFAULT_PLAN_TIMEOUT_SECS: u64 = 120;
/// Default timeout for `show`, in seconds.
pub const DEFAULT_SHOW_TIMEOUT_SECS: u64 = 60;

/// How a test case's module is prepared before planning.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Inject mock resource definitions before planning.
    #[default]
    Mock,
    /// Plan the module as-is, ignoring declared mocks.
    Live,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Mock => f.write_str("mock"),
            Mode::Live => f.write_str("live"),
        }
    }
}

/// Suite-level configuration loaded from `infratest.yaml` in the test root.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SuiteConfig {
    /// Execution mode for every test case (default: mock).
    #[serde(default)]
    pub mode: Mode,

    /// Directory in which sandboxes are created. Defaults to the system temp dir.
    /// Sandboxes are always removed after their test case completes.
    #[serde(default)]
    pub sandbox_root: Option<PathBuf>,

    /// Maximum number of test cases running at once. Unbounded when unset.
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Provisioning tool settings.
    #[serde(default)]
    pub tool: ToolConfig,
}

/// How to invoke the provisioning tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolConfig {
    /// Executable to run (default: `terraform`).
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Arguments inserted before every subcommand.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the tool. Values may reference host
    /// variables with `${VAR}`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Per-step timeouts.
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeouts: Timeouts::default(),
        }
    }
}

fn default_binary() -> String {
    "terraform".to_string()
}

/// Timeouts in seconds for each provisioning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Timeouts {
    #[serde(default = "default_init_timeout")]
    pub init: u64,
    #[serde(default = "default_plan_timeout")]
    pub plan: u64,
    #[serde(default = "default_show_timeout")]
    pub show: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            init: DEFAULT_INIT_TIMEOUT_SECS,
            plan: DEFAULT_PLAN_TIMEOUT_SECS,
            show: DEFAULT_SHOW_TIMEOUT_SECS,
        }
    }
}

fn default_init_timeout() -> u64 {
    DEFAULT_INIT_TIMEOUT_SECS
}

fn default_plan_timeout() -> u64 {
    DEFAULT_PLAN_TIMEOUT_SECS
}

fn default_show_timeout() -> u64 {
    DEFAULT_SHOW_TIMEOUT_SECS
}

/// Root document for a test specification file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TestSpec {
    /// The test cases defined in this file.
    pub tests: Vec<TestCase>,
}

/// A single test case: one module, planned once, checked by its assertions.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TestCase {
    /// Name of the test, unique within its file.
    pub name: String,

    /// Path to the module under test, relative to the spec file or absolute.
    pub module: PathBuf,

    /// Input variables passed to the module as plain strings.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Mocked resources injected in mock mode.
    #[serde(default, alias = "mock")]
    pub mocks: Vec<MockSpec>,

    /// Assertions evaluated against the computed plan.
    #[serde(default, alias = "assert")]
    pub asserts: Vec<AssertionSpec>,
}

/// A fabricated resource with fixed attribute values.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MockSpec {
    /// Resource identifier in `<type>.<name>` form.
    pub resource: String,

    /// Attribute values, written as string literals.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A named comparison of an actual value against an expected value.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssertionSpec {
    /// Assertion name (used in reports).
    pub name: String,

    /// `output.<name>`, `resource.<type>.<name>.<attr>`, or a literal.
    pub actual: String,

    /// `var.<name>`, `output.<name>`, `resource.<type>.<name>.<attr>`, or a literal.
    pub expected: String,

    /// One of `equals`, `contains`, `matches`, `json_equals` (case-insensitive).
    pub condition: String,
}

/// Generate the JSON Schema for test specification files.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(TestSpec)
}
