//! End-to-end tests driving the built binary against a shell-script stand-in
//! for the provisioning tool.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn infratest_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_infratest"))
}

/// Answers `init`, `plan` and `show` like the real tool would for a module
/// whose plan is stored in `plan.json`.
const FAKE_TOOL: &str = r#"case "$1" in
  init) mkdir -p .terraform/providers; echo "Terraform has been successfully initialized!" ;;
  plan)
    if [ -n "$REQUIRE_MOCK" ] && [ ! -f infratest_mock_aws_vpc.main.tf ]; then
      echo "Error: aws_vpc.main has no mock" >&2; exit 1
    fi
    echo "Plan: 1 to add, 0 to change, 0 to destroy." ;;
  show) cat plan.json ;;
esac
"#;

const PLAN_JSON: &str = r#"{
  "format_version": "1.2",
  "planned_values": {
    "outputs": {
      "vpc_cidr": {"sensitive": false, "value": "10.0.0.0/16"},
      "tags": {"sensitive": false, "value": {"Name": "main", "Env": "dev"}}
    },
    "root_module": {
      "resources": [
        {"address": "aws_vpc.main", "type": "aws_vpc", "name": "main",
         "values": {"id": "vpc-123", "cidr_block": "10.0.0.0/16"}}
      ],
      "child_modules": [
        {"address": "module.subnets", "resources": [
          {"address": "module.subnets.aws_subnet.a", "type": "aws_subnet", "name": "a",
           "values": {"cidr_block": "10.0.1.0/24"}}
        ]}
      ]
    }
  }
}"#;

const VPC_SPEC: &str = r#"tests:
  - name: vpc cidr validation
    module: modules/vpc
    vars:
      cidr_block: "10.0.0.0/16"
    mocks:
      - resource: aws_vpc.main
        attributes:
          id: vpc-123
    asserts:
      - name: cidr matches variable
        actual: output.vpc_cidr
        expected: var.cidr_block
        condition: equals
      - name: vpc id
        actual: resource.aws_vpc.main.id
        expected: "^vpc-[0-9]+$"
        condition: matches
      - name: tags
        actual: output.tags
        expected: '{"Env": "dev", "Name": "main"}'
        condition: json_equals
      - name: child module subnet
        actual: resource.aws_subnet.a.cidr_block
        expected: "10.0.1"
        condition: contains
"#;

/// A test root with the fake tool configured and one module fixture.
fn suite(tool_env: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    let module = dir.path().join("modules/vpc");
    fs::create_dir_all(&module).unwrap();
    fs::write(module.join("main.tf"), "resource \"aws_vpc\" \"main\" {}\n").unwrap();
    fs::write(module.join("plan.json"), PLAN_JSON).unwrap();

    let env: serde_json::Map<String, serde_json::Value> = tool_env
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
        .collect();
    let config = serde_json::json!({
        "mode": "mock",
        "tool": {
            "binary": "sh",
            "args": ["-c", FAKE_TOOL, "fake-tf"],
            "env": env,
        },
    });
    fs::write(
        dir.path().join("infratest.yaml"),
        serde_yaml::to_string(&config).unwrap(),
    )
    .unwrap();
    dir
}

fn run(dir: &Path, extra: &[&str]) -> Output {
    infratest_cmd()
        .arg("run")
        .arg(dir)
        .args(extra)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn json_report(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!("invalid JSON ({e}): {}\nstderr: {}", stdout(output), stderr(output))
    })
}

#[test]
fn test_passing_suite_exits_zero() {
    let dir = suite(&[]);
    fs::write(dir.path().join("vpc_test.yaml"), VPC_SPEC).unwrap();

    let output = run(dir.path(), &[]);
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        stdout(&output),
        stderr(&output)
    );
    let out = stdout(&output);
    assert!(out.contains("vpc_test.yaml"));
    assert!(out.contains("✓ vpc cidr validation"));
    assert!(out.contains("1 passed, 0 failed"));
}

#[test]
fn test_json_output_reports_every_assertion() {
    let dir = suite(&[]);
    fs::write(dir.path().join("vpc_test.yaml"), VPC_SPEC).unwrap();

    let output = run(dir.path(), &["--output", "json"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let report = json_report(&output);
    assert_eq!(report["passed"], 1);
    assert_eq!(report["failed"], 0);
    let result = &report["results"][0];
    assert_eq!(result["file"], "vpc_test.yaml");
    assert_eq!(result["test"], "vpc cidr validation");
    assert_eq!(result["assertions"].as_array().unwrap().len(), 4);
    assert!(result["logs"].as_str().unwrap().contains("successfully initialized"));
}

#[test]
fn test_missing_output_fails_with_sentinel() {
    let dir = suite(&[]);
    fs::write(
        dir.path().join("missing_test.yaml"),
        r#"tests:
  - name: missing output
    module: modules/vpc
    asserts:
      - name: cidr
        actual: output.missing_output
        expected: "10.0.0.0/16"
        condition: equals
"#,
    )
    .unwrap();

    let output = run(dir.path(), &["--output", "json"]);
    assert_eq!(output.status.code(), Some(1));
    let report = json_report(&output);
    let message = report["results"][0]["assertions"][0]["message"].as_str().unwrap();
    assert!(message.contains("<nil>"), "{message}");
    assert!(message.contains("output.missing_output not found in plan"));
}

#[test]
fn test_invalid_regex_fails_one_assertion() {
    let dir = suite(&[]);
    fs::write(
        dir.path().join("regex_test.yaml"),
        r#"tests:
  - name: regex
    module: modules/vpc
    asserts:
      - name: broken
        actual: resource.aws_vpc.main.id
        expected: "("
        condition: matches
      - name: fine
        actual: resource.aws_vpc.main.id
        expected: "vpc"
        condition: contains
"#,
    )
    .unwrap();

    let output = run(dir.path(), &["--output", "json"]);
    assert_eq!(output.status.code(), Some(1));
    let assertions = &json_report(&output)["results"][0]["assertions"];
    assert_eq!(assertions[0]["passed"], false);
    assert!(assertions[0]["message"].as_str().unwrap().contains("invalid regex"));
    assert_eq!(assertions[1]["passed"], true);
}

#[test]
fn test_malformed_mock_fails_case_not_run() {
    let dir = suite(&[]);
    fs::write(
        dir.path().join("mock_test.yaml"),
        r#"tests:
  - name: bad mock
    module: modules/vpc
    mocks:
      - resource: aws_vpc
    asserts:
      - name: never evaluated
        actual: a
        expected: a
        condition: equals
  - name: unaffected
    module: modules/vpc
"#,
    )
    .unwrap();

    let output = run(dir.path(), &["--output", "json"]);
    assert_eq!(output.status.code(), Some(1));
    let report = json_report(&output);
    assert_eq!(report["passed"], 1);
    assert_eq!(report["failed"], 1);

    let bad = &report["results"][0];
    assert_eq!(bad["test"], "bad mock");
    assert!(bad["assertions"].as_array().unwrap().is_empty());
    assert!(bad["logs"].as_str().unwrap().contains("failed injecting mocks"));
}

#[test]
fn test_malformed_spec_aborts_run() {
    let dir = suite(&[]);
    fs::write(dir.path().join("good_test.yaml"), VPC_SPEC).unwrap();
    fs::write(dir.path().join("broken_test.yaml"), "tests: [ {name: ").unwrap();

    let output = run(dir.path(), &["--output", "json"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("broken_test.yaml"));
}

#[test]
fn test_live_mode_skips_mocks() {
    let dir = suite(&[("REQUIRE_MOCK", "1")]);
    fs::write(dir.path().join("vpc_test.yaml"), VPC_SPEC).unwrap();

    let mocked = run(dir.path(), &[]);
    assert!(mocked.status.success(), "{}", stdout(&mocked));

    let live = run(dir.path(), &["--mode", "live"]);
    assert_eq!(live.status.code(), Some(1));
    assert!(stdout(&live).contains("aws_vpc.main has no mock"));
}

#[test]
fn test_tool_env_interpolates_host_environment() {
    let dir = suite(&[("REQUIRE_MOCK", "${INFRATEST_CLI_TEST_FLAG}")]);
    fs::write(dir.path().join("vpc_test.yaml"), VPC_SPEC).unwrap();

    let output = infratest_cmd()
        .args(["run", "--mode", "live"])
        .arg(dir.path())
        .env("INFRATEST_CLI_TEST_FLAG", "1")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("has no mock"));

    let unset = infratest_cmd()
        .arg("run")
        .arg(dir.path())
        .env_remove("INFRATEST_CLI_TEST_FLAG")
        .output()
        .unwrap();
    assert_eq!(unset.status.code(), Some(1));
    assert!(stderr(&unset).contains("INFRATEST_CLI_TEST_FLAG"));
}

#[test]
fn test_filter_and_jobs() {
    let dir = suite(&[]);
    let spec = r#"tests:
  - name: vpc one
    module: modules/vpc
  - name: vpc two
    module: modules/vpc
  - name: subnet
    module: modules/vpc
"#;
    fs::write(dir.path().join("many_test.yaml"), spec).unwrap();

    let output = run(dir.path(), &["--output", "json", "--filter", "vpc", "--jobs", "1"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let report = json_report(&output);
    let tests: Vec<_> = report["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["test"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(tests, vec!["vpc one", "vpc two"]);
}

#[test]
fn test_report_file_written() {
    let dir = suite(&[]);
    fs::write(
        dir.path().join("vpc_test.toml"),
        r#"[[tests]]
name = "toml case"
module = "modules/vpc"

[[tests.asserts]]
name = "cidr"
actual = "output.vpc_cidr"
expected = "10.0.0.0/16"
condition = "equals"
"#,
    )
    .unwrap();
    let report_path = dir.path().join("out/report.json");
    fs::create_dir_all(report_path.parent().unwrap()).unwrap();

    let output = run(dir.path(), &["--report", report_path.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stdout(&output));

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["passed"], 1);
    assert_eq!(report["results"][0]["file"], "vpc_test.toml");
}

#[test]
fn test_sandbox_root_left_empty() {
    let dir = suite(&[]);
    let sandboxes = dir.path().join("sandboxes");
    let mut config: serde_yaml::Value =
        serde_yaml::from_str(&fs::read_to_string(dir.path().join("infratest.yaml")).unwrap())
            .unwrap();
    config["sandbox_root"] = serde_yaml::Value::from(sandboxes.to_str().unwrap());
    fs::write(
        dir.path().join("infratest.yaml"),
        serde_yaml::to_string(&config).unwrap(),
    )
    .unwrap();
    fs::write(dir.path().join("vpc_test.yaml"), VPC_SPEC).unwrap();

    let output = run(dir.path(), &[]);
    assert!(output.status.success(), "{}", stdout(&output));
    assert_eq!(fs::read_dir(&sandboxes).unwrap().count(), 0);
}

#[test]
fn test_validate_reports_static_problems() {
    let dir = suite(&[]);
    fs::write(dir.path().join("vpc_test.yaml"), VPC_SPEC).unwrap();

    let valid = infratest_cmd().arg("validate").arg(dir.path()).output().unwrap();
    assert!(valid.status.success(), "{}", stderr(&valid));
    assert!(stdout(&valid).contains("All 1 spec(s) valid"));

    fs::write(
        dir.path().join("bad_test.yaml"),
        r#"tests:
  - name: problems
    module: modules/missing
    mocks:
      - resource: aws_vpc
    asserts:
      - name: bad ref
        actual: resource.aws_vpc
        expected: x
        condition: greater_than
"#,
    )
    .unwrap();

    let invalid = infratest_cmd().arg("validate").arg(dir.path()).output().unwrap();
    assert_eq!(invalid.status.code(), Some(1));
    let err = stderr(&invalid);
    assert!(err.contains("module directory not found"), "{err}");
    assert!(err.contains("invalid resource identifier \"aws_vpc\""), "{err}");
    assert!(err.contains("invalid reference \"resource.aws_vpc\""), "{err}");
    assert!(err.contains("unknown condition \"greater_than\""), "{err}");
}

#[test]
fn test_malformed_reference_warns_and_resolves_to_nil() {
    let dir = suite(&[]);
    fs::write(
        dir.path().join("empty_name_test.yaml"),
        r#"tests:
  - name: empty output name
    module: modules/vpc
    asserts:
      - name: absent
        actual: "output."
        expected: "<nil>"
        condition: equals
"#,
    )
    .unwrap();

    let validated = infratest_cmd().arg("validate").arg(dir.path()).output().unwrap();
    assert!(validated.status.success(), "{}", stderr(&validated));
    let err = stderr(&validated);
    assert!(err.contains("warning: empty output name / absent: invalid reference \"output.\""), "{err}");

    let output = run(dir.path(), &[]);
    assert!(output.status.success(), "{}", stdout(&output));
}

#[test]
fn test_init_scaffolds_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tests/new_test.yaml");

    let created = infratest_cmd().arg("init").arg(&path).output().unwrap();
    assert!(created.status.success());
    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.contains("asserts:"));

    let again = infratest_cmd().arg("init").arg(&path).output().unwrap();
    assert_eq!(again.status.code(), Some(1));
    assert!(stderr(&again).contains("already exists"));
}

#[test]
fn test_schema_describes_spec_format() {
    let output = infratest_cmd().arg("schema").output().unwrap();
    assert!(output.status.success());
    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(schema["properties"]["tests"].is_object());
}
