//! Test execution engine.
//!
//! Fans every test case out to its own task, runs it in a sandbox and
//! collects one [`TestCaseResult`] per case through an aggregator task.

use crate::assertion::{Assertion, AssertionResult};
use crate::error::CaseError;
use crate::loader::LoadedSpec;
use crate::plan::PlanIndex;
use crate::sandbox::{self, SandboxFailure};
use crate::schema::{Mode, TestCase};
use crate::tool::Tool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};

/// Result of running a single test case.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TestCaseResult {
    pub file: String,
    pub test: String,
    pub assertions: Vec<AssertionResult>,
    pub passed: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub logs: String,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
}

impl TestCaseResult {
    /// A case that ended before its assertions could run.
    fn errored(file: &str, test: &str, mut logs: String, error: &dyn std::fmt::Display, duration: Duration) -> Self {
        if !logs.is_empty() && !logs.ends_with('\n') {
            logs.push('\n');
        }
        logs.push_str(&format!("error: {error}\n"));
        Self {
            file: file.to_string(),
            test: test.to_string(),
            assertions: Vec::new(),
            passed: false,
            logs,
            duration,
        }
    }
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Settings shared by every case in a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub mode: Mode,
    /// Substring match on test names.
    pub filter: Option<String>,
    /// Upper bound on concurrently running cases. Unbounded when `None`.
    pub max_parallel: Option<usize>,
    pub sandbox_root: Option<PathBuf>,
}

/// One test case plus what it needs from its spec file.
#[derive(Debug)]
struct Job {
    file: String,
    base_dir: PathBuf,
    case: TestCase,
}

fn jobs(specs: Vec<LoadedSpec>, filter: Option<&str>) -> Vec<Job> {
    specs
        .into_iter()
        .flat_map(|loaded| {
            let file = loaded.file_name();
            let base_dir = loaded.base_dir().to_path_buf();
            loaded
                .spec
                .tests
                .into_iter()
                .filter(move |case| filter.is_none_or(|f| case.name.contains(f)))
                .map(move |case| Job {
                    file: file.clone(),
                    base_dir: base_dir.clone(),
                    case,
                })
        })
        .collect()
}

/// Run every (filtered) test case in `specs` concurrently.
///
/// Returns exactly one result per case, in completion order. A worker that
/// panics still produces a failed result.
pub async fn run_specs(specs: Vec<LoadedSpec>, tool: Arc<Tool>, options: RunOptions) -> Vec<TestCaseResult> {
    let jobs = jobs(specs, options.filter.as_deref());
    let expected = jobs.len();
    log::debug!("running {expected} test case(s) in {} mode", options.mode);

    let (tx, mut rx) = mpsc::unbounded_channel::<TestCaseResult>();
    let aggregator = tokio::spawn(async move {
        let mut results = Vec::with_capacity(expected);
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        results
    });

    let limit = options.max_parallel.map(|n| Arc::new(Semaphore::new(n.max(1))));
    let options = Arc::new(options);

    for job in jobs {
        let file = job.file.clone();
        let test = job.case.name.clone();
        let tool = Arc::clone(&tool);
        let options = Arc::clone(&options);
        let limit = limit.clone();
        let tx = tx.clone();

        let worker = tokio::spawn(async move {
            let _permit = match limit {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            run_test_case(&job.file, &job.base_dir, &job.case, &tool, &options).await
        });

        tokio::spawn(async move {
            let result = match worker.await {
                Ok(result) => result,
                Err(e) => {
                    log::error!("test {test:?} in {file} did not complete: {e}");
                    TestCaseResult::errored(&file, &test, String::new(), &e, Duration::ZERO)
                }
            };
            if tx.send(result).is_err() {
                log::error!("result aggregator stopped before {test:?} reported");
            }
        });
    }
    drop(tx);

    match aggregator.await {
        Ok(results) => results,
        Err(e) => {
            log::error!("result aggregator failed: {e}");
            Vec::new()
        }
    }
}

/// Run one test case: sandbox, plan extraction, then assertions.
pub async fn run_test_case(
    file: &str,
    base_dir: &Path,
    case: &TestCase,
    tool: &Tool,
    options: &RunOptions,
) -> TestCaseResult {
    let start = Instant::now();
    let assertions: Vec<Assertion> = case.asserts.iter().map(Assertion::from_spec).collect();

    let run = match sandbox::run(case, base_dir, options.mode, tool, options.sandbox_root.as_deref()).await {
        Ok(run) => run,
        Err(SandboxFailure { error, logs }) => {
            log::debug!("test {:?} failed before assertions: {error}", case.name);
            return TestCaseResult::errored(file, &case.name, logs, &error, start.elapsed());
        }
    };

    let plan = match PlanIndex::from_json(&run.plan_json) {
        Ok(plan) => plan,
        Err(e) => {
            let error = CaseError::from(e);
            return TestCaseResult::errored(file, &case.name, run.logs, &error, start.elapsed());
        }
    };

    let results: Vec<AssertionResult> = assertions
        .iter()
        .map(|assertion| assertion.check(&plan, &case.vars))
        .collect();
    let passed = results.iter().all(|r| r.passed);

    TestCaseResult {
        file: file.to_string(),
        test: case.name.clone(),
        assertions: results,
        passed,
        logs: run.logs,
        duration: start.elapsed(),
    }
}
