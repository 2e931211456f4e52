//! Provisioning tool driver.
//!
//! Runs `init`, `plan` and `show` against a sandboxed module, each under its
//! own timeout, and appends everything the tool prints to the test's log.

use crate::error::ExecutionError;
use crate::schema::{Timeouts, ToolConfig};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};

/// Name of the plan artifact written by `plan` and read by `show`.
pub const PLAN_FILE: &str = "infratest.tfplan";

/// One invocation of the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Init,
    Plan,
    Show,
}

impl Step {
    pub fn name(self) -> &'static str {
        match self {
            Step::Init => "init",
            Step::Plan => "plan",
            Step::Show => "show",
        }
    }

    fn args(self) -> Vec<String> {
        let args: &[&str] = match self {
            Step::Init => &["init", "-input=false", "-no-color"],
            Step::Plan => &["plan", "-input=false", "-no-color"],
            Step::Show => &["show", "-json", "-no-color", PLAN_FILE],
        };
        let mut args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        if self == Step::Plan {
            args.push(format!("-out={PLAN_FILE}"));
        }
        args
    }

    fn timeout(self, timeouts: &Timeouts) -> Duration {
        Duration::from_secs(match self {
            Step::Init => timeouts.init,
            Step::Plan => timeouts.plan,
            Step::Show => timeouts.show,
        })
    }
}

/// A configured provisioning tool, shared by every test case in a run.
#[derive(Debug, Clone)]
pub struct Tool {
    binary: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    timeouts: Timeouts,
}

impl Tool {
    /// `env` must already be interpolated.
    pub fn new(config: &ToolConfig, env: BTreeMap<String, String>) -> Self {
        Self {
            binary: config.binary.clone(),
            args: config.args.clone(),
            env,
            timeouts: config.timeouts,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Run one step in `dir`, returning its stdout.
    ///
    /// Stdout and stderr are appended to `log` line by line as the tool prints
    /// them, whether or not the step succeeds. A timed-out child is killed
    /// when it is dropped; what it printed before that stays in `log`.
    pub async fn run(&self, step: Step, dir: &Path, log: &mut String) -> Result<Vec<u8>, ExecutionError> {
        let args = step.args();
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args)
            .args(&args)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let _ = writeln!(log, "$ {} {}", self.binary, args.join(" "));
        log::debug!("running {} {} in {}", self.binary, step.name(), dir.display());

        let spawn_err = |source: std::io::Error| ExecutionError::Spawn {
            binary: self.binary.clone(),
            step: step.name(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_err)?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(spawn_err(std::io::Error::other("tool output was not captured")));
        };

        let timeout = step.timeout(&self.timeouts);
        let finished = tokio::time::timeout(timeout, async {
            let mut captured = Vec::new();
            collect_output(stdout, stderr, log, &mut captured).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, captured))
        })
        .await;
        if !log.ends_with('\n') {
            log.push('\n');
        }

        let (status, stdout) = match finished {
            Ok(Ok(finished)) => finished,
            Ok(Err(source)) => return Err(spawn_err(source)),
            Err(_) => {
                return Err(ExecutionError::Timeout {
                    binary: self.binary.clone(),
                    step: step.name(),
                    timeout,
                });
            }
        };

        if !status.success() {
            return Err(ExecutionError::Failed {
                binary: self.binary.clone(),
                step: step.name(),
                status,
            });
        }
        Ok(stdout)
    }
}

/// Append both streams to `log` in the order lines arrive, keeping a copy of
/// stdout in `captured`.
async fn collect_output(
    stdout: ChildStdout,
    stderr: ChildStderr,
    log: &mut String,
    captured: &mut Vec<u8>,
) -> std::io::Result<()> {
    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    let mut out_line = Vec::new();
    let mut err_line = Vec::new();
    let (mut out_open, mut err_open) = (true, true);

    // A cancelled `read_until` leaves its partial line in the buffer, so the
    // buffers are only cleared once a full line has been logged.
    while out_open || err_open {
        tokio::select! {
            read = stdout.read_until(b'\n', &mut out_line), if out_open => {
                if read? == 0 {
                    out_open = false;
                } else {
                    log.push_str(&String::from_utf8_lossy(&out_line));
                    captured.extend_from_slice(&out_line);
                    out_line.clear();
                }
            }
            read = stderr.read_until(b'\n', &mut err_line), if err_open => {
                if read? == 0 {
                    err_open = false;
                } else {
                    log.push_str(&String::from_utf8_lossy(&err_line));
                    err_line.clear();
                }
            }
        }
    }
    Ok(())
}

/// Restore what a copied provider cache can lose on some hosts.
///
/// Sets execute bits on every provider binary under `.terraform/providers`
/// on Unix, and on macOS also clears the quarantine attribute. Failures are
/// logged and otherwise ignored; on other platforms this does nothing.
pub fn post_init_fixup(module_dir: &Path) {
    let providers = module_dir.join(".terraform").join("providers");
    if !providers.is_dir() {
        return;
    }

    mark_executable(&providers);
    clear_quarantine(&providers);
}

#[cfg(unix)]
fn mark_executable(dir: &Path) {
    if let Err(e) = set_executable_recursive(dir) {
        log::debug!("could not mark providers executable: {e}");
    }
}

#[cfg(not(unix))]
fn mark_executable(_dir: &Path) {}

#[cfg(target_os = "macos")]
fn clear_quarantine(dir: &Path) {
    match std::process::Command::new("xattr")
        .args(["-dr", "com.apple.quarantine"])
        .arg(dir)
        .output()
    {
        Ok(out) if !out.status.success() => log::debug!("xattr exited with {}", out.status),
        Ok(_) => {}
        Err(e) => log::debug!("xattr unavailable: {e}"),
    }
}

#[cfg(not(target_os = "macos"))]
fn clear_quarantine(_dir: &Path) {}

#[cfg(unix)]
fn set_executable_recursive(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            set_executable_recursive(&entry.path())?;
        } else if file_type.is_file() {
            let mut perms = entry.metadata()?.permissions();
            perms.set_mode(perms.mode() | 0o111);
            std::fs::set_permissions(entry.path(), perms)?;
        }
    }
    Ok(())
}
