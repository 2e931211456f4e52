//! Sandbox management.
//!
//! Every test case gets its own temporary workspace holding a copy of the
//! module, generated mocks and variables. The workspace is a
//! [`tempfile::TempDir`], so it is removed when the [`Sandbox`] is dropped on
//! any exit path, including unwinding.

use crate::error::{CaseError, SandboxError};
use crate::mock;
use crate::schema::{Mode, TestCase};
use crate::tool::{self, Step, Tool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Variables file written next to the module sources. The `.auto.tfvars.json`
/// suffix makes the tool load it without a `-var-file` flag.
pub const VARS_FILE: &str = "infratest.auto.tfvars.json";

/// An isolated copy of a module.
#[derive(Debug)]
pub struct Sandbox {
    root: tempfile::TempDir,
    module_dir: PathBuf,
}

impl Sandbox {
    /// Create an empty sandbox under `parent`, or the system temp dir.
    pub fn create(parent: Option<&Path>) -> Result<Self, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("infratest-");
        let root = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(SandboxError::Create)?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(SandboxError::Create)?;
        let module_dir = root.path().join("module");
        Ok(Self { root, module_dir })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    /// Copy the module tree at `src` into `<sandbox>/module`.
    pub fn copy_module(&self, src: &Path) -> Result<(), SandboxError> {
        if !src.is_dir() {
            return Err(SandboxError::ModuleNotFound(src.to_path_buf()));
        }
        copy_dir(src, &self.module_dir)
    }

    /// Write `vars` as a JSON object of strings.
    pub fn write_vars(&self, vars: &BTreeMap<String, String>) -> Result<PathBuf, SandboxError> {
        let path = self.module_dir.join(VARS_FILE);
        let json = serde_json::to_vec_pretty(vars)
            .map_err(|e| SandboxError::WriteVars(std::io::Error::from(e)))?;
        std::fs::write(&path, json).map_err(SandboxError::WriteVars)?;
        Ok(path)
    }
}

/// Recursively copy `src` to `dst`, keeping permissions and, on Unix, symlinks.
fn copy_dir(src: &Path, dst: &Path) -> Result<(), SandboxError> {
    let copy_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| SandboxError::Copy { path, source }
    };

    std::fs::create_dir_all(dst).map_err(copy_err(dst))?;
    for entry in std::fs::read_dir(src).map_err(copy_err(src))? {
        let entry = entry.map_err(copy_err(src))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(copy_err(&from))?;

        if file_type.is_dir() {
            copy_dir(&from, &to)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to).map_err(copy_err(&from))?;
        } else {
            std::fs::copy(&from, &to).map_err(copy_err(&from))?;
        }
    }

    let perms = std::fs::metadata(src).map_err(copy_err(src))?.permissions();
    std::fs::set_permissions(dst, perms).map_err(copy_err(dst))?;
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::copy(from, to).map(|_| ())
}

/// Plan output of a successful sandbox run.
#[derive(Debug)]
pub struct SandboxRun {
    pub plan_json: Vec<u8>,
    pub logs: String,
}

/// A sandbox run that stopped early, with whatever the tool printed so far.
#[derive(Debug)]
pub struct SandboxFailure {
    pub error: CaseError,
    pub logs: String,
}

/// Resolve a module path from a spec file's directory.
pub fn module_path(base_dir: &Path, module: &Path) -> PathBuf {
    if module.is_absolute() {
        module.to_path_buf()
    } else {
        base_dir.join(module)
    }
}

/// Build a sandbox for `case` and run the tool through init, plan and show.
pub async fn run(
    case: &TestCase,
    base_dir: &Path,
    mode: Mode,
    tool: &Tool,
    sandbox_root: Option<&Path>,
) -> Result<SandboxRun, SandboxFailure> {
    let mut logs = String::new();
    let sandbox = match prepare(case, base_dir, mode, sandbox_root) {
        Ok(sandbox) => sandbox,
        Err(error) => return Err(SandboxFailure { error, logs }),
    };
    log::debug!("test {:?} sandboxed in {}", case.name, sandbox.path().display());

    let module_dir = sandbox.module_dir();
    let result = async {
        tool.run(Step::Init, module_dir, &mut logs).await?;
        tool::post_init_fixup(module_dir);
        tool.run(Step::Plan, module_dir, &mut logs).await?;
        tool.run(Step::Show, module_dir, &mut logs).await
    }
    .await;

    match result {
        Ok(plan_json) => Ok(SandboxRun { plan_json, logs }),
        Err(e) => Err(SandboxFailure {
            error: e.into(),
            logs,
        }),
    }
}

fn prepare(
    case: &TestCase,
    base_dir: &Path,
    mode: Mode,
    sandbox_root: Option<&Path>,
) -> Result<Sandbox, CaseError> {
    let sandbox = Sandbox::create(sandbox_root)?;
    sandbox.copy_module(&module_path(base_dir, &case.module))?;

    if mode == Mode::Mock {
        mock::inject_mocks(sandbox.module_dir(), &case.mocks)?;
    }
    if !case.vars.is_empty() {
        sandbox.write_vars(&case.vars)?;
    }
    Ok(sandbox)
}
