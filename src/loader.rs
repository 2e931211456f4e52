//! Spec file loader.
//!
//! Discovers and parses test specification files from disk.

use crate::error::LoadError;
use crate::schema::{SuiteConfig, TestSpec};
use std::path::{Path, PathBuf};

/// The name of the suite configuration file.
pub const SUITE_CONFIG_FILENAME: &str = "infratest.yaml";

/// A parsed spec file together with the path it came from.
#[derive(Debug, Clone)]
pub struct LoadedSpec {
    pub path: PathBuf,
    pub spec: TestSpec,
}

impl LoadedSpec {
    /// Directory that relative module paths are resolved against.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// File name used in reports.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Load a test spec from a file path.
pub fn load_spec(path: &Path) -> Result<TestSpec, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    match ext {
        "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|source| LoadError::Yaml {
            path: path.to_path_buf(),
            source,
        }),
        "toml" => toml::from_str(&contents).map_err(|source| LoadError::Toml {
            path: path.to_path_buf(),
            source,
        }),
        other => Err(LoadError::UnsupportedFormat(other.to_string())),
    }
}

/// Find and parse every spec file under `path`.
///
/// Any malformed file fails the whole load; no partial result is returned.
pub fn load_specs(path: &Path) -> Result<Vec<LoadedSpec>, LoadError> {
    find_specs(path)?
        .into_iter()
        .map(|path| {
            let spec = load_spec(&path)?;
            log::debug!("loaded {} ({} tests)", path.display(), spec.tests.len());
            Ok(LoadedSpec { path, spec })
        })
        .collect()
}

/// Load suite configuration from a directory.
///
/// Looks for `infratest.yaml` in the given directory.
/// Returns `None` if the file doesn't exist, `Err` if it exists but is invalid.
pub fn load_suite_config(dir: &Path) -> Result<Option<SuiteConfig>, LoadError> {
    let config_path = dir.join(SUITE_CONFIG_FILENAME);

    if !config_path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&config_path).map_err(|source| LoadError::Io {
        path: config_path.clone(),
        source,
    })?;
    let config = serde_yaml::from_str(&contents).map_err(|source| LoadError::Yaml {
        path: config_path,
        source,
    })?;
    Ok(Some(config))
}

/// Find all spec files in a directory or return the single file.
pub fn find_specs(path: &Path) -> Result<Vec<PathBuf>, LoadError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut specs = Vec::new();
    collect_specs_recursive(path, &mut specs).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    specs.sort();
    Ok(specs)
}

fn collect_specs_recursive(dir: &Path, specs: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_dir() {
            // Module fixtures commonly live next to specs; their provider caches are not specs.
            if path.file_name().is_some_and(|f| f == ".terraform") {
                continue;
            }
            collect_specs_recursive(&path, specs)?;
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str())
            && (ext == "yaml" || ext == "yml" || ext == "toml")
        {
            if path.file_name().is_some_and(|f| f == SUITE_CONFIG_FILENAME) {
                continue;
            }
            specs.push(path);
        }
    }
    Ok(())
}
