//! Mock resource injection.
//!
//! Each mock becomes a generated `.tf` file in the sandboxed module holding a
//! resource block with the literal attribute values, and an output named
//! `<type>_<name>_attrs` that re-exports those attributes.

use crate::error::MockInjectionError;
use crate::schema::MockSpec;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Prefix of every generated mock file.
pub const MOCK_FILE_PREFIX: &str = "infratest_mock_";

/// A mock whose identifier has been split and checked.
#[derive(Debug)]
struct ValidatedMock<'a> {
    resource_type: &'a str,
    name: &'a str,
    spec: &'a MockSpec,
}

/// Split `<type>.<name>`. Exactly one separator, both parts identifiers.
pub fn parse_resource_id(resource: &str) -> Result<(&str, &str), MockInjectionError> {
    match resource.split_once('.') {
        Some((resource_type, name)) if is_identifier(resource_type) && is_identifier(name) => {
            Ok((resource_type, name))
        }
        _ => Err(MockInjectionError::InvalidResourceId(resource.to_string())),
    }
}

/// Output that re-exports a mock's attributes.
pub fn output_key(resource_type: &str, name: &str) -> String {
    format!("{resource_type}_{name}_attrs")
}

/// File a mock is written to. The `.` cannot occur in either identifier, so
/// distinct mocks never share a file.
pub fn mock_file_name(resource_type: &str, name: &str) -> String {
    format!("{MOCK_FILE_PREFIX}{resource_type}.{name}.tf")
}

/// Check every mock without touching the filesystem.
pub fn validate_mocks(mocks: &[MockSpec]) -> Result<(), MockInjectionError> {
    validated(mocks).map(|_| ())
}

fn validated(mocks: &[MockSpec]) -> Result<Vec<ValidatedMock<'_>>, MockInjectionError> {
    let mut output_keys: HashMap<String, &str> = HashMap::new();
    mocks
        .iter()
        .map(|spec| {
            let (resource_type, name) = parse_resource_id(&spec.resource)?;
            let output = output_key(resource_type, name);
            match output_keys.insert(output.clone(), &spec.resource) {
                Some(first) if first == spec.resource => {
                    return Err(MockInjectionError::Duplicate(spec.resource.clone()));
                }
                Some(first) => {
                    return Err(MockInjectionError::OutputCollision {
                        first: first.to_string(),
                        second: spec.resource.clone(),
                        output,
                    });
                }
                None => {}
            }
            if let Some(attribute) = spec.attributes.keys().find(|k| !is_identifier(k)) {
                return Err(MockInjectionError::InvalidAttributeName {
                    resource: spec.resource.clone(),
                    attribute: attribute.clone(),
                });
            }
            Ok(ValidatedMock {
                resource_type,
                name,
                spec,
            })
        })
        .collect()
}

/// Write one definitions file per mock into `module_dir`.
///
/// All mocks are validated first, so a malformed identifier writes nothing.
pub fn inject_mocks(module_dir: &Path, mocks: &[MockSpec]) -> Result<Vec<PathBuf>, MockInjectionError> {
    let mocks = validated(mocks)?;
    let mut written = Vec::with_capacity(mocks.len());

    for mock in mocks {
        let path = module_dir.join(mock_file_name(mock.resource_type, mock.name));
        std::fs::write(&path, render_mock(&mock))
            .map_err(|source| MockInjectionError::Write { path: path.clone(), source })?;
        log::debug!("injected mock {} -> {}", mock.spec.resource, path.display());
        written.push(path);
    }

    Ok(written)
}

fn render_mock(mock: &ValidatedMock<'_>) -> String {
    let ValidatedMock {
        resource_type,
        name,
        spec,
    } = mock;
    let mut out = String::new();

    let _ = writeln!(out, "resource \"{resource_type}\" \"{name}\" {{");
    for (attr, value) in &spec.attributes {
        let _ = writeln!(out, "  {attr} = \"{}\"", escape_hcl(value));
    }
    out.push_str("}\n\n");

    let _ = writeln!(out, "output \"{}\" {{", output_key(resource_type, name));
    out.push_str("  value = {\n");
    for attr in spec.attributes.keys() {
        let _ = writeln!(out, "    {attr} = {resource_type}.{name}.{attr}");
    }
    out.push_str("  }\n}\n");
    out
}

/// Escape a value for use inside an HCL quoted string.
pub fn escape_hcl(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            // `${` and `%{` open template sequences; doubling the sigil makes them literal.
            '$' | '%' if chars.peek() == Some(&'{') => {
                escaped.push(c);
                escaped.push(c);
            }
            other => escaped.push(other),
        }
    }
    escaped
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
