//! Environment interpolation for the provisioning tool.
//!
//! Suite config can pass credentials and tool flags through without writing
//! them into the config file: `TF_TOKEN_app_terraform_io: ${TFC_TOKEN}`.

use std::collections::BTreeMap;

/// A `${VAR}` reference that could not be expanded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvError {
    #[error("environment variable '{0}' is not set")]
    Unset(String),
    #[error("unclosed variable reference: ${{{0}")]
    Unclosed(String),
}

/// Expand `${VAR}` references in `s` using `lookup`.
pub fn interpolate_with<F>(s: &str, lookup: F) -> Result<String, EnvError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => var_name.push(c),
                    None => return Err(EnvError::Unclosed(var_name)),
                }
            }
            let value = lookup(&var_name).ok_or(EnvError::Unset(var_name))?;
            result.push_str(&value);
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

/// Expand every value of the tool's environment map against the host environment.
pub fn resolve_tool_env(env: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>, EnvError> {
    env.iter()
        .map(|(key, value)| {
            let expanded = interpolate_with(value, |name| std::env::var(name).ok())?;
            Ok((key.clone(), expanded))
        })
        .collect()
}
