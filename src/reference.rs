//! Assertion references.
//!
//! The `actual` and `expected` fields of an assertion are tokens such as
//! `output.vpc_id` or `resource.aws_vpc.main.cidr_block`. They are parsed once
//! into a [`Reference`] and later resolved against a plan.

use crate::plan::PlanIndex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Rendered form of a reference that resolved to nothing.
pub const NOT_FOUND: &str = "<nil>";

/// Which side of an assertion a token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Actual,
    Expected,
}

/// A parsed assertion token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Literal(String),
    Output(String),
    /// `attribute` is `None` for `resource.<type>.<name>`, which addresses the
    /// whole attribute mapping.
    ResourceAttribute {
        resource_type: String,
        name: String,
        attribute: Option<String>,
    },
    Var(String),
}

/// A prefixed token whose path is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid reference {token:?}: {reason}")]
pub struct ReferenceError {
    pub token: String,
    pub reason: &'static str,
}

impl Reference {
    /// Parse a token by prefix. `var.` is only meaningful on the expected side;
    /// on the actual side it is a literal.
    ///
    /// Parsing never fails: a prefixed token with an empty path still resolves
    /// by its prefix and simply finds nothing. [`Reference::lint`] reports such
    /// tokens for `validate`.
    pub fn parse(token: &str, side: Side) -> Self {
        if let Some(name) = token.strip_prefix("output.") {
            return Reference::Output(name.to_string());
        }

        if let Some(path) = token.strip_prefix("resource.") {
            let mut parts = path.splitn(3, '.');
            return Reference::ResourceAttribute {
                resource_type: parts.next().unwrap_or_default().to_string(),
                name: parts.next().unwrap_or_default().to_string(),
                attribute: parts.next().map(str::to_string),
            };
        }

        if side == Side::Expected
            && let Some(name) = token.strip_prefix("var.")
        {
            return Reference::Var(name.to_string());
        }

        Reference::Literal(token.to_string())
    }

    /// Check that a prefixed token names something. The token still resolves
    /// if this fails, but can never match anything in a plan.
    pub fn lint(token: &str, side: Side) -> Result<(), ReferenceError> {
        let invalid = |reason| {
            Err(ReferenceError {
                token: token.to_string(),
                reason,
            })
        };

        match Reference::parse(token, side) {
            Reference::Output(name) if name.is_empty() => invalid("missing output name"),
            Reference::ResourceAttribute {
                resource_type,
                name,
                ..
            } if resource_type.is_empty() || name.is_empty() => {
                invalid("expected resource.<type>.<name>.<attribute>")
            }
            Reference::ResourceAttribute {
                attribute: Some(attr),
                ..
            } if attr.is_empty() => invalid("empty attribute name"),
            Reference::Var(name) if name.is_empty() => invalid("missing variable name"),
            _ => Ok(()),
        }
    }

    /// Resolve against a plan and the test case's variables.
    pub fn resolve(&self, plan: &PlanIndex, vars: &BTreeMap<String, String>) -> Resolved {
        match self {
            Reference::Literal(s) => Resolved::Value(Value::String(s.clone())),
            Reference::Output(name) => plan
                .output(name)
                .cloned()
                .map(Resolved::Value)
                .unwrap_or_else(|| Resolved::NotFound(self.to_string())),
            Reference::ResourceAttribute {
                resource_type,
                name,
                attribute,
            } => plan
                .resource(resource_type, name, attribute.as_deref())
                .map(Resolved::Value)
                .unwrap_or_else(|| Resolved::NotFound(self.to_string())),
            // An undeclared variable falls back to the token text itself.
            Reference::Var(name) => Resolved::Value(Value::String(
                vars.get(name).cloned().unwrap_or_else(|| self.to_string()),
            )),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Literal(s) => f.write_str(s),
            Reference::Output(name) => write!(f, "output.{name}"),
            Reference::ResourceAttribute {
                resource_type,
                name,
                attribute: Some(attr),
            } => write!(f, "resource.{resource_type}.{name}.{attr}"),
            Reference::ResourceAttribute {
                resource_type,
                name,
                attribute: None,
            } => write!(f, "resource.{resource_type}.{name}"),
            Reference::Var(name) => write!(f, "var.{name}"),
        }
    }
}

/// The value a reference resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Value(Value),
    /// Nothing in the plan matched; holds the reference text.
    NotFound(String),
}

impl Resolved {
    /// Render for comparison: strings verbatim, other values as compact JSON,
    /// missing references as [`NOT_FOUND`].
    pub fn render(&self) -> String {
        match self {
            Resolved::Value(Value::String(s)) => s.clone(),
            Resolved::Value(other) => other.to_string(),
            Resolved::NotFound(_) => NOT_FOUND.to_string(),
        }
    }

    pub fn missing_reference(&self) -> Option<&str> {
        match self {
            Resolved::NotFound(reference) => Some(reference),
            Resolved::Value(_) => None,
        }
    }
}
