//! Assertion evaluation.
//!
//! Applies a condition to a resolved actual/expected pair. Evaluation never
//! fails: bad patterns, unparsable JSON and unknown conditions all come back
//! as a failed [`AssertionResult`] with a message.

use crate::plan::PlanIndex;
use crate::reference::{Reference, ReferenceError, Resolved, Side};
use crate::schema::AssertionSpec;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Outcome of one assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionResult {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AssertionResult {
    pub fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    pub fn fail(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: Some(message.into()),
        }
    }
}

/// The supported comparison conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Equals,
    Contains,
    Matches,
    JsonEquals,
    Unknown(String),
}

impl Condition {
    /// Case-insensitive; anything unrecognized is kept as [`Condition::Unknown`].
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "equals" => Condition::Equals,
            "contains" => Condition::Contains,
            "matches" => Condition::Matches,
            "json_equals" => Condition::JsonEquals,
            _ => Condition::Unknown(s.to_string()),
        }
    }
}

/// An assertion with both tokens parsed and its condition recognized.
///
/// Built before any sandbox exists, so `validate` and the runner agree on
/// what each token means.
#[derive(Debug, Clone)]
pub struct Assertion {
    pub name: String,
    pub actual: Reference,
    pub expected: Reference,
    pub condition: Condition,
    /// Tokens that parse but can never match a plan entry.
    pub warnings: Vec<ReferenceError>,
}

impl Assertion {
    pub fn from_spec(spec: &AssertionSpec) -> Self {
        let warnings = [(&spec.actual, Side::Actual), (&spec.expected, Side::Expected)]
            .into_iter()
            .filter_map(|(token, side)| Reference::lint(token, side).err())
            .collect();
        Self {
            name: spec.name.clone(),
            actual: Reference::parse(&spec.actual, Side::Actual),
            expected: Reference::parse(&spec.expected, Side::Expected),
            condition: Condition::parse(&spec.condition),
            warnings,
        }
    }

    /// Problems that make this assertion fail whatever the plan holds.
    pub fn problems(&self) -> Vec<String> {
        match &self.condition {
            Condition::Unknown(other) => vec![format!("unknown condition {other:?}")],
            _ => Vec::new(),
        }
    }

    /// Resolve both sides against `plan` and evaluate.
    pub fn check(&self, plan: &PlanIndex, vars: &BTreeMap<String, String>) -> AssertionResult {
        evaluate(
            &self.name,
            &self.condition,
            &self.actual.resolve(plan, vars),
            &self.expected.resolve(plan, vars),
        )
    }
}

/// Evaluate `condition` over the resolved pair.
pub fn evaluate(
    name: &str,
    condition: &Condition,
    actual: &Resolved,
    expected: &Resolved,
) -> AssertionResult {
    let act = actual.render();
    let exp = expected.render();

    let result = match condition {
        Condition::Equals => {
            if act == exp {
                return AssertionResult::pass(name);
            }
            AssertionResult::fail(name, format!("expected {exp:?}, got {act:?}"))
        }
        Condition::Contains => {
            if act.contains(&exp) {
                return AssertionResult::pass(name);
            }
            AssertionResult::fail(name, format!("{act:?} does not contain {exp:?}"))
        }
        Condition::Matches => match regex::Regex::new(&exp) {
            Err(e) => return AssertionResult::fail(name, format!("invalid regex {exp:?}: {e}")),
            Ok(re) if re.is_match(&act) => return AssertionResult::pass(name),
            Ok(_) => AssertionResult::fail(name, format!("{act:?} does not match {exp:?}")),
        },
        Condition::JsonEquals => {
            let parsed_actual = match serde_json::from_str::<Value>(&act) {
                Ok(v) => v,
                Err(e) => {
                    return with_missing(
                        AssertionResult::fail(name, format!("actual is not valid JSON ({e}): {act:?}")),
                        actual,
                        expected,
                    );
                }
            };
            let parsed_expected = match serde_json::from_str::<Value>(&exp) {
                Ok(v) => v,
                Err(e) => {
                    return with_missing(
                        AssertionResult::fail(name, format!("expected is not valid JSON ({e}): {exp:?}")),
                        actual,
                        expected,
                    );
                }
            };
            if json_equal(&parsed_actual, &parsed_expected) {
                return AssertionResult::pass(name);
            }
            AssertionResult::fail(
                name,
                format!("JSON structures differ: expected {parsed_expected}, got {parsed_actual}"),
            )
        }
        Condition::Unknown(other) => {
            return AssertionResult::fail(name, format!("unknown condition {other:?}"));
        }
    };

    with_missing(result, actual, expected)
}

/// Structural equality where numbers compare by value, so `1`, `1.0` and
/// `1e0` are the same.
fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| json_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Point at references that resolved to nothing, so a `<nil>` in the message
/// is not mistaken for a literal.
fn with_missing(mut result: AssertionResult, actual: &Resolved, expected: &Resolved) -> AssertionResult {
    let missing: Vec<&str> = [actual, expected]
        .into_iter()
        .filter_map(Resolved::missing_reference)
        .collect();
    if let Some(message) = result.message.as_mut()
        && !missing.is_empty()
    {
        message.push_str(&format!(" ({} not found in plan)", missing.join(", ")));
    }
    result
}
