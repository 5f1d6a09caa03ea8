//! Minimal expression support for correlation keys, conditions and input
//! collections.
//!
//! `=path` resolves a (dotted) variable path, `=path OP literal` compares with
//! one of `== != >= <= > <`. Anything not starting with `=` is a string literal.

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Variables visible from one element instance; inner scopes shadow outer.
pub type VariableScope = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Failed to evaluate expression '{expression}': no variable found with name '{name}'")]
    MissingVariable { expression: String, name: String },
    #[error("Failed to parse expression '{0}'")]
    Parse(String),
    #[error(
        "Expected result of the expression '{expression}' to be {expected}, but was '{actual}'"
    )]
    TypeMismatch {
        expression: String,
        expected: &'static str,
        actual: String,
    },
    #[error(
        "Expected timer '{element}' to be due in {duration_ms} ms, but the due date is out of range"
    )]
    DueDateOutOfRange { element: String, duration_ms: u64 },
}

const OPERATORS: [&str; 6] = ["==", "!=", ">=", "<=", ">", "<"];

pub fn evaluate(expression: &str, variables: &VariableScope) -> Result<Value, ExpressionError> {
    let Some(body) = expression.trim().strip_prefix('=') else {
        return Ok(Value::String(expression.to_string()));
    };
    let body = body.trim();
    if body.is_empty() {
        return Err(ExpressionError::Parse(expression.to_string()));
    }

    for op in OPERATORS {
        if let Some(idx) = body.find(op) {
            let left = operand(expression, body[..idx].trim(), variables)?;
            let right = operand(expression, body[idx + op.len()..].trim(), variables)?;
            return compare(expression, op, &left, &right).map(Value::Bool);
        }
    }
    resolve_path(expression, body, variables)
}

/// Correlation keys must evaluate to a string or a number.
pub fn evaluate_correlation_key(
    expression: &str,
    variables: &VariableScope,
) -> Result<String, ExpressionError> {
    match evaluate(expression, variables)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(type_mismatch(expression, "one of '[STRING, NUMBER]'", &other)),
    }
}

pub fn evaluate_condition(
    expression: &str,
    variables: &VariableScope,
) -> Result<bool, ExpressionError> {
    match evaluate(expression, variables)? {
        Value::Bool(b) => Ok(b),
        other => Err(type_mismatch(expression, "'BOOLEAN'", &other)),
    }
}

pub fn evaluate_list(
    expression: &str,
    variables: &VariableScope,
) -> Result<Vec<Value>, ExpressionError> {
    match evaluate(expression, variables)? {
        Value::Array(items) => Ok(items),
        other => Err(type_mismatch(expression, "'ARRAY'", &other)),
    }
}

fn type_mismatch(expression: &str, expected: &'static str, actual: &Value) -> ExpressionError {
    ExpressionError::TypeMismatch {
        expression: expression.to_string(),
        expected,
        actual: actual.to_string(),
    }
}

fn operand(
    expression: &str,
    token: &str,
    variables: &VariableScope,
) -> Result<Value, ExpressionError> {
    if token.is_empty() {
        return Err(ExpressionError::Parse(expression.to_string()));
    }
    if let Some(quoted) = token.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        return Ok(Value::String(quoted.to_string()));
    }
    if let Ok(literal) = serde_json::from_str::<Value>(token) {
        return Ok(literal);
    }
    resolve_path(expression, token, variables)
}

fn resolve_path(
    expression: &str,
    path: &str,
    variables: &VariableScope,
) -> Result<Value, ExpressionError> {
    let mut segments = path.split('.');
    let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    let missing = || ExpressionError::MissingVariable {
        expression: expression.to_string(),
        name: path.to_string(),
    };

    let first = segments.next().unwrap_or_default();
    if !valid(first) {
        return Err(ExpressionError::Parse(expression.to_string()));
    }
    let mut current = variables.get(first).ok_or_else(missing)?;
    for segment in segments {
        if !valid(segment) {
            return Err(ExpressionError::Parse(expression.to_string()));
        }
        current = current.get(segment).ok_or_else(missing)?;
    }
    Ok(current.clone())
}

fn compare(
    expression: &str,
    op: &str,
    left: &Value,
    right: &Value,
) -> Result<bool, ExpressionError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match op {
        "==" => Ok(ordering.map_or_else(|| left == right, |o| o == Ordering::Equal)),
        "!=" => Ok(ordering.map_or_else(|| left != right, |o| o != Ordering::Equal)),
        _ => {
            let ordering = ordering.ok_or_else(|| type_mismatch(expression, "comparable", right))?;
            Ok(match op {
                ">=" => ordering != Ordering::Less,
                "<=" => ordering != Ordering::Greater,
                ">" => ordering == Ordering::Greater,
                _ => ordering == Ordering::Less,
            })
        }
    }
}
