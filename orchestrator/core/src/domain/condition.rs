// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Step guard conditions
//
// A condition is parsed once, when the workflow is defined, into a tiny AST:
//
//   operand > operand     numeric comparison
//   operand = operand     equality (`==` is accepted too)
//   path                  truthiness of a context value
//
// Operands are numbers, quoted strings, true/false/null, or dotted context
// paths such as `validate_expenses_result.approved_count`. A path that does
// not resolve stands for its own text, so `status = approved` compares the
// context value of `status` with the string "approved".

use crate::domain::message::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,

    #[error("invalid condition '{expression}': {reason}")]
    Invalid { expression: String, reason: String },

    #[error("cannot evaluate '{condition}': {left} and {right} are not both numeric")]
    NotNumeric {
        condition: String,
        left: Value,
        right: Value,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Reference(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Condition {
    GreaterThan(Operand, Operand),
    Equals(Operand, Operand),
    Truthy(String),
}

impl Operand {
    fn parse(raw: &str, expression: &str) -> Result<Self, ConditionError> {
        let text = raw.trim();
        let invalid = |reason: &str| ConditionError::Invalid {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        if text.is_empty() {
            return Err(invalid("missing operand"));
        }

        for quote in ['"', '\''] {
            if text.starts_with(quote) {
                return match text[1..].strip_suffix(quote) {
                    Some(inner) if !inner.contains(quote) => {
                        Ok(Operand::Literal(Value::String(inner.to_string())))
                    }
                    _ => Err(invalid("unterminated string literal")),
                };
            }
        }

        match text {
            "true" => return Ok(Operand::Literal(Value::Bool(true))),
            "false" => return Ok(Operand::Literal(Value::Bool(false))),
            "null" => return Ok(Operand::Literal(Value::Null)),
            _ => {}
        }

        if let Ok(n) = text.parse::<i64>() {
            return Ok(Operand::Literal(Value::from(n)));
        }
        if let Ok(f) = text.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Ok(Operand::Literal(Value::Number(n)));
            }
        }

        if is_path(text) {
            Ok(Operand::Reference(text.to_string()))
        } else {
            Err(invalid(&format!("'{}' is not a literal or context path", text)))
        }
    }

    fn resolve(&self, context: &Payload) -> Value {
        match self {
            Operand::Literal(v) => v.clone(),
            Operand::Reference(path) => lookup(context, path)
                .cloned()
                .unwrap_or_else(|| Value::String(path.clone())),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(Value::String(s)) => write!(f, "\"{}\"", s),
            Operand::Literal(v) => write!(f, "{}", v),
            Operand::Reference(path) => f.write_str(path),
        }
    }
}

fn is_path(text: &str) -> bool {
    let mut segments = text.split('.');
    segments.all(|segment| {
        let mut chars = segment.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// Resolve a dotted path through nested objects.
pub fn lookup<'a>(context: &'a Payload, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return a == b;
    }
    match (left, right) {
        (Value::String(a), b) | (b, Value::String(a)) if !b.is_string() => {
            *a == b.to_string()
        }
        _ => left == right,
    }
}

// Position and width of the first operator outside a quoted string.
fn find_operator(expression: &str) -> Option<(usize, usize, bool)> {
    let mut quote: Option<char> = None;
    let mut chars = expression.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some((i, 1, true)),
            (None, '=') => {
                let width = if matches!(chars.peek(), Some((_, '='))) { 2 } else { 1 };
                return Some((i, width, false));
            }
            _ => {}
        }
    }
    None
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ConditionError::Empty);
        }

        match find_operator(trimmed) {
            Some((at, width, greater)) => {
                let left = Operand::parse(&trimmed[..at], trimmed)?;
                let right = Operand::parse(&trimmed[at + width..], trimmed)?;
                Ok(if greater {
                    Condition::GreaterThan(left, right)
                } else {
                    Condition::Equals(left, right)
                })
            }
            None => match Operand::parse(trimmed, trimmed)? {
                Operand::Reference(path) => Ok(Condition::Truthy(path)),
                Operand::Literal(_) => Err(ConditionError::Invalid {
                    expression: trimmed.to_string(),
                    reason: "a bare condition must be a context path".to_string(),
                }),
            },
        }
    }
}

impl TryFrom<String> for Condition {
    type Error = ConditionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.to_string()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::GreaterThan(l, r) => write!(f, "{} > {}", l, r),
            Condition::Equals(l, r) => write!(f, "{} = {}", l, r),
            Condition::Truthy(path) => f.write_str(path),
        }
    }
}

impl Condition {
    /// Evaluate against the running workflow context.
    pub fn evaluate(&self, context: &Payload) -> Result<bool, ConditionError> {
        match self {
            Condition::GreaterThan(l, r) => {
                let (left, right) = (l.resolve(context), r.resolve(context));
                match (as_number(&left), as_number(&right)) {
                    (Some(a), Some(b)) => Ok(a > b),
                    _ => Err(ConditionError::NotNumeric {
                        condition: self.to_string(),
                        left,
                        right,
                    }),
                }
            }
            Condition::Equals(l, r) => Ok(loosely_equal(&l.resolve(context), &r.resolve(context))),
            Condition::Truthy(path) => Ok(lookup(context, path).is_some_and(is_truthy)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parses_each_form() {
        assert_eq!(
            "approved_expenses > 0".parse::<Condition>().unwrap(),
            Condition::GreaterThan(
                Operand::Reference("approved_expenses".into()),
                Operand::Literal(json!(0))
            )
        );
        assert_eq!(
            "status == 'approved'".parse::<Condition>().unwrap(),
            Condition::Equals(
                Operand::Reference("status".into()),
                Operand::Literal(json!("approved"))
            )
        );
        assert_eq!(
            "review.flagged".parse::<Condition>().unwrap(),
            Condition::Truthy("review.flagged".into())
        );
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert_eq!("".parse::<Condition>(), Err(ConditionError::Empty));
        assert!("> 5".parse::<Condition>().is_err());
        assert!("a > b > c".parse::<Condition>().is_err());
        assert!("amount >= 5".parse::<Condition>().is_err());
        assert!("42".parse::<Condition>().is_err());
        assert!("name = 'open".parse::<Condition>().is_err());
    }

    #[test]
    fn operator_inside_quotes_is_literal() {
        let condition: Condition = "label = 'a > b'".parse().unwrap();
        let ctx = context(json!({ "label": "a > b" }));
        assert!(condition.evaluate(&ctx).unwrap());
    }

    #[test]
    fn numeric_comparison_through_nested_path() {
        let condition: Condition = "validate_expenses_result.approved_count > 0".parse().unwrap();
        let yes = context(json!({ "validate_expenses_result": { "approved_count": 2 } }));
        let no = context(json!({ "validate_expenses_result": { "approved_count": 0 } }));
        assert!(condition.evaluate(&yes).unwrap());
        assert!(!condition.evaluate(&no).unwrap());
    }

    #[test]
    fn non_numeric_comparison_is_an_error() {
        let condition: Condition = "missing_key > 0".parse().unwrap();
        let err = condition.evaluate(&Payload::new()).unwrap_err();
        assert!(matches!(err, ConditionError::NotNumeric { .. }));
    }

    #[test]
    fn unresolved_identifier_stands_for_its_text() {
        let condition: Condition = "status = approved".parse().unwrap();
        assert!(condition.evaluate(&context(json!({ "status": "approved" }))).unwrap());
        assert!(!condition.evaluate(&context(json!({ "status": "rejected" }))).unwrap());
    }

    #[test]
    fn truthiness_of_missing_and_present_values() {
        let condition = Condition::Truthy("flag".into());
        assert!(!condition.evaluate(&Payload::new()).unwrap());
        assert!(!condition.evaluate(&context(json!({ "flag": "" }))).unwrap());
        assert!(condition.evaluate(&context(json!({ "flag": [1] }))).unwrap());
    }

    #[test]
    fn serde_uses_expression_text() {
        let condition: Condition = serde_json::from_value(json!("total > 100")).unwrap();
        assert_eq!(serde_json::to_value(&condition).unwrap(), json!("total > 100"));
        assert!(serde_json::from_value::<Condition>(json!("total >")).is_err());
    }
}
