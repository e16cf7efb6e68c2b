//! Service filter expression evaluator.
//!
//! Evaluates parsed expressions against the metadata of a Kubernetes
//! `Service` using three-valued logic: a result is `Some(true)`,
//! `Some(false)` or `None` (unknown). Comparisons always have a definite
//! outcome; only a bare operand that is missing or not a boolean is unknown.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::parser::{Expression, Field, Operand, Operator};

/// A resolved operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value<'a> {
    String(&'a str),
    Boolean(bool),
    Missing,
}

impl Value<'_> {
    fn as_bool(self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            Value::String(_) | Value::Missing => None,
        }
    }

    /// A missing value only equals another missing value.
    fn equals(self, other: Value<'_>) -> bool {
        match (self, other) {
            (Value::Missing, Value::Missing) => true,
            (Value::Missing, _) | (_, Value::Missing) => false,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Boolean(b), s @ Value::String(_))
            | (s @ Value::String(_), Value::Boolean(b)) => s.as_bool() == Some(b),
        }
    }
}

/// Evaluates `expr` against a service's metadata.
pub(super) fn evaluate(expr: &Expression, meta: &ObjectMeta) -> Option<bool> {
    match expr {
        Expression::Literal(b) => Some(*b),

        Expression::Operand(operand) => resolve(operand, meta).as_bool(),

        Expression::Comparison { left, op, right } => {
            let equal = resolve(left, meta).equals(resolve(right, meta));
            match op {
                Operator::Eq => Some(equal),
                Operator::Ne => Some(!equal),
            }
        }

        Expression::And(left, right) => {
            let l = evaluate(left, meta);
            if l == Some(false) {
                return Some(false); // Short-circuit
            }
            match (l, evaluate(right, meta)) {
                (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }
        }

        Expression::Or(left, right) => {
            let l = evaluate(left, meta);
            if l == Some(true) {
                return Some(true); // Short-circuit
            }
            match (l, evaluate(right, meta)) {
                (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }
        }

        Expression::Not(inner) => evaluate(inner, meta).map(|v| !v),
    }
}

fn resolve<'a>(operand: &'a Operand, meta: &'a ObjectMeta) -> Value<'a> {
    let field = match operand {
        Operand::String(s) => return Value::String(s.as_str()),
        Operand::Field(field) => field,
    };

    match field {
        Field::Name => string_or_missing(meta.name.as_deref()),
        Field::Namespace => string_or_missing(meta.namespace.as_deref()),
        Field::Label(key) => string_or_missing(lookup(meta.labels.as_ref(), key)),
        Field::Annotation(key) => string_or_missing(lookup(meta.annotations.as_ref(), key)),
        Field::HasLabel(key) => Value::Boolean(lookup(meta.labels.as_ref(), key).is_some()),
        Field::HasAnnotation(key) => {
            Value::Boolean(lookup(meta.annotations.as_ref(), key).is_some())
        }
    }
}

fn lookup<'a>(entries: Option<&'a BTreeMap<String, String>>, key: &str) -> Option<&'a str> {
    entries.and_then(|e| e.get(key)).map(String::as_str)
}

fn string_or_missing(value: Option<&str>) -> Value<'_> {
    value.map_or(Value::Missing, Value::String)
}
