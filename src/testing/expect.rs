//! Per-field expectations for persisted rows.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::error::{Error, FieldMismatch, Result};
use crate::storage::Row;

/// Key marking a negation in declarative files: `{"$not": ...}`.
pub const NOT_KEY: &str = "$not";

pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Comparison rule applied to one field of one expected row.
#[derive(Clone)]
pub enum ExpectedValue {
    /// Strict equality.
    Literal(Value),
    /// Differs from every wrapped value.
    Not(Vec<Value>),
    /// Predicate returns `true` for the actual value.
    Predicate(Predicate),
}

/// Expect a field to differ from each of `values`.
///
/// ```
/// use restcase::testing::not;
/// let rule = not(["blocked", "deleted"]);
/// assert!(rule.matches(Some(&"active".into())));
/// ```
pub fn not<I, V>(values: I) -> ExpectedValue
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    ExpectedValue::Not(values.into_iter().map(Into::into).collect())
}

impl ExpectedValue {
    pub fn predicate(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        ExpectedValue::Predicate(Arc::new(f))
    }

    /// Evaluates the rule. A column missing from the actual row is `None`;
    /// predicates see it as `null`.
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        match self {
            ExpectedValue::Literal(expected) => actual.is_some_and(|value| json_eq(value, expected)),
            ExpectedValue::Not(excluded) => {
                actual.is_none_or(|value| !excluded.iter().any(|other| json_eq(value, other)))
            }
            ExpectedValue::Predicate(predicate) => predicate(actual.unwrap_or(&Value::Null)),
        }
    }

    /// Reads a declarative value: `{"$not": v}` or `{"$not": [v, ...]}` is a
    /// negation, anything else a literal.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(mut map) if map.len() == 1 && map.contains_key(NOT_KEY) => {
                match map.remove(NOT_KEY) {
                    Some(Value::Array(values)) => ExpectedValue::Not(values),
                    Some(single) => ExpectedValue::Not(vec![single]),
                    None => ExpectedValue::Literal(Value::Object(map)),
                }
            }
            other => ExpectedValue::Literal(other),
        }
    }
}

/// Deep equality where numbers compare by value, so `10` equals `10.0`.
/// Types never coerce: `"1"` and `1` differ.
pub fn json_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => number_eq(l, r),
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(a, b)| json_eq(a, b))
        }
        (Value::Object(l), Value::Object(r)) => {
            l.len() == r.len()
                && l.iter()
                    .all(|(key, value)| r.get(key).is_some_and(|other| json_eq(value, other)))
        }
        _ => left == right,
    }
}

fn number_eq(l: &Number, r: &Number) -> bool {
    if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (l.as_u64(), r.as_u64()) {
        return a == b;
    }
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

impl fmt::Display for ExpectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedValue::Literal(value) => write!(f, "{value}"),
            ExpectedValue::Not(values) => {
                let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                write!(f, "not {}", rendered.join(" or "))
            }
            ExpectedValue::Predicate(_) => write!(f, "a value accepted by the predicate"),
        }
    }
}

impl fmt::Debug for ExpectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            ExpectedValue::Not(values) => f.debug_tuple("Not").field(values).finish(),
            ExpectedValue::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<Value> for ExpectedValue {
    fn from(value: Value) -> Self {
        ExpectedValue::Literal(value)
    }
}

macro_rules! literal_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ExpectedValue {
            fn from(value: $ty) -> Self {
                ExpectedValue::Literal(Value::from(value))
            }
        })*
    };
}

literal_from!(&str, String, bool, i32, i64, u32, u64, f64);

/// Expected contents of one row. Columns not listed are not checked.
#[derive(Debug, Clone, Default)]
pub struct ExpectedRow {
    fields: Vec<(String, ExpectedValue)>,
}

impl ExpectedRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, expected: impl Into<ExpectedValue>) -> Self {
        self.fields.push((name.into(), expected.into()));
        self
    }

    pub fn fields(&self) -> &[(String, ExpectedValue)] {
        &self.fields
    }

    /// Builds a row from a JSON object, reading `$not` markers.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from(map)),
            other => Err(Error::configuration(format!(
                "expected row must be an object, got {other}"
            ))),
        }
    }

    /// Compares against the actual row at the same position, reporting
    /// every failing field.
    pub fn check(&self, index: usize, actual: Option<&Row>) -> Vec<FieldMismatch> {
        self.fields
            .iter()
            .filter_map(|(name, expected)| {
                let observed = actual.and_then(|row| row.get(name));
                if expected.matches(observed) {
                    return None;
                }
                Some(FieldMismatch {
                    row: index,
                    field: name.clone(),
                    expected: expected.to_string(),
                    observed: match (actual, observed) {
                        (None, _) => "no row".to_string(),
                        (Some(_), None) => "no such column".to_string(),
                        (Some(_), Some(value)) => value.to_string(),
                    },
                })
            })
            .collect()
    }
}

impl From<Map<String, Value>> for ExpectedRow {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            fields: map
                .into_iter()
                .map(|(name, value)| (name, ExpectedValue::from_json(value)))
                .collect(),
        }
    }
}
