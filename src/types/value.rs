use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::operator::Operator;

/// A fact value or a condition operand.
///
/// Deserializes from plain JSON scalars and arrays, so a fact mapping such as
/// `{"activity": "public_offer", "reserve_ratio": 1.02}` loads directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// A list of values, used by `in`, `not_in` and `contains`.
    List(Vec<Value>),
}

impl Value {
    /// Apply `op` with `self` as the fact and `operand` as the right-hand side.
    ///
    /// Returns `None` when the two values cannot be compared under `op`
    /// (for example `>=` on a string, or `in` against a non-list operand).
    /// There is no implicit truthiness: a bool only ever equals a bool.
    #[must_use]
    pub fn apply(&self, op: Operator, operand: &Value) -> Option<bool> {
        match op {
            Operator::Eq => self.equals(operand),
            Operator::Neq => self.equals(operand).map(|eq| !eq),
            Operator::In => self.member_of(operand),
            Operator::NotIn => self.member_of(operand).map(|found| !found),
            Operator::Contains => self.contains(operand),
            Operator::Gt => self.numeric_cmp(operand).map(|o| o == Some(Ordering::Greater)),
            Operator::Gte => self
                .numeric_cmp(operand)
                .map(|o| matches!(o, Some(Ordering::Greater | Ordering::Equal))),
            Operator::Lt => self.numeric_cmp(operand).map(|o| o == Some(Ordering::Less)),
            Operator::Lte => self
                .numeric_cmp(operand)
                .map(|o| matches!(o, Some(Ordering::Less | Ordering::Equal))),
        }
    }

    /// Type-aware equality. Ints and floats compare numerically; any other
    /// pairing of different kinds is incomparable.
    #[allow(clippy::cast_precision_loss)]
    fn equals(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a == b),
            (Value::Int(a), Value::Int(b)) => Some(a == b),
            (Value::Float(a), Value::Float(b)) => Some(a == b),
            (Value::Int(a), Value::Float(b)) => Some((*a as f64) == *b),
            (Value::Float(a), Value::Int(b)) => Some(*a == (*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a == b),
            (Value::List(a), Value::List(b)) => {
                if a.len() != b.len() {
                    return Some(false);
                }
                let mut all = true;
                for (x, y) in a.iter().zip(b) {
                    all &= x.equals(y)?;
                }
                Some(all)
            }
            _ => None,
        }
    }

    fn member_of(&self, operand: &Value) -> Option<bool> {
        match (self, operand) {
            (Value::List(_), _) => None,
            (needle, Value::List(items)) => Some(
                items
                    .iter()
                    .any(|item| needle.equals(item).unwrap_or(false)),
            ),
            _ => None,
        }
    }

    fn contains(&self, operand: &Value) -> Option<bool> {
        match (self, operand) {
            (_, Value::List(_)) => None,
            (Value::List(items), needle) => Some(
                items
                    .iter()
                    .any(|item| item.equals(needle).unwrap_or(false)),
            ),
            (Value::String(haystack), Value::String(needle)) => {
                Some(haystack.contains(needle.as_str()))
            }
            _ => None,
        }
    }

    /// `Some(None)` means both sides are numbers but unordered (NaN).
    fn numeric_cmp(&self, other: &Value) -> Option<Option<Ordering>> {
        let a = self.as_number()?;
        let b = other.as_number()?;
        Some(a.partial_cmp(&b))
    }

    /// Explicit numeric coercion: ints widen to `f64`, nothing else converts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Short name of this value's kind, used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => {
                if v.is_finite() && v.fract() == 0.0 {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Value::String(v) => write!(f, "\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}
