//! Per-event values produced by expressions.

use agc_core::{Error, Result};

/// Value of an expression for one event.
///
/// Scalars and vectors mirror scalar and jagged columns. `List` only comes
/// out of brace literals (`{a, b}`) and carries one alternative per
/// variation label.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// One number per event.
    Scalar(f64),
    /// A variable-length collection per event (e.g. all jets).
    Vector(Vec<f64>),
    /// A fixed list of alternatives.
    List(Vec<Value>),
}

/// Borrowed view of one column entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRef<'a> {
    /// Scalar entry.
    Scalar(f64),
    /// Jagged entry.
    Vector(&'a [f64]),
}

impl ValueRef<'_> {
    /// Owned copy.
    pub fn to_value(self) -> Value {
        match self {
            ValueRef::Scalar(x) => Value::Scalar(x),
            ValueRef::Vector(v) => Value::Vector(v.to_vec()),
        }
    }
}

impl Value {
    /// Boolean encoded as 1.0 / 0.0.
    pub fn from_bool(b: bool) -> Self {
        Value::Scalar(if b { 1.0 } else { 0.0 })
    }

    /// Short type name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Vector(_) => "vector",
            Value::List(_) => "list",
        }
    }

    /// The scalar payload, or an error naming `what` needed it.
    pub fn as_scalar(&self, what: &str) -> Result<f64> {
        match self {
            Value::Scalar(x) => Ok(*x),
            other => Err(Error::Execution(format!("{what}: expected scalar, got {}", other.kind()))),
        }
    }

    /// The vector payload, or an error naming `what` needed it.
    pub fn as_vector(&self, what: &str) -> Result<&[f64]> {
        match self {
            Value::Vector(v) => Ok(v),
            other => Err(Error::Execution(format!("{what}: expected vector, got {}", other.kind()))),
        }
    }

    /// Scalar truthiness (`> 0`), used by filters.
    pub fn is_true(&self, what: &str) -> Result<bool> {
        Ok(self.as_scalar(what)? > 0.0)
    }

    /// Apply `f` element-wise.
    pub fn map(&self, f: impl Fn(f64) -> f64 + Copy) -> Result<Value> {
        Ok(match self {
            Value::Scalar(x) => Value::Scalar(f(*x)),
            Value::Vector(v) => Value::Vector(v.iter().map(|&x| f(x)).collect()),
            Value::List(items) => Value::List(items.iter().map(|it| it.map(f)).collect::<Result<_>>()?),
        })
    }

    /// Combine two values element-wise, broadcasting scalars over vectors
    /// and both over list items.
    pub fn zip_with(&self, other: &Value, f: fn(f64, f64) -> f64) -> Result<Value> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(f(*a, *b))),
            (Value::Vector(a), Value::Scalar(b)) => {
                Ok(Value::Vector(a.iter().map(|&x| f(x, *b)).collect()))
            }
            (Value::Scalar(a), Value::Vector(b)) => {
                Ok(Value::Vector(b.iter().map(|&y| f(*a, y)).collect()))
            }
            (Value::Vector(a), Value::Vector(b)) => {
                if a.len() != b.len() {
                    return Err(Error::Execution(format!(
                        "vector length mismatch: {} vs {}",
                        a.len(),
                        b.len()
                    )));
                }
                Ok(Value::Vector(a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect()))
            }
            (Value::List(items), rhs) => Ok(Value::List(
                items.iter().map(|it| it.zip_with(rhs, f)).collect::<Result<_>>()?,
            )),
            (lhs, Value::List(items)) => Ok(Value::List(
                items.iter().map(|it| lhs.zip_with(it, f)).collect::<Result<_>>()?,
            )),
        }
    }
}
