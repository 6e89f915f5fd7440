//! Property Values
//!
//! This module defines the tagged union every property slot stores. Dynamic
//! access by name yields a [`Value`]; callers that know the expected kind go
//! through [`FromValue`] (via `Model::get_as`) and get the typed payload or a
//! kind-mismatch error. Child nodes and child lists are values like any
//! scalar, which is what lets one container own an entire subtree.

use crate::engine::{Model, ModelList};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant for [`Value`], used in property definitions and kind checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Node,
    List,
}

/// A property value.
///
/// Cloning is cheap for the node and list variants (handle clones); text
/// clones its buffer.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Node(Model),
    List(ModelList),
}

impl Value {
    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Node(_) => ValueKind::Node,
            Value::List(_) => ValueKind::List,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value can be stored in a slot declared with `kind`.
    ///
    /// Null is accepted by every kind; everything else must match exactly.
    pub fn fits(&self, kind: ValueKind) -> bool {
        self.is_null() || self.kind() == kind
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Node(m) => write!(f, "<node {}>", m.id()),
            Value::List(l) => write!(f, "<list {}>", l.id()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Model> for Value {
    fn from(v: Model) -> Self {
        Value::Node(v)
    }
}

impl From<ModelList> for Value {
    fn from(v: ModelList) -> Self {
        Value::List(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// Typed extraction from a [`Value`], the backing for `Model::get_as`.
pub trait FromValue: Sized {
    /// The kind this extractor expects, used for error reporting.
    fn expected_kind() -> ValueKind;

    /// Extract the typed payload or fail with a kind mismatch.
    fn from_value(name: &str, value: Value) -> Result<Self, EngineError>;
}

fn mismatch<T: FromValue>(name: &str, value: &Value) -> EngineError {
    EngineError::kind_mismatch(name, T::expected_kind(), value.kind())
}

impl FromValue for bool {
    fn expected_kind() -> ValueKind {
        ValueKind::Bool
    }

    fn from_value(name: &str, value: Value) -> Result<Self, EngineError> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(mismatch::<Self>(name, &other)),
        }
    }
}

impl FromValue for i64 {
    fn expected_kind() -> ValueKind {
        ValueKind::Int
    }

    fn from_value(name: &str, value: Value) -> Result<Self, EngineError> {
        match value {
            Value::Int(v) => Ok(v),
            other => Err(mismatch::<Self>(name, &other)),
        }
    }
}

impl FromValue for f64 {
    fn expected_kind() -> ValueKind {
        ValueKind::Float
    }

    fn from_value(name: &str, value: Value) -> Result<Self, EngineError> {
        match value {
            Value::Float(v) => Ok(v),
            other => Err(mismatch::<Self>(name, &other)),
        }
    }
}

impl FromValue for String {
    fn expected_kind() -> ValueKind {
        ValueKind::Text
    }

    fn from_value(name: &str, value: Value) -> Result<Self, EngineError> {
        match value {
            Value::Text(v) => Ok(v),
            other => Err(mismatch::<Self>(name, &other)),
        }
    }
}

impl FromValue for Model {
    fn expected_kind() -> ValueKind {
        ValueKind::Node
    }

    fn from_value(name: &str, value: Value) -> Result<Self, EngineError> {
        match value {
            Value::Node(v) => Ok(v),
            other => Err(mismatch::<Self>(name, &other)),
        }
    }
}

impl FromValue for ModelList {
    fn expected_kind() -> ValueKind {
        ValueKind::List
    }

    fn from_value(name: &str, value: Value) -> Result<Self, EngineError> {
        match value {
            Value::List(v) => Ok(v),
            other => Err(mismatch::<Self>(name, &other)),
        }
    }
}

impl<T> FromValue for Option<T>
where
    T: FromValue,
{
    fn expected_kind() -> ValueKind {
        T::expected_kind()
    }

    fn from_value(name: &str, value: Value) -> Result<Self, EngineError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(name, other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(Value::Null.kind(), ValueKind::Null);
        assert_eq!(Value::from(true).kind(), ValueKind::Bool);
        assert_eq!(Value::from(42i64).kind(), ValueKind::Int);
        assert_eq!(Value::from(1.5f64).kind(), ValueKind::Float);
        assert_eq!(Value::from("hello").kind(), ValueKind::Text);
    }

    #[test]
    fn test_null_fits_every_kind() {
        for kind in [
            ValueKind::Bool,
            ValueKind::Int,
            ValueKind::Float,
            ValueKind::Text,
            ValueKind::Node,
            ValueKind::List,
        ] {
            assert!(Value::Null.fits(kind));
        }
        assert!(!Value::from(1i64).fits(ValueKind::Text));
        assert!(Value::from("x").fits(ValueKind::Text));
    }

    #[test]
    fn test_typed_extraction() {
        assert_eq!(i64::from_value("N", Value::Int(7)).unwrap(), 7);
        assert_eq!(
            String::from_value("T", Value::Text("a".into())).unwrap(),
            "a"
        );
        assert!(i64::from_value("N", Value::Text("a".into())).is_err());
        assert_eq!(
            Option::<i64>::from_value("N", Value::Null).unwrap(),
            None
        );
        assert_eq!(
            Option::<i64>::from_value("N", Value::Int(3)).unwrap(),
            Some(3)
        );
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(5i64)), Value::Int(5));
    }
}
