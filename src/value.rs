//! Typed values carried through rows, expressions, and result rows.
//!
//! Mirrors the column types the row codec (`crate::row`) and the
//! expression evaluator (`crate::expr`) agree on. `Value::List` is the
//! shape terminal emit operators use for per-tag and per-edge projections
//! (spec §4.6): a list of scalar values, or a list of lists for edge
//! columns under `GetNeighborsNode`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Rough heap footprint, used by the request driver's memory-budget
    /// guard (spec §5) rather than an exact allocator accounting.
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => std::mem::size_of::<Value>(),
            Value::String(s) => std::mem::size_of::<Value>() + s.len(),
            Value::List(vs) => std::mem::size_of::<Value>() + vs.iter().map(Value::approx_size).sum::<usize>(),
        }
    }

    /// Lexicographic/typed ordering used by index-key encoding: nulls
    /// order before any value (spec §4.1).
    pub fn typed_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Field type declared by a schema version (spec §2, §4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    String,
    FixedString(usize),
}

impl FieldType {
    /// Validates `v` against this declared type, catching the
    /// `FIXED_STRING(n)` overflow case called out in spec §4.1.
    pub fn validate(&self, v: &Value) -> crate::error::Result<()> {
        use crate::error::Error;
        match (self, v) {
            (_, Value::Null) => Ok(()),
            (FieldType::Bool, Value::Bool(_)) => Ok(()),
            (FieldType::Int, Value::Int(_)) => Ok(()),
            (FieldType::Float, Value::Float(_)) | (FieldType::Float, Value::Int(_)) => Ok(()),
            (FieldType::String, Value::String(_)) => Ok(()),
            (FieldType::FixedString(n), Value::String(s)) => {
                if s.len() > *n {
                    Err(Error::InvalidFieldValue(format!(
                        "string of length {} overflows FIXED_STRING({})",
                        s.len(),
                        n
                    )))
                } else {
                    Ok(())
                }
            }
            _ => Err(Error::InvalidFieldValue(format!(
                "value {:?} does not match declared type {:?}",
                v, self
            ))),
        }
    }
}
