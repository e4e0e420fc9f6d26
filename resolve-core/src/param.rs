//! Query parameters and per-kind parameter schemas.

use crate::error::{ResolveError, ResolveResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A single primitive or opaque query parameter.
///
/// Equality and hashing are structural. Floats compare by bit pattern so
/// that `Param` can be used inside hashed keys; `0.0` and `-0.0` are
/// therefore distinct parameters, and a NaN equals itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Param {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Id(Uuid),
}

impl Param {
    /// The declared type of this parameter.
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::Bool(_) => ParamType::Bool,
            Self::Int(_) => ParamType::Int,
            Self::UInt(_) => ParamType::UInt,
            Self::Float(_) => ParamType::Float,
            Self::Str(_) => ParamType::Str,
            Self::Bytes(_) => ParamType::Bytes,
            Self::Id(_) => ParamType::Id,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<Uuid> {
        match self {
            Self::Id(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert a JSON scalar into a parameter.
    ///
    /// Integers map to `Int` when they fit in an `i64`, otherwise `UInt`.
    /// Strings always map to `Str`. Returns `None` for null, arrays and
    /// objects.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_u64().map(Self::UInt))
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    /// Append the canonical encoding of this parameter to `buf`.
    ///
    /// Format: one type tag byte followed by a fixed-width big-endian payload,
    /// or a u64 length prefix plus raw bytes for strings and byte blobs.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.param_type().tag_byte());
        match self {
            Self::Bool(v) => buf.push(u8::from(*v)),
            Self::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Self::UInt(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Self::Float(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
            Self::Str(v) => {
                buf.extend_from_slice(&(v.len() as u64).to_be_bytes());
                buf.extend_from_slice(v.as_bytes());
            }
            Self::Bytes(v) => {
                buf.extend_from_slice(&(v.len() as u64).to_be_bytes());
                buf.extend_from_slice(v);
            }
            Self::Id(v) => buf.extend_from_slice(v.as_bytes()),
        }
    }
}

impl PartialEq for Param {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Id(a), Self::Id(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Param {}

impl Hash for Param {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.param_type().hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::UInt(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Str(v) => v.hash(state),
            Self::Bytes(v) => v.hash(state),
            Self::Id(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::UInt(v) => write!(f, "{}u", v),
            Self::Float(v) => write!(f, "{:?}", v),
            Self::Str(v) => write!(f, "{:?}", v),
            Self::Bytes(v) => write!(f, "0x{}", hex::encode(v)),
            Self::Id(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u64> for Param {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for Param {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Uuid> for Param {
    fn from(v: Uuid) -> Self {
        Self::Id(v)
    }
}

/// Parameter type discriminator used by schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    Bool,
    Int,
    UInt,
    Float,
    Str,
    Bytes,
    Id,
}

impl ParamType {
    /// Single-byte discriminant used in the canonical key encoding.
    pub fn tag_byte(self) -> u8 {
        match self {
            Self::Bool => 0x01,
            Self::Int => 0x02,
            Self::UInt => 0x03,
            Self::Float => 0x04,
            Self::Str => 0x05,
            Self::Bytes => 0x06,
            Self::Id => 0x07,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bytes => "bytes",
            Self::Id => "id",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared parameter shape of a query kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamSchema {
    /// Exactly these parameters, in this order.
    Fixed(Vec<ParamType>),
    /// Any number of parameters, all of one type.
    Variadic(ParamType),
}

impl ParamSchema {
    /// Schema for kinds that take no parameters.
    pub fn none() -> Self {
        Self::Fixed(Vec::new())
    }

    /// Check `params` against this schema.
    ///
    /// Returns `InvalidParameter` naming the first offending position. An
    /// arity mismatch reports the first missing or surplus position.
    pub fn validate(&self, kind: &str, params: &[Param]) -> ResolveResult<()> {
        match self {
            Self::Fixed(types) => {
                if params.len() != types.len() {
                    return Err(ResolveError::InvalidParameter {
                        kind: kind.to_string(),
                        index: params.len().min(types.len()),
                        reason: format!(
                            "expected {} parameters, got {}",
                            types.len(),
                            params.len()
                        ),
                    });
                }
                for (index, (param, expected)) in params.iter().zip(types).enumerate() {
                    check_type(kind, index, param, *expected)?;
                }
                Ok(())
            }
            Self::Variadic(expected) => {
                for (index, param) in params.iter().enumerate() {
                    check_type(kind, index, param, *expected)?;
                }
                Ok(())
            }
        }
    }
}

fn check_type(kind: &str, index: usize, param: &Param, expected: ParamType) -> ResolveResult<()> {
    let actual = param.param_type();
    if actual == expected {
        Ok(())
    } else {
        Err(ResolveError::InvalidParameter {
            kind: kind.to_string(),
            index,
            reason: format!("expected {}, got {}", expected, actual),
        })
    }
}

/// Convert a list of JSON scalars into parameters.
///
/// Non-scalar values are rejected with `InvalidParameter` at their position.
pub fn params_from_json(kind: &str, values: &[serde_json::Value]) -> ResolveResult<Vec<Param>> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            Param::from_json(value).ok_or_else(|| ResolveError::InvalidParameter {
                kind: kind.to_string(),
                index,
                reason: format!("unsupported JSON value: {}", value),
            })
        })
        .collect()
}
