//! Dynamic values exchanged with remote objects.
//!
//! Values carry enough type information to check them against declared
//! signatures. The byte-level wire encoding belongs to the transport; this
//! module only decides how a single handler value maps onto a message body.

mod convert;
mod signature;

pub use convert::{BusType, FromArgs, FromValue, IntoArgs, IntoValue, Variant};
pub use signature::{Signature, TypeTag};

use std::fmt;

use crate::error::{Error, Result};

/// Validated object path, e.g. `/org/example/Object`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Validate and wrap an object path.
    ///
    /// Paths start with `/`, contain non-empty `[A-Za-z0-9_]` segments and
    /// carry no trailing slash (except the root path itself).
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if !is_valid_object_path(&path) {
            return Err(Error::declaration(format!("'{path}' is not a valid object path")));
        }
        Ok(Self(path))
    }

    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

/// A dynamically typed bus value.
///
/// `Struct(vec![])` doubles as the unit value: the in-process stand-in
/// for "no value" (empty results, empty signal payloads).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    ObjectPath(ObjectPath),
    Signature(Signature),
    Variant(Box<Value>),
    Array {
        element: TypeTag,
        items: Vec<Value>,
    },
    Struct(Vec<Value>),
    Dict {
        key: TypeTag,
        value: TypeTag,
        entries: Vec<(Value, Value)>,
    },
}

impl Value {
    /// The unit value.
    pub fn unit() -> Self {
        Self::Struct(Vec::new())
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Self::Struct(fields) if fields.is_empty())
    }

    /// Wrap in a variant.
    pub fn variant(self) -> Self {
        Self::Variant(Box::new(self))
    }

    /// Strip one variant layer, the one the wire adds around property
    /// values. A `v`-typed value keeps its own layer.
    pub fn unwrap_variant(self) -> Self {
        match self {
            Self::Variant(inner) => *inner,
            other => other,
        }
    }

    /// Strip any number of variant layers.
    pub fn into_inner(self) -> Self {
        match self {
            Self::Variant(inner) => inner.into_inner(),
            other => other,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::ObjectPath(p) => Some(p.as_str()),
            Self::Variant(inner) => inner.as_str(),
            _ => None,
        }
    }

    /// Infer the type tag of this value.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Byte(_) => TypeTag::Byte,
            Self::Bool(_) => TypeTag::Bool,
            Self::Int16(_) => TypeTag::Int16,
            Self::UInt16(_) => TypeTag::UInt16,
            Self::Int32(_) => TypeTag::Int32,
            Self::UInt32(_) => TypeTag::UInt32,
            Self::Int64(_) => TypeTag::Int64,
            Self::UInt64(_) => TypeTag::UInt64,
            Self::Double(_) => TypeTag::Double,
            Self::Str(_) => TypeTag::Str,
            Self::ObjectPath(_) => TypeTag::ObjectPath,
            Self::Signature(_) => TypeTag::Signature,
            Self::Variant(_) => TypeTag::Variant,
            Self::Array { element, .. } => TypeTag::Array(Box::new(element.clone())),
            Self::Struct(fields) => TypeTag::Struct(fields.iter().map(Value::type_tag).collect()),
            Self::Dict { key, value, .. } => {
                TypeTag::Dict(Box::new(key.clone()), Box::new(value.clone()))
            }
        }
    }

    /// Check this value against a declared type.
    pub fn conforms(&self, tag: &TypeTag) -> bool {
        match (self, tag) {
            (Self::Byte(_), TypeTag::Byte)
            | (Self::Bool(_), TypeTag::Bool)
            | (Self::Int16(_), TypeTag::Int16)
            | (Self::UInt16(_), TypeTag::UInt16)
            | (Self::Int32(_), TypeTag::Int32)
            | (Self::UInt32(_), TypeTag::UInt32)
            | (Self::Int64(_), TypeTag::Int64)
            | (Self::UInt64(_), TypeTag::UInt64)
            | (Self::Double(_), TypeTag::Double)
            | (Self::Str(_), TypeTag::Str)
            | (Self::ObjectPath(_), TypeTag::ObjectPath)
            | (Self::Signature(_), TypeTag::Signature)
            | (Self::Variant(_), TypeTag::Variant) => true,
            (Self::Array { element, items }, TypeTag::Array(expected)) => {
                element == expected.as_ref() && items.iter().all(|item| item.conforms(expected))
            }
            (Self::Struct(fields), TypeTag::Struct(expected)) => {
                fields.len() == expected.len()
                    && fields.iter().zip(expected).all(|(f, t)| f.conforms(t))
            }
            (
                Self::Dict {
                    key,
                    value,
                    entries,
                },
                TypeTag::Dict(expected_key, expected_value),
            ) => {
                key == expected_key.as_ref()
                    && value == expected_value.as_ref()
                    && entries
                        .iter()
                        .all(|(k, v)| k.conforms(expected_key) && v.conforms(expected_value))
            }
            _ => false,
        }
    }
}

/// Render the inferred signature of a body for error messages.
pub fn body_signature(body: &[Value]) -> String {
    Signature::from_types(body.iter().map(Value::type_tag).collect()).to_string()
}

/// Check a message body against a signature.
pub fn check_body(body: &[Value], signature: &Signature) -> Result<()> {
    let matches = body.len() == signature.len()
        && body
            .iter()
            .zip(signature.types())
            .all(|(value, tag)| value.conforms(tag));
    if matches {
        Ok(())
    } else {
        Err(Error::signature(signature.to_string(), body_signature(body)))
    }
}

/// Turn one handler value into a message body.
///
/// The declared signature decides the shape: no types means the value
/// must be unit, one type means the value is sent as-is (a single-field
/// struct stays a struct), several types means the value must be a struct
/// with one field per type and its fields become the body.
pub fn encode_body(value: Value, signature: &Signature) -> Result<Vec<Value>> {
    match signature.types() {
        [] if value.is_unit() => Ok(Vec::new()),
        [] => Err(Error::signature("", value.type_tag().to_string())),
        [single] => {
            if value.conforms(single) {
                Ok(vec![value])
            } else {
                Err(Error::signature(single.to_string(), value.type_tag().to_string()))
            }
        }
        many => match value {
            Value::Struct(fields) if fields.len() == many.len() => {
                check_body(&fields, signature)?;
                Ok(fields)
            }
            other => Err(Error::signature(
                signature.to_string(),
                other.type_tag().to_string(),
            )),
        },
    }
}

/// Inverse of [`encode_body`].
pub fn decode_body(body: Vec<Value>, signature: &Signature) -> Result<Value> {
    check_body(&body, signature)?;
    let mut body = body;
    Ok(match body.len() {
        0 => Value::unit(),
        1 => body.remove(0),
        _ => Value::Struct(body),
    })
}
