//! Conversions between Rust types and [`Value`].

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::Hash;

use super::{ObjectPath, Signature, TypeTag, Value};
use crate::error::{Error, Result};

/// Rust types with a static bus type.
pub trait BusType {
    fn type_tag() -> TypeTag;
}

/// Conversion into a dynamic value.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

/// Conversion out of a dynamic value. Variant layers are looked through.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

/// Conversion of call arguments into a message body.
pub trait IntoArgs {
    fn into_args(self) -> Vec<Value>;
}

/// Conversion of a message body into handler arguments.
pub trait FromArgs: Sized {
    fn from_args(args: Vec<Value>) -> Result<Self>;
}

fn mismatch(expected: impl Display, actual: &Value) -> Error {
    Error::signature(expected.to_string(), actual.type_tag().to_string())
}

macro_rules! basic_type {
    ($ty:ty, $variant:ident, $tag:ident) => {
        impl BusType for $ty {
            fn type_tag() -> TypeTag {
                TypeTag::$tag
            }
        }

        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }

        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self> {
                match value.into_inner() {
                    Value::$variant(v) => Ok(v),
                    other => Err(mismatch(TypeTag::$tag, &other)),
                }
            }
        }
    };
}

basic_type!(u8, Byte, Byte);
basic_type!(bool, Bool, Bool);
basic_type!(i16, Int16, Int16);
basic_type!(u16, UInt16, UInt16);
basic_type!(i32, Int32, Int32);
basic_type!(u32, UInt32, UInt32);
basic_type!(i64, Int64, Int64);
basic_type!(u64, UInt64, UInt64);
basic_type!(f64, Double, Double);
basic_type!(String, Str, Str);
basic_type!(ObjectPath, ObjectPath, ObjectPath);
basic_type!(Signature, Signature, Signature);

impl BusType for &str {
    fn type_tag() -> TypeTag {
        TypeTag::Str
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl BusType for () {
    fn type_tag() -> TypeTag {
        TypeTag::Struct(Vec::new())
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::unit()
    }
}

impl FromValue for () {
    fn from_value(value: Value) -> Result<Self> {
        let value = value.into_inner();
        if value.is_unit() {
            Ok(())
        } else {
            Err(mismatch("", &value))
        }
    }
}

/// A value that travels inside a variant (`v`).
#[derive(Debug, Clone, PartialEq)]
pub struct Variant(pub Value);

impl BusType for Variant {
    fn type_tag() -> TypeTag {
        TypeTag::Variant
    }
}

impl IntoValue for Variant {
    fn into_value(self) -> Value {
        self.0.variant()
    }
}

impl FromValue for Variant {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Variant(inner) => Ok(Self(*inner)),
            other => Ok(Self(other)),
        }
    }
}

impl<T: BusType> BusType for Vec<T> {
    fn type_tag() -> TypeTag {
        TypeTag::Array(Box::new(T::type_tag()))
    }
}

impl<T: BusType + IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::Array {
            element: T::type_tag(),
            items: self.into_iter().map(IntoValue::into_value).collect(),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value.into_inner() {
            Value::Array { items, .. } => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch("a*", &other)),
        }
    }
}

macro_rules! map_type {
    ($map:ident, $($bound:path),+) => {
        impl<K: BusType, V: BusType> BusType for $map<K, V> {
            fn type_tag() -> TypeTag {
                TypeTag::Dict(Box::new(K::type_tag()), Box::new(V::type_tag()))
            }
        }

        impl<K, V> IntoValue for $map<K, V>
        where
            K: BusType + IntoValue,
            V: BusType + IntoValue,
        {
            fn into_value(self) -> Value {
                Value::Dict {
                    key: K::type_tag(),
                    value: V::type_tag(),
                    entries: self
                        .into_iter()
                        .map(|(k, v)| (k.into_value(), v.into_value()))
                        .collect(),
                }
            }
        }

        impl<K, V> FromValue for $map<K, V>
        where
            K: FromValue $(+ $bound)+,
            V: FromValue,
        {
            fn from_value(value: Value) -> Result<Self> {
                match value.into_inner() {
                    Value::Dict { entries, .. } => entries
                        .into_iter()
                        .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                        .collect(),
                    other => Err(mismatch("a{**}", &other)),
                }
            }
        }
    };
}

map_type!(HashMap, Eq, Hash);
map_type!(BTreeMap, Ord);

impl IntoArgs for () {
    fn into_args(self) -> Vec<Value> {
        Vec::new()
    }
}

impl FromArgs for () {
    fn from_args(args: Vec<Value>) -> Result<Self> {
        if args.is_empty() {
            Ok(())
        } else {
            Err(Error::signature("", super::body_signature(&args)))
        }
    }
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Vec<Value> {
        self
    }
}

impl FromArgs for Vec<Value> {
    fn from_args(args: Vec<Value>) -> Result<Self> {
        Ok(args)
    }
}

macro_rules! tuple_types {
    ($( ($($name:ident),+) ),+ $(,)?) => {
        $(
            impl<$($name: BusType),+> BusType for ($($name,)+) {
                fn type_tag() -> TypeTag {
                    TypeTag::Struct(vec![$($name::type_tag()),+])
                }
            }

            impl<$($name: IntoValue),+> IntoValue for ($($name,)+) {
                #[allow(non_snake_case)]
                fn into_value(self) -> Value {
                    let ($($name,)+) = self;
                    Value::Struct(vec![$($name.into_value()),+])
                }
            }

            impl<$($name: FromValue),+> FromValue for ($($name,)+) {
                fn from_value(value: Value) -> Result<Self> {
                    match value.into_inner() {
                        Value::Struct(fields) => {
                            let mut fields = take_exact(fields, [$(stringify!($name)),+].len())?;
                            Ok(($($name::from_value(fields.next().unwrap_or_else(Value::unit))?,)+))
                        }
                        other => Err(mismatch("(*)", &other)),
                    }
                }
            }

            impl<$($name: IntoValue),+> IntoArgs for ($($name,)+) {
                #[allow(non_snake_case)]
                fn into_args(self) -> Vec<Value> {
                    let ($($name,)+) = self;
                    vec![$($name.into_value()),+]
                }
            }

            impl<$($name: FromValue),+> FromArgs for ($($name,)+) {
                fn from_args(args: Vec<Value>) -> Result<Self> {
                    let mut args = take_exact(args, [$(stringify!($name)),+].len())?;
                    Ok(($($name::from_value(args.next().unwrap_or_else(Value::unit))?,)+))
                }
            }
        )+
    };
}

fn take_exact(values: Vec<Value>, expected: usize) -> Result<std::vec::IntoIter<Value>> {
    if values.len() != expected {
        return Err(Error::signature(
            format!("{expected} values"),
            format!("{} values", values.len()),
        ));
    }
    Ok(values.into_iter())
}

tuple_types!((A), (A, B), (A, B, C), (A, B, C, D));
