//! Type tags and signatures.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Deepest container nesting accepted by the parser.
const MAX_DEPTH: usize = 32;

/// One complete bus type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Byte,
    Bool,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    Str,
    ObjectPath,
    Signature,
    Variant,
    Array(Box<TypeTag>),
    Struct(Vec<TypeTag>),
    Dict(Box<TypeTag>, Box<TypeTag>),
}

impl TypeTag {
    fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'y' => Self::Byte,
            'b' => Self::Bool,
            'n' => Self::Int16,
            'q' => Self::UInt16,
            'i' => Self::Int32,
            'u' => Self::UInt32,
            'x' => Self::Int64,
            't' => Self::UInt64,
            'd' => Self::Double,
            's' => Self::Str,
            'o' => Self::ObjectPath,
            'g' => Self::Signature,
            'v' => Self::Variant,
            _ => return None,
        })
    }

    /// Basic types may be used as dict keys.
    pub fn is_basic(&self) -> bool {
        !matches!(
            self,
            Self::Variant | Self::Array(_) | Self::Struct(_) | Self::Dict(_, _)
        )
    }

    fn write(&self, out: &mut String) {
        match self {
            Self::Byte => out.push('y'),
            Self::Bool => out.push('b'),
            Self::Int16 => out.push('n'),
            Self::UInt16 => out.push('q'),
            Self::Int32 => out.push('i'),
            Self::UInt32 => out.push('u'),
            Self::Int64 => out.push('x'),
            Self::UInt64 => out.push('t'),
            Self::Double => out.push('d'),
            Self::Str => out.push('s'),
            Self::ObjectPath => out.push('o'),
            Self::Signature => out.push('g'),
            Self::Variant => out.push('v'),
            Self::Array(inner) => {
                out.push('a');
                inner.write(out);
            }
            Self::Struct(fields) => {
                out.push('(');
                for field in fields {
                    field.write(out);
                }
                out.push(')');
            }
            Self::Dict(key, value) => {
                out.push_str("a{");
                key.write(out);
                value.write(out);
                out.push('}');
            }
        }
    }

    /// Parse exactly one complete type.
    pub fn parse(text: &str) -> Result<Self> {
        let signature = Signature::parse(text)?;
        match signature.types.as_slice() {
            [single] => Ok(single.clone()),
            _ => Err(Error::declaration(format!(
                "'{text}' is not a single complete type"
            ))),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write(&mut out);
        f.write_str(&out)
    }
}

/// Ordered sequence of complete types, e.g. the input of a method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    types: Vec<TypeTag>,
}

impl Signature {
    /// The empty signature.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_types(types: Vec<TypeTag>) -> Self {
        Self { types }
    }

    /// Parse signature text, rejecting anything malformed.
    pub fn parse(text: &str) -> Result<Self> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() > 255 {
            return Err(Error::declaration(format!(
                "signature '{text}' is longer than 255 characters"
            )));
        }

        let mut pos = 0;
        let mut types = Vec::new();
        while pos < chars.len() {
            let tag = parse_one(&chars, &mut pos, 0)
                .map_err(|reason| Error::declaration(format!("signature '{text}': {reason}")))?;
            types.push(tag);
        }
        Ok(Self { types })
    }

    pub fn types(&self) -> &[TypeTag] {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn parse_one(chars: &[char], pos: &mut usize, depth: usize) -> std::result::Result<TypeTag, String> {
    if depth > MAX_DEPTH {
        return Err("containers nested too deeply".to_string());
    }

    let code = *chars.get(*pos).ok_or("unexpected end")?;
    *pos += 1;

    match code {
        'a' => {
            if chars.get(*pos) == Some(&'{') {
                *pos += 1;
                let key = parse_one(chars, pos, depth + 1)?;
                if !key.is_basic() {
                    return Err(format!("dict key '{key}' is not a basic type"));
                }
                let value = parse_one(chars, pos, depth + 1)?;
                if chars.get(*pos) != Some(&'}') {
                    return Err("dict entry must hold exactly one key and one value".to_string());
                }
                *pos += 1;
                Ok(TypeTag::Dict(Box::new(key), Box::new(value)))
            } else {
                Ok(TypeTag::Array(Box::new(parse_one(chars, pos, depth + 1)?)))
            }
        }
        '(' => {
            let mut fields = Vec::new();
            loop {
                match chars.get(*pos) {
                    Some(')') => {
                        *pos += 1;
                        break;
                    }
                    Some(_) => fields.push(parse_one(chars, pos, depth + 1)?),
                    None => return Err("unclosed struct".to_string()),
                }
            }
            if fields.is_empty() {
                return Err("empty struct".to_string());
            }
            Ok(TypeTag::Struct(fields))
        }
        other => TypeTag::from_code(other).ok_or_else(|| format!("unknown type code '{other}'")),
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for tag in &self.types {
            tag.write(&mut out);
        }
        f.write_str(&out)
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
