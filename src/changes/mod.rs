//! Properties-changed events and their translation to local names.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::registry::RegistrySource;
use crate::value::{decode_body, FromValue, Signature, TypeTag, Value};

/// Remote member name of the change signal.
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";

/// Wire signature of the change signal.
pub const PROPERTIES_CHANGED_SIGNATURE: &str = "sa{sv}as";

/// One `PropertiesChanged` emission, keyed by remote names.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertiesChanged {
    pub interface: String,
    /// New values, without the variant wrapper.
    pub changed: HashMap<String, Value>,
    pub invalidated: Vec<String>,
}

impl PropertiesChanged {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Self::default()
        }
    }

    pub fn with_changed(mut self, remote_name: impl Into<String>, value: Value) -> Self {
        self.changed.insert(remote_name.into(), value);
        self
    }

    pub fn with_invalidated(mut self, remote_name: impl Into<String>) -> Self {
        self.invalidated.push(remote_name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.invalidated.is_empty()
    }

    pub fn signature() -> Signature {
        Signature::from_types(vec![
            TypeTag::Str,
            TypeTag::Dict(Box::new(TypeTag::Str), Box::new(TypeTag::Variant)),
            TypeTag::Array(Box::new(TypeTag::Str)),
        ])
    }

    pub fn into_body(self) -> Vec<Value> {
        vec![
            Value::Str(self.interface),
            Value::Dict {
                key: TypeTag::Str,
                value: TypeTag::Variant,
                entries: self
                    .changed
                    .into_iter()
                    .map(|(name, value)| (Value::Str(name), value.variant()))
                    .collect(),
            },
            Value::Array {
                element: TypeTag::Str,
                items: self.invalidated.into_iter().map(Value::Str).collect(),
            },
        ]
    }

    pub fn from_body(body: Vec<Value>) -> Result<Self> {
        let Value::Struct(fields) = decode_body(body, &Self::signature())? else {
            return Err(Error::signature(PROPERTIES_CHANGED_SIGNATURE, "?"));
        };
        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or_else(Value::unit);

        let interface = String::from_value(next())?;
        let changed = match next() {
            Value::Dict { entries, .. } => entries
                .into_iter()
                .map(|(name, value)| Ok((String::from_value(name)?, value.unwrap_variant())))
                .collect::<Result<HashMap<_, _>>>()?,
            other => return Err(Error::signature("a{sv}", other.type_tag().to_string())),
        };
        let invalidated = Vec::<String>::from_value(next())?;

        Ok(Self {
            interface,
            changed,
            invalidated,
        })
    }
}

/// What to do with a remote property name the registry does not declare.
/// Callers always pick one; there is no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnUnknown {
    /// Fail with [`Error::UnmappedMember`].
    Error,
    /// Keep the remote name as the key.
    Reuse,
}

/// Translate a change event into `local name -> new value`, with `None`
/// for invalidated properties.
pub fn parse_properties_changed(
    source: &impl RegistrySource,
    event: &PropertiesChanged,
    on_unknown: OnUnknown,
) -> Result<HashMap<String, Option<Value>>> {
    let registry = source.registry();
    let local_name = |remote: &str| -> Result<String> {
        match registry.property(&event.interface, remote) {
            Some(decl) => Ok(decl.local_name.clone()),
            None => match on_unknown {
                OnUnknown::Error => Err(Error::UnmappedMember(format!(
                    "{}.{remote}",
                    event.interface
                ))),
                OnUnknown::Reuse => Ok(remote.to_string()),
            },
        }
    };

    let mut parsed = HashMap::with_capacity(event.changed.len() + event.invalidated.len());
    for (remote, value) in &event.changed {
        parsed.insert(local_name(remote)?, Some(value.clone()));
    }
    for remote in &event.invalidated {
        parsed.insert(local_name(remote)?, None);
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{Interface, Property};
    use crate::registry::MemberRegistry;

    fn registry() -> MemberRegistry {
        let interface = Interface::builder("org.test.test")
            .property(Property::new("test_property", "s").read_write().emits_change())
            .property(Property::new("test_invalidated", "x").read_write().emits_invalidation())
            .build()
            .unwrap();
        MemberRegistry::new(&[interface]).unwrap()
    }

    #[test]
    fn test_body_round_trip() {
        let event = PropertiesChanged::new("org.test.test")
            .with_changed("TestProperty", Value::Str("x".into()))
            .with_invalidated("TestInvalidated");
        let body = event.clone().into_body();
        assert_eq!(crate::value::body_signature(&body), PROPERTIES_CHANGED_SIGNATURE);
        assert_eq!(PropertiesChanged::from_body(body).unwrap(), event);
    }

    #[test]
    fn test_from_body_rejects_wrong_shape() {
        let result = PropertiesChanged::from_body(vec![Value::Str("org.test.test".into())]);
        assert!(matches!(result, Err(Error::Signature { .. })));
    }

    #[test]
    fn test_parse_changed_and_invalidated() {
        let event = PropertiesChanged::new("org.test.test")
            .with_changed("TestProperty", Value::Str("x".into()))
            .with_invalidated("TestInvalidated");
        let parsed = parse_properties_changed(&registry(), &event, OnUnknown::Error).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["test_property"], Some(Value::Str("x".into())));
        assert_eq!(parsed["test_invalidated"], None);
    }

    #[test]
    fn test_parse_unknown_member() {
        let event = PropertiesChanged::new("org.test.test")
            .with_changed("Mystery", Value::Int32(1))
            .with_invalidated("Gone");

        let err = parse_properties_changed(&registry(), &event, OnUnknown::Error).unwrap_err();
        assert!(matches!(err, Error::UnmappedMember(_)));

        let parsed = parse_properties_changed(&registry(), &event, OnUnknown::Reuse).unwrap();
        assert_eq!(parsed["Mystery"], Some(Value::Int32(1)));
        assert_eq!(parsed["Gone"], None);
    }

    #[test]
    fn test_parse_other_interface_is_unknown() {
        let event =
            PropertiesChanged::new("org.example.other").with_changed("TestProperty", Value::Bool(true));
        assert!(parse_properties_changed(&registry(), &event, OnUnknown::Error).is_err());
    }
}
