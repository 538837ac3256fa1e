//! Property accessors shared by local objects and proxies.
//!
//! Properties are reached through explicit accessor values instead of
//! attribute magic. [`PropertyRef`] adds a compile-time capability: its
//! access marker decides whether `set_typed` exists for a caller at all.
//! The dynamic accessors keep the same checks at runtime.

use std::fmt;
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::interface::{Access, PropertyDecl};
use crate::value::Value;

/// Reasons attached to [`Error::Access`].
pub mod errmsg {
    pub const READ_ONLY: &str = "read-only property";
    pub const PRIVATE: &str = "only the owning object may write this property";
}

/// Type-level access mode of a [`PropertyRef`].
pub trait AccessMarker: sealed::Sealed {
    const ACCESS: Access;
}

/// Modes the owning object may write.
pub trait LocalWrite: AccessMarker {}

/// Modes a remote caller may write.
pub trait RemoteWrite: LocalWrite {}

/// Marker for [`Access::ReadOnly`].
#[derive(Debug, Clone, Copy)]
pub enum ReadOnly {}

/// Marker for [`Access::ReadWrite`].
#[derive(Debug, Clone, Copy)]
pub enum ReadWrite {}

/// Marker for [`Access::ReadWritePrivate`].
#[derive(Debug, Clone, Copy)]
pub enum PrivateWrite {}

impl AccessMarker for ReadOnly {
    const ACCESS: Access = Access::ReadOnly;
}

impl AccessMarker for ReadWrite {
    const ACCESS: Access = Access::ReadWrite;
}

impl AccessMarker for PrivateWrite {
    const ACCESS: Access = Access::ReadWritePrivate;
}

impl LocalWrite for ReadWrite {}
impl LocalWrite for PrivateWrite {}
impl RemoteWrite for ReadWrite {}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::ReadOnly {}
    impl Sealed for super::ReadWrite {}
    impl Sealed for super::PrivateWrite {}
}

/// Typed handle to a declared property.
///
/// ```
/// use rebus::property::{PropertyRef, ReadWrite};
///
/// const NAME: PropertyRef<String, ReadWrite> = PropertyRef::new("test_property");
/// assert_eq!(NAME.local_name(), "test_property");
/// ```
pub struct PropertyRef<V, A> {
    local_name: &'static str,
    _marker: PhantomData<fn() -> (V, A)>,
}

impl<V, A> PropertyRef<V, A> {
    pub const fn new(local_name: &'static str) -> Self {
        Self {
            local_name,
            _marker: PhantomData,
        }
    }

    pub fn local_name(&self) -> &'static str {
        self.local_name
    }
}

impl<V, A> Clone for PropertyRef<V, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V, A> Copy for PropertyRef<V, A> {}

impl<V, A> fmt::Debug for PropertyRef<V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PropertyRef").field(&self.local_name).finish()
    }
}

impl<V, A: AccessMarker> PropertyRef<V, A> {
    /// The declaration must carry the same access mode as the marker.
    pub(crate) fn check(&self, decl: &PropertyDecl) -> Result<()> {
        if decl.access != A::ACCESS {
            return Err(Error::declaration(format!(
                "property {} is declared {:?}, not {:?}",
                self.local_name,
                decl.access,
                A::ACCESS
            )));
        }
        Ok(())
    }
}

/// Who is writing a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writer {
    /// The object that exports the property.
    Owner,
    /// A caller on the bus.
    Remote,
}

/// Check a write before anything changes.
pub fn check_write(decl: &PropertyDecl, writer: Writer, value: &Value) -> Result<()> {
    match (decl.access, writer) {
        (Access::ReadOnly, _) => {
            return Err(Error::access(&decl.local_name, errmsg::READ_ONLY));
        }
        (Access::ReadWritePrivate, Writer::Remote) => {
            return Err(Error::access(&decl.local_name, errmsg::PRIVATE));
        }
        _ => {}
    }
    if !value.conforms(&decl.type_tag) {
        return Err(Error::signature(
            decl.type_tag.to_string(),
            value.type_tag().to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{Interface, Member, Property};

    fn decl(property: Property) -> PropertyDecl {
        let interface = Interface::builder("org.test.test")
            .property(property)
            .build()
            .unwrap();
        match &interface.members()[0] {
            Member::Property(decl) => (**decl).clone(),
            other => panic!("unexpected member {other:?}"),
        }
    }

    #[test]
    fn test_read_only_rejects_everyone() {
        let decl = decl(Property::new("test_property_read_only", "x"));
        for writer in [Writer::Owner, Writer::Remote] {
            let err = check_write(&decl, writer, &Value::Int64(1)).unwrap_err();
            assert!(matches!(err, Error::Access { reason, .. } if reason == errmsg::READ_ONLY));
        }
    }

    #[test]
    fn test_private_rejects_remote_only() {
        let decl = decl(Property::new("test_property_private", "x").private_write());
        assert!(check_write(&decl, Writer::Owner, &Value::Int64(1)).is_ok());
        assert!(matches!(
            check_write(&decl, Writer::Remote, &Value::Int64(1)),
            Err(Error::Access { .. })
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let decl = decl(Property::new("test_property", "s").read_write());
        assert!(matches!(
            check_write(&decl, Writer::Remote, &Value::Int32(3)),
            Err(Error::Signature { .. })
        ));
    }

    #[test]
    fn test_marker_must_match_declaration() {
        let decl = decl(Property::new("test_property", "s").read_write());
        assert!(PropertyRef::<String, ReadWrite>::new("test_property").check(&decl).is_ok());
        assert!(PropertyRef::<String, ReadOnly>::new("test_property").check(&decl).is_err());
    }
}
