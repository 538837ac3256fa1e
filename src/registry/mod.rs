//! Member registry: the composed, immutable member table of one object type.
//!
//! A registry is built once per type from the type's own interfaces and the
//! registries of its ancestors. Composition rules:
//!
//! - Ancestors merge in order. The same interface reached through two
//!   ancestors merges silently if both definitions are identical; two
//!   different definitions under one interface name are an error.
//! - An own interface may extend an inherited interface of the same name
//!   with new members. Redeclaring an inherited member is an error unless
//!   the redeclaration is an explicit override, and an override must not
//!   change anything it restates.
//! - Local names are unique across all interfaces; remote names only
//!   within one interface.

mod introspect;

pub use introspect::{
    INTROSPECTABLE_INTERFACE, PEER_INTERFACE, PROPERTIES_INTERFACE, STANDARD_INTERFACES,
};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::interface::{Interface, Member, MethodDecl, PropertyDecl, SignalDecl};

/// Anything a member registry can be read from: registries, object types,
/// local objects and proxies.
pub trait RegistrySource {
    fn registry(&self) -> &MemberRegistry;
}

impl RegistrySource for MemberRegistry {
    fn registry(&self) -> &MemberRegistry {
        self
    }
}

impl<T: RegistrySource + ?Sized> RegistrySource for Arc<T> {
    fn registry(&self) -> &MemberRegistry {
        (**self).registry()
    }
}

impl<T: RegistrySource + ?Sized> RegistrySource for &T {
    fn registry(&self) -> &MemberRegistry {
        (**self).registry()
    }
}

/// Composed member table.
#[derive(Debug, Default)]
pub struct MemberRegistry {
    interfaces: Vec<Arc<Interface>>,
    by_remote: HashMap<(String, String), Member>,
    by_local: HashMap<String, (String, Member)>,
}

struct Table {
    name: String,
    members: Vec<Member>,
    inherited: usize,
    origin: Option<Arc<Interface>>,
}

impl MemberRegistry {
    /// Registry of a type without ancestors.
    pub fn new(interfaces: &[Arc<Interface>]) -> Result<Self> {
        Self::build(interfaces, &[])
    }

    /// Compose `own` interfaces on top of `ancestors`.
    pub fn build(own: &[Arc<Interface>], ancestors: &[&MemberRegistry]) -> Result<Self> {
        let mut tables: Vec<Table> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for ancestor in ancestors {
            for interface in &ancestor.interfaces {
                match index.get(interface.name()) {
                    None => {
                        index.insert(interface.name().to_string(), tables.len());
                        tables.push(Table {
                            name: interface.name().to_string(),
                            members: interface.members().to_vec(),
                            inherited: interface.members().len(),
                            origin: Some(interface.clone()),
                        });
                    }
                    Some(&i) if tables[i].members == interface.members() => {}
                    Some(_) => {
                        return Err(Error::declaration(format!(
                            "interface {} is inherited with two different definitions",
                            interface.name()
                        )));
                    }
                }
            }
        }

        let mut own_names = HashSet::new();
        for interface in own {
            let name = interface.name();
            if STANDARD_INTERFACES.contains(&name) {
                return Err(Error::declaration(format!(
                    "interface {name} is provided by the runtime"
                )));
            }
            if !own_names.insert(name) {
                return Err(Error::declaration(format!("interface {name} is listed twice")));
            }

            let i = match index.get(name) {
                Some(&i) => i,
                None => {
                    index.insert(name.to_string(), tables.len());
                    tables.push(Table {
                        name: name.to_string(),
                        members: Vec::new(),
                        inherited: 0,
                        origin: Some(interface.clone()),
                    });
                    tables.len() - 1
                }
            };
            let table = &mut tables[i];

            for decl in interface.overrides() {
                let inherited = table.members[..table.inherited]
                    .iter()
                    .find(|m| m.local_name() == decl.local_name)
                    .ok_or_else(|| {
                        Error::declaration(format!(
                            "{name}.{} overrides nothing inherited",
                            decl.local_name
                        ))
                    })?;
                decl.check_against(name, inherited)?;
            }

            for member in interface.members() {
                let clash = table.members.iter().find(|m| {
                    m.remote_name() == member.remote_name() || m.local_name() == member.local_name()
                });
                if let Some(existing) = clash {
                    return Err(Error::declaration(format!(
                        "{name}.{} redefines {} {} without an explicit override",
                        member.local_name(),
                        existing.kind(),
                        existing.remote_name()
                    )));
                }
                table.members.push(member.clone());
            }
        }

        let mut registry = Self::default();
        for table in tables {
            let interface = match table.origin {
                Some(origin) if origin.members() == table.members.as_slice() => origin,
                _ => Arc::new(Interface::composed(table.name, table.members)),
            };
            registry.insert(interface)?;
        }

        debug!(
            interfaces = registry.interfaces.len(),
            members = registry.by_local.len(),
            "Member registry built"
        );
        Ok(registry)
    }

    fn insert(&mut self, interface: Arc<Interface>) -> Result<()> {
        for member in interface.members() {
            let previous = self.by_local.insert(
                member.local_name().to_string(),
                (interface.name().to_string(), member.clone()),
            );
            if let Some((other, _)) = previous {
                return Err(Error::declaration(format!(
                    "local name {} is declared by both {other} and {}",
                    member.local_name(),
                    interface.name()
                )));
            }
            self.by_remote.insert(
                (interface.name().to_string(), member.remote_name().to_string()),
                member.clone(),
            );
        }
        self.interfaces.push(interface);
        Ok(())
    }

    pub fn interfaces(&self) -> &[Arc<Interface>] {
        &self.interfaces
    }

    pub fn interface(&self, name: &str) -> Option<&Arc<Interface>> {
        self.interfaces.iter().find(|i| i.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn member(&self, interface: &str, remote_name: &str) -> Option<&Member> {
        self.by_remote
            .get(&(interface.to_string(), remote_name.to_string()))
    }

    pub fn method(&self, interface: &str, remote_name: &str) -> Option<&Arc<MethodDecl>> {
        match self.member(interface, remote_name)? {
            Member::Method(decl) => Some(decl),
            _ => None,
        }
    }

    pub fn property(&self, interface: &str, remote_name: &str) -> Option<&Arc<PropertyDecl>> {
        match self.member(interface, remote_name)? {
            Member::Property(decl) => Some(decl),
            _ => None,
        }
    }

    pub fn signal(&self, interface: &str, remote_name: &str) -> Option<&Arc<SignalDecl>> {
        match self.member(interface, remote_name)? {
            Member::Signal(decl) => Some(decl),
            _ => None,
        }
    }

    /// Interface name and member for a local name.
    pub fn local(&self, local_name: &str) -> Option<(&str, &Member)> {
        self.by_local
            .get(local_name)
            .map(|(interface, member)| (interface.as_str(), member))
    }

    /// Method by local name, or [`Error::UnknownMember`].
    pub fn local_method(&self, local_name: &str) -> Result<(&str, &Arc<MethodDecl>)> {
        match self.local(local_name) {
            Some((interface, Member::Method(decl))) => Ok((interface, decl)),
            _ => Err(Error::UnknownMember(format!("method {local_name}"))),
        }
    }

    /// Property by local name, or [`Error::UnknownMember`].
    pub fn local_property(&self, local_name: &str) -> Result<(&str, &Arc<PropertyDecl>)> {
        match self.local(local_name) {
            Some((interface, Member::Property(decl))) => Ok((interface, decl)),
            _ => Err(Error::UnknownMember(format!("property {local_name}"))),
        }
    }

    /// Signal by local name, or [`Error::UnknownMember`].
    pub fn local_signal(&self, local_name: &str) -> Result<(&str, &Arc<SignalDecl>)> {
        match self.local(local_name) {
            Some((interface, Member::Signal(decl))) => Ok((interface, decl)),
            _ => Err(Error::UnknownMember(format!("signal {local_name}"))),
        }
    }

    pub fn remote_to_local(&self, interface: &str, remote_name: &str) -> Option<&str> {
        self.member(interface, remote_name).map(Member::local_name)
    }

    /// Interface and remote name for a local name.
    pub fn local_to_remote(&self, local_name: &str) -> Option<(&str, &str)> {
        self.local(local_name)
            .map(|(interface, member)| (interface, member.remote_name()))
    }

    /// Full introspection document, standard interfaces included.
    pub fn introspect_xml(&self) -> String {
        introspect::render(self, &[])
    }

    /// Introspection document listing child nodes.
    pub fn introspect_xml_with_children(&self, children: &[String]) -> String {
        introspect::render(self, children)
    }
}
