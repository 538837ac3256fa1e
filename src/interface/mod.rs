//! Interface definitions: named sets of methods, properties and signals.
//!
//! An [`Interface`] is declared once with [`Interface::builder`] and is
//! immutable afterwards. Local object types and proxies share the same
//! `Arc<Interface>` values, so both sides agree on names and signatures.

use std::collections::HashSet;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::names;
use crate::value::{Signature, TypeTag};

/// Method flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MethodFlags(u8);

impl MethodFlags {
    pub const NONE: Self = Self(0);
    /// The caller does not wait for a reply; none is ever sent.
    pub const NO_REPLY: Self = Self(1);
    pub const DEPRECATED: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MethodFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Who may write a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    ReadOnly,
    ReadWrite,
    /// Readable by everyone, writable only by the owning local object.
    ReadWritePrivate,
}

impl Access {
    /// Whether a remote caller may write.
    pub fn remote_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }

    /// Whether the owning object may write.
    pub fn local_writable(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    fn introspection(self) -> &'static str {
        match self {
            Self::ReadWrite => "readwrite",
            Self::ReadOnly | Self::ReadWritePrivate => "read",
        }
    }
}

/// What a successful write announces through `PropertiesChanged`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChangePolicy {
    /// The new value is sent.
    EmitsValue,
    /// Only the property name is sent, as invalidated.
    EmitsInvalidation,
    #[default]
    Disabled,
}

impl ChangePolicy {
    fn introspection(self) -> &'static str {
        match self {
            Self::EmitsValue => "true",
            Self::EmitsInvalidation => "invalidates",
            Self::Disabled => "false",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method,
    Property,
    Signal,
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Method => "method",
            Self::Property => "property",
            Self::Signal => "signal",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub local_name: String,
    pub remote_name: String,
    pub input: Signature,
    pub output: Signature,
    pub arg_names: Vec<String>,
    pub result_names: Vec<String>,
    pub flags: MethodFlags,
    pub doc: Option<String>,
}

impl MethodDecl {
    pub fn no_reply(&self) -> bool {
        self.flags.contains(MethodFlags::NO_REPLY)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDecl {
    pub local_name: String,
    pub remote_name: String,
    pub type_tag: TypeTag,
    pub access: Access,
    pub change_policy: ChangePolicy,
    pub doc: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalDecl {
    pub local_name: String,
    pub remote_name: String,
    pub signature: Signature,
    pub arg_names: Vec<String>,
    pub doc: Option<String>,
}

/// A validated member declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Method(Arc<MethodDecl>),
    Property(Arc<PropertyDecl>),
    Signal(Arc<SignalDecl>),
}

impl Member {
    pub fn local_name(&self) -> &str {
        match self {
            Self::Method(m) => &m.local_name,
            Self::Property(p) => &p.local_name,
            Self::Signal(s) => &s.local_name,
        }
    }

    pub fn remote_name(&self) -> &str {
        match self {
            Self::Method(m) => &m.remote_name,
            Self::Property(p) => &p.remote_name,
            Self::Signal(s) => &s.remote_name,
        }
    }

    pub fn kind(&self) -> MemberKind {
        match self {
            Self::Method(_) => MemberKind::Method,
            Self::Property(_) => MemberKind::Property,
            Self::Signal(_) => MemberKind::Signal,
        }
    }

    pub fn doc(&self) -> Option<&str> {
        match self {
            Self::Method(m) => m.doc.as_deref(),
            Self::Property(p) => p.doc.as_deref(),
            Self::Signal(s) => s.doc.as_deref(),
        }
    }
}

/// An explicit override of an inherited member.
///
/// Only the behavior changes. Any field restated here must match the
/// inherited declaration exactly; unset fields are inherited.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideDecl {
    pub kind: MemberKind,
    pub local_name: String,
    pub remote_name: Option<String>,
    pub input: Option<Signature>,
    pub output: Option<Signature>,
    pub type_tag: Option<TypeTag>,
    pub access: Option<Access>,
    pub change_policy: Option<ChangePolicy>,
    pub doc: Option<String>,
}

impl OverrideDecl {
    /// Check the restated fields against the inherited member.
    pub fn check_against(&self, interface: &str, inherited: &Member) -> Result<()> {
        if inherited.kind() != self.kind {
            return Err(Error::declaration(format!(
                "{interface}.{} overrides a {} as a {}",
                self.local_name,
                inherited.kind(),
                self.kind
            )));
        }

        let mut diverged = Vec::new();
        if self.remote_name.as_deref().is_some_and(|n| n != inherited.remote_name()) {
            diverged.push("remote name");
        }
        if self.doc.is_some() && self.doc.as_deref() != inherited.doc() {
            diverged.push("docstring");
        }
        match inherited {
            Member::Method(m) => {
                if self.input.as_ref().is_some_and(|s| s != &m.input) {
                    diverged.push("input signature");
                }
                if self.output.as_ref().is_some_and(|s| s != &m.output) {
                    diverged.push("output signature");
                }
            }
            Member::Property(p) => {
                if self.type_tag.as_ref().is_some_and(|t| t != &p.type_tag) {
                    diverged.push("type");
                }
                if self.access.is_some_and(|a| a != p.access) {
                    diverged.push("access mode");
                }
                if self.change_policy.is_some_and(|c| c != p.change_policy) {
                    diverged.push("change policy");
                }
            }
            Member::Signal(_) => {}
        }

        if diverged.is_empty() {
            Ok(())
        } else {
            Err(Error::declaration(format!(
                "override of {interface}.{} changes its {}",
                self.local_name,
                diverged.join(", ")
            )))
        }
    }
}

/// Method declaration builder.
#[derive(Debug, Clone, Default)]
pub struct Method {
    local_name: String,
    remote_name: Option<String>,
    input: Option<String>,
    output: Option<String>,
    arg_names: Vec<String>,
    result_names: Vec<String>,
    flags: MethodFlags,
    doc: Option<String>,
    overriding: bool,
}

impl Method {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            ..Default::default()
        }
    }

    pub fn remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self
    }

    pub fn input(mut self, signature: impl Into<String>) -> Self {
        self.input = Some(signature.into());
        self
    }

    pub fn output(mut self, signature: impl Into<String>) -> Self {
        self.output = Some(signature.into());
        self
    }

    pub fn arg_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arg_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn result_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.result_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn flags(mut self, flags: MethodFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    pub fn no_reply(self) -> Self {
        self.flags(MethodFlags::NO_REPLY)
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Mark as an explicit override of an inherited method.
    pub fn overriding(mut self) -> Self {
        self.overriding = true;
        self
    }
}

/// Property declaration builder. Properties are read-only and announce
/// nothing unless told otherwise.
#[derive(Debug, Clone, Default)]
pub struct Property {
    local_name: String,
    remote_name: Option<String>,
    type_code: Option<String>,
    access: Option<Access>,
    change_policy: Option<ChangePolicy>,
    doc: Option<String>,
    overriding: bool,
}

impl Property {
    pub fn new(local_name: impl Into<String>, type_code: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            type_code: Some(type_code.into()),
            ..Default::default()
        }
    }

    /// Override of an inherited property. Nothing is restated by default.
    pub fn inherited(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            overriding: true,
            ..Default::default()
        }
    }

    pub fn remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = Some(access);
        self
    }

    pub fn read_write(self) -> Self {
        self.access(Access::ReadWrite)
    }

    pub fn private_write(self) -> Self {
        self.access(Access::ReadWritePrivate)
    }

    pub fn change_policy(mut self, policy: ChangePolicy) -> Self {
        self.change_policy = Some(policy);
        self
    }

    pub fn emits_change(self) -> Self {
        self.change_policy(ChangePolicy::EmitsValue)
    }

    pub fn emits_invalidation(self) -> Self {
        self.change_policy(ChangePolicy::EmitsInvalidation)
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn overriding(mut self) -> Self {
        self.overriding = true;
        self
    }
}

/// Signal declaration builder.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    local_name: String,
    remote_name: Option<String>,
    signature: String,
    arg_names: Vec<String>,
    doc: Option<String>,
}

impl Signal {
    pub fn new(local_name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            signature: signature.into(),
            ..Default::default()
        }
    }

    pub fn remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self
    }

    pub fn arg_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arg_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

enum Pending {
    Method(Method),
    Property(Property),
    Signal(Signal),
}

/// Builder for [`Interface`].
pub struct InterfaceBuilder {
    name: String,
    members: Vec<Pending>,
}

impl InterfaceBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.members.push(Pending::Method(method));
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.members.push(Pending::Property(property));
        self
    }

    pub fn signal(mut self, signal: Signal) -> Self {
        self.members.push(Pending::Signal(signal));
        self
    }

    /// Validate every declaration and freeze the interface.
    pub fn build(self) -> Result<Arc<Interface>> {
        names::validate_interface_name(&self.name)?;

        let mut members = Vec::new();
        let mut overrides = Vec::new();
        let mut local_names = HashSet::new();
        let mut remote_names = HashSet::new();

        for pending in self.members {
            match resolve_pending(&self.name, pending)? {
                Declared::Member(member) => {
                    if !local_names.insert(member.local_name().to_string()) {
                        return Err(duplicate(&self.name, "local", member.local_name()));
                    }
                    if !remote_names.insert(member.remote_name().to_string()) {
                        return Err(duplicate(&self.name, "remote", member.remote_name()));
                    }
                    members.push(member);
                }
                Declared::Override(decl) => {
                    if !local_names.insert(decl.local_name.clone()) {
                        return Err(duplicate(&self.name, "local", &decl.local_name));
                    }
                    overrides.push(decl);
                }
            }
        }

        Ok(Arc::new(Interface {
            name: self.name,
            members,
            overrides,
        }))
    }
}

fn duplicate(interface: &str, which: &str, name: &str) -> Error {
    Error::declaration(format!(
        "interface {interface} declares {which} member name {name} twice"
    ))
}

enum Declared {
    Member(Member),
    Override(OverrideDecl),
}

fn parse_signature(interface: &str, local: &str, text: Option<&str>) -> Result<Signature> {
    Signature::parse(text.unwrap_or_default())
        .map_err(|e| Error::declaration(format!("{interface}.{local}: {e}")))
}

fn check_names(interface: &str, local: &str, what: &str, names: &[String], expected: usize) -> Result<()> {
    if names.is_empty() || names.len() == expected {
        return Ok(());
    }
    Err(Error::declaration(format!(
        "{interface}.{local}: {} {what} names for {expected} values",
        names.len()
    )))
}

fn resolve_pending(interface: &str, pending: Pending) -> Result<Declared> {
    let local = match &pending {
        Pending::Method(m) => m.local_name.clone(),
        Pending::Property(p) => p.local_name.clone(),
        Pending::Signal(s) => s.local_name.clone(),
    };
    names::validate_member_name(&local)
        .map_err(|e| Error::declaration(format!("{interface}: {e}")))?;

    let remote_of = |explicit: Option<String>| -> Result<String> {
        let remote = explicit.unwrap_or_else(|| names::to_remote_name(&local));
        names::validate_member_name(&remote)?;
        Ok(remote)
    };

    match pending {
        Pending::Method(m) if m.overriding => Ok(Declared::Override(OverrideDecl {
            kind: MemberKind::Method,
            remote_name: m.remote_name.map(|n| remote_of(Some(n))).transpose()?,
            input: m
                .input
                .as_deref()
                .map(|s| parse_signature(interface, &local, Some(s)))
                .transpose()?,
            output: m
                .output
                .as_deref()
                .map(|s| parse_signature(interface, &local, Some(s)))
                .transpose()?,
            type_tag: None,
            access: None,
            change_policy: None,
            doc: m.doc,
            local_name: local,
        })),
        Pending::Method(m) => {
            let input = parse_signature(interface, &local, m.input.as_deref())?;
            let output = parse_signature(interface, &local, m.output.as_deref())?;
            check_names(interface, &local, "argument", &m.arg_names, input.len())?;
            check_names(interface, &local, "result", &m.result_names, output.len())?;
            Ok(Declared::Member(Member::Method(Arc::new(MethodDecl {
                remote_name: remote_of(m.remote_name)?,
                input,
                output,
                arg_names: m.arg_names,
                result_names: m.result_names,
                flags: m.flags,
                doc: m.doc,
                local_name: local,
            }))))
        }
        Pending::Property(p) if p.overriding => Ok(Declared::Override(OverrideDecl {
            kind: MemberKind::Property,
            remote_name: p.remote_name.map(|n| remote_of(Some(n))).transpose()?,
            input: None,
            output: None,
            type_tag: p.type_code.as_deref().map(TypeTag::parse).transpose()?,
            access: p.access,
            change_policy: p.change_policy,
            doc: p.doc,
            local_name: local,
        })),
        Pending::Property(p) => {
            let code = p.type_code.unwrap_or_default();
            let type_tag = TypeTag::parse(&code)
                .map_err(|e| Error::declaration(format!("{interface}.{local}: {e}")))?;
            Ok(Declared::Member(Member::Property(Arc::new(PropertyDecl {
                remote_name: remote_of(p.remote_name)?,
                type_tag,
                access: p.access.unwrap_or(Access::ReadOnly),
                change_policy: p.change_policy.unwrap_or_default(),
                doc: p.doc,
                local_name: local,
            }))))
        }
        Pending::Signal(s) => {
            let signature = parse_signature(interface, &local, Some(&s.signature))?;
            check_names(interface, &local, "argument", &s.arg_names, signature.len())?;
            Ok(Declared::Member(Member::Signal(Arc::new(SignalDecl {
                remote_name: remote_of(s.remote_name)?,
                signature,
                arg_names: s.arg_names,
                doc: s.doc,
                local_name: local,
            }))))
        }
    }
}

/// A named, immutable set of member declarations.
#[derive(Debug, PartialEq)]
pub struct Interface {
    name: String,
    members: Vec<Member>,
    overrides: Vec<OverrideDecl>,
}

impl Interface {
    pub fn builder(name: impl Into<String>) -> InterfaceBuilder {
        InterfaceBuilder {
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub(crate) fn composed(name: String, members: Vec<Member>) -> Self {
        Self {
            name,
            members,
            overrides: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Explicit overrides of inherited members.
    pub fn overrides(&self) -> &[OverrideDecl] {
        &self.overrides
    }

    pub fn member(&self, remote_name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.remote_name() == remote_name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodDecl>> {
        self.members.iter().filter_map(|m| match m {
            Member::Method(decl) => Some(decl),
            _ => None,
        })
    }

    pub fn properties(&self) -> impl Iterator<Item = &Arc<PropertyDecl>> {
        self.members.iter().filter_map(|m| match m {
            Member::Property(decl) => Some(decl),
            _ => None,
        })
    }

    pub fn signals(&self) -> impl Iterator<Item = &Arc<SignalDecl>> {
        self.members.iter().filter_map(|m| match m {
            Member::Signal(decl) => Some(decl),
            _ => None,
        })
    }

    /// Render this interface as an introspection `<interface>` element.
    pub fn introspect_xml(&self, out: &mut String) {
        out.push_str(&format!(" <interface name=\"{}\">\n", self.name));
        for method in self.methods() {
            out.push_str(&format!("  <method name=\"{}\">\n", method.remote_name));
            write_args(out, &method.input, &method.arg_names, Some("in"));
            write_args(out, &method.output, &method.result_names, Some("out"));
            if method.no_reply() {
                write_annotation(out, "org.freedesktop.DBus.Method.NoReply", "true");
            }
            if method.flags.contains(MethodFlags::DEPRECATED) {
                write_annotation(out, "org.freedesktop.DBus.Deprecated", "true");
            }
            out.push_str("  </method>\n");
        }
        for property in self.properties() {
            out.push_str(&format!(
                "  <property name=\"{}\" type=\"{}\" access=\"{}\">\n",
                property.remote_name,
                property.type_tag,
                property.access.introspection()
            ));
            write_annotation(
                out,
                "org.freedesktop.DBus.Property.EmitsChangedSignal",
                property.change_policy.introspection(),
            );
            out.push_str("  </property>\n");
        }
        for signal in self.signals() {
            out.push_str(&format!("  <signal name=\"{}\">\n", signal.remote_name));
            write_args(out, &signal.signature, &signal.arg_names, None);
            out.push_str("  </signal>\n");
        }
        out.push_str(" </interface>\n");
    }
}

fn write_args(out: &mut String, signature: &Signature, names: &[String], direction: Option<&str>) {
    for (index, tag) in signature.types().iter().enumerate() {
        out.push_str("   <arg");
        if let Some(name) = names.get(index) {
            out.push_str(&format!(" name=\"{name}\""));
        }
        out.push_str(&format!(" type=\"{tag}\""));
        if let Some(direction) = direction {
            out.push_str(&format!(" direction=\"{direction}\""));
        }
        out.push_str("/>\n");
    }
}

fn write_annotation(out: &mut String, name: &str, value: &str) {
    out.push_str(&format!(
        "   <annotation name=\"{name}\" value=\"{value}\"/>\n"
    ));
}
