//! Transport abstraction.
//!
//! The runtime never touches sockets or wire bytes. Everything it needs from
//! the bus goes through [`Transport`]: method round trips, signal emission,
//! signal matches and object registration. [`MemoryBus`] is the in-process
//! implementation used for standalone setups and tests.

mod memory;

pub use memory::{MemoryBus, MemoryConnection};

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::exceptions::builtin::{ServiceUnknown, UnknownObject};
use crate::exceptions::{BusError, ErrorMap};
use crate::registry::INTROSPECTABLE_INTERFACE;
use crate::value::{decode_body, FromValue, ObjectPath, Signature, Value};

/// An outgoing or incoming method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Unique name of the caller. Filled in by the transport.
    pub sender: String,
    pub destination: String,
    pub path: ObjectPath,
    pub interface: String,
    pub member: String,
    pub signature: Signature,
    pub body: Vec<Value>,
    pub no_reply: bool,
}

impl MethodCall {
    pub fn new(
        destination: impl Into<String>,
        path: ObjectPath,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            sender: String::new(),
            destination: destination.into(),
            path,
            interface: interface.into(),
            member: member.into(),
            signature: Signature::empty(),
            body: Vec::new(),
            no_reply: false,
        }
    }

    pub fn with_body(mut self, signature: Signature, body: Vec<Value>) -> Self {
        self.signature = signature;
        self.body = body;
        self
    }

    pub fn with_no_reply(mut self, no_reply: bool) -> Self {
        self.no_reply = no_reply;
        self
    }
}

/// Outcome of a method call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Return(Vec<Value>),
    Error { name: String, message: String },
}

impl Reply {
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Error reply for a builtin bus error type.
    pub fn builtin<E: BusError>(message: impl Into<String>) -> Self {
        Self::error(E::NAME, message)
    }
}

/// A signal on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    /// Unique name of the emitter. Filled in by the transport.
    pub sender: String,
    pub path: ObjectPath,
    pub interface: String,
    pub member: String,
    pub signature: Signature,
    pub body: Vec<Value>,
}

impl SignalMessage {
    pub fn new(
        path: ObjectPath,
        interface: impl Into<String>,
        member: impl Into<String>,
        signature: Signature,
        body: Vec<Value>,
    ) -> Self {
        Self {
            sender: String::new(),
            path,
            interface: interface.into(),
            member: member.into(),
            signature,
            body,
        }
    }
}

/// Signal match rule. Unset fields match anything.
///
/// `sender` may be a unique or a well-known name; the transport resolves
/// well-known names when it delivers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    pub sender: Option<String>,
    pub path: Option<ObjectPath>,
    pub interface: Option<String>,
    pub member: Option<String>,
}

impl MatchRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn path(mut self, path: ObjectPath) -> Self {
        self.path = Some(path);
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    /// Match path, interface and member. The sender is left to the transport.
    pub fn matches(&self, signal: &SignalMessage) -> bool {
        self.path.as_ref().map_or(true, |p| p == &signal.path)
            && self.interface.as_deref().map_or(true, |i| i == signal.interface)
            && self.member.as_deref().map_or(true, |m| m == signal.member)
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec!["type='signal'".to_string()];
        if let Some(sender) = &self.sender {
            parts.push(format!("sender='{sender}'"));
        }
        if let Some(path) = &self.path {
            parts.push(format!("path='{path}'"));
        }
        if let Some(interface) = &self.interface {
            parts.push(format!("interface='{interface}'"));
        }
        if let Some(member) = &self.member {
            parts.push(format!("member='{member}'"));
        }
        f.write_str(&parts.join(","))
    }
}

/// Called for every matching signal.
pub type SignalCallback = Arc<dyn Fn(&SignalMessage) + Send + Sync>;

/// Registration that is released when dropped.
pub struct Slot {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Slot {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A slot holding nothing.
    pub fn empty() -> Self {
        Self { release: None }
    }

    /// Release now instead of on drop.
    pub fn close(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Serves method calls for one exported path.
#[async_trait]
pub trait ObjectHandler: Send + Sync {
    /// Handle a call. `None` means no reply is sent.
    async fn handle_call(&self, call: MethodCall) -> Option<Reply>;
}

/// A bus connection as seen by the runtime.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Unique name of this connection, e.g. `:1.7`.
    fn unique_name(&self) -> &str;

    /// Send a call and wait for its reply. Calls flagged `no_reply`
    /// resolve immediately with an empty return.
    async fn send_call(&self, call: MethodCall) -> Result<Reply>;

    /// Fire-and-forget signal emission.
    fn send_signal(&self, signal: SignalMessage) -> Result<()>;

    /// Subscribe to signals. The subscription ends when the slot drops.
    async fn match_signal(&self, rule: MatchRule, callback: SignalCallback) -> Result<Slot>;

    /// Serve calls for `path`. The handler is held weakly: once it is gone
    /// callers get `UnknownObject`. The registration ends when the slot drops.
    async fn export(&self, path: ObjectPath, handler: Weak<dyn ObjectHandler>) -> Result<Slot>;

    /// Fetch the introspection document of a remote object.
    async fn introspect(&self, service: &str, path: &ObjectPath) -> Result<String> {
        let call = MethodCall::new(service, path.clone(), INTROSPECTABLE_INTERFACE, "Introspect");
        match self.send_call(call).await? {
            Reply::Return(body) => {
                let value = decode_body(body, &Signature::parse("s")?)?;
                String::from_value(value)
            }
            Reply::Error { name, message } => Err(reply_error(
                &ErrorMap::global(),
                service,
                path,
                &name,
                &message,
            )),
        }
    }
}

/// Map an error reply to the caller-side error.
///
/// Missing services and objects become [`Error::UnknownObject`]; everything
/// else goes through the exception map.
pub fn reply_error(
    errors: &ErrorMap,
    service: &str,
    path: &ObjectPath,
    name: &str,
    message: &str,
) -> Error {
    if name == UnknownObject::NAME || name == ServiceUnknown::NAME {
        return Error::UnknownObject {
            service: service.to_string(),
            path: path.to_string(),
        };
    }
    errors.error_from_reply(name, message)
}
