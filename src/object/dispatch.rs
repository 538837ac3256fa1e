//! Inbound call dispatch for exported objects.

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::ObjectInner;
use crate::error::HandlerError;
use crate::exceptions::builtin::{InvalidArgs, UnknownInterface, UnknownMethod, UnknownProperty};
use crate::property::Writer;
use crate::registry::{INTROSPECTABLE_INTERFACE, PEER_INTERFACE, PROPERTIES_INTERFACE};
use crate::transport::{MethodCall, ObjectHandler, Reply};
use crate::value::{check_body, encode_body, ObjectPath, Signature, TypeTag, Value};

tokio::task_local! {
    static CURRENT_CALL: CallInfo;
}

/// The inbound call a handler is serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    /// Unique name of the caller.
    pub sender: String,
    pub path: ObjectPath,
    pub interface: String,
    pub member: String,
}

/// The call being served by the current task, if any.
///
/// Only set while a method handler runs for a bus call; direct local calls
/// see `None`.
pub fn current_call() -> Option<CallInfo> {
    CURRENT_CALL.try_with(Clone::clone).ok()
}

#[async_trait]
impl<T: Send + Sync + 'static> ObjectHandler for ObjectInner<T> {
    async fn handle_call(&self, call: MethodCall) -> Option<Reply> {
        let no_reply = call.no_reply;
        debug!(
            sender = %call.sender,
            path = %call.path,
            interface = %call.interface,
            member = %call.member,
            "Dispatching call"
        );

        let reply = match call.interface.as_str() {
            PROPERTIES_INTERFACE => self.dispatch_properties(call),
            INTROSPECTABLE_INTERFACE if call.member == "Introspect" => {
                Reply::Return(vec![Value::Str(self.ty.registry().introspect_xml())])
            }
            PEER_INTERFACE if call.member == "Ping" => Reply::Return(Vec::new()),
            _ => self.dispatch_method(call).await,
        };

        if no_reply {
            None
        } else {
            Some(reply)
        }
    }
}

fn properties_signature(member: &str) -> Option<Signature> {
    match member {
        "Get" => Some(Signature::from_types(vec![TypeTag::Str, TypeTag::Str])),
        "Set" => Some(Signature::from_types(vec![TypeTag::Str, TypeTag::Str, TypeTag::Variant])),
        "GetAll" => Some(Signature::from_types(vec![TypeTag::Str])),
        _ => None,
    }
}

impl<T: Send + Sync + 'static> ObjectInner<T> {
    async fn dispatch_method(&self, call: MethodCall) -> Reply {
        let registry = self.ty.registry();
        if registry.interface(&call.interface).is_none() {
            return Reply::builtin::<UnknownInterface>(format!(
                "Unknown interface '{}'",
                call.interface
            ));
        }
        let Some(decl) = registry.method(&call.interface, &call.member) else {
            return Reply::builtin::<UnknownMethod>(format!(
                "Unknown method '{}' on interface '{}'",
                call.member, call.interface
            ));
        };
        if let Err(e) = check_body(&call.body, &decl.input) {
            return Reply::builtin::<InvalidArgs>(e.to_string());
        }
        let Some(handler) = self.ty.inner.bindings.methods.get(&decl.local_name).cloned() else {
            return Reply::builtin::<UnknownMethod>(format!(
                "Method '{}' has no implementation",
                decl.local_name
            ));
        };
        let output = decl.output.clone();
        let local_name = decl.local_name.clone();

        let info = CallInfo {
            sender: call.sender,
            path: call.path,
            interface: call.interface,
            member: call.member,
        };
        let result = CURRENT_CALL
            .scope(info, handler(self.state.clone(), call.body))
            .await;

        match result {
            Ok(value) => match encode_body(value, &output) {
                Ok(body) => Reply::Return(body),
                Err(e) => {
                    error!(method = %local_name, error = %e, "Handler result does not match its signature");
                    Reply::error(self.errors.fallback_name(), e.to_string())
                }
            },
            Err(e) => self.error_reply(&local_name, e),
        }
    }

    fn error_reply(&self, member: &str, err: HandlerError) -> Reply {
        let (name, message) = self.errors.to_reply(&err);
        debug!(member = %member, error_name = %name, "Replying with error");
        Reply::error(name, message)
    }

    fn dispatch_properties(&self, call: MethodCall) -> Reply {
        let Some(expected) = properties_signature(&call.member) else {
            return Reply::builtin::<UnknownMethod>(format!(
                "Unknown method '{}' on interface '{PROPERTIES_INTERFACE}'",
                call.member
            ));
        };
        if let Err(e) = check_body(&call.body, &expected) {
            return Reply::builtin::<InvalidArgs>(e.to_string());
        }

        let mut args = call.body.into_iter();
        let interface = args.next().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();

        if call.member == "GetAll" {
            return self.get_all(&interface);
        }

        let name = args.next().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
        let Some(decl) = self.ty.registry().property(&interface, &name) else {
            return Reply::builtin::<UnknownProperty>(format!(
                "Unknown property '{name}' on interface '{interface}'"
            ));
        };

        if call.member == "Get" {
            return match self.read_property(decl) {
                Ok(value) => Reply::Return(vec![value.variant()]),
                Err(e) => self.error_reply(&decl.local_name, Box::new(e)),
            };
        }

        let value = args.next().map_or_else(Value::unit, Value::unwrap_variant);
        match self.write_property(&interface, decl, value, Writer::Remote) {
            Ok(()) => Reply::Return(Vec::new()),
            Err(e) => {
                warn!(property = %decl.local_name, sender = %call.sender, error = %e, "Remote property write refused");
                self.error_reply(&decl.local_name, Box::new(e))
            }
        }
    }

    fn get_all(&self, interface: &str) -> Reply {
        let Some(found) = self.ty.registry().interface(interface) else {
            return Reply::builtin::<UnknownInterface>(format!(
                "Unknown interface '{interface}'"
            ));
        };
        let mut entries = Vec::new();
        for decl in found.properties() {
            match self.read_property(decl) {
                Ok(value) => entries.push((Value::Str(decl.remote_name.clone()), value.variant())),
                Err(e) => return self.error_reply(&decl.local_name, Box::new(e)),
            }
        }
        Reply::Return(vec![Value::Dict {
            key: TypeTag::Str,
            value: TypeTag::Variant,
            entries,
        }])
    }
}
