//! Client-side proxies for remote objects.
//!
//! A [`Proxy`] binds a member registry to one remote identity (service
//! name and object path) and routes every method, property and signal
//! access to the right interface on the wire. Proxies are lazy: nothing
//! is sent at construction, so a missing object surfaces on first use.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tracing::{debug, warn};

use crate::changes::{PropertiesChanged, PROPERTIES_CHANGED};
use crate::config::{ClientConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::exceptions::builtin::PropertyReadOnly;
use crate::exceptions::{BusError, ErrorMap};
use crate::interface::PropertyDecl;
use crate::names;
use crate::property::{check_write, errmsg, PropertyRef, RemoteWrite, Writer};
use crate::registry::{MemberRegistry, RegistrySource, PEER_INTERFACE, PROPERTIES_INTERFACE};
use crate::signal::{subscribe_remote, ProxySignal, SignalStream};
use crate::transport::{reply_error, MatchRule, MethodCall, Reply, Transport};
use crate::utils::retry::call_backoff;
use crate::value::{
    check_body, decode_body, FromValue, IntoArgs, IntoValue, ObjectPath, Signature, TypeTag,
    Value,
};


/// Builder for [`Proxy`].
pub struct ProxyBuilder {
    transport: Arc<dyn Transport>,
    registry: Arc<MemberRegistry>,
    service: Option<String>,
    path: Option<ObjectPath>,
    timeout: Option<Option<Duration>>,
    errors: Option<Arc<ErrorMap>>,
    client: ClientConfig,
}

impl ProxyBuilder {
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn path(mut self, path: ObjectPath) -> Self {
        self.path = Some(path);
        self
    }

    /// Per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Some(timeout));
        self
    }

    /// Wait for replies without a deadline.
    pub fn no_timeout(mut self) -> Self {
        self.timeout = Some(None);
        self
    }

    /// Exception map used to rebuild remote errors. Defaults to the
    /// process-wide map.
    pub fn error_map(mut self, errors: Arc<ErrorMap>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Take defaults for anything not set explicitly from `config`.
    pub fn config(mut self, config: &ClientConfig) -> Self {
        self.client = config.clone();
        self
    }

    pub fn build(self) -> Result<Proxy> {
        let service = self
            .service
            .or(self.client.default_service.clone())
            .ok_or_else(|| Error::declaration("proxy needs a service name"))?;
        names::validate_bus_name(&service)?;
        let path = match self.path {
            Some(path) => path,
            None => ObjectPath::new(self.client.default_path.clone())?,
        };
        let timeout = self.timeout.unwrap_or_else(|| self.client.call_timeout());

        debug!(service = %service, path = %path, "Proxy created");

        Ok(Proxy {
            transport: self.transport,
            registry: self.registry,
            service,
            path,
            timeout,
            retry: self.client.retry,
            errors: self.errors.unwrap_or_else(ErrorMap::global),
        })
    }
}

/// Local stand-in for one remote object.
pub struct Proxy {
    transport: Arc<dyn Transport>,
    registry: Arc<MemberRegistry>,
    service: String,
    path: ObjectPath,
    timeout: Option<Duration>,
    retry: RetryConfig,
    errors: Arc<ErrorMap>,
}

impl RegistrySource for Proxy {
    fn registry(&self) -> &MemberRegistry {
        &self.registry
    }
}

impl Proxy {
    pub fn builder(transport: Arc<dyn Transport>, registry: Arc<MemberRegistry>) -> ProxyBuilder {
        ProxyBuilder {
            transport,
            registry,
            service: None,
            path: None,
            timeout: None,
            errors: None,
            client: ClientConfig::default(),
        }
    }

    /// Proxy with default settings.
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<MemberRegistry>,
        service: impl Into<String>,
        path: ObjectPath,
    ) -> Result<Self> {
        Self::builder(transport, registry)
            .service(service)
            .path(path)
            .build()
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn with_timeout<T>(&self, pending: impl Future<Output = Result<T>>) -> Result<T> {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, pending)
                .await
                .map_err(|_| Error::Timeout(timeout))?,
            None => pending.await,
        }
    }

    fn remote_error(&self, name: &str, message: &str) -> Error {
        reply_error(&self.errors, &self.service, &self.path, name, message)
    }

    /// One round trip; error replies become errors.
    async fn round_trip(&self, call: MethodCall, output: &Signature) -> Result<Value> {
        match self.with_timeout(self.transport.send_call(call)).await? {
            Reply::Return(body) => decode_body(body, output),
            Reply::Error { name, message } => Err(self.remote_error(&name, &message)),
        }
    }

    /// Call a method by local name.
    ///
    /// Arguments are checked against the declared input signature before
    /// anything is sent. The result follows the declared output signature:
    /// unit, the single value, or a struct of all values.
    pub async fn call(&self, local_name: &str, args: impl IntoArgs) -> Result<Value> {
        let (interface, decl) = self.registry.local_method(local_name)?;
        let body = args.into_args();
        check_body(&body, &decl.input)?;

        let call = MethodCall::new(self.service.as_str(), self.path.clone(), interface, decl.remote_name.as_str())
            .with_body(decl.input.clone(), body)
            .with_no_reply(decl.no_reply());
        debug!(
            service = %self.service,
            path = %self.path,
            interface = %interface,
            member = %decl.remote_name,
            "Calling remote method"
        );

        if decl.no_reply() {
            self.with_timeout(self.transport.send_call(call)).await?;
            return Ok(Value::unit());
        }
        self.round_trip(call, &decl.output).await
    }

    pub async fn call_typed<R: FromValue>(&self, local_name: &str, args: impl IntoArgs) -> Result<R> {
        R::from_value(self.call(local_name, args).await?)
    }

    /// [`call`](Self::call), retried with exponential backoff while the
    /// error is retryable.
    pub async fn call_with_retry(&self, local_name: &str, args: impl IntoArgs) -> Result<Value> {
        let args = &args.into_args();
        (|| async move { self.call(local_name, args.clone()).await })
            .retry(call_backoff(&self.retry))
            .when(Error::is_retryable)
            .notify(|err: &Error, delay: Duration| {
                warn!(
                    method = %local_name,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying remote call"
                );
            })
            .await
    }

    /// Accessor for a declared property.
    pub fn property(&self, local_name: &str) -> Result<ProxyProperty<'_>> {
        let (interface, decl) = self.registry.local_property(local_name)?;
        Ok(ProxyProperty {
            proxy: self,
            interface: interface.to_string(),
            decl: decl.clone(),
        })
    }

    pub async fn get_typed<V: FromValue, A>(&self, property: PropertyRef<V, A>) -> Result<V> {
        V::from_value(self.property(property.local_name())?.get().await?)
    }

    /// Remote typed write. Only compiles for publicly writable markers.
    pub async fn set_typed<V: IntoValue, A: RemoteWrite>(
        &self,
        property: PropertyRef<V, A>,
        value: V,
    ) -> Result<()> {
        let accessor = self.property(property.local_name())?;
        property.check(&accessor.decl)?;
        accessor.set(value).await
    }

    /// Every property of `interface`, keyed by remote name.
    pub async fn get_all(&self, interface: &str) -> Result<HashMap<String, Value>> {
        let call = MethodCall::new(self.service.as_str(), self.path.clone(), PROPERTIES_INTERFACE, "GetAll")
            .with_body(Signature::from_types(vec![TypeTag::Str]), vec![Value::Str(interface.to_string())]);
        let output = Signature::from_types(vec![TypeTag::Dict(
            Box::new(TypeTag::Str),
            Box::new(TypeTag::Variant),
        )]);
        let properties: HashMap<String, Value> =
            HashMap::from_value(self.round_trip(call, &output).await?)?;
        Ok(properties
            .into_iter()
            .map(|(name, value)| (name, value.unwrap_variant()))
            .collect())
    }

    /// Every property of every interface, keyed by local name. Names the
    /// registry does not declare are dropped.
    pub async fn get_all_local_names(&self) -> Result<HashMap<String, Value>> {
        let mut all = HashMap::new();
        for interface in self.registry.interfaces() {
            if interface.properties().next().is_none() {
                continue;
            }
            for (remote, value) in self.get_all(interface.name()).await? {
                match self.registry.property(interface.name(), &remote) {
                    Some(decl) => {
                        all.insert(decl.local_name.clone(), value);
                    }
                    None => debug!(interface = %interface.name(), property = %remote, "Skipping undeclared property"),
                }
            }
        }
        Ok(all)
    }

    /// Endpoint for a declared signal.
    pub fn signal(&self, local_name: &str) -> Result<ProxySignal> {
        let (interface, decl) = self.registry.local_signal(local_name)?;
        Ok(ProxySignal::new(
            self.transport.clone(),
            self.service.clone(),
            self.path.clone(),
            interface.to_string(),
            decl.clone(),
        ))
    }

    /// Change notifications of the remote object.
    pub async fn properties_changed(&self) -> Result<SignalStream<PropertiesChanged>> {
        let rule = MatchRule::new()
            .sender(self.service.clone())
            .path(self.path.clone())
            .interface(PROPERTIES_INTERFACE)
            .member(PROPERTIES_CHANGED);
        subscribe_remote(self.transport.as_ref(), rule, |message| {
            PropertiesChanged::from_body(message.body.clone())
        })
        .await
    }

    /// Introspection document of the remote object.
    pub async fn introspect(&self) -> Result<String> {
        self.with_timeout(self.transport.introspect(&self.service, &self.path))
            .await
    }

    /// Liveness check through `org.freedesktop.DBus.Peer.Ping`.
    pub async fn ping(&self) -> Result<()> {
        let call = MethodCall::new(self.service.as_str(), self.path.clone(), PEER_INTERFACE, "Ping");
        self.round_trip(call, &Signature::empty()).await.map(|_| ())
    }
}

/// Remote accessor for one property. Every operation is a round trip.
pub struct ProxyProperty<'a> {
    proxy: &'a Proxy,
    interface: String,
    decl: Arc<PropertyDecl>,
}

impl ProxyProperty<'_> {
    pub fn decl(&self) -> &PropertyDecl {
        &self.decl
    }

    pub async fn get(&self) -> Result<Value> {
        let proxy = self.proxy;
        let call = MethodCall::new(proxy.service.as_str(), proxy.path.clone(), PROPERTIES_INTERFACE, "Get")
            .with_body(
                Signature::from_types(vec![TypeTag::Str, TypeTag::Str]),
                vec![
                    Value::Str(self.interface.clone()),
                    Value::Str(self.decl.remote_name.clone()),
                ],
            );
        let value = proxy
            .round_trip(call, &Signature::from_types(vec![TypeTag::Variant]))
            .await?;
        Ok(value.unwrap_variant())
    }

    /// Write as a remote caller. Read-only and private properties fail
    /// with [`Error::Access`] without sending anything.
    pub async fn set(&self, value: impl IntoValue) -> Result<()> {
        let value = value.into_value();
        check_write(&self.decl, Writer::Remote, &value)?;

        let proxy = self.proxy;
        let call = MethodCall::new(proxy.service.as_str(), proxy.path.clone(), PROPERTIES_INTERFACE, "Set")
            .with_body(
                Signature::from_types(vec![TypeTag::Str, TypeTag::Str, TypeTag::Variant]),
                vec![
                    Value::Str(self.interface.clone()),
                    Value::Str(self.decl.remote_name.clone()),
                    value.variant(),
                ],
            );
        match proxy.round_trip(call, &Signature::empty()).await {
            Err(e) if e.remote_name() == Some(PropertyReadOnly::NAME) => {
                Err(Error::access(&self.decl.local_name, errmsg::READ_ONLY))
            }
            other => other.map(|_| ()),
        }
    }
}
