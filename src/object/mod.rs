//! Local objects: a member registry with bound behavior, served on the bus.
//!
//! An [`ObjectType`] is built once per kind of object. It composes
//! interfaces and ancestor types into a [`MemberRegistry`] and binds every
//! declared method and property to Rust code. A [`LocalObject`] pairs a
//! type with one state value and can be exported on any number of
//! transports and paths at once.

mod dispatch;

pub use dispatch::{current_call, CallInfo};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::changes::{PropertiesChanged, PROPERTIES_CHANGED};
use crate::error::{Error, HandlerError, Result};
use crate::exceptions::ErrorMap;
use crate::interface::{Access, Interface, Member, PropertyDecl};
use crate::property::{check_write, LocalWrite, PropertyRef, Writer};
use crate::registry::{MemberRegistry, RegistrySource, PROPERTIES_INTERFACE};
use crate::signal::{Broadcast, LocalSignal, SignalHub, SignalStream};
use crate::transport::{ObjectHandler, SignalMessage, Slot, Transport};
use crate::value::{
    check_body, encode_body, FromArgs, FromValue, IntoArgs, IntoValue, ObjectPath, Value,
};

type MethodFn<T> = Arc<
    dyn Fn(Arc<T>, Vec<Value>) -> BoxFuture<'static, std::result::Result<Value, HandlerError>>
        + Send
        + Sync,
>;
type GetterFn<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;
type SetterFn<T> = Arc<dyn Fn(&T, Value) -> std::result::Result<(), HandlerError> + Send + Sync>;

struct Setter<T> {
    private: bool,
    apply: SetterFn<T>,
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            private: self.private,
            apply: self.apply.clone(),
        }
    }
}

struct Bindings<T> {
    methods: HashMap<String, MethodFn<T>>,
    getters: HashMap<String, GetterFn<T>>,
    setters: HashMap<String, Setter<T>>,
}

impl<T> Default for Bindings<T> {
    fn default() -> Self {
        Self {
            methods: HashMap::new(),
            getters: HashMap::new(),
            setters: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingKind {
    Method,
    Getter,
    Setter,
}

enum Binding<T> {
    Method(MethodFn<T>),
    Getter(GetterFn<T>),
    Setter(Setter<T>),
}

impl<T> Binding<T> {
    fn kind(&self) -> BindingKind {
        match self {
            Self::Method(_) => BindingKind::Method,
            Self::Getter(_) => BindingKind::Getter,
            Self::Setter(_) => BindingKind::Setter,
        }
    }
}

struct OwnBinding<T> {
    local_name: String,
    overriding: bool,
    binding: Binding<T>,
}

struct TypeInner<T> {
    registry: Arc<MemberRegistry>,
    bindings: Bindings<T>,
}

/// A declared object type with state `T`.
pub struct ObjectType<T> {
    inner: Arc<TypeInner<T>>,
}

impl<T> Clone for ObjectType<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for ObjectType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectType")
            .field("interfaces", &self.inner.registry.interfaces().len())
            .finish_non_exhaustive()
    }
}

impl<T> RegistrySource for ObjectType<T> {
    fn registry(&self) -> &MemberRegistry {
        &self.inner.registry
    }
}

impl<T: Send + Sync + 'static> ObjectType<T> {
    pub fn builder() -> ObjectTypeBuilder<T> {
        ObjectTypeBuilder {
            ancestors: Vec::new(),
            inherited: Bindings::default(),
            interfaces: Vec::new(),
            own: Vec::new(),
        }
    }
}

impl<T> ObjectType<T> {
    pub fn registry(&self) -> &MemberRegistry {
        &self.inner.registry
    }

    /// Shared handle to the registry, for building proxies of this type.
    pub fn shared_registry(&self) -> Arc<MemberRegistry> {
        self.inner.registry.clone()
    }
}

/// Builder for [`ObjectType`].
///
/// Declaration problems are collected and reported together by
/// [`build`](Self::build).
pub struct ObjectTypeBuilder<T> {
    ancestors: Vec<Arc<MemberRegistry>>,
    inherited: Bindings<T>,
    interfaces: Vec<Arc<Interface>>,
    own: Vec<OwnBinding<T>>,
}

impl<T: Send + Sync + 'static> ObjectTypeBuilder<T> {
    /// Inherit members and behavior from a type with the same state.
    pub fn inherit(mut self, parent: &ObjectType<T>) -> Self {
        self.ancestors.push(parent.inner.registry.clone());
        let parent = &parent.inner.bindings;
        for (name, f) in &parent.methods {
            self.inherited.methods.entry(name.clone()).or_insert_with(|| f.clone());
        }
        for (name, f) in &parent.getters {
            self.inherited.getters.entry(name.clone()).or_insert_with(|| f.clone());
        }
        for (name, s) in &parent.setters {
            self.inherited.setters.entry(name.clone()).or_insert_with(|| s.clone());
        }
        self
    }

    /// Inherit from a type with another state, reached through `project`.
    pub fn inherit_from<P, F>(mut self, parent: &ObjectType<P>, project: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn(&T) -> Arc<P> + Send + Sync + 'static,
    {
        self.ancestors.push(parent.inner.registry.clone());
        let project = Arc::new(project);
        let parent = &parent.inner.bindings;

        for (name, f) in &parent.methods {
            let (f, project) = (f.clone(), project.clone());
            let projected: MethodFn<T> =
                Arc::new(move |state: Arc<T>, args: Vec<Value>| f(project(&state), args));
            self.inherited.methods.entry(name.clone()).or_insert(projected);
        }
        for (name, f) in &parent.getters {
            let (f, project) = (f.clone(), project.clone());
            let projected: GetterFn<T> = Arc::new(move |state: &T| f(&project(state)));
            self.inherited.getters.entry(name.clone()).or_insert(projected);
        }
        for (name, s) in &parent.setters {
            let (apply, project) = (s.apply.clone(), project.clone());
            let projected: SetterFn<T> =
                Arc::new(move |state: &T, value: Value| apply(&project(state), value));
            self.inherited.setters.entry(name.clone()).or_insert(Setter {
                private: s.private,
                apply: projected,
            });
        }
        self
    }

    /// Add an interface declared by this type.
    pub fn interface(mut self, interface: Arc<Interface>) -> Self {
        self.interfaces.push(interface);
        self
    }

    fn bind(mut self, local_name: &str, overriding: bool, binding: Binding<T>) -> Self {
        self.own.push(OwnBinding {
            local_name: local_name.to_string(),
            overriding,
            binding,
        });
        self
    }

    fn method_fn<A, R, F, Fut>(handler: F) -> MethodFn<T>
    where
        A: FromArgs + Send + 'static,
        R: IntoValue + Send + 'static,
        F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
    {
        Arc::new(
            move |state: Arc<T>,
                  args: Vec<Value>|
                  -> BoxFuture<'static, std::result::Result<Value, HandlerError>> {
                match A::from_args(args) {
                    Ok(args) => {
                        let fut = handler(state, args);
                        Box::pin(async move { fut.await.map(IntoValue::into_value) })
                    }
                    Err(e) => Box::pin(async move { Err(Box::new(e) as HandlerError) }),
                }
            },
        )
    }

    /// Bind a declared method.
    ///
    /// `A` is the argument tuple (or `()`), `R` the result: unit for no
    /// output, the value itself for one output type, a tuple otherwise.
    pub fn method<A, R, F, Fut>(self, local_name: &str, handler: F) -> Self
    where
        A: FromArgs + Send + 'static,
        R: IntoValue + Send + 'static,
        F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
    {
        self.bind(local_name, false, Binding::Method(Self::method_fn(handler)))
    }

    /// Replace the inherited behavior of a method.
    pub fn override_method<A, R, F, Fut>(self, local_name: &str, handler: F) -> Self
    where
        A: FromArgs + Send + 'static,
        R: IntoValue + Send + 'static,
        F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
    {
        self.bind(local_name, true, Binding::Method(Self::method_fn(handler)))
    }

    fn getter_fn<V, F>(getter: F) -> GetterFn<T>
    where
        V: IntoValue,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        Arc::new(move |state: &T| getter(state).into_value())
    }

    fn setter_fn<V, F>(private: bool, setter: F) -> Setter<T>
    where
        V: FromValue,
        F: Fn(&T, V) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        Setter {
            private,
            apply: Arc::new(move |state: &T, value: Value| setter(state, V::from_value(value)?)),
        }
    }

    /// Bind the read side of a declared property.
    pub fn getter<V, F>(self, local_name: &str, getter: F) -> Self
    where
        V: IntoValue,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.bind(local_name, false, Binding::Getter(Self::getter_fn(getter)))
    }

    pub fn override_getter<V, F>(self, local_name: &str, getter: F) -> Self
    where
        V: IntoValue,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.bind(local_name, true, Binding::Getter(Self::getter_fn(getter)))
    }

    /// Bind the write side of a read-write property.
    pub fn setter<V, F>(self, local_name: &str, setter: F) -> Self
    where
        V: FromValue,
        F: Fn(&T, V) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.bind(local_name, false, Binding::Setter(Self::setter_fn(false, setter)))
    }

    /// Bind the write side of a property only the owner may write.
    pub fn private_setter<V, F>(self, local_name: &str, setter: F) -> Self
    where
        V: FromValue,
        F: Fn(&T, V) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.bind(local_name, false, Binding::Setter(Self::setter_fn(true, setter)))
    }

    /// Replace an inherited setter. The private flag is kept.
    pub fn override_setter<V, F>(self, local_name: &str, setter: F) -> Self
    where
        V: FromValue,
        F: Fn(&T, V) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        let private = self
            .inherited
            .setters
            .get(local_name)
            .is_some_and(|s| s.private);
        self.bind(local_name, true, Binding::Setter(Self::setter_fn(private, setter)))
    }

    pub fn build(self) -> Result<ObjectType<T>> {
        let ancestors: Vec<&MemberRegistry> = self.ancestors.iter().map(|r| r.as_ref()).collect();
        let registry = MemberRegistry::build(&self.interfaces, &ancestors)?;

        let mut problems = Vec::new();
        let mut bindings = self.inherited;
        let mut seen = Vec::new();

        for own in self.own {
            let name = own.local_name;
            let kind = own.binding.kind();
            if seen.contains(&(name.clone(), kind)) {
                problems.push(format!("{name} is bound twice"));
                continue;
            }
            seen.push((name.clone(), kind));

            let declared = match (kind, registry.local(&name)) {
                (BindingKind::Method, Some((_, Member::Method(_)))) => true,
                (BindingKind::Getter | BindingKind::Setter, Some((_, Member::Property(_)))) => true,
                _ => false,
            };
            if !declared {
                problems.push(format!("{name} is not a declared {}", describe(kind)));
                continue;
            }

            let inherited = match kind {
                BindingKind::Method => bindings.methods.contains_key(&name),
                BindingKind::Getter => bindings.getters.contains_key(&name),
                BindingKind::Setter => bindings.setters.contains_key(&name),
            };
            match (own.overriding, inherited) {
                (false, true) => problems.push(format!(
                    "{name} already has an inherited {}; use an override",
                    describe(kind)
                )),
                (true, false) => problems.push(format!(
                    "{name} overrides a {} that is not inherited",
                    describe(kind)
                )),
                _ => {}
            }

            match own.binding {
                Binding::Method(f) => {
                    bindings.methods.insert(name, f);
                }
                Binding::Getter(f) => {
                    bindings.getters.insert(name, f);
                }
                Binding::Setter(s) => {
                    bindings.setters.insert(name, s);
                }
            }
        }

        for interface in registry.interfaces() {
            for decl in interface.methods() {
                if !bindings.methods.contains_key(&decl.local_name) {
                    problems.push(format!("method {} has no implementation", decl.local_name));
                }
            }
            for decl in interface.properties() {
                check_property_bindings(decl, &bindings, &mut problems);
            }
        }

        if !problems.is_empty() {
            return Err(Error::declaration(problems.join("; ")));
        }

        debug!(
            interfaces = registry.interfaces().len(),
            methods = bindings.methods.len(),
            properties = bindings.getters.len(),
            "Object type built"
        );

        Ok(ObjectType {
            inner: Arc::new(TypeInner {
                registry: Arc::new(registry),
                bindings,
            }),
        })
    }
}

fn describe(kind: BindingKind) -> &'static str {
    match kind {
        BindingKind::Method => "method",
        BindingKind::Getter => "property getter",
        BindingKind::Setter => "property setter",
    }
}

fn check_property_bindings<T>(decl: &PropertyDecl, bindings: &Bindings<T>, problems: &mut Vec<String>) {
    let name = &decl.local_name;
    if !bindings.getters.contains_key(name) {
        problems.push(format!("property {name} has no getter"));
    }
    match (decl.access, bindings.setters.get(name)) {
        (Access::ReadOnly, Some(_)) => {
            problems.push(format!("property {name} is read-only but has a setter"));
        }
        (Access::ReadOnly, None) => {}
        (_, None) => problems.push(format!("property {name} is writable but has no setter")),
        (Access::ReadWrite, Some(s)) if s.private => {
            problems.push(format!("property {name} is public but has a private setter"));
        }
        (Access::ReadWritePrivate, Some(s)) if !s.private => {
            problems.push(format!("property {name} is private but has a public setter"));
        }
        _ => {}
    }
}

struct Export {
    transport: Arc<dyn Transport>,
    path: ObjectPath,
    _slot: Slot,
}

type Exports = Arc<Mutex<Vec<Export>>>;

fn lock_exports(exports: &Exports) -> MutexGuard<'_, Vec<Export>> {
    exports.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct ObjectInner<T> {
    ty: ObjectType<T>,
    state: Arc<T>,
    signals: HashMap<String, SignalHub<Value>>,
    changes: SignalHub<PropertiesChanged>,
    exports: Exports,
    errors: Arc<ErrorMap>,
}

/// One local object: a type plus state, exportable on the bus.
///
/// Clones share the object. Exports end when the last clone drops.
pub struct LocalObject<T> {
    inner: Arc<ObjectInner<T>>,
}

impl<T> Clone for LocalObject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> RegistrySource for LocalObject<T> {
    fn registry(&self) -> &MemberRegistry {
        self.inner.ty.registry()
    }
}

impl<T: Send + Sync + 'static> LocalObject<T> {
    /// Create an object that maps errors through the process-wide map.
    pub fn new(ty: &ObjectType<T>, state: T) -> Self {
        Self::with_errors(ty, state, ErrorMap::global())
    }

    pub fn with_errors(ty: &ObjectType<T>, state: T, errors: Arc<ErrorMap>) -> Self {
        let signals = ty
            .registry()
            .interfaces()
            .iter()
            .flat_map(|i| i.signals())
            .map(|decl| (decl.local_name.clone(), SignalHub::new()))
            .collect();
        Self {
            inner: Arc::new(ObjectInner {
                ty: ty.clone(),
                state: Arc::new(state),
                signals,
                changes: SignalHub::new(),
                exports: Arc::new(Mutex::new(Vec::new())),
                errors,
            }),
        }
    }

    pub fn state(&self) -> &Arc<T> {
        &self.inner.state
    }

    pub fn object_type(&self) -> &ObjectType<T> {
        &self.inner.ty
    }

    /// Serve this object at `path` on `transport`.
    ///
    /// The transport holds the object weakly; the export lasts until
    /// [`unexport`](Self::unexport) or until the last clone drops.
    pub async fn export(&self, transport: Arc<dyn Transport>, path: ObjectPath) -> Result<()> {
        let strong: Arc<dyn ObjectHandler> = self.inner.clone();
        let handler = Arc::downgrade(&strong);
        let slot = transport.export(path.clone(), handler).await?;
        info!(
            path = %path,
            connection = %transport.unique_name(),
            interfaces = self.inner.ty.registry().interfaces().len(),
            "Exported local object"
        );
        lock_exports(&self.inner.exports).push(Export {
            transport,
            path,
            _slot: slot,
        });
        Ok(())
    }

    /// Stop serving at `path`. Returns `false` if it was not exported there.
    pub fn unexport(&self, path: &ObjectPath) -> bool {
        let removed: Vec<Export> = {
            let mut exports = lock_exports(&self.inner.exports);
            let (removed, kept): (Vec<Export>, Vec<Export>) =
                exports.drain(..).partition(|e| &e.path == path);
            *exports = kept;
            removed
        };
        if removed.is_empty() {
            return false;
        }
        info!(path = %path, "Unexported local object");
        true
    }

    /// Paths this object is exported at.
    pub fn exported_paths(&self) -> Vec<ObjectPath> {
        lock_exports(&self.inner.exports)
            .iter()
            .map(|e| e.path.clone())
            .collect()
    }

    /// Call a method directly, without the bus.
    pub async fn call_local(&self, local_name: &str, args: impl IntoArgs) -> Result<Value> {
        let args = args.into_args();
        let (_, decl) = self.inner.ty.registry().local_method(local_name)?;
        check_body(&args, &decl.input)?;
        let handler = self
            .inner
            .ty
            .inner
            .bindings
            .methods
            .get(local_name)
            .cloned()
            .ok_or_else(|| Error::UnknownMember(format!("method {local_name}")))?;
        let output = decl.output.clone();

        let value = handler(self.inner.state.clone(), args)
            .await
            .map_err(|e| self.inner.handler_error(e))?;
        encode_body(value.clone(), &output)?;
        Ok(value)
    }

    pub async fn call_local_typed<R: FromValue>(
        &self,
        local_name: &str,
        args: impl IntoArgs,
    ) -> Result<R> {
        R::from_value(self.call_local(local_name, args).await?)
    }

    /// Accessor for a declared property.
    pub fn property(&self, local_name: &str) -> Result<LocalProperty<T>> {
        let (interface, decl) = self.inner.ty.registry().local_property(local_name)?;
        Ok(LocalProperty {
            object: self.inner.clone(),
            interface: interface.to_string(),
            decl: decl.clone(),
        })
    }

    pub fn get_typed<V: FromValue, A>(&self, property: PropertyRef<V, A>) -> Result<V> {
        V::from_value(self.property(property.local_name())?.get()?)
    }

    /// Owner-side typed write. Only compiles for writable markers.
    pub fn set_typed<V: IntoValue, A: LocalWrite>(
        &self,
        property: PropertyRef<V, A>,
        value: V,
    ) -> Result<()> {
        let accessor = self.property(property.local_name())?;
        property.check(&accessor.decl)?;
        accessor.set(value)
    }

    /// Endpoint for a declared signal.
    pub fn signal(&self, local_name: &str) -> Result<LocalSignal> {
        let (interface, decl) = self.inner.ty.registry().local_signal(local_name)?;
        let hub = self
            .inner
            .signals
            .get(local_name)
            .cloned()
            .ok_or_else(|| Error::UnknownMember(format!("signal {local_name}")))?;
        Ok(LocalSignal::new(
            interface.to_string(),
            decl.clone(),
            hub,
            self.inner.broadcast(),
        ))
    }

    /// Every property change made on this object from now on.
    pub fn properties_changed(&self) -> SignalStream<PropertiesChanged> {
        self.inner.changes.subscribe()
    }
}

impl<T> ObjectInner<T> {
    fn broadcast(&self) -> Broadcast {
        let exports = self.exports.clone();
        Arc::new(move |interface, member, signature, body| {
            let targets: Vec<(Arc<dyn Transport>, ObjectPath)> = lock_exports(&exports)
                .iter()
                .map(|e| (e.transport.clone(), e.path.clone()))
                .collect();

            for (transport, path) in targets {
                let message = SignalMessage::new(
                    path,
                    interface,
                    member,
                    signature.clone(),
                    body.clone(),
                );
                if let Err(e) = transport.send_signal(message) {
                    warn!(
                        connection = %transport.unique_name(),
                        interface = %interface,
                        member = %member,
                        error = %e,
                        "Signal emission failed"
                    );
                }
            }
        })
    }

    /// Turn a handler failure into the caller-facing error.
    fn handler_error(&self, err: HandlerError) -> Error {
        match err.downcast::<Error>() {
            Ok(err) => *err,
            Err(other) => {
                let (name, message) = self.errors.to_reply(&other);
                Error::Remote {
                    name,
                    message,
                    local: other,
                }
            }
        }
    }

    fn read_property(&self, decl: &PropertyDecl) -> Result<Value> {
        let getter = self
            .ty
            .inner
            .bindings
            .getters
            .get(&decl.local_name)
            .ok_or_else(|| Error::UnknownMember(format!("property {}", decl.local_name)))?;
        let value = getter(&self.state);
        if !value.conforms(&decl.type_tag) {
            return Err(Error::signature(
                decl.type_tag.to_string(),
                value.type_tag().to_string(),
            ));
        }
        Ok(value)
    }

    /// Write a property and announce the change.
    fn write_property(
        &self,
        interface: &str,
        decl: &PropertyDecl,
        value: Value,
        writer: Writer,
    ) -> Result<()> {
        check_write(decl, writer, &value)?;
        let setter = self
            .ty
            .inner
            .bindings
            .setters
            .get(&decl.local_name)
            .ok_or_else(|| Error::UnknownMember(format!("property {}", decl.local_name)))?;
        (setter.apply)(&self.state, value.clone()).map_err(|e| self.handler_error(e))?;

        debug!(interface = %interface, property = %decl.remote_name, writer = ?writer, "Property written");
        self.notify_change(interface, decl, value);
        Ok(())
    }

    fn notify_change(&self, interface: &str, decl: &PropertyDecl, value: Value) {
        use crate::interface::ChangePolicy;

        let event = match decl.change_policy {
            ChangePolicy::EmitsValue => {
                PropertiesChanged::new(interface).with_changed(decl.remote_name.clone(), value)
            }
            ChangePolicy::EmitsInvalidation => {
                PropertiesChanged::new(interface).with_invalidated(decl.remote_name.clone())
            }
            ChangePolicy::Disabled => return,
        };

        self.changes.emit(event.clone());
        let broadcast = self.broadcast();
        broadcast(
            PROPERTIES_INTERFACE,
            PROPERTIES_CHANGED,
            &PropertiesChanged::signature(),
            event.into_body(),
        );
    }
}

/// Owner-side accessor for one property.
pub struct LocalProperty<T> {
    object: Arc<ObjectInner<T>>,
    interface: String,
    decl: Arc<PropertyDecl>,
}

impl<T> LocalProperty<T> {
    pub fn decl(&self) -> &PropertyDecl {
        &self.decl
    }

    /// Direct read through the bound getter.
    pub fn get(&self) -> Result<Value> {
        self.object.read_property(&self.decl)
    }

    /// Write as the owner. Read-only properties refuse; read-write and
    /// private properties accept and announce the change.
    pub fn set(&self, value: impl IntoValue) -> Result<()> {
        self.object
            .write_property(&self.interface, &self.decl, value.into_value(), Writer::Owner)
    }
}

#[cfg(test)]
mod tests;
