use super::*;
use crate::exceptions::builtin::{InvalidArgs, PropertyReadOnly, UnknownMethod, UnknownObject};
use crate::exceptions::BusError;
use crate::interface::{Method, Property, Signal};
use crate::property::{PrivateWrite, ReadWrite};
use crate::transport::{MemoryBus, MemoryConnection, MethodCall, Reply};
use crate::value::Signature;
use std::time::Duration;

const IFACE: &str = "org.test.test";
const WAIT: Duration = Duration::from_millis(500);

#[derive(Default)]
struct State {
    name: Mutex<String>,
    count: Mutex<i64>,
}

fn interface() -> Arc<Interface> {
    Interface::builder(IFACE)
        .method(Method::new("upper").input("s").output("s"))
        .method(Method::new("get_sender").output("s"))
        .method(Method::new("fail"))
        .property(Property::new("name", "s").read_write().emits_change())
        .property(Property::new("count", "x").private_write().emits_change())
        .property(Property::new("fixed", "x"))
        .property(Property::new("quiet", "s").read_write())
        .signal(Signal::new("renamed", "s"))
        .build()
        .unwrap()
}

fn builder() -> ObjectTypeBuilder<State> {
    ObjectType::builder()
        .interface(interface())
        .method("upper", |_, (s,): (String,)| async move {
            Ok::<_, HandlerError>(s.to_uppercase())
        })
        .method("get_sender", |_, (): ()| async move {
            Ok::<_, HandlerError>(current_call().map(|c| c.sender).unwrap_or_default())
        })
        .method("fail", |_, (): ()| async move {
            Err::<(), HandlerError>(Box::new(InvalidArgs::new("no good")))
        })
        .getter("name", |s: &State| s.name.lock().unwrap().clone())
        .setter("name", |s: &State, v: String| {
            *s.name.lock().unwrap() = v;
            Ok(())
        })
        .getter("count", |s: &State| *s.count.lock().unwrap())
        .private_setter("count", |s: &State, v: i64| {
            *s.count.lock().unwrap() = v;
            Ok(())
        })
        .getter("fixed", |_: &State| 7i64)
        .getter("quiet", |_: &State| String::from("shh"))
        .setter("quiet", |_: &State, _: String| Ok(()))
}

fn object_type() -> ObjectType<State> {
    builder().build().unwrap()
}

fn object() -> LocalObject<State> {
    LocalObject::with_errors(&object_type(), State::default(), Arc::new(ErrorMap::new()))
}

fn path() -> ObjectPath {
    ObjectPath::new("/test").unwrap()
}

struct Exported {
    _bus: MemoryBus,
    server: Arc<MemoryConnection>,
    client: Arc<MemoryConnection>,
    object: LocalObject<State>,
}

async fn exported() -> Exported {
    let bus = MemoryBus::new();
    let server = bus.connect();
    let client = bus.connect();
    let object = object();
    object.export(server.clone(), path()).await.unwrap();
    Exported {
        _bus: bus,
        server,
        client,
        object,
    }
}

impl Exported {
    async fn call(&self, interface: &str, member: &str, signature: &str, body: Vec<Value>) -> Reply {
        let call = MethodCall::new(self.server.unique_name(), path(), interface, member)
            .with_body(Signature::parse(signature).unwrap(), body);
        self.client.send_call(call).await.unwrap()
    }
}

fn s(value: &str) -> Value {
    Value::Str(value.to_string())
}

fn error_name(reply: &Reply) -> &str {
    match reply {
        Reply::Error { name, .. } => name,
        other => panic!("expected an error reply, got {other:?}"),
    }
}

#[test]
fn test_missing_method_binding() {
    let err = ObjectType::<State>::builder()
        .interface(interface())
        .build()
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("method upper has no implementation"));
    assert!(message.contains("property name has no getter"));
}

#[test]
fn test_object_type_debug() {
    let ty = builder().build().unwrap();
    assert_eq!(format!("{ty:?}"), "ObjectType { interfaces: 1, .. }");
}

#[test]
fn test_binding_undeclared_member() {
    let err = builder()
        .method("lower", |_, (): ()| async move { Ok::<_, HandlerError>(()) })
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("lower is not a declared method"));
}

#[test]
fn test_setter_must_match_access() {
    let err = builder()
        .setter("fixed", |_: &State, _: i64| Ok(()))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("read-only but has a setter"));

    let wrong_kind = ObjectType::<State>::builder()
        .interface(
            Interface::builder(IFACE)
                .property(Property::new("count", "x").private_write())
                .build()
                .unwrap(),
        )
        .getter("count", |_: &State| 0i64)
        .setter("count", |_: &State, _: i64| Ok(()))
        .build()
        .unwrap_err();
    assert!(wrong_kind.to_string().contains("private but has a public setter"));
}

#[test]
fn test_inherited_binding_needs_override() {
    let parent = object_type();
    let err = ObjectType::builder()
        .inherit(&parent)
        .method("upper", |_, (s,): (String,)| async move { Ok::<_, HandlerError>(s) })
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("use an override"));

    let err = ObjectType::<State>::builder()
        .interface(interface())
        .override_method("upper", |_, (s,): (String,)| async move { Ok::<_, HandlerError>(s) })
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("not inherited"));
}

#[tokio::test]
async fn test_override_replaces_behavior() {
    let parent = object_type();
    let child = ObjectType::builder()
        .inherit(&parent)
        .override_method("upper", |_, (s,): (String,)| async move {
            Ok::<_, HandlerError>(format!("<{s}>"))
        })
        .build()
        .unwrap();

    let object = LocalObject::new(&child, State::default());
    let value: String = object.call_local_typed("upper", ("abc",)).await.unwrap();
    assert_eq!(value, "<abc>");

    let original = LocalObject::new(&parent, State::default());
    let value: String = original.call_local_typed("upper", ("abc",)).await.unwrap();
    assert_eq!(value, "ABC");
}

#[tokio::test]
async fn test_inherit_from_projects_state() {
    struct Outer {
        inner: Arc<State>,
    }

    let parent = object_type();
    let extra = Interface::builder("org.example.extra")
        .method(Method::new("echo").input("s").output("s"))
        .build()
        .unwrap();
    let child = ObjectType::<Outer>::builder()
        .inherit_from(&parent, |outer: &Outer| outer.inner.clone())
        .interface(extra)
        .method("echo", |_, (s,): (String,)| async move { Ok::<_, HandlerError>(s) })
        .build()
        .unwrap();

    let shared = Arc::new(State::default());
    let object = LocalObject::new(&child, Outer { inner: shared.clone() });
    object.property("name").unwrap().set("projected").unwrap();
    assert_eq!(*shared.name.lock().unwrap(), "projected");
    assert_eq!(
        object.call_local("upper", ("x",)).await.unwrap(),
        s("X")
    );
    assert_eq!(object.registry().interfaces().len(), 2);
}

#[tokio::test]
async fn test_call_local_checks_arguments() {
    let object = object();
    assert!(matches!(
        object.call_local("upper", (1i32,)).await,
        Err(Error::Signature { .. })
    ));
    assert!(matches!(
        object.call_local("nope", ()).await,
        Err(Error::UnknownMember(_))
    ));
    // No bus call is in progress.
    assert_eq!(object.call_local("get_sender", ()).await.unwrap(), s(""));
}

#[tokio::test]
async fn test_call_local_handler_error() {
    let err = object().call_local("fail", ()).await.unwrap_err();
    assert_eq!(err.remote_name(), Some(InvalidArgs::NAME));
    assert!(err.downcast_remote::<InvalidArgs>().is_some());
}

#[tokio::test]
async fn test_owner_writes() {
    let object = object();
    let mut changes = object.properties_changed();

    object.property("name").unwrap().set("x").unwrap();
    let event = changes.recv_timeout(WAIT).await.unwrap();
    assert_eq!(event.interface, IFACE);
    assert_eq!(event.changed.get("Name"), Some(&s("x")));

    // Private properties accept owner writes and announce exactly once.
    object.property("count").unwrap().set(5i64).unwrap();
    let event = changes.recv_timeout(WAIT).await.unwrap();
    assert_eq!(event.changed.get("Count"), Some(&Value::Int64(5)));
    assert!(changes.try_recv().is_none());

    let err = object.property("fixed").unwrap().set(1i64).unwrap_err();
    assert!(matches!(err, Error::Access { .. }));
    assert_eq!(object.property("fixed").unwrap().get().unwrap(), Value::Int64(7));

    // Disabled change policy stays silent.
    object.property("quiet").unwrap().set("loud").unwrap();
    assert!(changes.try_recv().is_none());
}

#[tokio::test]
async fn test_typed_property_refs() {
    const NAME: PropertyRef<String, ReadWrite> = PropertyRef::new("name");
    const COUNT: PropertyRef<i64, PrivateWrite> = PropertyRef::new("count");
    const WRONG: PropertyRef<i64, ReadWrite> = PropertyRef::new("count");

    let object = object();
    object.set_typed(NAME, "typed".to_string()).unwrap();
    assert_eq!(object.get_typed(NAME).unwrap(), "typed");
    object.set_typed(COUNT, 3).unwrap();
    assert_eq!(object.get_typed(COUNT).unwrap(), 3);
    assert!(matches!(
        object.set_typed(WRONG, 1),
        Err(Error::Declaration(_))
    ));
}

#[tokio::test]
async fn test_local_signal_round_trip() {
    let object = object();
    let signal = object.signal("renamed").unwrap();
    let mut first = signal.catch();
    let mut second = object.signal("renamed").unwrap().catch();

    signal.emit("A").unwrap();
    signal.emit("B").unwrap();

    for stream in [&mut first, &mut second] {
        assert_eq!(stream.recv_timeout(WAIT).await.unwrap(), s("A"));
        assert_eq!(stream.recv_timeout(WAIT).await.unwrap(), s("B"));
    }
    assert!(matches!(object.signal("name"), Err(Error::UnknownMember(_))));
}

#[tokio::test]
async fn test_bus_method_call() {
    let bus = exported().await;
    let reply = bus.call(IFACE, "Upper", "s", vec![s("abc")]).await;
    assert_eq!(reply, Reply::Return(vec![s("ABC")]));

    let reply = bus.call(IFACE, "GetSender", "", vec![]).await;
    assert_eq!(reply, Reply::Return(vec![s(bus.client.unique_name())]));
}

#[tokio::test]
async fn test_bus_call_errors() {
    let bus = exported().await;
    let reply = bus.call(IFACE, "Upper", "i", vec![Value::Int32(1)]).await;
    assert_eq!(error_name(&reply), InvalidArgs::NAME);

    let reply = bus.call(IFACE, "Lower", "", vec![]).await;
    assert_eq!(error_name(&reply), UnknownMethod::NAME);

    let reply = bus.call("org.example.none", "Upper", "", vec![]).await;
    assert_eq!(
        error_name(&reply),
        crate::exceptions::builtin::UnknownInterface::NAME
    );

    let reply = bus.call(IFACE, "Fail", "", vec![]).await;
    assert_eq!(error_name(&reply), InvalidArgs::NAME);
}

#[tokio::test]
async fn test_bus_property_access() {
    let bus = exported().await;
    let mut changes = bus.object.properties_changed();

    let reply = bus
        .call(PROPERTIES_INTERFACE, "Set", "ssv", vec![s(IFACE), s("Name"), s("x").variant()])
        .await;
    assert_eq!(reply, Reply::Return(vec![]));
    assert_eq!(changes.recv_timeout(WAIT).await.unwrap().changed["Name"], s("x"));

    let reply = bus
        .call(PROPERTIES_INTERFACE, "Get", "ss", vec![s(IFACE), s("Name")])
        .await;
    assert_eq!(reply, Reply::Return(vec![s("x").variant()]));

    // Remote writes to private and read-only properties are refused silently.
    for name in ["Count", "Fixed"] {
        let reply = bus
            .call(
                PROPERTIES_INTERFACE,
                "Set",
                "ssv",
                vec![s(IFACE), s(name), Value::Int64(9).variant()],
            )
            .await;
        assert_eq!(error_name(&reply), PropertyReadOnly::NAME);
    }
    assert!(changes.try_recv().is_none());
    assert_eq!(*bus.object.state().count.lock().unwrap(), 0);

    let reply = bus
        .call(PROPERTIES_INTERFACE, "Set", "ssv", vec![s(IFACE), s("Name"), Value::Int32(1).variant()])
        .await;
    assert_eq!(error_name(&reply), InvalidArgs::NAME);

    let reply = bus.call(PROPERTIES_INTERFACE, "GetAll", "s", vec![s(IFACE)]).await;
    let Reply::Return(body) = reply else {
        panic!("GetAll failed");
    };
    let Value::Dict { entries, .. } = &body[0] else {
        panic!("GetAll returned {body:?}");
    };
    assert_eq!(entries.len(), 4);
}

#[tokio::test]
async fn test_bus_standard_interfaces() {
    let bus = exported().await;
    let reply = bus
        .call(crate::registry::INTROSPECTABLE_INTERFACE, "Introspect", "", vec![])
        .await;
    let Reply::Return(body) = reply else {
        panic!("Introspect failed");
    };
    assert!(body[0].as_str().unwrap().contains("<method name=\"Upper\">"));

    let reply = bus.call(crate::registry::PEER_INTERFACE, "Ping", "", vec![]).await;
    assert_eq!(reply, Reply::Return(vec![]));
}

#[tokio::test]
async fn test_signal_reaches_bus() {
    use crate::transport::MatchRule;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let bus = exported().await;
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let _slot = bus
        .client
        .match_signal(
            MatchRule::new().interface(IFACE).member("Renamed"),
            Arc::new(move |message: &SignalMessage| {
                assert_eq!(message.path.as_str(), "/test");
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

    bus.object.signal("renamed").unwrap().emit("x").unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_emit_survives_closed_export() {
    let bus = exported().await;
    let mut local = bus.object.signal("renamed").unwrap().catch();
    bus.server.close();

    bus.object.signal("renamed").unwrap().emit("x").unwrap();
    assert_eq!(local.recv_timeout(WAIT).await.unwrap(), s("x"));
}

#[tokio::test]
async fn test_unexport_and_drop() {
    let bus = exported().await;
    assert_eq!(bus.object.exported_paths(), vec![path()]);
    assert!(bus.object.unexport(&path()));
    assert!(!bus.object.unexport(&path()));

    let reply = bus.call(IFACE, "Upper", "s", vec![s("a")]).await;
    assert_eq!(error_name(&reply), UnknownObject::NAME);

    // Dropping the last handle ends the export as well.
    let other = object();
    other.export(bus.server.clone(), path()).await.unwrap();
    drop(other);
    let reply = bus.call(IFACE, "Upper", "s", vec![s("a")]).await;
    assert_eq!(error_name(&reply), UnknownObject::NAME);
}
