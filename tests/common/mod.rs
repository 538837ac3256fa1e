//! Shared fixture for integration tests.
//!
//! One test object type served on an in-memory bus, and a proxy to it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rebus::exceptions::builtin::FileExists;
use rebus::interface::{Interface, Method, Property, Signal};
use rebus::object::ObjectTypeBuilder;
use rebus::{
    current_call, Config, ErrorMap, HandlerError, LocalObject, MemoryBus, MemoryConnection, ObjectPath,
    ObjectType, Proxy,
};

pub const IFACE: &str = "org.test.test";
pub const SERVICE: &str = "org.test.service";
pub const WAIT: Duration = Duration::from_millis(500);

/// Settings shared by every harness.
pub fn config() -> Config {
    Config::for_test()
}

rebus::bus_error! {
    /// Registered on both ends of the bus.
    pub CustomError => "org.example.Error"
}

rebus::bus_error! {
    /// Registered only on the serving side.
    pub UnmappedError => "org.example.Nothing"
}

/// Plain error with no bus name.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PlainError(pub String);

pub struct TestState {
    pub test_property: Mutex<String>,
    pub private: Mutex<i64>,
    pub no_reply_calls: AtomicUsize,
}

impl Default for TestState {
    fn default() -> Self {
        Self {
            test_property: Mutex::new("test_property".to_string()),
            private: Mutex::new(0),
            no_reply_calls: AtomicUsize::new(0),
        }
    }
}

pub fn path() -> ObjectPath {
    ObjectPath::new("/test").unwrap()
}

pub fn test_interface() -> Arc<Interface> {
    Interface::builder(IFACE)
        .method(Method::new("upper").input("s").output("s"))
        .method(Method::new("get_sender").output("s"))
        .method(Method::new("test_int").output("i"))
        .method(
            Method::new("kwargs_function")
                .input("si")
                .output("s")
                .arg_names(["name", "count"]),
        )
        .method(Method::new("raise_base_exception"))
        .method(Method::new("raise_derived_exception"))
        .method(Method::new("raise_custom_error"))
        .method(Method::new("raise_and_unmap_error"))
        .method(Method::new("no_reply_method").no_reply())
        .method(Method::new("test_struct_return").output("(ss)"))
        .method(Method::new("looong_method"))
        .method(Method::new("returns_none_method"))
        .property(Property::new("test_property", "s").read_write().emits_change())
        .property(Property::new("test_property_read_only", "s"))
        .property(Property::new("test_property_private", "x").private_write().emits_change())
        .signal(Signal::new("test_signal", "ss").arg_names(["first", "second"]))
        .signal(Signal::new("empty_signal", ""))
        .build()
        .unwrap()
}

pub fn test_type_builder() -> ObjectTypeBuilder<TestState> {
    ObjectType::builder()
        .interface(test_interface())
        .method("upper", |_, (s,): (String,)| async move {
            Ok::<_, HandlerError>(s.to_uppercase())
        })
        .method("get_sender", |_, (): ()| async move {
            Ok::<_, HandlerError>(current_call().map(|call| call.sender).unwrap_or_default())
        })
        .method("test_int", |_, (): ()| async move { Ok::<_, HandlerError>(1i32) })
        .method("kwargs_function", |_, (name, count): (String, i32)| async move {
            Ok::<_, HandlerError>(name.repeat(count.max(0) as usize))
        })
        .method("raise_base_exception", |_, (): ()| async move {
            Err::<(), HandlerError>(Box::new(PlainError("base".to_string())))
        })
        .method("raise_derived_exception", |_, (): ()| async move {
            Err::<(), HandlerError>(Box::new(FileExists::new("derived")))
        })
        .method("raise_custom_error", |_, (): ()| async move {
            Err::<(), HandlerError>(Box::new(CustomError::new("custom")))
        })
        .method("raise_and_unmap_error", |_, (): ()| async move {
            Err::<(), HandlerError>(Box::new(UnmappedError::new("unmapped")))
        })
        .method("no_reply_method", |state: Arc<TestState>, (): ()| async move {
            state.no_reply_calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, HandlerError>(())
        })
        .method("test_struct_return", |_, (): ()| async move {
            Ok::<_, HandlerError>(("hello".to_string(), "world".to_string()))
        })
        .method("looong_method", |_, (): ()| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, HandlerError>(())
        })
        .method("returns_none_method", |_, (): ()| async move { Ok::<_, HandlerError>(()) })
        .getter("test_property", |s: &TestState| s.test_property.lock().unwrap().clone())
        .setter("test_property", |s: &TestState, value: String| {
            *s.test_property.lock().unwrap() = value;
            Ok(())
        })
        .getter("test_property_read_only", |_: &TestState| "read_only".to_string())
        .getter("test_property_private", |s: &TestState| *s.private.lock().unwrap())
        .private_setter("test_property_private", |s: &TestState, value: i64| {
            *s.private.lock().unwrap() = value;
            Ok(())
        })
}

pub fn test_type() -> ObjectType<TestState> {
    test_type_builder().build().unwrap()
}

/// Error map for the serving side: knows both custom errors.
pub fn server_errors() -> Arc<ErrorMap> {
    let errors = ErrorMap::new();
    errors.register::<CustomError>().unwrap();
    errors.register::<UnmappedError>().unwrap();
    Arc::new(errors)
}

/// Error map for the calling side: knows only [`CustomError`].
pub fn client_errors() -> Arc<ErrorMap> {
    let errors = ErrorMap::new();
    errors.register::<CustomError>().unwrap();
    Arc::new(errors)
}

/// An object of `ty` exported under [`SERVICE`] at [`path`], and a proxy to it.
pub struct Harness<T> {
    pub bus: MemoryBus,
    pub server: Arc<MemoryConnection>,
    pub client: Arc<MemoryConnection>,
    pub object: LocalObject<T>,
    pub proxy: Proxy,
}

pub async fn harness_for<T: Send + Sync + 'static>(ty: &ObjectType<T>, state: T) -> Harness<T> {
    let bus = MemoryBus::new();
    let server = bus.connect();
    server.request_name(SERVICE).unwrap();
    let client = bus.connect();

    let object = LocalObject::with_errors(ty, state, server_errors());
    object.export(server.clone(), path()).await.unwrap();

    let proxy = Proxy::builder(client.clone(), ty.shared_registry())
        .service(SERVICE)
        .path(path())
        .config(&config().client)
        .error_map(client_errors())
        .build()
        .unwrap();

    Harness {
        bus,
        server,
        client,
        object,
        proxy,
    }
}

pub async fn harness() -> Harness<TestState> {
    harness_for(&test_type(), TestState::default()).await
}
