//! rebus-demo: in-process round trip
//!
//! Serves a small counter object on an in-memory bus and drives it through
//! a proxy: a method call, a property write with its change event, a
//! signal, and a mapped remote error.
//!
//! ## Configuration
//! - REBUS_CONFIG: Path to a YAML config file (optional)
//! - REBUS_LOG: Log filter (default: info)
//! - REBUS__CLIENT__CALL_TIMEOUT_MS etc.: Individual overrides

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use rebus::bootstrap::init_tracing;
use rebus::exceptions::builtin::InvalidArgs;
use rebus::interface::{Interface, Method, Property, Signal};
use rebus::{
    Config, ErrorMap, HandlerError, LocalObject, MemoryBus, ObjectPath, ObjectType, Proxy,
};

const SERVICE: &str = "org.rebus.Demo";
const INTERFACE: &str = "org.rebus.Counter";

#[derive(Default)]
struct Counter {
    value: AtomicI64,
}

fn counter_type() -> rebus::Result<ObjectType<Counter>> {
    let interface = Interface::builder(INTERFACE)
        .method(Method::new("add").input("x").output("x").arg_names(["amount"]))
        .property(Property::new("value", "x").read_write().emits_change())
        .signal(Signal::new("overflowed", "x"))
        .build()?;

    ObjectType::builder()
        .interface(interface)
        .method("add", |counter: Arc<Counter>, (amount,): (i64,)| async move {
            if amount < 0 {
                return Err::<i64, HandlerError>(Box::new(InvalidArgs::new(
                    "amount must not be negative",
                )));
            }
            Ok(counter.value.fetch_add(amount, Ordering::SeqCst) + amount)
        })
        .getter("value", |counter: &Counter| counter.value.load(Ordering::SeqCst))
        .setter("value", |counter: &Counter, value: i64| {
            counter.value.store(value, Ordering::SeqCst);
            Ok(())
        })
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = Config::load(None)?;
    let errors = Arc::new(ErrorMap::from_config(&config.errors)?);

    let bus = MemoryBus::new();
    let server = bus.connect();
    server.request_name(SERVICE)?;

    let ty = counter_type()?;
    let counter = LocalObject::with_errors(&ty, Counter::default(), errors.clone());
    let path = ObjectPath::new("/org/rebus/counter")?;
    counter.export(server, path.clone()).await?;
    info!(service = SERVICE, path = %path, "rebus-demo object exported");

    let proxy = Proxy::builder(bus.connect(), ty.shared_registry())
        .config(&config.client)
        .service(SERVICE)
        .path(path)
        .error_map(errors)
        .build()?;

    let mut changes = proxy.properties_changed().await?;
    let mut overflows = proxy.signal("overflowed")?.catch().await?;
    let receive_timeout = config.signals.receive_timeout();

    let total: i64 = proxy.call_typed("add", (5i64,)).await?;
    info!(total, "Called add");

    proxy.property("value")?.set(i64::MAX).await?;
    let event = changes.recv_timeout(receive_timeout).await?;
    info!(interface = %event.interface, changed = ?event.changed, "Observed property change");

    counter.signal("overflowed")?.emit(i64::MAX)?;
    let payload = overflows.recv_timeout(receive_timeout).await?;
    info!(payload = ?payload, "Observed signal");

    match proxy.call("add", (-1i64,)).await {
        Ok(value) => warn!(value = ?value, "Negative add unexpectedly succeeded"),
        Err(e) => info!(error = %e, remote = ?e.remote_name(), "Remote error mapped"),
    }

    Ok(())
}
