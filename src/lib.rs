//! Rebus - declarative remote objects over a message bus
//!
//! Interfaces are declared once and shared by both sides of the bus. A
//! [`LocalObject`] binds them to Rust state and serves them; a [`Proxy`]
//! drives a remote object through the same declarations. Methods,
//! properties and signals are addressed by local names and translated to
//! their remote names on the wire, and remote errors are rebuilt as local
//! error types through an [`ErrorMap`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rebus::{HandlerError, Interface, LocalObject, Method, MemoryBus, ObjectPath, ObjectType, Proxy};
//!
//! # async fn demo() -> rebus::Result<()> {
//! let interface = Interface::builder("org.example.Echo")
//!     .method(Method::new("upper").input("s").output("s"))
//!     .build()?;
//! let echo: ObjectType<()> = ObjectType::builder()
//!     .interface(interface)
//!     .method("upper", |_, (s,): (String,)| async move {
//!         Ok::<_, HandlerError>(s.to_uppercase())
//!     })
//!     .build()?;
//!
//! let bus = MemoryBus::new();
//! let server = bus.connect();
//! server.request_name("org.example.echo")?;
//! let object = LocalObject::new(&echo, ());
//! object.export(server, ObjectPath::new("/echo")?).await?;
//!
//! let proxy = Proxy::new(
//!     bus.connect(),
//!     echo.shared_registry(),
//!     "org.example.echo",
//!     ObjectPath::new("/echo")?,
//! )?;
//! let loud: String = proxy.call_typed("upper", ("hi",)).await?;
//! assert_eq!(loud, "HI");
//! # Ok(())
//! # }
//! ```

pub mod changes;
pub mod config;
pub mod error;
pub mod exceptions;
pub mod interface;
pub mod names;
pub mod object;
pub mod property;
pub mod proxy;
pub mod registry;
pub mod signal;
pub mod transport;
pub mod utils;
pub mod value;

pub use changes::{parse_properties_changed, OnUnknown, PropertiesChanged};
pub use config::Config;
pub use error::{Error, HandlerError, Result, TransportError};
pub use exceptions::{BusError, ErrorMap};
pub use interface::{Access, ChangePolicy, Interface, Method, Property, Signal};
pub use object::{current_call, CallInfo, LocalObject, LocalProperty, ObjectType};
pub use property::{PrivateWrite, PropertyRef, ReadOnly, ReadWrite};
pub use proxy::{Proxy, ProxyProperty};
pub use registry::{MemberRegistry, RegistrySource};
pub use signal::{LocalSignal, ProxySignal, SignalStream};
pub use transport::{MemoryBus, MemoryConnection, Transport};
pub use utils::bootstrap;
pub use value::{FromValue, IntoValue, ObjectPath, Signature, Value};
