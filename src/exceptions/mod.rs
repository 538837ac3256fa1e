//! Exception map: remote error names ⇄ local error types.
//!
//! Error replies travel over the bus as a name plus a message. The map
//! rebuilds a registered local type from an incoming reply, and finds
//! the remote name for an error raised by a local handler. Registration
//! happens at startup; lookups afterwards only take the read lock.

pub mod builtin;

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::config::ErrorConfig;
use crate::error::{Error, HandlerError, Result};
use crate::names;

/// Default name for local errors without a registered mapping.
pub const FALLBACK_ERROR_NAME: &str = "org.freedesktop.DBus.Error.Failed";

/// A local error type with a stable remote name.
///
/// Use [`bus_error!`](crate::bus_error) to declare one.
pub trait BusError: StdError + Send + Sync + Sized + 'static {
    /// Remote error name, e.g. `org.example.Error.NotFound`.
    const NAME: &'static str;

    fn from_message(message: String) -> Self;

    fn message(&self) -> String;
}

/// A registered local error type.
#[derive(Clone, Copy)]
pub struct ErrorType {
    type_id: TypeId,
    type_name: &'static str,
    build: fn(String) -> HandlerError,
    describe: fn(&(dyn StdError + 'static)) -> Option<String>,
}

impl ErrorType {
    fn of<E: BusError>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: type_name::<E>(),
            build: build_error::<E>,
            describe: describe_error::<E>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns `true` if this entry is the local type `E`.
    pub fn is<E: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    /// Construct the local error carrying `message`.
    pub fn build(&self, message: impl Into<String>) -> HandlerError {
        (self.build)(message.into())
    }
}

impl std::fmt::Debug for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorType")
            .field("type_name", &self.type_name)
            .finish()
    }
}

fn build_error<E: BusError>(message: String) -> HandlerError {
    Box::new(E::from_message(message))
}

fn describe_error<E: BusError>(err: &(dyn StdError + 'static)) -> Option<String> {
    err.downcast_ref::<E>().map(BusError::message)
}

struct Entry {
    error_type: ErrorType,
    reserved: bool,
}

struct Inner {
    by_name: HashMap<String, Entry>,
    by_type: HashMap<TypeId, String>,
}

impl Inner {
    fn insert_reserved<E: BusError>(&mut self) {
        self.insert(E::NAME.to_string(), ErrorType::of::<E>(), true);
    }

    fn insert(&mut self, name: String, error_type: ErrorType, reserved: bool) {
        if let Some(previous) = self.by_name.get(&name) {
            self.by_type.remove(&previous.error_type.type_id);
        }
        self.by_type.insert(error_type.type_id, name.clone());
        self.by_name.insert(
            name,
            Entry {
                error_type,
                reserved,
            },
        );
    }
}

/// Process-wide table translating between remote error names and local types.
pub struct ErrorMap {
    inner: RwLock<Inner>,
    fallback_name: String,
}

impl Default for ErrorMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorMap {
    /// Create a map holding only the reserved bus errors.
    pub fn new() -> Self {
        Self::with_fallback(FALLBACK_ERROR_NAME)
    }

    /// Create a map with a custom name for unmapped local errors.
    pub fn with_fallback(fallback_name: impl Into<String>) -> Self {
        let mut inner = Inner {
            by_name: HashMap::new(),
            by_type: HashMap::new(),
        };
        builtin::reserve_all(&mut inner);
        Self {
            inner: RwLock::new(inner),
            fallback_name: fallback_name.into(),
        }
    }

    /// Create a map from configuration. An invalid fallback name is a
    /// declaration error.
    pub fn from_config(config: &ErrorConfig) -> Result<Self> {
        names::validate_error_name(&config.fallback_name)?;
        Ok(Self::with_fallback(config.fallback_name.clone()))
    }

    /// The process-wide map.
    pub fn global() -> Arc<ErrorMap> {
        static GLOBAL: OnceLock<Arc<ErrorMap>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ErrorMap::new())).clone()
    }

    pub fn fallback_name(&self) -> &str {
        &self.fallback_name
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `E` under its remote name.
    ///
    /// Fails if the name is missing or malformed, reserved by the bus, or
    /// already registered to a different type. Registering the same type
    /// twice is a no-op.
    pub fn register<E: BusError>(&self) -> Result<()> {
        let name = checked_name::<E>()?;
        let mut inner = self.write();
        if let Some(existing) = inner.by_name.get(name) {
            if existing.error_type.is::<E>() {
                return Ok(());
            }
            if existing.reserved {
                return Err(reserved_error(name));
            }
            return Err(Error::declaration(format!(
                "error name {name} is already registered to {}",
                existing.error_type.type_name
            )));
        }
        inner.insert(name.to_string(), ErrorType::of::<E>(), false);
        debug!(name = %name, error_type = type_name::<E>(), "Registered error mapping");
        Ok(())
    }

    /// Register `E`, replacing any existing non-reserved mapping of its name.
    pub fn replace<E: BusError>(&self) -> Result<()> {
        let name = checked_name::<E>()?;
        let mut inner = self.write();
        if inner.by_name.get(name).is_some_and(|e| e.reserved) {
            return Err(reserved_error(name));
        }
        inner.insert(name.to_string(), ErrorType::of::<E>(), false);
        debug!(name = %name, error_type = type_name::<E>(), "Replaced error mapping");
        Ok(())
    }

    /// Remove a mapping. Reserved names cannot be removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut inner = self.write();
        match inner.by_name.get(name) {
            Some(entry) if !entry.reserved => {
                let type_id = entry.error_type.type_id;
                inner.by_name.remove(name);
                inner.by_type.remove(&type_id);
                true
            }
            _ => false,
        }
    }

    /// Local type registered for a remote name.
    pub fn resolve(&self, name: &str) -> Option<ErrorType> {
        self.read().by_name.get(name).map(|entry| entry.error_type)
    }

    /// Remote name registered for the local type `E`.
    pub fn resolve_reverse<E: 'static>(&self) -> Option<String> {
        self.read().by_type.get(&TypeId::of::<E>()).cloned()
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.read().by_name.get(name).is_some_and(|e| e.reserved)
    }

    /// Remote name and message of a registered local error value.
    pub fn name_of(&self, err: &(dyn StdError + 'static)) -> Option<(String, String)> {
        let inner = self.read();
        inner.by_name.iter().find_map(|(name, entry)| {
            (entry.error_type.describe)(err).map(|message| (name.clone(), message))
        })
    }

    /// Turn a handler failure into the name and message of an error reply.
    ///
    /// Registered types use their own name. Crate errors map onto the
    /// matching bus error. Anything else gets the fallback name.
    pub fn to_reply(&self, err: &HandlerError) -> (String, String) {
        let err: &(dyn StdError + 'static) = err.as_ref();
        if let Some(found) = self.name_of(err) {
            return found;
        }
        if let Some(crate_err) = err.downcast_ref::<Error>() {
            return self.crate_error_reply(crate_err);
        }
        warn!(
            fallback = %self.fallback_name,
            error = %err,
            "Local error has no registered name, replying with fallback"
        );
        (self.fallback_name.clone(), err.to_string())
    }

    fn crate_error_reply(&self, err: &Error) -> (String, String) {
        use builtin::*;
        let name = match err {
            Error::Remote { name, message, .. } | Error::UnmappedRemote { name, message } => {
                return (name.clone(), message.clone());
            }
            Error::Access { .. } => PropertyReadOnly::NAME,
            Error::Signature { .. } => InvalidArgs::NAME,
            Error::UnknownMember(_) | Error::UnmappedMember(_) => UnknownMethod::NAME,
            Error::UnknownObject { .. } => UnknownObject::NAME,
            Error::Timeout(_) => NoReply::NAME,
            Error::NotImplemented(_) => NotSupported::NAME,
            Error::Transport(_) => Disconnected::NAME,
            Error::Declaration(_) => self.fallback_name.as_str(),
        };
        (name.to_string(), err.to_string())
    }

    /// Build the caller-side error for an error reply.
    ///
    /// Registered names come back as [`Error::Remote`] holding the local
    /// type; unregistered names come back verbatim as
    /// [`Error::UnmappedRemote`].
    pub fn error_from_reply(&self, name: &str, message: &str) -> Error {
        match self.resolve(name) {
            Some(error_type) => Error::Remote {
                name: name.to_string(),
                message: message.to_string(),
                local: error_type.build(message),
            },
            None => Error::UnmappedRemote {
                name: name.to_string(),
                message: message.to_string(),
            },
        }
    }
}

fn checked_name<E: BusError>() -> Result<&'static str> {
    let name = E::NAME;
    if name.is_empty() {
        return Err(Error::declaration(format!(
            "error type {} has no remote error name",
            type_name::<E>()
        )));
    }
    names::validate_error_name(name)?;
    Ok(name)
}

fn reserved_error(name: &str) -> Error {
    Error::declaration(format!("error name {name} is reserved by the bus"))
}
