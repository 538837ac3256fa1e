//! In-process bus.
//!
//! Connections share one routing table: well-known names, exported objects
//! and signal matches. Calls run the target handler on its own task, so a
//! caller that gives up (timeout, closed connection) never cancels the
//! remote side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{MatchRule, MethodCall, ObjectHandler, Reply, SignalCallback, SignalMessage, Slot, Transport};
use crate::error::{Result, TransportError};
use crate::exceptions::builtin::{NoReply, ServiceUnknown, UnknownObject};
use crate::names;
use crate::value::{check_body, ObjectPath};

struct ExportEntry {
    id: u64,
    handler: Weak<dyn ObjectHandler>,
}

struct MatchEntry {
    id: u64,
    owner: String,
    rule: MatchRule,
    callback: SignalCallback,
}

#[derive(Default)]
struct BusState {
    connections: Vec<String>,
    names: HashMap<String, String>,
    objects: HashMap<(String, ObjectPath), ExportEntry>,
    matches: Vec<MatchEntry>,
}

impl BusState {
    /// Unique name behind a unique or well-known name.
    fn resolve(&self, name: &str) -> Option<String> {
        if self.connections.iter().any(|c| c == name) {
            return Some(name.to_string());
        }
        self.names.get(name).cloned()
    }

    fn sender_matches(&self, rule: &MatchRule, sender: &str) -> bool {
        match &rule.sender {
            None => true,
            Some(wanted) => wanted == sender || self.names.get(wanted).is_some_and(|o| o == sender),
        }
    }
}

struct BusInner {
    state: Mutex<BusState>,
    next_connection: AtomicU64,
    next_id: AtomicU64,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// In-process bus shared by any number of connections.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState::default()),
                next_connection: AtomicU64::new(1),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open a new connection with a fresh unique name.
    pub fn connect(&self) -> Arc<MemoryConnection> {
        let unique_name = format!(
            ":1.{}",
            self.inner.next_connection.fetch_add(1, Ordering::Relaxed)
        );
        self.inner.lock().connections.push(unique_name.clone());
        let (closed, _) = watch::channel(false);

        info!(unique_name = %unique_name, "Memory bus connection opened");

        Arc::new(MemoryConnection {
            bus: self.inner.clone(),
            unique_name,
            closed,
        })
    }

    /// Number of live signal matches across all connections.
    pub fn match_count(&self) -> usize {
        self.inner.lock().matches.len()
    }
}

/// One connection to a [`MemoryBus`].
pub struct MemoryConnection {
    bus: Arc<BusInner>,
    unique_name: String,
    closed: watch::Sender<bool>,
}

impl MemoryConnection {
    /// Claim a well-known name.
    pub fn request_name(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        names::validate_bus_name(name)?;
        let mut state = self.bus.lock();
        match state.names.get(name) {
            Some(owner) if owner != &self.unique_name => {
                Err(TransportError::NameTaken(name.to_string()).into())
            }
            _ => {
                state.names.insert(name.to_string(), self.unique_name.clone());
                info!(name = %name, owner = %self.unique_name, "Acquired bus name");
                Ok(())
            }
        }
    }

    /// Give up a well-known name. Returns `false` if this connection did
    /// not own it.
    pub fn release_name(&self, name: &str) -> bool {
        let mut state = self.bus.lock();
        if state.names.get(name) == Some(&self.unique_name) {
            state.names.remove(name);
            true
        } else {
            false
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Close the connection. Pending and future calls on it fail with
    /// [`TransportError::Closed`]; its names, objects and matches go away.
    /// Other connections are unaffected.
    pub fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let mut state = self.bus.lock();
        let me = &self.unique_name;
        state.connections.retain(|c| c != me);
        state.names.retain(|_, owner| owner != me);
        state.objects.retain(|(owner, _), _| owner != me);
        state.matches.retain(|m| &m.owner != me);
        info!(unique_name = %me, "Memory bus connection closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }
        Ok(())
    }

    async fn wait_closed(mut closed: watch::Receiver<bool>) {
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl Transport for MemoryConnection {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    async fn send_call(&self, mut call: MethodCall) -> Result<Reply> {
        self.ensure_open()?;
        check_body(&call.body, &call.signature)?;
        call.sender = self.unique_name.clone();

        let target = {
            let state = self.bus.lock();
            match state.resolve(&call.destination) {
                None => None,
                Some(owner) => Some(
                    state
                        .objects
                        .get(&(owner, call.path.clone()))
                        .and_then(|entry| entry.handler.upgrade()),
                ),
            }
        };

        let handler = match target {
            None => {
                return Ok(Reply::builtin::<ServiceUnknown>(format!(
                    "The name {} was not provided by any service",
                    call.destination
                )));
            }
            Some(None) => {
                return Ok(Reply::builtin::<UnknownObject>(format!(
                    "Unknown object '{}'",
                    call.path
                )));
            }
            Some(Some(handler)) => handler,
        };

        debug!(
            destination = %call.destination,
            path = %call.path,
            interface = %call.interface,
            member = %call.member,
            "Routing method call"
        );

        if call.no_reply {
            tokio::spawn(async move {
                handler.handle_call(call).await;
            });
            return Ok(Reply::Return(Vec::new()));
        }

        let task = tokio::spawn(async move { handler.handle_call(call).await });
        tokio::select! {
            joined = task => match joined {
                Ok(Some(reply)) => Ok(reply),
                Ok(None) => Ok(Reply::builtin::<NoReply>("The method did not send a reply")),
                Err(e) => {
                    warn!(error = %e, "Method handler task failed");
                    Ok(Reply::builtin::<NoReply>(format!("Method handler failed: {e}")))
                }
            },
            _ = Self::wait_closed(self.closed.subscribe()) => Err(TransportError::Closed.into()),
        }
    }

    fn send_signal(&self, mut signal: SignalMessage) -> Result<()> {
        self.ensure_open()?;
        check_body(&signal.body, &signal.signature)?;
        signal.sender = self.unique_name.clone();

        let callbacks: Vec<SignalCallback> = {
            let state = self.bus.lock();
            state
                .matches
                .iter()
                .filter(|m| m.rule.matches(&signal) && state.sender_matches(&m.rule, &signal.sender))
                .map(|m| m.callback.clone())
                .collect()
        };

        debug!(
            path = %signal.path,
            interface = %signal.interface,
            member = %signal.member,
            receivers = callbacks.len(),
            "Delivering signal"
        );

        for callback in callbacks {
            callback(&signal);
        }
        Ok(())
    }

    async fn match_signal(&self, rule: MatchRule, callback: SignalCallback) -> Result<Slot> {
        self.ensure_open()?;
        let id = self.bus.next_id();
        debug!(rule = %rule, id, "Adding signal match");
        self.bus.lock().matches.push(MatchEntry {
            id,
            owner: self.unique_name.clone(),
            rule,
            callback,
        });

        let bus = Arc::downgrade(&self.bus);
        Ok(Slot::new(move || {
            if let Some(bus) = bus.upgrade() {
                bus.lock().matches.retain(|m| m.id != id);
                debug!(id, "Removed signal match");
            }
        }))
    }

    async fn export(&self, path: ObjectPath, handler: Weak<dyn ObjectHandler>) -> Result<Slot> {
        self.ensure_open()?;
        let key = (self.unique_name.clone(), path.clone());
        let id = self.bus.next_id();
        {
            let mut state = self.bus.lock();
            if state
                .objects
                .get(&key)
                .is_some_and(|entry| entry.handler.strong_count() > 0)
            {
                return Err(TransportError::PathInUse(path.to_string()).into());
            }
            state.objects.insert(key.clone(), ExportEntry { id, handler });
        }
        info!(path = %path, owner = %self.unique_name, "Object exported");

        let bus = Arc::downgrade(&self.bus);
        Ok(Slot::new(move || {
            if let Some(bus) = bus.upgrade() {
                let mut state = bus.lock();
                if state.objects.get(&key).is_some_and(|entry| entry.id == id) {
                    state.objects.remove(&key);
                    info!(path = %key.1, owner = %key.0, "Object unexported");
                }
            }
        }))
    }
}
