//! Signal multiplexer.
//!
//! Every signal endpoint fans out to any number of independent consumers.
//! Each [`catch`](LocalSignal::catch) gets a private unbounded queue and
//! sees every emission made while it is alive, in emission order. Nothing
//! is buffered for consumers that attach later, and emitting with no
//! consumers is not an error.
//!
//! Proxy-side endpoints are backed by transport matches instead of a hub;
//! dropping the stream disposes the match.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result, TransportError};
use crate::interface::SignalDecl;
use crate::registry::RegistrySource;
use crate::transport::{MatchRule, SignalMessage, Slot, Transport};
use crate::value::{decode_body, encode_body, IntoValue, ObjectPath, Signature, Value};


struct HubState<T> {
    next_id: u64,
    subscribers: Vec<(u64, mpsc::UnboundedSender<T>)>,
}

/// Subscriber list of one local endpoint.
///
/// Emission runs inside the lock, so two emissions on the same hub are
/// seen by every subscriber in the order they were made.
pub struct SignalHub<T> {
    state: Arc<Mutex<HubState<T>>>,
}

impl<T> Clone for SignalHub<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for SignalHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> SignalHub<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push `value` to every active subscriber. Returns how many got it.
    pub fn emit(&self, value: T) -> usize {
        let mut state = self.lock();
        state
            .subscribers
            .retain(|(_, sender)| sender.send(value.clone()).is_ok());
        state.subscribers.len()
    }

    /// Register a new private queue.
    pub fn subscribe(&self) -> SignalStream<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.push((id, sender));
            id
        };

        let weak = Arc::downgrade(&self.state);
        let slot = Slot::new(move || {
            if let Some(state) = weak.upgrade() {
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .subscribers
                    .retain(|(sid, _)| *sid != id);
            }
        });
        SignalStream::new(receiver, slot)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// Single-pass stream of emitted values.
///
/// Dropping the stream ends the subscription. So does a timed-out
/// [`recv_timeout`](Self::recv_timeout).
pub struct SignalStream<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    slot: Option<Slot>,
}

impl<T> SignalStream<T> {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<T>, slot: Slot) -> Self {
        Self {
            receiver,
            slot: Some(slot),
        }
    }

    /// Next value, or `None` once the endpoint is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Next value within `timeout`.
    ///
    /// On timeout the subscription is released and the stream ends; later
    /// reads return `None`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(TransportError::Closed.into()),
            Err(_) => {
                self.release();
                debug!(?timeout, "Signal read timed out, subscription released");
                Err(Error::Timeout(timeout))
            }
        }
    }

    fn release(&mut self) {
        self.slot.take();
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
    }

    pub fn is_subscribed(&self) -> bool {
        self.slot.is_some()
    }

    /// Already-queued value, if any.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Stream for SignalStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_recv(cx)
    }
}

/// Sends an encoded local emission to every export of the owning object.
/// Failed sends are logged by the broadcaster.
pub(crate) type Broadcast = Arc<dyn Fn(&str, &str, &Signature, Vec<Value>) + Send + Sync>;

/// A signal endpoint on a local object.
pub struct LocalSignal {
    interface: String,
    decl: Arc<SignalDecl>,
    hub: SignalHub<Value>,
    broadcast: Broadcast,
}

impl LocalSignal {
    pub(crate) fn new(
        interface: String,
        decl: Arc<SignalDecl>,
        hub: SignalHub<Value>,
        broadcast: Broadcast,
    ) -> Self {
        Self {
            interface,
            decl,
            hub,
            broadcast,
        }
    }

    pub fn decl(&self) -> &SignalDecl {
        &self.decl
    }

    /// Emit to local consumers and to every export on the bus.
    ///
    /// The payload must fit the declared signature: unit for an empty
    /// signature, the value itself for one type, a struct otherwise. Only a
    /// payload mismatch is an error. An export whose connection refuses the
    /// signal is logged and skipped; local consumers still get the value.
    pub fn emit(&self, payload: impl IntoValue) -> Result<()> {
        let value = payload.into_value();
        let body = encode_body(value.clone(), &self.decl.signature)?;
        let local = self.hub.emit(value);
        debug!(
            interface = %self.interface,
            member = %self.decl.remote_name,
            local_subscribers = local,
            "Emitting signal"
        );
        (self.broadcast)(&self.interface, &self.decl.remote_name, &self.decl.signature, body);
        Ok(())
    }

    /// Private queue of every later emission.
    pub fn catch(&self) -> SignalStream<Value> {
        self.hub.subscribe()
    }

    /// Local endpoints have no bus identity to match against.
    pub fn catch_anywhere(&self) -> Result<SignalStream<(ObjectPath, Value)>> {
        Err(Error::NotImplemented(format!(
            "catch_anywhere on local signal {}.{}",
            self.interface, self.decl.remote_name
        )))
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }
}

/// Install a transport match whose messages are decoded into a private queue.
pub(crate) async fn subscribe_remote<T, F>(
    transport: &dyn Transport,
    rule: MatchRule,
    decode: F,
) -> Result<SignalStream<T>>
where
    T: Send + 'static,
    F: Fn(&SignalMessage) -> Result<T> + Send + Sync + 'static,
{
    let (sender, receiver) = mpsc::unbounded_channel();
    let description = rule.to_string();
    let slot = transport
        .match_signal(
            rule,
            Arc::new(move |message: &SignalMessage| match decode(message) {
                Ok(value) => {
                    let _ = sender.send(value);
                }
                Err(e) => {
                    warn!(
                        interface = %message.interface,
                        member = %message.member,
                        error = %e,
                        "Dropping undecodable signal"
                    );
                }
            }),
        )
        .await?;
    debug!(rule = %description, "Remote signal subscription started");
    Ok(SignalStream::new(receiver, slot))
}

/// A signal endpoint on a proxy.
pub struct ProxySignal {
    transport: Arc<dyn Transport>,
    service: String,
    path: ObjectPath,
    interface: String,
    decl: Arc<SignalDecl>,
}

impl ProxySignal {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        service: String,
        path: ObjectPath,
        interface: String,
        decl: Arc<SignalDecl>,
    ) -> Self {
        Self {
            transport,
            service,
            path,
            interface,
            decl,
        }
    }

    pub fn decl(&self) -> &SignalDecl {
        &self.decl
    }

    /// Emissions of this signal by the proxied object.
    pub async fn catch(&self) -> Result<SignalStream<Value>> {
        let rule = MatchRule::new()
            .sender(self.service.clone())
            .path(self.path.clone())
            .interface(self.interface.clone())
            .member(self.decl.remote_name.clone());
        let signature = self.decl.signature.clone();
        subscribe_remote(self.transport.as_ref(), rule, move |message| {
            decode_body(message.body.clone(), &signature)
        })
        .await
    }

    /// Emissions of this signal by the proxied service from any object path.
    pub async fn catch_anywhere(&self) -> Result<SignalStream<(ObjectPath, Value)>> {
        catch_anywhere_rule(
            self.transport.as_ref(),
            Some(&self.service),
            &self.interface,
            &self.decl,
        )
        .await
    }

    /// Type-level wildcard match: emissions of the signal `local_name`
    /// declared in `registry`, from every object path of `service` (or of
    /// every sender when `service` is `None`).
    pub async fn anywhere(
        transport: &dyn Transport,
        registry: &impl RegistrySource,
        local_name: &str,
        service: Option<&str>,
    ) -> Result<SignalStream<(ObjectPath, Value)>> {
        let (interface, decl) = registry.registry().local_signal(local_name)?;
        catch_anywhere_rule(transport, service, interface, decl).await
    }
}

async fn catch_anywhere_rule(
    transport: &dyn Transport,
    service: Option<&str>,
    interface: &str,
    decl: &SignalDecl,
) -> Result<SignalStream<(ObjectPath, Value)>> {
    let mut rule = MatchRule::new()
        .interface(interface)
        .member(decl.remote_name.clone());
    if let Some(service) = service {
        rule = rule.sender(service);
    }
    let signature = decl.signature.clone();
    subscribe_remote(transport, rule, move |message| {
        let value = decode_body(message.body.clone(), &signature)?;
        Ok((message.path.clone(), value))
    })
    .await
}
