//! Object: one identity's cached state, methods and listeners.
//!
//! An [`Object`] converts between local API calls and events on the topic
//! named after its identity. Properties are cached and coalesced: a late
//! reader still sees the last value. Signals are momentary and reach only the
//! listeners registered at the time.
//!
//! All per-object state sits behind a single reader/writer lock. Listener
//! callbacks and method implementations are always called with that lock
//! released, so they may call back into the same object.

use crate::emitter::{Callback, Emitter, HandlerId};
use objlink_types::{LinkConfig, LinkError, LinkResult, MethodError, Value};
use objlink_wire::{
    decode_event, encode_event, parse_envelope, ErrorCode, ErrorReply, Event, EventKind, Message,
    MessageHandler, Subscription, Transport,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A method implementation: positional arguments in, one result out.
pub type MethodFn = Arc<dyn Fn(&[Value]) -> Result<Value, MethodError> + Send + Sync>;

struct ObjectState {
    methods: HashMap<String, MethodFn>,
    properties: HashMap<String, Value>,
    property_listeners: Emitter<Event>,
    signal_listeners: Emitter<Event>,
    subscription: Option<Box<dyn Subscription>>,
}

struct ObjectInner {
    id: String,
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    reply_errors: bool,
    state: RwLock<ObjectState>,
}

/// A remote object. Cloning yields another handle to the same instance.
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerKind {
    Property,
    Signal,
}

/// Registration token returned by [`Object::on_property`] and
/// [`Object::on_signal`].
pub struct Listener {
    object: Weak<ObjectInner>,
    kind: ListenerKind,
    member: String,
    id: HandlerId,
}

impl Listener {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    /// Remove exactly this listener. Other listeners for the member stay.
    pub fn unsubscribe(self) {
        let Some(inner) = self.object.upgrade() else {
            return;
        };
        let object = Object { inner };
        match self.kind {
            ListenerKind::Property => object.off_property(&self.member, self.id),
            ListenerKind::Signal => object.off_signal(&self.member, self.id),
        };
    }
}

impl Object {
    /// Create an unsubscribed object bound to `transport`.
    pub fn new(id: impl Into<String>, transport: Arc<dyn Transport>, config: &LinkConfig) -> Self {
        let id = id.into();
        info!(object_id = %id, "New object");
        Self {
            inner: Arc::new(ObjectInner {
                id,
                transport,
                request_timeout: config.request_timeout(),
                reply_errors: config.reply_errors,
                state: RwLock::new(ObjectState {
                    methods: HashMap::new(),
                    properties: HashMap::new(),
                    property_listeners: Emitter::new(),
                    signal_listeners: Emitter::new(),
                    subscription: None,
                }),
            }),
        }
    }

    /// The object's identity, also its transport topic.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// True if both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, ObjectState> {
        self.inner.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ObjectState> {
        self.inner.state.write().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Subscription
    // ------------------------------------------------------------------

    /// Start receiving events on the object's topic. No-op if already subscribed.
    pub fn subscribe(&self) {
        if self.is_subscribed() {
            info!(object_id = %self.inner.id, "Already subscribed");
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let handler: MessageHandler = Arc::new(move |message: Message| {
            if let Some(inner) = weak.upgrade() {
                Object { inner }.handle_message(message);
            }
        });

        let subscription = match self.inner.transport.subscribe(&self.inner.id, handler) {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(object_id = %self.inner.id, error = %e, "Failed to subscribe");
                return;
            }
        };

        let mut state = self.write();
        if state.subscription.is_some() {
            // Lost a race with a concurrent subscribe.
            drop(state);
            subscription.unsubscribe();
            return;
        }
        state.subscription = Some(subscription);
        info!(object_id = %self.inner.id, "Subscribed");
    }

    /// Stop receiving events. No-op if not subscribed.
    pub fn unsubscribe(&self) {
        let subscription = self.write().subscription.take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
            info!(object_id = %self.inner.id, "Unsubscribed");
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.read().subscription.is_some()
    }

    // ------------------------------------------------------------------
    // Methods
    // ------------------------------------------------------------------

    /// Register the implementation for `member`, replacing any previous one.
    pub fn register_method<F>(&self, member: &str, method: F)
    where
        F: Fn(&[Value]) -> Result<Value, MethodError> + Send + Sync + 'static,
    {
        self.write().methods.insert(member.to_string(), Arc::new(method));
        debug!(object_id = %self.inner.id, member, "Registered method");
    }

    /// Names of the registered methods, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke `member` on whichever process serves this object and wait for
    /// the result.
    ///
    /// Fails with [`LinkError::Timeout`] if nothing replies within the
    /// configured request window. A missing or failing remote method also
    /// surfaces as a timeout unless the serving side runs with
    /// `reply_errors`, in which case it fails fast with
    /// [`LinkError::MethodNotFound`] or [`LinkError::MethodFailed`].
    pub async fn request_method(&self, member: &str, args: Vec<Value>) -> LinkResult<Value> {
        let id = &self.inner.id;
        let request = encode_event(&Event::invoke(id.as_str(), member, args))?;
        debug!(object_id = %id, member, "Requesting method");

        let reply = self
            .inner
            .transport
            .request(id, request, self.inner.request_timeout)
            .await
            .map_err(|e| match e {
                LinkError::Timeout { timeout, .. } => LinkError::Timeout {
                    object_id: id.clone(),
                    member: member.to_string(),
                    timeout,
                },
                other => other,
            })?;

        // Any non-error envelope carries the result. Some peers answer by
        // sending the `inv` event back with the result as its payload.
        let reply = parse_envelope(&reply)?;
        match reply.kind {
            EventKind::Error => {
                let failure = reply.error_reply()?;
                Err(match failure.code {
                    ErrorCode::NotFound => LinkError::MethodNotFound {
                        object_id: id.clone(),
                        member: member.to_string(),
                    },
                    ErrorCode::Failed => LinkError::MethodFailed {
                        member: member.to_string(),
                        reason: failure.message,
                    },
                })
            }
            _ => reply.value(),
        }
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    /// Register a local signal listener.
    pub fn on_signal<F>(&self, member: &str, callback: F) -> Listener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.write().signal_listeners.on(member, callback);
        self.listener(ListenerKind::Signal, member, id)
    }

    /// Remove a signal listener by id. Returns false if it was not registered.
    pub fn off_signal(&self, member: &str, id: HandlerId) -> bool {
        self.write().signal_listeners.off(member, id)
    }

    /// Send a signal to remote subscribers. Local listeners are not called.
    pub fn publish_signal(&self, member: &str, args: Vec<Value>) {
        self.publish_event(&Event::signal(self.inner.id.as_str(), member, args));
    }

    /// Call local signal listeners. Nothing goes on the wire.
    pub fn emit_signal(&self, member: &str, args: Vec<Value>) {
        let handlers = self.read().signal_listeners.handlers(member);
        fire(&handlers, &Event::signal(self.inner.id.as_str(), member, args));
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Register a local property-change listener.
    pub fn on_property<F>(&self, member: &str, callback: F) -> Listener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.write().property_listeners.on(member, callback);
        self.listener(ListenerKind::Property, member, id)
    }

    /// Remove a property listener by id. Returns false if it was not registered.
    pub fn off_property(&self, member: &str, id: HandlerId) -> bool {
        self.write().property_listeners.off(member, id)
    }

    /// Send a property value to remote subscribers. The local cache and
    /// listeners are untouched.
    pub fn publish_property(&self, member: &str, value: Value) {
        self.publish_event(&Event::property(self.inner.id.as_str(), member, value));
    }

    /// Call local property listeners with `value`. The cache is untouched.
    pub fn emit_property(&self, member: &str, value: Value) {
        let handlers = self.read().property_listeners.handlers(member);
        fire(&handlers, &Event::property(self.inner.id.as_str(), member, value));
    }

    /// Store `value` and notify local listeners, unless it equals the cached
    /// value, in which case nothing happens.
    ///
    /// Listeners run after the lock is released so they may call back into
    /// this object. Concurrent writers to the same member are therefore only
    /// ordered in the cache: their notifications can arrive in either order,
    /// and [`property`](Self::property) is the authority on the current value.
    pub fn set_property(&self, member: &str, value: Value) {
        let handlers = {
            let mut state = self.write();
            if state.properties.get(member) == Some(&value) {
                return;
            }
            state.properties.insert(member.to_string(), value.clone());
            state.property_listeners.handlers(member)
        };
        debug!(object_id = %self.inner.id, member, "Property changed");
        fire(&handlers, &Event::property(self.inner.id.as_str(), member, value));
    }

    /// [`set_property`](Self::set_property) followed by
    /// [`publish_property`](Self::publish_property).
    pub fn push_property(&self, member: &str, value: Value) {
        self.set_property(member, value.clone());
        self.publish_property(member, value);
    }

    /// Last known value of `member`.
    pub fn property(&self, member: &str) -> Option<Value> {
        self.read().properties.get(member).cloned()
    }

    /// Snapshot of every cached property.
    pub fn properties(&self) -> HashMap<String, Value> {
        self.read().properties.clone()
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    fn listener(&self, kind: ListenerKind, member: &str, id: HandlerId) -> Listener {
        Listener {
            object: Arc::downgrade(&self.inner),
            kind,
            member: member.to_string(),
            id,
        }
    }

    fn publish_event(&self, event: &Event) {
        let bytes = match encode_event(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(object_id = %self.inner.id, member = %event.member, error = %e, "Failed to encode event");
                return;
            }
        };
        if let Err(e) = self.inner.transport.publish(&self.inner.id, bytes) {
            error!(
                object_id = %self.inner.id,
                member = %event.member,
                kind = %event.kind,
                error = %e,
                "Failed to publish event"
            );
        }
    }

    /// Inbound dispatch for messages on the object's topic.
    fn handle_message(&self, message: Message) {
        let event = match decode_event(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(object_id = %self.inner.id, topic = %message.topic, error = %e, "Dropping malformed event");
                return;
            }
        };
        debug!(object_id = %self.inner.id, member = %event.member, kind = %event.kind, "Received event");

        match event.kind {
            EventKind::Property => match event.value() {
                Ok(value) => self.set_property(&event.member, value),
                Err(e) => warn!(object_id = %self.inner.id, error = %e, "Dropping property event"),
            },
            EventKind::Signal => match event.args() {
                Ok(args) => self.emit_signal(&event.member, args),
                Err(e) => warn!(object_id = %self.inner.id, error = %e, "Dropping signal event"),
            },
            EventKind::Invoke => self.handle_invoke(&event, &message),
            EventKind::Reply | EventKind::Error => {
                debug!(object_id = %self.inner.id, member = %event.member, "Ignoring reply outside a pending request");
            }
        }
    }

    fn handle_invoke(&self, event: &Event, message: &Message) {
        let id = self.inner.id.as_str();
        let member = event.member.as_str();
        if message.reply.is_none() {
            warn!(object_id = %id, member, "Invoke without a reply channel");
            return;
        }

        let (method, serves_methods) = {
            let state = self.read();
            (state.methods.get(member).cloned(), !state.methods.is_empty())
        };

        let reply = match method {
            None => {
                debug!(object_id = %id, member, "No such method");
                // An object with no methods at all is only observing the topic;
                // answering would race the process that actually serves it.
                if !self.inner.reply_errors || !serves_methods {
                    return;
                }
                Event::error(
                    id,
                    member,
                    &ErrorReply {
                        code: ErrorCode::NotFound,
                        message: format!("no method '{member}' on '{id}'"),
                    },
                )
            }
            Some(method) => {
                let args = match event.args() {
                    Ok(args) => args,
                    Err(e) => {
                        warn!(object_id = %id, member, error = %e, "Dropping invoke");
                        return;
                    }
                };
                match method(&args) {
                    Ok(result) => Event::reply(id, member, result),
                    Err(e) => {
                        warn!(object_id = %id, member, error = %e, "Method failed");
                        if !self.inner.reply_errors {
                            return;
                        }
                        Event::error(
                            id,
                            member,
                            &ErrorReply {
                                code: ErrorCode::Failed,
                                message: e.0,
                            },
                        )
                    }
                }
            }
        };

        let bytes = match encode_event(&reply) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(object_id = %id, member, error = %e, "Failed to encode method reply");
                return;
            }
        };
        if let Err(e) = message.respond(bytes) {
            warn!(object_id = %id, member, error = %e, "Failed to send method reply");
        }
    }
}

fn fire(handlers: &[Callback<Event>], event: &Event) {
    for handler in handlers {
        handler(event);
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.inner.id)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
