//! Connection: the object registry for one transport handle.
//!
//! A [`Connection`] owns the transport and maps identity strings to
//! [`Object`]s. At most one instance exists per identity for the
//! connection's lifetime; every lookup hands out a handle to that instance.
//!
//! The registry lock and the per-object locks are never held at the same
//! time: objects are constructed under the registry lock (which touches no
//! object lock) and subscribed after it is released.

use crate::object::Object;
use objlink_types::{LinkConfig, LinkResult, Value};
use objlink_wire::Transport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Object registry bound to a transport.
pub struct Connection {
    transport: Arc<dyn Transport>,
    config: LinkConfig,
    objects: RwLock<HashMap<String, Object>>,
    closed: AtomicBool,
}

impl Connection {
    /// Create a registry over an already connected transport.
    pub fn new(transport: Arc<dyn Transport>, config: LinkConfig) -> Self {
        info!(
            endpoint = %transport.connected_endpoint(),
            request_timeout_ms = config.request_timeout_ms,
            reply_errors = config.reply_errors,
            "Connection opened"
        );
        Self {
            transport,
            config,
            objects: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Endpoint the transport is connected to.
    pub fn connected_endpoint(&self) -> String {
        self.transport.connected_endpoint()
    }

    /// Return the object for `id`, creating and subscribing it if needed.
    pub fn ensure_object(&self, id: &str) -> Object {
        let object = self.get_or_create(id);
        object.subscribe();
        object
    }

    /// Return the object for `id`, creating it unsubscribed if needed.
    pub fn new_object(&self, id: &str) -> Object {
        self.get_or_create(id)
    }

    /// Look up an existing object. Never creates one.
    pub fn object(&self, id: &str) -> Option<Object> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Identities of every registered object, sorted.
    pub fn object_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Start receiving events for `id`, if it is registered. Unlike
    /// [`ensure_object`](Self::ensure_object) this never creates an object.
    pub fn subscribe(&self, id: &str) -> bool {
        match self.object(id) {
            Some(object) => {
                object.subscribe();
                true
            }
            None => false,
        }
    }

    /// Stop receiving events for `id`, if it is registered.
    pub fn unsubscribe(&self, id: &str) {
        if let Some(object) = self.object(id) {
            object.unsubscribe();
        }
    }

    /// Invoke a method on `id` without subscribing to its topic.
    pub async fn request_method(&self, id: &str, member: &str, args: Vec<Value>) -> LinkResult<Value> {
        self.new_object(id).request_method(member, args).await
    }

    /// Unsubscribe every object, then release the transport.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let objects: Vec<Object> = self
            .objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for object in &objects {
            object.unsubscribe();
        }
        self.transport.close();
        info!(objects = objects.len(), "Connection closed");
    }

    fn get_or_create(&self, id: &str) -> Object {
        if let Some(object) = self.object(id) {
            return object;
        }
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        // Another caller may have created it between the two locks.
        objects
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(object_id = id, "Registering object");
                Object::new(id, Arc::clone(&self.transport), &self.config)
            })
            .clone()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.transport.connected_endpoint())
            .field("objects", &self.object_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objlink_wire::LocalBus;

    fn connection(bus: &LocalBus) -> Connection {
        Connection::new(Arc::new(bus.connect()), LinkConfig::default())
    }

    #[tokio::test]
    async fn test_new_object() {
        let bus = LocalBus::new("test");
        let conn = connection(&bus);
        let object = conn.new_object("test");
        assert_eq!(object.id(), "test");
        assert!(!object.is_subscribed());
        assert_eq!(bus.subscriber_count("test"), 0);
        conn.close();
    }

    #[tokio::test]
    async fn test_ensure_object_subscribes() {
        let bus = LocalBus::new("test");
        let conn = connection(&bus);
        let object = conn.ensure_object("test");
        assert_eq!(object.id(), "test");
        assert!(object.is_subscribed());
        assert_eq!(bus.subscriber_count("test"), 1);

        // A second ensure does not add a second subscription.
        conn.ensure_object("test");
        assert_eq!(bus.subscriber_count("test"), 1);
        conn.close();
    }

    #[tokio::test]
    async fn test_lookups_return_same_instance() {
        let bus = LocalBus::new("test");
        let conn = connection(&bus);
        let o = conn.new_object("test");
        let o2 = conn.object("test").unwrap();
        let o3 = conn.ensure_object("test");
        assert!(o.ptr_eq(&o2));
        assert!(o.ptr_eq(&o3));
        assert!(o.is_subscribed());
        assert!(conn.object("other").is_none());
        conn.close();
    }

    #[tokio::test]
    async fn test_object_ids() {
        let bus = LocalBus::new("test");
        let conn = connection(&bus);
        conn.new_object("b");
        conn.new_object("a");
        conn.new_object("a");
        assert_eq!(conn.object_ids(), vec!["a", "b"]);
        conn.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_creates_one_instance() {
        let bus = LocalBus::new("test");
        let conn = Arc::new(connection(&bus));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let conn = Arc::clone(&conn);
            handles.push(tokio::spawn(async move { conn.ensure_object("shared") }));
        }
        let mut objects = Vec::new();
        for handle in handles {
            objects.push(handle.await.unwrap());
        }
        assert!(objects.iter().all(|o| o.ptr_eq(&objects[0])));
        assert_eq!(conn.object_ids(), vec!["shared"]);
        assert_eq!(bus.subscriber_count("shared"), 1);
        conn.close();
    }

    #[tokio::test]
    async fn test_close_unsubscribes_everything() {
        let bus = LocalBus::new("test");
        let conn = connection(&bus);
        let a = conn.ensure_object("a");
        let b = conn.ensure_object("b");
        assert_eq!(conn.connected_endpoint(), "local://test");

        conn.close();
        conn.close();
        assert!(!a.is_subscribed());
        assert!(!b.is_subscribed());
        assert_eq!(bus.subscriber_count("a"), 0);
        assert_eq!(bus.subscriber_count("b"), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_by_id() {
        let bus = LocalBus::new("test");
        let conn = connection(&bus);
        let object = conn.ensure_object("calc");
        conn.unsubscribe("calc");
        conn.unsubscribe("unknown");
        assert!(!object.is_subscribed());
        assert!(conn.object_ids().contains(&"calc".to_string()));

        assert!(conn.subscribe("calc"));
        assert!(object.is_subscribed());
        assert!(!conn.subscribe("unknown"));
        assert!(conn.object("unknown").is_none());
        conn.close();
    }
}
