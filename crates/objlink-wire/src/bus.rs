//! LocalBus: in-process publish/subscribe transport.
//!
//! A [`LocalBus`] plays the role of the message broker: it routes messages by
//! topic to every live subscription. Each participant gets its own
//! [`LocalClient`] via [`LocalBus::connect`], the way separate processes
//! would each hold their own broker connection.
//!
//! Every subscription owns an unbounded queue drained by a dedicated tokio
//! task, so handlers run off the publisher's call stack and messages on one
//! subscription are handled in delivery order.

use crate::transport::{Message, MessageHandler, Responder, Subscription, Transport};
use async_trait::async_trait;
use dashmap::DashMap;
use objlink_types::{LinkError, LinkResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

struct Subscriber {
    id: Uuid,
    client: Uuid,
    active: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Message>,
}

struct BusInner {
    name: String,
    topics: DashMap<String, Vec<Subscriber>>,
}

/// In-process message broker shared by any number of [`LocalClient`]s.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    /// Create an empty bus. `name` appears in the endpoint string.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                name: name.into(),
                topics: DashMap::new(),
            }),
        }
    }

    /// Endpoint string reported by connected clients.
    pub fn endpoint(&self) -> String {
        format!("local://{}", self.inner.name)
    }

    /// Open a new client connection to this bus.
    pub fn connect(&self) -> LocalClient {
        let client = LocalClient {
            bus: self.clone(),
            id: Uuid::new_v4(),
            closed: AtomicBool::new(false),
        };
        debug!(endpoint = %self.endpoint(), client = %client.id, "Local bus client connected");
        client
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .get(topic)
            .map(|subs| subs.iter().filter(|s| s.active.load(Ordering::Acquire)).count())
            .unwrap_or(0)
    }

    /// Queue `message` for every live subscription on its topic.
    fn deliver(&self, message: Message) -> usize {
        let Some(subscribers) = self.inner.topics.get(&message.topic) else {
            return 0;
        };
        let mut delivered = 0;
        for sub in subscribers.iter() {
            if sub.active.load(Ordering::Acquire) && sub.tx.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    fn remove(&self, topic: &str, id: Uuid) {
        if let Some(mut subs) = self.inner.topics.get_mut(topic) {
            subs.retain(|s| s.id != id);
        }
        self.inner.topics.remove_if(topic, |_, subs| subs.is_empty());
    }

    fn remove_client(&self, client: Uuid) {
        for mut entry in self.inner.topics.iter_mut() {
            entry.value_mut().retain(|s| {
                if s.client == client {
                    s.active.store(false, Ordering::Release);
                    false
                } else {
                    true
                }
            });
        }
        self.inner.topics.retain(|_, subs| !subs.is_empty());
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new("default")
    }
}

/// One participant's connection to a [`LocalBus`].
pub struct LocalClient {
    bus: LocalBus,
    id: Uuid,
    closed: AtomicBool,
}

impl LocalClient {
    fn ensure_open(&self) -> LinkResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Transport("connection closed".to_string()));
        }
        Ok(())
    }

    /// Whether [`Transport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Handle returned by [`LocalClient`] subscriptions.
struct LocalSubscription {
    bus: LocalBus,
    topic: String,
    id: Uuid,
    active: Arc<AtomicBool>,
}

impl Subscription for LocalSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.bus.remove(&self.topic, self.id);
            debug!(topic = %self.topic, "Unsubscribed");
        }
    }
}

/// Routes the first reply back to a waiting request.
struct OneshotResponder {
    tx: Mutex<Option<oneshot::Sender<Vec<u8>>>>,
}

impl Responder for OneshotResponder {
    fn respond(&self, payload: Vec<u8>) -> LinkResult<()> {
        let sender = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        match sender {
            Some(tx) => tx
                .send(payload)
                .map_err(|_| LinkError::Transport("requester is no longer waiting".to_string())),
            None => Err(LinkError::Transport("reply already sent".to_string())),
        }
    }
}

#[async_trait]
impl Transport for LocalClient {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> LinkResult<()> {
        self.ensure_open()?;
        let delivered = self.bus.deliver(Message {
            topic: topic.to_string(),
            payload,
            reply: None,
        });
        debug!(topic, delivered, "Published");
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> LinkResult<Box<dyn Subscription>> {
        self.ensure_open()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LinkError::Transport(format!("subscribe needs a tokio runtime: {e}")))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let active = Arc::new(AtomicBool::new(true));
        let id = Uuid::new_v4();

        let task_active = Arc::clone(&active);
        runtime.spawn(async move {
            while let Some(message) = rx.recv().await {
                if !task_active.load(Ordering::Acquire) {
                    break;
                }
                handler(message);
            }
        });

        self.bus
            .inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                id,
                client: self.id,
                active: Arc::clone(&active),
                tx,
            });
        debug!(topic, client = %self.id, "Subscribed");

        Ok(Box::new(LocalSubscription {
            bus: self.bus.clone(),
            topic: topic.to_string(),
            id,
            active,
        }))
    }

    async fn request(&self, topic: &str, payload: Vec<u8>, timeout: Duration) -> LinkResult<Vec<u8>> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        let message = Message {
            topic: topic.to_string(),
            payload,
            reply: Some(Arc::new(OneshotResponder {
                tx: Mutex::new(Some(tx)),
            })),
        };
        if self.bus.deliver(message) == 0 {
            return Err(LinkError::Transport(format!("no responders on '{topic}'")));
        }

        let timed_out = || LinkError::Timeout {
            object_id: topic.to_string(),
            member: String::new(),
            timeout,
        };
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                // Every receiver dropped the message without answering. A broker
                // cannot tell that apart from a slow responder, so neither do we.
                tokio::time::sleep_until(deadline).await;
                warn!(topic, ?timeout, "Request timed out");
                Err(timed_out())
            }
            Err(_) => {
                warn!(topic, ?timeout, "Request timed out");
                Err(timed_out())
            }
        }
    }

    fn connected_endpoint(&self) -> String {
        self.bus.endpoint()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.bus.remove_client(self.id);
            debug!(client = %self.id, "Local bus client closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn collecting_handler() -> (MessageHandler, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: MessageHandler = Arc::new(move |msg: Message| {
            let _ = tx.send(msg);
        });
        (handler, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_publish_reaches_other_client() {
        let bus = LocalBus::new("test");
        let a = bus.connect();
        let b = bus.connect();
        let (handler, mut rx) = collecting_handler();
        let _sub = assert_ok!(b.subscribe("calc", handler));

        assert_ok!(a.publish("calc", b"hello".to_vec()));
        let msg = recv(&mut rx).await.expect("message delivered");
        assert_eq!(msg.topic, "calc");
        assert_eq!(msg.payload, b"hello");
        assert!(msg.reply.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = LocalBus::new("test");
        let client = bus.connect();
        let (handler, mut rx) = collecting_handler();
        let sub = client.subscribe("calc", handler).unwrap();
        assert_eq!(bus.subscriber_count("calc"), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count("calc"), 0);

        client.publish("calc", b"late".to_vec()).unwrap();
        assert!(recv(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_request_reply() {
        let bus = LocalBus::new("test");
        let server = bus.connect();
        let client = bus.connect();
        let _sub = server
            .subscribe(
                "echo",
                Arc::new(|msg: Message| {
                    let mut payload = msg.payload.clone();
                    payload.reverse();
                    msg.respond(payload).unwrap();
                }),
            )
            .unwrap();

        let reply = client
            .request("echo", b"abc".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b"cba");
    }

    #[tokio::test]
    async fn test_request_waits_out_timeout_when_unanswered() {
        let bus = LocalBus::new("test");
        let server = bus.connect();
        let client = bus.connect();
        let _sub = server.subscribe("quiet", Arc::new(|_msg: Message| {})).unwrap();

        let started = std::time::Instant::now();
        let err = client
            .request("quiet", b"?".to_vec(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(150));
        match err {
            LinkError::Timeout { object_id, timeout, .. } => {
                assert_eq!(object_id, "quiet");
                assert_eq!(timeout, Duration::from_millis(200));
            }
            other => panic!("Expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_without_subscribers_fails_fast() {
        let bus = LocalBus::new("test");
        let client = bus.connect();
        let err = client
            .request("nobody", b"?".to_vec(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Transport(_)));
    }

    #[tokio::test]
    async fn test_first_reply_wins() {
        let (tx, rx) = oneshot::channel();
        let responder = OneshotResponder {
            tx: Mutex::new(Some(tx)),
        };
        assert_ok!(responder.respond(b"one".to_vec()));
        assert_err!(responder.respond(b"two".to_vec()));
        assert_eq!(rx.await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_close_drops_subscriptions_and_rejects_calls() {
        let bus = LocalBus::new("test");
        let client = bus.connect();
        let other = bus.connect();
        let (handler, _rx) = collecting_handler();
        let _sub = client.subscribe("calc", handler).unwrap();
        let (handler, _rx2) = collecting_handler();
        let _other_sub = other.subscribe("calc", handler).unwrap();

        client.close();
        assert!(client.is_closed());
        assert_eq!(bus.subscriber_count("calc"), 1);
        assert_err!(client.publish("calc", Vec::new()));
        assert_ok!(other.publish("calc", Vec::new()));
    }

    #[test]
    fn test_subscribe_outside_runtime_fails() {
        let bus = LocalBus::default();
        let client = bus.connect();
        let (handler, _rx) = collecting_handler();
        assert!(matches!(
            client.subscribe("calc", handler),
            Err(LinkError::Transport(_))
        ));
        assert_eq!(client.connected_endpoint(), "local://default");
    }
}
