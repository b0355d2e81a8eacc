//! Transport capability contract.
//!
//! The object layer only needs publish, subscribe and request/reply on named
//! topics. Anything that provides these (a message broker client, the
//! in-process [`LocalBus`](crate::bus::LocalBus), a test double) can carry
//! remote objects.

use async_trait::async_trait;
use objlink_types::{LinkError, LinkResult};
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked by the transport for every message on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Sends the answer to a request back to its requester.
pub trait Responder: Send + Sync {
    /// Deliver `payload` as the reply. Only the first reply is accepted.
    fn respond(&self, payload: Vec<u8>) -> LinkResult<()>;
}

/// An active topic subscription.
pub trait Subscription: Send + Sync {
    /// The subscribed topic.
    fn topic(&self) -> &str;

    /// Stop delivery. Calling it more than once is a no-op.
    fn unsubscribe(&self);
}

/// A message delivered to a subscription handler.
#[derive(Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Present when the sender is waiting for a reply.
    pub reply: Option<Arc<dyn Responder>>,
}

impl Message {
    /// Reply to the sender of this message.
    pub fn respond(&self, payload: Vec<u8>) -> LinkResult<()> {
        match &self.reply {
            Some(responder) => responder.respond(payload),
            None => Err(LinkError::Transport(format!(
                "message on '{}' has no reply channel",
                self.topic
            ))),
        }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .field("has_reply", &self.reply.is_some())
            .finish()
    }
}

/// Publish/subscribe transport with request/reply.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Best-effort, fire-and-forget send.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> LinkResult<()>;

    /// Deliver every future message on `topic` to `handler`.
    fn subscribe(&self, topic: &str, handler: MessageHandler) -> LinkResult<Box<dyn Subscription>>;

    /// Send `payload` and wait for the first reply.
    ///
    /// Fails with [`LinkError::Timeout`] when nothing answers within `timeout`.
    /// The transport only knows the topic, so `member` in that error is empty.
    async fn request(&self, topic: &str, payload: Vec<u8>, timeout: Duration) -> LinkResult<Vec<u8>>;

    /// Endpoint this transport is connected to, for diagnostics.
    fn connected_endpoint(&self) -> String;

    /// Release the transport handle.
    fn close(&self) {}
}
