//! objlink wire layer.
//!
//! Every message concerning one remote object travels on a single transport
//! topic named after the object's identity. This crate defines what goes on
//! that topic and what the transport must provide.
//!
//! ## Architecture
//!
//! - **Event**: JSON envelope `{event, objectId, member, data}` for the four
//!   event kinds (plus the optional `err` reply)
//! - **Transport**: publish / subscribe / request capability the object layer
//!   depends on
//! - **LocalBus**: in-process transport with per-subscription delivery tasks

pub mod bus;
pub mod envelope;
pub mod transport;

pub use bus::{LocalBus, LocalClient};
pub use envelope::{
    decode_event, encode, encode_event, parse_envelope, ErrorCode, ErrorReply, Event, EventKind,
};
pub use transport::{Message, MessageHandler, Responder, Subscription, Transport};
