//! objlink kernel: remote objects over a publish/subscribe transport.
//!
//! One process owns an object's authoritative state; others observe its
//! property changes, receive its signals and invoke its methods through the
//! topic named after the object's identity.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use objlink_kernel::{Connection, LinkConfig, Value};
//! use objlink_wire::LocalBus;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), objlink_kernel::LinkError> {
//!     let bus = LocalBus::new("demo");
//!     let server = Connection::new(Arc::new(bus.connect()), LinkConfig::default());
//!     let client = Connection::new(Arc::new(bus.connect()), LinkConfig::default());
//!
//!     server.ensure_object("calc").register_method("add", |args| {
//!         let a: f64 = objlink_kernel::arg(args, 0)?;
//!         let b: f64 = objlink_kernel::arg(args, 1)?;
//!         Ok(Value::from(a + b))
//!     });
//!
//!     let sum = client
//!         .ensure_object("calc")
//!         .request_method("add", vec![Value::from(1), Value::from(2)])
//!         .await?;
//!     assert_eq!(sum, Value::from(3));
//!
//!     client.close();
//!     server.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod emitter;
pub mod logging;
pub mod object;

pub use connection::Connection;
pub use emitter::{Emitter, HandlerId};
pub use object::{Listener, MethodFn, Object};
pub use objlink_types::{arg, LinkConfig, LinkError, LinkResult, MethodError, Value};
pub use objlink_wire::Event;
