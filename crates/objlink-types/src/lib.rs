//! Core types shared by every objlink crate.
//!
//! This crate defines the variant [`value::Value`] carried in event payloads,
//! the error taxonomy and the configuration record. It contains no protocol
//! logic.

pub mod config;
pub mod error;
pub mod value;

pub use config::LinkConfig;
pub use error::{LinkError, LinkResult, MethodError};
pub use value::{arg, Value};
