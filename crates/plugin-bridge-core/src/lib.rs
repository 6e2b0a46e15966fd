//! Core abstractions for the plugin bridge.
//!
//! This crate provides the pieces both sides of the bridge agree on:
//! - `Envelope` / `PluginMessage` - Wire format for calls and replies
//! - `ExecutionContext` - Which side of the boundary an endpoint lives on
//! - `Transport` - Object-safe message channel trait
//! - `RemoteOperation` - Statically typed operation contracts and built-ins

pub mod context;
pub mod node;
pub mod ops;
pub mod protocol;
pub mod traits;

pub use context::ExecutionContext;
pub use node::NodeRef;
pub use ops::{FunctionRef, RemoteOperation};
pub use protocol::{CallId, CallRequest, CallResponse, Envelope, PluginMessage};
pub use traits::{Transport, TransportError};
