//! Replicated store for the plugin bridge.
//!
//! Provides:
//! - `ReplicatedStore` - Local-first value mirrored to host storage
//! - `Observable` / `Subscription` - Change notification for UI bindings
//! - `NodeTarget` - Host nodes derived on demand from a store's resolver

pub mod node_target;
pub mod observable;
pub mod store;
mod write_queue;

pub use node_target::NodeTarget;
pub use observable::{Observable, Subscription};
pub use store::{Phase, ReplicatedStore, StoreBuilder};
