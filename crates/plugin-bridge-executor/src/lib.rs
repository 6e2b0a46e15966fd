//! Host-side executor for the plugin bridge.
//!
//! Provides:
//! - `Executor` - Dispatch calls to registered operations and reply
//! - `HostApi` - Privileged handle passed to every operation
//! - `FunctionTable` - Host functions addressable by `FunctionRef`
//! - Durable storage backends (memory, JSON file)
//! - Scene graph abstraction for node-target resolution

pub mod builtins;
pub mod executor;
pub mod functions;
pub mod host;
pub mod registry;
pub mod scene;
pub mod storage;

pub use executor::{Executor, ServeError};
pub use functions::FunctionTable;
pub use host::{HostApi, HostError};
pub use registry::OperationRegistry;
pub use scene::{MemorySceneGraph, SceneGraph};
pub use storage::{ClientStorage, FileClientStorage, MemoryClientStorage, StorageError};
