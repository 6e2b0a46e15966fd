//! UI-side caller for the plugin bridge.
//!
//! Provides:
//! - `Caller` - Send typed calls to the host and await their replies
//! - `PendingCall` / `CancelHandle` - Per-call timeout and cancellation
//! - `CallerConfig` - Plugin id and default timeout

pub mod caller;
pub mod config;
pub mod pending;

pub use caller::{CallError, Caller, DEFAULT_REJECT_MESSAGE};
pub use config::CallerConfig;
pub use pending::{CancelHandle, PendingCall};
