//! Execution context of a bridge endpoint.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The side of the boundary an endpoint lives on.
///
/// The UI context issues calls and never touches host objects. The host
/// context owns the privileged API and executes calls on the UI's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    /// Sandboxed UI (the embedded iframe).
    Ui,
    /// Privileged plugin host.
    Host,
}

impl ExecutionContext {
    /// The context on the other end of a channel opened from `self`.
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Ui => Self::Host,
            Self::Host => Self::Ui,
        }
    }

    /// Short lowercase name, used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ui => "ui",
            Self::Host => "host",
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
