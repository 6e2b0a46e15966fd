//! Serializable references to host-side scene nodes.

use serde::{Deserialize, Serialize};

/// A reference to a node in the host document.
///
/// Live node objects never cross the boundary. The host re-derives them on
/// demand and ships this lightweight handle instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    /// Host-assigned node id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Node type as reported by the host (`FRAME`, `TEXT`, ...).
    #[serde(rename = "type", default)]
    pub node_type: String,
}

impl NodeRef {
    /// Create a node reference.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        node_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type: node_type.into(),
        }
    }
}
