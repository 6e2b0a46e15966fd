//! Host nodes associated with a store.

use plugin_bridge_core::{FunctionRef, NodeRef};
use serde::Deserialize;
use serde_json::Value;

/// Nodes a store's resolver found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTarget {
    One(NodeRef),
    Many(Vec<NodeRef>),
}

impl NodeTarget {
    /// Interpret a resolver's output.
    ///
    /// Nothing, `null`, and an empty array all mean no target.
    ///
    /// # Errors
    /// Returns error if the output is neither a node nor an array of nodes.
    pub fn from_output(output: Option<Value>) -> Result<Option<Self>, serde_json::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Many(Vec<NodeRef>),
            One(NodeRef),
        }

        match output {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(match serde_json::from_value(value)? {
                Raw::Many(nodes) if nodes.is_empty() => None,
                Raw::Many(nodes) => Some(Self::Many(nodes)),
                Raw::One(node) => Some(Self::One(node)),
            }),
        }
    }

    /// The resolved nodes as a slice.
    #[must_use]
    pub fn nodes(&self) -> &[NodeRef] {
        match self {
            Self::One(node) => std::slice::from_ref(node),
            Self::Many(nodes) => nodes,
        }
    }
}

/// Resolver and parameters captured when a store is created.
#[derive(Debug, Clone)]
pub(crate) struct NodeResolver {
    pub function: FunctionRef,
    pub params: Value,
}
