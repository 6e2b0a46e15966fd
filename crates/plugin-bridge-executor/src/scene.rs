//! Host document access for node-target resolvers.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use plugin_bridge_core::NodeRef;

/// Read access to the host document.
pub trait SceneGraph: Send + Sync {
    /// Look a node up by id.
    fn node(&self, id: &str) -> Option<NodeRef>;

    /// Nodes currently selected by the user.
    fn selection(&self) -> Vec<NodeRef>;
}

/// Scene graph held in memory.
#[derive(Debug, Default)]
pub struct MemorySceneGraph {
    nodes: RwLock<HashMap<String, NodeRef>>,
    selection: RwLock<Vec<String>>,
}

impl MemorySceneGraph {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a node.
    pub fn insert(&self, node: NodeRef) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.id.clone(), node);
    }

    /// Remove a node, dropping it from the selection too.
    pub fn remove(&self, id: &str) -> Option<NodeRef> {
        self.selection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|selected| selected != id);
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Replace the selection. Unknown ids are kept but resolve to nothing.
    pub fn select<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.selection.write().unwrap_or_else(PoisonError::into_inner) =
            ids.into_iter().map(Into::into).collect();
    }
}

impl SceneGraph for MemorySceneGraph {
    fn node(&self, id: &str) -> Option<NodeRef> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn selection(&self) -> Vec<NodeRef> {
        let selection = self.selection.read().unwrap_or_else(PoisonError::into_inner);
        selection.iter().filter_map(|id| self.node(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_skips_missing_nodes() {
        let scene = MemorySceneGraph::new();
        scene.insert(NodeRef::new("1:2", "Card", "FRAME"));
        scene.select(["1:2", "9:9"]);

        let selection = scene.selection();
        assert_eq!(selection.len(), 1);
        assert_eq!(selection[0].name, "Card");
    }

    #[test]
    fn test_remove_clears_selection() {
        let scene = MemorySceneGraph::new();
        scene.insert(NodeRef::new("1:2", "Card", "FRAME"));
        scene.select(["1:2"]);

        assert!(scene.remove("1:2").is_some());
        assert!(scene.node("1:2").is_none());
        assert!(scene.selection().is_empty());
    }
}
