use crate::content::{ContentTree, NodeId};
use crate::error::{ErrorKind, Result};
use std::collections::BTreeMap;

/// Alias graph reachable from one node, built once per resolution.
///
/// Virtual pages can themselves be mirrored by other virtual pages, so the
/// aliases of a node are the transitive closure over
/// [`ContentTree::aliases`]. A node that ends up aliasing itself is rejected
/// with [`ErrorKind::AliasCycle`] rather than walked forever.
#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    edges: BTreeMap<NodeId, Vec<NodeId>>,
}
impl AliasIndex {
    pub fn build(tree: &dyn ContentTree, root: NodeId) -> Result<Self> {
        let mut index = Self::default();
        let mut path = Vec::new();
        index.visit(tree, root, &mut path)?;
        Ok(index)
    }

    fn visit(&mut self, tree: &dyn ContentTree, id: NodeId, path: &mut Vec<NodeId>) -> Result<()> {
        if path.contains(&id) {
            exn::bail!(ErrorKind::AliasCycle(id));
        }
        if self.edges.contains_key(&id) {
            return Ok(());
        }
        let direct: Vec<NodeId> = tree.aliases(id).iter().map(|n| n.id).collect();
        self.edges.insert(id, direct.clone());
        path.push(id);
        for alias in direct {
            self.visit(tree, alias, path)?;
        }
        path.pop();
        Ok(())
    }

    /// Aliases pointing straight at `id`.
    pub fn direct(&self, id: NodeId) -> &[NodeId] {
        self.edges.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every alias of `id`, including aliases of aliases, in discovery order.
    pub fn closure(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut pending: Vec<NodeId> = self.direct(id).iter().rev().copied().collect();
        while let Some(next) = pending.pop() {
            if next == id || found.contains(&next) {
                continue;
            }
            found.push(next);
            pending.extend(self.direct(next).iter().rev());
        }
        found
    }
}
