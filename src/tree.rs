// 🌳 Tree Store - arena of PPA nodes indexed by id
//
// Parent/child edges are index lookups, never owning pointers. Sibling order
// is creation order; a node's ordinal is its 1-based slot in the parent's
// child list (or in the root list for Programs).

use std::collections::HashMap;

use tracing::debug;

use crate::codes;
use crate::entities::{OfficeId, PpaId, PpaKind, PpaNode};
use crate::error::{AipError, FieldError, Result};

/// Result of removing a subtree.
#[derive(Debug, Clone, Default)]
pub struct Removal {
    /// Removed nodes, children before parents
    pub removed: Vec<PpaNode>,

    /// Surviving nodes whose ordinal or code changed, in rewrite order
    pub recoded: Vec<PpaId>,
}

#[derive(Debug, Clone, Default)]
pub struct PpaTree {
    nodes: HashMap<PpaId, PpaNode>,
    roots: Vec<PpaId>,
    children: HashMap<PpaId, Vec<PpaId>>,
}

impl PpaTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tree from persisted nodes. Ordinals and codes are taken as
    /// stored; sibling lists are ordered by ordinal.
    pub fn restore(mut nodes: Vec<PpaNode>) -> Result<Self> {
        nodes.sort_by_key(|n| (n.depth(), n.ordinal));

        let mut tree = PpaTree::new();
        for node in nodes {
            if let Some(parent_id) = node.parent_id {
                if !tree.nodes.contains_key(&parent_id) {
                    return Err(AipError::InvalidParent {
                        parent_id: parent_id.to_string(),
                        reason: format!("stored parent of {} is missing", node.id),
                    });
                }
                tree.children.entry(parent_id).or_default().push(node.id);
            } else {
                tree.roots.push(node.id);
            }
            tree.nodes.insert(node.id, node);
        }

        Ok(tree)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: PpaId) -> Option<&PpaNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: PpaId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Like `get`, failing with `NotFound`.
    pub fn node(&self, id: PpaId) -> Result<&PpaNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| AipError::not_found("PPA", id))
    }

    pub fn roots(&self) -> &[PpaId] {
        &self.roots
    }

    pub fn children(&self, id: PpaId) -> &[PpaId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sibling set under `parent` (`None` means the roots).
    pub fn siblings(&self, parent: Option<PpaId>) -> &[PpaId] {
        match parent {
            Some(parent_id) => self.children(parent_id),
            None => &self.roots,
        }
    }

    pub fn has_children(&self, id: PpaId) -> bool {
        !self.children(id).is_empty()
    }

    /// Ancestors from parent up to the root (excludes `id`).
    pub fn ancestors(&self, id: PpaId) -> Vec<PpaId> {
        let mut chain = Vec::new();
        let mut current = self.nodes.get(&id).and_then(|n| n.parent_id);

        while let Some(parent_id) = current {
            chain.push(parent_id);
            current = self.nodes.get(&parent_id).and_then(|n| n.parent_id);
        }

        chain
    }

    /// `id` and all of its descendants, depth-first in ordinal order.
    pub fn subtree(&self, id: PpaId) -> Vec<PpaId> {
        let mut out = Vec::new();
        if self.contains(id) {
            self.collect_preorder(id, &mut out);
        }
        out
    }

    /// Every node, depth-first in code order.
    pub fn preorder(&self) -> Vec<PpaId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for root in &self.roots {
            self.collect_preorder(*root, &mut out);
        }
        out
    }

    fn collect_preorder(&self, id: PpaId, out: &mut Vec<PpaId>) {
        out.push(id);
        for child in self.children(id) {
            self.collect_preorder(*child, out);
        }
    }

    pub fn find_by_code(&self, code: &str) -> Option<&PpaNode> {
        let path = codes::parse(code)?;
        let mut level = self.roots.as_slice();
        let mut found = None;

        for ordinal in path {
            let id = level.get((ordinal as usize).checked_sub(1)?)?;
            found = self.nodes.get(id);
            level = self.children(*id);
        }

        found
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    /// Append a new node under `parent_id` (or as a new Program).
    ///
    /// Office is inherited from the parent; a root needs one. The new node
    /// takes the next ordinal in its sibling set, so no existing code moves.
    pub fn create(
        &mut self,
        parent_id: Option<PpaId>,
        office_id: Option<OfficeId>,
        description: &str,
    ) -> Result<PpaNode> {
        let description = description.trim();
        if description.is_empty() {
            return Err(AipError::Invalid(vec![FieldError::new(
                "description",
                "must not be empty",
            )]));
        }

        let (kind, office_id) = match parent_id {
            Some(pid) => {
                let parent = self.nodes.get(&pid).ok_or_else(|| AipError::InvalidParent {
                    parent_id: pid.to_string(),
                    reason: "parent does not exist".to_string(),
                })?;

                let kind = parent.kind.child_kind().ok_or_else(|| AipError::InvalidParent {
                    parent_id: pid.to_string(),
                    reason: format!("{} nodes cannot have children", parent.kind.as_str()),
                })?;

                if let Some(requested) = &office_id {
                    if *requested != parent.office_id {
                        return Err(AipError::invalid(
                            "office_id",
                            format!("must match parent office {}", parent.office_id),
                        ));
                    }
                }

                (kind, parent.office_id.clone())
            }
            None => {
                let office_id = office_id
                    .filter(|o| !o.as_str().trim().is_empty())
                    .ok_or(AipError::MissingOffice)?;
                (PpaKind::Program, office_id)
            }
        };

        let mut node = PpaNode::new(parent_id, office_id, kind, description.to_string());
        let id = node.id;
        node.ordinal = self.siblings(parent_id).len() as u32 + 1;

        match parent_id {
            Some(pid) => self.children.entry(pid).or_default().push(id),
            None => self.roots.push(id),
        }
        self.nodes.insert(id, node);

        codes::assign(self, id)?;

        let node = self.node(id)?.clone();
        debug!(node_id = %id, code = node.code(), kind = node.kind.as_str(), "PPA appended");
        Ok(node)
    }

    /// Remove the subtree rooted at `id`, close the gap among the remaining
    /// siblings and rewrite the codes of every shifted subtree.
    pub fn remove(&mut self, id: PpaId) -> Result<Removal> {
        let parent_id = self.node(id)?.parent_id;

        let doomed = self.subtree(id);
        let mut removed = Vec::with_capacity(doomed.len());
        for node_id in doomed.iter().rev() {
            self.children.remove(node_id);
            if let Some(node) = self.nodes.remove(node_id) {
                removed.push(node);
            }
        }

        match parent_id {
            Some(pid) => {
                if let Some(list) = self.children.get_mut(&pid) {
                    list.retain(|c| *c != id);
                    if list.is_empty() {
                        self.children.remove(&pid);
                    }
                }
            }
            None => self.roots.retain(|r| *r != id),
        }

        let recoded = codes::renumber(self, parent_id)?;

        debug!(
            node_id = %id,
            removed = removed.len(),
            recoded = recoded.len(),
            "PPA subtree removed"
        );

        Ok(Removal { removed, recoded })
    }

    pub fn set_active(&mut self, id: PpaId, active: bool) -> Result<bool> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| AipError::not_found("PPA", id))?;
        let changed = node.active != active;
        node.active = active;
        Ok(changed)
    }

    pub(crate) fn node_mut(&mut self, id: PpaId) -> Result<&mut PpaNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| AipError::not_found("PPA", id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PpaNode> {
        self.nodes.values()
    }
}

// ============================================================================
// TESTS
// ============================================================================
