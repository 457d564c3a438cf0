// 🔢 Code Generator - path-based reference codes
//
//   code(root)  = ordinal
//   code(child) = code(parent) + "." + ordinal
//
// A descendant's code is always a prefix-extension of its ancestor's code, so
// any ancestor change forces a rewrite of the whole subtree below it.

use tracing::debug;

use crate::entities::PpaId;
use crate::error::Result;
use crate::tree::PpaTree;

pub const SEPARATOR: char = '.';

/// Code for a node at `ordinal` under a parent with `parent_code`.
pub fn derive(parent_code: Option<&str>, ordinal: u32) -> String {
    match parent_code {
        Some(prefix) => format!("{}{}{}", prefix, SEPARATOR, ordinal),
        None => ordinal.to_string(),
    }
}

/// Split a code into its ordinals. Returns `None` for anything that is not
/// a dot-delimited list of positive integers.
pub fn parse(code: &str) -> Option<Vec<u32>> {
    if code.is_empty() {
        return None;
    }

    code.split(SEPARATOR)
        .map(|part| part.parse::<u32>().ok().filter(|n| *n > 0))
        .collect()
}

/// Code of the parent, `None` for a root code.
pub fn parent_code(code: &str) -> Option<&str> {
    code.rfind(SEPARATOR).map(|idx| &code[..idx])
}

/// Assign the code of a single node from its parent's code and its ordinal.
pub(crate) fn assign(tree: &mut PpaTree, id: PpaId) -> Result<bool> {
    let (parent_id, ordinal) = {
        let node = tree.node(id)?;
        (node.parent_id, node.ordinal())
    };

    let parent_code = match parent_id {
        Some(pid) => Some(tree.node(pid)?.code().to_string()),
        None => None,
    };

    let code = derive(parent_code.as_deref(), ordinal);
    let node = tree.node_mut(id)?;
    if node.code == code {
        return Ok(false);
    }
    node.code = code;
    Ok(true)
}

/// Recompute the code of `id` and every descendant, pushing the ids whose
/// code changed onto `changed` in pre-order.
pub(crate) fn cascade(tree: &mut PpaTree, id: PpaId, changed: &mut Vec<PpaId>) -> Result<()> {
    if assign(tree, id)? {
        changed.push(id);
    }

    let children = tree.children(id).to_vec();
    for child in children {
        cascade(tree, child, changed)?;
    }

    Ok(())
}

/// Close ordinal gaps in the sibling set under `parent` and cascade code
/// rewrites below every sibling whose ordinal moved.
///
/// Returns the ids that changed, siblings in ascending ordinal order, each
/// followed by its rewritten descendants.
pub(crate) fn renumber(tree: &mut PpaTree, parent: Option<PpaId>) -> Result<Vec<PpaId>> {
    let siblings = tree.siblings(parent).to_vec();
    let mut changed = Vec::new();

    for (idx, id) in siblings.into_iter().enumerate() {
        let ordinal = idx as u32 + 1;
        let node = tree.node_mut(id)?;
        if node.ordinal == ordinal {
            continue;
        }
        node.ordinal = ordinal;

        // the last path segment is the ordinal, so `id` itself always changes
        cascade(tree, id, &mut changed)?;
    }

    if !changed.is_empty() {
        debug!(
            parent = ?parent.map(|p| p.to_string()),
            recoded = changed.len(),
            "sibling set renumbered"
        );
    }

    Ok(changed)
}
