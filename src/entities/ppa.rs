// 🌳 PPA Entity - Program → Project → Activity → Sub-Activity
//
// Kind is a function of depth, office is inherited from the root, and the
// reference code is derived from the position among siblings. None of the
// structural fields are settable from outside the tree store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{OfficeId, PpaId};

// ============================================================================
// PPA KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PpaKind {
    /// Root of a tree (depth 0)
    Program,

    /// Depth 1
    Project,

    /// Depth 2
    Activity,

    /// Depth 3, always a leaf
    SubActivity,
}

impl PpaKind {
    pub const MAX_DEPTH: usize = 3;

    pub fn from_depth(depth: usize) -> Option<PpaKind> {
        match depth {
            0 => Some(PpaKind::Program),
            1 => Some(PpaKind::Project),
            2 => Some(PpaKind::Activity),
            3 => Some(PpaKind::SubActivity),
            _ => None,
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            PpaKind::Program => 0,
            PpaKind::Project => 1,
            PpaKind::Activity => 2,
            PpaKind::SubActivity => 3,
        }
    }

    /// Kind a child of this node would have, `None` for leaves.
    pub fn child_kind(&self) -> Option<PpaKind> {
        PpaKind::from_depth(self.depth() + 1)
    }

    pub fn can_have_children(&self) -> bool {
        self.child_kind().is_some()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PpaKind::Program => "Program",
            PpaKind::Project => "Project",
            PpaKind::Activity => "Activity",
            PpaKind::SubActivity => "SubActivity",
        }
    }

    pub fn parse(value: &str) -> Option<PpaKind> {
        match value {
            "Program" => Some(PpaKind::Program),
            "Project" => Some(PpaKind::Project),
            "Activity" => Some(PpaKind::Activity),
            "SubActivity" => Some(PpaKind::SubActivity),
            _ => None,
        }
    }
}

// ============================================================================
// PPA NODE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpaNode {
    pub id: PpaId,

    /// `None` for Programs
    pub parent_id: Option<PpaId>,

    /// Always equal to the parent's office
    pub office_id: OfficeId,

    pub kind: PpaKind,

    pub description: String,

    /// 1-based position among same-parent siblings
    pub(crate) ordinal: u32,

    /// Dot-delimited path, e.g. "1.2.3"
    pub(crate) code: String,

    pub active: bool,

    pub created_at: DateTime<Utc>,
}

impl PpaNode {
    pub(crate) fn new(
        parent_id: Option<PpaId>,
        office_id: OfficeId,
        kind: PpaKind,
        description: String,
    ) -> Self {
        PpaNode {
            id: PpaId::new(),
            parent_id,
            office_id,
            kind,
            description,
            ordinal: 0,
            code: String::new(),
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Rebuild a node from persisted columns.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: PpaId,
        parent_id: Option<PpaId>,
        office_id: OfficeId,
        kind: PpaKind,
        description: String,
        ordinal: u32,
        code: String,
        active: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        PpaNode {
            id,
            parent_id,
            office_id,
            kind,
            description,
            ordinal,
            code,
            active,
            created_at,
        }
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn depth(&self) -> usize {
        self.kind.depth()
    }
}
