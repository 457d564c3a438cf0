// 🔍 Integrity Checker - verify the structural invariants of a snapshot
//
// The tree and the roll-up cache are derived state; this walks them and
// reports anything that disagrees with a fresh derivation:
//   - sibling ordinals are exactly 1..n
//   - code = parent code + "." + ordinal
//   - office equals the parent's office
//   - kind matches depth, and depth stays within Sub-Activity
//   - every cached roll-up equals a recomputation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codes;
use crate::entities::{PpaId, PpaKind};
use crate::rollup::BudgetAggregator;
use crate::state::LedgerState;

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyCategory {
    OrdinalGap,
    CodeMismatch,
    OfficeMismatch,
    DepthExceeded,
    KindMismatch,
    RollupMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub category: DiscrepancyCategory,
    pub node_id: Option<PpaId>,
    pub description: String,
}

impl Discrepancy {
    fn new(category: DiscrepancyCategory, node_id: Option<PpaId>, description: String) -> Self {
        Discrepancy {
            category,
            node_id,
            description,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub node_count: usize,
    pub entry_count: usize,
    pub rollups_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub verified_at: DateTime<Utc>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn count(&self, category: DiscrepancyCategory) -> usize {
        self.discrepancies
            .iter()
            .filter(|d| d.category == category)
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Integrity check: {} PPAs, {} entries, {} cached roll-ups, {} discrepancies",
            self.node_count,
            self.entry_count,
            self.rollups_checked,
            self.discrepancies.len()
        )
    }
}

// ============================================================================
// CHECKER
// ============================================================================

#[derive(Debug, Default)]
pub struct IntegrityChecker;

impl IntegrityChecker {
    pub fn new() -> Self {
        IntegrityChecker
    }

    pub fn verify(&self, state: &LedgerState) -> IntegrityReport {
        let mut discrepancies = Vec::new();

        self.check_sibling_set(state, None, &mut discrepancies);
        for node in state.tree().nodes() {
            self.check_sibling_set(state, Some(node.id), &mut discrepancies);
            self.check_node(state, node.id, &mut discrepancies);
        }

        let rollups_checked = self.check_rollups(state, &mut discrepancies);

        let report = IntegrityReport {
            node_count: state.tree().len(),
            entry_count: state.book().len(),
            rollups_checked,
            discrepancies,
            verified_at: Utc::now(),
        };

        if !report.is_consistent() {
            warn!(discrepancies = report.discrepancies.len(), "integrity check failed");
        }
        report
    }

    fn check_sibling_set(&self, state: &LedgerState, parent: Option<PpaId>, out: &mut Vec<Discrepancy>) {
        for (idx, id) in state.tree().siblings(parent).iter().enumerate() {
            let expected = idx as u32 + 1;
            let Some(node) = state.tree().get(*id) else {
                continue;
            };
            if node.ordinal() != expected {
                out.push(Discrepancy::new(
                    DiscrepancyCategory::OrdinalGap,
                    Some(*id),
                    format!(
                        "{} sits at position {} but has ordinal {}",
                        node.code(),
                        expected,
                        node.ordinal()
                    ),
                ));
            }
        }
    }

    fn check_node(&self, state: &LedgerState, id: PpaId, out: &mut Vec<Discrepancy>) {
        let tree = state.tree();
        let Some(node) = tree.get(id) else {
            return;
        };
        let parent = node.parent_id.and_then(|p| tree.get(p));

        let expected = codes::derive(parent.map(|p| p.code()), node.ordinal());
        if node.code() != expected {
            out.push(Discrepancy::new(
                DiscrepancyCategory::CodeMismatch,
                Some(id),
                format!("code {} should be {}", node.code(), expected),
            ));
        }

        if let Some(parent) = parent {
            if parent.office_id != node.office_id {
                out.push(Discrepancy::new(
                    DiscrepancyCategory::OfficeMismatch,
                    Some(id),
                    format!(
                        "{} belongs to {} but its parent belongs to {}",
                        node.code(),
                        node.office_id,
                        parent.office_id
                    ),
                ));
            }
        }

        let depth = tree.ancestors(id).len();
        if depth > PpaKind::MAX_DEPTH {
            out.push(Discrepancy::new(
                DiscrepancyCategory::DepthExceeded,
                Some(id),
                format!("{} is {} levels deep", node.code(), depth),
            ));
        } else if node.depth() != depth {
            out.push(Discrepancy::new(
                DiscrepancyCategory::KindMismatch,
                Some(id),
                format!("{} is a {} at depth {}", node.code(), node.kind.as_str(), depth),
            ));
        }
    }

    /// Compare every memoized roll-up with one computed from scratch.
    fn check_rollups(&self, state: &LedgerState, out: &mut Vec<Discrepancy>) -> usize {
        let fresh = BudgetAggregator::new();
        let cached = state.aggregator().cached_entries();

        for ((node_id, fy), value) in &cached {
            let Ok(expected) = fresh.rollup(state.tree(), state.book(), *node_id, *fy) else {
                out.push(Discrepancy::new(
                    DiscrepancyCategory::RollupMismatch,
                    Some(*node_id),
                    format!("cached roll-up for missing PPA {}", node_id),
                ));
                continue;
            };
            if expected != *value {
                out.push(Discrepancy::new(
                    DiscrepancyCategory::RollupMismatch,
                    Some(*node_id),
                    format!(
                        "cached grand total {} but entries sum to {}",
                        value.grand_total, expected.grand_total
                    ),
                ));
            }
        }

        cached.len()
    }
}
