// 🧠 Ledger State - one immutable snapshot of the whole AIP
//
// Mutations run on a private copy and describe the rows they touched as
// `StoreOp`s. The ledger persists those ops and publishes the copy in one
// step; a failure anywhere leaves the published snapshot untouched.

use std::collections::HashMap;

use serde_json::json;
use tracing::info;

use crate::book::BudgetBook;
use crate::commands::{CreateBudgetEntry, CreatePlan, CreatePpa, SetFiscalYearStatus, UpdateBudgetEntry};
use crate::entities::{
    BudgetEntry, EntryId, FiscalYear, FiscalYearId, PlanId, PpaId, PpaNode, ProcurementPlan,
};
use crate::error::{AipError, Result};
use crate::gate::FiscalYearGate;
use crate::rollup::{BudgetAggregator, Rollup};
use crate::store::StoreOp;
use crate::tree::PpaTree;
use crate::validation::{validate_description, validate_entry_fields};

/// What an audit event should say about a mutation. The actor is filled in
/// by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Audit {
    pub event_type: &'static str,
    pub entity_type: &'static str,
    pub entity_id: String,
    pub data: serde_json::Value,
}

impl Audit {
    fn new(
        event_type: &'static str,
        entity_type: &'static str,
        entity_id: impl ToString,
        data: serde_json::Value,
    ) -> Self {
        Audit {
            event_type,
            entity_type,
            entity_id: entity_id.to_string(),
            data,
        }
    }
}

/// Outcome of a state transition. `audit` is `None` for no-op transitions,
/// which the ledger does not persist.
#[derive(Debug)]
pub struct Mutation<T> {
    pub value: T,
    pub ops: Vec<StoreOp>,
    pub audit: Option<Audit>,
}

impl<T> Mutation<T> {
    fn new(value: T, ops: Vec<StoreOp>, audit: Audit) -> Self {
        Mutation {
            value,
            ops,
            audit: Some(audit),
        }
    }

    fn unchanged(value: T) -> Self {
        Mutation {
            value,
            ops: Vec::new(),
            audit: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    pub(crate) tree: PpaTree,
    pub(crate) gate: FiscalYearGate,
    pub(crate) book: BudgetBook,
    pub(crate) aggregator: BudgetAggregator,
    pub(crate) plans: HashMap<PlanId, ProcurementPlan>,
    pub(crate) plan_items: HashMap<PlanId, Vec<PpaId>>,
    /// Commit counter of the database this state was loaded from.
    pub(crate) generation: i64,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        tree: PpaTree,
        gate: FiscalYearGate,
        book: BudgetBook,
        plans: Vec<ProcurementPlan>,
        plan_items: Vec<(PlanId, PpaId)>,
    ) -> Self {
        let mut items: HashMap<PlanId, Vec<PpaId>> = HashMap::new();
        for (plan, node) in plan_items {
            items.entry(plan).or_default().push(node);
        }

        LedgerState {
            tree,
            gate,
            book,
            aggregator: BudgetAggregator::new(),
            plans: plans.into_iter().map(|p| (p.id, p)).collect(),
            plan_items: items,
            generation: 0,
        }
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn tree(&self) -> &PpaTree {
        &self.tree
    }

    pub fn gate(&self) -> &FiscalYearGate {
        &self.gate
    }

    pub fn book(&self) -> &BudgetBook {
        &self.book
    }

    pub fn aggregator(&self) -> &BudgetAggregator {
        &self.aggregator
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn node(&self, id: PpaId) -> Result<&PpaNode> {
        self.tree.node(id)
    }

    /// Children of `parent` in ordinal order; roots when `parent` is `None`.
    pub fn children(&self, parent: Option<PpaId>) -> Result<Vec<PpaNode>> {
        if let Some(pid) = parent {
            self.tree.node(pid)?;
        }
        Ok(self
            .tree
            .siblings(parent)
            .iter()
            .filter_map(|id| self.tree.get(*id).cloned())
            .collect())
    }

    pub fn fiscal_year(&self, id: FiscalYearId) -> Result<&FiscalYear> {
        self.gate.get(id)
    }

    pub fn entry(&self, id: EntryId) -> Result<&BudgetEntry> {
        self.book.get(id)
    }

    pub fn entry_for(&self, node: PpaId, fiscal_year: FiscalYearId) -> Option<&BudgetEntry> {
        self.book.for_node(node, fiscal_year)
    }

    pub fn rollup(&self, node: PpaId, fiscal_year: FiscalYearId) -> Result<Rollup> {
        self.gate.get(fiscal_year)?;
        self.aggregator.rollup(&self.tree, &self.book, node, fiscal_year)
    }

    pub fn plan(&self, id: PlanId) -> Result<&ProcurementPlan> {
        self.plans
            .get(&id)
            .ok_or_else(|| AipError::not_found("procurement plan", id))
    }

    pub fn plan_items(&self, id: PlanId) -> Result<Vec<PpaNode>> {
        self.plan(id)?;
        Ok(self
            .plan_items
            .get(&id)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|n| self.tree.get(*n).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    // ========================================================================
    // FISCAL YEARS
    // ========================================================================

    pub fn create_fiscal_year(&mut self, year: i32) -> Result<Mutation<FiscalYear>> {
        let fy = self.gate.create(year)?;
        info!(fiscal_year = year, "fiscal year created");
        Ok(Mutation::new(
            fy.clone(),
            vec![StoreOp::InsertFiscalYear(fy.clone())],
            Audit::new("fiscal_year_created", "fiscal_year", fy.id, json!({ "year": year })),
        ))
    }

    pub fn set_fiscal_year_status(&mut self, cmd: SetFiscalYearStatus) -> Result<Mutation<FiscalYear>> {
        let changed = self.gate.set_status(cmd.fiscal_year_id, cmd.status)?;
        let fy = self.gate.get(cmd.fiscal_year_id)?.clone();
        if !changed {
            return Ok(Mutation::unchanged(fy));
        }

        Ok(Mutation::new(
            fy.clone(),
            vec![StoreOp::UpdateFiscalYearStatus {
                id: fy.id,
                status: fy.status,
            }],
            Audit::new(
                "fiscal_year_status_changed",
                "fiscal_year",
                fy.id,
                json!({ "year": fy.year, "status": fy.status.as_str() }),
            ),
        ))
    }

    pub fn delete_fiscal_year(&mut self, id: FiscalYearId) -> Result<Mutation<FiscalYear>> {
        self.gate.get(id)?;
        let referenced_by_plan = self.plans.values().any(|p| p.fiscal_year_id == id);
        if self.book.references_year(id) || referenced_by_plan {
            return Err(AipError::FiscalYearInUse {
                fiscal_year_id: id.to_string(),
            });
        }

        let fy = self.gate.remove(id)?;
        self.aggregator.forget_year(id);
        Ok(Mutation::new(
            fy.clone(),
            vec![StoreOp::DeleteFiscalYear(id)],
            Audit::new("fiscal_year_deleted", "fiscal_year", id, json!({ "year": fy.year })),
        ))
    }

    // ========================================================================
    // PPA STRUCTURE
    // ========================================================================

    pub fn create_ppa(&mut self, cmd: CreatePpa) -> Result<Mutation<PpaNode>> {
        validate_description("description", &cmd.description)?;

        // A new node contributes zero to every roll-up, so nothing cached moves.
        let node = self
            .tree
            .create(cmd.parent_id, cmd.office_id, &cmd.description)?;

        info!(node_id = %node.id, code = node.code(), "PPA created");
        Ok(Mutation::new(
            node.clone(),
            vec![StoreOp::InsertNode(node.clone())],
            Audit::new(
                "ppa_created",
                "ppa",
                node.id,
                json!({
                    "code": node.code(),
                    "kind": node.kind.as_str(),
                    "office_id": node.office_id,
                    "parent_id": node.parent_id,
                }),
            ),
        ))
    }

    /// Remove a subtree with its entries and plan attachments, then close
    /// the ordinal gap. Blocked while any entry below sits in a closed year.
    pub fn delete_ppa(&mut self, id: PpaId) -> Result<Mutation<Vec<PpaId>>> {
        let code = self.tree.node(id)?.code().to_string();
        let subtree = self.tree.subtree(id);

        let mut doomed_entries = Vec::new();
        for node_id in &subtree {
            for entry in self.book.all_for_node(*node_id) {
                if self.gate.is_closed(entry.fiscal_year_id) {
                    return Err(AipError::HasEntriesInClosedYear {
                        node_id: node_id.to_string(),
                        fiscal_year_id: entry.fiscal_year_id.to_string(),
                    });
                }
                doomed_entries.push(entry.id);
            }
        }

        self.aggregator.invalidate_chain_all_years(&self.tree, id);
        self.aggregator.forget(&subtree);

        let mut ops = Vec::new();
        for entry_id in doomed_entries {
            self.book.remove(entry_id)?;
            ops.push(StoreOp::DeleteEntry(entry_id));
        }

        for (plan_id, nodes) in self.plan_items.iter_mut() {
            nodes.retain(|n| {
                let doomed = subtree.contains(n);
                if doomed {
                    ops.push(StoreOp::DetachPlanItem {
                        plan_id: *plan_id,
                        node_id: *n,
                    });
                }
                !doomed
            });
        }

        let removal = self.tree.remove(id)?;
        let removed: Vec<PpaId> = removal.removed.iter().map(|n| n.id).collect();
        ops.push(StoreOp::DeleteNodes(removed.clone()));

        for recoded in &removal.recoded {
            let node = self.tree.node(*recoded)?;
            ops.push(StoreOp::Recode {
                id: node.id,
                ordinal: node.ordinal(),
                code: node.code().to_string(),
            });
        }

        info!(
            node_id = %id,
            code = %code,
            removed = removed.len(),
            recoded = removal.recoded.len(),
            "PPA deleted"
        );

        Ok(Mutation::new(
            removed.clone(),
            ops,
            Audit::new(
                "ppa_deleted",
                "ppa",
                id,
                json!({
                    "code": code,
                    "removed": removed.len(),
                    "recoded": removal.recoded.len(),
                }),
            ),
        ))
    }

    pub fn set_ppa_active(&mut self, id: PpaId, active: bool) -> Result<Mutation<PpaNode>> {
        let changed = self.tree.set_active(id, active)?;
        let node = self.tree.node(id)?.clone();
        if !changed {
            return Ok(Mutation::unchanged(node));
        }

        Ok(Mutation::new(
            node.clone(),
            vec![StoreOp::SetActive { id, active }],
            Audit::new("ppa_active_changed", "ppa", id, json!({ "active": active })),
        ))
    }

    // ========================================================================
    // BUDGET ENTRIES
    // ========================================================================

    pub fn create_entry(&mut self, cmd: CreateBudgetEntry) -> Result<Mutation<BudgetEntry>> {
        let node_id = cmd.node_id;
        let fy_id = cmd.fiscal_year_id;

        self.tree.node(node_id)?;
        self.gate.authorize_mutation(fy_id)?;
        validate_entry_fields(&cmd.fields)?;

        if self.book.for_node(node_id, fy_id).is_some() {
            return Err(AipError::DuplicateEntry {
                node_id: node_id.to_string(),
                fiscal_year_id: fy_id.to_string(),
            });
        }
        if self.tree.has_children(node_id) {
            return Err(AipError::NotLeaf {
                node_id: node_id.to_string(),
            });
        }

        let entry = BudgetEntry::new(
            node_id,
            fy_id,
            cmd.fields.schedule(),
            cmd.fields.normalized_output(),
            cmd.fields.amounts,
        );
        self.book.insert(entry.clone())?;
        self.aggregator.invalidate_chain(&self.tree, node_id, fy_id);

        info!(entry_id = %entry.id, node_id = %node_id, total = %entry.grand_total(), "budget entry created");
        Ok(Mutation::new(
            entry.clone(),
            vec![StoreOp::InsertEntry(entry.clone())],
            Audit::new(
                "entry_created",
                "budget_entry",
                entry.id,
                json!({
                    "node_id": node_id,
                    "fiscal_year_id": fy_id,
                    "grand_total": entry.grand_total(),
                }),
            ),
        ))
    }

    pub fn update_entry(&mut self, cmd: UpdateBudgetEntry) -> Result<Mutation<BudgetEntry>> {
        let current = self.book.get(cmd.id)?.clone();
        self.gate.authorize_mutation(current.fiscal_year_id)?;
        validate_entry_fields(&cmd.fields)?;

        let updated = BudgetEntry {
            id: current.id,
            ppa_node_id: current.ppa_node_id,
            fiscal_year_id: current.fiscal_year_id,
            schedule: cmd.fields.schedule(),
            expected_output: cmd.fields.normalized_output(),
            amounts: cmd.fields.amounts,
        };
        self.book.replace(updated.clone())?;
        self.aggregator
            .invalidate_chain(&self.tree, updated.ppa_node_id, updated.fiscal_year_id);

        info!(entry_id = %updated.id, total = %updated.grand_total(), "budget entry updated");
        Ok(Mutation::new(
            updated.clone(),
            vec![StoreOp::UpdateEntry(updated.clone())],
            Audit::new(
                "entry_updated",
                "budget_entry",
                updated.id,
                json!({
                    "previous_total": current.grand_total(),
                    "grand_total": updated.grand_total(),
                }),
            ),
        ))
    }

    pub fn delete_entry(&mut self, id: EntryId) -> Result<Mutation<BudgetEntry>> {
        let fy_id = self.book.get(id)?.fiscal_year_id;
        self.gate.authorize_mutation(fy_id)?;

        let entry = self.book.remove(id)?;
        self.aggregator
            .invalidate_chain(&self.tree, entry.ppa_node_id, entry.fiscal_year_id);

        info!(entry_id = %id, "budget entry deleted");
        Ok(Mutation::new(
            entry.clone(),
            vec![StoreOp::DeleteEntry(id)],
            Audit::new(
                "entry_deleted",
                "budget_entry",
                id,
                json!({ "node_id": entry.ppa_node_id, "grand_total": entry.grand_total() }),
            ),
        ))
    }

    // ========================================================================
    // PROCUREMENT PLAN ATTACHMENT
    // ========================================================================

    pub fn create_plan(&mut self, cmd: CreatePlan) -> Result<Mutation<ProcurementPlan>> {
        validate_description("title", &cmd.title)?;
        if cmd.office_id.as_str().trim().is_empty() {
            return Err(AipError::MissingOffice);
        }
        self.gate.get(cmd.fiscal_year_id)?;

        let plan = ProcurementPlan::new(cmd.fiscal_year_id, cmd.office_id, cmd.title.trim().to_string());
        self.plans.insert(plan.id, plan.clone());

        Ok(Mutation::new(
            plan.clone(),
            vec![StoreOp::InsertPlan(plan.clone())],
            Audit::new(
                "plan_created",
                "procurement_plan",
                plan.id,
                json!({ "office_id": plan.office_id, "fiscal_year_id": plan.fiscal_year_id }),
            ),
        ))
    }

    pub fn attach_plan_item(&mut self, plan_id: PlanId, node_id: PpaId) -> Result<Mutation<()>> {
        let plan = self.plan(plan_id)?.clone();
        let node = self.tree.node(node_id)?;

        if node.office_id != plan.office_id {
            return Err(AipError::OfficeMismatch {
                node_office: node.office_id.to_string(),
                plan_office: plan.office_id.to_string(),
            });
        }
        self.gate.authorize_mutation(plan.fiscal_year_id)?;

        let items = self.plan_items.entry(plan_id).or_default();
        if items.contains(&node_id) {
            return Ok(Mutation::unchanged(()));
        }
        items.push(node_id);

        Ok(Mutation::new(
            (),
            vec![StoreOp::AttachPlanItem { plan_id, node_id }],
            Audit::new(
                "plan_item_attached",
                "procurement_plan",
                plan_id,
                json!({ "node_id": node_id }),
            ),
        ))
    }

    pub fn detach_plan_item(&mut self, plan_id: PlanId, node_id: PpaId) -> Result<Mutation<()>> {
        let plan = self.plan(plan_id)?.clone();
        self.gate.authorize_mutation(plan.fiscal_year_id)?;

        let Some(items) = self.plan_items.get_mut(&plan_id) else {
            return Ok(Mutation::unchanged(()));
        };
        let before = items.len();
        items.retain(|n| *n != node_id);
        if items.len() == before {
            return Ok(Mutation::unchanged(()));
        }

        Ok(Mutation::new(
            (),
            vec![StoreOp::DetachPlanItem { plan_id, node_id }],
            Audit::new(
                "plan_item_detached",
                "procurement_plan",
                plan_id,
                json!({ "node_id": node_id }),
            ),
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::EntryFields;
    use crate::entities::{BudgetAmounts, FiscalYearStatus, OfficeId};
    use rust_decimal_macros::dec;

    fn amounts(ps: i64, mooe: i64, fe: i64, co: i64) -> BudgetAmounts {
        BudgetAmounts::new(ps.into(), mooe.into(), fe.into(), co.into())
    }

    fn entry_cmd(node: PpaId, fy: FiscalYearId, a: BudgetAmounts) -> CreateBudgetEntry {
        CreateBudgetEntry {
            node_id: node,
            fiscal_year_id: fy,
            fields: EntryFields::with_amounts(a),
        }
    }

    #[test]
    fn test_create_entry_rejects_internal_node() {
        let mut state = LedgerState::new();
        let fy = state.create_fiscal_year(2025).unwrap().value;
        let p = state.create_ppa(CreatePpa::root("O1", "P")).unwrap().value;
        state.create_ppa(CreatePpa::child(p.id, "child")).unwrap();

        let err = state.create_entry(entry_cmd(p.id, fy.id, amounts(1, 0, 0, 0))).unwrap_err();
        assert!(matches!(err, AipError::NotLeaf { .. }));
    }

    #[test]
    fn test_own_entry_counts_after_children_added() {
        let mut state = LedgerState::new();
        let fy = state.create_fiscal_year(2025).unwrap().value;
        let p = state.create_ppa(CreatePpa::root("O1", "P")).unwrap().value;
        state.create_entry(entry_cmd(p.id, fy.id, amounts(10, 0, 0, 0))).unwrap();

        let child = state.create_ppa(CreatePpa::child(p.id, "child")).unwrap().value;
        state.create_entry(entry_cmd(child.id, fy.id, amounts(0, 5, 0, 0))).unwrap();

        assert_eq!(state.rollup(p.id, fy.id).unwrap().grand_total, dec!(15));
    }

    #[test]
    fn test_closed_year_rejection_leaves_state_unchanged() {
        let mut state = LedgerState::new();
        let fy = state.create_fiscal_year(2025).unwrap().value;
        let p = state.create_ppa(CreatePpa::root("O1", "P")).unwrap().value;
        let entry = state
            .create_entry(entry_cmd(p.id, fy.id, amounts(10, 0, 0, 0)))
            .unwrap()
            .value;

        state
            .set_fiscal_year_status(SetFiscalYearStatus {
                fiscal_year_id: fy.id,
                status: FiscalYearStatus::Closed,
            })
            .unwrap();

        let err = state
            .update_entry(UpdateBudgetEntry {
                id: entry.id,
                fields: EntryFields::with_amounts(amounts(99, 0, 0, 0)),
            })
            .unwrap_err();
        assert!(matches!(err, AipError::FiscalYearClosed { .. }));
        assert!(matches!(state.delete_entry(entry.id), Err(AipError::FiscalYearClosed { .. })));
        assert!(matches!(
            state.create_entry(entry_cmd(p.id, fy.id, amounts(1, 0, 0, 0))),
            Err(AipError::FiscalYearClosed { .. })
        ));

        assert_eq!(state.entry(entry.id).unwrap().amounts.ps, dec!(10));
        assert_eq!(state.rollup(p.id, fy.id).unwrap().grand_total, dec!(10));
    }

    #[test]
    fn test_delete_blocked_by_closed_year_entries() {
        let mut state = LedgerState::new();
        let fy = state.create_fiscal_year(2024).unwrap().value;
        let p = state.create_ppa(CreatePpa::root("O1", "P")).unwrap().value;
        let a = state.create_ppa(CreatePpa::child(p.id, "A")).unwrap().value;
        state.create_entry(entry_cmd(a.id, fy.id, amounts(1, 0, 0, 0))).unwrap();
        state
            .set_fiscal_year_status(SetFiscalYearStatus {
                fiscal_year_id: fy.id,
                status: FiscalYearStatus::Closed,
            })
            .unwrap();

        let err = state.delete_ppa(p.id).unwrap_err();
        assert!(matches!(err, AipError::HasEntriesInClosedYear { .. }));
        assert_eq!(state.tree().len(), 2);
    }

    #[test]
    fn test_delete_cascades_entries_and_plan_items() {
        let mut state = LedgerState::new();
        let fy = state.create_fiscal_year(2025).unwrap().value;
        let p = state.create_ppa(CreatePpa::root("O1", "P")).unwrap().value;
        let a = state.create_ppa(CreatePpa::child(p.id, "A")).unwrap().value;
        let b = state.create_ppa(CreatePpa::child(p.id, "B")).unwrap().value;
        let entry = state
            .create_entry(entry_cmd(a.id, fy.id, amounts(1, 0, 0, 0)))
            .unwrap()
            .value;
        let plan = state
            .create_plan(CreatePlan {
                fiscal_year_id: fy.id,
                office_id: OfficeId::from("O1"),
                title: "PPMP 2025".to_string(),
            })
            .unwrap()
            .value;
        state.attach_plan_item(plan.id, a.id).unwrap();

        let mutation = state.delete_ppa(a.id).unwrap();
        assert_eq!(mutation.value, vec![a.id]);
        assert!(mutation.ops.contains(&StoreOp::DeleteEntry(entry.id)));
        assert!(mutation.ops.contains(&StoreOp::DetachPlanItem {
            plan_id: plan.id,
            node_id: a.id
        }));
        assert!(state.plan_items(plan.id).unwrap().is_empty());
        assert!(state.entry(entry.id).is_err());
        assert_eq!(state.node(b.id).unwrap().code(), "1.1");
    }

    #[test]
    fn test_plan_attach_rules() {
        let mut state = LedgerState::new();
        let fy = state.create_fiscal_year(2025).unwrap().value;
        let mine = state.create_ppa(CreatePpa::root("O1", "Mine")).unwrap().value;
        let theirs = state.create_ppa(CreatePpa::root("O2", "Theirs")).unwrap().value;
        let plan = state
            .create_plan(CreatePlan {
                fiscal_year_id: fy.id,
                office_id: OfficeId::from("O1"),
                title: "PPMP".to_string(),
            })
            .unwrap()
            .value;

        assert!(state.attach_plan_item(plan.id, mine.id).unwrap().audit.is_some());
        assert!(state.attach_plan_item(plan.id, mine.id).unwrap().audit.is_none());
        assert!(matches!(
            state.attach_plan_item(plan.id, theirs.id),
            Err(AipError::OfficeMismatch { .. })
        ));

        assert!(state.detach_plan_item(plan.id, mine.id).unwrap().audit.is_some());
        assert!(state.detach_plan_item(plan.id, mine.id).unwrap().audit.is_none());
    }

    #[test]
    fn test_fiscal_year_in_use_cannot_be_deleted() {
        let mut state = LedgerState::new();
        let fy = state.create_fiscal_year(2025).unwrap().value;
        let p = state.create_ppa(CreatePpa::root("O1", "P")).unwrap().value;
        let entry = state
            .create_entry(entry_cmd(p.id, fy.id, amounts(1, 0, 0, 0)))
            .unwrap()
            .value;

        assert!(matches!(
            state.delete_fiscal_year(fy.id),
            Err(AipError::FiscalYearInUse { .. })
        ));

        state.delete_entry(entry.id).unwrap();
        state.delete_fiscal_year(fy.id).unwrap();
        assert!(state.fiscal_year(fy.id).is_err());
    }

    #[test]
    fn test_status_noop_produces_no_ops() {
        let mut state = LedgerState::new();
        let fy = state.create_fiscal_year(2025).unwrap().value;
        let mutation = state
            .set_fiscal_year_status(SetFiscalYearStatus {
                fiscal_year_id: fy.id,
                status: FiscalYearStatus::Open,
            })
            .unwrap();
        assert!(mutation.ops.is_empty());
        assert!(mutation.audit.is_none());
    }
}
