// 📊 Summary Builder - nested PPA + entry + roll-up view for one fiscal year
//
// Read-only. Built from a single snapshot so every figure in one summary
// comes from the same committed state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entities::{BudgetEntry, FiscalYear, FiscalYearId, PpaId, PpaNode};
use crate::error::Result;
use crate::rollup::Rollup;
use crate::state::LedgerState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryNode {
    pub node: PpaNode,
    pub entry: Option<BudgetEntry>,
    pub rollup: Rollup,
    pub children: Vec<SummaryNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSummary {
    pub fiscal_year: FiscalYear,
    pub roots: Vec<SummaryNode>,

    /// Sum of the root roll-ups in this summary
    pub totals: Rollup,
}

/// One line of a flattened summary, in code order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub code: String,
    pub kind: String,
    pub office_id: String,
    pub description: String,
    pub depth: usize,
    pub expected_output: String,
    pub start_date: String,
    pub end_date: String,
    pub ps: Decimal,
    pub mooe: Decimal,
    pub fe: Decimal,
    pub co: Decimal,
    pub ccet_adaptation: Decimal,
    pub ccet_mitigation: Decimal,
    pub grand_total: Decimal,
}

impl TreeSummary {
    /// Depth-first rows. Amount columns carry the node's roll-up.
    pub fn rows(&self) -> Vec<SummaryRow> {
        let mut rows = Vec::new();
        for root in &self.roots {
            flatten(root, &mut rows);
        }
        rows
    }

    pub fn find(&self, code: &str) -> Option<&SummaryNode> {
        fn walk<'a>(nodes: &'a [SummaryNode], code: &str) -> Option<&'a SummaryNode> {
            for n in nodes {
                if n.node.code() == code {
                    return Some(n);
                }
                if let Some(hit) = walk(&n.children, code) {
                    return Some(hit);
                }
            }
            None
        }
        walk(&self.roots, code)
    }
}

fn flatten(node: &SummaryNode, rows: &mut Vec<SummaryRow>) {
    let schedule = node.entry.as_ref().map(|e| e.schedule);
    let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();

    rows.push(SummaryRow {
        code: node.node.code().to_string(),
        kind: node.node.kind.as_str().to_string(),
        office_id: node.node.office_id.to_string(),
        description: node.node.description.clone(),
        depth: node.node.depth(),
        expected_output: node
            .entry
            .as_ref()
            .and_then(|e| e.expected_output.clone())
            .unwrap_or_default(),
        start_date: date(schedule.and_then(|s| s.start_date)),
        end_date: date(schedule.and_then(|s| s.end_date)),
        ps: node.rollup.ps,
        mooe: node.rollup.mooe,
        fe: node.rollup.fe,
        co: node.rollup.co,
        ccet_adaptation: node.rollup.ccet_adaptation,
        ccet_mitigation: node.rollup.ccet_mitigation,
        grand_total: node.rollup.grand_total,
    });

    for child in &node.children {
        flatten(child, rows);
    }
}

pub struct SummaryBuilder<'a> {
    state: &'a LedgerState,
}

impl<'a> SummaryBuilder<'a> {
    pub fn new(state: &'a LedgerState) -> Self {
        SummaryBuilder { state }
    }

    /// Summary of one subtree, or of the whole forest when `root` is `None`.
    pub fn build(&self, root: Option<PpaId>, fiscal_year: FiscalYearId) -> Result<TreeSummary> {
        let fy = self.state.fiscal_year(fiscal_year)?.clone();

        let root_ids: Vec<PpaId> = match root {
            Some(id) => {
                self.state.node(id)?;
                vec![id]
            }
            None => self.state.tree().roots().to_vec(),
        };

        let mut totals = Rollup::default();
        let mut roots = Vec::with_capacity(root_ids.len());
        for id in root_ids {
            let built = self.build_node(id, fiscal_year)?;
            totals.absorb(&built.rollup);
            roots.push(built);
        }

        Ok(TreeSummary {
            fiscal_year: fy,
            roots,
            totals,
        })
    }

    fn build_node(&self, id: PpaId, fiscal_year: FiscalYearId) -> Result<SummaryNode> {
        let node = self.state.node(id)?.clone();
        let rollup = self.state.rollup(id, fiscal_year)?;
        let entry = self.state.entry_for(id, fiscal_year).cloned();

        let children = self
            .state
            .tree()
            .children(id)
            .iter()
            .map(|child| self.build_node(*child, fiscal_year))
            .collect::<Result<Vec<_>>>()?;

        Ok(SummaryNode {
            node,
            entry,
            rollup,
            children,
        })
    }
}
