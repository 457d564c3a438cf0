// ∑ Budget Aggregator - bottom-up roll-up per fiscal year
//
//   rollup(node) = own entry (if any) + Σ rollup(child)
//
// Roll-ups are derived, never ground truth. They are memoized per
// (node, fiscal year) and invalidated only along the ancestor chain of a
// changed entry, so a write costs at most tree depth in recomputation.

use std::collections::HashMap;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entities::{BudgetAmounts, FiscalYearId, PpaId};
use crate::error::Result;
use crate::tree::PpaTree;

/// Anything that can answer "what did this node budget for this year".
pub trait EntrySource {
    fn own_amounts(&self, node: PpaId, fiscal_year: FiscalYearId) -> Option<BudgetAmounts>;
}

// ============================================================================
// ROLLUP VALUE
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rollup {
    pub ps: Decimal,
    pub mooe: Decimal,
    pub fe: Decimal,
    pub co: Decimal,
    pub ccet_adaptation: Decimal,
    pub ccet_mitigation: Decimal,

    /// ps + mooe + fe + co
    pub grand_total: Decimal,
}

impl Rollup {
    pub fn absorb(&mut self, other: &Rollup) {
        self.ps += other.ps;
        self.mooe += other.mooe;
        self.fe += other.fe;
        self.co += other.co;
        self.ccet_adaptation += other.ccet_adaptation;
        self.ccet_mitigation += other.ccet_mitigation;
        self.grand_total += other.grand_total;
    }
}

impl From<BudgetAmounts> for Rollup {
    fn from(amounts: BudgetAmounts) -> Self {
        Rollup {
            ps: amounts.ps,
            mooe: amounts.mooe,
            fe: amounts.fe,
            co: amounts.co,
            ccet_adaptation: amounts.ccet_adaptation,
            ccet_mitigation: amounts.ccet_mitigation,
            grand_total: amounts.grand_total(),
        }
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// Memoizing aggregator. Each ledger snapshot owns one; cloning copies the
/// memo table so a writer can invalidate its copy without touching readers.
#[derive(Debug, Default)]
pub struct BudgetAggregator {
    cache: Mutex<HashMap<(PpaId, FiscalYearId), Rollup>>,
}

impl Clone for BudgetAggregator {
    fn clone(&self) -> Self {
        BudgetAggregator {
            cache: Mutex::new(self.cache.lock().clone()),
        }
    }
}

impl BudgetAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roll-up of `node` for `fiscal_year`. Leaves without an entry are zero.
    pub fn rollup<S: EntrySource>(
        &self,
        tree: &PpaTree,
        entries: &S,
        node: PpaId,
        fiscal_year: FiscalYearId,
    ) -> Result<Rollup> {
        tree.node(node)?;
        Ok(self.compute(tree, entries, node, fiscal_year))
    }

    fn compute<S: EntrySource>(
        &self,
        tree: &PpaTree,
        entries: &S,
        node: PpaId,
        fiscal_year: FiscalYearId,
    ) -> Rollup {
        if let Some(hit) = self.cache.lock().get(&(node, fiscal_year)) {
            return *hit;
        }

        let mut total = entries
            .own_amounts(node, fiscal_year)
            .map(Rollup::from)
            .unwrap_or_default();

        for child in tree.children(node) {
            total.absorb(&self.compute(tree, entries, *child, fiscal_year));
        }

        self.cache.lock().insert((node, fiscal_year), total);
        total
    }

    /// Cached value, if any. Does not compute.
    pub fn cached(&self, node: PpaId, fiscal_year: FiscalYearId) -> Option<Rollup> {
        self.cache.lock().get(&(node, fiscal_year)).copied()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Copy of every memoized value.
    pub fn cached_entries(&self) -> Vec<((PpaId, FiscalYearId), Rollup)> {
        self.cache.lock().iter().map(|(k, v)| (*k, *v)).collect()
    }

    /// Drop `node` and its ancestors for one fiscal year.
    pub fn invalidate_chain(&self, tree: &PpaTree, node: PpaId, fiscal_year: FiscalYearId) {
        let mut cache = self.cache.lock();
        cache.remove(&(node, fiscal_year));
        let ancestors = tree.ancestors(node);
        for ancestor in &ancestors {
            cache.remove(&(*ancestor, fiscal_year));
        }
        debug!(node_id = %node, depth = ancestors.len(), "rollup chain invalidated");
    }

    /// Drop `node` and its ancestors for every fiscal year.
    pub fn invalidate_chain_all_years(&self, tree: &PpaTree, node: PpaId) {
        let mut chain = tree.ancestors(node);
        chain.push(node);
        self.cache.lock().retain(|(n, _), _| !chain.contains(n));
    }

    /// Forget nodes that no longer exist.
    pub fn forget(&self, nodes: &[PpaId]) {
        self.cache.lock().retain(|(n, _), _| !nodes.contains(n));
    }

    /// Forget everything cached for a fiscal year.
    pub fn forget_year(&self, fiscal_year: FiscalYearId) {
        self.cache.lock().retain(|(_, fy), _| *fy != fiscal_year);
    }
}
