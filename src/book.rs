// 📒 Budget Book - entry storage, unique on (PPA, fiscal year)

use std::collections::HashMap;

use crate::entities::{BudgetAmounts, BudgetEntry, EntryId, FiscalYearId, PpaId};
use crate::error::{AipError, Result};
use crate::rollup::EntrySource;

#[derive(Debug, Clone, Default)]
pub struct BudgetBook {
    entries: HashMap<EntryId, BudgetEntry>,
    by_node_year: HashMap<(PpaId, FiscalYearId), EntryId>,
}

impl BudgetBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(entries: Vec<BudgetEntry>) -> Result<Self> {
        let mut book = BudgetBook::new();
        for entry in entries {
            book.insert(entry)?;
        }
        Ok(book)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: EntryId) -> Result<&BudgetEntry> {
        self.entries
            .get(&id)
            .ok_or_else(|| AipError::not_found("budget entry", id))
    }

    pub fn for_node(&self, node: PpaId, fiscal_year: FiscalYearId) -> Option<&BudgetEntry> {
        self.by_node_year
            .get(&(node, fiscal_year))
            .and_then(|id| self.entries.get(id))
    }

    /// Every entry a node holds, across years.
    pub fn all_for_node(&self, node: PpaId) -> impl Iterator<Item = &BudgetEntry> {
        self.entries.values().filter(move |e| e.ppa_node_id == node)
    }

    pub fn references_year(&self, fiscal_year: FiscalYearId) -> bool {
        self.entries.values().any(|e| e.fiscal_year_id == fiscal_year)
    }

    /// Insert, enforcing one entry per (node, year).
    pub fn insert(&mut self, entry: BudgetEntry) -> Result<()> {
        let key = (entry.ppa_node_id, entry.fiscal_year_id);
        if self.by_node_year.contains_key(&key) {
            return Err(AipError::DuplicateEntry {
                node_id: entry.ppa_node_id.to_string(),
                fiscal_year_id: entry.fiscal_year_id.to_string(),
            });
        }
        self.by_node_year.insert(key, entry.id);
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    /// Replace an entry's values. Node and fiscal year stay fixed.
    pub fn replace(&mut self, entry: BudgetEntry) -> Result<BudgetEntry> {
        let current = self
            .entries
            .get_mut(&entry.id)
            .ok_or_else(|| AipError::not_found("budget entry", entry.id))?;

        if current.ppa_node_id != entry.ppa_node_id || current.fiscal_year_id != entry.fiscal_year_id {
            return Err(AipError::invalid(
                "id",
                "an entry's PPA and fiscal year cannot change",
            ));
        }

        Ok(std::mem::replace(current, entry))
    }

    pub fn remove(&mut self, id: EntryId) -> Result<BudgetEntry> {
        let entry = self
            .entries
            .remove(&id)
            .ok_or_else(|| AipError::not_found("budget entry", id))?;
        self.by_node_year
            .remove(&(entry.ppa_node_id, entry.fiscal_year_id));
        Ok(entry)
    }
}

impl EntrySource for BudgetBook {
    fn own_amounts(&self, node: PpaId, fiscal_year: FiscalYearId) -> Option<BudgetAmounts> {
        self.for_node(node, fiscal_year).map(|e| e.amounts)
    }
}
