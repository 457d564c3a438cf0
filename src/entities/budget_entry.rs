// 💰 Budget Entry - one PPA's figures for one fiscal year
//
// Four expense categories (PS, MOOE, FE, CO) plus two climate tags
// (CCET adaptation/mitigation). The tags overlap the categories, so they are
// never part of the grand total.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

use super::{EntryId, FiscalYearId, PpaId};

// ============================================================================
// AMOUNTS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetAmounts {
    /// Personnel Services
    #[serde(default)]
    pub ps: Decimal,

    /// Maintenance & Other Operating Expenses
    #[serde(default)]
    pub mooe: Decimal,

    /// Financial Expenses
    #[serde(default)]
    pub fe: Decimal,

    /// Capital Outlay
    #[serde(default)]
    pub co: Decimal,

    #[serde(default)]
    pub ccet_adaptation: Decimal,

    #[serde(default)]
    pub ccet_mitigation: Decimal,
}

impl BudgetAmounts {
    pub fn new(ps: Decimal, mooe: Decimal, fe: Decimal, co: Decimal) -> Self {
        BudgetAmounts {
            ps,
            mooe,
            fe,
            co,
            ..Default::default()
        }
    }

    pub fn with_climate_tags(mut self, adaptation: Decimal, mitigation: Decimal) -> Self {
        self.ccet_adaptation = adaptation;
        self.ccet_mitigation = mitigation;
        self
    }

    /// PS + MOOE + FE + CO
    pub fn grand_total(&self) -> Decimal {
        self.ps + self.mooe + self.fe + self.co
    }

    /// Field names paired with values, in display order.
    pub fn fields(&self) -> [(&'static str, Decimal); 6] {
        [
            ("ps", self.ps),
            ("mooe", self.mooe),
            ("fe", self.fe),
            ("co", self.co),
            ("ccet_adaptation", self.ccet_adaptation),
            ("ccet_mitigation", self.ccet_mitigation),
        ]
    }

    pub fn is_zero(&self) -> bool {
        self.fields().iter().all(|(_, v)| v.is_zero())
    }
}

impl Add for BudgetAmounts {
    type Output = BudgetAmounts;

    fn add(mut self, rhs: BudgetAmounts) -> BudgetAmounts {
        self += rhs;
        self
    }
}

impl AddAssign for BudgetAmounts {
    fn add_assign(&mut self, rhs: BudgetAmounts) {
        self.ps += rhs.ps;
        self.mooe += rhs.mooe;
        self.fe += rhs.fe;
        self.co += rhs.co;
        self.ccet_adaptation += rhs.ccet_adaptation;
        self.ccet_mitigation += rhs.ccet_mitigation;
    }
}

// ============================================================================
// SCHEDULE
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

// ============================================================================
// BUDGET ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetEntry {
    pub id: EntryId,
    pub ppa_node_id: PpaId,
    pub fiscal_year_id: FiscalYearId,
    pub schedule: Schedule,
    pub expected_output: Option<String>,
    pub amounts: BudgetAmounts,
}

impl BudgetEntry {
    pub fn new(
        ppa_node_id: PpaId,
        fiscal_year_id: FiscalYearId,
        schedule: Schedule,
        expected_output: Option<String>,
        amounts: BudgetAmounts,
    ) -> Self {
        BudgetEntry {
            id: EntryId::new(),
            ppa_node_id,
            fiscal_year_id,
            schedule,
            expected_output,
            amounts,
        }
    }

    pub fn grand_total(&self) -> Decimal {
        self.amounts.grand_total()
    }
}
