// 📨 Commands - what the request validation layer hands to the ledger

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entities::{
    BudgetAmounts, EntryId, FiscalYearId, FiscalYearStatus, OfficeId, PpaId, Schedule,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePpa {
    #[serde(default)]
    pub parent_id: Option<PpaId>,
    #[serde(default)]
    pub office_id: Option<OfficeId>,
    pub description: String,
}

impl CreatePpa {
    pub fn root(office_id: impl Into<String>, description: impl Into<String>) -> Self {
        CreatePpa {
            parent_id: None,
            office_id: Some(OfficeId(office_id.into())),
            description: description.into(),
        }
    }

    pub fn child(parent_id: PpaId, description: impl Into<String>) -> Self {
        CreatePpa {
            parent_id: Some(parent_id),
            office_id: None,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeletePpa {
    pub id: PpaId,
}

/// Schedule, output and figures shared by create and update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryFields {
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(flatten)]
    pub amounts: BudgetAmounts,
}

impl EntryFields {
    pub fn with_amounts(amounts: BudgetAmounts) -> Self {
        EntryFields {
            amounts,
            ..Default::default()
        }
    }

    pub fn schedule(&self) -> Schedule {
        Schedule {
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }

    /// Trimmed, with blank text treated as absent.
    pub fn normalized_output(&self) -> Option<String> {
        self.expected_output
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBudgetEntry {
    pub node_id: PpaId,
    pub fiscal_year_id: FiscalYearId,
    #[serde(flatten)]
    pub fields: EntryFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBudgetEntry {
    pub id: EntryId,
    #[serde(flatten)]
    pub fields: EntryFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetFiscalYearStatus {
    pub fiscal_year_id: FiscalYearId,
    pub status: FiscalYearStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePlan {
    pub fiscal_year_id: FiscalYearId,
    pub office_id: OfficeId,
    pub title: String,
}
