// 🚦 Fiscal Year Gate - Open ⇄ Closed
//
// Every budget entry create/update/delete asks the gate first. Tree shape is
// year-independent, so structural mutations never come through here.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::entities::{FiscalYear, FiscalYearId, FiscalYearStatus};
use crate::error::{AipError, Result};

#[derive(Debug, Clone, Default)]
pub struct FiscalYearGate {
    years: HashMap<FiscalYearId, FiscalYear>,
}

impl FiscalYearGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(years: Vec<FiscalYear>) -> Self {
        FiscalYearGate {
            years: years.into_iter().map(|fy| (fy.id, fy)).collect(),
        }
    }

    /// Register a new (Open) fiscal year. Year labels are unique.
    pub fn create(&mut self, year: i32) -> Result<FiscalYear> {
        if !(1900..=9999).contains(&year) {
            return Err(AipError::invalid("year", format!("{} is out of range", year)));
        }
        if self.find_by_year(year).is_some() {
            return Err(AipError::invalid("year", format!("fiscal year {} already exists", year)));
        }

        let fy = FiscalYear::new(year);
        self.years.insert(fy.id, fy.clone());
        Ok(fy)
    }

    pub fn get(&self, id: FiscalYearId) -> Result<&FiscalYear> {
        self.years
            .get(&id)
            .ok_or_else(|| AipError::not_found("fiscal year", id))
    }

    pub fn find_by_year(&self, year: i32) -> Option<&FiscalYear> {
        self.years.values().find(|fy| fy.year == year)
    }

    /// All fiscal years, oldest first.
    pub fn list(&self) -> Vec<FiscalYear> {
        let mut years: Vec<FiscalYear> = self.years.values().cloned().collect();
        years.sort_by_key(|fy| fy.year);
        years
    }

    pub fn is_closed(&self, id: FiscalYearId) -> bool {
        self.years
            .get(&id)
            .map_or(false, |fy| fy.status == FiscalYearStatus::Closed)
    }

    /// Ok when budget data of `id` may change.
    pub fn authorize_mutation(&self, id: FiscalYearId) -> Result<&FiscalYear> {
        let fy = self.get(id)?;
        if fy.is_open() {
            Ok(fy)
        } else {
            warn!(fiscal_year = fy.year, "budget mutation rejected: fiscal year closed");
            Err(AipError::FiscalYearClosed {
                fiscal_year_id: id.to_string(),
                year: fy.year,
            })
        }
    }

    /// Pure state change. Setting the current status again is a successful
    /// no-op; the return value says whether anything changed.
    pub fn set_status(&mut self, id: FiscalYearId, status: FiscalYearStatus) -> Result<bool> {
        let fy = self
            .years
            .get_mut(&id)
            .ok_or_else(|| AipError::not_found("fiscal year", id))?;

        if fy.status == status {
            return Ok(false);
        }

        fy.status = status;
        info!(fiscal_year = fy.year, status = status.as_str(), "fiscal year status changed");
        Ok(true)
    }

    pub(crate) fn remove(&mut self, id: FiscalYearId) -> Result<FiscalYear> {
        self.years
            .remove(&id)
            .ok_or_else(|| AipError::not_found("fiscal year", id))
    }
}
