// 📅 Fiscal Year - Open/Closed lifecycle gating budget mutations

use serde::{Deserialize, Serialize};

use super::FiscalYearId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiscalYearStatus {
    Open,
    Closed,
}

impl FiscalYearStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FiscalYearStatus::Open => "Open",
            FiscalYearStatus::Closed => "Closed",
        }
    }

    pub fn parse(value: &str) -> Option<FiscalYearStatus> {
        match value.to_ascii_lowercase().as_str() {
            "open" => Some(FiscalYearStatus::Open),
            "closed" => Some(FiscalYearStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalYear {
    pub id: FiscalYearId,

    /// Year label, e.g. 2025
    pub year: i32,

    pub status: FiscalYearStatus,
}

impl FiscalYear {
    /// New fiscal years start Open.
    pub fn new(year: i32) -> Self {
        FiscalYear {
            id: FiscalYearId::new(),
            year,
            status: FiscalYearStatus::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == FiscalYearStatus::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_fiscal_year_is_open() {
        let fy = FiscalYear::new(2025);
        assert_eq!(fy.year, 2025);
        assert!(fy.is_open());
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(FiscalYearStatus::parse("CLOSED"), Some(FiscalYearStatus::Closed));
        assert_eq!(FiscalYearStatus::parse("open"), Some(FiscalYearStatus::Open));
        assert_eq!(FiscalYearStatus::parse("archived"), None);
    }
}
