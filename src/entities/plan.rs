// 🧾 Procurement Plan (PPMP) - only the attachment boundary lives here

use serde::{Deserialize, Serialize};

use super::{FiscalYearId, OfficeId, PlanId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcurementPlan {
    pub id: PlanId,
    pub fiscal_year_id: FiscalYearId,
    pub office_id: OfficeId,
    pub title: String,
}

impl ProcurementPlan {
    pub fn new(fiscal_year_id: FiscalYearId, office_id: OfficeId, title: String) -> Self {
        ProcurementPlan {
            id: PlanId::new(),
            fiscal_year_id,
            office_id,
            title,
        }
    }
}
