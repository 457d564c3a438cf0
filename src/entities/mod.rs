// Entity Models - the AIP planning vocabulary
//
// Each entity has a stable identity (UUID) that never changes. Structure
// (parent links, ordinals, codes) is owned by the tree store; budget figures
// hang off PPAs per fiscal year.

pub mod budget_entry;
pub mod fiscal_year;
pub mod plan;
pub mod ppa;

pub use budget_entry::{BudgetAmounts, BudgetEntry, Schedule};
pub use fiscal_year::{FiscalYear, FiscalYearStatus};
pub use plan::ProcurementPlan;
pub use ppa::{PpaKind, PpaNode};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map($name)
            }
        }
    };
}

entity_id!(
    /// Identity of a PPA node
    PpaId
);
entity_id!(
    /// Identity of a fiscal year
    FiscalYearId
);
entity_id!(
    /// Identity of a budget entry
    EntryId
);
entity_id!(
    /// Identity of a procurement plan
    PlanId
);

/// Office owning a PPA subtree. Offices live outside this crate; only the
/// identifier is carried.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfficeId(pub String);

impl OfficeId {
    pub fn new(id: impl Into<String>) -> Self {
        OfficeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OfficeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OfficeId {
    fn from(value: &str) -> Self {
        OfficeId(value.to_string())
    }
}
