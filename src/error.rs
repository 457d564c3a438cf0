//! Error types for the AIP ledger.

use std::fmt;

use thiserror::Error;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        FieldError {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors surfaced by every ledger operation.
///
/// Validation and policy failures are deterministic; only `ConcurrencyConflict`
/// and `Storage` depend on what else is touching the database.
#[derive(Debug, Error)]
pub enum AipError {
    /// Referenced node, entry, fiscal year or plan does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Structural rule violation on create.
    #[error("invalid parent {parent_id}: {reason}")]
    InvalidParent { parent_id: String, reason: String },

    /// Root PPA created without an office.
    #[error("root PPA requires an office")]
    MissingOffice,

    /// Budget mutation attempted against a Closed fiscal year.
    #[error("fiscal year {year} ({fiscal_year_id}) is closed")]
    FiscalYearClosed { fiscal_year_id: String, year: i32 },

    /// Second entry for the same node and fiscal year.
    #[error("PPA {node_id} already has an entry for fiscal year {fiscal_year_id}")]
    DuplicateEntry {
        node_id: String,
        fiscal_year_id: String,
    },

    /// Delete blocked because the subtree holds closed-year entries.
    #[error("PPA {node_id} holds entries in closed fiscal year {fiscal_year_id}")]
    HasEntriesInClosedYear {
        node_id: String,
        fiscal_year_id: String,
    },

    /// Commit lost the race for the sibling set or the database lock.
    #[error("concurrent modification, gave up after {attempts} attempt(s)")]
    ConcurrencyConflict { attempts: u32 },

    /// Entry attached to a node that already has children.
    #[error("PPA {node_id} has children and cannot hold its own entry")]
    NotLeaf { node_id: String },

    /// Fiscal year still referenced by entries or plans.
    #[error("fiscal year {fiscal_year_id} is still referenced")]
    FiscalYearInUse { fiscal_year_id: String },

    /// PPA and procurement plan belong to different offices.
    #[error("PPA office {node_office} does not match plan office {plan_office}")]
    OfficeMismatch {
        node_office: String,
        plan_office: String,
    },

    /// Policy denied the action at the API boundary.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {}", join_fields(.0))]
    Invalid(Vec<FieldError>),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl AipError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        AipError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        AipError::Invalid(vec![FieldError::new(field, message)])
    }

    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            AipError::NotFound { .. } => "not_found",
            AipError::InvalidParent { .. } => "invalid_parent",
            AipError::MissingOffice => "missing_office",
            AipError::FiscalYearClosed { .. } => "fiscal_year_closed",
            AipError::DuplicateEntry { .. } => "duplicate_entry",
            AipError::HasEntriesInClosedYear { .. } => "has_entries_in_closed_year",
            AipError::ConcurrencyConflict { .. } => "concurrency_conflict",
            AipError::NotLeaf { .. } => "not_leaf",
            AipError::FiscalYearInUse { .. } => "fiscal_year_in_use",
            AipError::OfficeMismatch { .. } => "office_mismatch",
            AipError::Forbidden(_) => "forbidden",
            AipError::Invalid(_) => "invalid",
            AipError::Storage(_) => "storage",
            AipError::Serialization(_) => "serialization",
            AipError::Csv(_) => "csv",
            AipError::Io(_) => "io",
        }
    }

    /// True for policy/validation rejections (as opposed to system faults).
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            AipError::Storage(_)
                | AipError::Serialization(_)
                | AipError::Csv(_)
                | AipError::Io(_)
                | AipError::ConcurrencyConflict { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AipError>;
