// AIP Ledger - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;          // Error taxonomy
pub mod config;         // Environment configuration
pub mod entities;       // PPA nodes, fiscal years, entries, plans
pub mod codes;          // Code Generator
pub mod tree;           // Tree Store
pub mod gate;           // Fiscal Year Gate
pub mod book;           // Budget entries per (node, fiscal year)
pub mod rollup;         // Budget Aggregator
pub mod commands;       // Inbound commands
pub mod validation;     // Field-level checks
pub mod state;          // Immutable ledger snapshot + transitions
pub mod store;          // SQLite persistence + audit trail
pub mod ledger;         // Composition root
pub mod summary;        // Summary Builder
pub mod integrity;      // Invariant verification
pub mod policy;         // Authorization at the API boundary
pub mod csv_io;         // Outline import, summary export

#[cfg(feature = "server")]
pub mod api;            // HTTP API

// Re-export commonly used types
pub use commands::{
    CreateBudgetEntry, CreatePlan, CreatePpa, DeletePpa, EntryFields, SetFiscalYearStatus,
    UpdateBudgetEntry,
};
pub use config::Config;
pub use entities::{
    BudgetAmounts, BudgetEntry, EntryId, FiscalYear, FiscalYearId, FiscalYearStatus, OfficeId,
    PlanId, PpaId, PpaKind, PpaNode, ProcurementPlan, Schedule,
};
pub use error::{AipError, FieldError, Result};
pub use integrity::{Discrepancy, DiscrepancyCategory, IntegrityChecker, IntegrityReport};
pub use ledger::Ledger;
pub use policy::{Action, Actor, AllowAll, Decision, DenyAll, OfficeScoped, Policy, Resource, Role};
pub use rollup::{BudgetAggregator, EntrySource, Rollup};
pub use state::LedgerState;
pub use store::{setup_database, Event, StoreOp};
pub use summary::{SummaryBuilder, SummaryNode, SummaryRow, TreeSummary};
pub use tree::PpaTree;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
