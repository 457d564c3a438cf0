// 📒 Ledger - composition root for the AIP engine
//
// Readers take the published `Arc<LedgerState>` and never wait on a writer.
// Writers hold the connection mutex, which serializes every sibling set,
// build the next state on a private copy, persist its ops plus one audit
// event in a single IMMEDIATE transaction, and only then publish. A commit
// is refused when the database generation moved past the copy's, so other
// processes sharing the file are never written over.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::commands::{
    CreateBudgetEntry, CreatePlan, CreatePpa, DeletePpa, SetFiscalYearStatus, UpdateBudgetEntry,
};
use crate::config::Config;
use crate::entities::{
    BudgetEntry, EntryId, FiscalYear, FiscalYearId, PlanId, PpaId, PpaNode, ProcurementPlan,
};
use crate::error::{AipError, Result};
use crate::integrity::{IntegrityChecker, IntegrityReport};
use crate::rollup::Rollup;
use crate::state::{LedgerState, Mutation};
use crate::store::{self, Commit, Event, StoreOp};
use crate::summary::{SummaryBuilder, TreeSummary};

pub struct Ledger {
    config: Config,
    conn: Mutex<Connection>,
    current: RwLock<Arc<LedgerState>>,
}

impl Ledger {
    /// Open (or create) the database at `config.db_path`.
    pub fn open(config: Config) -> Result<Self> {
        let conn = Connection::open(&config.db_path)?;
        info!(path = %config.db_path.display(), "opened AIP database");
        Self::with_connection(conn, config)
    }

    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::default().with_db_path(path.as_ref()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, Config::default())
    }

    pub fn with_connection(conn: Connection, config: Config) -> Result<Self> {
        // busy waits are handled by the commit retry loop
        conn.busy_timeout(config.retry_backoff)?;
        store::setup_database(&conn)?;
        let state = store::load_state(&conn)?;

        debug!(
            nodes = state.tree().len(),
            entries = state.book().len(),
            "ledger state loaded"
        );

        Ok(Ledger {
            config,
            conn: Mutex::new(conn),
            current: RwLock::new(Arc::new(state)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current committed snapshot.
    pub fn snapshot(&self) -> Arc<LedgerState> {
        Arc::clone(&self.current.read())
    }

    /// Re-read everything from disk, picking up other writers' commits.
    pub fn reload(&self) -> Result<()> {
        let conn = self.conn.lock();
        self.refresh(&conn)
    }

    fn refresh(&self, conn: &Connection) -> Result<()> {
        let state = store::load_state(conn)?;
        *self.current.write() = Arc::new(state);
        Ok(())
    }

    /// Run `apply` against a copy of the current state and commit the result.
    ///
    /// The commit only lands if the database is still at the generation the
    /// copy was loaded from. When another connection got there first (a newer
    /// generation, a claimed sibling slot, or a busy lock) the state is
    /// reloaded and `apply` runs again, up to `max_commit_attempts` times.
    fn mutate<T, F>(&self, actor: &str, mut apply: F) -> Result<T>
    where
        F: FnMut(&mut LedgerState) -> Result<Mutation<T>>,
    {
        let mut conn = self.conn.lock();
        let max_attempts = self.config.max_commit_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut next = self.snapshot().as_ref().clone();
            let Mutation { value, mut ops, audit } = apply(&mut next)?;

            let Some(audit) = audit else {
                return Ok(value);
            };
            ops.push(StoreOp::Event(Event::new(
                audit.event_type,
                audit.entity_type,
                &audit.entity_id,
                audit.data,
                actor,
            )));

            match store::apply_ops(&mut conn, next.generation, &ops) {
                Ok(Commit::Applied { generation }) => {
                    next.generation = generation;
                    *self.current.write() = Arc::new(next);
                    debug!(event = audit.event_type, actor, attempt, generation, "mutation committed");
                    return Ok(value);
                }
                Ok(Commit::Stale { found }) => {
                    debug!(
                        event = audit.event_type,
                        loaded = next.generation,
                        found,
                        "database moved on, reloading"
                    );
                }
                Err(err) if store::is_slot_conflict(&err) => {
                    warn!(event = audit.event_type, error = %err, "slot claimed by another writer");
                }
                Err(err) if store::is_contention(&err) => {
                    if attempt < max_attempts {
                        warn!(event = audit.event_type, attempt, "database busy, retrying commit");
                        std::thread::sleep(self.config.retry_backoff * attempt);
                    }
                }
                Err(err) => return Err(err.into()),
            }

            // later calls start from what is on disk even when this one gives up
            self.refresh(&conn)?;
            if attempt >= max_attempts {
                warn!(event = audit.event_type, attempts = attempt, "giving up on commit");
                return Err(AipError::ConcurrencyConflict { attempts: attempt });
            }
        }
    }

    // ========================================================================
    // FISCAL YEARS
    // ========================================================================

    pub fn create_fiscal_year(&self, year: i32, actor: &str) -> Result<FiscalYear> {
        self.mutate(actor, |state| state.create_fiscal_year(year))
    }

    pub fn set_fiscal_year_status(&self, cmd: SetFiscalYearStatus, actor: &str) -> Result<FiscalYear> {
        self.mutate(actor, |state| state.set_fiscal_year_status(cmd))
    }

    pub fn delete_fiscal_year(&self, id: FiscalYearId, actor: &str) -> Result<FiscalYear> {
        self.mutate(actor, |state| state.delete_fiscal_year(id))
    }

    pub fn list_fiscal_years(&self) -> Vec<FiscalYear> {
        self.snapshot().gate().list()
    }

    pub fn get_fiscal_year(&self, id: FiscalYearId) -> Result<FiscalYear> {
        self.snapshot().fiscal_year(id).cloned()
    }

    pub fn find_fiscal_year(&self, year: i32) -> Option<FiscalYear> {
        self.snapshot().gate().find_by_year(year).cloned()
    }

    // ========================================================================
    // PPA STRUCTURE
    // ========================================================================

    pub fn create_ppa(&self, cmd: CreatePpa, actor: &str) -> Result<PpaNode> {
        self.mutate(actor, |state| state.create_ppa(cmd.clone()))
    }

    /// Returns the ids of every removed node.
    pub fn delete_ppa(&self, cmd: DeletePpa, actor: &str) -> Result<Vec<PpaId>> {
        self.mutate(actor, |state| state.delete_ppa(cmd.id))
    }

    pub fn set_ppa_active(&self, id: PpaId, active: bool, actor: &str) -> Result<PpaNode> {
        self.mutate(actor, |state| state.set_ppa_active(id, active))
    }

    pub fn get_node(&self, id: PpaId) -> Result<PpaNode> {
        self.snapshot().node(id).cloned()
    }

    pub fn find_by_code(&self, code: &str) -> Option<PpaNode> {
        self.snapshot().tree().find_by_code(code).cloned()
    }

    pub fn children_of(&self, parent: Option<PpaId>) -> Result<Vec<PpaNode>> {
        self.snapshot().children(parent)
    }

    // ========================================================================
    // BUDGET ENTRIES
    // ========================================================================

    pub fn create_entry(&self, cmd: CreateBudgetEntry, actor: &str) -> Result<BudgetEntry> {
        self.mutate(actor, |state| state.create_entry(cmd.clone()))
    }

    pub fn update_entry(&self, cmd: UpdateBudgetEntry, actor: &str) -> Result<BudgetEntry> {
        self.mutate(actor, |state| state.update_entry(cmd.clone()))
    }

    pub fn delete_entry(&self, id: EntryId, actor: &str) -> Result<BudgetEntry> {
        self.mutate(actor, |state| state.delete_entry(id))
    }

    pub fn get_entry(&self, id: EntryId) -> Result<BudgetEntry> {
        self.snapshot().entry(id).cloned()
    }

    pub fn entry_for(&self, node: PpaId, fiscal_year: FiscalYearId) -> Option<BudgetEntry> {
        self.snapshot().entry_for(node, fiscal_year).cloned()
    }

    // ========================================================================
    // READ MODELS
    // ========================================================================

    pub fn rollup(&self, node: PpaId, fiscal_year: FiscalYearId) -> Result<Rollup> {
        self.snapshot().rollup(node, fiscal_year)
    }

    pub fn tree_summary(&self, root: Option<PpaId>, fiscal_year: FiscalYearId) -> Result<TreeSummary> {
        let snapshot = self.snapshot();
        SummaryBuilder::new(&snapshot).build(root, fiscal_year)
    }

    pub fn verify(&self) -> IntegrityReport {
        IntegrityChecker::new().verify(&self.snapshot())
    }

    // ========================================================================
    // PROCUREMENT PLANS
    // ========================================================================

    pub fn create_plan(&self, cmd: CreatePlan, actor: &str) -> Result<ProcurementPlan> {
        self.mutate(actor, |state| state.create_plan(cmd.clone()))
    }

    pub fn get_plan(&self, id: PlanId) -> Result<ProcurementPlan> {
        self.snapshot().plan(id).cloned()
    }

    pub fn attach_plan_item(&self, plan_id: PlanId, node_id: PpaId, actor: &str) -> Result<()> {
        self.mutate(actor, |state| state.attach_plan_item(plan_id, node_id))
    }

    pub fn detach_plan_item(&self, plan_id: PlanId, node_id: PpaId, actor: &str) -> Result<()> {
        self.mutate(actor, |state| state.detach_plan_item(plan_id, node_id))
    }

    pub fn plan_items(&self, plan_id: PlanId) -> Result<Vec<PpaNode>> {
        self.snapshot().plan_items(plan_id)
    }

    // ========================================================================
    // AUDIT TRAIL
    // ========================================================================

    pub fn events_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        store::get_events_for_entity(&conn, entity_type, entity_id)
    }
}
