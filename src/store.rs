use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::book::BudgetBook;
use crate::entities::{
    BudgetAmounts, BudgetEntry, EntryId, FiscalYear, FiscalYearId, FiscalYearStatus, OfficeId,
    PlanId, PpaId, PpaKind, PpaNode, ProcurementPlan, Schedule,
};
use crate::error::Result;
use crate::gate::FiscalYearGate;
use crate::state::LedgerState;
use crate::tree::PpaTree;

/// Index guarding one ordinal per slot in every sibling set.
pub const SIBLING_GUARD_INDEX: &str = "idx_ppa_sibling_ordinal";

/// Event for audit trail (every change is an event)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// One row-level change. A mutation's ops are applied in order inside a
/// single transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    InsertFiscalYear(FiscalYear),
    UpdateFiscalYearStatus { id: FiscalYearId, status: FiscalYearStatus },
    DeleteFiscalYear(FiscalYearId),
    InsertNode(PpaNode),
    /// Children before parents
    DeleteNodes(Vec<PpaId>),
    Recode { id: PpaId, ordinal: u32, code: String },
    SetActive { id: PpaId, active: bool },
    InsertEntry(BudgetEntry),
    UpdateEntry(BudgetEntry),
    DeleteEntry(EntryId),
    InsertPlan(ProcurementPlan),
    AttachPlanItem { plan_id: PlanId, node_id: PpaId },
    DetachPlanItem { plan_id: PlanId, node_id: PpaId },
    Event(Event),
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL lets readers keep a consistent snapshot while a writer commits
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Fiscal Years
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fiscal_years (
            id TEXT PRIMARY KEY,
            year INTEGER UNIQUE NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('Open', 'Closed'))
        )",
        [],
    )?;

    // ==========================================================================
    // PPA Nodes (code and ordinal are derived but persisted)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ppa_nodes (
            id TEXT PRIMARY KEY,
            parent_id TEXT REFERENCES ppa_nodes(id),
            office_id TEXT NOT NULL,
            description TEXT NOT NULL,
            kind TEXT NOT NULL,
            ordinal INTEGER NOT NULL CHECK (ordinal > 0),
            code TEXT UNIQUE NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Budget Entries - one per (PPA, fiscal year), amounts as decimal text
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS budget_entries (
            id TEXT PRIMARY KEY,
            ppa_node_id TEXT NOT NULL REFERENCES ppa_nodes(id),
            fiscal_year_id TEXT NOT NULL REFERENCES fiscal_years(id),
            start_date TEXT,
            end_date TEXT,
            expected_output TEXT,
            ps TEXT NOT NULL,
            mooe TEXT NOT NULL,
            fe TEXT NOT NULL,
            co TEXT NOT NULL,
            ccet_adaptation TEXT NOT NULL,
            ccet_mitigation TEXT NOT NULL,
            UNIQUE (ppa_node_id, fiscal_year_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Procurement plans (attachment only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS procurement_plans (
            id TEXT PRIMARY KEY,
            fiscal_year_id TEXT NOT NULL REFERENCES fiscal_years(id),
            office_id TEXT NOT NULL,
            title TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS procurement_plan_items (
            plan_id TEXT NOT NULL REFERENCES procurement_plans(id),
            ppa_node_id TEXT NOT NULL REFERENCES ppa_nodes(id),
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            UNIQUE (plan_id, ppa_node_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Meta - commit generation, bumped by every write
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('generation', 0)",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON ppa_nodes(COALESCE(parent_id, ''), ordinal)",
            SIBLING_GUARD_INDEX
        ),
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_year ON budget_entries(fiscal_year_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// WRITES
// ============================================================================

/// Outcome of [`apply_ops`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// Ops written; the database is now at `generation`.
    Applied { generation: i64 },
    /// Another connection committed since the caller's state was loaded.
    /// Nothing was written.
    Stale { found: i64 },
}

/// Apply `ops` in one IMMEDIATE transaction, provided the database is still
/// at `expected_generation`. Any failure rolls back all of it.
pub fn apply_ops(
    conn: &mut Connection,
    expected_generation: i64,
    ops: &[StoreOp],
) -> rusqlite::Result<Commit> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let found = read_generation(&tx)?;
    if found != expected_generation {
        // dropping the transaction rolls it back
        return Ok(Commit::Stale { found });
    }

    for op in ops {
        apply_op(&tx, op)?;
    }

    let generation = found + 1;
    tx.execute(
        "UPDATE meta SET value = ?1 WHERE key = 'generation'",
        params![generation],
    )?;
    tx.commit()?;
    Ok(Commit::Applied { generation })
}

pub fn read_generation(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = 'generation'",
        [],
        |row| row.get(0),
    )
}

fn apply_op(conn: &Connection, op: &StoreOp) -> rusqlite::Result<()> {
    match op {
        StoreOp::InsertFiscalYear(fy) => {
            conn.execute(
                "INSERT INTO fiscal_years (id, year, status) VALUES (?1, ?2, ?3)",
                params![fy.id.to_string(), fy.year, fy.status.as_str()],
            )?;
        }
        StoreOp::UpdateFiscalYearStatus { id, status } => {
            conn.execute(
                "UPDATE fiscal_years SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id.to_string()],
            )?;
        }
        StoreOp::DeleteFiscalYear(id) => {
            conn.execute("DELETE FROM fiscal_years WHERE id = ?1", params![id.to_string()])?;
        }
        StoreOp::InsertNode(node) => {
            conn.execute(
                "INSERT INTO ppa_nodes (
                    id, parent_id, office_id, description, kind, ordinal, code, active, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    node.id.to_string(),
                    node.parent_id.map(|p| p.to_string()),
                    node.office_id.as_str(),
                    node.description,
                    node.kind.as_str(),
                    node.ordinal(),
                    node.code(),
                    node.active,
                    node.created_at.to_rfc3339(),
                ],
            )?;
        }
        StoreOp::DeleteNodes(ids) => {
            for id in ids {
                conn.execute("DELETE FROM ppa_nodes WHERE id = ?1", params![id.to_string()])?;
            }
        }
        StoreOp::Recode { id, ordinal, code } => {
            conn.execute(
                "UPDATE ppa_nodes SET ordinal = ?1, code = ?2 WHERE id = ?3",
                params![ordinal, code, id.to_string()],
            )?;
        }
        StoreOp::SetActive { id, active } => {
            conn.execute(
                "UPDATE ppa_nodes SET active = ?1 WHERE id = ?2",
                params![active, id.to_string()],
            )?;
        }
        StoreOp::InsertEntry(entry) => {
            conn.execute(
                "INSERT INTO budget_entries (
                    id, ppa_node_id, fiscal_year_id, start_date, end_date, expected_output,
                    ps, mooe, fe, co, ccet_adaptation, ccet_mitigation
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    entry.id.to_string(),
                    entry.ppa_node_id.to_string(),
                    entry.fiscal_year_id.to_string(),
                    entry.schedule.start_date.map(|d| d.to_string()),
                    entry.schedule.end_date.map(|d| d.to_string()),
                    entry.expected_output,
                    entry.amounts.ps.to_string(),
                    entry.amounts.mooe.to_string(),
                    entry.amounts.fe.to_string(),
                    entry.amounts.co.to_string(),
                    entry.amounts.ccet_adaptation.to_string(),
                    entry.amounts.ccet_mitigation.to_string(),
                ],
            )?;
        }
        StoreOp::UpdateEntry(entry) => {
            conn.execute(
                "UPDATE budget_entries SET
                    start_date = ?1, end_date = ?2, expected_output = ?3,
                    ps = ?4, mooe = ?5, fe = ?6, co = ?7,
                    ccet_adaptation = ?8, ccet_mitigation = ?9
                 WHERE id = ?10",
                params![
                    entry.schedule.start_date.map(|d| d.to_string()),
                    entry.schedule.end_date.map(|d| d.to_string()),
                    entry.expected_output,
                    entry.amounts.ps.to_string(),
                    entry.amounts.mooe.to_string(),
                    entry.amounts.fe.to_string(),
                    entry.amounts.co.to_string(),
                    entry.amounts.ccet_adaptation.to_string(),
                    entry.amounts.ccet_mitigation.to_string(),
                    entry.id.to_string(),
                ],
            )?;
        }
        StoreOp::DeleteEntry(id) => {
            conn.execute("DELETE FROM budget_entries WHERE id = ?1", params![id.to_string()])?;
        }
        StoreOp::InsertPlan(plan) => {
            conn.execute(
                "INSERT INTO procurement_plans (id, fiscal_year_id, office_id, title)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    plan.id.to_string(),
                    plan.fiscal_year_id.to_string(),
                    plan.office_id.as_str(),
                    plan.title,
                ],
            )?;
        }
        StoreOp::AttachPlanItem { plan_id, node_id } => {
            conn.execute(
                "INSERT OR IGNORE INTO procurement_plan_items (plan_id, ppa_node_id) VALUES (?1, ?2)",
                params![plan_id.to_string(), node_id.to_string()],
            )?;
        }
        StoreOp::DetachPlanItem { plan_id, node_id } => {
            conn.execute(
                "DELETE FROM procurement_plan_items WHERE plan_id = ?1 AND ppa_node_id = ?2",
                params![plan_id.to_string(), node_id.to_string()],
            )?;
        }
        StoreOp::Event(event) => insert_event(conn, event)?,
    }

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> rusqlite::Result<()> {
    let data_json = serde_json::to_string(&event.data)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// True when the database was locked by another connection.
pub fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// True when another writer claimed an ordinal, code or (node, year) slot
/// this commit expected to be free.
pub fn is_slot_conflict(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            let msg = msg.as_deref().unwrap_or_default();
            msg.contains("UNIQUE")
                && (msg.contains(SIBLING_GUARD_INDEX)
                    || msg.contains("ppa_nodes.code")
                    || msg.contains("budget_entries.ppa_node_id"))
        }
        _ => false,
    }
}

// ============================================================================
// READS
// ============================================================================

fn parse_text<T: FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_text<T: FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse::<T>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

pub fn load_fiscal_years(conn: &Connection) -> Result<Vec<FiscalYear>> {
    let mut stmt = conn.prepare("SELECT id, year, status FROM fiscal_years ORDER BY year")?;
    let years = stmt
        .query_map([], |row| {
            let status: String = row.get(2)?;
            Ok(FiscalYear {
                id: parse_text::<FiscalYearId>(row, 0)?,
                year: row.get(1)?,
                status: FiscalYearStatus::parse(&status)
                    .ok_or_else(|| conversion_error(2, format!("unknown status {}", status)))?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(years)
}

pub fn load_nodes(conn: &Connection) -> Result<Vec<PpaNode>> {
    let mut stmt = conn.prepare(
        "SELECT id, parent_id, office_id, description, kind, ordinal, code, active, created_at
         FROM ppa_nodes",
    )?;

    let nodes = stmt
        .query_map([], |row| {
            let kind: String = row.get(4)?;
            let created_at: String = row.get(8)?;
            Ok(PpaNode::restore(
                parse_text::<PpaId>(row, 0)?,
                parse_opt_text::<PpaId>(row, 1)?,
                OfficeId(row.get(2)?),
                PpaKind::parse(&kind)
                    .ok_or_else(|| conversion_error(4, format!("unknown kind {}", kind)))?,
                row.get(3)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(nodes)
}

pub fn load_entries(conn: &Connection) -> Result<Vec<BudgetEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, ppa_node_id, fiscal_year_id, start_date, end_date, expected_output,
                ps, mooe, fe, co, ccet_adaptation, ccet_mitigation
         FROM budget_entries",
    )?;

    let entries = stmt
        .query_map([], |row| {
            Ok(BudgetEntry {
                id: parse_text::<EntryId>(row, 0)?,
                ppa_node_id: parse_text::<PpaId>(row, 1)?,
                fiscal_year_id: parse_text::<FiscalYearId>(row, 2)?,
                schedule: Schedule {
                    start_date: parse_opt_text::<NaiveDate>(row, 3)?,
                    end_date: parse_opt_text::<NaiveDate>(row, 4)?,
                },
                expected_output: row.get(5)?,
                amounts: BudgetAmounts {
                    ps: parse_text::<Decimal>(row, 6)?,
                    mooe: parse_text::<Decimal>(row, 7)?,
                    fe: parse_text::<Decimal>(row, 8)?,
                    co: parse_text::<Decimal>(row, 9)?,
                    ccet_adaptation: parse_text::<Decimal>(row, 10)?,
                    ccet_mitigation: parse_text::<Decimal>(row, 11)?,
                },
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn load_plans(conn: &Connection) -> Result<(Vec<ProcurementPlan>, Vec<(PlanId, PpaId)>)> {
    let mut stmt = conn.prepare("SELECT id, fiscal_year_id, office_id, title FROM procurement_plans")?;
    let plans = stmt
        .query_map([], |row| {
            Ok(ProcurementPlan {
                id: parse_text::<PlanId>(row, 0)?,
                fiscal_year_id: parse_text::<FiscalYearId>(row, 1)?,
                office_id: OfficeId(row.get(2)?),
                title: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt =
        conn.prepare("SELECT plan_id, ppa_node_id FROM procurement_plan_items ORDER BY seq")?;
    let items = stmt
        .query_map([], |row| {
            Ok((parse_text::<PlanId>(row, 0)?, parse_text::<PpaId>(row, 1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok((plans, items))
}

/// Rebuild the full in-memory state from the database.
///
/// All tables and the generation are read inside one read transaction, so
/// the state matches exactly one committed generation.
pub fn load_state(conn: &Connection) -> Result<LedgerState> {
    let tx = conn.unchecked_transaction()?;
    let generation = read_generation(&tx)?;
    let tree = PpaTree::restore(load_nodes(&tx)?)?;
    let gate = FiscalYearGate::restore(load_fiscal_years(&tx)?);
    let book = BudgetBook::restore(load_entries(&tx)?)?;
    let (plans, items) = load_plans(&tx)?;
    tx.commit()?;

    let mut state = LedgerState::from_parts(tree, gate, book, plans, items);
    state.generation = generation;
    Ok(state)
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}
