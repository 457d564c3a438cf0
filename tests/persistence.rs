// Durable state: reopen from disk, concurrent writers on one ledger, and
// several ledgers sharing one database file.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aip_ledger::csv_io::{import_outline, read_outline};
use aip_ledger::{
    AipError, BudgetAmounts, Config, CreateBudgetEntry, CreatePlan, CreatePpa, DeletePpa,
    EntryFields, FiscalYearStatus, Ledger, OfficeId, SetFiscalYearStatus, UpdateBudgetEntry,
};
use rust_decimal_macros::dec;

fn open_with_attempts(path: &Path, max_commit_attempts: u32) -> Ledger {
    let config = Config {
        max_commit_attempts,
        retry_backoff: Duration::from_millis(1),
        ..Config::default()
    }
    .with_db_path(path);
    Ledger::open(config).unwrap()
}

#[test]
fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aip.db");

    let (fy_id, project_id, kept_id) = {
        let ledger = Ledger::open_path(&path).unwrap();
        let fy = ledger.create_fiscal_year(2025, "setup").unwrap();
        let program = ledger.create_ppa(CreatePpa::root("O1", "Program"), "setup").unwrap();
        let project = ledger.create_ppa(CreatePpa::child(program.id, "Project"), "setup").unwrap();
        let dropped = ledger.create_ppa(CreatePpa::child(project.id, "Dropped"), "setup").unwrap();
        let kept = ledger.create_ppa(CreatePpa::child(project.id, "Kept"), "setup").unwrap();
        ledger.create_ppa(CreatePpa::child(kept.id, "Sub"), "setup").unwrap();

        for (node, co) in [(dropped.id, dec!(10)), (kept.id, dec!(250.75))] {
            ledger
                .create_entry(
                    CreateBudgetEntry {
                        node_id: node,
                        fiscal_year_id: fy.id,
                        fields: EntryFields::with_amounts(BudgetAmounts::new(dec!(0), dec!(0), dec!(0), co)),
                    },
                    "setup",
                )
                .unwrap();
        }

        ledger.delete_ppa(DeletePpa { id: dropped.id }, "setup").unwrap();
        ledger
            .set_fiscal_year_status(
                SetFiscalYearStatus {
                    fiscal_year_id: fy.id,
                    status: FiscalYearStatus::Closed,
                },
                "setup",
            )
            .unwrap();
        (fy.id, project.id, kept.id)
    };

    let ledger = Ledger::open_path(&path).unwrap();
    assert_eq!(ledger.get_node(kept_id).unwrap().code(), "1.1.1");
    assert_eq!(ledger.find_by_code("1.1.1.1").unwrap().description, "Sub");
    assert_eq!(ledger.rollup(project_id, fy_id).unwrap().grand_total, dec!(250.75));
    assert_eq!(ledger.get_fiscal_year(fy_id).unwrap().status, FiscalYearStatus::Closed);
    assert!(ledger.verify().is_consistent());

    let events = ledger.events_for("ppa", &kept_id.to_string()).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].actor, "setup");
}

#[test]
fn test_plan_attachments_persist_and_cascade() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aip.db");

    let (plan_id, node_id) = {
        let ledger = Ledger::open_path(&path).unwrap();
        let fy = ledger.create_fiscal_year(2025, "setup").unwrap();
        let node = ledger.create_ppa(CreatePpa::root("O1", "Program"), "setup").unwrap();
        let plan = ledger
            .create_plan(
                CreatePlan {
                    fiscal_year_id: fy.id,
                    office_id: OfficeId::from("O1"),
                    title: "PPMP 2025".to_string(),
                },
                "setup",
            )
            .unwrap();
        ledger.attach_plan_item(plan.id, node.id, "setup").unwrap();
        (plan.id, node.id)
    };

    let ledger = Ledger::open_path(&path).unwrap();
    assert_eq!(ledger.plan_items(plan_id).unwrap().len(), 1);

    ledger.delete_ppa(DeletePpa { id: node_id }, "cleanup").unwrap();
    drop(ledger);

    let ledger = Ledger::open_path(&path).unwrap();
    assert!(ledger.plan_items(plan_id).unwrap().is_empty());
}

#[test]
fn test_concurrent_creates_get_distinct_codes() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(Ledger::open_path(dir.path().join("aip.db")).unwrap());
    let root = ledger.create_ppa(CreatePpa::root("O1", "Program"), "setup").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                (0..5)
                    .map(|i| {
                        ledger
                            .create_ppa(CreatePpa::child(root.id, format!("t{}-{}", t, i)), "worker")
                            .unwrap()
                            .code()
                            .to_string()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut codes = HashSet::new();
    for handle in handles {
        for code in handle.join().unwrap() {
            assert!(codes.insert(code), "duplicate code handed out");
        }
    }

    let expected: HashSet<String> = (1..=40).map(|n| format!("1.{}", n)).collect();
    assert_eq!(codes, expected);
    assert!(ledger.verify().is_consistent());
}

#[test]
fn test_concurrent_reads_see_whole_commits() {
    let ledger = Arc::new(Ledger::open_in_memory().unwrap());
    let fy = ledger.create_fiscal_year(2025, "setup").unwrap();
    let root = ledger.create_ppa(CreatePpa::root("O1", "Program"), "setup").unwrap();

    let writer = {
        let ledger = Arc::clone(&ledger);
        thread::spawn(move || {
            for i in 0..20 {
                let leaf = ledger
                    .create_ppa(CreatePpa::child(root.id, format!("leaf {}", i)), "writer")
                    .unwrap();
                ledger
                    .create_entry(
                        CreateBudgetEntry {
                            node_id: leaf.id,
                            fiscal_year_id: fy.id,
                            fields: EntryFields::with_amounts(BudgetAmounts::new(dec!(1), dec!(0), dec!(0), dec!(0))),
                        },
                        "writer",
                    )
                    .unwrap();
            }
        })
    };

    for _ in 0..50 {
        let snapshot = ledger.snapshot();
        let summary = aip_ledger::SummaryBuilder::new(&snapshot)
            .build(Some(root.id), fy.id)
            .unwrap();
        let leaves_with_entries = summary.roots[0]
            .children
            .iter()
            .filter(|c| c.entry.is_some())
            .count();
        assert_eq!(summary.totals.grand_total, rust_decimal::Decimal::from(leaves_with_entries as u64));
    }

    writer.join().unwrap();
    assert_eq!(ledger.rollup(root.id, fy.id).unwrap().grand_total, dec!(20));
}

#[test]
fn test_outline_import_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aip.db");
    let outline = "parent_code,office_id,description\n,MPDO,Governance\n1,,Records\n,MHO,Health\n2,,Clinics\n";

    {
        let ledger = Ledger::open_path(&path).unwrap();
        let rows = read_outline(outline.as_bytes()).unwrap();
        let report = import_outline(&ledger, &rows, "importer");
        assert!(report.is_clean());
    }

    let ledger = Ledger::open_path(&path).unwrap();
    let clinics = ledger.find_by_code("2.1").unwrap();
    assert_eq!(clinics.office_id.as_str(), "MHO");
    assert_eq!(ledger.children_of(None).unwrap().len(), 2);
}

#[test]
fn test_interleaved_delete_and_create_across_ledgers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aip.db");

    let first = Ledger::open_path(&path).unwrap();
    let parent = first.create_ppa(CreatePpa::root("O1", "P"), "one").unwrap();
    let kids: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|name| first.create_ppa(CreatePpa::child(parent.id, *name), "one").unwrap())
        .collect();

    // second loads while a, b and c all exist
    let second = Ledger::open_path(&path).unwrap();
    assert_eq!(second.children_of(Some(parent.id)).unwrap().len(), 3);

    first.delete_ppa(DeletePpa { id: kids[0].id }, "one").unwrap();

    let added = second.create_ppa(CreatePpa::child(parent.id, "d"), "two").unwrap();
    assert_eq!(added.code(), "1.3");
    assert!(second.verify().is_consistent());

    drop(first);
    drop(second);

    let ledger = Ledger::open_path(&path).unwrap();
    let codes: Vec<String> = ledger
        .children_of(Some(parent.id))
        .unwrap()
        .iter()
        .map(|n| n.code().to_string())
        .collect();
    assert_eq!(codes, vec!["1.1", "1.2", "1.3"]);
    assert_eq!(ledger.get_node(kids[1].id).unwrap().code(), "1.1");
    assert_eq!(ledger.get_node(added.id).unwrap().description, "d");
    assert!(ledger.verify().is_consistent());
}

#[test]
fn test_closed_year_holds_against_other_ledgers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aip.db");

    let first = Ledger::open_path(&path).unwrap();
    let fy = first.create_fiscal_year(2025, "admin").unwrap();
    let node = first.create_ppa(CreatePpa::root("O1", "P"), "planner").unwrap();
    let entry = first
        .create_entry(
            CreateBudgetEntry {
                node_id: node.id,
                fiscal_year_id: fy.id,
                fields: EntryFields::with_amounts(BudgetAmounts::new(dec!(100), dec!(0), dec!(0), dec!(0))),
            },
            "planner",
        )
        .unwrap();

    let second = Ledger::open_path(&path).unwrap();
    first
        .set_fiscal_year_status(
            SetFiscalYearStatus {
                fiscal_year_id: fy.id,
                status: FiscalYearStatus::Closed,
            },
            "admin",
        )
        .unwrap();

    let err = second
        .update_entry(
            UpdateBudgetEntry {
                id: entry.id,
                fields: EntryFields::with_amounts(BudgetAmounts::new(dec!(999), dec!(0), dec!(0), dec!(0))),
            },
            "late",
        )
        .unwrap_err();
    assert!(matches!(err, AipError::FiscalYearClosed { .. }));

    let err = second.delete_ppa(DeletePpa { id: node.id }, "late").unwrap_err();
    assert!(matches!(err, AipError::HasEntriesInClosedYear { .. }));

    drop(first);
    drop(second);

    let ledger = Ledger::open_path(&path).unwrap();
    assert_eq!(ledger.get_fiscal_year(fy.id).unwrap().status, FiscalYearStatus::Closed);
    assert_eq!(ledger.rollup(node.id, fy.id).unwrap().grand_total, dec!(100));
    assert_eq!(ledger.events_for("budget_entry", &entry.id.to_string()).unwrap().len(), 1);
}

#[test]
fn test_busy_database_gives_up_after_max_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aip.db");
    let ledger = open_with_attempts(&path, 3);

    let blocker = rusqlite::Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

    let err = ledger.create_ppa(CreatePpa::root("O1", "P"), "planner").unwrap_err();
    assert!(matches!(err, AipError::ConcurrencyConflict { attempts: 3 }), "{err}");
    assert!(ledger.snapshot().tree().is_empty());

    blocker.execute_batch("ROLLBACK").unwrap();
    let node = ledger.create_ppa(CreatePpa::root("O1", "P"), "planner").unwrap();
    assert_eq!(node.code(), "1");
}

#[test]
fn test_outdated_ledger_uses_up_its_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aip.db");
    let first = open_with_attempts(&path, 5);
    let second = open_with_attempts(&path, 1);

    first.create_ppa(CreatePpa::root("O1", "A"), "one").unwrap();

    // a single attempt leaves no room to retry against the reloaded state
    let err = second.create_ppa(CreatePpa::root("O1", "B"), "two").unwrap_err();
    assert!(matches!(err, AipError::ConcurrencyConflict { attempts: 1 }));
    assert_eq!(second.snapshot().tree().len(), 1);

    let node = second.create_ppa(CreatePpa::root("O1", "B"), "two").unwrap();
    assert_eq!(node.code(), "2");
}
