// End-to-end walk through code assignment, roll-up and the fiscal-year gate.

use aip_ledger::{
    AipError, BudgetAmounts, CreateBudgetEntry, CreatePpa, DeletePpa, EntryFields,
    FiscalYearStatus, Ledger, SetFiscalYearStatus, UpdateBudgetEntry,
};
use rust_decimal_macros::dec;

const ACTOR: &str = "test";

fn amounts(ps: u32, mooe: u32, fe: u32, co: u32) -> EntryFields {
    EntryFields::with_amounts(BudgetAmounts::new(ps.into(), mooe.into(), fe.into(), co.into()))
}

#[test]
fn test_program_project_activity_lifecycle() {
    let ledger = Ledger::open_in_memory().unwrap();
    let fy = ledger.create_fiscal_year(2025, ACTOR).unwrap();

    // Codes follow position
    let program = ledger.create_ppa(CreatePpa::root("O1", "Program"), ACTOR).unwrap();
    let project = ledger.create_ppa(CreatePpa::child(program.id, "Project"), ACTOR).unwrap();
    let first = ledger.create_ppa(CreatePpa::child(project.id, "Activity A"), ACTOR).unwrap();
    assert_eq!(program.code(), "1");
    assert_eq!(project.code(), "1.1");
    assert_eq!(first.code(), "1.1.1");
    assert_eq!(first.office_id.as_str(), "O1");

    ledger
        .create_entry(
            CreateBudgetEntry {
                node_id: first.id,
                fiscal_year_id: fy.id,
                fields: amounts(100, 50, 0, 0),
            },
            ACTOR,
        )
        .unwrap();
    assert_eq!(ledger.rollup(first.id, fy.id).unwrap().grand_total, dec!(150));
    assert_eq!(ledger.rollup(program.id, fy.id).unwrap().grand_total, dec!(150));

    // A second activity adds to the project
    let second = ledger.create_ppa(CreatePpa::child(project.id, "Activity B"), ACTOR).unwrap();
    assert_eq!(second.code(), "1.1.2");
    let second_entry = ledger
        .create_entry(
            CreateBudgetEntry {
                node_id: second.id,
                fiscal_year_id: fy.id,
                fields: amounts(0, 0, 0, 200),
            },
            ACTOR,
        )
        .unwrap();
    assert_eq!(ledger.rollup(project.id, fy.id).unwrap().grand_total, dec!(350));

    // Deleting the first activity renumbers the second
    ledger.delete_ppa(DeletePpa { id: first.id }, ACTOR).unwrap();
    assert_eq!(ledger.get_node(second.id).unwrap().code(), "1.1.1");
    assert_eq!(ledger.rollup(project.id, fy.id).unwrap().grand_total, dec!(200));
    assert!(matches!(ledger.get_node(first.id), Err(AipError::NotFound { .. })));

    // Closing the year freezes the entry
    ledger
        .set_fiscal_year_status(
            SetFiscalYearStatus {
                fiscal_year_id: fy.id,
                status: FiscalYearStatus::Closed,
            },
            ACTOR,
        )
        .unwrap();
    let err = ledger
        .update_entry(
            UpdateBudgetEntry {
                id: second_entry.id,
                fields: amounts(1, 1, 1, 1),
            },
            ACTOR,
        )
        .unwrap_err();
    assert!(matches!(err, AipError::FiscalYearClosed { year: 2025, .. }));
    assert_eq!(ledger.rollup(project.id, fy.id).unwrap().grand_total, dec!(200));
    assert_eq!(ledger.get_entry(second_entry.id).unwrap().amounts.co, dec!(200));

    assert!(ledger.verify().is_consistent());
}

#[test]
fn test_structural_rejections() {
    let ledger = Ledger::open_in_memory().unwrap();

    let err = ledger
        .create_ppa(
            CreatePpa {
                parent_id: None,
                office_id: None,
                description: "No office".to_string(),
            },
            ACTOR,
        )
        .unwrap_err();
    assert!(matches!(err, AipError::MissingOffice));

    let mut parent = ledger.create_ppa(CreatePpa::root("O1", "P"), ACTOR).unwrap();
    for name in ["Project", "Activity", "Sub-Activity"] {
        parent = ledger.create_ppa(CreatePpa::child(parent.id, name), ACTOR).unwrap();
    }
    assert_eq!(parent.code(), "1.1.1.1");

    let err = ledger
        .create_ppa(CreatePpa::child(parent.id, "Too deep"), ACTOR)
        .unwrap_err();
    assert!(matches!(err, AipError::InvalidParent { .. }));

    let err = ledger
        .create_ppa(CreatePpa::child(aip_ledger::PpaId::new(), "Ghost parent"), ACTOR)
        .unwrap_err();
    assert!(matches!(err, AipError::InvalidParent { .. }));

    let err = ledger
        .delete_ppa(DeletePpa { id: aip_ledger::PpaId::new() }, ACTOR)
        .unwrap_err();
    assert!(matches!(err, AipError::NotFound { .. }));
}

#[test]
fn test_duplicate_entry_and_negative_amounts() {
    let ledger = Ledger::open_in_memory().unwrap();
    let fy = ledger.create_fiscal_year(2025, ACTOR).unwrap();
    let node = ledger.create_ppa(CreatePpa::root("O1", "P"), ACTOR).unwrap();

    let cmd = CreateBudgetEntry {
        node_id: node.id,
        fiscal_year_id: fy.id,
        fields: amounts(1, 0, 0, 0),
    };
    ledger.create_entry(cmd.clone(), ACTOR).unwrap();
    assert!(matches!(
        ledger.create_entry(cmd, ACTOR),
        Err(AipError::DuplicateEntry { .. })
    ));

    let other = ledger.create_ppa(CreatePpa::root("O1", "Q"), ACTOR).unwrap();
    let negative = CreateBudgetEntry {
        node_id: other.id,
        fiscal_year_id: fy.id,
        fields: EntryFields::with_amounts(BudgetAmounts::new(dec!(-5), dec!(0), dec!(0), dec!(0))),
    };
    assert!(matches!(
        ledger.create_entry(negative, ACTOR),
        Err(AipError::Invalid(_))
    ));
    assert!(ledger.entry_for(other.id, fy.id).is_none());
}

#[test]
fn test_reopened_year_accepts_changes() {
    let ledger = Ledger::open_in_memory().unwrap();
    let fy = ledger.create_fiscal_year(2026, ACTOR).unwrap();
    let node = ledger.create_ppa(CreatePpa::root("O1", "P"), ACTOR).unwrap();

    for status in [FiscalYearStatus::Closed, FiscalYearStatus::Closed, FiscalYearStatus::Open] {
        ledger
            .set_fiscal_year_status(
                SetFiscalYearStatus {
                    fiscal_year_id: fy.id,
                    status,
                },
                ACTOR,
            )
            .unwrap();
    }

    ledger
        .create_entry(
            CreateBudgetEntry {
                node_id: node.id,
                fiscal_year_id: fy.id,
                fields: amounts(3, 0, 0, 0),
            },
            ACTOR,
        )
        .unwrap();
    assert_eq!(ledger.rollup(node.id, fy.id).unwrap().grand_total, dec!(3));
}
