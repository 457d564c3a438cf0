// 📄 CSV Import/Export
//
// Import: a PPA outline, one node per row, parents before children.
//   parent_code,office_id,description
//   ,O1,Health Program          <- root (office required)
//   1,,Clinic Upgrade           <- child of code 1 (office inherited)
//
// Export: the flattened summary of one fiscal year, in code order.

use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::commands::CreatePpa;
use crate::entities::OfficeId;
use crate::error::{AipError, Result};
use crate::ledger::Ledger;
use crate::summary::TreeSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineRow {
    #[serde(default)]
    pub parent_code: String,
    #[serde(default)]
    pub office_id: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    /// (line, assigned code)
    pub created: Vec<(usize, String)>,
    /// (line, reason)
    pub failed: Vec<(usize, String)>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub fn read_outline<R: Read>(reader: R) -> Result<Vec<OutlineRow>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}

pub fn load_outline(path: &Path) -> Result<Vec<OutlineRow>> {
    let file = std::fs::File::open(path)?;
    read_outline(file)
}

/// Create one PPA per row, in order. A failing row is recorded and skipped;
/// rows below it that name it as parent fail too.
pub fn import_outline(ledger: &Ledger, rows: &[OutlineRow], actor: &str) -> ImportReport {
    let mut report = ImportReport::default();

    for (idx, row) in rows.iter().enumerate() {
        // header is line 1
        let line = idx + 2;
        match import_row(ledger, row, actor) {
            Ok(code) => report.created.push((line, code)),
            Err(err) => {
                warn!(line, error = %err, "outline row rejected");
                report.failed.push((line, err.to_string()));
            }
        }
    }

    info!(
        created = report.created.len(),
        failed = report.failed.len(),
        "outline import finished"
    );
    report
}

fn import_row(ledger: &Ledger, row: &OutlineRow, actor: &str) -> Result<String> {
    let office_id = Some(row.office_id.trim())
        .filter(|o| !o.is_empty())
        .map(OfficeId::from);

    let parent_id = if row.parent_code.trim().is_empty() {
        None
    } else {
        let parent = ledger
            .find_by_code(row.parent_code.trim())
            .ok_or_else(|| AipError::InvalidParent {
                parent_id: row.parent_code.clone(),
                reason: "no PPA has this code".to_string(),
            })?;
        Some(parent.id)
    };

    let node = ledger.create_ppa(
        CreatePpa {
            parent_id,
            office_id,
            description: row.description.clone(),
        },
        actor,
    )?;
    Ok(node.code().to_string())
}

/// Write the summary as CSV rows. Returns the number of data rows.
pub fn write_summary<W: Write>(summary: &TreeSummary, writer: W) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    let rows = summary.rows();
    for row in &rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(rows.len())
}
