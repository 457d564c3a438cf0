// AIP Ledger - command line interface

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use aip_ledger::csv_io::{import_outline, load_outline, write_summary};
use aip_ledger::{
    BudgetAmounts, Config, CreateBudgetEntry, CreatePpa, DeletePpa, EntryFields, FiscalYear,
    FiscalYearStatus, Ledger, OfficeId, PpaNode, SetFiscalYearStatus, UpdateBudgetEntry,
};

#[derive(Parser)]
#[command(name = "aip-ledger", version, about = "Annual Investment Program ledger")]
struct Cli {
    /// SQLite database (overrides AIP_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Name recorded in the audit trail
    #[arg(long, global = true, default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,
    /// Manage fiscal years
    #[command(subcommand)]
    FiscalYear(FiscalYearCommand),
    /// Add or remove PPAs
    #[command(subcommand)]
    Ppa(PpaCommand),
    /// Manage budget entries
    #[command(subcommand)]
    Entry(EntryCommand),
    /// Print the PPA tree with roll-ups for one year
    Summary {
        #[arg(long)]
        year: i32,
        /// Only the subtree under this code
        #[arg(long)]
        root: Option<String>,
    },
    /// Write the flattened summary as CSV
    Export {
        #[arg(long)]
        year: i32,
        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Create PPAs from an outline CSV (parent_code,office_id,description)
    Import { path: PathBuf },
    /// Check codes, ordinals, offices and cached roll-ups
    Verify,
}

#[derive(Subcommand)]
enum FiscalYearCommand {
    Add { year: i32 },
    Open { year: i32 },
    Close { year: i32 },
    List,
}

#[derive(Subcommand)]
enum PpaCommand {
    Add {
        description: String,
        /// Parent code; omit for a new Program
        #[arg(long)]
        parent: Option<String>,
        /// Required for Programs
        #[arg(long)]
        office: Option<String>,
    },
    /// Remove a PPA and everything under it
    Remove { code: String },
}

#[derive(Subcommand)]
enum EntryCommand {
    /// Create or replace the entry of a PPA for a year
    Set(EntryArgs),
    /// Delete the entry of a PPA for a year
    Remove {
        #[arg(long)]
        code: String,
        #[arg(long)]
        year: i32,
    },
}

#[derive(Args)]
struct EntryArgs {
    #[arg(long)]
    code: String,
    #[arg(long)]
    year: i32,
    #[arg(long, default_value = "0")]
    ps: Decimal,
    #[arg(long, default_value = "0")]
    mooe: Decimal,
    #[arg(long, default_value = "0")]
    fe: Decimal,
    #[arg(long, default_value = "0")]
    co: Decimal,
    #[arg(long, default_value = "0")]
    adaptation: Decimal,
    #[arg(long, default_value = "0")]
    mitigation: Decimal,
    #[arg(long)]
    start: Option<NaiveDate>,
    #[arg(long)]
    end: Option<NaiveDate>,
    #[arg(long)]
    output: Option<String>,
}

impl EntryArgs {
    fn fields(&self) -> EntryFields {
        EntryFields {
            start_date: self.start,
            end_date: self.end,
            expected_output: self.output.clone(),
            amounts: BudgetAmounts::new(self.ps, self.mooe, self.fe, self.co)
                .with_climate_tags(self.adaptation, self.mitigation),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(db) = &cli.db {
        config = config.with_db_path(db);
    }

    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let db_path = config.db_path.clone();
    let ledger = Ledger::open(config)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let actor = cli.actor.as_str();

    match cli.command {
        Command::Init => {
            println!("✓ Database initialized with WAL mode: {}", db_path.display());
        }
        Command::FiscalYear(cmd) => run_fiscal_year(&ledger, cmd, actor)?,
        Command::Ppa(cmd) => run_ppa(&ledger, cmd, actor)?,
        Command::Entry(cmd) => run_entry(&ledger, cmd, actor)?,
        Command::Summary { year, root } => {
            let fy = fiscal_year(&ledger, year)?;
            let root_id = match root {
                Some(code) => Some(node_by_code(&ledger, &code)?.id),
                None => None,
            };
            let summary = ledger.tree_summary(root_id, fy.id)?;

            println!("📊 AIP {} ({})", fy.year, fy.status.as_str());
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            for row in summary.rows() {
                let indent = "  ".repeat(row.depth);
                println!(
                    "{}{:<12} {:<40} {:>16}",
                    indent, row.code, row.description, row.grand_total
                );
            }
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!(
                "Total: {}  (PS {} / MOOE {} / FE {} / CO {})",
                summary.totals.grand_total,
                summary.totals.ps,
                summary.totals.mooe,
                summary.totals.fe,
                summary.totals.co
            );
        }
        Command::Export { year, out } => {
            let fy = fiscal_year(&ledger, year)?;
            let summary = ledger.tree_summary(None, fy.id)?;
            let written = match out {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    let n = write_summary(&summary, file)?;
                    eprintln!("✓ Wrote {} rows to {}", n, path.display());
                    n
                }
                None => write_summary(&summary, std::io::stdout().lock())?,
            };
            tracing::info!(rows = written, year, "summary exported");
        }
        Command::Import { path } => {
            let rows = load_outline(&path)
                .with_context(|| format!("Failed to read outline {}", path.display()))?;
            let report = import_outline(&ledger, &rows, actor);
            for (line, code) in &report.created {
                println!("✓ line {}: {}", line, code);
            }
            for (line, reason) in &report.failed {
                println!("❌ line {}: {}", line, reason);
            }
            if !report.is_clean() {
                bail!("{} of {} rows failed", report.failed.len(), rows.len());
            }
        }
        Command::Verify => {
            let report = ledger.verify();
            println!("🔍 {}", report.summary());
            for d in &report.discrepancies {
                println!("  {:?}: {}", d.category, d.description);
            }
            if !report.is_consistent() {
                bail!("integrity check failed");
            }
            println!("✅ All invariants hold");
        }
    }

    Ok(())
}

fn fiscal_year(ledger: &Ledger, year: i32) -> Result<FiscalYear> {
    ledger
        .find_fiscal_year(year)
        .ok_or_else(|| anyhow!("fiscal year {} does not exist", year))
}

fn node_by_code(ledger: &Ledger, code: &str) -> Result<PpaNode> {
    ledger
        .find_by_code(code)
        .ok_or_else(|| anyhow!("no PPA with code {}", code))
}

fn run_fiscal_year(ledger: &Ledger, cmd: FiscalYearCommand, actor: &str) -> Result<()> {
    let set_status = |year: i32, status: FiscalYearStatus| -> Result<()> {
        let fy = fiscal_year(ledger, year)?;
        let fy = ledger.set_fiscal_year_status(
            SetFiscalYearStatus {
                fiscal_year_id: fy.id,
                status,
            },
            actor,
        )?;
        println!("✓ FY {} is {}", fy.year, fy.status.as_str());
        Ok(())
    };

    match cmd {
        FiscalYearCommand::Add { year } => {
            let fy = ledger.create_fiscal_year(year, actor)?;
            println!("✓ FY {} created ({})", fy.year, fy.id);
        }
        FiscalYearCommand::Open { year } => set_status(year, FiscalYearStatus::Open)?,
        FiscalYearCommand::Close { year } => set_status(year, FiscalYearStatus::Closed)?,
        FiscalYearCommand::List => {
            for fy in ledger.list_fiscal_years() {
                println!("{}  {:<6}  {}", fy.year, fy.status.as_str(), fy.id);
            }
        }
    }
    Ok(())
}

fn run_ppa(ledger: &Ledger, cmd: PpaCommand, actor: &str) -> Result<()> {
    match cmd {
        PpaCommand::Add {
            description,
            parent,
            office,
        } => {
            let parent_id = match parent {
                Some(code) => Some(node_by_code(ledger, &code)?.id),
                None => None,
            };
            let node = ledger.create_ppa(
                CreatePpa {
                    parent_id,
                    office_id: office.map(OfficeId::new),
                    description,
                },
                actor,
            )?;
            println!("✓ {} {} [{}]", node.code(), node.description, node.kind.as_str());
        }
        PpaCommand::Remove { code } => {
            let node = node_by_code(ledger, &code)?;
            let removed = ledger.delete_ppa(DeletePpa { id: node.id }, actor)?;
            println!("✓ Removed {} ({} PPAs)", code, removed.len());
        }
    }
    Ok(())
}

fn run_entry(ledger: &Ledger, cmd: EntryCommand, actor: &str) -> Result<()> {
    match cmd {
        EntryCommand::Set(args) => {
            let node = node_by_code(ledger, &args.code)?;
            let fy = fiscal_year(ledger, args.year)?;

            let entry = match ledger.entry_for(node.id, fy.id) {
                Some(existing) => ledger.update_entry(
                    UpdateBudgetEntry {
                        id: existing.id,
                        fields: args.fields(),
                    },
                    actor,
                )?,
                None => ledger.create_entry(
                    CreateBudgetEntry {
                        node_id: node.id,
                        fiscal_year_id: fy.id,
                        fields: args.fields(),
                    },
                    actor,
                )?,
            };
            println!("✓ {} FY {}: {}", node.code(), fy.year, entry.grand_total());
        }
        EntryCommand::Remove { code, year } => {
            let node = node_by_code(ledger, &code)?;
            let fy = fiscal_year(ledger, year)?;
            let entry = ledger
                .entry_for(node.id, fy.id)
                .ok_or_else(|| anyhow!("{} has no entry for FY {}", code, year))?;
            ledger.delete_entry(entry.id, actor)?;
            println!("✓ Removed entry of {} for FY {}", code, year);
        }
    }
    Ok(())
}
