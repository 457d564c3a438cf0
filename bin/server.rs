// AIP Ledger - Web Server
// REST API with Axum

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use aip_ledger::api::router;
use aip_ledger::{Config, Ledger, OfficeScoped};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("🌐 AIP Ledger - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let bind_addr = config.bind_addr.clone();
    let db_path = config.db_path.clone();
    let ledger = Ledger::open(config)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    println!("✓ Database opened: {:?}", db_path);

    let app = router(Arc::new(ledger), Arc::new(OfficeScoped));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    info!(addr = %bind_addr, "listening");
    println!("\n🚀 Server running on http://{}", bind_addr);
    println!("   API: http://{}/api/summary?fiscal_year_id=<id>", bind_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
