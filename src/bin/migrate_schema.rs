//! Create the pool and usage tables in the configured database
//!
//! Run with: cargo run --bin migrate_schema [-- --dry-run]

use tnu_bank::config::TnuConfig;
use tnu_bank::store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let dry_run = std::env::args().any(|a| a == "--dry-run");

    println!("TNU Bank - Schema Migration\n");
    println!("{}", "=".repeat(70));

    let config = TnuConfig::from_env()?;
    let layout = config.layout();

    println!("Table layout:");
    for tables in layout.all() {
        println!("   - {:<26} {} / {}", tables.kind.label(), tables.data, tables.index);
    }

    if dry_run {
        println!("\nStatements (dry run):");
        println!("{}", "-".repeat(70));
        for statement in layout.ddl() {
            println!("{};", statement);
        }
        return Ok(());
    }

    println!("\nConnecting to {} ...", config.database_url);
    let store = match store::open(&config).await {
        Ok(store) => {
            println!("Connected ({})\n", store.name());
            store
        }
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            return Err(e.into());
        }
    };

    println!("Creating tables...");
    println!("{}", "-".repeat(70));
    match store.init_schema(&layout).await {
        Ok(()) => {
            println!("Schema ready: {} statements applied", layout.ddl().len());
        }
        Err(e) => {
            eprintln!("Migration failed: {}", e);
            return Err(e.into());
        }
    }

    println!("{}", "=".repeat(70));
    Ok(())
}
