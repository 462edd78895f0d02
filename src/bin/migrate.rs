use clap::Parser;
use dotenvy::dotenv;
use glob::glob;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_postgres::NoTls;

/// Apply versioned `V*.sql` migrations to the PostgreSQL database
#[derive(Debug, Parser)]
#[command(name = "migrate", version)]
struct Args {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Directory holding the migration files
    #[arg(long, default_value = "migrations")]
    dir: PathBuf,

    /// List pending migrations without applying them
    #[arg(long)]
    dry_run: bool,
}

fn migration_files(dir: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let pattern = dir.join("V*.sql");
    let mut files: Vec<PathBuf> = glob(&pattern.to_string_lossy())?
        .filter_map(Result::ok)
        .collect();
    // Flyway-style names sort into apply order
    files.sort();
    Ok(files)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv();
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    let args = Args::parse();
    if args.database_url.starts_with("memory:") {
        log::warn!("DATABASE_URL points at the in-memory store, nothing to migrate");
        return Ok(());
    }

    let (mut client, connection) = tokio_postgres::connect(&args.database_url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            log::error!("connection error: {}", e);
        }
    });

    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version VARCHAR(100) PRIMARY KEY,
                installed_on TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .await?;

    let files = migration_files(&args.dir)?;
    if files.is_empty() {
        log::info!("No migration files found in {}", args.dir.display());
        return Ok(());
    }

    let mut applied = 0;
    for file in files {
        let version = file
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        let row = client
            .query_opt("SELECT version FROM schema_migrations WHERE version = $1", &[&version])
            .await?;
        if row.is_some() {
            log::debug!("Skipping already-applied migration {}", version);
            continue;
        }

        if args.dry_run {
            log::info!("Pending: {}", version);
            continue;
        }

        log::info!("Applying migration {}", version);
        let sql = fs::read_to_string(&file)?;

        let txn = client.transaction().await?;
        txn.batch_execute(&sql).await?;
        txn.execute("INSERT INTO schema_migrations (version) VALUES ($1)", &[&version])
            .await?;
        txn.commit().await?;
        applied += 1;
    }

    log::info!("Migrations complete, {} applied", applied);
    Ok(())
}
