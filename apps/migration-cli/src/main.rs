use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use db_bootstrap::infra::db::driver::{select_driver, Connected, Connector};
use db_bootstrap::{BackendKind, DbConfig, EmbeddedEngine};
use migration::{migrate, MigrationCommand, MigrationSource};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, ValueEnum)]
enum Command {
    Up,
    Down,
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum Db {
    Sqlite,
    Postgres,
}

#[derive(Parser)]
#[command(name = "migration")]
#[command(about = "Apply or inspect database schema migrations")]
struct Args {
    /// Migration command to run
    #[arg(value_enum)]
    command: Command,

    /// Database backend (defaults to DB_DRIVER, then sqlite)
    #[arg(short, long, value_enum)]
    db: Option<Db>,

    /// Migration directory (defaults to ./migrations, then ./database/migrations)
    #[arg(short, long)]
    source: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .without_time()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn,sea_orm=warn".into()),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 2 } else { 0 });
        }
    };

    let command = match args.command {
        Command::Up => MigrationCommand::Up,
        Command::Down => MigrationCommand::Down,
        Command::Status => MigrationCommand::Status,
    };

    let config = match args.db {
        Some(Db::Sqlite) => DbConfig::from_env_for(BackendKind::Sqlite),
        Some(Db::Postgres) => DbConfig::from_env_for(BackendKind::Postgres),
        None => DbConfig::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(2);
        }
    };

    let source = args
        .source
        .map(MigrationSource::from_dir)
        .unwrap_or_else(MigrationSource::resolve);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut engine = EmbeddedEngine::new();
    let result = run(&config, &source, command, &mut engine, &cancel).await;

    if let Err(e) = engine.stop().await {
        eprintln!("⚠️  failed to stop embedded database: {e}");
    }

    if let Err(e) = result {
        eprintln!("Migration failed: {e}");
        std::process::exit(1);
    }
}

async fn run(
    config: &DbConfig,
    source: &MigrationSource,
    command: MigrationCommand,
    engine: &mut EmbeddedEngine,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let driver = select_driver(config);
    let Connected { conn, migrations } = driver.connect(source, engine, cancel).await?;

    migrate(&migrations, command).await?;

    conn.close().await?;
    Ok(())
}
