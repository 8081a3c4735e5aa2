use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use tokio::sync::watch;

use acctsync::{
    config::{CliArgs, Command, Config},
    pipeline::Pipeline,
    provider::MockBankProvider,
    server, storage, telemetry,
};
use acctsync_core::{NewAccount, StorageError, SyncStatus};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    telemetry::init_tracing(&config.logging);

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Seed => seed(config).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "acctsync exited with an error");
            ExitCode::FAILURE
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn open_account_store(config: &Config) -> Result<Arc<dyn storage::AccountStore>, BoxError> {
    let storage_config = config.storage.clone();
    let store = tokio::task::spawn_blocking(move || storage::open_account_store(&storage_config)).await??;
    Ok(store)
}

async fn run(config: Config) -> Result<(), BoxError> {
    let metrics = match telemetry::install_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            None
        }
    };

    // A busy port fails startup before any account is claimed.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = server::spawn(config.listen_addr()?, metrics, shutdown_rx.clone())?;

    let store = open_account_store(&config).await?;
    let snapshots = storage::open_snapshot_store(&config.storage)?;
    let provider = Arc::new(MockBankProvider::new(config.ingest.mock_latency()));
    let pipeline = Pipeline::new(store, snapshots, provider, &config.ingest).spawn(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, draining normalizers");
    shutdown_tx.send(true)?;

    pipeline.join().await;
    server.await??;
    Ok(())
}

/// Inserts the demo account, or re-requests a sync if it already exists.
async fn seed(config: Config) -> Result<(), BoxError> {
    let store = open_account_store(&config).await?;
    let account = NewAccount::new("acc-test-001", "user-dave", "bank_leumi", "8888-99")
        .with_status(SyncStatus::PendingSync)
        .with_priority(100)
        .with_currency("ILS");

    let seeded = tokio::task::spawn_blocking(move || match store.insert_account(&account) {
        Ok(_) => Ok(true),
        Err(StorageError::AccountAlreadyExists(_)) => store.request_sync(&account.id, account.priority).map(|_| false),
        Err(e) => Err(e),
    })
    .await??;

    if seeded {
        tracing::info!(account_id = "acc-test-001", "Demo account seeded");
    } else {
        tracing::info!(account_id = "acc-test-001", "Demo account exists, sync requested");
    }
    Ok(())
}
