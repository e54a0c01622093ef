//! Binary entry point: loads configuration, wires up storage and the chain
//! adapter, then runs the event loop and the off-chain ingester as two
//! cooperating tasks until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers_core::types::U256;
use log::{error, info, LevelFilter};
use tokio::sync::{mpsc, watch};

use monitoring_service::chain::EthersChainAdapter;
use monitoring_service::config::{CliArgs, Config};
use monitoring_service::domain::BlockchainState;
use monitoring_service::event_loop::{EventLoop, EventLoopConfig};
use monitoring_service::executor::{Executor, ExecutorConfig};
use monitoring_service::ingester::{run_ingester_task, Ingester, IngestJob};
use monitoring_service::storage::{SledStorage, Storage, WriteOp};
use monitoring_service::MonitoringError;

fn init_logging(level: &str) {
    let level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    let result = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply();
    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}

async fn run(config: Config) -> Result<(), MonitoringError> {
    let wallet: LocalWallet = config
        .private_key
        .parse()
        .map_err(|e| MonitoringError::Config(format!("invalid private key: {e}")))?;
    let our_address = wallet.address();

    let provider = Provider::<Http>::try_from(config.chain_rpc_url.as_str())
        .map_err(|e| MonitoringError::Config(format!("invalid chain_rpc_url: {e}")))?;
    let chain_id = provider
        .get_chainid()
        .await
        .map_err(|e| MonitoringError::Config(format!("failed to query chain id: {e}")))?
        .as_u64();

    let storage: Arc<dyn Storage> = Arc::new(
        SledStorage::open(&config.db_path)
            .map_err(|e| MonitoringError::Config(format!("failed to open store: {e}")))?,
    );

    let chain = Arc::new(EthersChainAdapter::new(
        &config.chain_rpc_url,
        &config.private_key,
        chain_id,
        config.contracts.monitoring_service,
        config.contracts.user_deposit,
    )?);

    if storage.get_state().await?.is_none() {
        info!("no persisted state found, starting from sync_start_block={}", config.sync_start_block);
        let state = BlockchainState::new(
            chain_id,
            config.contracts.token_network_registry,
            config.contracts.monitoring_service,
            config.sync_start_block,
        );
        storage.apply(vec![WriteOp::UpdateState(state)]).await?;
    }

    let executor = Executor::new(
        storage.clone(),
        chain.clone(),
        ExecutorConfig {
            our_address,
            risk_factor: config.risk_factor,
            min_reward: U256::from(config.min_reward),
        },
    );

    let event_loop = EventLoop::new(
        storage.clone(),
        chain,
        executor,
        EventLoopConfig {
            our_address,
            required_confirmations: config.required_confirmations,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            monitor_window_ratio: config.monitor_window_ratio,
        },
    );

    let ingester = Ingester::new(chain_id, U256::from(config.min_reward));
    let (ingest_tx, ingest_rx) = mpsc::channel::<IngestJob>(64);
    let ingester_handle = tokio::spawn(run_ingester_task(ingester, storage, ingest_rx));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt signal, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = event_loop.run(shutdown_rx).await;

    drop(ingest_tx);
    let _ = ingester_handle.await;

    result
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli_args = CliArgs::parse();

    let file_config = match &cli_args.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => Some(c),
            Err(e) => {
                eprintln!("failed to load config file: {e}");
                return std::process::ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let config = match cli_args.merge_onto(file_config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    init_logging(&config.log_level);
    info!("monitoring-service v{} starting", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
