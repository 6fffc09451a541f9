use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use disburse_account::implementations::local::{LocalWallet, SigningMode};
use disburse_account::SignerInterface;
use disburse_chain::implementations::evm::EvmChainSchema;
use disburse_config::{Config, ConfigLoader};
use disburse_core::SafeEngine;
use disburse_storage::implementations::{file::FileStorageSchema, memory::MemoryStorageSchema};
use disburse_types::{Address, ConfigSchema, B256};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;

#[derive(Parser)]
#[command(name = "disburse")]
#[command(about = "Safe multisig token distribution service", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
	config: PathBuf,

	#[arg(long, env = "DISBURSE_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the HTTP service
	Start,
	/// Validate the configuration file
	Validate,
	/// Sign a Safe transaction hash with a local owner key
	Sign {
		/// Safe transaction hash (0x-prefixed)
		hash: B256,
		#[arg(long, env = "DISBURSE_SIGNER_KEY", hide_env_values = true)]
		key: String,
		/// `typed_data` (v 27/28) or `eth_sign` (v 31/32)
		#[arg(long, default_value = "typed_data")]
		mode: String,
	},
	/// Print nonce, threshold and owners of a Safe
	SafeInfo {
		safe: Address,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start_service(&cli.config).await,
		Some(Commands::Validate) => validate_config(&cli.config).await,
		Some(Commands::Sign { hash, key, mode }) => sign_hash(hash, &key, &mode).await,
		Some(Commands::SafeInfo { safe }) => safe_info(&cli.config, safe).await,
	}
}

async fn load_config(path: &PathBuf) -> Result<Config> {
	info!("Loading configuration from: {:?}", path);
	ConfigLoader::new()
		.with_file(path)
		.load()
		.await
		.context("Failed to load configuration")
}

async fn start_service(path: &PathBuf) -> Result<()> {
	info!("Starting disburse service");
	let config = load_config(path).await?;
	info!("Service name: {}", config.service.name);

	let engine = Arc::new(SafeEngine::from_config(&config).context("Failed to build Safe engine")?);
	info!(
		chain_id = engine.chain_id(),
		executor = %engine.executor_address(),
		"Safe engine ready"
	);
	let listeners = engine.start();

	let host = config.api.host.clone();
	let port = config.api.port;
	let http_engine = engine.clone();
	let http_handle = tokio::spawn(async move { api::serve(http_engine, &host, port).await });

	setup_shutdown_signal().await;
	info!("Shutdown signal received, stopping services...");

	http_handle.abort();
	for handle in listeners {
		handle.abort();
	}

	info!("Disburse service stopped");
	Ok(())
}

async fn validate_config(path: &PathBuf) -> Result<()> {
	let config = load_config(path).await?;

	EvmChainSchema
		.validate(&config.chain.config)
		.context("Invalid [chain.config]")?;
	match config.storage.backend.as_str() {
		"file" => FileStorageSchema.validate(&config.storage.config),
		_ => MemoryStorageSchema.validate(&config.storage.config),
	}
	.context("Invalid [storage.config]")?;

	info!("Configuration is valid");
	info!("Service name: {}", config.service.name);
	info!("API: {}:{}", config.api.host, config.api.port);
	info!("Storage backend: {}", config.storage.backend);
	info!("MultiSendCallOnly: {}", config.safe.multi_send_call_only);
	for (symbol, token) in &config.tokens {
		info!("  Token {}: {} ({} decimals)", symbol, token.address, token.decimals);
	}
	Ok(())
}

async fn sign_hash(hash: B256, key: &str, mode: &str) -> Result<()> {
	let mode: SigningMode = mode.parse()?;
	let wallet = LocalWallet::new(key)?.with_mode(mode);
	let signature = wallet.sign_hash(hash).await?;
	println!("signer:    {}", wallet.address());
	println!("signature: {}", signature);
	Ok(())
}

async fn safe_info(path: &PathBuf, safe: Address) -> Result<()> {
	let config = load_config(path).await?;
	let engine = SafeEngine::from_config(&config).context("Failed to build Safe engine")?;
	let state = engine
		.safe_info(safe)
		.await
		.context("Failed to read Safe state")?;
	println!("safe:      {}", safe);
	println!("nonce:     {}", state.nonce);
	println!("threshold: {}", state.threshold);
	for owner in &state.owners {
		println!("owner:     {}", owner);
	}
	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}

async fn setup_shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
