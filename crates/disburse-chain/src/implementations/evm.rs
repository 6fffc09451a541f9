//! JSON-RPC chain access built on alloy.
//!
//! One HTTP provider carries both the Safe reads and the executor wallet that
//! signs `execTransaction`. The Safe contract is addressed per call, so a
//! single instance serves any number of Safes on the configured chain.

use crate::{ChainError, ChainInterface, SubmittedExecution};
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol_types::{decode_revert_reason, SolEvent};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use disburse_types::contracts::ISafe;
use disburse_types::{
	http_url, private_key, truncate_hash, ConfigSchema, ExecutionRecord, Field, FieldType,
	SafeState, SafeTransactionRequest, Schema, ValidationError,
};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Revert strings the Safe contracts use, with their meaning.
const SAFE_ERROR_CODES: &[(&str, &str)] = &[
	("GS001", "threshold needs to be defined"),
	("GS010", "not enough gas to execute the Safe transaction"),
	("GS011", "could not pay gas costs with ether"),
	("GS012", "could not pay gas costs with token"),
	("GS013", "Safe transaction failed when gasPrice and safeTxGas were 0"),
	("GS020", "signatures data too short"),
	("GS021", "invalid contract signature location: inside static part"),
	("GS022", "invalid contract signature location: length not present"),
	("GS023", "invalid contract signature location: data not complete"),
	("GS024", "invalid contract signature provided"),
	("GS025", "hash has not been approved"),
	("GS026", "invalid owner provided, or signatures not sorted by owner"),
];

/// Connection settings for [`EvmChain`].
#[derive(Debug, Clone)]
pub struct EvmChainSettings {
	pub rpc_url: String,
	pub chain_id: u64,
	/// Timeout for a single RPC request.
	pub request_timeout: Duration,
	/// How long to wait for a submitted transaction to be mined.
	pub receipt_timeout: Duration,
	/// Total time spent retrying transient RPC failures.
	pub max_retry_elapsed: Duration,
	/// Blocks searched backwards for `ExecutionSuccess` logs.
	pub log_lookback_blocks: u64,
}

/// [`ChainInterface`] over a JSON-RPC endpoint, submitting as the executor key.
pub struct EvmChain {
	provider: DynProvider,
	executor: Address,
	settings: EvmChainSettings,
}

impl EvmChain {
	pub fn new(settings: EvmChainSettings, signer: PrivateKeySigner) -> Result<Self, ChainError> {
		let url = settings
			.rpc_url
			.parse()
			.map_err(|e| ChainError::InvalidConfig(format!("Invalid RPC URL: {}", e)))?;

		let signer = signer.with_chain_id(Some(settings.chain_id));
		let executor = signer.address();
		let provider = ProviderBuilder::new()
			.wallet(EthereumWallet::from(signer))
			.connect_http(url)
			.erased();

		Ok(Self {
			provider,
			executor,
			settings,
		})
	}

	/// Runs a read with a per-attempt timeout, retrying transient failures
	/// with exponential backoff until `max_retry_elapsed` has passed.
	async fn read<T, F, Fut>(&self, what: &'static str, op: F) -> Result<T, ChainError>
	where
		F: Fn() -> Fut,
		Fut: Future<Output = Result<T, String>>,
	{
		let policy = ExponentialBackoff {
			initial_interval: Duration::from_millis(250),
			max_elapsed_time: Some(self.settings.max_retry_elapsed),
			..ExponentialBackoff::default()
		};

		backoff::future::retry(policy, || async {
			match timeout(self.settings.request_timeout, op()).await {
				Ok(Ok(value)) => Ok(value),
				Ok(Err(e)) => {
					warn!(call = what, error = %e, "RPC read failed");
					Err(backoff::Error::transient(ChainError::Unavailable(format!(
						"{}: {}",
						what, e
					))))
				}
				Err(_) => {
					warn!(call = what, "RPC read timed out");
					Err(backoff::Error::transient(ChainError::Timeout(format!(
						"{} after {:?}",
						what, self.settings.request_timeout
					))))
				}
			}
		})
		.await
	}
}

fn describe_revert(reason: &str) -> String {
	SAFE_ERROR_CODES
		.iter()
		.find(|(code, _)| reason.contains(code))
		.map(|(code, meaning)| format!("{}: {}", code, meaning))
		.unwrap_or_else(|| reason.to_string())
}

fn classify(err: alloy::contract::Error) -> ChainError {
	match err.as_revert_data() {
		Some(data) => {
			let reason = decode_revert_reason(&data)
				.unwrap_or_else(|| format!("reverted with data {}", data));
			ChainError::Reverted(describe_revert(&reason))
		}
		None => ChainError::Unavailable(err.to_string()),
	}
}

/// Safe versions differ on whether `txHash` is indexed, so accept it either
/// as the first topic argument or as the first data word.
fn log_mentions_hash(log: &Log, hash: B256) -> bool {
	log.topics().get(1) == Some(&hash) || log.data().data.starts_with(hash.as_slice())
}

fn execution_record(log: &Log) -> Option<ExecutionRecord> {
	let chain_tx_hash = log.transaction_hash?;
	match log.topic0() {
		Some(t) if *t == ISafe::ExecutionSuccess::SIGNATURE_HASH => {
			Some(ExecutionRecord::Succeeded { chain_tx_hash })
		}
		Some(t) if *t == ISafe::ExecutionFailure::SIGNATURE_HASH => {
			Some(ExecutionRecord::Failed { chain_tx_hash })
		}
		_ => None,
	}
}

#[async_trait]
impl ChainInterface for EvmChain {
	fn chain_id(&self) -> u64 {
		self.settings.chain_id
	}

	fn executor(&self) -> Address {
		self.executor
	}

	async fn safe_state(&self, safe: Address) -> Result<SafeState, ChainError> {
		let contract = ISafe::new(safe, self.provider.clone());
		let contract = &contract;

		let nonce = self
			.read("nonce", || async move {
				contract.nonce().call().await.map_err(|e| e.to_string())
			})
			.await?;
		let threshold = self
			.read("getThreshold", || async move {
				contract.getThreshold().call().await.map_err(|e| e.to_string())
			})
			.await?;
		let owners = self
			.read("getOwners", || async move {
				contract.getOwners().call().await.map_err(|e| e.to_string())
			})
			.await?;

		debug!(safe = %safe, %nonce, %threshold, owners = owners.len(), "Read Safe state");

		Ok(SafeState {
			nonce,
			threshold: threshold.saturating_to::<u64>(),
			owners,
		})
	}

	async fn transaction_hash(
		&self,
		safe: Address,
		request: &SafeTransactionRequest,
	) -> Result<B256, ChainError> {
		let contract = ISafe::new(safe, self.provider.clone());
		let contract = &contract;

		self.read("getTransactionHash", || async move {
			contract
				.getTransactionHash(
					request.to,
					request.value,
					request.data.clone(),
					request.operation.as_u8(),
					request.safe_tx_gas,
					request.base_gas,
					request.gas_price,
					request.gas_token,
					request.refund_receiver,
					request.nonce,
				)
				.call()
				.await
				.map_err(|e| e.to_string())
		})
		.await
	}

	async fn execute(
		&self,
		safe: Address,
		request: &SafeTransactionRequest,
		signatures: Bytes,
	) -> Result<SubmittedExecution, ChainError> {
		let contract = ISafe::new(safe, self.provider.clone());
		let call = contract
			.execTransaction(
				request.to,
				request.value,
				request.data.clone(),
				request.operation.as_u8(),
				request.safe_tx_gas,
				request.base_gas,
				request.gas_price,
				request.gas_token,
				request.refund_receiver,
				signatures,
			)
			.from(self.executor);

		// Simulate first so a revert surfaces with its reason and costs nothing.
		match timeout(self.settings.request_timeout, call.call()).await {
			Err(_) => {
				return Err(ChainError::Timeout(
					"execTransaction simulation".to_string(),
				))
			}
			Ok(Err(e)) => return Err(classify(e)),
			Ok(Ok(false)) => {
				return Err(ChainError::Reverted(
					"Safe reports the inner call would fail".to_string(),
				))
			}
			Ok(Ok(true)) => {}
		}

		let pending = timeout(self.settings.request_timeout, call.send())
			.await
			.map_err(|_| ChainError::Timeout("execTransaction submission".to_string()))?
			.map_err(classify)?;
		let chain_tx_hash = *pending.tx_hash();
		info!(safe = %safe, tx_hash = %truncate_hash(&chain_tx_hash), "Submitted execTransaction");

		let receipt = timeout(self.settings.receipt_timeout, pending.get_receipt())
			.await
			.map_err(|_| {
				ChainError::Timeout(format!(
					"no receipt for {} within {:?}",
					chain_tx_hash, self.settings.receipt_timeout
				))
			})?
			.map_err(|e| ChainError::Unavailable(e.to_string()))?;

		if !receipt.status() {
			return Err(ChainError::Reverted(format!(
				"transaction {} reverted on-chain",
				chain_tx_hash
			)));
		}

		let inner_success = !receipt.inner.logs().iter().any(|log| {
			log.address() == safe && log.topic0() == Some(&ISafe::ExecutionFailure::SIGNATURE_HASH)
		});

		Ok(SubmittedExecution {
			chain_tx_hash,
			block_number: receipt.block_number,
			inner_success,
		})
	}

	async fn find_execution(
		&self,
		safe: Address,
		hash: B256,
	) -> Result<Option<ExecutionRecord>, ChainError> {
		let provider = &self.provider;
		let latest = self
			.read("eth_blockNumber", || async move {
				provider.get_block_number().await.map_err(|e| e.to_string())
			})
			.await?;

		let filter = Filter::new()
			.address(safe)
			.event_signature(vec![
				ISafe::ExecutionSuccess::SIGNATURE_HASH,
				ISafe::ExecutionFailure::SIGNATURE_HASH,
			])
			.from_block(latest.saturating_sub(self.settings.log_lookback_blocks))
			.to_block(latest);
		let filter = &filter;

		let logs = self
			.read("eth_getLogs", || async move {
				provider.get_logs(filter).await.map_err(|e| e.to_string())
			})
			.await?;

		Ok(logs
			.iter()
			.rev()
			.filter(|log| log_mentions_hash(log, hash))
			.find_map(execution_record))
	}
}

pub struct EvmChainSchema;

impl ConfigSchema for EvmChainSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let positive = || FieldType::Integer {
			min: Some(1),
			max: None,
		};
		Schema::new(
			vec![
				Field::new("rpc_url", FieldType::String).with_validator(http_url),
				Field::new("chain_id", positive()),
				Field::new("executor_private_key", FieldType::String).with_validator(private_key),
			],
			vec![
				Field::new("request_timeout_secs", positive()),
				Field::new("receipt_timeout_secs", positive()),
				Field::new("max_retry_elapsed_secs", positive()),
				Field::new("log_lookback_blocks", positive()),
			],
		)
		.validate(config)
	}
}

/// Configuration parameters:
/// - `rpc_url`, `chain_id`, `executor_private_key` (required)
/// - `request_timeout_secs` (default 10), `receipt_timeout_secs` (default 120),
///   `max_retry_elapsed_secs` (default 30), `log_lookback_blocks` (default 10000)
pub fn create_chain(config: &toml::Value) -> Result<Box<dyn ChainInterface>, ChainError> {
	EvmChainSchema
		.validate(config)
		.map_err(|e| ChainError::InvalidConfig(e.to_string()))?;

	let int = |name: &str, default: u64| {
		config
			.get(name)
			.and_then(|v| v.as_integer())
			.map(|v| v as u64)
			.unwrap_or(default)
	};
	let settings = EvmChainSettings {
		rpc_url: config
			.get("rpc_url")
			.and_then(|v| v.as_str())
			.unwrap_or_default()
			.to_string(),
		chain_id: int("chain_id", 0),
		request_timeout: Duration::from_secs(int("request_timeout_secs", 10)),
		receipt_timeout: Duration::from_secs(int("receipt_timeout_secs", 120)),
		max_retry_elapsed: Duration::from_secs(int("max_retry_elapsed_secs", 30)),
		log_lookback_blocks: int("log_lookback_blocks", 10_000),
	};

	let signer = config
		.get("executor_private_key")
		.and_then(|v| v.as_str())
		.unwrap_or_default()
		.parse::<PrivateKeySigner>()
		.map_err(|e| ChainError::InvalidConfig(format!("Invalid executor key: {}", e)))?;

	Ok(Box::new(EvmChain::new(settings, signer)?))
}
