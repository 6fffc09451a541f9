//! In-memory collaborators shared by the core's unit tests.

use alloy::primitives::{address, keccak256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use disburse_account::signature::encode;
use disburse_builder::{BuilderSettings, TokenInfo, TokenRegistry, TransactionBuilder};
use disburse_chain::{ChainError, ChainInterface, SubmittedExecution};
use disburse_storage::implementations::memory::MemoryStorage;
use disburse_storage::{StorageError, StorageInterface, StorageService};
use disburse_types::eip712::compute_hash;
use disburse_types::{
	now, Address, Bytes, ExecutionRecord, PendingTransaction, SafeState, SafeTransactionRequest,
	TransactionStatus, B256, U256,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CHAIN_ID: u64 = 999;
pub const SAFE: Address = address!("0x5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a");
pub const USDC: Address = address!("0x0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c");
/// Chain hash of an `execTransaction` sent by someone else.
pub const COMPETING_TX: B256 = B256::repeat_byte(0xc0);
pub const MULTI_SEND: Address = address!("0x3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d");

pub fn owner(seed: u8) -> PrivateKeySigner {
	PrivateKeySigner::from_bytes(&B256::repeat_byte(seed)).unwrap()
}

/// Typed-data flavoured (`v` 27/28) signature over `hash`.
pub fn sign(signer: &PrivateKeySigner, hash: B256) -> Bytes {
	encode(&signer.sign_hash_sync(&hash).unwrap(), 27)
}

/// `eth_sign` flavoured (`v` 31/32) signature over `hash`.
pub fn eth_sign(signer: &PrivateKeySigner, hash: B256) -> Bytes {
	encode(&signer.sign_message_sync(hash.as_slice()).unwrap(), 31)
}

pub fn storage() -> Arc<StorageService> {
	Arc::new(StorageService::new(Box::new(MemoryStorage::new())))
}

pub fn builder() -> TransactionBuilder {
	TransactionBuilder::new(
		TokenRegistry::new([TokenInfo {
			symbol: "USDC".into(),
			address: USDC,
			decimals: 6,
		}]),
		BuilderSettings {
			multi_send_call_only: MULTI_SEND,
			max_batch_size: 10,
		},
	)
}

pub fn request(nonce: u64) -> SafeTransactionRequest {
	SafeTransactionRequest::new(
		USDC,
		U256::ZERO,
		Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]),
		Default::default(),
		U256::from(nonce),
	)
}

pub fn pending(hash: B256, safe: Address) -> PendingTransaction {
	PendingTransaction {
		transaction_hash: hash,
		safe_address: safe,
		chain_id: CHAIN_ID,
		request: request(5),
		signatures: Vec::new(),
		status: TransactionStatus::Pending,
		proposer: Address::repeat_byte(1),
		created_at: now(),
		updated_at: now(),
		executed_tx_hash: None,
		failure_reason: None,
	}
}

#[derive(Debug, Clone)]
pub enum ExecOutcome {
	Success,
	InnerFailure,
	Revert(String),
	/// Another executor lands first: the nonce moves and our submission
	/// reverts. `same_hash` decides whether the competitor executed this
	/// very transaction or a different one.
	LostRace { same_hash: bool },
}

/// A Safe with configurable owners, threshold and nonce.
///
/// Successful executions bump the nonce and leave an execution record behind,
/// like the real contract does.
pub struct MockChain {
	state: Mutex<SafeState>,
	hash_override: Mutex<Option<B256>>,
	outcome: Mutex<ExecOutcome>,
	submitted: Mutex<Vec<Bytes>>,
	records: Mutex<HashMap<B256, ExecutionRecord>>,
	unavailable: AtomicBool,
}

impl MockChain {
	pub fn new(owners: &[&PrivateKeySigner], threshold: u64, nonce: u64) -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(SafeState {
				nonce: U256::from(nonce),
				threshold,
				owners: owners.iter().map(|o| o.address()).collect(),
			}),
			hash_override: Mutex::new(None),
			outcome: Mutex::new(ExecOutcome::Success),
			submitted: Mutex::new(Vec::new()),
			records: Mutex::new(HashMap::new()),
			unavailable: AtomicBool::new(false),
		})
	}

	pub fn set_nonce(&self, nonce: u64) {
		self.state.lock().unwrap().nonce = U256::from(nonce);
	}

	pub fn set_owners(&self, owners: &[&PrivateKeySigner]) {
		self.state.lock().unwrap().owners = owners.iter().map(|o| o.address()).collect();
	}

	pub fn set_contract_hash(&self, hash: B256) {
		*self.hash_override.lock().unwrap() = Some(hash);
	}

	pub fn set_outcome(&self, outcome: ExecOutcome) {
		*self.outcome.lock().unwrap() = outcome;
	}

	pub fn set_unavailable(&self, unavailable: bool) {
		self.unavailable.store(unavailable, Ordering::SeqCst);
	}

	pub fn record_execution(&self, hash: B256, record: ExecutionRecord) {
		self.records.lock().unwrap().insert(hash, record);
	}

	/// Packed signature blobs passed to `execute`, in call order.
	pub fn submitted(&self) -> Vec<Bytes> {
		self.submitted.lock().unwrap().clone()
	}

	fn check_available(&self) -> Result<(), ChainError> {
		if self.unavailable.load(Ordering::SeqCst) {
			return Err(ChainError::Unavailable("connection refused".into()));
		}
		Ok(())
	}
}

#[async_trait]
impl ChainInterface for MockChain {
	fn chain_id(&self) -> u64 {
		CHAIN_ID
	}

	fn executor(&self) -> Address {
		Address::repeat_byte(0xee)
	}

	async fn safe_state(&self, _safe: Address) -> Result<SafeState, ChainError> {
		self.check_available()?;
		Ok(self.state.lock().unwrap().clone())
	}

	async fn transaction_hash(
		&self,
		safe: Address,
		request: &SafeTransactionRequest,
	) -> Result<B256, ChainError> {
		self.check_available()?;
		let overridden = *self.hash_override.lock().unwrap();
		Ok(overridden.unwrap_or_else(|| compute_hash(safe, CHAIN_ID, request)))
	}

	async fn execute(
		&self,
		safe: Address,
		request: &SafeTransactionRequest,
		signatures: Bytes,
	) -> Result<SubmittedExecution, ChainError> {
		self.check_available()?;
		self.submitted.lock().unwrap().push(signatures.clone());
		let outcome = self.outcome.lock().unwrap().clone();
		let chain_tx_hash = keccak256(&signatures);
		let hash = compute_hash(safe, CHAIN_ID, request);
		let inner_success = match outcome {
			ExecOutcome::Revert(reason) => return Err(ChainError::Reverted(reason)),
			ExecOutcome::LostRace { same_hash } => {
				if same_hash {
					self.record_execution(
						hash,
						ExecutionRecord::Succeeded {
							chain_tx_hash: COMPETING_TX,
						},
					);
				}
				self.state.lock().unwrap().nonce += U256::from(1);
				return Err(ChainError::Reverted(
					"GS026: invalid owner provided, or signatures not sorted by owner".into(),
				));
			}
			ExecOutcome::Success => {
				self.record_execution(hash, ExecutionRecord::Succeeded { chain_tx_hash });
				true
			}
			ExecOutcome::InnerFailure => {
				self.record_execution(hash, ExecutionRecord::Failed { chain_tx_hash });
				false
			}
		};
		let mut state = self.state.lock().unwrap();
		state.nonce += U256::from(1);
		Ok(SubmittedExecution {
			chain_tx_hash,
			block_number: Some(100),
			inner_success,
		})
	}

	async fn find_execution(
		&self,
		_safe: Address,
		hash: B256,
	) -> Result<Option<ExecutionRecord>, ChainError> {
		self.check_available()?;
		Ok(self.records.lock().unwrap().get(&hash).copied())
	}
}

/// Backend that fails every operation.
pub struct FailingStorage;

#[async_trait]
impl StorageInterface for FailingStorage {
	async fn get_bytes(&self, _key: &str) -> Result<Vec<u8>, StorageError> {
		Err(StorageError::Backend("offline".into()))
	}

	async fn set_bytes(
		&self,
		_key: &str,
		_value: Vec<u8>,
		_ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		Err(StorageError::Backend("offline".into()))
	}

	async fn compare_and_set(
		&self,
		_key: &str,
		_expected: Option<&[u8]>,
		_value: Vec<u8>,
	) -> Result<bool, StorageError> {
		Err(StorageError::Backend("offline".into()))
	}

	async fn delete(&self, _key: &str) -> Result<(), StorageError> {
		Err(StorageError::Backend("offline".into()))
	}

	async fn exists(&self, _key: &str) -> Result<bool, StorageError> {
		Err(StorageError::Backend("offline".into()))
	}

	async fn list_keys(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
		Err(StorageError::Backend("offline".into()))
	}
}
