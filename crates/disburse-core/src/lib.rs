//! Safe multisig transaction protocol core.
//!
//! [`SafeEngine`] wires the chain adapter, storage, transaction builder,
//! signature collector and executor together and is the single entry point
//! used by the service layer. Every operation is also available on the
//! component that implements it, which is how the unit tests drive them.

use disburse_builder::{BuilderSettings, TokenInfo, TokenRegistry, TransactionBuilder};
use disburse_chain::ChainInterface;
use disburse_config::Config;
use disburse_storage::implementations::{file, memory};
use disburse_storage::StorageService;
use disburse_types::{
	Address, Bytes, ExecutionReceipt, PendingTransaction, Recipient, SafeError, SafeState,
	SafeTransactionRequest, SignatureProgress, TransactionStatusView, B256,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub mod audit;
pub mod collector;
pub mod compute;
pub mod context;
pub mod distributions;
pub mod event_bus;
pub mod executor;
pub mod notifier;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use audit::AuditTrail;
pub use collector::SignatureCollector;
pub use compute::ComputedTransaction;
pub use distributions::DistributionService;
pub use event_bus::EventBus;
pub use executor::Executor;
pub use notifier::IndexerNotifier;

use context::CoreContext;
use store::{TransactionLocks, TransactionStore};

pub struct SafeEngine {
	chain: Arc<dyn ChainInterface>,
	builder: Arc<TransactionBuilder>,
	store: TransactionStore,
	collector: Arc<SignatureCollector>,
	executor: Arc<Executor>,
	distributions: Arc<DistributionService>,
	audit: AuditTrail,
	events: EventBus,
	notifier: Option<Arc<IndexerNotifier>>,
}

impl SafeEngine {
	pub fn new(
		chain: Arc<dyn ChainInterface>,
		storage: Arc<StorageService>,
		builder: TransactionBuilder,
	) -> Self {
		let builder = Arc::new(builder);
		let events = EventBus::default();
		let audit = AuditTrail::new(storage.clone());
		let store = TransactionStore::new(storage.clone());
		let ctx = CoreContext {
			store: store.clone(),
			chain: chain.clone(),
			locks: TransactionLocks::default(),
			audit: audit.clone(),
			events: events.clone(),
		};
		let collector = Arc::new(SignatureCollector::new(ctx.clone()));
		let executor = Arc::new(Executor::new(ctx));
		let distributions = Arc::new(DistributionService::new(
			storage,
			builder.clone(),
			chain.clone(),
			collector.clone(),
			audit.clone(),
		));
		Self {
			chain,
			builder,
			store,
			collector,
			executor,
			distributions,
			audit,
			events,
			notifier: None,
		}
	}

	pub fn with_notifier(mut self, notifier: IndexerNotifier) -> Self {
		self.notifier = Some(Arc::new(notifier));
		self
	}

	/// Builds the engine and its adapters from the loaded configuration.
	pub fn from_config(config: &Config) -> Result<Self, SafeError> {
		let chain: Arc<dyn ChainInterface> = match config.chain.implementation.as_str() {
			"evm" => {
				disburse_chain::implementations::evm::create_chain(&config.chain.config)?.into()
			}
			other => {
				return Err(SafeError::Config(format!(
					"unknown chain implementation '{}'",
					other
				)))
			}
		};
		let backend = match config.storage.backend.as_str() {
			"memory" => memory::create_storage(&config.storage.config)?,
			"file" => file::create_storage(&config.storage.config)?,
			other => {
				return Err(SafeError::Config(format!(
					"unknown storage backend '{}'",
					other
				)))
			}
		};
		let tokens = TokenRegistry::new(config.tokens.iter().map(|(symbol, token)| TokenInfo {
			symbol: symbol.clone(),
			address: token.address,
			decimals: token.decimals,
		}));
		let builder = TransactionBuilder::new(
			tokens,
			BuilderSettings {
				multi_send_call_only: config.safe.multi_send_call_only,
				max_batch_size: config.safe.max_batch_size,
			},
		);

		let chain_id = chain.chain_id();
		let mut engine = Self::new(chain, Arc::new(StorageService::new(backend)), builder);
		if config.notifier.enabled {
			engine = engine.with_notifier(IndexerNotifier::new(&config.notifier, chain_id)?);
		}
		info!(
			chain_id,
			storage = %config.storage.backend,
			tokens = config.tokens.len(),
			"Safe engine configured"
		);
		Ok(engine)
	}

	/// Starts the background listeners. Abort the handles on shutdown.
	pub fn start(&self) -> Vec<JoinHandle<()>> {
		let mut handles = vec![self
			.distributions
			.clone()
			.spawn_sync(self.events.subscribe())];
		if let Some(notifier) = &self.notifier {
			handles.push(
				notifier
					.clone()
					.spawn(self.events.subscribe(), self.store.clone()),
			);
		}
		handles
	}

	pub fn chain_id(&self) -> u64 {
		self.chain.chain_id()
	}

	pub fn executor_address(&self) -> Address {
		self.chain.executor()
	}

	pub fn builder(&self) -> &TransactionBuilder {
		&self.builder
	}

	pub fn distributions(&self) -> &DistributionService {
		&self.distributions
	}

	pub fn audit(&self) -> &AuditTrail {
		&self.audit
	}

	pub fn events(&self) -> &EventBus {
		&self.events
	}

	pub fn explorer_url(&self, safe: Address, hash: B256) -> Option<String> {
		self.notifier.as_ref()?.explorer_url(safe, hash)
	}

	pub async fn safe_info(&self, safe: Address) -> Result<SafeState, SafeError> {
		Ok(self.chain.safe_state(safe).await?)
	}

	/// Validates `recipients` and returns the transaction owners should sign.
	pub async fn compute_transaction(
		&self,
		safe: Address,
		recipients: &[Recipient],
	) -> Result<ComputedTransaction, SafeError> {
		let transfers = self.builder.validate(recipients)?;
		compute::compute_transaction(self.chain.as_ref(), &self.builder, safe, &transfers).await
	}

	pub async fn propose(
		&self,
		safe: Address,
		request: SafeTransactionRequest,
		proposer: Address,
		signature: Bytes,
	) -> Result<PendingTransaction, SafeError> {
		self.collector
			.propose(safe, request, proposer, signature)
			.await
	}

	pub async fn add_signature(
		&self,
		hash: B256,
		signer: Address,
		signature: Bytes,
	) -> Result<SignatureProgress, SafeError> {
		self.collector.add_signature(hash, signer, signature).await
	}

	pub async fn execute(&self, hash: B256) -> Result<ExecutionReceipt, SafeError> {
		self.executor.execute(hash).await
	}

	pub async fn status(&self, hash: B256) -> Result<TransactionStatusView, SafeError> {
		self.collector.status(hash).await
	}

	pub async fn get(&self, hash: B256) -> Result<PendingTransaction, SafeError> {
		self.collector.get(hash).await
	}

	pub async fn list_by_safe(&self, safe: Address) -> Result<Vec<PendingTransaction>, SafeError> {
		self.collector.list_by_safe(safe).await
	}

	pub async fn refresh(&self, hash: B256) -> Result<PendingTransaction, SafeError> {
		self.collector.refresh(hash).await
	}
}
