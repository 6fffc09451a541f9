//! Turning validated transfers into a signable Safe transaction.

use crate::context::verify_contract_hash;
use disburse_builder::{Transfer, TransactionBuilder};
use disburse_chain::ChainInterface;
use disburse_types::eip712::{compute_hash, typed_data};
use disburse_types::{truncate_hash, Address, SafeError, SafeTransactionRequest, B256};
use serde::Serialize;
use tracing::debug;

/// Everything an owner needs to sign a new transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedTransaction {
	/// Safe that will execute the transaction.
	pub safe_address: Address,
	/// Chain the hash is bound to.
	pub chain_id: u64,
	/// EIP-712 hash owners sign.
	pub transaction_hash: B256,
	/// Transaction payload, nonce included.
	pub request: SafeTransactionRequest,
	/// EIP-712 document for `eth_signTypedData_v4`.
	pub typed_data: serde_json::Value,
}

/// Builds the request at the Safe's current nonce, hashes it and checks the
/// hash against the contract before handing it out for signing.
pub async fn compute_transaction(
	chain: &dyn ChainInterface,
	builder: &TransactionBuilder,
	safe: Address,
	transfers: &[Transfer],
) -> Result<ComputedTransaction, SafeError> {
	let state = chain.safe_state(safe).await?;
	let request = builder.build_from_transfers(transfers, state.nonce)?;
	let chain_id = chain.chain_id();
	let hash = compute_hash(safe, chain_id, &request);
	verify_contract_hash(chain, safe, &request, hash).await?;

	debug!(hash = %truncate_hash(&hash), nonce = %request.nonce, "Computed Safe transaction");
	Ok(ComputedTransaction {
		safe_address: safe,
		chain_id,
		transaction_hash: hash,
		typed_data: typed_data(safe, chain_id, &request),
		request,
	})
}
