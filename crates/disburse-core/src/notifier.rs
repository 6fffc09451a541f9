//! Optional hand-off of proposals to an external Safe indexer.
//!
//! Notification is fire-and-forget: failures are logged at `warn` and never
//! reach the caller.

use crate::store::TransactionStore;
use disburse_config::NotifierConfig;
use disburse_types::{truncate_hash, Address, PendingTransaction, SafeError, SafeEvent, B256};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Forwards executed transactions to an external indexer.
pub struct IndexerNotifier {
	/// HTTP client with the configured timeout.
	client: reqwest::Client,
	/// Endpoint receiving execution notices, if configured.
	indexer_url: Option<String>,
	/// Explorer link template with `{safe}` and `{hash}` placeholders.
	explorer_url_template: Option<String>,
	/// Chain the notices refer to.
	chain_id: u64,
}

impl IndexerNotifier {
	/// Builds the notifier from config.
	pub fn new(config: &NotifierConfig, chain_id: u64) -> Result<Self, SafeError> {
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(config.timeout_secs))
			.build()
			.map_err(|e| SafeError::Config(format!("notifier HTTP client: {}", e)))?;
		Ok(Self {
			client,
			indexer_url: config.indexer_url.clone(),
			explorer_url_template: config.explorer_url_template.clone(),
			chain_id,
		})
	}

	/// Link to the transaction in the configured Safe explorer.
	pub fn explorer_url(&self, safe: Address, hash: B256) -> Option<String> {
		let template = self.explorer_url_template.as_ref()?;
		let safe_checksummed = safe.to_checksum(None);
		Some(
			template
				.replace("{safe_lower}", &safe_checksummed.to_lowercase())
				.replace("{safe}", &safe_checksummed)
				.replace("{hash}", &hash.to_string()),
		)
	}

	/// Posts the proposal to the indexer, if one is configured.
	pub async fn notify(&self, tx: &PendingTransaction) {
		let Some(url) = &self.indexer_url else {
			return;
		};
		let signatures: Vec<_> = tx
			.signatures
			.iter()
			.map(|s| json!({ "signer": s.signer, "signature": s.signature }))
			.collect();
		let body = json!({
			"safe": tx.safe_address,
			"chainId": self.chain_id,
			"safeTxHash": tx.transaction_hash,
			"transaction": tx.request,
			"signatures": signatures,
			"url": self.explorer_url(tx.safe_address, tx.transaction_hash),
		});

		let hash = truncate_hash(&tx.transaction_hash);
		match self.client.post(url).json(&body).send().await {
			Ok(resp) if resp.status().is_success() => {
				debug!(%hash, "Indexer accepted proposal");
			}
			Ok(resp) => warn!(%hash, status = %resp.status(), "Indexer rejected proposal"),
			Err(e) => warn!(%hash, error = %e, "Indexer notification failed"),
		}
	}

	/// Notifies the indexer of every proposal published on the bus.
	pub fn spawn(
		self: Arc<Self>,
		mut events: broadcast::Receiver<SafeEvent>,
		store: TransactionStore,
	) -> JoinHandle<()> {
		tokio::spawn(async move {
			loop {
				match events.recv().await {
					Ok(SafeEvent::Proposed { hash, .. }) => match store.get(hash).await {
						Ok(tx) => self.notify(&tx).await,
						Err(e) => warn!(error = %e, "Could not load proposal for indexer"),
					},
					Ok(_) => {}
					Err(RecvError::Lagged(skipped)) => {
						warn!(skipped, "Notifier fell behind, some proposals were not sent");
					}
					Err(RecvError::Closed) => break,
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{pending, SAFE};

	fn notifier(indexer_url: Option<&str>, template: Option<&str>) -> IndexerNotifier {
		IndexerNotifier::new(
			&NotifierConfig {
				enabled: true,
				indexer_url: indexer_url.map(String::from),
				explorer_url_template: template.map(String::from),
				timeout_secs: 1,
			},
			999,
		)
		.unwrap()
	}

	#[test]
	fn explorer_url_substitutes_placeholders() {
		let hash = B256::repeat_byte(0xab);
		let n = notifier(
			None,
			Some("https://den.example/tx?safe=hyperevm:{safe}&id=multisig_{safe_lower}_{hash}"),
		);
		let url = n.explorer_url(SAFE, hash).unwrap();
		assert_eq!(
			url,
			format!(
				"https://den.example/tx?safe=hyperevm:{}&id=multisig_{}_{}",
				SAFE.to_checksum(None),
				SAFE.to_checksum(None).to_lowercase(),
				hash
			)
		);
		assert!(notifier(None, None).explorer_url(SAFE, hash).is_none());
	}

	#[tokio::test]
	async fn unreachable_indexer_is_not_an_error() {
		let n = notifier(Some("http://127.0.0.1:9/proposals"), None);
		n.notify(&pending(B256::repeat_byte(1), SAFE)).await;
	}
}
