//! Distribution bookkeeping and audit records.

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One payout line as supplied by the operator.
///
/// Fields stay as raw strings until the transaction builder validates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
	pub address: String,
	pub amount: String,
	pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionKind {
	Loopdrops,
	Loyalty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionStatus {
	Pending,
	Proposed,
	Executed,
	Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
	pub id: String,
	pub kind: DistributionKind,
	pub recipients: Vec<Recipient>,
	pub status: DistributionStatus,
	pub recipient_count: usize,
	/// Token symbol to human-readable total.
	pub totals: BTreeMap<String, String>,
	pub created_at: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub proposed_at: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub executed_at: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub safe_address: Option<Address>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transaction_hash: Option<B256>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub chain_tx_hash: Option<B256>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub proposer: Option<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
	Created,
	Proposed,
	Approved,
	Executed,
	Failed,
	Stale,
	Updated,
}

impl fmt::Display for AuditAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			AuditAction::Created => "created",
			AuditAction::Proposed => "proposed",
			AuditAction::Approved => "approved",
			AuditAction::Executed => "executed",
			AuditAction::Failed => "failed",
			AuditAction::Stale => "stale",
			AuditAction::Updated => "updated",
		};
		f.write_str(s)
	}
}

/// Append-only record of a state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
	pub id: String,
	pub action: AuditAction,
	pub timestamp: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub actor: Option<Address>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transaction_hash: Option<B256>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub distribution_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

impl AuditEntry {
	pub fn new(action: AuditAction) -> Self {
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			action,
			timestamp: crate::now(),
			actor: None,
			transaction_hash: None,
			distribution_id: None,
			details: None,
		}
	}

	pub fn with_actor(mut self, actor: Address) -> Self {
		self.actor = Some(actor);
		self
	}

	pub fn with_transaction(mut self, hash: B256) -> Self {
		self.transaction_hash = Some(hash);
		self
	}

	pub fn with_distribution(mut self, id: impl Into<String>) -> Self {
		self.distribution_id = Some(id.into());
		self
	}

	pub fn with_details(mut self, details: serde_json::Value) -> Self {
		self.details = Some(details);
		self
	}
}
