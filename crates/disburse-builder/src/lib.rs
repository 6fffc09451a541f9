//! Turns a list of payout lines into a canonical Safe transaction.
//!
//! A single transfer becomes a plain `Call` to the token contract. Two or
//! more become a `DelegateCall` into MultiSendCallOnly, one packed `transfer`
//! per line in input order, so one signing round covers the whole batch and
//! lines may reference different tokens.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use disburse_types::contracts::IERC20;
use disburse_types::{
	format_amount, parse_amount, Operation, Recipient, SafeError, SafeTransactionRequest,
	DEFAULT_DECIMALS,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

pub mod multisend;

use multisend::{multi_send_calldata, BatchCall};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuilderError {
	#[error("recipient {index}: invalid address: {reason}")]
	InvalidRecipient { index: usize, reason: String },
	#[error("recipient {index}: invalid amount: {reason}")]
	InvalidAmount { index: usize, reason: String },
	#[error("recipient {index}: unknown token '{token}'")]
	UnknownToken { index: usize, token: String },
	#[error("no transfers to build")]
	NoTransfers,
	#[error("{count} transfers exceed the batch limit of {max}")]
	BatchTooLarge { count: usize, max: usize },
}

impl From<BuilderError> for SafeError {
	fn from(err: BuilderError) -> Self {
		let field = match &err {
			BuilderError::InvalidRecipient { index, .. } => format!("recipients[{}].address", index),
			BuilderError::InvalidAmount { index, .. } => format!("recipients[{}].amount", index),
			BuilderError::UnknownToken { index, .. } => format!("recipients[{}].token", index),
			BuilderError::NoTransfers | BuilderError::BatchTooLarge { .. } => {
				"recipients".to_string()
			}
		};
		SafeError::invalid(field, err.to_string())
	}
}

/// A token distributions may pay out in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
	pub symbol: String,
	pub address: Address,
	/// Decimal places used to parse human amounts.
	#[serde(default = "default_decimals")]
	pub decimals: u8,
}

fn default_decimals() -> u8 {
	DEFAULT_DECIMALS
}

/// Known tokens, looked up by symbol (case-insensitive) or by address.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
	by_symbol: HashMap<String, TokenInfo>,
}

impl TokenRegistry {
	pub fn new(tokens: impl IntoIterator<Item = TokenInfo>) -> Self {
		let by_symbol = tokens
			.into_iter()
			.map(|t| (t.symbol.to_uppercase(), t))
			.collect();
		Self { by_symbol }
	}

	pub fn resolve(&self, token: &str) -> Option<&TokenInfo> {
		let token = token.trim();
		if let Some(info) = self.by_symbol.get(&token.to_uppercase()) {
			return Some(info);
		}
		let address = token.parse::<Address>().ok()?;
		self.by_symbol.values().find(|t| t.address == address)
	}

	pub fn len(&self) -> usize {
		self.by_symbol.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_symbol.is_empty()
	}
}

/// A validated payout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
	pub token: TokenInfo,
	pub recipient: Address,
	pub amount: U256,
}

impl Transfer {
	fn calldata(&self) -> Bytes {
		IERC20::transferCall {
			to: self.recipient,
			amount: self.amount,
		}
		.abi_encode()
		.into()
	}
}

/// Batching parameters for [`TransactionBuilder`].
#[derive(Debug, Clone)]
pub struct BuilderSettings {
	/// `MultiSendCallOnly` deployment used for batches.
	pub multi_send_call_only: Address,
	/// Upper bound on transfers in one batch.
	pub max_batch_size: usize,
}

/// Turns recipient lists into a single Safe transaction request.
pub struct TransactionBuilder {
	tokens: TokenRegistry,
	settings: BuilderSettings,
}

/// Mixed-case input must carry a valid EIP-55 checksum.
fn parse_recipient(raw: &str) -> Result<Address, String> {
	let raw = raw.trim();
	let hex = raw.strip_prefix("0x").unwrap_or(raw);
	let mixed_case = hex.chars().any(|c| c.is_ascii_uppercase())
		&& hex.chars().any(|c| c.is_ascii_lowercase());
	let address = if mixed_case {
		Address::parse_checksummed(raw, None).map_err(|e| e.to_string())?
	} else {
		raw.parse::<Address>().map_err(|e| e.to_string())?
	};
	if address.is_zero() {
		return Err("zero address".to_string());
	}
	Ok(address)
}

impl TransactionBuilder {
	pub fn new(tokens: TokenRegistry, settings: BuilderSettings) -> Self {
		Self { tokens, settings }
	}

	pub fn tokens(&self) -> &TokenRegistry {
		&self.tokens
	}

	/// Validates every line, failing on the first bad one.
	pub fn validate(&self, recipients: &[Recipient]) -> Result<Vec<Transfer>, BuilderError> {
		if recipients.is_empty() {
			return Err(BuilderError::NoTransfers);
		}
		if recipients.len() > self.settings.max_batch_size {
			return Err(BuilderError::BatchTooLarge {
				count: recipients.len(),
				max: self.settings.max_batch_size,
			});
		}

		recipients
			.iter()
			.enumerate()
			.map(|(index, line)| {
				let recipient = parse_recipient(&line.address)
					.map_err(|reason| BuilderError::InvalidRecipient { index, reason })?;
				let token = self.tokens.resolve(&line.token).cloned().ok_or_else(|| {
					BuilderError::UnknownToken {
						index,
						token: line.token.clone(),
					}
				})?;
				let amount =
					parse_amount(&line.amount, token.decimals).map_err(|e| {
						BuilderError::InvalidAmount {
							index,
							reason: e.to_string(),
						}
					})?;
				Ok(Transfer {
					token,
					recipient,
					amount,
				})
			})
			.collect()
	}

	/// Builds the Safe transaction for already validated transfers.
	pub fn build_from_transfers(
		&self,
		transfers: &[Transfer],
		nonce: U256,
	) -> Result<SafeTransactionRequest, BuilderError> {
		let request = match transfers {
			[] => return Err(BuilderError::NoTransfers),
			[single] => SafeTransactionRequest::new(
				single.token.address,
				U256::ZERO,
				single.calldata(),
				Operation::Call,
				nonce,
			),
			many => {
				let calls: Vec<BatchCall> = many
					.iter()
					.map(|t| BatchCall {
						operation: Operation::Call,
						to: t.token.address,
						value: U256::ZERO,
						data: t.calldata(),
					})
					.collect();
				SafeTransactionRequest::new(
					self.settings.multi_send_call_only,
					U256::ZERO,
					multi_send_calldata(&calls),
					Operation::DelegateCall,
					nonce,
				)
			}
		};
		debug!(
			transfers = transfers.len(),
			operation = request.operation.as_u8(),
			%nonce,
			"Built Safe transaction"
		);
		Ok(request)
	}

	pub fn build(
		&self,
		recipients: &[Recipient],
		nonce: U256,
	) -> Result<SafeTransactionRequest, BuilderError> {
		let transfers = self.validate(recipients)?;
		self.build_from_transfers(&transfers, nonce)
	}

	/// Human-readable totals per token symbol.
	pub fn totals(transfers: &[Transfer]) -> BTreeMap<String, String> {
		let mut sums: BTreeMap<String, (U256, u8)> = BTreeMap::new();
		for t in transfers {
			let entry = sums
				.entry(t.token.symbol.clone())
				.or_insert((U256::ZERO, t.token.decimals));
			entry.0 = entry.0.saturating_add(t.amount);
		}
		sums.into_iter()
			.map(|(symbol, (sum, decimals))| (symbol, format_amount(sum, decimals)))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::address;
	use disburse_types::contracts::IMultiSendCallOnly;

	const USDC: Address = address!("0xb88339cb7199b77e23db6e890353e22632ba630f");
	const LOOP: Address = address!("0x3333333333333333333333333333333333333333");
	const MULTI_SEND: Address = address!("0x9641d764fc13c8B624c04430C7356C1C7C8102e2");

	fn builder() -> TransactionBuilder {
		TransactionBuilder::new(
			TokenRegistry::new([
				TokenInfo {
					symbol: "USDC".into(),
					address: USDC,
					decimals: 6,
				},
				TokenInfo {
					symbol: "LOOP".into(),
					address: LOOP,
					decimals: 18,
				},
			]),
			BuilderSettings {
				multi_send_call_only: MULTI_SEND,
				max_batch_size: 3,
			},
		)
	}

	fn line(address: &str, amount: &str, token: &str) -> Recipient {
		Recipient {
			address: address.into(),
			amount: amount.into(),
			token: token.into(),
		}
	}

	const ALICE: &str = "0x1111111111111111111111111111111111111111";
	const BOB: &str = "0x2222222222222222222222222222222222222222";

	#[test]
	fn single_transfer_is_direct_call() {
		let request = builder()
			.build(&[line(ALICE, "1.5", "usdc")], U256::from(5))
			.unwrap();
		assert_eq!(request.to, USDC);
		assert_eq!(request.operation, Operation::Call);
		assert_eq!(request.nonce, U256::from(5));
		assert_eq!(request.value, U256::ZERO);

		let decoded = IERC20::transferCall::abi_decode(&request.data).unwrap();
		assert_eq!(decoded.to, ALICE.parse::<Address>().unwrap());
		assert_eq!(decoded.amount, U256::from(1_500_000u64));
	}

	#[test]
	fn every_recipient_lands_in_the_batch() {
		let request = builder()
			.build(
				&[line(ALICE, "1", "USDC"), line(BOB, "0.02", "LOOP")],
				U256::from(9),
			)
			.unwrap();
		assert_eq!(request.to, MULTI_SEND);
		assert_eq!(request.operation, Operation::DelegateCall);

		let packed = IMultiSendCallOnly::multiSendCall::abi_decode(&request.data)
			.unwrap()
			.transactions;

		// transfer calldata is 4 + 32 + 32 bytes
		let entry_len = 85 + 68;
		assert_eq!(packed.len(), 2 * entry_len);
		assert_eq!(&packed[1..21], USDC.as_slice());
		assert_eq!(&packed[entry_len + 1..entry_len + 21], LOOP.as_slice());

		let second =
			IERC20::transferCall::abi_decode(&packed[entry_len + 85..2 * entry_len]).unwrap();
		assert_eq!(second.to, BOB.parse::<Address>().unwrap());
		assert_eq!(second.amount, U256::from(20_000_000_000_000_000u64));
	}

	#[test]
	fn rejects_bad_lines() {
		let b = builder();
		assert_eq!(b.build(&[], U256::ZERO), Err(BuilderError::NoTransfers));
		assert!(matches!(
			b.validate(&[line("0x1234", "1", "USDC")]),
			Err(BuilderError::InvalidRecipient { index: 0, .. })
		));
		assert!(matches!(
			b.validate(&[line(ALICE, "1", "USDC"), line(&format!("0x{}", "0".repeat(40)), "1", "USDC")]),
			Err(BuilderError::InvalidRecipient { index: 1, .. })
		));
		assert!(matches!(
			b.validate(&[line(ALICE, "0.0000001", "USDC")]),
			Err(BuilderError::InvalidAmount { index: 0, .. })
		));
		assert!(matches!(
			b.validate(&[line(ALICE, "-3", "USDC")]),
			Err(BuilderError::InvalidAmount { index: 0, .. })
		));
		assert!(matches!(
			b.validate(&[line(ALICE, "1", "DOGE")]),
			Err(BuilderError::UnknownToken { index: 0, .. })
		));
		let four = vec![line(ALICE, "1", "USDC"); 4];
		assert_eq!(
			b.validate(&four),
			Err(BuilderError::BatchTooLarge { count: 4, max: 3 })
		);
	}

	#[test]
	fn bad_checksum_is_rejected() {
		let good = "0x9641d764fc13c8B624c04430C7356C1C7C8102e2";
		let bad = "0x9641D764fc13c8B624c04430C7356C1C7C8102e2";
		assert!(parse_recipient(good).is_ok());
		assert!(parse_recipient(bad).is_err());
		assert!(parse_recipient(&good.to_lowercase()).is_ok());
	}

	#[test]
	fn tokens_resolve_by_symbol_or_address() {
		let b = builder();
		assert_eq!(b.tokens().resolve("loop").unwrap().address, LOOP);
		assert_eq!(
			b.tokens().resolve(&USDC.to_string()).unwrap().symbol,
			"USDC"
		);
		assert!(b.tokens().resolve("0xdead").is_none());
	}

	#[test]
	fn totals_per_token() {
		let b = builder();
		let transfers = b
			.validate(&[
				line(ALICE, "1.25", "USDC"),
				line(BOB, "0.75", "USDC"),
				line(BOB, "0.02", "LOOP"),
			])
			.unwrap();
		let totals = TransactionBuilder::totals(&transfers);
		assert_eq!(totals["USDC"], "2");
		assert_eq!(totals["LOOP"], "0.02");
	}
}
