//! Exact conversion between human decimal amounts and token base units.
//!
//! Amounts never pass through floating point. An input with more fractional
//! digits than the token supports is rejected rather than rounded.

use alloy::primitives::U256;
use thiserror::Error;

/// Decimals assumed for a token when none are configured.
pub const DEFAULT_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
	#[error("amount is empty")]
	Empty,
	#[error("amount must not be negative")]
	Negative,
	#[error("amount must be greater than zero")]
	Zero,
	#[error("malformed amount: {0}")]
	Malformed(String),
	#[error("amount has more than {decimals} fractional digits")]
	TooManyDecimals { decimals: u8 },
	#[error("amount does not fit in 256 bits")]
	Overflow,
}

/// Parses a decimal string such as `"12.5"` into base units.
pub fn parse_amount(input: &str, decimals: u8) -> Result<U256, AmountError> {
	let trimmed = input.trim();
	if trimmed.is_empty() {
		return Err(AmountError::Empty);
	}
	if trimmed.starts_with('-') {
		return Err(AmountError::Negative);
	}
	let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);

	let (whole, fraction) = match unsigned.split_once('.') {
		Some((w, f)) => (w, f),
		None => (unsigned, ""),
	};
	if whole.is_empty() && fraction.is_empty() {
		return Err(AmountError::Malformed(input.to_string()));
	}
	let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
	if !all_digits(whole) || !all_digits(fraction) {
		return Err(AmountError::Malformed(input.to_string()));
	}
	if fraction.len() > decimals as usize {
		return Err(AmountError::TooManyDecimals { decimals });
	}

	let mut digits = String::with_capacity(whole.len() + decimals as usize);
	digits.push_str(whole);
	digits.push_str(fraction);
	digits.extend(std::iter::repeat('0').take(decimals as usize - fraction.len()));
	let digits = digits.trim_start_matches('0');
	if digits.is_empty() {
		return Err(AmountError::Zero);
	}

	U256::from_str_radix(digits, 10).map_err(|_| AmountError::Overflow)
}

/// Formats base units back to a decimal string, trimming trailing zeros.
pub fn format_amount(amount: U256, decimals: u8) -> String {
	let base = U256::from(10u64).pow(U256::from(decimals));
	let whole = amount / base;
	let fraction = amount % base;
	if fraction.is_zero() {
		return whole.to_string();
	}
	let fraction = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
	format!("{}.{}", whole, fraction.trim_end_matches('0'))
}
