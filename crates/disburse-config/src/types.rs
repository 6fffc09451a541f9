//! Configuration file schema.

use disburse_types::{Address, DEFAULT_DECIMALS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical Safe v1.4.1 MultiSendCallOnly deployment.
pub const DEFAULT_MULTI_SEND_CALL_ONLY: &str = "0x9641d764fc13c8B624c04430C7356C1C7C8102e2";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
	pub service: ServiceConfig,
	#[serde(default)]
	pub api: ApiConfig,
	pub chain: ChainConfig,
	#[serde(default)]
	pub safe: SafeConfig,
	/// Token symbol to contract details.
	#[serde(default)]
	pub tokens: BTreeMap<String, TokenConfig>,
	#[serde(default)]
	pub storage: StorageConfig,
	#[serde(default)]
	pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	pub name: String,
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	#[serde(default = "default_host")]
	pub host: String,
	#[serde(default = "default_port")]
	pub port: u16,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			host: default_host(),
			port: default_port(),
		}
	}
}

/// Chain access. `config` is handed verbatim to the chosen implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
	#[serde(default = "default_chain_implementation")]
	pub implementation: String,
	pub config: toml::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SafeConfig {
	#[serde(default = "default_multi_send")]
	pub multi_send_call_only: Address,
	#[serde(default = "default_max_batch_size")]
	pub max_batch_size: usize,
}

impl Default for SafeConfig {
	fn default() -> Self {
		Self {
			multi_send_call_only: default_multi_send(),
			max_batch_size: default_max_batch_size(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
	pub address: Address,
	#[serde(default = "default_decimals")]
	pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	#[serde(default = "default_storage_backend")]
	pub backend: String,
	#[serde(default = "empty_table")]
	pub config: toml::Value,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: default_storage_backend(),
			config: empty_table(),
		}
	}
}

/// Post-proposal notification to an external Safe indexer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotifierConfig {
	#[serde(default)]
	pub enabled: bool,
	/// Endpoint that receives a JSON POST for each proposal.
	pub indexer_url: Option<String>,
	/// Link shown to operators; `{safe}`, `{safe_lower}` and `{hash}` are
	/// substituted.
	pub explorer_url_template: Option<String>,
	#[serde(default = "default_notify_timeout")]
	pub timeout_secs: u64,
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_host() -> String {
	"127.0.0.1".to_string()
}

fn default_port() -> u16 {
	3000
}

fn default_chain_implementation() -> String {
	"evm".to_string()
}

fn default_multi_send() -> Address {
	DEFAULT_MULTI_SEND_CALL_ONLY
		.parse()
		.unwrap_or(Address::ZERO)
}

fn default_max_batch_size() -> usize {
	200
}

fn default_decimals() -> u8 {
	DEFAULT_DECIMALS
}

fn default_storage_backend() -> String {
	"memory".to_string()
}

fn default_notify_timeout() -> u64 {
	5
}

fn empty_table() -> toml::Value {
	toml::Value::Table(toml::Table::new())
}
