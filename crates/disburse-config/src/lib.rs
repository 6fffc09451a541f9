//! Configuration loading.
//!
//! The file is TOML. Before parsing, every `${VAR}` occurrence is replaced
//! with the value of the environment variable `VAR` (missing variables are an
//! error), so secrets such as the executor key never need to live in the file.
//! A handful of `DISBURSE_*` variables then override individual settings.

use regex::Regex;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

mod types;

pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

const KNOWN_STORAGE_BACKENDS: &[&str] = &["memory", "file"];
const KNOWN_CHAIN_IMPLEMENTATIONS: &[&str] = &["evm"];

pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "DISBURSE_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<Config, ConfigError> {
		let file_path = self.file_path.as_ref().ok_or_else(|| {
			ConfigError::FileNotFound("No configuration file specified".to_string())
		})?;
		info!("Loading configuration from {}", file_path);

		let content = tokio::fs::read_to_string(file_path)
			.await
			.map_err(|e| match e.kind() {
				std::io::ErrorKind::NotFound => ConfigError::FileNotFound(file_path.clone()),
				_ => ConfigError::IoError(e),
			})?;
		self.load_from_str(&content)
	}

	/// Substitutes, parses, applies overrides and validates `content`.
	pub fn load_from_str(&self, content: &str) -> Result<Config, ConfigError> {
		let substituted = substitute_env_vars(content)?;
		let mut config: Config =
			toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))?;

		self.apply_env_overrides(&mut config)?;
		validate_config(&config)?;
		Ok(config)
	}

	fn apply_env_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
		let var = |name: &str| env::var(format!("{}{}", self.env_prefix, name)).ok();

		if let Some(log_level) = var("LOG_LEVEL") {
			debug!("Overriding log level from environment");
			config.service.log_level = log_level;
		}

		if let Some(port) = var("HTTP_PORT") {
			config.api.port = port
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid HTTP port: {}", e)))?;
		}

		if let Some(rpc_url) = var("RPC_URL") {
			debug!("Overriding RPC URL from environment");
			let table = config.chain.config.as_table_mut().ok_or_else(|| {
				ConfigError::ValidationError("chain.config must be a table".to_string())
			})?;
			table.insert("rpc_url".to_string(), toml::Value::String(rpc_url));
		}

		Ok(())
	}
}

fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
	let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
		.map_err(|e| ConfigError::ParseError(e.to_string()))?;

	let mut missing = None;
	let result = re.replace_all(content, |caps: &regex::Captures| {
		let name = &caps[1];
		env::var(name).unwrap_or_else(|_| {
			missing.get_or_insert_with(|| name.to_string());
			String::new()
		})
	});

	match missing {
		Some(name) => Err(ConfigError::EnvVarNotFound(name)),
		None => Ok(result.into_owned()),
	}
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
	let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

	if config.service.name.trim().is_empty() {
		return invalid("service.name must not be empty".to_string());
	}
	if config.api.port == 0 {
		return invalid("api.port must be non-zero".to_string());
	}
	if !KNOWN_CHAIN_IMPLEMENTATIONS.contains(&config.chain.implementation.as_str()) {
		return invalid(format!(
			"unknown chain implementation '{}'",
			config.chain.implementation
		));
	}
	if !config.chain.config.is_table() {
		return invalid("chain.config must be a table".to_string());
	}
	if !KNOWN_STORAGE_BACKENDS.contains(&config.storage.backend.as_str()) {
		return invalid(format!(
			"unknown storage backend '{}'",
			config.storage.backend
		));
	}
	if config.safe.multi_send_call_only.is_zero() {
		return invalid("safe.multi_send_call_only must be set".to_string());
	}
	if config.safe.max_batch_size == 0 {
		return invalid("safe.max_batch_size must be at least 1".to_string());
	}
	if config.tokens.is_empty() {
		return invalid("at least one token must be configured".to_string());
	}
	for (symbol, token) in &config.tokens {
		if token.address.is_zero() {
			return invalid(format!("token {} has a zero address", symbol));
		}
		if token.decimals > 77 {
			return invalid(format!("token {} has {} decimals", symbol, token.decimals));
		}
	}
	let notifier = &config.notifier;
	if notifier.enabled
		&& notifier.indexer_url.is_none()
		&& notifier.explorer_url_template.is_none()
	{
		return invalid(
			"notifier is enabled but neither indexer_url nor explorer_url_template is set"
				.to_string(),
		);
	}
	Ok(())
}
