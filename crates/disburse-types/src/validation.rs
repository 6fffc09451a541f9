//! Schema checks for implementation-specific configuration tables.
//!
//! Backends (storage, chain, signer) receive a raw `toml::Value` table. Each
//! one publishes a [`ConfigSchema`] so the loader can reject a bad table
//! before anything is constructed from it.

use alloy::primitives::Address;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: &'static str,
		actual: String,
	},
}

impl ValidationError {
	fn nested(self, parent: &str) -> Self {
		match self {
			ValidationError::MissingField(f) => {
				ValidationError::MissingField(format!("{}.{}", parent, f))
			}
			ValidationError::InvalidValue { field, message } => ValidationError::InvalidValue {
				field: format!("{}.{}", parent, field),
				message,
			},
			ValidationError::TypeMismatch {
				field,
				expected,
				actual,
			} => ValidationError::TypeMismatch {
				field: format!("{}.{}", parent, field),
				expected,
				actual,
			},
		}
	}
}

#[derive(Debug)]
pub enum FieldType {
	String,
	Integer { min: Option<i64>, max: Option<i64> },
	Boolean,
	/// A hex string that parses as a 20-byte address.
	Address,
	Table(Schema),
}

pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.finish_non_exhaustive()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}

	fn check(&self, value: &toml::Value) -> Result<(), ValidationError> {
		check_type(&self.name, value, &self.field_type)?;
		if let Some(validator) = &self.validator {
			validator(value).map_err(|message| ValidationError::InvalidValue {
				field: self.name.clone(),
				message,
			})?;
		}
		Ok(())
	}
}

#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| ValidationError::TypeMismatch {
				field: "root".to_string(),
				expected: "table",
				actual: config.type_str().to_string(),
			})?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			field.check(value)?;
		}
		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				field.check(value)?;
			}
		}
		Ok(())
	}
}

fn check_type(name: &str, value: &toml::Value, expected: &FieldType) -> Result<(), ValidationError> {
	let mismatch = |expected: &'static str| ValidationError::TypeMismatch {
		field: name.to_string(),
		expected,
		actual: value.type_str().to_string(),
	};

	match expected {
		FieldType::String => {
			value.as_str().ok_or_else(|| mismatch("string"))?;
		}
		FieldType::Boolean => {
			value.as_bool().ok_or_else(|| mismatch("boolean"))?;
		}
		FieldType::Address => {
			let raw = value.as_str().ok_or_else(|| mismatch("address string"))?;
			raw.parse::<Address>()
				.map_err(|e| ValidationError::InvalidValue {
					field: name.to_string(),
					message: format!("not an address: {}", e),
				})?;
		}
		FieldType::Integer { min, max } => {
			let n = value.as_integer().ok_or_else(|| mismatch("integer"))?;
			if let Some(min) = min.filter(|m| n < *m) {
				return Err(ValidationError::InvalidValue {
					field: name.to_string(),
					message: format!("{} is below the minimum {}", n, min),
				});
			}
			if let Some(max) = max.filter(|m| n > *m) {
				return Err(ValidationError::InvalidValue {
					field: name.to_string(),
					message: format!("{} is above the maximum {}", n, max),
				});
			}
		}
		FieldType::Table(schema) => {
			schema.validate(value).map_err(|e| e.nested(name))?;
		}
	}
	Ok(())
}

/// Implemented by every configurable backend.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}

/// Validator for `http(s)://` endpoints.
pub fn http_url(value: &toml::Value) -> Result<(), String> {
	match value.as_str() {
		Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
		_ => Err("must start with http:// or https://".to_string()),
	}
}

/// Validator for 32-byte hex private keys, with or without `0x`.
pub fn private_key(value: &toml::Value) -> Result<(), String> {
	let key = value.as_str().unwrap_or_default();
	let key = key.strip_prefix("0x").unwrap_or(key);
	if key.len() != 64 || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
		return Err("private key must be 64 hex characters".to_string());
	}
	Ok(())
}
