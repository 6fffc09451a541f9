//! Configuration validation utility
//!
//! Usage: cargo run --bin validate-config config/default.toml

use std::env;
use std::process;

use disburse_config::ConfigLoader;

#[tokio::main]
async fn main() {
	let args: Vec<String> = env::args().collect();

	if args.len() != 2 {
		eprintln!("Usage: {} <config-file>", args[0]);
		process::exit(1);
	}

	let config_path = &args[1];
	println!("Validating configuration file: {}", config_path);

	match ConfigLoader::new().with_file(config_path).load().await {
		Ok(config) => {
			println!("Configuration is valid");
			println!("Service name: {}", config.service.name);
			println!("API: {}:{}", config.api.host, config.api.port);
			println!("Chain implementation: {}", config.chain.implementation);
			println!("Storage backend: {}", config.storage.backend);
			println!("MultiSendCallOnly: {}", config.safe.multi_send_call_only);
			let symbols: Vec<_> = config.tokens.keys().collect();
			println!("Tokens: {:?}", symbols);
		}
		Err(e) => {
			eprintln!("Configuration validation failed:");
			eprintln!("{}", e);
			process::exit(1);
		}
	}
}
