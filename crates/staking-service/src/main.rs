//! Main entry point for the staking gateway.
//!
//! Loads the configuration, wires the storage backend, the upstream client and
//! the chain signers into a staking engine, and serves the client HTTP API.

use clap::Parser;
use staking_config::Config;
use staking_core::{StakingBuilder, StakingEngine, StakingFactories};
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod server;

use staking_storage::implementations::file::create_storage as create_file_storage;
use staking_storage::implementations::memory::create_storage as create_memory_storage;
use staking_upstream::implementations::http::create_upstream;

/// Command-line arguments for the staking gateway.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started staking gateway");

	let config = Config::from_file(&args.config.to_string_lossy()).await?;
	tracing::info!("Loaded configuration [{}]", config.gateway.id);

	let engine = Arc::new(build_engine(config.clone())?);

	match config.api {
		Some(api_config) if api_config.enabled => {
			server::start_server(api_config, engine).await?;
		},
		_ => {
			tracing::warn!("API server disabled in configuration, nothing to serve");
		},
	}

	tracing::info!("Stopped staking gateway");
	Ok(())
}

/// Creates a factory HashMap with the appropriate type aliases.
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Builds the staking engine with every compiled-in implementation.
fn build_engine(config: Config) -> Result<StakingEngine, Box<dyn std::error::Error>> {
	let builder = StakingBuilder::new(config);

	let storage_factories = create_factory_map!(
		staking_storage::StorageInterface,
		staking_storage::StorageError,
		"file" => create_file_storage,
		"memory" => create_memory_storage,
	);

	let signer_factories = staking_signer::get_all_implementations()
		.into_iter()
		.map(|imp| (imp.kind, imp.factory))
		.collect();

	let factories = StakingFactories {
		storage_factories,
		upstream_factory: create_upstream,
		signer_factories,
	};

	Ok(builder.build(factories)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	const CONFIG: &str = r#"
[gateway]
id = "test-gateway"

[upstream]
base_url = "http://127.0.0.1:9"
api_key = "test-key"

[storage]
primary = "memory"

[storage.implementations.memory]

[api]
enabled = true
port = 0
"#;

	#[test]
	fn test_args_defaults() {
		let args = Args::parse_from(["staking-gateway"]);
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");

		let args = Args::parse_from(["staking-gateway", "-c", "custom.toml", "-l", "debug"]);
		assert_eq!(args.config, PathBuf::from("custom.toml"));
		assert_eq!(args.log_level, "debug");
	}

	#[test]
	fn test_create_factory_map_macro() {
		let factories = create_factory_map!(
			staking_storage::StorageInterface,
			staking_storage::StorageError,
			"memory" => create_memory_storage,
			"file" => create_file_storage,
		);

		assert_eq!(factories.len(), 2);
		assert!(factories.contains_key("memory"));
		assert!(factories.contains_key("file"));
	}

	#[tokio::test]
	async fn test_build_engine_from_file() {
		let temp_dir = tempdir().unwrap();
		let path = temp_dir.path().join("config.toml");
		std::fs::write(&path, CONFIG).unwrap();

		let config = Config::from_file(path.to_str().unwrap()).await.unwrap();
		assert!(config.api.as_ref().is_some_and(|api| api.enabled));

		let engine = build_engine(config).unwrap();
		assert_eq!(engine.config().gateway.id, "test-gateway");
	}

	#[tokio::test]
	async fn test_build_engine_rejects_unknown_primary_storage() {
		let temp_dir = tempdir().unwrap();
		let path = temp_dir.path().join("config.toml");
		std::fs::write(
			&path,
			CONFIG.replace("primary = \"memory\"", "primary = \"file\""),
		)
		.unwrap();

		let result = match Config::from_file(path.to_str().unwrap()).await {
			Ok(config) => build_engine(config).map(|_| ()),
			Err(e) => Err(e.into()),
		};
		assert!(result.is_err());
	}
}
