//! jsonapi-fetch - fetch documents from a JSON:API backend

use std::process::ExitCode;

use clap::Parser;
use serde_json::Value;
use tracing::{debug, error};

use jsonapi_fetch::{
    ClientConfig, FetchOptions, ResourceClient,
    cli::{Cli, Command, params_from_pairs},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let client = match build_client(&cli) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Index => client.fetch_index().await,
        Command::Get {
            path,
            params,
            no_cache,
        } => {
            let mut options = FetchOptions::new().with_params(params_from_pairs(params));
            if no_cache {
                options = options.no_cache();
            }
            client.fetch_resource(&path, options).await
        }
        Command::Post { path, data } => match serde_json::from_str::<Value>(&data) {
            Ok(body) => client.post_resource(&path, &body).await,
            Err(e) => {
                eprintln!("❌ Invalid --data JSON: {e}");
                return ExitCode::FAILURE;
            }
        },
    };

    match result {
        Ok(document) => print_document(&document),
        Err(e) => {
            error!(error = %e, "Request failed");
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn build_client(cli: &Cli) -> jsonapi_fetch::Result<ResourceClient> {
    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url.clone());
        config.validate()?;
    }
    debug!(base_url = %config.base_url, "Configuration loaded");
    ResourceClient::from_config(&config)
}

fn print_document(document: &Value) -> ExitCode {
    match serde_json::to_string_pretty(document) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to serialize response: {e}");
            ExitCode::FAILURE
        }
    }
}
