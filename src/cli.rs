//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::key::Params;

/// Fetch documents from a JSON:API backend
#[derive(Parser, Debug)]
#[command(name = "jsonapi-fetch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "JSONAPI_FETCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL (overrides config)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "warn",
        env = "JSONAPI_FETCH_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "JSONAPI_FETCH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the JSON:API index document
    Index,

    /// Fetch a resource
    Get {
        /// Resource path below /jsonapi (e.g. `webform/webform/contact`)
        #[arg(required = true)]
        path: String,

        /// Query parameter as `name=value` (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Bypass the response cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Post a JSON:API document
    Post {
        /// Resource path below /jsonapi
        #[arg(required = true)]
        path: String,

        /// JSON document to send
        #[arg(short, long)]
        data: String,
    },
}

/// Parse a `name=value` query parameter
fn parse_param(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {s:?}"))?;
    if name.is_empty() {
        return Err(format!("empty parameter name in {s:?}"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Collect parsed `--param` pairs into [`Params`]
#[must_use]
pub fn params_from_pairs(pairs: Vec<(String, String)>) -> Params {
    pairs.into_iter().collect()
}
