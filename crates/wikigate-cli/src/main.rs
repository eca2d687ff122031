//! wikigate - command-line access to wiki REST APIs behind mixed auth
//! front-ends.
//!
//! Every command prints JSON on stdout; diagnostics go to stderr.

use std::io;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wikigate_core::api::Method;
use wikigate_core::discover::discover;
use wikigate_core::{ApiClient, Config, InstanceCredentialConfig, SessionCache};

#[derive(Parser)]
#[command(name = "wikigate", version, about = "Authenticated access to wiki REST APIs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List instances configured in the secrets file
    Discover,
    /// Call any REST endpoint, e.g. `request prod GET content/123`
    Request {
        instance: String,
        method: String,
        /// Path below /rest/api/
        endpoint: String,
        /// Query parameter as key=value (repeatable)
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// JSON request body
        #[arg(short = 'd', long = "data")]
        data: Option<String>,
    },
    /// GET an endpoint, e.g. `get prod content/search -p cql=space=DEV`
    Get {
        instance: String,
        endpoint: String,
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Show the account the instance credentials resolve to
    Whoami { instance: String },
    /// Run a fresh browser login and cache the session
    Login { instance: String },
    /// Show the cached session for an instance
    Status { instance: String },
    /// Delete the cached session for an instance
    ClearCache { instance: String },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Discover => {
            let instances = discover(&config.secrets_file).with_context(|| {
                format!("Failed to read {}", config.secrets_file.display())
            })?;
            print_json(&serde_json::to_value(instances)?)
        }
        Command::Request {
            instance,
            method,
            endpoint,
            params,
            data,
        } => {
            let method: Method = method
                .to_uppercase()
                .parse()
                .with_context(|| format!("Unsupported HTTP method '{}'", method))?;
            let body = data
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .context("Request body is not valid JSON")?;
            let client = ApiClient::from_env(&instance, &config)?;
            let params: Vec<(&str, &str)> =
                params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let result = client
                .request(method, &endpoint, Some(params.as_slice()), body.as_ref())
                .await?;
            print_json(&result)
        }
        Command::Get {
            instance,
            endpoint,
            params,
        } => {
            let client = ApiClient::from_env(&instance, &config)?;
            let params: Vec<(&str, &str)> =
                params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            print_json(&client.get(&endpoint, Some(params.as_slice())).await?)
        }
        Command::Whoami { instance } => {
            let client = ApiClient::from_env(&instance, &config)?;
            print_json(&client.current_user().await?)
        }
        Command::Login { instance } => {
            let client = ApiClient::from_env(&instance, &config)?;
            let session = client.login().await?;
            info!(instance = %client.instance().name, "Session cached");
            print_json(&json!({
                "instance": client.instance().name,
                "cookie_name": session.cookie_name,
                "expires_at": session.expires_at().to_rfc3339(),
            }))
        }
        Command::Status { instance } => {
            let (resolved, strategy) = InstanceCredentialConfig::from_env(&instance)?;
            let cache = SessionCache::new(&config.cache_dir);
            let session = cache.load(&resolved.name);
            print_json(&json!({
                "instance": resolved.name,
                "url": resolved.base_url,
                "auth_type": strategy.description(),
                "cache_file": cache.path(&resolved.name).display().to_string(),
                "session": session.map(|s| json!({
                    "cookie_name": s.cookie_name,
                    "created": s.age_display(),
                    "fresh": s.is_fresh(),
                    "expires_in_hours": s.time_until_expiry().num_hours().max(0),
                })),
            }))
        }
        Command::ClearCache { instance } => {
            let name = instance.trim().to_uppercase();
            if name.is_empty() {
                bail!("Instance name is empty");
            }
            SessionCache::new(&config.cache_dir).invalidate(&name)?;
            eprintln!("Cleared session cache for {}", name);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("cql=space=DEV").unwrap(),
            ("cql".to_string(), "space=DEV".to_string())
        );
        assert!(parse_param("limit").is_err());
    }

    #[test]
    fn test_cli_parses_request() {
        let cli = Cli::try_parse_from([
            "wikigate",
            "request",
            "prod",
            "post",
            "content",
            "-d",
            r#"{"title":"x"}"#,
            "-p",
            "expand=version",
        ])
        .unwrap();
        match cli.command {
            Command::Request {
                instance,
                method,
                params,
                data,
                ..
            } => {
                assert_eq!(instance, "prod");
                assert_eq!(method, "post");
                assert_eq!(params, vec![("expand".to_string(), "version".to_string())]);
                assert_eq!(data.as_deref(), Some(r#"{"title":"x"}"#));
            }
            _ => panic!("expected request command"),
        }
    }
}
