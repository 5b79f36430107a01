//! gh-relay: relay proxy for GitHub releases, archives, raw files and gists
//!
//! Built on Cloudflare's Pingora framework. Clients request
//! `{prefix}{github url}` and receive the object without ever talking to
//! GitHub directly.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use pingora::prelude::*;
use pingora_proxy::http_proxy_service;
use proxy::RelayProxy;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

mod telemetry;

#[derive(Parser)]
#[command(name = "gh-relay")]
#[command(author, version, about = "Relay proxy for GitHub releases, archives and raw files")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path; environment variables override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (defaults to global.log_level)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Test configuration and exit
    #[arg(short, long)]
    test: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate configuration
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Validate { config }) => validate_config(config.or(cli.config).as_deref()),
        Some(Commands::Run { config }) => run_server(config.or(cli.config).as_deref(), cli.log_level),
        None if cli.test => validate_config(cli.config.as_deref()),
        None => run_server(cli.config.as_deref(), cli.log_level),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::from_startup(path).with_context(|| match path {
        Some(path) => format!("Failed to load config from {:?}", path),
        None => "Failed to load config from environment".to_string(),
    })
}

#[allow(unreachable_code)]
fn run_server(config_path: Option<&Path>, log_level: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;

    // The OTLP batch exporter runs on this runtime; Pingora brings its own
    let telemetry_rt = tokio::runtime::Runtime::new().context("Failed to create telemetry runtime")?;
    let provider = telemetry_rt.block_on(async { telemetry::init_provider(&config.global.tracing) })?;

    let level = log_level.unwrap_or_else(|| config.global.log_level.clone());
    telemetry::init_logging(&level, provider.as_ref(), &config.global.tracing.service_name)?;

    info!(config = ?config_path, "Starting gh-relay");
    if provider.is_some() {
        info!(endpoint = %config.global.tracing.otlp_endpoint, "OpenTelemetry export enabled");
    }

    let proxy = RelayProxy::new(&config).context("Failed to build relay service")?;
    let in_flight = proxy.in_flight();

    let mut server = Server::new(None).context("Failed to create Pingora server")?;
    server.bootstrap();

    let mut service = http_proxy_service(&server.configuration, proxy);
    for addr in &config.server.listen {
        let addr = listen_address(addr);
        info!(address = %addr, "Adding listener");
        service.add_tcp(&addr);
    }
    server.add_service(service);

    let grace_period = Duration::from_secs(config.global.grace_period);
    let shutdown_provider = provider.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, initiating graceful shutdown...");

        info!(grace_period_secs = grace_period.as_secs(), "Waiting for requests to drain...");
        if in_flight.wait_for_drain(grace_period) {
            info!("All requests drained");
        } else {
            warn!("Grace period expired, some requests may be cut off");
        }

        telemetry::shutdown(shutdown_provider.clone());
        info!("Shutdown complete");
        std::process::exit(0);
    })
    .context("Failed to install signal handler")?;

    // Keep the exporter runtime alive for as long as the server runs
    let _telemetry_rt = telemetry_rt;

    info!(
        prefix = %config.relay.prefix,
        listen = ?config.server.listen,
        "gh-relay started"
    );
    server.run_forever();

    Ok(())
}

/// Expand ":port" shorthand to a wildcard bind address
fn listen_address(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}

fn validate_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;

    println!("Configuration is valid!");
    for addr in &config.server.listen {
        println!("  Listen: {}", listen_address(addr));
    }
    println!("  Prefix: {}", config.relay.prefix);
    println!("  Max redirects: {}", config.relay.max_redirects);
    println!("  jsDelivr for blobs: {}", config.relay.use_jsdelivr);
    if config.relay.whitelist.is_empty() {
        println!("  Whitelist: (all repositories)");
    } else {
        println!("  Whitelist: {}", config.relay.whitelist.join(", "));
    }
    if !config.cors.allowed_origins.is_empty() {
        println!("  CORS origins: {}", config.cors.allowed_origins.join(", "));
    }
    println!("  Assets: {:?}", config.server.assets_dir);
    if let Some(origin) = &config.server.public_origin {
        println!("  Public origin: {}", origin);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_address() {
        assert_eq!(listen_address(":8080"), "0.0.0.0:8080");
        assert_eq!(listen_address("127.0.0.1:9000"), "127.0.0.1:9000");
        assert_eq!(listen_address(" [::1]:80 "), "[::1]:80");
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["gh-relay", "validate", "--config", "relay.toml"]).unwrap();
        match cli.command {
            Some(Commands::Validate { config }) => assert_eq!(config, Some(PathBuf::from("relay.toml"))),
            _ => panic!("expected validate subcommand"),
        }

        let cli = Cli::try_parse_from(["gh-relay", "--test", "-l", "debug"]).unwrap();
        assert!(cli.test);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.command.is_none());
    }
}
