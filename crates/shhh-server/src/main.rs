//! shhh server: share a secret that can be read once
//!
//! Serves the ephemeral secret store over a small HTTP API. Secrets live only
//! in memory, sealed under the sender's passphrase.
//!
//! # Usage
//!
//! ```bash
//! shhh-server --config /path/to/shhh.toml
//! shhh-server --verbose        # debug logging
//! shhh-server --validate       # Validate config and exit
//! ```

mod api;
mod config;
mod server;
mod validate;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    // Security hardening: a crash must not write secrets to disk
    let core_dumps_disabled = shhh_core::memory::disable_core_dumps();

    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut validate_only = false;
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--validate" => {
                validate_only = true;
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("shhh-server {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    // Load config
    let (mut server_config, loaded_from) = match config_path {
        Some(path) => {
            let config = config::ServerConfig::from_file(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            (config, Some(path))
        }
        None => config::ServerConfig::discover().context("Failed to load config")?,
    };

    // Apply env overrides
    server_config.apply_env_overrides();

    // Validate
    server_config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    let log_level = if verbose {
        "debug"
    } else {
        server_config.server.log_level.as_str()
    };
    env_logger::Builder::new().parse_filters(log_level).init();

    match &loaded_from {
        Some(path) => log::debug!("Loaded config file {}", path.display()),
        None => log::debug!("No config file found, using defaults"),
    }
    if !core_dumps_disabled {
        log::warn!("Core dumps are still enabled; a crash may write secrets to disk");
    }

    if validate_only {
        println!("✅ Configuration is valid.");
        println!("  Listen:         {}", server_config.server.listen);
        println!("  Max items:      {}", server_config.limits.max_items);
        println!(
            "  Max file size:  {} bytes",
            server_config.limits.max_file_size
        );
        println!(
            "  Max passphrase: {} chars",
            server_config.limits.max_phrase_size
        );
        println!(
            "  Max retention:  {} secs",
            server_config.limits.max_retention_secs
        );
        println!(
            "  Sweep interval: {} secs",
            server_config.limits.sweep_interval_secs
        );
        return Ok(());
    }

    // Build tokio runtime
    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;

    if let Err(e) = rt.block_on(server::run(server_config, server::shutdown_signal())) {
        log::error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"shhh server: ephemeral, encrypted, single-read secrets

USAGE:
    shhh-server [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (default: $XDG_CONFIG_HOME/shhh/config.toml, then ./shhh.toml)
    -v, --verbose         Log at debug level
    --validate            Validate configuration and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    SHHH_LISTEN           Listen address (host:port)
    SHHH_LOG_LEVEL        Log level (error/warn/info/debug/trace)
    SHHH_MAX_ITEMS        Maximum number of stored secrets
    SHHH_MAX_FILE_SIZE    Maximum secret/file size in bytes
    SHHH_MAX_PHRASE_SIZE  Maximum passphrase length
    SHHH_MAX_RETENTION    Maximum secret lifetime in seconds
    SHHH_SWEEP_INTERVAL   Expired-secret sweep interval in seconds

EXAMPLES:
    # Run with config file
    shhh-server --config /etc/shhh.toml

    # Run on another port with defaults otherwise
    SHHH_LISTEN=127.0.0.1:3000 shhh-server

    # Validate configuration
    shhh-server --config shhh.toml --validate
"#
    );
}
