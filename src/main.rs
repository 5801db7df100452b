//! rustdrain - serve a canned HTTP response with graceful shutdown
//!
//! Usage:
//!     rustdrain [--config <path>] [--listen <addr>] [--timeout <duration>]
//!
//! Send SIGINT or SIGTERM to stop accepting connections and drain.
//! See --help for more options.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use hyper::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use rustdrain::config::{Config, ResponseConfig, load_config, validate_config};
use rustdrain::engine::{ConnHandle, ConnState, Handler, HttpServer, TlsOptions};
use rustdrain::util::init_logging;
use rustdrain::{GracefulServer, handler_fn, text_response};

/// Serve HTTP with graceful connection draining.
#[derive(Parser, Debug)]
#[command(name = "rustdrain")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short = 'a', long, value_name = "ADDR")]
    listen: Option<String>,

    /// Override the drain timeout (e.g. 10s, 1m; 0s waits forever)
    #[arg(short, long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => load_config(path).with_context(|| {
            format!("failed to load configuration from '{}'", path.display())
        })?,
        None => Config::default(),
    };

    // CLI overrides config
    if let Some(listen) = cli.listen {
        config.server.listen = Some(listen);
    }
    if let Some(timeout) = cli.timeout {
        config.server.timeout = timeout;
    }
    if let Some(level) = cli.log_level {
        config.global.log_level = level;
    }
    validate_config(&config)
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    // Initialize logging
    init_logging(&config.global.log_level, &config.global.log_format);

    // If --validate flag, just validate and exit
    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!(
            "  Listen: {}",
            config.server.listen.as_deref().unwrap_or("(default)")
        );
        println!("  Timeout: {}", humantime::format_duration(config.server.timeout));
        println!("  TLS: {}", config.server.tls.is_some());
        return Ok(());
    }

    info!(
        listen = ?config.server.listen,
        timeout = %humantime::format_duration(config.server.timeout),
        tls = config.server.tls.is_some(),
        keep_alive = config.server.keep_alive,
        "rustdrain starting"
    );

    run(config)
}

/// Run the server with the given configuration.
fn run(config: Config) -> Result<()> {
    // Create tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async { run_async(config).await })
}

/// Async entry point.
async fn run_async(config: Config) -> Result<()> {
    let server_config = config.server;

    let mut engine = HttpServer::new(canned_handler(&server_config.response)?);
    if let Some(listen) = server_config.listen {
        engine = engine.with_addr(listen);
    }
    engine.set_keep_alives_enabled(server_config.keep_alive);

    let server = GracefulServer::new(engine)
        .with_timeout(server_config.timeout)
        .with_conn_state(|conn: &ConnHandle, state: ConnState| {
            debug!(conn = %conn, state = %state, "connection state");
        });

    info!("press Ctrl+C to stop");

    let result = match server_config.tls {
        Some(tls) => {
            let server = GracefulServer {
                server: server.server.with_tls(TlsOptions { alpn: tls.alpn }),
                ..server
            };
            server.listen_and_serve_tls(&tls.cert, &tls.key).await
        }
        None => server.listen_and_serve().await,
    };

    match result {
        Err(e) if !e.is_listener_closed() => Err(e).context("server failed"),
        _ => {
            info!("rustdrain shut down complete");
            Ok(())
        }
    }
}

/// Handler answering every request with the configured response.
fn canned_handler(response: &ResponseConfig) -> Result<Handler> {
    let status = StatusCode::from_u16(response.status)
        .with_context(|| format!("invalid response status {}", response.status))?;
    let body = Bytes::from(response.body.clone());
    let delay = response.delay;

    Ok(handler_fn(move |req| {
        let body = body.clone();
        async move {
            debug!(method = %req.method(), uri = %req.uri(), "request");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            text_response(status, body)
        }
    }))
}
