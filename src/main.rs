//! notes-server
//!
//! ```text
//!            ┌──────────────────────────────────────────────────────────┐
//!  :80/:5111 │  plain listener ──▶ acme challenge ──▶ redirect | app    │
//!  ──────────┼─▶                                                        │
//!       :443 │  tls listener ──▶ SNI ──▶ certificate manager ──▶ app    │
//!  ──────────┼─▶                          │                             │
//!            │                            ▼                             │
//!            │               cache dir ◀─▶ ACME directory               │
//!            │                                                          │
//!            │  daily scheduler (01:00 UTC) ──▶ maintenance             │
//!            │  access log (daily file, one line per request)           │
//!            └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use notes_server::config::{read_config, validate_config, ServiceConfig};
use notes_server::observability::{logging, metrics};
use notes_server::{LifecycleOrchestrator, StatusApp};

#[derive(Parser)]
#[command(name = "notes-server")]
#[command(about = "Notes server with automatic TLS", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address of the plain HTTP listener
    #[arg(long)]
    http_addr: Option<String>,

    /// Serve on :80 and :443 with certificates and HTTPS redirect
    #[arg(long)]
    production: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

/// File (or defaults), then flags, then one validation pass over the result.
fn build_config(cli: &Cli) -> Result<ServiceConfig, String> {
    let mut config = match &cli.config {
        Some(path) => read_config(path).map_err(|e| format!("{}: {e}", path.display()))?,
        None => ServiceConfig::default(),
    };

    if cli.production {
        config.listener.http_address = "0.0.0.0:80".to_string();
        config.tls.enabled = true;
        config.tls.redirect_http_to_https = true;
    }
    if let Some(addr) = &cli.http_addr {
        config.listener.http_address = addr.clone();
    }
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }

    validate_config(&config).map_err(|errors| {
        errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    })?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::from(2);
        }
    };

    logging::init_logging(&config.observability);
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        http_address = %config.listener.http_address,
        tls = config.tls.enabled,
        redirect = config.tls.redirect_http_to_https,
        data_dir = %config.storage.data_dir.display(),
        "notes-server starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let orchestrator = LifecycleOrchestrator::new(config, Arc::new(StatusApp::new()));
    match orchestrator.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "notes-server stopped with an error");
            ExitCode::FAILURE
        }
    }
}
