//! dump-warden — dump lifecycle and storage daemon.
//!
//! Thin wrapper over the library: parse arguments, initialize logging,
//! load configuration, build the service, restore registries from disk,
//! arm the storage watchers, and run the event loop.

use clap::{Parser, ValueEnum};
use dw_core::host::DisconnectedHost;
use dw_core::service::Service;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Dump Warden - dump lifecycle and storage manager
#[derive(Parser)]
#[command(name = "dump-warden")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short = 'c', env = "DW_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "human", env = "DW_LOG_FORMAT")]
    log_format: LogFormat,

    /// Log filter when RUST_LOG is unset (e.g. "dw_core=debug")
    #[arg(long, default_value = "info")]
    log_filter: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    /// Human-readable console output on stderr
    Human,
    /// Machine-parseable JSON lines on stderr
    Json,
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter.clone()));

    match cli.log_format {
        LogFormat::Human => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .init();
        }
        LogFormat::Json => {
            let json_layer = fmt::layer().with_writer(std::io::stderr).json();
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .init();
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let (config, source) = match dw_config::load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, "configuration rejected");
            return ExitCode::FAILURE;
        }
    };
    info!(source = %source, "configuration loaded");

    // Host collaborators are deployment-specific; without a configured
    // connection the notification-driven categories stay inert and the
    // locally stored ones are fully functional.
    let host = Arc::new(DisconnectedHost);
    let mut service = match Service::new(&config, host.clone(), host) {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "failed to initialize dump storage");
            return ExitCode::FAILURE;
        }
    };

    // Watch before restore so a dump landing during startup is seen by
    // exactly one of the two paths.
    if let Err(e) = service.watch_storage() {
        error!(error = %e, "failed to arm storage watchers");
        return ExitCode::FAILURE;
    }
    service.restore();

    // Held so the management surface stays constructible for the life of
    // the process; IPC bindings would clone it.
    let _handle = service.handle();
    service.run();
    ExitCode::SUCCESS
}
