// src/main.rs

use axum::serve;
use clap::{CommandFactory, Parser};
#[cfg(feature = "kerberos")]
use proxy_auth_healthcheck::AuthType;
use proxy_auth_healthcheck::{build_app, cli::Cli, run_probe, setup_configuration, AppConfig, AppError, RunOutcome};
use std::net::SocketAddr;
use std::process::ExitCode;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!(signal = "Ctrl+C", "Received signal. Initiating graceful shutdown...") },
        () = terminate => { info!(signal = "Terminate", "Received signal. Initiating graceful shutdown...") },
    }
}

/// Logs go to stderr; stdout carries only the verdict or the JSON report.
fn init_tracing(cli: &Cli) {
    let env_filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(env_filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn print_outcome(outcome: &RunOutcome, verbose: bool) -> Result<(), AppError> {
    if verbose {
        println!("{}", serde_json::to_string(&outcome.report.results)?);
    } else {
        println!("{}", u8::from(outcome.healthy));
    }
    Ok(())
}

async fn run_once(config: AppConfig) -> ExitCode {
    let verbose = config.probe.verbose;
    match run_probe(&config.probe).await {
        Ok(outcome) => {
            if let Err(e) = print_outcome(&outcome, verbose) {
                error!(error = %e, "Failed to write probe results");
                return ExitCode::FAILURE;
            }
            if outcome.healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("proxy-auth-healthcheck: {e}");
            if !verbose {
                println!("0");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: AppConfig) -> Result<(), AppError> {
    let host = config.server.host_addr.clone().unwrap_or_default();
    let port = config.server.host_port;
    let app = build_app(config)?;

    let listener = TcpListener::bind((host.as_str(), port)).await.map_err(|e| {
        error!(server.host = %host, server.port = port, error = ?e, "Failed to bind to address. Exiting.");
        AppError::from(e)
    })?;
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    info!(server.address = ?addr, "Healthcheck listener started");

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = ?e, "Server run loop encountered an error. Exiting.");
            AppError::from(e)
        })?;

    info!("Server shut down gracefully.");
    Ok(())
}

async fn run(config: AppConfig) -> ExitCode {
    if config.server.enabled() {
        if let Err(e) = run_server(config).await {
            eprintln!("proxy-auth-healthcheck: {e}");
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    if config.probe.auth_types.is_empty() {
        warn!("No auth type selected, probing without authentication");
    }
    run_once(config).await
}

fn main() -> ExitCode {
    let bare = std::env::args_os().len() <= 1 && std::env::var_os("PROXY_HEALTHCHECK_CONFIG").is_none();
    if bare {
        if let Err(e) = Cli::command().print_help() {
            eprintln!("proxy-auth-healthcheck: {e}");
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    let cli = Cli::parse();
    init_tracing(&cli);

    let config = match setup_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("proxy-auth-healthcheck: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Environment changes must happen while the process is still single-threaded.
    #[cfg(feature = "kerberos")]
    if config.probe.selected_auth_types().contains(&AuthType::Kerberos) {
        if let Err(e) = proxy_auth_healthcheck::strategy::kerberos::gss::init_process_ccache() {
            eprintln!("proxy-auth-healthcheck: {e}");
            return ExitCode::FAILURE;
        }
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("proxy-auth-healthcheck: cannot start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(config))
}
